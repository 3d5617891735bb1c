//! Outstanding permission requests awaiting the platform's answer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, OnceLock};

use async_channel::{Receiver, Sender, bounded};
use log::{debug, warn};

use crate::{Permission, PermissionStatus, grant_results_to_statuses};

type Answer = Vec<(Permission, PermissionStatus)>;

// Android request codes must fit in the lower 16 bits.
const FIRST_REQUEST_CODE: i32 = 0x4700;
const LAST_REQUEST_CODE: i32 = 0xFFFF;

static NEXT_OFFSET: AtomicU32 = AtomicU32::new(0);
static PENDING: OnceLock<Mutex<HashMap<i32, Sender<Answer>>>> = OnceLock::new();

fn pending() -> &'static Mutex<HashMap<i32, Sender<Answer>>> {
    PENDING.get_or_init(|| Mutex::new(HashMap::new()))
}

#[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
fn next_request_code() -> i32 {
    let span = (LAST_REQUEST_CODE - FIRST_REQUEST_CODE) as u32;
    let offset = NEXT_OFFSET.fetch_add(1, Ordering::Relaxed) % span;
    FIRST_REQUEST_CODE + offset as i32
}

/// Reserve a request code and the receiver its answer will arrive on.
#[cfg_attr(not(target_os = "android"), allow(dead_code))]
pub(crate) fn register() -> (i32, Receiver<Answer>) {
    let (sender, receiver) = bounded(1);
    let code = next_request_code();
    pending()
        .lock()
        .expect("pending permission mutex poisoned")
        .insert(code, sender);
    (code, receiver)
}

/// Drop a request that will never be answered.
#[cfg_attr(not(target_os = "android"), allow(dead_code))]
pub(crate) fn forget(request_code: i32) {
    pending()
        .lock()
        .expect("pending permission mutex poisoned")
        .remove(&request_code);
}

/// Deliver the platform's answer to a permission request.
///
/// Returns `false` when no request with `request_code` is outstanding, which
/// is the case for requests issued by other components of the host.
pub fn on_request_permissions_result(
    request_code: i32,
    names: &[String],
    grant_results: &[i32],
) -> bool {
    let sender = pending()
        .lock()
        .expect("pending permission mutex poisoned")
        .remove(&request_code);

    let Some(sender) = sender else {
        debug!("ignoring permission result for foreign request code {request_code}");
        return false;
    };

    let answer = grant_results_to_statuses(names, grant_results);
    if let Err(err) = sender.try_send(answer) {
        warn!("permission request {request_code} was abandoned: {err}");
    }
    true
}
