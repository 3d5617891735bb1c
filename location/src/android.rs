//! The host app supplies a Java bridge object wrapping the fused location
//! client. It must implement:
//!
//! - `registerNativeHandle(long)`
//! - `connect()` and `isConnected(): boolean`
//! - `requestLocationUpdates(String requestJson)`
//! - `removeLocationUpdates()`
//! - `getLastLocation(): String` (position JSON, or `null`)
//!
//! and report back through `com.geobridge.location.LocationBridge`'s native
//! `dispatchEvent(long, String)` and `dispatchError(long, String)`.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use jni::objects::{GlobalRef, JClass, JObject, JString, JValue};
use jni::sys::jlong;
use jni::{JNIEnv, JavaVM};
use log::{debug, error};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::{
    LocationError, LocationProvider, LocationResult, Position, ProviderDelegate, ProviderEvent,
    UpdateRequest,
};

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);
static DELEGATES: OnceLock<Mutex<HashMap<u64, Arc<dyn ProviderDelegate>>>> = OnceLock::new();

fn delegates() -> &'static Mutex<HashMap<u64, Arc<dyn ProviderDelegate>>> {
    DELEGATES.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Fused location provider backed by a Java bridge object via JNI.
pub struct AndroidFusedProvider {
    vm: JavaVM,
    bridge: GlobalRef,
    handle: u64,
}

impl fmt::Debug for AndroidFusedProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AndroidFusedProvider")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

impl AndroidFusedProvider {
    /// Wrap the host's fused location bridge object.
    ///
    /// # Errors
    ///
    /// Returns [`LocationError::Platform`] if the VM or a global reference
    /// cannot be obtained.
    pub fn new(env: &JNIEnv<'_>, bridge: &JObject<'_>) -> LocationResult<Self> {
        let vm = env.get_java_vm().map_err(map_jni_error)?;
        let bridge = env.new_global_ref(bridge).map_err(map_jni_error)?;
        let handle = NEXT_HANDLE.fetch_add(1, Ordering::Relaxed);

        Ok(Self { vm, bridge, handle })
    }

    /// Native handle the Java side passes back with every event.
    #[must_use]
    pub const fn handle(&self) -> u64 {
        self.handle
    }

    fn with_bridge<T, F>(&self, action: F) -> LocationResult<T>
    where
        F: FnOnce(&mut JNIEnv<'_>, &JObject<'_>) -> jni::errors::Result<T>,
    {
        let mut env = self.vm.attach_current_thread().map_err(map_jni_error)?;
        let bridge = self.bridge.as_obj();
        action(&mut env, bridge).map_err(map_jni_error)
    }

    fn register_handle(&self) -> LocationResult<()> {
        self.with_bridge(|env, bridge| {
            #[allow(clippy::cast_possible_wrap)]
            let args = [JValue::Long(self.handle as jlong)];
            env.call_method(bridge, "registerNativeHandle", "(J)V", &args)?;
            Ok(())
        })
    }
}

impl LocationProvider for AndroidFusedProvider {
    fn set_delegate(&self, delegate: Arc<dyn ProviderDelegate>) {
        delegates()
            .lock()
            .expect("delegate map mutex poisoned")
            .insert(self.handle, delegate);

        if let Err(err) = self.register_handle() {
            error!("failed to register Android location handle: {err}");
        }
    }

    fn is_connected(&self) -> bool {
        self.with_bridge(|env, bridge| env.call_method(bridge, "isConnected", "()Z", &[])?.z())
            .unwrap_or_else(|err| {
                error!("failed to query Android location connection: {err}");
                false
            })
    }

    fn connect(&self) -> LocationResult<()> {
        self.with_bridge(|env, bridge| {
            env.call_method(bridge, "connect", "()V", &[])?;
            Ok(())
        })
    }

    fn request_updates(&self, request: &UpdateRequest) -> LocationResult<()> {
        let json = to_json(request)?;
        self.with_bridge(|env, bridge| {
            let j_string = env.new_string(json.as_str())?;
            let j_object = JObject::from(j_string);
            let args = [JValue::Object(&j_object)];
            env.call_method(
                bridge,
                "requestLocationUpdates",
                "(Ljava/lang/String;)V",
                &args,
            )?;
            Ok(())
        })
    }

    fn remove_updates(&self) {
        if let Err(err) = self.with_bridge(|env, bridge| {
            env.call_method(bridge, "removeLocationUpdates", "()V", &[])?;
            Ok(())
        }) {
            error!("failed to remove Android location updates: {err}");
        }
    }

    fn last_location(&self) -> Option<Position> {
        let json = self.with_bridge(|env, bridge| {
            let value = env
                .call_method(bridge, "getLastLocation", "()Ljava/lang/String;", &[])?
                .l()?;
            if value.is_null() {
                return Ok(None);
            }
            let j_string = JString::from(value);
            let text = env.get_string(&j_string)?;
            Ok(Some(text.to_string_lossy().into_owned()))
        });

        match json {
            Ok(Some(json)) => from_json(&json)
                .map_err(|err| error!("failed to parse Android last location: {err}"))
                .ok(),
            Ok(None) => None,
            Err(err) => {
                error!("failed to read Android last location: {err}");
                None
            }
        }
    }
}

impl Drop for AndroidFusedProvider {
    fn drop(&mut self) {
        if let Some(map) = DELEGATES.get() {
            let mut guard = map.lock().expect("delegate map mutex poisoned");
            guard.remove(&self.handle);
        }
    }
}

#[allow(non_snake_case)]
#[unsafe(no_mangle)]
pub extern "system" fn Java_com_geobridge_location_LocationBridge_dispatchEvent(
    mut env: JNIEnv<'_>,
    _class: JClass<'_>,
    handle: jlong,
    json_event: JString<'_>,
) {
    #[allow(clippy::cast_sign_loss)]
    let handle = handle as u64;
    let json = match env.get_string(&json_event) {
        Ok(value) => value.to_string_lossy().into_owned(),
        Err(err) => {
            error!("failed to read Android location payload: {err}");
            return;
        }
    };

    match from_json::<ProviderEvent>(&json) {
        Ok(event) => emit_event(handle, event),
        Err(err) => error!("dropping malformed Android location event: {err}"),
    }
}

#[allow(non_snake_case)]
#[unsafe(no_mangle)]
pub extern "system" fn Java_com_geobridge_location_LocationBridge_dispatchError(
    mut env: JNIEnv<'_>,
    _class: JClass<'_>,
    handle: jlong,
    message: JString<'_>,
) {
    #[allow(clippy::cast_sign_loss)]
    let handle = handle as u64;
    let message = match env.get_string(&message) {
        Ok(value) => value.to_string_lossy().into_owned(),
        Err(err) => {
            error!("failed to read Android error payload: {err}");
            return;
        }
    };

    emit_event(handle, ProviderEvent::ConnectionFailed { message });
}

fn emit_event(handle: u64, event: ProviderEvent) {
    let delegate = {
        let map = delegates().lock().expect("delegate map mutex poisoned");
        map.get(&handle).cloned()
    };

    if let Some(delegate) = delegate {
        debug!("Android location event for handle {handle}: {event:?}");
        delegate.on_event(event);
    } else {
        error!("received Android location event for unknown handle {handle}");
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> LocationResult<String> {
    serde_json::to_string(value).map_err(|err| LocationError::Serialization {
        message: err.to_string(),
    })
}

fn from_json<T: DeserializeOwned>(value: &str) -> LocationResult<T> {
    serde_json::from_str(value).map_err(|err| LocationError::Serialization {
        message: err.to_string(),
    })
}

#[allow(clippy::needless_pass_by_value)]
fn map_jni_error(err: jni::errors::Error) -> LocationError {
    LocationError::Platform {
        message: err.to_string(),
    }
}
