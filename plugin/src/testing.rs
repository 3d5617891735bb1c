//! Recording doubles for the host and the bridge.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

pub(crate) use geobridge_location::testing::MockProvider;
use geobridge_permission::{Permission, PermissionChecker, PermissionStatus};

use crate::bridge::{CallbackContext, PluginHost, PluginResult};

#[derive(Debug)]
pub(crate) struct StaticPermissions {
    granted: AtomicBool,
}

impl StaticPermissions {
    pub(crate) const fn granted() -> Self {
        Self {
            granted: AtomicBool::new(true),
        }
    }

    pub(crate) fn set(&self, granted: bool) {
        self.granted.store(granted, Ordering::SeqCst);
    }
}

impl PermissionChecker for StaticPermissions {
    fn status(&self, _permission: Permission) -> PermissionStatus {
        if self.granted.load(Ordering::SeqCst) {
            PermissionStatus::Granted
        } else {
            PermissionStatus::Denied
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct RecordingHost {
    requests: Mutex<Vec<(i32, Vec<Permission>)>>,
}

impl RecordingHost {
    pub(crate) fn requests(&self) -> Vec<(i32, Vec<Permission>)> {
        self.requests.lock().unwrap().clone()
    }
}

impl PluginHost for RecordingHost {
    fn request_permissions(&self, request_code: i32, permissions: &[Permission]) {
        self.requests
            .lock()
            .unwrap()
            .push((request_code, permissions.to_vec()));
    }
}

#[derive(Debug)]
pub(crate) struct RecordingContext {
    id: String,
    results: Mutex<Vec<PluginResult>>,
}

impl RecordingContext {
    pub(crate) fn new(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            results: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn results(&self) -> Vec<PluginResult> {
        self.results.lock().unwrap().clone()
    }
}

impl CallbackContext for RecordingContext {
    fn callback_id(&self) -> &str {
        &self.id
    }

    fn send_plugin_result(&self, result: PluginResult) {
        self.results.lock().unwrap().push(result);
    }
}
