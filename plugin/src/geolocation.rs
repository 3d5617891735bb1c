use std::fmt;
use std::sync::{Arc, Mutex};

use geobridge_location::{
    LocationError, LocationListener, LocationProvider, Position, PositionCallback, PositionError,
    now_millis,
};
use geobridge_permission::{
    GRANT_RESULT_DENIED, LOCATION_PERMISSIONS, Permission, PermissionChecker, are_all_granted,
    grant_results_to_statuses,
};
use log::debug;
use serde_json::Value;

use crate::args::{self, Action, LocationOptions};
use crate::bridge::{CallbackContext, PluginHost, PluginResult, PluginStatus};
use crate::{GeolocationConfig, PluginError};

/// Delivers listener output to a script callback.
#[derive(Debug)]
struct BridgeCallback {
    context: Arc<dyn CallbackContext>,
}

impl PositionCallback for BridgeCallback {
    fn on_position(&self, position: &Position, keep_callback: bool) {
        self.context.send_plugin_result(
            PluginResult::json(PluginStatus::Ok, position).keep_callback(keep_callback),
        );
    }

    fn on_error(&self, error: &PositionError, keep_callback: bool) {
        self.context.send_plugin_result(
            PluginResult::json(PluginStatus::Error, error).keep_callback(keep_callback),
        );
    }
}

/// The geolocation plugin.
pub struct Geolocation {
    config: GeolocationConfig,
    host: Arc<dyn PluginHost>,
    permissions: Arc<dyn PermissionChecker>,
    listener: LocationListener,
    permission_callbacks: Mutex<Vec<Arc<dyn CallbackContext>>>,
}

impl fmt::Debug for Geolocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Geolocation")
            .field("config", &self.config)
            .field("listener", &self.listener)
            .finish_non_exhaustive()
    }
}

impl Geolocation {
    /// Create the plugin over the host's location provider and permission state.
    pub fn new(
        config: GeolocationConfig,
        host: Arc<dyn PluginHost>,
        provider: Arc<dyn LocationProvider>,
        permissions: Arc<dyn PermissionChecker>,
    ) -> Self {
        let listener = LocationListener::new(
            provider,
            permissions.clone(),
            config.update_request.clone(),
        );

        Self {
            config,
            host,
            permissions,
            listener,
            permission_callbacks: Mutex::new(Vec::new()),
        }
    }

    /// The listener shared by every request of this plugin.
    #[must_use]
    pub const fn listener(&self) -> &LocationListener {
        &self.listener
    }

    /// Permissions this plugin asks the host for.
    #[must_use]
    pub const fn permission_request(&self) -> &'static [Permission] {
        &LOCATION_PERMISSIONS
    }

    /// Whether every location permission is granted.
    #[must_use]
    pub fn has_permission(&self) -> bool {
        are_all_granted(self.permissions.as_ref(), &LOCATION_PERMISSIONS)
    }

    /// Dispatch a bridge call.
    ///
    /// Returns `Ok(false)` for actions this plugin does not know, which the
    /// bridge reports as [`PluginStatus::InvalidAction`].
    ///
    /// # Errors
    ///
    /// Returns a [`PluginError`] if the arguments cannot be read; nothing has
    /// been sent on `callback` in that case.
    pub fn execute(
        &self,
        action: &str,
        args: &Value,
        callback: Arc<dyn CallbackContext>,
    ) -> Result<bool, PluginError> {
        let Some(parsed) = Action::parse(action) else {
            debug!("unknown geolocation action {action}");
            return Ok(false);
        };

        debug!("{action} for callback {}", callback.callback_id());
        match parsed {
            Action::GetPermission => self.get_permission(callback),
            Action::GetLocation => self.get_location(LocationOptions::parse(args)?, callback),
            Action::AddWatch => {
                let id = args::watch_id(args, 0, parsed)?;
                let high_accuracy: Option<bool> = args::optional(args, 1, parsed)?;
                debug!("watch {id} high accuracy: {high_accuracy:?}");
                self.listener
                    .add_watch(id, Arc::new(BridgeCallback { context: callback }));
            }
            Action::ClearWatch => {
                let id = args::watch_id(args, 0, parsed)?;
                self.listener.clear_watch(&id);
                callback.success();
            }
            Action::GetLastKnownLocation => match self.listener.last_known_location() {
                Some(position) => {
                    callback.send_plugin_result(PluginResult::json(PluginStatus::Ok, &position));
                }
                None => {
                    let error = PositionError::from(&LocationError::NotAvailable);
                    callback.send_plugin_result(PluginResult::json(PluginStatus::Error, &error));
                }
            },
        }
        Ok(true)
    }

    fn get_permission(&self, callback: Arc<dyn CallbackContext>) {
        if self.has_permission() {
            callback.success();
            return;
        }

        self.permission_callbacks
            .lock()
            .expect("permission callback mutex poisoned")
            .push(callback);
        self.host
            .request_permissions(self.config.permission_request_code, &LOCATION_PERMISSIONS);
    }

    fn get_location(&self, options: LocationOptions, callback: Arc<dyn CallbackContext>) {
        if let Some(maximum_age) = options.maximum_age {
            if let Some(position) = self.listener.last_known_location() {
                if position.age_at(now_millis()) <= maximum_age {
                    debug!("answering from a cached fix within {maximum_age}ms");
                    callback.send_plugin_result(PluginResult::json(PluginStatus::Ok, &position));
                    return;
                }
            }
        }

        // Consumers share one subscription at the configured priority.
        if options.enable_high_accuracy {
            debug!("high accuracy requested, using {:?}", self.config.update_request.priority);
        }

        let timeout = options
            .timeout
            .unwrap_or_else(|| self.config.default_timeout());
        self.listener
            .add_callback(Arc::new(BridgeCallback { context: callback }), timeout);
    }

    /// Deliver the host's answer to a permission request.
    ///
    /// Every pending `getPermission` callback receives [`PluginStatus::Ok`]
    /// if nothing was denied, or [`PluginStatus::IllegalAccessException`]
    /// otherwise. An empty answer means the dialog was dismissed and counts
    /// as denied.
    pub fn on_request_permission_result(
        &self,
        request_code: i32,
        permissions: &[String],
        grant_results: &[i32],
    ) {
        if request_code != self.config.permission_request_code {
            debug!("ignoring permission result for request code {request_code}");
            return;
        }

        debug!(
            "location permission result: {:?}",
            grant_results_to_statuses(permissions, grant_results)
        );

        let denied =
            grant_results.is_empty() || grant_results.iter().any(|r| *r == GRANT_RESULT_DENIED);
        let status = if denied {
            debug!("location permission denied");
            PluginStatus::IllegalAccessException
        } else {
            PluginStatus::Ok
        };

        let callbacks = std::mem::take(
            &mut *self
                .permission_callbacks
                .lock()
                .expect("permission callback mutex poisoned"),
        );
        for callback in callbacks {
            callback.send_plugin_result(PluginResult::new(status));
        }
    }

    /// The web view navigated away; drop every consumer.
    pub fn on_reset(&self) {
        self.listener.destroy();
    }

    /// The host is shutting the plugin down.
    pub fn on_destroy(&self) {
        self.listener.destroy();
    }
}
