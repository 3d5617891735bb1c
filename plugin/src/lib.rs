//! Geolocation plugin for a script bridge.
//!
//! Script code in a hosted web view calls [`Geolocation::execute`] through the
//! host's bridge with an action name and a JSON argument array. Results travel
//! back as [`PluginResult`]s on the caller's [`CallbackContext`].
//!
//! | action                 | arguments                                   |
//! |------------------------|---------------------------------------------|
//! | `getPermission`        | none                                        |
//! | `getLocation`          | `[enableHighAccuracy, maximumAge, timeout]` |
//! | `addWatch`             | `[id, enableHighAccuracy]`                  |
//! | `clearWatch`           | `[id]`                                      |
//! | `getLastKnownLocation` | none                                        |

#![warn(missing_docs)]

mod args;
mod bridge;
mod geolocation;
#[cfg(test)]
mod testing;

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use args::{Action, LocationOptions};
pub use bridge::{CallbackContext, PluginHost, PluginResult, PluginStatus};
pub use geolocation::Geolocation;
pub use geobridge_location::UpdateRequest;

/// Plugin configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeolocationConfig {
    /// Timeout for `getLocation` calls that do not pass a positive one, in milliseconds.
    pub default_timeout_ms: u64,
    /// Request code used when asking the host for location permissions.
    pub permission_request_code: i32,
    /// Parameters of the shared provider subscription.
    pub update_request: UpdateRequest,
}

impl Default for GeolocationConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 60_000,
            permission_request_code: 0,
            update_request: UpdateRequest::default(),
        }
    }
}

impl GeolocationConfig {
    /// [`default_timeout_ms`](Self::default_timeout_ms) as a duration.
    #[must_use]
    pub const fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

/// Errors rejecting a bridge call before it is dispatched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PluginError {
    /// A required argument is absent or null.
    #[error("{action}: missing argument {index}")]
    MissingArgument {
        /// Action being dispatched.
        action: &'static str,
        /// Position in the argument array.
        index: usize,
    },
    /// An argument has the wrong type.
    #[error("{action}: invalid argument {index}: {message}")]
    InvalidArgument {
        /// Action being dispatched.
        action: &'static str,
        /// Position in the argument array.
        index: usize,
        /// Deserializer supplied detail.
        message: String,
    },
}

impl PluginError {
    /// The status the bridge reports for this error.
    #[must_use]
    pub const fn status(&self) -> PluginStatus {
        PluginStatus::JsonException
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn config_parses_partial_documents() {
        let config: GeolocationConfig = serde_json::from_value(json!({
            "default_timeout_ms": 5000,
            "update_request": { "interval_ms": 1000 }
        }))
        .expect("parse config");

        assert_eq!(config.default_timeout(), Duration::from_secs(5));
        assert_eq!(config.permission_request_code, 0);
        assert_eq!(config.update_request.interval_ms, 1000);
        assert_eq!(config.update_request.fastest_interval_ms, 16);
    }
}
