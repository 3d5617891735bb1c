//! Types shared with the host's script bridge.

use std::fmt;

use geobridge_permission::Permission;
use log::error;
use serde::{Serialize, Serializer};
use serde_json::Value;

/// Result status understood by the script side, serialized as its ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PluginStatus {
    /// Nothing to report yet; usually sent with `keep_callback`.
    NoResult = 0,
    /// Success.
    Ok = 1,
    /// Class not found.
    ClassNotFoundException = 2,
    /// Access refused, used for denied permissions.
    IllegalAccessException = 3,
    /// Instantiation failed.
    InstantiationException = 4,
    /// Malformed URL.
    MalformedUrlException = 5,
    /// I/O failure.
    IoException = 6,
    /// Unknown action.
    InvalidAction = 7,
    /// Arguments could not be read.
    JsonException = 8,
    /// Generic failure.
    Error = 9,
}

impl Serialize for PluginStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

/// A result delivered to a script callback.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginResult {
    /// Outcome.
    pub status: PluginStatus,
    /// Payload.
    pub message: Value,
    /// Whether the script callback stays registered for further results.
    pub keep_callback: bool,
}

impl PluginResult {
    /// A result with no payload.
    #[must_use]
    pub const fn new(status: PluginStatus) -> Self {
        Self {
            status,
            message: Value::Null,
            keep_callback: false,
        }
    }

    /// A result carrying `message`.
    #[must_use]
    pub const fn with_message(status: PluginStatus, message: Value) -> Self {
        Self {
            status,
            message,
            keep_callback: false,
        }
    }

    /// A result carrying `payload` serialized to JSON.
    ///
    /// A payload that fails to serialize turns the result into an
    /// [`PluginStatus::Error`] carrying the serializer's message.
    pub fn json<T: Serialize + ?Sized>(status: PluginStatus, payload: &T) -> Self {
        match serde_json::to_value(payload) {
            Ok(message) => Self::with_message(status, message),
            Err(err) => {
                error!("failed to serialize plugin result: {err}");
                Self::with_message(PluginStatus::Error, Value::String(err.to_string()))
            }
        }
    }

    /// Sets [`keep_callback`](Self::keep_callback).
    #[must_use]
    pub const fn keep_callback(mut self, keep: bool) -> Self {
        self.keep_callback = keep;
        self
    }
}

/// A script callback waiting for results.
pub trait CallbackContext: Send + Sync + fmt::Debug {
    /// Bridge identifier of the callback.
    fn callback_id(&self) -> &str;

    /// Deliver a result to the script side.
    fn send_plugin_result(&self, result: PluginResult);

    /// Deliver an empty success.
    fn success(&self) {
        self.send_plugin_result(PluginResult::new(PluginStatus::Ok));
    }
}

/// Host services the plugin relies on.
pub trait PluginHost: Send + Sync + fmt::Debug {
    /// Show the platform permission dialog for `permissions`.
    ///
    /// The host answers later through
    /// [`Geolocation::on_request_permission_result`](crate::Geolocation::on_request_permission_result)
    /// with the same `request_code`.
    fn request_permissions(&self, request_code: i32, permissions: &[Permission]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn results_serialize_with_ordinal_status() {
        let result =
            PluginResult::with_message(PluginStatus::IllegalAccessException, json!("denied"))
                .keep_callback(true);

        assert_eq!(
            serde_json::to_value(&result).expect("serialize result"),
            json!({ "status": 3, "message": "denied", "keepCallback": true })
        );
    }

    #[test]
    fn json_payloads_default_to_single_delivery() {
        let result = PluginResult::json(PluginStatus::Ok, &json!({ "a": 1 }));
        assert_eq!(result.message, json!({ "a": 1 }));
        assert!(!result.keep_callback);
    }
}
