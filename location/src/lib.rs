//! Fused location access for a geolocation bridge.
//!
//! The platform's fused location service is reached through the
//! [`LocationProvider`] trait. A [`LocationListener`] owns the single
//! subscription to that provider and fans every fix out to pending one-shot
//! requests and active watches, keeping the subscription alive only while a
//! consumer is outstanding.

#![warn(missing_docs)]

/// Android fused location provider bound over JNI.
#[cfg(target_os = "android")]
pub mod android;
mod listener;
mod provider;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
mod timeout;

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

pub use geobridge_permission::{Permission, PermissionChecker, PermissionStatus};
pub use listener::{LocationListener, PositionCallback};
pub use provider::{LocationProvider, ProviderDelegate, ProviderEvent};

/// Coordinates of a position fix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coordinates {
    /// Latitude in degrees (-90 to 90).
    pub latitude: f64,
    /// Longitude in degrees (-180 to 180).
    pub longitude: f64,
    /// Altitude in meters above the WGS84 ellipsoid, if available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
    /// Horizontal accuracy in meters, if available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    /// Vertical accuracy in meters, if available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude_accuracy: Option<f64>,
    /// Bearing in degrees clockwise from true north, if available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    /// Ground speed in meters per second, if available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
}

/// A position fix as delivered to the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Where the device was.
    pub coords: Coordinates,
    /// When the fix was taken, as Unix epoch milliseconds.
    pub timestamp: u64,
}

impl Position {
    /// A fix with only latitude and longitude set.
    #[must_use]
    pub const fn new(latitude: f64, longitude: f64, timestamp: u64) -> Self {
        Self {
            coords: Coordinates {
                latitude,
                longitude,
                altitude: None,
                accuracy: None,
                altitude_accuracy: None,
                heading: None,
                speed: None,
            },
            timestamp,
        }
    }

    /// Age of this fix in milliseconds at `now`. Fixes from the future are age zero.
    #[must_use]
    pub const fn age_at(&self, now: u64) -> u64 {
        now.saturating_sub(self.timestamp)
    }
}

/// Current wall-clock time as Unix epoch milliseconds.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Error codes visible to script code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum PositionErrorCode {
    /// The user did not grant location access.
    PermissionDenied = 1,
    /// No fix could be obtained.
    PositionUnavailable = 2,
    /// No fix arrived within the requested time budget.
    Timeout = 3,
}

impl From<PositionErrorCode> for u8 {
    fn from(code: PositionErrorCode) -> Self {
        code as Self
    }
}

impl TryFrom<u8> for PositionErrorCode {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::PermissionDenied),
            2 => Ok(Self::PositionUnavailable),
            3 => Ok(Self::Timeout),
            other => Err(format!("unknown position error code {other}")),
        }
    }
}

/// Failure payload delivered to the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionError {
    /// What went wrong.
    pub code: PositionErrorCode,
    /// Human readable detail.
    pub message: String,
}

impl PositionError {
    /// Create a new error payload.
    pub fn new(code: PositionErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Errors that can occur when accessing location.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LocationError {
    /// Location permission was not granted.
    #[error("location permission denied")]
    PermissionDenied,
    /// Location request timed out.
    #[error("location request timed out")]
    Timeout,
    /// No location is available.
    #[error("location not available")]
    NotAvailable,
    /// The provider lost or never obtained its connection to the platform service.
    #[error("location provider disconnected")]
    ProviderDisconnected,
    /// The platform reported an error.
    #[error("platform error: {message}")]
    Platform {
        /// Platform supplied detail.
        message: String,
    },
    /// A payload crossing the platform boundary could not be (de)serialized.
    #[error("serialization error: {message}")]
    Serialization {
        /// Serializer supplied detail.
        message: String,
    },
}

impl LocationError {
    /// The script-visible code for this error.
    #[must_use]
    pub const fn code(&self) -> PositionErrorCode {
        match self {
            Self::PermissionDenied => PositionErrorCode::PermissionDenied,
            Self::Timeout => PositionErrorCode::Timeout,
            Self::NotAvailable
            | Self::ProviderDisconnected
            | Self::Platform { .. }
            | Self::Serialization { .. } => PositionErrorCode::PositionUnavailable,
        }
    }
}

impl From<&LocationError> for PositionError {
    fn from(error: &LocationError) -> Self {
        Self::new(error.code(), error.to_string())
    }
}

/// Convenience alias for location results.
pub type LocationResult<T> = Result<T, LocationError>;

/// Power/accuracy trade-off requested from the fused provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Most accurate fixes available, typically GNSS.
    #[default]
    HighAccuracy,
    /// Block-level accuracy, typically Wi-Fi and cell.
    BalancedPowerAccuracy,
    /// City-level accuracy.
    LowPower,
    /// Only fixes computed for other clients.
    NoPower,
}

/// Parameters of the provider subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateRequest {
    /// Desired interval between fixes in milliseconds.
    pub interval_ms: u64,
    /// Fastest interval the listener can absorb, in milliseconds.
    pub fastest_interval_ms: u64,
    /// Accuracy/power trade-off.
    pub priority: Priority,
}

impl Default for UpdateRequest {
    fn default() -> Self {
        Self {
            interval_ms: 10_000,
            fastest_interval_ms: 16,
            priority: Priority::HighAccuracy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn position_serializes_with_nested_camel_case_coords() {
        let mut position = Position::new(48.85, 2.35, 1_700_000_000_000);
        position.coords.altitude_accuracy = Some(3.5);

        let value = serde_json::to_value(&position).expect("serialize position");

        assert_eq!(
            value,
            json!({
                "coords": {
                    "latitude": 48.85,
                    "longitude": 2.35,
                    "altitudeAccuracy": 3.5
                },
                "timestamp": 1_700_000_000_000_u64
            })
        );
    }

    #[test]
    fn error_codes_match_the_script_constants() {
        let value = serde_json::to_value(PositionError::from(&LocationError::Timeout))
            .expect("serialize error");
        assert_eq!(value["code"], json!(3));

        assert_eq!(
            LocationError::PermissionDenied.code(),
            PositionErrorCode::PermissionDenied
        );
        assert_eq!(
            LocationError::ProviderDisconnected.code(),
            PositionErrorCode::PositionUnavailable
        );
        assert!(PositionErrorCode::try_from(4).is_err());
    }

    #[test]
    fn update_request_fills_missing_fields_from_defaults() {
        let request: UpdateRequest =
            serde_json::from_value(json!({ "priority": "low_power" })).expect("parse request");

        assert_eq!(request.priority, Priority::LowPower);
        assert_eq!(request.interval_ms, 10_000);
        assert_eq!(request.fastest_interval_ms, 16);
    }

    #[test]
    fn age_saturates_for_future_fixes() {
        let position = Position::new(0.0, 0.0, 2_000);
        assert_eq!(position.age_at(2_500), 500);
        assert_eq!(position.age_at(1_000), 0);
    }
}
