//! Bridge actions and their argument arrays.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::PluginError;

/// Actions understood by [`Geolocation::execute`](crate::Geolocation::execute).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Ask for location permissions.
    GetPermission,
    /// One-shot position request.
    GetLocation,
    /// Register a watch.
    AddWatch,
    /// Remove a watch.
    ClearWatch,
    /// Most recent fix without subscribing.
    GetLastKnownLocation,
}

impl Action {
    /// Parse a bridge action name.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "getPermission" => Some(Self::GetPermission),
            "getLocation" => Some(Self::GetLocation),
            "addWatch" => Some(Self::AddWatch),
            "clearWatch" => Some(Self::ClearWatch),
            "getLastKnownLocation" => Some(Self::GetLastKnownLocation),
            _ => None,
        }
    }

    /// Bridge name of this action.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::GetPermission => "getPermission",
            Self::GetLocation => "getLocation",
            Self::AddWatch => "addWatch",
            Self::ClearWatch => "clearWatch",
            Self::GetLastKnownLocation => "getLastKnownLocation",
        }
    }
}

/// Options of a `getLocation` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LocationOptions {
    /// Whether the caller asked for GNSS-grade accuracy.
    pub enable_high_accuracy: bool,
    /// Oldest acceptable cached fix, in milliseconds. `None` never reuses a fix.
    pub maximum_age: Option<u64>,
    /// Time budget for a fresh fix. `None` uses the configured default.
    pub timeout: Option<Duration>,
}

impl LocationOptions {
    pub(crate) fn parse(args: &Value) -> Result<Self, PluginError> {
        let action = Action::GetLocation;
        Ok(Self {
            enable_high_accuracy: optional(args, 0, action)?.unwrap_or(false),
            maximum_age: optional::<f64>(args, 1, action)?.and_then(positive_millis),
            timeout: optional::<f64>(args, 2, action)?
                .and_then(positive_millis)
                .map(Duration::from_millis),
        })
    }
}

// Script numbers may be fractional, negative, or huge stand-ins for Infinity.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn positive_millis(value: f64) -> Option<u64> {
    if value.is_nan() || value < 1.0 {
        return None;
    }
    Some(value.min(u64::MAX as f64) as u64)
}

/// Argument `index`, or `None` when absent or null.
pub(crate) fn optional<T: DeserializeOwned>(
    args: &Value,
    index: usize,
    action: Action,
) -> Result<Option<T>, PluginError> {
    match args.get(index) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value.clone())
            .map(Some)
            .map_err(|err| PluginError::InvalidArgument {
                action: action.name(),
                index,
                message: err.to_string(),
            }),
    }
}

/// A watch identifier. Script code may pass strings or numbers.
pub(crate) fn watch_id(args: &Value, index: usize, action: Action) -> Result<String, PluginError> {
    match args.get(index) {
        None | Some(Value::Null) => Err(PluginError::MissingArgument {
            action: action.name(),
            index,
        }),
        Some(Value::String(id)) => Ok(id.clone()),
        Some(Value::Number(id)) => Ok(id.to_string()),
        Some(other) => Err(PluginError::InvalidArgument {
            action: action.name(),
            index,
            message: format!("expected a string or number, got {other}"),
        }),
    }
}
