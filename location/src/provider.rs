use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{LocationResult, Position, UpdateRequest};

/// Events raised by a [`LocationProvider`].
///
/// Platform bridges deliver these as JSON tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderEvent {
    /// The provider is connected to the platform service.
    Connected,
    /// The connection was interrupted; the platform will reconnect on its own.
    ConnectionSuspended {
        /// Platform supplied cause code.
        cause: i32,
    },
    /// The provider could not connect to the platform service.
    ConnectionFailed {
        /// Platform supplied detail.
        message: String,
    },
    /// A new fix.
    Location {
        /// The fix.
        position: Position,
    },
}

/// Receives provider events.
pub trait ProviderDelegate: Send + Sync {
    /// Called for every provider event, possibly on a platform thread.
    fn on_event(&self, event: ProviderEvent);
}

/// The platform's fused location service.
///
/// Implementations may raise events synchronously from within any of these
/// calls; callers must not hold locks the delegate needs.
pub trait LocationProvider: Send + Sync + fmt::Debug {
    /// Registers the delegate that receives every subsequent event.
    fn set_delegate(&self, delegate: Arc<dyn ProviderDelegate>);

    /// Whether the connection to the platform service is established.
    fn is_connected(&self) -> bool;

    /// Starts connecting. Completion is signalled by [`ProviderEvent::Connected`]
    /// or [`ProviderEvent::ConnectionFailed`].
    ///
    /// # Errors
    ///
    /// Returns an error if the connection attempt cannot be started.
    fn connect(&self) -> LocationResult<()>;

    /// Subscribes to location updates with the given parameters.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform rejects the subscription.
    fn request_updates(&self, request: &UpdateRequest) -> LocationResult<()>;

    /// Cancels the location update subscription.
    fn remove_updates(&self);

    /// The platform's cached last fix, if any.
    fn last_location(&self) -> Option<Position>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn events_parse_from_tagged_json() {
        let event: ProviderEvent = serde_json::from_value(json!({
            "type": "location",
            "position": {
                "coords": { "latitude": 1.5, "longitude": -2.0, "accuracy": 12.0 },
                "timestamp": 42
            }
        }))
        .expect("parse location event");

        let mut expected = Position::new(1.5, -2.0, 42);
        expected.coords.accuracy = Some(12.0);
        assert_eq!(event, ProviderEvent::Location { position: expected });

        let suspended: ProviderEvent =
            serde_json::from_value(json!({ "type": "connection_suspended", "cause": 2 }))
                .expect("parse suspension");
        assert_eq!(suspended, ProviderEvent::ConnectionSuspended { cause: 2 });
    }
}
