//! # Geobridge
//!
//! Device geolocation for hosted web views.
//!
//! Geobridge exposes the platform's fused location service to script code
//! running in a web view. Script calls arrive through a bridge, are turned into
//! location-provider calls, and provider callbacks are turned back into bridge
//! results. Location sensing, the permission dialog, and the bridge transport
//! all stay with the host; this crate only sequences calls between them.
//!
//! ## Features
//!
//! - `permission`: Location permission model, status checks and requests.
//! - `location`: Position model, provider seam, and the listener that
//!   multiplexes one-shot requests and watches onto one provider subscription.
//! - `plugin`: The bridge plugin dispatching `getLocation`, `addWatch`,
//!   `clearWatch`, `getLastKnownLocation` and `getPermission` (default).
//!
//! Use the `full` feature to enable everything.
//!
//! ## Example
//!
//! ```toml
//! [dependencies]
//! geobridge = { version = "0.1", features = ["plugin"] }
//! ```
//!
//! ```ignore
//! use geobridge::plugin::{Geolocation, GeolocationConfig};
//!
//! let plugin = Geolocation::new(GeolocationConfig::default(), host, provider, permissions);
//! plugin.execute("getLocation", &serde_json::json!([true, 0, 5000]), callback)?;
//! ```

#[cfg(feature = "location")]
pub use geobridge_location as location;

#[cfg(feature = "permission")]
pub use geobridge_permission as permission;

#[cfg(feature = "plugin")]
pub use geobridge_plugin as plugin;
