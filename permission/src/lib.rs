//! Location permission handling.
//!
//! This crate models the two location permissions a geolocation plugin needs,
//! checks their status against the platform, and requests them when missing.
//! The permission dialog itself belongs to the host; on Android the host
//! forwards the Activity's result callback to
//! [`on_request_permissions_result`].

#![warn(missing_docs)]

mod pending;
/// Platform-specific implementations.
pub mod sys;

use std::fmt;

pub use pending::on_request_permissions_result;

/// Grant result reported by the platform for a granted permission.
pub const GRANT_RESULT_GRANTED: i32 = 0;
/// Grant result reported by the platform for a denied permission.
pub const GRANT_RESULT_DENIED: i32 = -1;

/// Location permissions that can be requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    /// Approximate location (network, cell towers).
    CoarseLocation,
    /// Precise location (GNSS).
    FineLocation,
}

/// The permissions a geolocation plugin requests together.
pub const LOCATION_PERMISSIONS: [Permission; 2] =
    [Permission::CoarseLocation, Permission::FineLocation];

impl Permission {
    /// Android manifest name of this permission.
    #[must_use]
    pub const fn android_name(self) -> &'static str {
        match self {
            Self::CoarseLocation => "android.permission.ACCESS_COARSE_LOCATION",
            Self::FineLocation => "android.permission.ACCESS_FINE_LOCATION",
        }
    }

    /// Parse an Android manifest permission name.
    #[must_use]
    pub fn from_android_name(name: &str) -> Option<Self> {
        LOCATION_PERMISSIONS
            .into_iter()
            .find(|permission| permission.android_name() == name)
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.android_name())
    }
}

/// The current status of a permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PermissionStatus {
    /// Permission has been granted by the user.
    Granted,
    /// Permission has been denied by the user.
    Denied,
    /// Permission has not been requested yet.
    NotDetermined,
}

impl PermissionStatus {
    /// Map a platform grant result to a status.
    #[must_use]
    pub const fn from_grant_result(result: i32) -> Self {
        match result {
            GRANT_RESULT_GRANTED => Self::Granted,
            _ => Self::Denied,
        }
    }

    /// Whether the permission is usable.
    #[must_use]
    pub const fn is_granted(self) -> bool {
        matches!(self, Self::Granted)
    }
}

/// Errors that can occur when requesting permissions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PermissionError {
    /// Runtime permission requests are not supported on this platform.
    #[error("permission requests not supported on this platform")]
    NotSupported,
    /// The platform backend has not been initialized with a host context.
    #[error("permission backend not initialized")]
    NotInitialized,
    /// The request was dropped before the platform answered.
    #[error("permission request cancelled")]
    Cancelled,
    /// The platform reported an error.
    #[error("platform error: {0}")]
    Platform(String),
}

/// Synchronous source of permission status.
///
/// The location listener consults this before subscribing to updates, so it
/// must answer without prompting.
pub trait PermissionChecker: Send + Sync + fmt::Debug {
    /// Current status of `permission`.
    fn status(&self, permission: Permission) -> PermissionStatus;
}

/// [`PermissionChecker`] backed by the platform.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemPermissions;

impl PermissionChecker for SystemPermissions {
    fn status(&self, permission: Permission) -> PermissionStatus {
        sys::status(permission)
    }
}

/// Whether at least one of `permissions` is granted.
pub fn is_any_granted(checker: &dyn PermissionChecker, permissions: &[Permission]) -> bool {
    permissions
        .iter()
        .any(|permission| checker.status(*permission).is_granted())
}

/// Whether every one of `permissions` is granted.
pub fn are_all_granted(checker: &dyn PermissionChecker, permissions: &[Permission]) -> bool {
    permissions
        .iter()
        .all(|permission| checker.status(*permission).is_granted())
}

/// Pair each reported permission name with its grant result.
///
/// Names that are not location permissions are skipped; missing grant results
/// count as denied.
#[must_use]
pub fn grant_results_to_statuses(
    names: &[String],
    grant_results: &[i32],
) -> Vec<(Permission, PermissionStatus)> {
    names
        .iter()
        .enumerate()
        .filter_map(|(index, name)| {
            let permission = Permission::from_android_name(name)?;
            let result = grant_results
                .get(index)
                .copied()
                .unwrap_or(GRANT_RESULT_DENIED);
            Some((permission, PermissionStatus::from_grant_result(result)))
        })
        .collect()
}

/// Check the current status of a permission without requesting it.
pub async fn check(permission: Permission) -> PermissionStatus {
    sys::status(permission)
}

/// Request permissions from the user.
///
/// Permissions that are already granted are reported without a prompt.
///
/// # Errors
/// Returns a `PermissionError` if:
/// - Runtime requests are not supported on this platform.
/// - The backend was not initialized with a host context.
/// - The request is dropped before the platform answers.
pub async fn request(
    permissions: &[Permission],
) -> Result<Vec<(Permission, PermissionStatus)>, PermissionError> {
    sys::request(permissions).await
}
