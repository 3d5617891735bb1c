//! Platform-specific permission implementations.

/// Android platform implementation.
#[cfg(target_os = "android")]
pub mod android;

#[cfg(target_os = "android")]
pub(crate) use android::{request, status};

// Off-device hosts have no runtime permission model; status stays undetermined
// so a checker must be injected for tests and simulators.
#[cfg(not(target_os = "android"))]
pub(crate) const fn status(_permission: crate::Permission) -> crate::PermissionStatus {
    crate::PermissionStatus::NotDetermined
}

#[cfg(not(target_os = "android"))]
pub(crate) async fn request(
    _permissions: &[crate::Permission],
) -> Result<Vec<(crate::Permission, crate::PermissionStatus)>, crate::PermissionError> {
    Err(crate::PermissionError::NotSupported)
}
