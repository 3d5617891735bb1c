//! Android permission implementation using JNI.
//!
//! Status checks call `Context.checkSelfPermission` on the host Activity.
//! Requests call `Activity.requestPermissions`; the Activity must forward its
//! `onRequestPermissionsResult` callback to
//! `com.geobridge.permission.PermissionBridge.onRequestPermissionsResult`,
//! which lands in [`crate::on_request_permissions_result`].

use std::sync::OnceLock;

use jni::objects::{GlobalRef, JClass, JIntArray, JObject, JObjectArray, JString, JValue};
use jni::sys::{jboolean, jint};
use jni::{JNIEnv, JavaVM};
use log::{error, warn};

use crate::{Permission, PermissionError, PermissionStatus, pending};

/// First API level with runtime permissions (Android 6.0).
const RUNTIME_PERMISSIONS_API: jint = 23;

/// Global reference to the Java VM.
static JAVA_VM: OnceLock<JavaVM> = OnceLock::new();
/// Global reference to the host Activity.
static ACTIVITY: OnceLock<GlobalRef> = OnceLock::new();

/// Initialize the permission backend with the host Activity.
///
/// Must be called once before [`crate::check`] or [`crate::request`] can
/// reach the platform. Later calls are no-ops.
///
/// # Errors
/// Returns [`PermissionError::Platform`] if the VM or a global reference
/// cannot be obtained.
pub fn init(env: &mut JNIEnv, activity: &JObject) -> Result<(), PermissionError> {
    if ACTIVITY.get().is_some() {
        return Ok(());
    }

    if JAVA_VM.get().is_none() {
        let vm = env.get_java_vm().map_err(map_jni_error)?;
        let _ = JAVA_VM.set(vm);
    }

    let activity_ref = env.new_global_ref(activity).map_err(map_jni_error)?;
    let _ = ACTIVITY.set(activity_ref);
    Ok(())
}

fn with_activity<T, F>(action: F) -> Result<T, PermissionError>
where
    F: FnOnce(&mut JNIEnv<'_>, &JObject<'_>) -> jni::errors::Result<T>,
{
    let vm = JAVA_VM.get().ok_or(PermissionError::NotInitialized)?;
    let activity = ACTIVITY.get().ok_or(PermissionError::NotInitialized)?;
    let mut env = vm.attach_current_thread().map_err(map_jni_error)?;
    action(&mut env, activity.as_obj()).map_err(map_jni_error)
}

fn sdk_int(env: &mut JNIEnv<'_>) -> jni::errors::Result<jint> {
    env.get_static_field("android/os/Build$VERSION", "SDK_INT", "I")?
        .i()
}

fn check_self_permission(
    env: &mut JNIEnv<'_>,
    activity: &JObject<'_>,
    permission: Permission,
) -> jni::errors::Result<PermissionStatus> {
    // Install-time grants before runtime permissions existed.
    if sdk_int(env)? < RUNTIME_PERMISSIONS_API {
        return Ok(PermissionStatus::Granted);
    }

    let name = env.new_string(permission.android_name())?;
    let result = env
        .call_method(
            activity,
            "checkSelfPermission",
            "(Ljava/lang/String;)I",
            &[JValue::Object(&name)],
        )?
        .i()?;

    Ok(PermissionStatus::from_grant_result(result))
}

fn request_permissions(
    env: &mut JNIEnv<'_>,
    activity: &JObject<'_>,
    permissions: &[Permission],
    request_code: i32,
) -> jni::errors::Result<()> {
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    let names = env.new_object_array(
        permissions.len() as jint,
        "java/lang/String",
        JObject::null(),
    )?;

    for (index, permission) in permissions.iter().enumerate() {
        let name = env.new_string(permission.android_name())?;
        #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
        env.set_object_array_element(&names, index as jint, name)?;
    }

    env.call_method(
        activity,
        "requestPermissions",
        "([Ljava/lang/String;I)V",
        &[JValue::Object(&names), JValue::Int(request_code)],
    )?;
    Ok(())
}

pub(crate) fn status(permission: Permission) -> PermissionStatus {
    match with_activity(|env, activity| check_self_permission(env, activity, permission)) {
        Ok(status) => status,
        Err(err) => {
            warn!("failed to check {permission}: {err}");
            PermissionStatus::NotDetermined
        }
    }
}

pub(crate) async fn request(
    permissions: &[Permission],
) -> Result<Vec<(Permission, PermissionStatus)>, PermissionError> {
    let missing: Vec<Permission> = permissions
        .iter()
        .copied()
        .filter(|permission| !status(*permission).is_granted())
        .collect();

    if missing.is_empty() {
        return Ok(permissions
            .iter()
            .map(|permission| (*permission, PermissionStatus::Granted))
            .collect());
    }

    let (request_code, receiver) = pending::register();
    if let Err(err) =
        with_activity(|env, activity| request_permissions(env, activity, &missing, request_code))
    {
        pending::forget(request_code);
        return Err(err);
    }

    let answer = receiver
        .recv()
        .await
        .map_err(|_| PermissionError::Cancelled)?;

    Ok(permissions
        .iter()
        .map(|permission| {
            let status = answer
                .iter()
                .find(|(answered, _)| answered == permission)
                .map_or(PermissionStatus::Granted, |(_, status)| *status);
            (*permission, status)
        })
        .collect())
}

#[allow(non_snake_case)]
#[unsafe(no_mangle)]
pub extern "system" fn Java_com_geobridge_permission_PermissionBridge_onRequestPermissionsResult(
    mut env: JNIEnv<'_>,
    _class: JClass<'_>,
    request_code: jint,
    permissions: JObjectArray<'_>,
    grant_results: JIntArray<'_>,
) -> jboolean {
    match read_result(&mut env, &permissions, &grant_results) {
        Ok((names, grants)) => {
            jboolean::from(crate::on_request_permissions_result(request_code, &names, &grants))
        }
        Err(err) => {
            error!("failed to read Android permission result: {err}");
            jboolean::from(false)
        }
    }
}

fn read_result(
    env: &mut JNIEnv<'_>,
    permissions: &JObjectArray<'_>,
    grant_results: &JIntArray<'_>,
) -> jni::errors::Result<(Vec<String>, Vec<i32>)> {
    let count = env.get_array_length(permissions)?;
    let mut names = Vec::new();
    for index in 0..count {
        let element = env.get_object_array_element(permissions, index)?;
        let name = JString::from(element);
        let value = env.get_string(&name)?;
        names.push(value.to_string_lossy().into_owned());
    }

    #[allow(clippy::cast_sign_loss)]
    let mut grants = vec![0; env.get_array_length(grant_results)? as usize];
    env.get_int_array_region(grant_results, 0, &mut grants)?;
    Ok((names, grants))
}

#[allow(clippy::needless_pass_by_value)]
fn map_jni_error(err: jni::errors::Error) -> PermissionError {
    PermissionError::Platform(err.to_string())
}
