//! C ABI entry points declared in `include/meshmind/core.h`.
//!
//! Every function here follows the same rules:
//!
//! 1. A null detector pointer is rejected with `MESHMIND_ERROR_INVALID_PARAM`
//!    (or the fixed sentinel string for `meshmind_get_error`).
//! 2. The body runs under `catch_unwind`, so a panic is reported as a failure
//!    of that call instead of unwinding into C.
//! 3. Every non-success status leaves its detail in the handle's last error.

mod types;

pub use types::{DetectorHandle, MeshMindDetection, FEATURE_ID_CAPACITY};

use std::any::Any;
use std::ffi::CStr;
use std::os::raw::{c_char, c_int};
use std::panic::{self, AssertUnwindSafe};
use std::ptr;

use crate::error::{Failure, FailureKind, MESHMIND_ERROR_INVALID_PARAM, MESHMIND_SUCCESS};
use crate::logging;
use crate::session::Session;

const VERSION_CSTR: &str = concat!(env!("CARGO_PKG_VERSION"), "\0");
const INVALID_HANDLE_CSTR: &str = "Invalid detector handle\0";

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

/// Run `call` against a live handle and turn its outcome into a status code.
fn with_detector<F>(detector: *mut DetectorHandle, op: FailureKind, call: F) -> c_int
where
    F: FnOnce(&mut Session) -> Result<c_int, Failure>,
{
    // SAFETY: callers pass either null or a pointer obtained from
    // `meshmind_create_detector` that has not been destroyed.
    let Some(handle) = (unsafe { detector.as_mut() }) else {
        return MESHMIND_ERROR_INVALID_PARAM;
    };
    match panic::catch_unwind(AssertUnwindSafe(|| call(&mut handle.session))) {
        Ok(Ok(status)) => status,
        Ok(Err(failure)) => {
            handle.session.set_last_error(failure.to_string());
            failure.status()
        }
        Err(payload) => {
            let message = format!("internal panic: {}", panic_message(payload.as_ref()));
            log::error!("{:?} call panicked: {}", op, message);
            handle.session.set_last_error(message);
            op.status()
        }
    }
}

/// Borrow a caller string as UTF-8.
///
/// # Safety
/// `raw` must be null or point to a NUL-terminated string that outlives the call.
unsafe fn cstr_arg<'a>(raw: *const c_char, what: &str) -> Result<&'a str, Failure> {
    if raw.is_null() {
        return Err(Failure::invalid_parameter(format!("{} is null", what)));
    }
    CStr::from_ptr(raw)
        .to_str()
        .map_err(|_| Failure::invalid_parameter(format!("{} is not valid UTF-8", what)))
}

/// Create a detector. Returns null when the engine cannot be initialized.
#[no_mangle]
pub extern "C" fn meshmind_create_detector() -> *mut DetectorHandle {
    logging::init();
    match panic::catch_unwind(Session::open) {
        Ok(Ok(session)) => {
            log::debug!("detector created on engine `{}`", session.engine_name());
            Box::into_raw(Box::new(DetectorHandle::new(session)))
        }
        Ok(Err(failure)) => {
            log::error!("detector creation failed: {}", failure);
            ptr::null_mut()
        }
        Err(payload) => {
            log::error!(
                "detector creation panicked: {}",
                panic_message(payload.as_ref())
            );
            ptr::null_mut()
        }
    }
}

/// Destroy a detector. Null is ignored.
///
/// # Safety
/// `detector` must be null or a pointer from [`meshmind_create_detector`]
/// that has not already been destroyed.
#[no_mangle]
pub unsafe extern "C" fn meshmind_destroy_detector(detector: *mut DetectorHandle) {
    if detector.is_null() {
        return;
    }
    let handle = Box::from_raw(detector);
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(move || drop(handle))) {
        log::error!(
            "detector teardown panicked: {}",
            panic_message(payload.as_ref())
        );
    }
}

/// # Safety
/// `detector` must be null or live; `stl_path` must be null or a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn meshmind_load_target(
    detector: *mut DetectorHandle,
    stl_path: *const c_char,
) -> c_int {
    with_detector(detector, FailureKind::Load, |session| {
        let path = cstr_arg(stl_path, "target path")?;
        session.load_target(path)?;
        Ok(MESHMIND_SUCCESS)
    })
}

/// # Safety
/// `detector` must be null or live; both strings must be null or NUL-terminated.
#[no_mangle]
pub unsafe extern "C" fn meshmind_add_template(
    detector: *mut DetectorHandle,
    template_path: *const c_char,
    feature_id: *const c_char,
) -> c_int {
    with_detector(detector, FailureKind::InvalidParameter, |session| {
        let path = cstr_arg(template_path, "template path")?;
        let id = cstr_arg(feature_id, "feature id")?;
        session.add_template(path, id)?;
        Ok(MESHMIND_SUCCESS)
    })
}

/// Run detection and copy up to `max_results` records into `results`.
///
/// Returns the number of records written, or a negative status.
///
/// # Safety
/// `detector` must be null or live. `results` must be valid for writes of
/// `max_results` records; it may be null only when `max_results` is 0.
#[no_mangle]
pub unsafe extern "C" fn meshmind_detect(
    detector: *mut DetectorHandle,
    results: *mut MeshMindDetection,
    max_results: c_int,
) -> c_int {
    with_detector(detector, FailureKind::Detect, |session| {
        let capacity = usize::try_from(max_results).map_err(|_| {
            Failure::invalid_parameter(format!("max_results must be >= 0, got {}", max_results))
        })?;
        if results.is_null() && capacity > 0 {
            return Err(Failure::invalid_parameter("results buffer is null"));
        }

        let detections = session.detect()?;
        let written = detections.len().min(capacity);
        if written < detections.len() {
            log::debug!(
                "returning {} of {} detections (buffer capacity)",
                written,
                detections.len()
            );
        }
        for (index, detection) in detections.iter().take(written).enumerate() {
            results
                .add(index)
                .write(MeshMindDetection::from(detection));
        }
        // `written` is bounded by `max_results`.
        Ok(written as c_int)
    })
}

/// # Safety
/// `detector` must be null or live; `output_path` must be null or NUL-terminated.
#[no_mangle]
pub unsafe extern "C" fn meshmind_export_snappy_dict(
    detector: *mut DetectorHandle,
    output_path: *const c_char,
) -> c_int {
    with_detector(detector, FailureKind::Export, |session| {
        let path = cstr_arg(output_path, "output path")?;
        session.export_refinement_dict(path)?;
        Ok(MESHMIND_SUCCESS)
    })
}

/// Any non-zero `enable_mrf` requests rotating reference frame zones.
///
/// # Safety
/// `detector` must be null or live; `case_dir` must be null or NUL-terminated.
#[no_mangle]
pub unsafe extern "C" fn meshmind_export_openfoam_case(
    detector: *mut DetectorHandle,
    case_dir: *const c_char,
    enable_mrf: c_int,
) -> c_int {
    with_detector(detector, FailureKind::Export, |session| {
        let dir = cstr_arg(case_dir, "case directory")?;
        session.export_case(dir, enable_mrf != 0)?;
        Ok(MESHMIND_SUCCESS)
    })
}

/// # Safety
/// `detector` must be null or live; `output_path` must be null or NUL-terminated.
#[no_mangle]
pub unsafe extern "C" fn meshmind_export_ftetwild_sizing(
    detector: *mut DetectorHandle,
    output_path: *const c_char,
) -> c_int {
    with_detector(detector, FailureKind::Export, |session| {
        let path = cstr_arg(output_path, "output path")?;
        session.export_sizing_field(path)?;
        Ok(MESHMIND_SUCCESS)
    })
}

/// Library version. The string is static.
#[no_mangle]
pub extern "C" fn meshmind_version() -> *const c_char {
    VERSION_CSTR.as_ptr().cast()
}

/// Last error of `detector`, empty after a successful call.
///
/// The string belongs to the detector and stays valid until the next call on it.
///
/// # Safety
/// `detector` must be null or live.
#[no_mangle]
pub unsafe extern "C" fn meshmind_get_error(detector: *mut DetectorHandle) -> *const c_char {
    match detector.as_mut() {
        Some(handle) => handle.error_ptr(),
        None => INVALID_HANDLE_CSTR.as_ptr().cast(),
    }
}
