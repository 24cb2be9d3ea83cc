//! FFI bindings for biomarker-flux
//!
//! This module provides C-compatible functions for calling biomarker-flux from
//! other languages. All functions use C strings (null-terminated) and return
//! allocated memory that must be freed by the caller using `bioflux_free_string`.
//!
//! Hosts that own their capture devices drive a session through the session
//! handle API and submit one sample JSON per task.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use crate::config::ScreeningConfig;
use crate::error::ScreeningError;
use crate::pipeline::{render_report_json, score_samples_json};
use crate::session::TaskSessionController;
use crate::types::CapturedSample;

// Thread-local storage for the last error message
thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

/// Convert Rust string to C string (caller must free)
fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// Return the string, or NULL with the error recorded
fn finish(result: Result<String, ScreeningError>) -> *mut c_char {
    match result {
        Ok(s) => string_to_cstr(&s),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// 0 on success, -1 with the error recorded
fn finish_status(result: Result<(), ScreeningError>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(e) => {
            set_last_error(&e.to_string());
            -1
        }
    }
}

unsafe fn parse_config(config_json: *const c_char) -> Result<ScreeningConfig, ScreeningError> {
    if config_json.is_null() {
        return Ok(ScreeningConfig::default());
    }
    let text = cstr_to_string(config_json)
        .ok_or_else(|| ScreeningError::ParseError("config is not valid UTF-8".to_string()))?;
    ScreeningConfig::from_json_str(&text)
}

// ============================================================================
// Stateless API
// ============================================================================

/// Score a JSON array of captured samples and return the result JSON.
///
/// # Safety
/// - `samples_json` must be a valid null-terminated C string.
/// - `config_json` must be a valid null-terminated C string or NULL for defaults.
/// - Returns a newly allocated string that must be freed with `bioflux_free_string`.
/// - Returns NULL on error; call `bioflux_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn bioflux_score_samples(
    samples_json: *const c_char,
    config_json: *const c_char,
) -> *mut c_char {
    clear_last_error();

    let samples = match cstr_to_string(samples_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid samples string pointer");
            return ptr::null_mut();
        }
    };

    let config = match parse_config(config_json) {
        Ok(config) => config,
        Err(e) => {
            set_last_error(&e.to_string());
            return ptr::null_mut();
        }
    };

    finish(score_samples_json(&samples, Some(&config)))
}

/// Render a scoring result JSON as a text report.
///
/// # Safety
/// - `result_json` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `bioflux_free_string`.
/// - Returns NULL on error; call `bioflux_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn bioflux_render_report(result_json: *const c_char) -> *mut c_char {
    clear_last_error();

    match cstr_to_string(result_json) {
        Some(json) => finish(render_report_json(&json)),
        None => {
            set_last_error("Invalid result string pointer");
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Session API
// ============================================================================

/// Opaque handle to a task session
pub struct BiofluxSessionHandle {
    controller: TaskSessionController,
}

/// Create a session from a config JSON (NULL for defaults).
///
/// # Safety
/// - `config_json` must be a valid null-terminated C string or NULL.
/// - Must be freed with `bioflux_session_free`.
/// - Returns NULL on error.
#[no_mangle]
pub unsafe extern "C" fn bioflux_session_new(
    config_json: *const c_char,
) -> *mut BiofluxSessionHandle {
    clear_last_error();

    let built = parse_config(config_json).and_then(|config| {
        let registry = config.registry()?;
        let baselines = config.baselines.resolve(&registry)?;
        Ok(TaskSessionController::new(
            registry,
            baselines,
            config.engine(),
        ))
    });

    match built {
        Ok(controller) => Box::into_raw(Box::new(BiofluxSessionHandle { controller })),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Free a session.
///
/// # Safety
/// - `session` must be a valid pointer returned by `bioflux_session_new`, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn bioflux_session_free(session: *mut BiofluxSessionHandle) {
    if !session.is_null() {
        drop(Box::from_raw(session));
    }
}

unsafe fn with_session<T>(
    session: *mut BiofluxSessionHandle,
    f: impl FnOnce(&mut TaskSessionController) -> Result<T, ScreeningError>,
) -> Result<T, ScreeningError> {
    match session.as_mut() {
        Some(handle) => f(&mut handle.controller),
        None => Err(ScreeningError::ParseError(
            "Invalid session pointer".to_string(),
        )),
    }
}

/// Start the session on its first task. Returns 0 on success, -1 on error.
///
/// # Safety
/// - `session` must be a valid pointer returned by `bioflux_session_new`.
#[no_mangle]
pub unsafe extern "C" fn bioflux_session_start(session: *mut BiofluxSessionHandle) -> i32 {
    clear_last_error();
    finish_status(with_session(session, |c| c.start()))
}

/// Submit the sample JSON of the current task. Returns 0 on success, -1 on error.
///
/// # Safety
/// - `session` must be a valid pointer returned by `bioflux_session_new`.
/// - `sample_json` must be a valid null-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn bioflux_session_submit(
    session: *mut BiofluxSessionHandle,
    sample_json: *const c_char,
) -> i32 {
    clear_last_error();

    let Some(json) = cstr_to_string(sample_json) else {
        set_last_error("Invalid sample string pointer");
        return -1;
    };

    finish_status(with_session(session, |c| {
        let sample: CapturedSample = serde_json::from_str(&json)
            .map_err(|e| ScreeningError::ParseError(format!("sample: {e}")))?;
        c.submit_capture(sample)
    }))
}

/// Move to the next task. Returns 0 on success, -1 on error.
///
/// # Safety
/// - `session` must be a valid pointer returned by `bioflux_session_new`.
#[no_mangle]
pub unsafe extern "C" fn bioflux_session_advance(session: *mut BiofluxSessionHandle) -> i32 {
    clear_last_error();
    finish_status(with_session(session, |c| c.advance()))
}

/// Abort the session. Returns 0 on success, -1 on error.
///
/// # Safety
/// - `session` must be a valid pointer returned by `bioflux_session_new`.
#[no_mangle]
pub unsafe extern "C" fn bioflux_session_abort(session: *mut BiofluxSessionHandle) -> i32 {
    clear_last_error();
    finish_status(with_session(session, |c| c.abort()))
}

/// Session state as JSON: status, current task and time left.
///
/// # Safety
/// - `session` must be a valid pointer returned by `bioflux_session_new`.
/// - Returns a newly allocated string that must be freed with `bioflux_free_string`.
#[no_mangle]
pub unsafe extern "C" fn bioflux_session_state(session: *mut BiofluxSessionHandle) -> *mut c_char {
    clear_last_error();
    finish(with_session(session, |c| {
        let state = serde_json::json!({
            "session_id": c.session_id(),
            "status": c.status(),
            "current_task_index": c.current_task_index(),
            "current_task": c.current_task(),
            "remaining_seconds": c.remaining().num_milliseconds() as f64 / 1000.0,
            "submitted": c.samples().len(),
        });
        Ok(state.to_string())
    }))
}

/// Scoring result JSON: the final score once completed, otherwise the score
/// of the samples submitted so far.
///
/// # Safety
/// - `session` must be a valid pointer returned by `bioflux_session_new`.
/// - Returns a newly allocated string that must be freed with `bioflux_free_string`.
#[no_mangle]
pub unsafe extern "C" fn bioflux_session_result(session: *mut BiofluxSessionHandle) -> *mut c_char {
    clear_last_error();
    finish(with_session(session, |c| {
        Ok(serde_json::to_string(&c.partial_result())?)
    }))
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by biomarker-flux functions.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by a biomarker-flux function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn bioflux_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

// ============================================================================
// Error Handling
// ============================================================================

/// Get the last error message.
///
/// # Safety
/// - Returns a pointer to a thread-local error string.
/// - The returned pointer is valid until the next biomarker-flux call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn bioflux_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

// ============================================================================
// Version Information
// ============================================================================

/// Get the library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn bioflux_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}
