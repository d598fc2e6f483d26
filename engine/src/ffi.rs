//! FFI layer for mobile hosts.
//!
//! This module provides C-compatible functions that can be called from Swift,
//! Kotlin or Dart. All data crosses the boundary as JSON strings.
//!
//! # Memory Management
//!
//! - Strings returned by `outbox_*` functions are allocated by Rust
//! - Caller must free them with `outbox_string_free`
//! - Queue pointers must be freed with `outbox_queue_free`
//!
//! # Error Handling
//!
//! Functions return JSON with either:
//! - `{"ok": <result>}` on success
//! - `{"error": "<message>"}` on failure

use crate::{
    error::Result, AutoMergeStrategy, BackoffPolicy, Failure, FailureClass, NewRequest, Queue,
    QueueSnapshot, ResolutionStrategy, Selections,
};
use std::ffi::{c_char, CStr, CString};
use std::ptr;

/// Result wrapper for FFI responses.
#[derive(serde::Serialize)]
#[serde(untagged)]
enum FfiResult<T: serde::Serialize> {
    Ok { ok: T },
    Err { error: String },
}

impl<T: serde::Serialize> FfiResult<T> {
    fn ok(value: T) -> Self {
        FfiResult::Ok { ok: value }
    }

    fn err(message: impl Into<String>) -> Self {
        FfiResult::Err {
            error: message.into(),
        }
    }

    fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|e| format!(r#"{{"error":"serialization failed: {}"}}"#, e))
    }
}

/// Convert a Rust string to a C string pointer.
/// Caller must free with `outbox_string_free`.
fn to_c_string(s: String) -> *mut c_char {
    match CString::new(s) {
        Ok(cs) => cs.into_raw(),
        Err(_) => CString::new(r#"{"error":"string contained null bytes"}"#)
            .map(CString::into_raw)
            .unwrap_or(ptr::null_mut()),
    }
}

/// Convert a C string pointer to a Rust string.
/// Returns None if pointer is null or invalid UTF-8.
unsafe fn from_c_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

fn error_response(message: impl Into<String>) -> *mut c_char {
    to_c_string(FfiResult::<()>::err(message).to_json())
}

fn respond<T: serde::Serialize>(result: Result<T>) -> *mut c_char {
    match result {
        Ok(value) => to_c_string(FfiResult::ok(value).to_json()),
        Err(e) => error_response(e.to_string()),
    }
}

/// Parse a JSON argument, or produce the error response to return.
unsafe fn parse_arg<T: serde::de::DeserializeOwned>(
    ptr: *const c_char,
    name: &str,
) -> std::result::Result<T, *mut c_char> {
    let raw = from_c_string(ptr).ok_or_else(|| error_response(format!("invalid {}", name)))?;
    serde_json::from_str(&raw)
        .map_err(|e| error_response(format!("parse error in {}: {}", name, e)))
}

// ============================================================================
// Queue Lifecycle
// ============================================================================

/// Create an empty queue.
///
/// # Safety
/// Caller must free the returned pointer with `outbox_queue_free`.
#[no_mangle]
pub extern "C" fn outbox_queue_new() -> *mut Queue {
    Box::into_raw(Box::new(Queue::new()))
}

/// Free a queue.
///
/// # Safety
/// - `queue` must be a valid pointer from `outbox_queue_new`
/// - Must not be called twice on the same pointer
#[no_mangle]
pub unsafe extern "C" fn outbox_queue_free(queue: *mut Queue) {
    if !queue.is_null() {
        drop(Box::from_raw(queue));
    }
}

/// Free a string allocated by the engine.
///
/// # Safety
/// - `s` must be a valid pointer from an `outbox_*` function
/// - Must not be called twice on the same pointer
#[no_mangle]
pub unsafe extern "C" fn outbox_string_free(s: *mut c_char) {
    if !s.is_null() {
        drop(CString::from_raw(s));
    }
}

// ============================================================================
// Queue Operations
// ============================================================================

/// Enqueue a request.
///
/// # Arguments
/// - `request_json`: JSON string of NewRequest
/// - `id`: id assigned by the host
/// - `now`: creation time in milliseconds
///
/// # Returns
/// JSON string: `{"ok": QueuedRequest}` or `{"error": "message"}`
///
/// # Safety
/// - `queue` must be a valid pointer from `outbox_queue_new` or null
/// - `request_json` and `id` must be valid null-terminated C strings or null
/// - Caller must free the returned string with `outbox_string_free`
#[no_mangle]
pub unsafe extern "C" fn outbox_queue_enqueue(
    queue: *mut Queue,
    request_json: *const c_char,
    id: *const c_char,
    now: u64,
) -> *mut c_char {
    let queue = match queue.as_mut() {
        Some(q) => q,
        None => return error_response("null queue pointer"),
    };

    let request: NewRequest = match parse_arg(request_json, "request JSON") {
        Ok(r) => r,
        Err(response) => return response,
    };

    let id = match from_c_string(id) {
        Some(s) => s,
        None => return error_response("invalid id"),
    };

    respond(queue.enqueue(request, id, now).cloned())
}

/// Get entries in drain order.
///
/// # Returns
/// JSON string: `{"ok": [QueuedRequest, ...]}` or `{"error": "message"}`
///
/// # Safety
/// - `queue` must be a valid pointer from `outbox_queue_new` or null
/// - Caller must free the returned string with `outbox_string_free`
#[no_mangle]
pub unsafe extern "C" fn outbox_queue_ordered(queue: *const Queue) -> *mut c_char {
    match queue.as_ref() {
        Some(q) => to_c_string(FfiResult::ok(q.ordered()).to_json()),
        None => error_response("null queue pointer"),
    }
}

/// Remove an entry.
///
/// # Returns
/// JSON string: `{"ok": QueuedRequest}`, `{"ok": null}` if absent, or `{"error": "message"}`
///
/// # Safety
/// - `queue` must be a valid pointer from `outbox_queue_new` or null
/// - `id` must be a valid null-terminated C string or null
/// - Caller must free the returned string with `outbox_string_free`
#[no_mangle]
pub unsafe extern "C" fn outbox_queue_remove(queue: *mut Queue, id: *const c_char) -> *mut c_char {
    let queue = match queue.as_mut() {
        Some(q) => q,
        None => return error_response("null queue pointer"),
    };

    match from_c_string(id) {
        Some(id) => to_c_string(FfiResult::ok(queue.remove(&id)).to_json()),
        None => error_response("invalid id"),
    }
}

/// Count a transient failure against an entry's retry budget.
///
/// # Returns
/// JSON string: `{"ok": RetryDecision}` or `{"error": "message"}`
///
/// # Safety
/// - `queue` must be a valid pointer from `outbox_queue_new` or null
/// - `id` must be a valid null-terminated C string or null
/// - Caller must free the returned string with `outbox_string_free`
#[no_mangle]
pub unsafe extern "C" fn outbox_queue_record_failure(
    queue: *mut Queue,
    id: *const c_char,
) -> *mut c_char {
    let queue = match queue.as_mut() {
        Some(q) => q,
        None => return error_response("null queue pointer"),
    };

    match from_c_string(id) {
        Some(id) => respond(queue.record_failure(&id)),
        None => error_response("invalid id"),
    }
}

/// Get the number of queued entries, or -1 for a null pointer.
///
/// # Safety
/// - `queue` must be a valid pointer from `outbox_queue_new` or null
#[no_mangle]
pub unsafe extern "C" fn outbox_queue_len(queue: *const Queue) -> i64 {
    match queue.as_ref() {
        Some(q) => q.len() as i64,
        None => -1,
    }
}

/// Export the queue as a snapshot.
///
/// # Returns
/// JSON string: `{"ok": QueueSnapshot}` or `{"error": "message"}`
///
/// # Safety
/// - `queue` must be a valid pointer from `outbox_queue_new` or null
/// - Caller must free the returned string with `outbox_string_free`
#[no_mangle]
pub unsafe extern "C" fn outbox_queue_export(queue: *const Queue) -> *mut c_char {
    match queue.as_ref() {
        Some(q) => to_c_string(FfiResult::ok(q.to_snapshot()).to_json()),
        None => error_response("null queue pointer"),
    }
}

/// Replace the queue contents with a persisted snapshot.
///
/// # Returns
/// JSON string: `{"ok": null}` or `{"error": "message"}`
///
/// # Safety
/// - `queue` must be a valid pointer from `outbox_queue_new` or null
/// - `snapshot_json` must be a valid null-terminated C string or null
/// - Caller must free the returned string with `outbox_string_free`
#[no_mangle]
pub unsafe extern "C" fn outbox_queue_import(
    queue: *mut Queue,
    snapshot_json: *const c_char,
) -> *mut c_char {
    let queue = match queue.as_mut() {
        Some(q) => q,
        None => return error_response("null queue pointer"),
    };

    let raw = match from_c_string(snapshot_json) {
        Some(s) => s,
        None => return error_response("invalid snapshot JSON"),
    };

    let restored = QueueSnapshot::from_json(&raw).and_then(Queue::from_snapshot);
    respond(restored.map(|restored| {
        *queue = restored;
    }))
}

// ============================================================================
// Conflicts
// ============================================================================

/// Detect conflicting fields between a local and a server copy.
///
/// # Returns
/// JSON string: `{"ok": [Conflict, ...]}` or `{"error": "message"}`
///
/// # Safety
/// - All arguments must be valid null-terminated C strings or null
/// - Caller must free the returned string with `outbox_string_free`
#[no_mangle]
pub unsafe extern "C" fn outbox_detect_conflicts(
    local_json: *const c_char,
    server_json: *const c_char,
    id_field: *const c_char,
) -> *mut c_char {
    let local: serde_json::Value = match parse_arg(local_json, "local JSON") {
        Ok(v) => v,
        Err(response) => return response,
    };
    let server: serde_json::Value = match parse_arg(server_json, "server JSON") {
        Ok(v) => v,
        Err(response) => return response,
    };
    let id_field = from_c_string(id_field).unwrap_or_else(|| "id".to_string());

    respond(crate::detect(&local, &server, &id_field))
}

/// Strategy as sent by a host. Unknown or missing names fall back to server.
#[derive(serde::Deserialize)]
struct StrategyArg {
    #[serde(default)]
    strategy: Option<String>,
    #[serde(default)]
    selections: Selections,
}

/// Resolve two copies with a caller-chosen strategy.
///
/// # Arguments
/// - `strategy_json`: e.g. `{"strategy": "manual", "selections": {"name": "local"}}`;
///   null, `{}` or an unknown strategy name mean server
///
/// # Returns
/// JSON string: `{"ok": <merged entity>}` or `{"error": "message"}`
///
/// # Safety
/// - All arguments must be valid null-terminated C strings or null
/// - Caller must free the returned string with `outbox_string_free`
#[no_mangle]
pub unsafe extern "C" fn outbox_resolve_conflicts(
    strategy_json: *const c_char,
    local_json: *const c_char,
    server_json: *const c_char,
) -> *mut c_char {
    let strategy = if strategy_json.is_null() {
        ResolutionStrategy::Server
    } else {
        match parse_arg::<StrategyArg>(strategy_json, "strategy JSON") {
            Ok(arg) => ResolutionStrategy::from_name(arg.strategy.as_deref(), arg.selections),
            Err(response) => return response,
        }
    };
    let local: serde_json::Value = match parse_arg(local_json, "local JSON") {
        Ok(v) => v,
        Err(response) => return response,
    };
    let server: serde_json::Value = match parse_arg(server_json, "server JSON") {
        Ok(v) => v,
        Err(response) => return response,
    };

    respond(crate::resolve(&strategy, &local, &server))
}

/// Merge two copies without user interaction.
///
/// # Arguments
/// - `strategy`: one of `serverWins`, `localWins`, `newestWins`,
///   `fieldByField`, `deepMerge`
///
/// # Returns
/// JSON string: `{"ok": <merged entity>}` or `{"error": "message"}`
///
/// # Safety
/// - All arguments must be valid null-terminated C strings or null
/// - Caller must free the returned string with `outbox_string_free`
#[no_mangle]
pub unsafe extern "C" fn outbox_auto_merge(
    strategy: *const c_char,
    local_json: *const c_char,
    server_json: *const c_char,
) -> *mut c_char {
    let strategy = match from_c_string(strategy) {
        Some(name) => {
            match serde_json::from_value::<AutoMergeStrategy>(serde_json::Value::String(name)) {
                Ok(s) => s,
                Err(e) => return error_response(format!("unknown merge strategy: {}", e)),
            }
        }
        None => return error_response("invalid strategy"),
    };
    let local: serde_json::Value = match parse_arg(local_json, "local JSON") {
        Ok(v) => v,
        Err(response) => return response,
    };
    let server: serde_json::Value = match parse_arg(server_json, "server JSON") {
        Ok(v) => v,
        Err(response) => return response,
    };

    respond(crate::auto_merge(strategy, &local, &server))
}

// ============================================================================
// Retry
// ============================================================================

/// Classify an HTTP failure status: 0 for transient, 1 for permanent.
#[no_mangle]
pub extern "C" fn outbox_classify_status(status: u16) -> i32 {
    match Failure::Status(status).classify() {
        FailureClass::Transient => 0,
        FailureClass::Permanent => 1,
    }
}

/// Backoff delay in milliseconds for a request that failed `retries` times.
#[no_mangle]
pub extern "C" fn outbox_backoff_delay(
    initial_delay_ms: u64,
    max_delay_ms: u64,
    retries: u32,
) -> u64 {
    BackoffPolicy::new(initial_delay_ms, max_delay_ms).delay_for(retries)
}

// ============================================================================
// Utility
// ============================================================================

/// Get the engine version.
///
/// # Returns
/// Static string pointer (do not free)
#[no_mangle]
pub extern "C" fn outbox_version() -> *const c_char {
    concat!(env!("CARGO_PKG_VERSION"), "\0").as_ptr() as *const c_char
}
