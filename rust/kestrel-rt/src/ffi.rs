//! C-ABI records and host callbacks.
//!
//! `FFIVector` / `FFIString` / `FFIInterval` are the flat forms the compiled
//! routine reads and writes; their layout is mirrored by the `ffi.cdef` block
//! in every generated script. The `kestrel_*` callbacks are handed to the
//! runtime as raw function pointers at wrapper initialization; generated code
//! calls them for output-string writes and date-part extraction.
//!
//! The date helpers are plain Rust functions shared with the interpreter, so
//! both evaluation paths produce identical values.

use std::ffi::{c_char, c_void, CStr};

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, Timelike};
use kestrel_core::Vector;

pub use kestrel_core::Interval as FFIInterval;

/// Flat C-ABI description of one column batch.
///
/// `nullmask` is one byte per row, nonzero = NULL. `original_vector` points
/// back at the engine vector so string callbacks can reach engine-owned
/// storage; it is opaque to the compiled routine.
#[repr(C)]
#[derive(Debug)]
pub struct FFIVector {
    pub data: *mut c_void,
    pub nullmask: *mut u8,
    pub count: u64,
    pub logical_type_id: i32,
    pub vector_kind: i32,
    pub original_vector: *mut c_void,
}

/// A borrowed string view: pointer plus byte length.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct FFIString {
    pub ptr: *const c_char,
    pub len: u32,
}

// ── Host callbacks ──────────────────────────────────────────────────────

/// Copy `len` bytes into engine-owned string storage for output row `row`.
///
/// # Safety
/// Called from generated code during `invoke`; `out_vec` must be the output
/// FFIVector of the current invocation and its `original_vector` must point
/// at a live flat VARCHAR vector.
pub extern "C" fn kestrel_append_string(
    out_vec: *mut FFIVector,
    row: u64,
    ptr: *const c_char,
    len: u32,
) {
    if out_vec.is_null() || ptr.is_null() {
        return;
    }
    unsafe {
        let vector = (*out_vec).original_vector as *mut Vector;
        if vector.is_null() {
            return;
        }
        let bytes = std::slice::from_raw_parts(ptr as *const u8, len as usize);
        let s = String::from_utf8_lossy(bytes);
        (*vector).set_string(row as usize, &s);
    }
}

/// Mark output row `row` NULL.
///
/// # Safety
/// Same contract as [`kestrel_append_string`].
pub extern "C" fn kestrel_set_string_null(out_vec: *mut FFIVector, row: u64) {
    if out_vec.is_null() {
        return;
    }
    unsafe {
        let vector = (*out_vec).original_vector as *mut Vector;
        if !vector.is_null() {
            (*vector).set_null(row as usize);
        }
    }
}

pub extern "C" fn kestrel_extract_from_date(date_val: i32, part: *const c_char) -> i64 {
    match part_str(part) {
        Some(part) => date_part(date_val, part),
        None => 0,
    }
}

pub extern "C" fn kestrel_extract_from_timestamp(micros: i64, part: *const c_char) -> i64 {
    match part_str(part) {
        Some(part) => timestamp_part(micros, part),
        None => 0,
    }
}

pub extern "C" fn kestrel_extract_year_from_date(date_val: i32) -> i64 {
    date_part(date_val, "year")
}

fn part_str<'a>(part: *const c_char) -> Option<&'a str> {
    if part.is_null() {
        return None;
    }
    unsafe { CStr::from_ptr(part) }.to_str().ok()
}

// ── Date-part extraction ────────────────────────────────────────────────

fn epoch_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).unwrap()
}

fn civil_date(days: i32) -> NaiveDate {
    epoch_date() + Duration::days(days as i64)
}

fn civil_datetime(micros: i64) -> NaiveDateTime {
    DateTime::from_timestamp_micros(micros)
        .map(|dt| dt.naive_utc())
        .unwrap_or_else(|| epoch_date().and_hms_opt(0, 0, 0).unwrap())
}

fn date_field(date: NaiveDate, part: &str) -> Option<i64> {
    let value = match part {
        "year" => date.year() as i64,
        "month" => date.month() as i64,
        "day" => date.day() as i64,
        "quarter" => (date.month0() / 3 + 1) as i64,
        // Days from Sunday, Sunday = 0.
        "dow" => date.weekday().num_days_from_sunday() as i64,
        "doy" => date.ordinal() as i64,
        "week" => date.iso_week().week() as i64,
        _ => return None,
    };
    Some(value)
}

/// Extract a named part from a DATE value (days since 1970-01-01). Unknown
/// parts yield 0; the binder rejects them before an expression gets here.
pub fn date_part(days: i32, part: &str) -> i64 {
    if part == "epoch" {
        return days as i64 * 86_400;
    }
    date_field(civil_date(days), part).unwrap_or(0)
}

/// Extract a named part from a TIMESTAMP value (microseconds since epoch).
pub fn timestamp_part(micros: i64, part: &str) -> i64 {
    let dt = civil_datetime(micros);
    match part {
        "epoch" => micros.div_euclid(1_000_000),
        "hour" => dt.hour() as i64,
        "minute" => dt.minute() as i64,
        "second" => dt.second() as i64,
        "millisecond" => (dt.and_utc().timestamp_subsec_millis()) as i64,
        "microsecond" => (dt.and_utc().timestamp_subsec_micros()) as i64,
        _ => date_field(dt.date(), part).unwrap_or(0),
    }
}

pub fn year_of_date(days: i32) -> i64 {
    date_part(days, "year")
}
