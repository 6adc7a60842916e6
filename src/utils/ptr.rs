//! Shorthands for filling optional fields, e.g. partial update payloads.
//!
//! ```
//! use web_contrib::utils::ptr;
//!
//! struct UserPatch {
//!     name: Option<String>,
//!     age: Option<i32>,
//! }
//!
//! let patch = UserPatch { name: ptr::string("ada"), age: ptr::int32(36) };
//! assert_eq!(patch.name.as_deref(), Some("ada"));
//! assert_eq!(patch.age, Some(36));
//! ```

use chrono::{DateTime, Local};

pub fn string(v: impl Into<String>) -> Option<String> {
    Some(v.into())
}

pub fn int(v: isize) -> Option<isize> {
    Some(v)
}

pub fn int32(v: i32) -> Option<i32> {
    Some(v)
}

pub fn int64(v: i64) -> Option<i64> {
    Some(v)
}

pub fn time(v: DateTime<Local>) -> Option<DateTime<Local>> {
    Some(v)
}
