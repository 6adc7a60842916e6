//! Shared utilities for integration tests.

#![allow(dead_code)]

#[path = "../../src/log/capture.rs"]
mod capture;

pub use capture::Capture;

/// Value of `key=` in a log line, up to the next space.
pub fn field<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    let marker = format!(" {}=", key);
    let start = line.find(&marker)? + marker.len();
    let rest = &line[start..];
    Some(rest.split(' ').next().unwrap_or(rest))
}
