//! Small helpers shared by services.
//!
//! # Contents
//! - helper.rs (pagination, random strings, date file paths, function names)
//! - id.rs (trace-correlation id generator)
//! - ptr.rs (optional-field helpers)

pub mod helper;
pub mod id;
pub mod ptr;

pub use helper::{
    func_name, generate_date_file_path, generate_random_number, generate_random_string,
    page_offset,
};
pub use id::{IdGenerator, RandomIdGenerator, TRACE_ID_GENERATOR};
