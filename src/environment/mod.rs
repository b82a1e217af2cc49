//! Environment Management Module
//!
//! Handles the named filesystem paths a pipeline works in.

pub mod paths;

pub use paths::{check_path, check_paths, create_paths, str_to_bool, LOG_PATH, TEMP_PATH};
