//! Pipeline Path Management
//!
//! Named filesystem paths used by a pipeline (`temp`, `log`, ...).
//! Missing paths are created when the pipeline allows it and rejected
//! otherwise. The `log` path is where checkpoints are written.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::error::PipelineError;

/// Name of the path checkpoints are written to.
pub const LOG_PATH: &str = "log";

/// Name of the path for temporary files.
pub const TEMP_PATH: &str = "temp";

/// Ensures `path` exists, creating it (and its parents) when `auto_create` is set.
pub fn check_path(path: &Path, auto_create: bool) -> Result<(), PipelineError> {
    if path.exists() {
        if !path.is_dir() {
            return Err(PipelineError::Configuration(format!(
                "Path is not a directory: {}",
                path.display()
            )));
        }
        return Ok(());
    }

    if !auto_create {
        return Err(PipelineError::Configuration(format!(
            "{} does not exist",
            path.display()
        )));
    }

    create_paths([path])
}

/// Creates every directory in `paths`, including missing parents.
pub fn create_paths<I, P>(paths: I) -> Result<(), PipelineError>
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    for path in paths {
        let path = path.as_ref();
        if let Err(e) = fs::create_dir_all(path) {
            if !path.is_dir() {
                return Err(PipelineError::Configuration(format!(
                    "Problem creating directory {}: {}",
                    path.display(),
                    e
                )));
            }
        }
        info!("Created directory: {}", path.display());
    }
    Ok(())
}

/// Checks every named path and warns about missing recommended ones.
///
/// Returns the names of the recommended paths that are not configured.
pub fn check_paths(
    paths: &BTreeMap<String, PathBuf>,
    auto_create: bool,
) -> Result<Vec<&'static str>, PipelineError> {
    for path in paths.values() {
        check_path(path, auto_create)?;
    }

    let mut missing = Vec::new();
    if !paths.contains_key(TEMP_PATH) {
        warn!(
            "'{}' path has not been set for the pipeline. \
             If this pipeline generates temporary files an error may occur",
            TEMP_PATH
        );
        missing.push(TEMP_PATH);
    }
    if !paths.contains_key(LOG_PATH) {
        warn!(
            "'{}' path has not been set for the pipeline. Pipeline state will not be saved.",
            LOG_PATH
        );
        missing.push(LOG_PATH);
    }
    Ok(missing)
}

/// Case-insensitive boolean parsing that accepts prefixes of
/// `true`/`false`/`yes`/`no` (`t`, `n`, `YE`, ...).
pub fn str_to_bool(text: &str) -> Option<bool> {
    let lower = text.trim().to_lowercase();
    if lower.is_empty() {
        return None;
    }
    if "true".starts_with(&lower) || "yes".starts_with(&lower) {
        Some(true)
    } else if "false".starts_with(&lower) || "no".starts_with(&lower) {
        Some(false)
    } else {
        None
    }
}
