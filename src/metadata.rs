//! Execution metadata descriptor and marker files
//!
//! Every stage of the pipeline records what it learned in a single JSON
//! descriptor, `metadata.modelops`, that lives in the working directory and
//! is uploaded alongside the results. Stages run as separate processes, so
//! the descriptor is re-read, merged and rewritten on every update; keys
//! written later win over existing ones.
//!
//! Two small marker files accompany the descriptor: `id.modelops` holds the
//! deterministic execution identity and `status.modelops` holds the diagnosed
//! run status. Both are plain text, written once. All three share the
//! `.modelops` suffix so the upload stage ships them with a single pattern.

use std::fs;
use std::path::Path;

use serde_json::Value;
use tracing::debug;

use crate::error::Result;
use crate::status::RunStatus;

/// JSON descriptor carried through every pipeline stage
pub const METADATA_FILE: &str = "metadata.modelops";
/// Marker holding the deterministic execution identity
pub const UNIQUE_ID_FILE: &str = "id.modelops";
/// Marker holding the diagnosed run status
pub const STATUS_FILE: &str = "status.modelops";

pub const METADATA_MODEL_NAME: &str = "modelName";
pub const METADATA_MODEL_VERSION: &str = "modelVersion";
pub const METADATA_JOB_ID: &str = "jobId";
pub const METADATA_STATUS: &str = "status";
pub const METADATA_PARENT_ID: &str = "parentId";
pub const METADATA_PARENT_STARTING_DATE: &str = "parentStartingDate";
pub const METADATA_STUDY_NAME: &str = "studyName";
pub const METADATA_STUDY_STARTING_DATE: &str = "studyStartingDate";
pub const METADATA_UNIQUE_ID: &str = "uniqueId";

/// Key/value map stored in [`METADATA_FILE`]
pub type Metadata = serde_json::Map<String, Value>;

/// Merges `entries` into the descriptor in `dir` and returns the result
///
/// The descriptor is created when absent. Passing an empty map reads the
/// current state without changing it, apart from normalizing the file.
pub fn update_metadata_in(dir: &Path, entries: Metadata) -> Result<Metadata> {
    let path = dir.join(METADATA_FILE);
    let mut merged: Metadata = if path.is_file() {
        serde_json::from_str(&fs::read_to_string(&path)?)?
    } else {
        Metadata::new()
    };
    for (key, value) in entries {
        merged.insert(key, value);
    }
    fs::write(&path, serde_json::to_string(&merged)?)?;
    debug!(path = %path.display(), keys = merged.len(), "Updated metadata descriptor");
    Ok(merged)
}

/// Reads the descriptor in `dir`, or an empty map when it does not exist
pub fn read_metadata_in(dir: &Path) -> Result<Metadata> {
    let path = dir.join(METADATA_FILE);
    if path.is_file() {
        Ok(serde_json::from_str(&fs::read_to_string(&path)?)?)
    } else {
        Ok(Metadata::new())
    }
}

/// String value of a metadata key, if present and textual
pub fn metadata_str<'a>(metadata: &'a Metadata, key: &str) -> Option<&'a str> {
    metadata.get(key).and_then(Value::as_str)
}

/// Writes the status marker file
pub fn write_status_marker(dir: &Path, status: RunStatus) -> Result<()> {
    fs::write(dir.join(STATUS_FILE), status.as_str())?;
    Ok(())
}

/// Writes the execution identity marker file
pub fn write_unique_id(dir: &Path, unique_id: &str) -> Result<()> {
    fs::write(dir.join(UNIQUE_ID_FILE), unique_id)?;
    Ok(())
}
