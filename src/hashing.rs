//! Content hashing and execution identity
//!
//! An execution is identified by a digest of everything that determines its
//! outcome: the model name, the executable version, the parent execution it
//! chains from, and the input files sitting in the working directory. Two
//! submissions with the same digest are the same computation, which lets the
//! platform reuse results instead of re-running decks.
//!
//! Directory hashing only considers regular files at the top level, visits
//! them in lexicographic order, and skips files above a size ceiling so that
//! multi-gigabyte scratch artifacts do not dominate the cost of identity
//! computation.

use std::fs;
use std::path::Path;

use tracing::debug;

use crate::error::Result;

/// MD5 digest of a string, as lowercase hex
pub fn hash_string(data: &str) -> String {
    format!("{:x}", md5::compute(data.as_bytes()))
}

/// MD5 digest of a file's content, as lowercase hex
pub fn hash_file(path: &Path) -> Result<String> {
    let content = fs::read(path)?;
    Ok(format!("{:x}", md5::compute(&content)))
}

/// Combined digest of the regular files directly under `dir`
///
/// Files larger than `size_limit_bytes` are skipped. Entries are visited in
/// lexicographic name order so the digest does not depend on directory
/// enumeration order.
pub fn hash_directory(dir: &Path, size_limit_bytes: u64) -> Result<String> {
    let mut names: Vec<String> = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if !metadata.is_file() {
            continue;
        }
        if metadata.len() > size_limit_bytes {
            debug!(
                file = %entry.path().display(),
                size = metadata.len(),
                "Skipping oversized file while hashing"
            );
            continue;
        }
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    names.sort();

    let mut combined = String::new();
    for name in &names {
        combined.push_str(&hash_file(&dir.join(name))?);
    }
    Ok(hash_string(&combined))
}

/// Deterministic identity of an execution
///
/// Combines the model name, the hashed executable version, the parent
/// execution identifier (empty when the execution has no parent) and the
/// digest of the input files in `dir`.
pub fn unique_execution_id(
    model_name: &str,
    version: &str,
    parent_id: &str,
    dir: &Path,
    size_limit_bytes: u64,
) -> Result<String> {
    let inputs_digest = hash_directory(dir, size_limit_bytes)?;
    let combined = format!(
        "{}{}{}{}",
        model_name.to_lowercase(),
        hash_string(version),
        parent_id,
        inputs_digest
    );
    Ok(hash_string(&combined))
}
