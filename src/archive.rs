//! Output archive construction
//!
//! Run outputs are grouped into zip archives before upload. Two writers are
//! provided: a serial one for the input echo, where the archive bytes must be
//! reproducible (entries are added in lexicographic order with a fixed
//! timestamp), and a parallel one for the bulky operation and report groups,
//! where reproducibility does not matter but wall time does.
//!
//! The parallel writer shares a single zip handle behind a mutex. Workers
//! read file contents outside the lock and only serialize the actual entry
//! write, so compression input is prepared concurrently while the archive
//! stays internally consistent. Worker failures are collected and the first
//! one is returned after every worker has finished, never before.
//!
//! Names that do not resolve to a regular file are skipped by both writers;
//! role listings routinely include files the deck never produced.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use tracing::debug;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::{Error, Result};

fn entry_options() -> FileOptions {
    // Fixed timestamp keeps archive bytes independent of the wall clock
    FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(zip::DateTime::default())
}

/// Compresses the named files under `dir` into `{archive_name}.zip`, serially
///
/// Entries are written in lexicographic name order, so the same inputs
/// always produce byte-identical archives.
pub fn compress_files(dir: &Path, names: &[String], archive_name: &str) -> Result<PathBuf> {
    let path = dir.join(format!("{}.zip", archive_name));
    let file = fs::File::create(&path)?;
    let mut zip = ZipWriter::new(file);
    let options = entry_options();

    let mut existing: Vec<&String> = names
        .iter()
        .filter(|n| dir.join(n.as_str()).is_file())
        .collect();
    existing.sort();

    for name in &existing {
        zip.start_file(name.as_str(), options)?;
        zip.write_all(&fs::read(dir.join(name.as_str()))?)?;
    }
    zip.finish()?;

    debug!(archive = %path.display(), entries = existing.len(), "Wrote archive");
    Ok(path)
}

/// Compresses the named files under `dir` into `{archive_name}.zip` using a
/// pool of worker threads
///
/// Workers pull names from a shared queue, read the content outside the
/// archive lock and append the entry while holding it. If any worker fails,
/// the first failure is returned after all workers have completed.
pub fn compress_files_parallel(
    dir: &Path,
    names: &[String],
    archive_name: &str,
    num_workers: usize,
) -> Result<PathBuf> {
    let path = dir.join(format!("{}.zip", archive_name));
    let file = fs::File::create(&path)?;
    let zip = Mutex::new(ZipWriter::new(file));
    let options = entry_options();

    let existing: Vec<&String> = names
        .iter()
        .filter(|n| dir.join(n.as_str()).is_file())
        .collect();
    let next_index = AtomicUsize::new(0);
    let failures: Mutex<Vec<Error>> = Mutex::new(Vec::new());
    let workers = num_workers.max(1).min(existing.len().max(1));

    std::thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| loop {
                let index = next_index.fetch_add(1, Ordering::SeqCst);
                if index >= existing.len() {
                    break;
                }
                let name = existing[index];
                match fs::read(dir.join(name.as_str())) {
                    Ok(content) => {
                        let mut writer = zip.lock().unwrap();
                        let written = writer
                            .start_file(name.as_str(), options)
                            .map_err(Error::from)
                            .and_then(|_| writer.write_all(&content).map_err(Error::from));
                        if let Err(e) = written {
                            failures.lock().unwrap().push(e);
                        }
                    }
                    Err(e) => failures.lock().unwrap().push(Error::from(e)),
                }
            });
        }
    });

    let mut failures = failures.into_inner().unwrap();
    if !failures.is_empty() {
        return Err(failures.remove(0));
    }
    zip.into_inner().unwrap().finish()?;

    debug!(
        archive = %path.display(),
        entries = existing.len(),
        workers,
        "Wrote archive in parallel"
    );
    Ok(path)
}
