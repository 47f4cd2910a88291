//! Working-directory file operations
//!
//! Pipeline stages manipulate a flat working directory: deck archives are
//! extracted into it, text files are normalized to UTF-8, outputs are sorted
//! into roles by name, and scratch files are removed at the end. These
//! helpers implement those operations; which names belong to which role is
//! decided by the model adapters.
//!
//! Role selection by pattern joins the individual expressions into a single
//! alternation, `(a|b|c)`, matched anywhere in the file name. Selection by
//! literal name silently skips names that are not present, since decks vary
//! in which optional files they carry.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Mode applied to fetched model executables (rwxrw-r--)
pub const EXECUTABLE_FILE_MODE: u32 = 0o764;

/// Entry selection when extracting an archive
#[derive(Debug, Clone, Copy)]
pub enum ExtractFilter<'a> {
    /// Extract every entry
    All,
    /// Extract the named entries that exist in the archive
    Members(&'a [&'a str]),
    /// Extract entries whose name matches any of the patterns
    Patterns(&'a [&'a str]),
}

/// Marks a file as executable for the scheduler user
pub fn make_executable(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(EXECUTABLE_FILE_MODE))?;
    }
    Ok(())
}

/// Extracts entries from a zip archive into `dest`
///
/// Returns the full entry listing of the archive, regardless of how many
/// entries the filter selected.
pub fn extract_zip(archive: &Path, dest: &Path, filter: ExtractFilter<'_>) -> Result<Vec<String>> {
    let file = fs::File::open(archive)?;
    let mut zip = zip::ZipArchive::new(file)?;
    let names: Vec<String> = zip.file_names().map(String::from).collect();

    let selected: Vec<String> = match filter {
        ExtractFilter::All => names.clone(),
        ExtractFilter::Members(members) => names
            .iter()
            .filter(|name| members.contains(&name.as_str()))
            .cloned()
            .collect(),
        ExtractFilter::Patterns(patterns) => {
            let regex = join_patterns(patterns)?;
            names
                .iter()
                .filter(|name| regex.is_match(name))
                .cloned()
                .collect()
        }
    };

    for name in &selected {
        let mut entry = zip.by_name(name)?;
        let relative = entry
            .enclosed_name()
            .map(|p| p.to_owned())
            .ok_or_else(|| {
                Error::Validation(format!("Archive entry '{}' escapes the target directory", name))
            })?;
        let out_path = dest.join(relative);
        if entry.is_dir() {
            fs::create_dir_all(&out_path)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = fs::File::create(&out_path)?;
        io::copy(&mut entry, &mut out)?;
    }

    debug!(
        archive = %archive.display(),
        extracted = selected.len(),
        total = names.len(),
        "Extracted archive"
    );
    Ok(names)
}

/// Moves the regular files of `dir/subdir` up into `dir` and removes the
/// subdirectory, including anything else it still contains
pub fn move_dir_contents_to_root(dir: &Path, subdir: &str) -> Result<()> {
    let source = dir.join(subdir);
    if !source.is_dir() {
        return Ok(());
    }
    for entry in fs::read_dir(&source)? {
        let entry = entry?;
        if entry.metadata()?.is_file() {
            fs::rename(entry.path(), dir.join(entry.file_name()))?;
        }
    }
    fs::remove_dir_all(&source)?;
    Ok(())
}

/// Names of files directly under `dir` that match any of `patterns` and are
/// not listed in `ignore`
pub fn list_files_by_patterns(
    dir: &Path,
    ignore: &[String],
    patterns: &[&str],
) -> Result<Vec<String>> {
    let regex = join_patterns(patterns)?;
    let mut matches = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if ignore.iter().any(|ignored| ignored == &name) {
            continue;
        }
        if regex.is_match(&name) {
            matches.push(name);
        }
    }
    matches.sort();
    Ok(matches)
}

/// Removes the named files from `dir`, ignoring names that are absent or
/// are not regular files
pub fn clean_files(dir: &Path, names: &[String]) -> Result<()> {
    for name in names {
        let path = dir.join(name);
        if path.is_file() {
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}

/// Finds a file trying the candidate name as given, uppercased and
/// lowercased
pub fn find_file_case_insensitive(dir: &Path, candidate: &str) -> Result<PathBuf> {
    for name in [
        candidate.to_string(),
        candidate.to_uppercase(),
        candidate.to_lowercase(),
    ] {
        let path = dir.join(&name);
        if path.exists() {
            return Ok(path);
        }
    }
    Err(Error::NotFound(format!(
        "File {} not found in {}",
        candidate,
        dir.display()
    )))
}

/// Normalizes a text file to UTF-8 in place
///
/// Files that are already valid UTF-8 are left untouched, as are binary
/// files (detected by an embedded NUL byte). Anything else is assumed to be
/// Latin-1, the encoding the model vendors ship decks in, and is re-encoded
/// with line endings normalized. Returns whether the file was rewritten.
pub fn sanitize_encoding(path: &Path) -> Result<bool> {
    let bytes = fs::read(path)?;
    if bytes.contains(&0) {
        return Ok(false);
    }
    if std::str::from_utf8(&bytes).is_ok() {
        return Ok(false);
    }

    let decoded: String = bytes.iter().map(|&b| b as char).collect();
    let normalized = decoded.replace("\r\n", "\n");
    fs::write(path, normalized)?;
    Ok(true)
}

/// Normalizes every regular file directly under `dir`, returning how many
/// were rewritten
pub fn sanitize_directory(dir: &Path) -> Result<usize> {
    let mut converted = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.metadata()?.is_file() {
            continue;
        }
        match sanitize_encoding(&entry.path()) {
            Ok(true) => {
                debug!(file = %entry.path().display(), "Re-encoded file to UTF-8");
                converted += 1;
            }
            Ok(false) => {}
            Err(e) => {
                warn!(file = %entry.path().display(), error = %e, "Could not sanitize file");
                return Err(e);
            }
        }
    }
    Ok(converted)
}

fn join_patterns(patterns: &[&str]) -> Result<Regex> {
    let joined = format!("({})", patterns.join("|"));
    Regex::new(&joined)
        .map_err(|e| Error::Validation(format!("Invalid file pattern '{}': {}", joined, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_zip(path: &Path, entries: &[(&str, &str)]) {
        let file = fs::File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::FileOptions::default();
        for (name, content) in entries {
            zip.start_file(*name, options).unwrap();
            zip.write_all(content.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }

    fn touch(dir: &Path, names: &[&str]) {
        for name in names {
            fs::write(dir.join(name), "x").unwrap();
        }
    }

    #[test]
    fn test_extract_all_entries() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("deck.zip");
        write_zip(&archive, &[("caso.dat", "rv0"), ("dadger.rv0", "TE")]);

        let names = extract_zip(&archive, dir.path(), ExtractFilter::All).unwrap();
        assert_eq!(names.len(), 2);
        assert!(dir.path().join("caso.dat").is_file());
        assert!(dir.path().join("dadger.rv0").is_file());
    }

    #[test]
    fn test_extract_members_skips_missing_names() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("cortes.zip");
        write_zip(&archive, &[("cortesh.dat", "h"), ("cortes.dat", "c")]);

        let names = extract_zip(
            &archive,
            dir.path(),
            ExtractFilter::Members(&["cortesh.dat", "cortes-001.dat"]),
        )
        .unwrap();

        // The listing covers the whole archive even when fewer entries
        // were selected
        assert_eq!(names.len(), 2);
        assert!(dir.path().join("cortesh.dat").is_file());
        assert!(!dir.path().join("cortes.dat").exists());
        assert!(!dir.path().join("cortes-001.dat").exists());
    }

    #[test]
    fn test_extract_by_patterns() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("cortes.zip");
        write_zip(
            &archive,
            &[("cortdeco.rv0", "c"), ("mapcut.rv0", "m"), ("relato.rv0", "r")],
        );

        extract_zip(
            &archive,
            dir.path(),
            ExtractFilter::Patterns(&[r"^cortdeco.*$", r"^mapcut.*$"]),
        )
        .unwrap();

        assert!(dir.path().join("cortdeco.rv0").is_file());
        assert!(dir.path().join("mapcut.rv0").is_file());
        assert!(!dir.path().join("relato.rv0").exists());
    }

    #[test]
    fn test_extract_preserves_subdirectories() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("deck.zip");
        write_zip(&archive, &[("out/relato.rv0", "r")]);

        extract_zip(&archive, dir.path(), ExtractFilter::All).unwrap();
        assert!(dir.path().join("out/relato.rv0").is_file());
    }

    #[test]
    fn test_move_dir_contents_to_root() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("out")).unwrap();
        fs::write(dir.path().join("out/nwlistop.dat"), "x").unwrap();
        fs::create_dir(dir.path().join("out/nested")).unwrap();

        move_dir_contents_to_root(dir.path(), "out").unwrap();

        assert!(dir.path().join("nwlistop.dat").is_file());
        assert!(!dir.path().join("out").exists());
    }

    #[test]
    fn test_move_dir_contents_missing_subdir_is_noop() {
        let dir = TempDir::new().unwrap();
        move_dir_contents_to_root(dir.path(), "out").unwrap();
    }

    #[test]
    fn test_list_files_by_patterns_alternation() {
        let dir = TempDir::new().unwrap();
        touch(
            dir.path(),
            &["relato.rv0", "sumario.rv0", "dadger.rv0", "inviab_unic.rv0"],
        );

        let found = list_files_by_patterns(
            dir.path(),
            &["sumario.rv0".to_string()],
            &[r"^relato", r"^sumario", r"^inviab"],
        )
        .unwrap();

        assert_eq!(found, vec!["inviab_unic.rv0", "relato.rv0"]);
    }

    #[test]
    fn test_list_files_by_patterns_search_anywhere() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), &["pat01.afp", "deck-pat02.afp", "deck.zip"]);

        let found = list_files_by_patterns(dir.path(), &[], &[r"pat.*\.afp"]).unwrap();
        assert_eq!(found, vec!["deck-pat02.afp", "pat01.afp"]);
    }

    #[test]
    fn test_classification_is_idempotent() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), &["relato.rv0", "relato.rv1", "dadger.rv0"]);

        let first = list_files_by_patterns(dir.path(), &[], &[r"^relato"]).unwrap();
        let second = list_files_by_patterns(dir.path(), &[], &[r"^relato"]).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_clean_files_ignores_missing() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), &["fort.4", "keep.dat"]);

        clean_files(
            dir.path(),
            &["fort.4".to_string(), "fort.5".to_string()],
        )
        .unwrap();

        assert!(!dir.path().join("fort.4").exists());
        assert!(dir.path().join("keep.dat").is_file());
    }

    #[test]
    fn test_find_file_case_insensitive() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), &["ENTDADOS.DAT"]);

        let found = find_file_case_insensitive(dir.path(), "entdados.dat").unwrap();
        assert_eq!(found, dir.path().join("ENTDADOS.DAT"));

        let missing = find_file_case_insensitive(dir.path(), "operut.dat");
        assert!(matches!(missing, Err(Error::NotFound(_))));
    }

    #[test]
    fn test_sanitize_keeps_valid_utf8() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dadger.rv0");
        fs::write(&path, "TE  estudo de caso\n").unwrap();

        assert!(!sanitize_encoding(&path).unwrap());
        assert_eq!(fs::read_to_string(&path).unwrap(), "TE  estudo de caso\n");
    }

    #[test]
    fn test_sanitize_converts_latin1() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("relato.rv0");
        // "operação" with Latin-1 bytes and a CRLF terminator
        fs::write(&path, b"opera\xe7\xe3o\r\n").unwrap();

        assert!(sanitize_encoding(&path).unwrap());
        assert_eq!(fs::read_to_string(&path).unwrap(), "operação\n");
    }

    #[test]
    fn test_sanitize_skips_binary() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cortes.dat");
        let payload = vec![0u8, 159, 146, 150];
        fs::write(&path, &payload).unwrap();

        assert!(!sanitize_encoding(&path).unwrap());
        assert_eq!(fs::read(&path).unwrap(), payload);
    }

    #[test]
    fn test_sanitize_directory_counts_conversions() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.dat"), b"plain\n").unwrap();
        fs::write(dir.path().join("b.dat"), b"usina \xe9\n").unwrap();

        assert_eq!(sanitize_directory(dir.path()).unwrap(), 1);
    }
}
