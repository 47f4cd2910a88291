//! Minimal readers for the proprietary deck and report files
//!
//! The simulation programs exchange data through positional text files whose
//! full layouts are vendor-defined and mostly irrelevant here: each pipeline
//! stage touches a handful of fields (a title, a date, a file reference, an
//! error marker) and must leave everything else byte-for-byte untouched.
//! These readers therefore keep the raw lines and expose only the fields the
//! pipeline consumes, rewriting lines in place when a stage edits one.
//!
//! Comment lines start with `&` in every format and are never interpreted.

use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

pub mod decomp;
pub mod dessem;
pub mod newave;

/// Comment marker shared by all deck formats
pub(crate) const COMMENT_MARKER: char = '&';

/// Reads a deck file, mapping a missing file to [`Error::NotFound`]
///
/// Deck files are produced by earlier stages or by the simulation program
/// itself; a stage that needs one and cannot find it has hit a pipeline
/// ordering problem, not an IO accident.
pub(crate) fn read_deck_file(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            Error::NotFound(format!("deck file {}", path.display()))
        } else {
            Error::Io(source)
        }
    })
}

/// Writes deck lines back, preserving order and a trailing newline
pub(crate) fn write_deck_file(path: &Path, lines: &[String]) -> Result<()> {
    let mut content = lines.join("\n");
    content.push('\n');
    fs::write(path, content)?;
    Ok(())
}

/// Whether a line carries data (not blank, not a comment)
pub(crate) fn is_data_line(line: &str) -> bool {
    let trimmed = line.trim_start();
    !trimmed.is_empty() && !trimmed.starts_with(COMMENT_MARKER)
}

/// First whitespace-delimited token of a line, the register mnemonic
pub(crate) fn register_of(line: &str) -> Option<&str> {
    line.split_whitespace().next()
}

/// File names referenced by a semicolon-delimited libs index
///
/// The index (`indices.csv` and friends) maps logical entries to external
/// library files in its third column. Anything after a `&` is a comment;
/// duplicate references are collapsed keeping the first occurrence.
pub(crate) fn read_libs_index(path: &Path) -> Result<Vec<String>> {
    let content = read_deck_file(path)?;
    let mut names: Vec<String> = Vec::new();
    for line in content.lines() {
        let data = line.split(COMMENT_MARKER).next().unwrap_or("");
        let mut columns = data.split(';');
        if let Some(name) = columns.nth(2) {
            let name = name.trim();
            if !name.is_empty() && !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_deck_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        let err = read_deck_file(&dir.path().join("dadger.rv0")).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_data_line_detection() {
        assert!(is_data_line("TE  STUDY TITLE"));
        assert!(!is_data_line("& comment"));
        assert!(!is_data_line("   "));
        assert!(!is_data_line(""));
    }

    #[test]
    fn test_register_mnemonic() {
        assert_eq!(register_of("DT  28  3  2025"), Some("DT"));
        assert_eq!(register_of(""), None);
    }

    #[test]
    fn test_write_appends_trailing_newline() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("caso.dat");
        write_deck_file(&path, &["rv0".to_string()]).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "rv0\n");
    }

    #[test]
    fn test_libs_index_third_column_unique() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("indices.csv");
        fs::write(
            &path,
            concat!(
                "& logical entry ; period ; file\n",
                "VAZOES-MEDIAS ; 2025 ; libs/vazoes.dat \n",
                "POLINJUS ; 2025 ; polinjus.csv & trailing note\n",
                "VAZOES-MINIMAS ; 2025 ; libs/vazoes.dat\n",
                "short;line\n",
            ),
        )
        .unwrap();

        let names = read_libs_index(&path).unwrap();
        assert_eq!(names, vec!["libs/vazoes.dat", "polinjus.csv"]);
    }
}
