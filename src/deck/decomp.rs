//! DECOMP deck and report files
//!
//! The entry point is `caso.dat`, whose single data line names the deck
//! index file. That name (`rv0`, `rv1`, ...) doubles as the revision
//! extension the program appends to every report it writes, so the index
//! file `rv0` sits next to `relato.rv0` and `inviab_unic.rv0`.
//!
//! The general-data file (dadger) is a register file: every data line starts
//! with a two-letter mnemonic followed by whitespace-separated fields. Only
//! the registers the pipeline edits or inspects are interpreted here.

use std::collections::HashSet;
use std::path::Path;

use chrono::NaiveDate;

use super::{is_data_line, read_deck_file, register_of, write_deck_file};
use crate::error::{Error, Result};

/// Section header preceding final-simulation infeasibility rows
const FINAL_SIMULATION_HEADER: &str = "INVIABILIDADES DA SIMULACAO FINAL";

/// Table header written when the run produced average marginal costs
const AVERAGE_CMO_HEADER: &str = "CMO MEDIO (R$/MWh)";

/// `caso.dat`: names the deck index file and the report extension
pub struct CaseFile {
    extension: String,
}

impl CaseFile {
    pub fn read(path: &Path) -> Result<Self> {
        let content = read_deck_file(path)?;
        let extension = content
            .lines()
            .find(|line| is_data_line(line))
            .map(|line| line.trim().to_string())
            .ok_or_else(|| {
                Error::NotFound(format!("no content found in {}", path.display()))
            })?;
        Ok(Self { extension })
    }

    /// Index file name, also the extension of every report file
    pub fn extension(&self) -> &str {
        &self.extension
    }
}

/// Deck index: one referenced file per data line, dadger first
pub struct IndexFile {
    files: Vec<String>,
}

impl IndexFile {
    pub fn read(path: &Path) -> Result<Self> {
        let content = read_deck_file(path)?;
        let files = content
            .lines()
            .filter(|line| is_data_line(line))
            .filter_map(|line| line.split_whitespace().last())
            .map(str::to_string)
            .collect();
        Ok(Self { files })
    }

    /// Name of the general-data file, always the first index entry
    pub fn dadger(&self) -> Result<&str> {
        self.files
            .first()
            .map(String::as_str)
            .ok_or_else(|| Error::Validation("deck index lists no files".to_string()))
    }

    /// Every file the index references, in deck order
    pub fn files(&self) -> &[String] {
        &self.files
    }
}

/// General-data register file (dadger)
pub struct Dadger {
    lines: Vec<String>,
}

impl Dadger {
    pub fn read(path: &Path) -> Result<Self> {
        let content = read_deck_file(path)?;
        Ok(Self {
            lines: content.lines().map(str::to_string).collect(),
        })
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        write_deck_file(path, &self.lines)
    }

    fn find(&self, mnemonic: &str) -> Option<usize> {
        self.lines
            .iter()
            .position(|line| is_data_line(line) && register_of(line) == Some(mnemonic))
    }

    /// Study title from the TE register
    pub fn title(&self) -> Option<&str> {
        let idx = self.find("TE")?;
        Some(self.lines[idx].trim_start()["TE".len()..].trim())
    }

    pub fn set_title(&mut self, title: &str) -> Result<()> {
        let idx = self
            .find("TE")
            .ok_or_else(|| Error::Validation("TE register not found in dadger".to_string()))?;
        self.lines[idx] = format!("TE  {title}");
        Ok(())
    }

    /// Study starting date from the DT register (day, month, year fields)
    pub fn study_start(&self) -> Result<NaiveDate> {
        let idx = self
            .find("DT")
            .ok_or_else(|| Error::Validation("DT register not found in dadger".to_string()))?;
        let tokens: Vec<&str> = self.lines[idx].split_whitespace().collect();
        if tokens.len() < 4 {
            return Err(Error::Validation(
                "DT register with incomplete information".to_string(),
            ));
        }
        let parse = |token: &str, field: &str| {
            token.parse::<u32>().map_err(|_| {
                Error::Validation(format!("DT register holds an invalid {field}: {token}"))
            })
        };
        let day = parse(tokens[1], "day")?;
        let month = parse(tokens[2], "month")?;
        let year = parse(tokens[3], "year")?;
        NaiveDate::from_ymd_opt(year as i32, month, day).ok_or_else(|| {
            Error::Validation(format!("DT register holds an invalid date: {day}/{month}/{year}"))
        })
    }

    /// Total study length in hours, summing block durations over DP registers
    ///
    /// Each stage repeats one DP register per subsystem with identical
    /// durations; only the first register of each stage is counted. Fields
    /// after the three header fields come in (load, duration) pairs.
    pub fn total_stage_hours(&self) -> f64 {
        let mut seen = HashSet::new();
        let mut total = 0.0;
        for line in &self.lines {
            if !is_data_line(line) || register_of(line) != Some("DP") {
                continue;
            }
            let tokens: Vec<&str> = line.split_whitespace().collect();
            if tokens.len() < 4 || !seen.insert(tokens[1].to_string()) {
                continue;
            }
            for pair in tokens[4..].chunks_exact(2) {
                if let Ok(hours) = pair[1].parse::<f64>() {
                    total += hours;
                }
            }
        }
        total
    }

    /// Path carried by the FC register of the given kind (NEWV21, NEWCUT)
    pub fn cut_path(&self, kind: &str) -> Option<&str> {
        self.lines.iter().find_map(|line| {
            if !is_data_line(line) || register_of(line) != Some("FC") {
                return None;
            }
            let mut tokens = line.split_whitespace().skip(1);
            if tokens.next() == Some(kind) {
                tokens.next()
            } else {
                None
            }
        })
    }

    pub fn set_cut_path(&mut self, kind: &str, path: &str) -> Result<()> {
        let idx = self
            .lines
            .iter()
            .position(|line| {
                is_data_line(line)
                    && register_of(line) == Some("FC")
                    && line.split_whitespace().nth(1) == Some(kind)
            })
            .ok_or_else(|| {
                Error::Validation(format!("FC {kind} register not found in dadger"))
            })?;
        self.lines[idx] = format!("FC  {kind}  {path}");
        Ok(())
    }

    /// Whether any HE (minimum stored energy constraint) register is present
    pub fn has_he(&self) -> bool {
        self.find("HE").is_some()
    }

    /// File referenced by a single-file register such as FA, FJ or VT
    pub fn file_reference(&self, mnemonic: &str) -> Option<&str> {
        let idx = self.find(mnemonic)?;
        self.lines[idx].split_whitespace().nth(1)
    }
}

/// Main execution report (relato)
pub struct Relato {
    text: String,
}

impl Relato {
    pub fn read(path: &Path) -> Result<Self> {
        Ok(Self {
            text: read_deck_file(path)?,
        })
    }

    /// Whether the report contains the given marker text anywhere
    pub fn contains(&self, marker: &str) -> bool {
        self.text.contains(marker)
    }

    /// Whether the average marginal cost table was written
    ///
    /// The table only appears once the run got past its final simulation, so
    /// its absence means the program stopped before producing results.
    pub fn has_average_marginal_costs(&self) -> bool {
        self.contains(AVERAGE_CMO_HEADER)
    }
}

/// Infeasibility report (inviab_unic / inviab)
///
/// Holds the restriction messages of the final-simulation section, when the
/// report has one. Rows run from the section header to the first blank line.
pub struct InviabReport {
    final_simulation: Option<Vec<String>>,
}

impl InviabReport {
    pub fn read(path: &Path) -> Result<Self> {
        let content = read_deck_file(path)?;
        let mut final_simulation = None;
        let mut in_section = false;
        for line in content.lines() {
            if line.contains(FINAL_SIMULATION_HEADER) {
                in_section = true;
                final_simulation = Some(Vec::new());
                continue;
            }
            if !in_section {
                continue;
            }
            if line.trim().is_empty() {
                in_section = false;
            } else if is_data_line(line) {
                if let Some(rows) = final_simulation.as_mut() {
                    rows.push(line.trim().to_string());
                }
            }
        }
        Ok(Self { final_simulation })
    }

    /// Restriction messages of the final simulation, if the section exists
    pub fn final_simulation_rows(&self) -> Option<&[String]> {
        self.final_simulation.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const DADGER: &str = "\
&  general data file
TE  PMO MAY 2025 - OFFICIAL STUDY
DT  28  3  2025
DP  1  1  3  7000.0  32.0  6000.0  41.0  5000.0  95.0
DP  1  2  3  3000.0  32.0  2500.0  41.0  2000.0  95.0
DP  2  1  3  7100.0  32.0  6100.0  41.0  5100.0  95.0
FC  NEWV21  ../cortesh.dat
FC  NEWCUT  ../cortes.dat
FA  indices.csv
HE  1  2  80.0
";

    fn write_file(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_case_file_extension() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "caso.dat", "& deck revision\nrv0\n");
        let caso = CaseFile::read(&path).unwrap();
        assert_eq!(caso.extension(), "rv0");
    }

    #[test]
    fn test_empty_case_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "caso.dat", "& nothing here\n");
        assert!(matches!(CaseFile::read(&path), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_index_file_takes_last_token() {
        let dir = TempDir::new().unwrap();
        let path = write_file(
            &dir,
            "rv0",
            "GERAL     dadger.rv0\nVAZOES    vazoes.rv0\nHIDR      hidr.dat\n",
        );
        let index = IndexFile::read(&path).unwrap();
        assert_eq!(index.dadger().unwrap(), "dadger.rv0");
        assert_eq!(index.files(), &["dadger.rv0", "vazoes.rv0", "hidr.dat"]);
    }

    #[test]
    fn test_empty_index_has_no_dadger() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "rv0", "& empty\n");
        let index = IndexFile::read(&path).unwrap();
        assert!(matches!(index.dadger(), Err(Error::Validation(_))));
    }

    #[test]
    fn test_dadger_title() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "dadger.rv0", DADGER);
        let dadger = Dadger::read(&path).unwrap();
        assert_eq!(dadger.title(), Some("PMO MAY 2025 - OFFICIAL STUDY"));
    }

    #[test]
    fn test_dadger_set_title_rewrites_only_te() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "dadger.rv0", DADGER);
        let mut dadger = Dadger::read(&path).unwrap();
        dadger.set_title("backtest-42").unwrap();
        dadger.write(&path).unwrap();

        let rewritten = Dadger::read(&path).unwrap();
        assert_eq!(rewritten.title(), Some("backtest-42"));
        assert_eq!(
            rewritten.study_start().unwrap(),
            NaiveDate::from_ymd_opt(2025, 3, 28).unwrap()
        );
    }

    #[test]
    fn test_dadger_study_start() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "dadger.rv0", DADGER);
        let dadger = Dadger::read(&path).unwrap();
        assert_eq!(
            dadger.study_start().unwrap(),
            NaiveDate::from_ymd_opt(2025, 3, 28).unwrap()
        );
    }

    #[test]
    fn test_dadger_without_dt_is_invalid() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "dadger.rv0", "TE  NO DATE HERE\n");
        let dadger = Dadger::read(&path).unwrap();
        assert!(matches!(dadger.study_start(), Err(Error::Validation(_))));
    }

    #[test]
    fn test_total_stage_hours_counts_each_stage_once() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "dadger.rv0", DADGER);
        let dadger = Dadger::read(&path).unwrap();
        // Stages 1 and 2, one week each: 2 * (32 + 41 + 95)
        assert_eq!(dadger.total_stage_hours(), 336.0);
    }

    #[test]
    fn test_cut_paths() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "dadger.rv0", DADGER);
        let mut dadger = Dadger::read(&path).unwrap();
        assert_eq!(dadger.cut_path("NEWV21"), Some("../cortesh.dat"));

        dadger.set_cut_path("NEWCUT", "cortes-040.dat").unwrap();
        assert_eq!(dadger.cut_path("NEWCUT"), Some("cortes-040.dat"));
        assert_eq!(dadger.cut_path("NEWV21"), Some("../cortesh.dat"));
    }

    #[test]
    fn test_missing_fc_register_is_invalid() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "dadger.rv0", "TE  TITLE\n");
        let mut dadger = Dadger::read(&path).unwrap();
        assert!(matches!(
            dadger.set_cut_path("NEWV21", "cortesh.dat"),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_he_register_and_file_references() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "dadger.rv0", DADGER);
        let dadger = Dadger::read(&path).unwrap();
        assert!(dadger.has_he());
        assert_eq!(dadger.file_reference("FA"), Some("indices.csv"));
        assert_eq!(dadger.file_reference("FJ"), None);
    }

    #[test]
    fn test_relato_markers() {
        let dir = TempDir::new().unwrap();
        let path = write_file(
            &dir,
            "relato.rv0",
            "RELATORIO DE EXECUCAO\n   CMO MEDIO (R$/MWh)\n   SE  312.4\n",
        );
        let relato = Relato::read(&path).unwrap();
        assert!(relato.has_average_marginal_costs());
        assert!(!relato.contains("ERRO(S) DE ENTRADA DE DADOS"));
    }

    #[test]
    fn test_inviab_without_final_section() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "inviab_unic.rv0", "INVIABILIDADES DAS ITERACOES\nRHQ 207\n");
        let report = InviabReport::read(&path).unwrap();
        assert!(report.final_simulation_rows().is_none());
    }

    #[test]
    fn test_inviab_final_section_rows_stop_at_blank_line() {
        let dir = TempDir::new().unwrap();
        let content = "\
INVIABILIDADES DAS ITERACOES
RHQ 207

INVIABILIDADES DA SIMULACAO FINAL
DEFICIT SUBSISTEMA SE
RHE 123

TRAILING SECTION
IGNORED ROW
";
        let path = write_file(&dir, "inviab_unic.rv0", content);
        let report = InviabReport::read(&path).unwrap();
        assert_eq!(
            report.final_simulation_rows().unwrap(),
            &["DEFICIT SUBSISTEMA SE", "RHE 123"]
        );
    }

    #[test]
    fn test_inviab_empty_final_section() {
        let dir = TempDir::new().unwrap();
        let path = write_file(
            &dir,
            "inviab_unic.rv0",
            "INVIABILIDADES DA SIMULACAO FINAL\n\n",
        );
        let report = InviabReport::read(&path).unwrap();
        assert_eq!(report.final_simulation_rows().unwrap().len(), 0);
    }
}
