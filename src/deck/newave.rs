//! NEWAVE deck and report files
//!
//! The entry point `caso.dat` names the deck index file and, on its second
//! data line, the directory of the LP process manager. The index file maps
//! labeled roles to file names (`NOME DA ROLE  : file.dat`); roles are
//! matched by keyword so decks with slightly different label spellings keep
//! working. The general-data file (dger) is columnar: a 21-column label
//! field followed by the value.

use std::path::Path;

use super::{is_data_line, read_deck_file, write_deck_file};
use crate::error::{Error, Result};

/// Width of the label column in the general-data file
const LABEL_WIDTH: usize = 21;

/// Table header written once simulated operation costs were produced
const SIMULATED_COSTS_HEADER: &str = "CUSTO DE OPERACAO DAS SERIES SIMULADAS";

/// `caso.dat`: deck index name plus the process manager location
pub struct CaseFile {
    lines: Vec<String>,
}

impl CaseFile {
    pub fn read(path: &Path) -> Result<Self> {
        let content = read_deck_file(path)?;
        Ok(Self {
            lines: content.lines().map(str::to_string).collect(),
        })
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        write_deck_file(path, &self.lines)
    }

    fn data_positions(&self) -> Vec<usize> {
        self.lines
            .iter()
            .enumerate()
            .filter(|(_, line)| is_data_line(line))
            .map(|(idx, _)| idx)
            .collect()
    }

    /// Name of the deck index file, the first data line
    pub fn index_name(&self) -> Result<&str> {
        self.data_positions()
            .first()
            .map(|&idx| self.lines[idx].trim())
            .ok_or_else(|| Error::NotFound("no content found in case file".to_string()))
    }

    /// Directory holding the LP process manager, the second data line
    pub fn process_manager(&self) -> Option<&str> {
        self.data_positions()
            .get(1)
            .map(|&idx| self.lines[idx].trim())
    }

    pub fn set_process_manager(&mut self, path: &str) {
        match self.data_positions().get(1) {
            Some(&idx) => self.lines[idx] = path.to_string(),
            None => self.lines.push(path.to_string()),
        }
    }
}

/// Deck index: labeled role, colon, file name
pub struct IndexFile {
    entries: Vec<(String, String)>,
}

impl IndexFile {
    pub fn read(path: &Path) -> Result<Self> {
        let content = read_deck_file(path)?;
        let entries = content
            .lines()
            .filter(|line| is_data_line(line))
            .filter_map(|line| line.split_once(':'))
            .map(|(label, value)| (label.trim().to_string(), value.trim().to_string()))
            .collect();
        Ok(Self { entries })
    }

    /// File registered under the first role whose label contains `keyword`
    pub fn file_for(&self, keyword: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(label, _)| label.contains(keyword))
            .map(|(_, value)| value.as_str())
    }

    fn required(&self, keyword: &str) -> Result<&str> {
        self.file_for(keyword)
            .ok_or_else(|| Error::Validation(format!("deck index has no {keyword} entry")))
    }

    pub fn general_data(&self) -> Result<&str> {
        self.required("DADOS GERAIS")
    }

    pub fn pmo(&self) -> Result<&str> {
        self.required("PMO")
    }

    pub fn parp(&self) -> Option<&str> {
        self.file_for("PARP")
    }

    pub fn final_simulation(&self) -> Option<&str> {
        self.file_for("SIMULACAO FINAL")
    }

    pub fn cuts_header(&self) -> Option<&str> {
        self.file_for("CABECALHO CORTES")
    }

    pub fn cuts(&self) -> Option<&str> {
        self.file_for("CORTES DE BENDERS")
    }

    pub fn forward_header(&self) -> Option<&str> {
        self.file_for("CABECALHO FORWARD")
    }

    pub fn forward(&self) -> Option<&str> {
        self.entries
            .iter()
            .find(|(label, _)| label.contains("FORWARD") && !label.contains("CABECALHO"))
            .map(|(_, value)| value.as_str())
    }

    pub fn dispatch(&self) -> Option<&str> {
        self.file_for("DESPACHO")
    }

    /// Every file the index references, in deck order
    pub fn all_files(&self) -> Vec<&str> {
        self.entries.iter().map(|(_, value)| value.as_str()).collect()
    }

    /// Files the deck consumes: the index minus the roles the run writes
    pub fn input_files(&self) -> Vec<&str> {
        let outputs = [
            self.pmo().ok(),
            self.parp(),
            self.final_simulation(),
            self.cuts_header(),
            self.cuts(),
            self.forward_header(),
            self.forward(),
            self.dispatch(),
        ];
        self.all_files()
            .into_iter()
            .filter(|file| !outputs.contains(&Some(*file)))
            .collect()
    }
}

/// General-data file (dger): fixed-width label column, then the value
pub struct GeneralData {
    lines: Vec<String>,
}

impl GeneralData {
    pub fn read(path: &Path) -> Result<Self> {
        let content = read_deck_file(path)?;
        Ok(Self {
            lines: content.lines().map(str::to_string).collect(),
        })
    }

    /// Value of the first line whose label column contains `keyword`
    pub fn value_of(&self, keyword: &str) -> Option<&str> {
        self.lines.iter().find_map(|line| {
            if !is_data_line(line) || line.len() <= LABEL_WIDTH || !line.is_char_boundary(LABEL_WIDTH)
            {
                return None;
            }
            let (label, value) = line.split_at(LABEL_WIDTH);
            if label.contains(keyword) {
                Some(value.trim())
            } else {
                None
            }
        })
    }

    fn numeric(&self, keyword: &str) -> Result<i64> {
        let value = self
            .value_of(keyword)
            .ok_or_else(|| Error::Validation(format!("dger has no {keyword} line")))?;
        value
            .split_whitespace()
            .next()
            .and_then(|token| token.parse().ok())
            .ok_or_else(|| {
                Error::Validation(format!("dger {keyword} value is not numeric: {value}"))
            })
    }

    pub fn case_name(&self) -> Option<&str> {
        self.value_of("NOME DO CASO")
    }

    pub fn start_month(&self) -> Result<u32> {
        Ok(self.numeric("MES INICIO DO ESTUDO")? as u32)
    }

    pub fn start_year(&self) -> Result<i32> {
        Ok(self.numeric("ANO INICIO DO ESTUDO")? as i32)
    }

    pub fn study_years(&self) -> Result<u32> {
        Ok(self.numeric("ANOS DO ESTUDO")? as u32)
    }

    pub fn pre_study_years(&self) -> Result<u32> {
        Ok(self.numeric("ANOS PRE")? as u32)
    }

    pub fn post_study_years(&self) -> Result<u32> {
        Ok(self.numeric("ANOS POS")? as u32)
    }
}

/// Main execution report (pmo)
pub struct Pmo {
    text: String,
}

impl Pmo {
    pub fn read(path: &Path) -> Result<Self> {
        Ok(Self {
            text: read_deck_file(path)?,
        })
    }

    /// Whether the simulated operation cost table was written
    pub fn has_simulated_operation_costs(&self) -> bool {
        self.text.contains(SIMULATED_COSTS_HEADER)
    }
}
