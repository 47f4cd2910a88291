//! DESSEM deck and report files
//!
//! The entry point `dessem.arq` is a register index: each data line starts
//! with a register name and carries the value (usually a file name) in the
//! rest of the line. The CASO register holds the extension the program
//! appends to its reports, `DAT` by default. Execution options such as the
//! unit-commitment parallelism level live in a separate options file
//! (DESSOPC when registered, OPERUT otherwise).

use std::path::Path;

use super::{is_data_line, read_deck_file, register_of, write_deck_file};
use crate::error::Result;

/// Default report extension when the CASO register carries no value
const DEFAULT_EXTENSION: &str = "DAT";

/// Section header written once the program finished a solve
const PROCESSING_TIME_HEADER: &str = "TEMPO TOTAL DE PROCESSAMENTO";

/// Registers whose values name deck input files
const INPUT_REGISTERS: [&str; 26] = [
    "VAZOES", "DADGER", "MAPFCF", "CORTFCF", "CADUSIH", "OPERUH", "DEFLANT", "CADTERM", "OPERUT",
    "INDELET", "ILSTRI", "COTASR11", "AREACONT", "RESPOT", "MLT", "CURVTVIAG", "PTOPER", "INFOFCF",
    "REE", "EOLICA", "RAMPAS", "RSTLPP", "RESTSEG", "RESPOTELE", "UCH", "DESSOPC",
];

/// Register index (`dessem.arq`)
pub struct RegisterIndex {
    lines: Vec<String>,
}

impl RegisterIndex {
    pub fn read(path: &Path) -> Result<Self> {
        let content = read_deck_file(path)?;
        Ok(Self {
            lines: content.lines().map(str::to_string).collect(),
        })
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        write_deck_file(path, &self.lines)
    }

    fn find(&self, register: &str) -> Option<usize> {
        self.lines.iter().position(|line| {
            is_data_line(line)
                && register_of(line).is_some_and(|name| name.eq_ignore_ascii_case(register))
        })
    }

    /// Value of a register: the rest of the line after the name, trimmed
    pub fn value_of(&self, register: &str) -> Option<&str> {
        let idx = self.find(register)?;
        let line = self.lines[idx].trim_start();
        let name_len = register_of(line).map(str::len)?;
        let value = line[name_len..].trim();
        (!value.is_empty()).then_some(value)
    }

    /// Rewrites the value of an existing register, keeping its position
    pub fn set_value(&mut self, register: &str, value: &str) -> bool {
        match self.find(register) {
            Some(idx) => {
                let name = register_of(&self.lines[idx])
                    .unwrap_or(register)
                    .to_string();
                self.lines[idx] = format!("{name:<12}{value}");
                true
            }
            None => false,
        }
    }

    pub fn title(&self) -> Option<&str> {
        self.value_of("TITULO")
    }

    pub fn set_title(&mut self, title: &str) -> bool {
        self.set_value("TITULO", title)
    }

    /// Report extension from the CASO register
    pub fn extension(&self) -> &str {
        self.value_of("CASO").unwrap_or(DEFAULT_EXTENSION)
    }

    pub fn has_register(&self, register: &str) -> bool {
        self.find(register).is_some()
    }

    /// Values of every input-file register present in the index
    pub fn input_files(&self) -> Vec<&str> {
        INPUT_REGISTERS
            .iter()
            .filter_map(|register| self.value_of(register))
            .collect()
    }
}

/// Execution options file (DESSOPC or OPERUT)
pub struct OptionsFile {
    lines: Vec<String>,
}

impl OptionsFile {
    pub fn read(path: &Path) -> Result<Self> {
        let content = read_deck_file(path)?;
        Ok(Self {
            lines: content.lines().map(str::to_string).collect(),
        })
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        write_deck_file(path, &self.lines)
    }

    fn find_uctpar(&self) -> Option<usize> {
        self.lines.iter().position(|line| {
            is_data_line(line)
                && register_of(line).is_some_and(|name| name.eq_ignore_ascii_case("UCTPAR"))
        })
    }

    /// Unit-commitment parallelism level, when the option is present
    pub fn uctpar(&self) -> Option<u32> {
        let idx = self.find_uctpar()?;
        self.lines[idx]
            .split_whitespace()
            .nth(1)
            .and_then(|token| token.parse().ok())
    }

    /// Rewrites the UCTPAR option; returns false when the deck has none
    pub fn set_uctpar(&mut self, cores: u32) -> bool {
        match self.find_uctpar() {
            Some(idx) => {
                self.lines[idx] = format!("UCTPAR  {cores}");
                true
            }
            None => false,
        }
    }
}

/// Execution log report (DES_LOG_RELATO)
pub struct ExecutionLog {
    text: String,
}

impl ExecutionLog {
    pub fn read(path: &Path) -> Result<Self> {
        Ok(Self {
            text: read_deck_file(path)?,
        })
    }

    pub fn contains(&self, marker: &str) -> bool {
        self.text.contains(marker)
    }

    /// Whether the program got far enough to report its processing time
    pub fn has_processing_time(&self) -> bool {
        self.contains(PROCESSING_TIME_HEADER)
    }
}
