//! Terminal outcome of one model execution
//!
//! Produced once by the diagnosis stage, written to the status marker file
//! and the metadata record, and read back by the upload stage. Strings on
//! the wire are the upper-case token names; anything unrecognized parses to
//! `Unknown` so a truncated or hand-edited marker file never aborts a
//! later stage.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Outcome of a model execution as diagnosed from its output files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Success,
    Infeasible,
    DataError,
    RuntimeError,
    CommunicationError,
    Unknown,
}

impl RunStatus {
    /// Wire token written to the marker file and the metadata record.
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "SUCCESS",
            RunStatus::Infeasible => "INFEASIBLE",
            RunStatus::DataError => "DATA_ERROR",
            RunStatus::RuntimeError => "RUNTIME_ERROR",
            RunStatus::CommunicationError => "COMMUNICATION_ERROR",
            RunStatus::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim() {
            "SUCCESS" => RunStatus::Success,
            "INFEASIBLE" => RunStatus::Infeasible,
            "DATA_ERROR" => RunStatus::DataError,
            "RUNTIME_ERROR" => RunStatus::RuntimeError,
            "COMMUNICATION_ERROR" => RunStatus::CommunicationError,
            _ => RunStatus::Unknown,
        })
    }
}
