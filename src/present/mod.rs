//! Rendering of client snapshots
//!
//! Presenters only ever see a [`Snapshot`]: an owned copy of the alive
//! clients taken between scans, so rendering can never observe a registry
//! in the middle of an update.

mod aggregate;
mod dashboard;
mod structured;

pub use dashboard::{percent_bar, ConsoleSize, Dashboard};
pub use structured::{client_samples, ClientSample, EngineUsage, StructuredFormat, StructuredWriter};

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::client::Client;
use crate::error::Error;
use crate::sort::{sort_clients, SortKey};

/// Immutable copy of the alive clients after a scan
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// Alive clients in registry order
    pub clients: Vec<Client>,
    /// Wall-clock time covered by the last scan period
    pub elapsed: Duration,
    /// Widest PID string among the clients
    pub max_pid_len: usize,
    /// Widest printable process name among the clients
    pub max_name_len: usize,
}

impl Snapshot {
    /// Re-sort the copied clients
    pub fn sort(&mut self, key: SortKey) {
        sort_clients(&mut self.clients, key);
    }

    /// Number of clients in the snapshot
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// True if the snapshot holds no client
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

/// Where and how samples are emitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// Full-screen terminal dashboard
    #[default]
    Interactive,
    /// One text line per client
    Text,
    /// Comma separated values
    Csv,
    /// One JSON object per client per line
    Json,
}

impl OutputMode {
    /// Structured format for non-interactive modes
    pub fn structured(self) -> Option<StructuredFormat> {
        match self {
            OutputMode::Interactive => None,
            OutputMode::Text => Some(StructuredFormat::Text),
            OutputMode::Csv => Some(StructuredFormat::Csv),
            OutputMode::Json => Some(StructuredFormat::Json),
        }
    }
}

impl fmt::Display for OutputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OutputMode::Interactive => "interactive",
            OutputMode::Text => "text",
            OutputMode::Csv => "csv",
            OutputMode::Json => "json",
        };
        f.write_str(name)
    }
}

impl FromStr for OutputMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "interactive" => Ok(OutputMode::Interactive),
            "text" => Ok(OutputMode::Text),
            "csv" => Ok(OutputMode::Csv),
            "json" => Ok(OutputMode::Json),
            other => Err(Error::invalid_config(format!("unknown output mode '{other}'"))),
        }
    }
}
