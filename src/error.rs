//! Error taxonomy.
//!
//! Only [`InvalidTargetError`], [`ScopeLoadError`], [`ConfigError`] and
//! [`ReportWriteError`] ever reach the top level. [`ProbeError`] stops at the
//! phase boundary (it becomes `PhaseResult::Failed`) and [`TargetFatalError`]
//! stops at the scheduler boundary (it becomes a per-target batch entry).

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// The input matched none of: IP address, CIDR block, hostname.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid target format: {input:?}")]
pub struct InvalidTargetError {
    pub input: String,
}

#[derive(Debug, Error)]
pub enum ScopeLoadError {
    #[error("failed to read scope file {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("scope file {}, line {line}: {source}", path.display())]
    Target {
        path: PathBuf,
        line: usize,
        source: InvalidTargetError,
    },
    #[error("scope file {} contains no targets", path.display())]
    Empty { path: PathBuf },
}

/// Failure reported by an external scanning capability.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("could not resolve {0}")]
    Resolve(String),
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("http error: {0}")]
    Http(String),
    #[error("{tool} failed: {message}")]
    Tool { tool: String, message: String },
}

impl From<reqwest::Error> for ProbeError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProbeError::Http(format!("request timed out: {e}"))
        } else {
            ProbeError::Http(e.to_string())
        }
    }
}

/// A target could not be driven through the pipeline at all.
#[derive(Debug, Clone, Error)]
pub enum TargetFatalError {
    #[error("range {range} expands to {hosts} hosts (limit {limit})")]
    RangeTooLarge { range: String, hosts: u128, limit: usize },
    #[error("scan task aborted: {0}")]
    Panicked(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to parse config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum ReportWriteError {
    #[error("failed to write report {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
    #[error("failed to serialise report {}: {source}", path.display())]
    Serialize {
        path: PathBuf,
        source: serde_json::Error,
    },
}
