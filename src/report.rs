//! Report document and console summary.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use ::time::{format_description::well_known, OffsetDateTime};
use serde::Serialize;

use crate::error::ReportWriteError;
use crate::types::{BatchEntry, BatchResult, TargetScanResult};

pub const FORMAT_VERSION: &str = "1.0";

/// RFC 3339 UTC timestamp.
pub fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&well_known::Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}

/// `30.0 seconds`, `1.5 minutes`, `1.0 hours`. Exactly 60 and 3600 seconds
/// already use the larger unit.
pub fn format_duration(seconds: f64) -> String {
    if seconds < 60.0 {
        format!("{seconds:.1} seconds")
    } else if seconds < 3600.0 {
        format!("{:.1} minutes", seconds / 60.0)
    } else {
        format!("{:.1} hours", seconds / 3600.0)
    }
}

/// `sniffy_report_<unix-seconds>.json` in the working directory.
pub fn default_output_path() -> PathBuf {
    let ts = OffsetDateTime::now_utc().unix_timestamp();
    PathBuf::from(format!("sniffy_report_{ts}.json"))
}

/// Results of a run: one target, or a whole scope.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ScanResults {
    Single(Box<TargetScanResult>),
    Batch(BatchResult),
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportMetadata {
    pub generated_at: String,
    pub generator: String,
    pub format_version: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportDocument {
    pub metadata: ReportMetadata,
    pub scan_results: ScanResults,
}

impl ReportDocument {
    pub fn new(scan_results: ScanResults) -> Self {
        Self {
            metadata: ReportMetadata {
                generated_at: now_rfc3339(),
                generator: format!("sniffy-rs {}", env!("CARGO_PKG_VERSION")),
                format_version: FORMAT_VERSION.to_string(),
            },
            scan_results,
        }
    }
}

/// Write the document as pretty JSON.
pub fn write_report(path: &Path, doc: &ReportDocument) -> Result<(), ReportWriteError> {
    let io_err = |source| ReportWriteError::Io {
        path: path.to_path_buf(),
        source,
    };
    let file = File::create(path).map_err(io_err)?;
    let mut out = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut out, doc).map_err(|source| ReportWriteError::Serialize {
        path: path.to_path_buf(),
        source,
    })?;
    out.write_all(b"\n").map_err(io_err)?;
    out.flush().map_err(io_err)
}

/// One row of the console summary.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryRow {
    pub target: String,
    pub hosts: String,
    pub open_ports: String,
    pub services: String,
    pub findings: String,
    pub risk: String,
    pub duration: String,
}

impl SummaryRow {
    pub fn from_result(target: &str, r: &TargetScanResult) -> Self {
        let hosts = match r.discovery.ok() {
            Some(d) => d.hosts_discovered.len().to_string(),
            None => "failed".into(),
        };
        let services = match &r.services {
            None => "-".into(),
            Some(p) => p
                .ok()
                .map(|s| s.services.len().to_string())
                .unwrap_or_else(|| "failed".into()),
        };
        let findings = r
            .vulnerabilities
            .ok()
            .map(|v| v.vulnerabilities.len().to_string())
            .unwrap_or_else(|| "failed".into());
        let risk = match r.vulnerabilities.ok() {
            Some(v) => format!("{} ({})", v.risk_level(), v.risk_score()),
            None => "-".into(),
        };
        Self {
            target: target.to_string(),
            hosts,
            open_ports: r.open_ports().len().to_string(),
            services,
            findings,
            risk,
            duration: r.scan_info.duration_human.clone(),
        }
    }

    pub fn from_entry(target: &str, entry: &BatchEntry) -> Self {
        match entry {
            BatchEntry::Completed(r) => Self::from_result(target, r),
            BatchEntry::Failed { error, kind } => Self {
                target: target.to_string(),
                hosts: "-".into(),
                open_ports: "-".into(),
                services: "-".into(),
                findings: "-".into(),
                risk: format!("{kind:?}").to_lowercase(),
                duration: error.clone(),
            },
        }
    }
}

pub fn summary_rows(results: &ScanResults) -> Vec<SummaryRow> {
    match results {
        ScanResults::Single(r) => vec![SummaryRow::from_result(&r.scan_info.target.key(), r)],
        ScanResults::Batch(b) => b
            .iter()
            .map(|(k, e)| SummaryRow::from_entry(k, e))
            .collect(),
    }
}

/// Aligned summary table on stdout.
pub fn print_summary(rows: &[SummaryRow]) {
    let headers = [
        "target", "hosts", "open", "services", "findings", "risk", "duration",
    ];
    let cells = |r: &SummaryRow| -> [String; 7] {
        [
            r.target.clone(),
            r.hosts.clone(),
            r.open_ports.clone(),
            r.services.clone(),
            r.findings.clone(),
            r.risk.clone(),
            truncate(&r.duration, 60),
        ]
    };

    let mut widths = headers.map(str::len);
    for row in rows {
        for (w, c) in widths.iter_mut().zip(cells(row)) {
            *w = (*w).max(c.chars().count());
        }
    }

    println!("\nScan summary: {} target(s)", rows.len());
    let line = |cols: [String; 7]| {
        let parts: Vec<String> = cols
            .iter()
            .zip(widths)
            .map(|(c, w)| format!("{c:<w$}"))
            .collect();
        println!("{}", parts.join("  ").trim_end());
    };
    line(headers.map(str::to_string));
    line(widths.map(|w| "-".repeat(w)));
    for row in rows {
        line(cells(row));
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}
