//! Result tree produced by a scan.
//!
//! Field names are part of the report contract: downstream renderers key off
//! `scan_info.target`, `network.open_ports`, `web.web_services`,
//! `vulnerabilities.risk_score` and friends.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::net::IpAddr;

use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};

use crate::error::ProbeError;
use crate::ports::PortRange;
use crate::target::{Host, Target};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PortState {
    Open,
    Closed,
    Filtered,
}

/// One port observed on one host.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PortFinding {
    pub host: Host,
    pub port: u16,
    pub protocol: Protocol,
    pub state: PortState,
    pub service_name: Option<String>,
    pub product: Option<String>,
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub banner: Option<String>,
}

impl PortFinding {
    pub fn is_open(&self) -> bool {
        self.state == PortState::Open
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct OsMatch {
    pub host: Host,
    pub name: String,
    pub accuracy: u8,
}

/// Protocol-specific enumeration output.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ServiceDetails {
    Http {
        status_code: Option<u16>,
        server: Option<String>,
        powered_by: Option<String>,
        content_length: Option<u64>,
        error: Option<String>,
    },
    Ftp {
        anonymous_login: bool,
        welcome_message: Option<String>,
        error: Option<String>,
    },
    Ssh {
        version: Option<String>,
        error: Option<String>,
    },
    Smb {
        shares: Vec<String>,
        error: Option<String>,
    },
    Unknown {
        raw: BTreeMap<String, String>,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ServiceFinding {
    pub host: Host,
    pub port: u16,
    pub service: String,
    pub banner: Option<String>,
    pub details: ServiceDetails,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Technologies {
    pub server: Option<String>,
    pub frameworks: BTreeSet<String>,
    pub cms: BTreeSet<String>,
    #[serde(rename = "javascript")]
    pub client_libs: BTreeSet<String>,
}

impl Technologies {
    pub fn is_empty(&self) -> bool {
        self.server.is_none()
            && self.frameworks.is_empty()
            && self.cms.is_empty()
            && self.client_libs.is_empty()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct WebFinding {
    pub url: String,
    pub status_code: u16,
    pub title: Option<String>,
    pub server: Option<String>,
    pub content_length: u64,
    pub headers: BTreeMap<String, String>,
    pub technologies: Technologies,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DirectoryFinding {
    pub url: String,
    pub status_code: u16,
    pub content_length: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Contribution of one finding to the risk score.
    pub fn weight(self) -> u32 {
        match self {
            Severity::Low => 5,
            Severity::Medium => 10,
            Severity::High => 20,
            Severity::Critical => 40,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Vulnerability {
    #[serde(rename = "type")]
    pub kind: String,
    pub severity: Severity,
    pub url_or_host: String,
    pub description: String,
    pub recommendation: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn from_score(score: u8) -> Self {
        match score {
            70.. => RiskLevel::Critical,
            50..=69 => RiskLevel::High,
            30..=49 => RiskLevel::Medium,
            _ => RiskLevel::Low,
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RiskLevel::Low => "Low",
            RiskLevel::Medium => "Medium",
            RiskLevel::High => "High",
            RiskLevel::Critical => "Critical",
        };
        f.write_str(s)
    }
}

/// Sum of severity weights, capped at 100.
pub fn risk_score(findings: &[Vulnerability]) -> u8 {
    let total: u32 = findings.iter().map(|v| v.severity.weight()).sum();
    total.min(100) as u8
}

/// Outcome of one phase for one target. A phase that gathered some data
/// before hitting an error reports `Ok` and lists the error inside its output.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PhaseResult<T> {
    Ok(T),
    Failed { error: String },
}

impl<T> PhaseResult<T> {
    pub fn failed(reason: impl Into<String>) -> Self {
        PhaseResult::Failed {
            error: reason.into(),
        }
    }

    pub fn from_probe(result: Result<T, ProbeError>) -> Self {
        match result {
            Ok(v) => PhaseResult::Ok(v),
            Err(e) => PhaseResult::failed(e.to_string()),
        }
    }

    pub fn ok(&self) -> Option<&T> {
        match self {
            PhaseResult::Ok(v) => Some(v),
            PhaseResult::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            PhaseResult::Ok(_) => None,
            PhaseResult::Failed { error } => Some(error),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, PhaseResult::Ok(_))
    }

    pub fn is_failed(&self) -> bool {
        !self.is_ok()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Discovery,
    PortScan,
    ServiceEnum,
    WebProbe,
    VulnAssess,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Discovery => "discovery",
            Phase::PortScan => "port scan",
            Phase::ServiceEnum => "service enumeration",
            Phase::WebProbe => "web probe",
            Phase::VulnAssess => "vulnerability assessment",
        };
        f.write_str(s)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct DiscoveryOutput {
    pub hosts_discovered: Vec<Host>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct PortScanOutput {
    pub open_ports: Vec<PortFinding>,
    pub os_detection: Vec<OsMatch>,
    pub decoys: BTreeMap<Host, Vec<IpAddr>>,
    pub errors: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ServiceOutput {
    pub services: Vec<ServiceFinding>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct WebOutput {
    pub web_services: Vec<WebFinding>,
    pub directories: Vec<DirectoryFinding>,
    pub technologies: BTreeMap<String, Technologies>,
    pub vulnerabilities: Vec<Vulnerability>,
    pub errors: Vec<String>,
}

/// Vulnerability assessment output. The score and level are derived from
/// `vulnerabilities` whenever they are read or serialised.
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct VulnOutput {
    pub vulnerabilities: Vec<Vulnerability>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

impl VulnOutput {
    pub fn risk_score(&self) -> u8 {
        risk_score(&self.vulnerabilities)
    }

    pub fn risk_level(&self) -> RiskLevel {
        RiskLevel::from_score(self.risk_score())
    }
}

impl Serialize for VulnOutput {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut st = serializer.serialize_struct("VulnOutput", 4)?;
        st.serialize_field("vulnerabilities", &self.vulnerabilities)?;
        st.serialize_field("recommendations", &self.recommendations)?;
        st.serialize_field("risk_score", &self.risk_score())?;
        st.serialize_field("risk_level", &self.risk_level())?;
        st.end()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ScanInfo {
    pub target: Target,
    pub started_at: String,
    /// Seconds.
    pub duration: f64,
    pub duration_human: String,
    pub stealth_mode: bool,
    pub deep_scan: bool,
    pub port_range: PortRange,
    pub skipped_phases: Vec<Phase>,
}

/// Everything learned about one target.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TargetScanResult {
    pub scan_info: ScanInfo,
    pub discovery: PhaseResult<DiscoveryOutput>,
    #[serde(rename = "network")]
    pub ports: PhaseResult<PortScanOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub services: Option<PhaseResult<ServiceOutput>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web: Option<PhaseResult<WebOutput>>,
    pub vulnerabilities: PhaseResult<VulnOutput>,
}

impl TargetScanResult {
    pub fn open_ports(&self) -> &[PortFinding] {
        self.ports.ok().map(|p| p.open_ports.as_slice()).unwrap_or(&[])
    }

    pub fn risk_level(&self) -> Option<RiskLevel> {
        self.vulnerabilities.ok().map(VulnOutput::risk_level)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Fatal,
    Timeout,
    Interrupted,
}

/// One value of the batch map: a full result, or why there is none.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum BatchEntry {
    Completed(Box<TargetScanResult>),
    Failed { error: String, kind: FailureKind },
}

impl BatchEntry {
    pub fn failed(kind: FailureKind, error: impl Into<String>) -> Self {
        BatchEntry::Failed {
            error: error.into(),
            kind,
        }
    }

    pub fn completed(&self) -> Option<&TargetScanResult> {
        match self {
            BatchEntry::Completed(r) => Some(r),
            BatchEntry::Failed { .. } => None,
        }
    }

    pub fn failure(&self) -> Option<(FailureKind, &str)> {
        match self {
            BatchEntry::Completed(_) => None,
            BatchEntry::Failed { error, kind } => Some((*kind, error)),
        }
    }
}

/// Per-target results keyed by target, in submission order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchResult {
    entries: Vec<(String, BatchEntry)>,
}

impl BatchResult {
    pub(crate) fn from_entries(entries: Vec<(String, BatchEntry)>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&BatchEntry> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, e)| e)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &BatchEntry)> {
        self.entries.iter().map(|(k, e)| (k.as_str(), e))
    }
}

impl Serialize for BatchResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.entries.iter().map(|(k, v)| (k, v)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vuln(severity: Severity) -> Vulnerability {
        Vulnerability {
            kind: "Test".into(),
            severity,
            url_or_host: "10.0.0.1".into(),
            description: String::new(),
            recommendation: String::new(),
        }
    }

    #[test]
    fn risk_banding_boundaries() {
        assert_eq!(RiskLevel::from_score(100), RiskLevel::Critical);
        assert_eq!(RiskLevel::from_score(70), RiskLevel::Critical);
        assert_eq!(RiskLevel::from_score(69), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(50), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(49), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(30), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(29), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(0), RiskLevel::Low);
    }

    #[test]
    fn score_sums_weights_and_caps() {
        assert_eq!(risk_score(&[]), 0);
        assert_eq!(risk_score(&[vuln(Severity::Medium), vuln(Severity::High)]), 30);
        let many = vec![vuln(Severity::Critical); 5];
        assert_eq!(risk_score(&many), 100);
    }

    #[test]
    fn vuln_output_score_follows_findings() {
        let mut out = VulnOutput::default();
        assert_eq!(out.risk_level(), RiskLevel::Low);
        out.vulnerabilities.push(vuln(Severity::Critical));
        out.vulnerabilities.push(vuln(Severity::High));
        out.vulnerabilities.push(vuln(Severity::Medium));
        assert_eq!(out.risk_score(), 70);
        let json = serde_json::to_value(PhaseResult::Ok(out)).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["risk_score"], 70);
        assert_eq!(json["risk_level"], "Critical");
    }

    #[test]
    fn failed_phase_serialises_reason() {
        let r: PhaseResult<DiscoveryOutput> = PhaseResult::failed("host unreachable");
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["error"], "host unreachable");
        let back: PhaseResult<DiscoveryOutput> = serde_json::from_value(json).unwrap();
        assert_eq!(back, r);
    }

    #[test]
    fn batch_result_serialises_in_submission_order() {
        let batch = BatchResult::from_entries(vec![
            ("zeta.example".into(), BatchEntry::failed(FailureKind::Fatal, "boom")),
            ("alpha.example".into(), BatchEntry::failed(FailureKind::Timeout, "late")),
        ]);
        let json = serde_json::to_string(&batch).unwrap();
        let z = json.find("zeta.example").unwrap();
        let a = json.find("alpha.example").unwrap();
        assert!(z < a, "{json}");
        assert!(json.contains(r#""kind":"timeout""#));
    }
}
