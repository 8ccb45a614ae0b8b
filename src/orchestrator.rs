//! Per-target pipeline.
//!
//! `Init → Discovering → PortScanning → ServiceEnumerating? → WebProbing? →
//! VulnAssessing → Done`. Phases run strictly one after another. A failed
//! phase is recorded and the pipeline keeps going with empty evidence; only
//! service enumeration and the web probe are skipped, and only when there is
//! nothing for them to look at.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::error::TargetFatalError;
use crate::network::{expand_cidr_to_ips, host_count};
use crate::phases::web::{load_wordlist, WebSettings};
use crate::phases::{self, vuln::Evidence};
use crate::ports::{self, PortRange};
use crate::probe::Capabilities;
use crate::report::{format_duration, now_rfc3339};
use crate::stealth::StealthPolicy;
use crate::target::{Host, Target};
use crate::types::{Phase, PhaseResult, ScanInfo, TargetScanResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Init,
    Discovering,
    PortScanning,
    ServiceEnumerating,
    WebProbing,
    VulnAssessing,
    Done,
}

impl fmt::Display for ScanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Knobs that shape a run but are not part of the stealth policy.
#[derive(Debug, Clone)]
pub struct ScanSettings {
    pub deep: bool,
    /// Port-scan attempts per second per host; 0 disables pacing.
    pub rate_limit: u32,
    pub banner_timeout: Duration,
    pub max_hosts_per_range: usize,
    pub web: WebSettings,
}

impl ScanSettings {
    pub fn from_config(config: &AppConfig, deep: bool, rate_limit: u32) -> Self {
        Self {
            deep,
            rate_limit,
            banner_timeout: config.banner_timeout(),
            max_hosts_per_range: config.scanning.max_hosts_per_range,
            web: WebSettings {
                http_timeout: config.http_timeout(),
                wordlist: load_wordlist(config.wordlists.directories.as_deref()),
                max_directory_words: config.scanning.max_directory_words,
            },
        }
    }

    pub fn port_range(&self) -> PortRange {
        PortRange::for_scan(self.deep)
    }
}

/// Drives the phase pipeline for one target at a time. Cheap to clone; every
/// clone shares the same capabilities, policy and settings.
#[derive(Clone)]
pub struct ScanOrchestrator {
    caps: Capabilities,
    policy: Arc<StealthPolicy>,
    settings: Arc<ScanSettings>,
}

impl ScanOrchestrator {
    pub fn new(caps: Capabilities, policy: StealthPolicy, settings: ScanSettings) -> Self {
        Self {
            caps,
            policy: Arc::new(policy),
            settings: Arc::new(settings),
        }
    }

    /// Run every phase against `target`.
    ///
    /// Phase failures never surface here; they are recorded in the result.
    /// The only error is a target the pipeline refuses to start on.
    pub async fn run(&self, target: &Target) -> Result<TargetScanResult, TargetFatalError> {
        if let Target::Range(net) = target {
            let hosts = host_count(net);
            if hosts > self.settings.max_hosts_per_range as u128 {
                return Err(TargetFatalError::RangeTooLarge {
                    range: net.to_string(),
                    hosts,
                    limit: self.settings.max_hosts_per_range,
                });
            }
        }

        let policy = self.policy.as_ref();
        let started = Instant::now();
        let started_at = now_rfc3339();
        let range = self.settings.port_range();
        let mut skipped = Vec::new();
        let mut state = ScanState::Init;
        info!("starting scan of {target}");

        transition(target, &mut state, ScanState::Discovering);
        let discovery = phases::discovery::run(self.caps.network.as_ref(), target, policy).await;
        let hosts: Vec<Host> = match &discovery {
            PhaseResult::Ok(d) => d.hosts_discovered.clone(),
            PhaseResult::Failed { .. } => fallback_hosts(target),
        };

        transition(target, &mut state, ScanState::PortScanning);
        let ports = phases::portscan::run(
            self.caps.network.as_ref(),
            &hosts,
            range,
            self.settings.rate_limit,
            policy,
        )
        .await;
        let open_ports = ports.ok().map(|p| p.open_ports.as_slice()).unwrap_or(&[]);
        info!("{target}: {} open port(s)", open_ports.len());

        let services = if open_ports.is_empty() {
            skipped.push(Phase::ServiceEnum);
            None
        } else {
            transition(target, &mut state, ScanState::ServiceEnumerating);
            Some(
                phases::services::run(
                    Arc::clone(&self.caps.services),
                    open_ports,
                    self.settings.banner_timeout,
                    policy,
                )
                .await,
            )
        };

        let web_ports = ports::web_ports(open_ports);
        let web = if web_ports.is_empty() {
            skipped.push(Phase::WebProbe);
            None
        } else {
            transition(target, &mut state, ScanState::WebProbing);
            Some(
                phases::web::run(
                    Arc::clone(&self.caps.web),
                    &web_ports,
                    policy,
                    &self.settings.web,
                )
                .await,
            )
        };

        transition(target, &mut state, ScanState::VulnAssessing);
        let evidence = Evidence {
            open_ports,
            services: services
                .as_ref()
                .and_then(PhaseResult::ok)
                .map(|s| s.services.as_slice())
                .unwrap_or(&[]),
            web: web.as_ref().and_then(PhaseResult::ok),
        };
        let vulnerabilities = phases::vuln::run(&evidence);
        if let Some(v) = vulnerabilities.ok() {
            info!(
                "{target}: {} finding(s), risk {} ({})",
                v.vulnerabilities.len(),
                v.risk_level(),
                v.risk_score()
            );
        }

        let duration = started.elapsed().as_secs_f64();
        let result = TargetScanResult {
            scan_info: ScanInfo {
                target: target.clone(),
                started_at,
                duration,
                duration_human: format_duration(duration),
                stealth_mode: policy.is_enabled(),
                deep_scan: self.settings.deep,
                port_range: range,
                skipped_phases: skipped,
            },
            discovery,
            ports,
            services,
            web,
            vulnerabilities,
        };
        transition(target, &mut state, ScanState::Done);
        Ok(result)
    }
}

fn transition(target: &Target, state: &mut ScanState, next: ScanState) {
    debug!(%target, from = %state, to = %next, "state change");
    *state = next;
}

/// Hosts to port-scan when discovery produced none: the literal target,
/// with a range expanded to its addresses. Range size is bounded before
/// discovery runs.
fn fallback_hosts(target: &Target) -> Vec<Host> {
    match target {
        Target::Host(host) => {
            warn!("discovery failed for {target}, scanning it directly");
            vec![host.clone()]
        }
        Target::Range(net) => {
            warn!("discovery failed for {target}, scanning every address in it");
            expand_cidr_to_ips(*net).into_iter().map(Host::Ip).collect()
        }
    }
}
