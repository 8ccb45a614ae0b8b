//! Vulnerability assessment.
//!
//! Detectors are pure functions over the evidence the earlier phases
//! gathered, so this phase cannot fail; it may simply find nothing.

use crate::types::{
    PhaseResult, PortFinding, ServiceDetails, ServiceFinding, Severity, VulnOutput,
    Vulnerability, WebOutput,
};

/// Whatever earlier phases produced. Any part may be empty.
#[derive(Debug, Clone, Copy, Default)]
pub struct Evidence<'a> {
    pub open_ports: &'a [PortFinding],
    pub services: &'a [ServiceFinding],
    pub web: Option<&'a WebOutput>,
}

const EXPOSED_DATASTORES: [(u16, &str, Severity); 6] = [
    (3306, "MySQL", Severity::Medium),
    (5432, "PostgreSQL", Severity::Medium),
    (6379, "Redis", Severity::High),
    (9200, "Elasticsearch", Severity::High),
    (11211, "Memcached", Severity::High),
    (27017, "MongoDB", Severity::High),
];

pub fn run(evidence: &Evidence<'_>) -> PhaseResult<VulnOutput> {
    let mut findings = Vec::new();
    if let Some(web) = evidence.web {
        findings.extend(web.vulnerabilities.iter().cloned());
    }
    findings.extend(cleartext_remote_access(evidence.open_ports));
    findings.extend(exposed_datastores(evidence.open_ports));
    findings.extend(anonymous_services(evidence.services));
    findings.extend(version_disclosure(evidence.open_ports, evidence.services));

    let mut recommendations: Vec<String> = Vec::new();
    for v in &findings {
        if !recommendations.contains(&v.recommendation) {
            recommendations.push(v.recommendation.clone());
        }
    }

    PhaseResult::Ok(VulnOutput {
        vulnerabilities: findings,
        recommendations,
    })
}

fn endpoint(p: &PortFinding) -> String {
    format!("{}:{}", p.host, p.port)
}

fn cleartext_remote_access(ports: &[PortFinding]) -> Vec<Vulnerability> {
    ports
        .iter()
        .filter(|p| p.is_open() && p.port == 23)
        .map(|p| Vulnerability {
            kind: "Cleartext Remote Access".into(),
            severity: Severity::High,
            url_or_host: endpoint(p),
            description: "Telnet transmits credentials and sessions unencrypted".into(),
            recommendation: "Disable Telnet and use SSH instead".into(),
        })
        .collect()
}

fn exposed_datastores(ports: &[PortFinding]) -> Vec<Vulnerability> {
    ports
        .iter()
        .filter(|p| p.is_open())
        .filter_map(|p| {
            let (_, name, severity) = EXPOSED_DATASTORES.iter().find(|(port, ..)| *port == p.port)?;
            Some(Vulnerability {
                kind: "Exposed Database Service".into(),
                severity: *severity,
                url_or_host: endpoint(p),
                description: format!("{name} is reachable from the network"),
                recommendation: "Restrict database services to trusted hosts with a firewall"
                    .into(),
            })
        })
        .collect()
}

fn anonymous_services(services: &[ServiceFinding]) -> Vec<Vulnerability> {
    services
        .iter()
        .filter_map(|s| {
            let url_or_host = format!("{}:{}", s.host, s.port);
            match &s.details {
                ServiceDetails::Ftp {
                    anonymous_login: true,
                    ..
                } => Some(Vulnerability {
                    kind: "Anonymous FTP Access".into(),
                    severity: Severity::High,
                    url_or_host,
                    description: "FTP server accepts anonymous logins".into(),
                    recommendation: "Disable anonymous FTP access".into(),
                }),
                ServiceDetails::Smb {
                    shares,
                    error: None,
                } if !shares.is_empty() => Some(Vulnerability {
                    kind: "Anonymous SMB Access".into(),
                    severity: Severity::Medium,
                    url_or_host,
                    description: format!(
                        "SMB shares listable without credentials: {}",
                        shares.join(", ")
                    ),
                    recommendation: "Require authentication for SMB share enumeration".into(),
                }),
                _ => None,
            }
        })
        .collect()
}

/// One finding per endpoint whose banner names a product version.
fn version_disclosure(ports: &[PortFinding], services: &[ServiceFinding]) -> Vec<Vulnerability> {
    let mut out = Vec::new();
    for p in ports.iter().filter(|p| p.is_open()) {
        let (Some(product), Some(version)) = (&p.product, &p.version) else {
            continue;
        };
        out.push(Vulnerability {
            kind: "Version Disclosure".into(),
            severity: Severity::Low,
            url_or_host: endpoint(p),
            description: format!("Service banner discloses {product} {version}"),
            recommendation: "Suppress version information in service banners".into(),
        });
    }
    for s in services {
        if let ServiceDetails::Ssh {
            version: Some(line),
            ..
        } = &s.details
        {
            let key = format!("{}:{}", s.host, s.port);
            if out.iter().any(|v| v.url_or_host == key) {
                continue;
            }
            if line.contains('_') {
                out.push(Vulnerability {
                    kind: "Version Disclosure".into(),
                    severity: Severity::Low,
                    url_or_host: key,
                    description: format!("SSH greeting discloses {line}"),
                    recommendation: "Suppress version information in service banners".into(),
                });
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::Host;
    use crate::types::{PortState, Protocol, RiskLevel};

    fn open(port: u16) -> PortFinding {
        PortFinding {
            host: Host::from("10.0.0.9"),
            port,
            protocol: Protocol::Tcp,
            state: PortState::Open,
            service_name: None,
            product: None,
            version: None,
            banner: None,
        }
    }

    #[test]
    fn empty_evidence_is_low_risk() {
        let out = run(&Evidence::default());
        let out = out.ok().unwrap();
        assert!(out.vulnerabilities.is_empty());
        assert_eq!(out.risk_score(), 0);
        assert_eq!(out.risk_level(), RiskLevel::Low);
    }

    #[test]
    fn telnet_and_redis_are_flagged() {
        let ports = [open(22), open(23), open(6379)];
        let out = run(&Evidence {
            open_ports: &ports,
            ..Evidence::default()
        });
        let out = out.ok().unwrap();
        let kinds: Vec<_> = out.vulnerabilities.iter().map(|v| v.kind.as_str()).collect();
        assert_eq!(kinds, ["Cleartext Remote Access", "Exposed Database Service"]);
        assert_eq!(out.risk_score(), 40);
        assert_eq!(out.recommendations.len(), 2);
    }

    #[test]
    fn anonymous_ftp_and_versions() {
        let mut ftp = open(21);
        ftp.product = Some("vsFTPd".into());
        ftp.version = Some("2.3.4".into());
        let services = [ServiceFinding {
            host: Host::from("10.0.0.9"),
            port: 21,
            service: "ftp".into(),
            banner: Some("220 (vsFTPd 2.3.4)".into()),
            details: ServiceDetails::Ftp {
                anonymous_login: true,
                welcome_message: None,
                error: None,
            },
        }];
        let ports = [ftp];
        let out = run(&Evidence {
            open_ports: &ports,
            services: &services,
            web: None,
        });
        let out = out.ok().unwrap();
        assert_eq!(out.vulnerabilities.len(), 2);
        assert_eq!(out.risk_score(), 25);
    }

    #[test]
    fn recommendations_are_deduplicated() {
        let ports = [open(3306), open(5432)];
        let out = run(&Evidence {
            open_ports: &ports,
            ..Evidence::default()
        });
        let out = out.ok().unwrap();
        assert_eq!(out.vulnerabilities.len(), 2);
        assert_eq!(out.recommendations.len(), 1);
    }
}
