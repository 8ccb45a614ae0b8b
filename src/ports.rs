use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::types::PortFinding;

/// Ports treated as web servers by the web probe.
pub const WEB_PORTS: [u16; 8] = [80, 443, 8080, 8443, 8000, 8888, 3000, 5000];

/// Web ports probed over TLS.
pub const TLS_WEB_PORTS: [u16; 2] = [443, 8443];

/// Ports tried when checking whether a host is alive.
pub const LIVENESS_PORTS: [u16; 8] = [80, 443, 22, 445, 3389, 21, 25, 8080];

/// Inclusive TCP port range. Serialised as `start-end`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(into = "String", try_from = "String")]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    pub const STANDARD: PortRange = PortRange { start: 1, end: 1000 };
    pub const FULL: PortRange = PortRange {
        start: 1,
        end: u16::MAX,
    };

    /// `1-65535` in deep-scan mode, `1-1000` otherwise.
    pub fn for_scan(deep: bool) -> Self {
        if deep {
            Self::FULL
        } else {
            Self::STANDARD
        }
    }

    pub fn len(&self) -> usize {
        usize::from(self.end - self.start) + 1
    }

    pub fn contains(&self, port: u16) -> bool {
        (self.start..=self.end).contains(&port)
    }

    pub fn iter(&self) -> impl Iterator<Item = u16> {
        self.start..=self.end
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Accepts `80` or an inclusive range such as `1-1000`.
impl FromStr for PortRange {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Some((a, b)) = s.split_once('-') {
            let start = parse_port_str(a.trim())
                .with_context(|| format!("invalid start in range: {a}"))?;
            let end =
                parse_port_str(b.trim()).with_context(|| format!("invalid end in range: {b}"))?;
            if start > end {
                bail!("invalid range {start}-{end} (start > end)");
            }
            return Ok(PortRange { start, end });
        }
        let p = parse_port_str(s).with_context(|| format!("invalid port value: {s}"))?;
        Ok(PortRange { start: p, end: p })
    }
}

impl From<PortRange> for String {
    fn from(r: PortRange) -> Self {
        r.to_string()
    }
}

impl TryFrom<String> for PortRange {
    type Error = anyhow::Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

pub fn is_web_port(port: u16) -> bool {
    WEB_PORTS.contains(&port)
}

/// The subset of `open_ports` that the web probe should visit, in input order.
pub fn web_ports(open_ports: &[PortFinding]) -> Vec<PortFinding> {
    open_ports
        .iter()
        .filter(|p| p.is_open() && is_web_port(p.port))
        .cloned()
        .collect()
}

/// Conventional service name for a well-known TCP port.
pub fn service_name(port: u16) -> Option<&'static str> {
    let name = match port {
        21 => "ftp",
        22 => "ssh",
        23 => "telnet",
        25 => "smtp",
        53 => "domain",
        80 => "http",
        110 => "pop3",
        139 => "netbios-ssn",
        143 => "imap",
        443 => "https",
        445 => "microsoft-ds",
        993 => "imaps",
        995 => "pop3s",
        1433 => "ms-sql-s",
        3000 => "ppp",
        3306 => "mysql",
        3389 => "ms-wbt-server",
        5000 => "upnp",
        5432 => "postgresql",
        5900 => "vnc",
        6379 => "redis",
        8000 => "http-alt",
        8080 => "http-proxy",
        8443 => "https-alt",
        8888 => "sun-answerbook",
        9200 => "elasticsearch",
        11211 => "memcache",
        27017 => "mongod",
        _ => return None,
    };
    Some(name)
}

fn parse_port_str(s: &str) -> Result<u16> {
    let val: u32 = s.parse::<u32>().map_err(|e| anyhow::anyhow!(e))?;
    if val == 0 || val > 65535 {
        bail!("port out of range: {val}");
    }
    Ok(val as u16)
}
