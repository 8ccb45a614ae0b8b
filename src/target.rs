//! Scan targets.
//!
//! A target is either a single host (IP literal or hostname) or a CIDR block.
//! Parsing tries, in order, an IP address, a CIDR block and a hostname; the
//! first form that matches wins.

use std::fmt;
use std::fs;
use std::net::IpAddr;
use std::path::Path;
use std::str::FromStr;
use std::sync::LazyLock;

use ipnet::IpNet;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{InvalidTargetError, ScopeLoadError};

static HOSTNAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^[A-Za-z0-9]([A-Za-z0-9-]{0,61}[A-Za-z0-9])?(\.[A-Za-z0-9]([A-Za-z0-9-]{0,61}[A-Za-z0-9])?)*$",
    )
    .expect("hostname pattern is valid")
});

/// A single scannable machine: an address, or a name that has not been resolved.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Host {
    Ip(IpAddr),
    Name(String),
}

impl Host {
    pub fn ip(&self) -> Option<IpAddr> {
        match self {
            Host::Ip(ip) => Some(*ip),
            Host::Name(_) => None,
        }
    }

    /// `host:port` as it appears in a URL; IPv6 literals are bracketed.
    pub fn url_authority(&self, port: u16) -> String {
        match self {
            Host::Ip(IpAddr::V6(ip)) => format!("[{ip}]:{port}"),
            _ => format!("{self}:{port}"),
        }
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Host::Ip(ip) => write!(f, "{ip}"),
            Host::Name(name) => f.write_str(name),
        }
    }
}

impl From<IpAddr> for Host {
    fn from(ip: IpAddr) -> Self {
        Host::Ip(ip)
    }
}

impl From<&str> for Host {
    fn from(s: &str) -> Self {
        match s.parse::<IpAddr>() {
            Ok(ip) => Host::Ip(ip),
            Err(_) => Host::Name(s.to_string()),
        }
    }
}

impl Serialize for Host {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Host {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Host::from(s.as_str()))
    }
}

/// A validated scan subject. Carries no scan state.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    Host(Host),
    Range(IpNet),
}

impl Target {
    /// Parse one target literal.
    pub fn parse(input: &str) -> Result<Self, InvalidTargetError> {
        let s = input.trim();
        let invalid = || InvalidTargetError {
            input: input.to_string(),
        };

        if let Ok(ip) = s.parse::<IpAddr>() {
            return Ok(Target::Host(Host::Ip(ip)));
        }
        if s.contains('/') {
            return s.parse::<IpNet>().map(Target::Range).map_err(|_| invalid());
        }
        if is_hostname(s) {
            return Ok(Target::Host(Host::Name(s.to_string())));
        }
        Err(invalid())
    }

    /// Identifier used as the batch key and in the report.
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl FromStr for Target {
    type Err = InvalidTargetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Target::parse(s)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Host(host) => host.fmt(f),
            Target::Range(net) => write!(f, "{net}"),
        }
    }
}

impl Serialize for Target {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Target {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Target::parse(&s).map_err(serde::de::Error::custom)
    }
}

// A dotted all-numeric name (e.g. `256.1.1.1`) is a malformed address, not a
// hostname: the last label of a hostname may not be purely numeric.
fn is_hostname(s: &str) -> bool {
    if s.is_empty() || s.len() > 253 || !HOSTNAME.is_match(s) {
        return false;
    }
    s.rsplit('.')
        .next()
        .is_some_and(|tld| !tld.bytes().all(|b| b.is_ascii_digit()))
}

/// Parse scope-file content: one target per line, blank lines and lines
/// starting with `#` skipped, order preserved.
pub fn parse_scope_str(s: &str) -> Result<Vec<Target>, (usize, InvalidTargetError)> {
    let mut out = Vec::new();
    for (idx, raw_line) in s.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let target = Target::parse(line).map_err(|e| (idx + 1, e))?;
        out.push(target);
    }
    Ok(out)
}

/// Load a scope file. Errors if the file cannot be read, a line is not a
/// valid target, or no targets remain after skipping comments.
pub fn load_scope(path: impl AsRef<Path>) -> Result<Vec<Target>, ScopeLoadError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|source| ScopeLoadError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let targets = parse_scope_str(&content).map_err(|(line, source)| ScopeLoadError::Target {
        path: path.to_path_buf(),
        line,
        source,
    })?;
    if targets.is_empty() {
        return Err(ScopeLoadError::Empty {
            path: path.to_path_buf(),
        });
    }
    Ok(targets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ip_literals_are_hosts() {
        for s in ["192.168.1.1", "10.0.0.1", "::1", "2001:db8::5"] {
            match Target::parse(s).unwrap() {
                Target::Host(Host::Ip(ip)) => assert_eq!(ip.to_string(), s),
                other => panic!("{s} parsed as {other:?}"),
            }
        }
    }

    #[test]
    fn cidr_blocks_are_ranges() {
        for s in ["192.168.1.0/24", "10.0.0.0/8", "2001:db8::/64"] {
            assert!(matches!(Target::parse(s).unwrap(), Target::Range(_)), "{s}");
        }
    }

    #[test]
    fn hostnames_are_accepted() {
        for s in ["example.com", "sub.example.com", "test-site.co.uk", "localhost"] {
            assert_eq!(
                Target::parse(s).unwrap(),
                Target::Host(Host::Name(s.to_string()))
            );
        }
    }

    #[test]
    fn malformed_targets_are_rejected() {
        for s in [
            "256.1.1.1",
            "192.168.1",
            "192.168.1.0/33",
            "192.168.1.0/",
            ".example.com",
            "invalid..domain",
            "-bad.example.com",
            "",
        ] {
            assert!(Target::parse(s).is_err(), "{s:?} should be rejected");
        }
    }

    #[test]
    fn url_authority_brackets_ipv6() {
        assert_eq!(Host::from("10.0.0.1").url_authority(80), "10.0.0.1:80");
        assert_eq!(Host::from("example.com").url_authority(443), "example.com:443");
        assert_eq!(Host::from("2001:db8::5").url_authority(80), "[2001:db8::5]:80");
    }

    #[test]
    fn scope_skips_comments_and_blank_lines() {
        let input = "# lab\n10.0.0.1\n\n  example.com  \n# trailing\n10.0.1.0/24\n";
        let targets = parse_scope_str(input).unwrap();
        let keys: Vec<String> = targets.iter().map(Target::key).collect();
        assert_eq!(keys, vec!["10.0.0.1", "example.com", "10.0.1.0/24"]);
    }

    #[test]
    fn scope_reports_offending_line() {
        let (line, err) = parse_scope_str("10.0.0.1\nnot a target\n").unwrap_err();
        assert_eq!(line, 2);
        assert_eq!(err.input, "not a target");
    }

    #[test]
    fn target_serialises_as_its_key() {
        let t = Target::parse("10.1.0.0/16").unwrap();
        assert_eq!(serde_json::to_string(&t).unwrap(), "\"10.1.0.0/16\"");
        let back: Target = serde_json::from_str("\"10.1.0.0/16\"").unwrap();
        assert_eq!(back, t);
    }
}
