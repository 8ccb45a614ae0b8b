//! Boundaries to the scanning primitives.
//!
//! The core never touches sockets directly; it talks to these traits. Every
//! call returns an explicit `Result` (or, for protocol probes, a details value
//! that carries its own error) so phase runners can map failures without
//! intercepting panics. The default implementations are a TCP-connect
//! scanner ([`tcp::TcpScanner`]), a banner/protocol prober
//! ([`service::BannerProber`]) and a reqwest client ([`http::HttpClient`]).

pub mod http;
pub mod service;
pub mod tcp;

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::AppConfig;
use crate::error::ProbeError;
use crate::ports::PortRange;
use crate::stealth::StealthPolicy;
use crate::target::{Host, Target};
use crate::types::{OsMatch, PortFinding, ServiceDetails};

/// Parameters for one host's port scan.
#[derive(Debug, Clone)]
pub struct PortScanRequest<'a> {
    pub range: PortRange,
    /// Maximum connection attempts per second; 0 means unlimited.
    pub rate_limit: u32,
    pub policy: &'a StealthPolicy,
    /// Spoofed sources for capabilities that craft raw packets.
    pub decoys: &'a [IpAddr],
}

/// Host discovery, port scanning and OS fingerprinting.
#[async_trait]
pub trait NetworkScanner: Send + Sync {
    /// Live hosts for `target`. An empty list means nothing answered.
    async fn discover(&self, target: &Target, policy: &StealthPolicy)
        -> Result<Vec<Host>, ProbeError>;

    /// Open ports on `host` within `request.range`.
    async fn scan_ports(
        &self,
        host: &Host,
        request: &PortScanRequest<'_>,
    ) -> Result<Vec<PortFinding>, ProbeError>;

    async fn detect_os(&self, _host: &Host) -> Result<Option<OsMatch>, ProbeError> {
        Ok(None)
    }
}

/// Which protocol-specific probe to run against a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceKind {
    Http { tls: bool },
    Ftp,
    Ssh,
    Smb,
    Other,
}

impl ServiceKind {
    /// Classify by the service name reported by the port scan, falling back
    /// to the port number when the name is unknown.
    pub fn classify(service_name: &str, port: u16) -> Self {
        match service_name.to_ascii_lowercase().as_str() {
            "http" | "http-alt" | "http-proxy" => ServiceKind::Http { tls: false },
            "https" | "https-alt" | "ssl/http" => ServiceKind::Http { tls: true },
            "ftp" => ServiceKind::Ftp,
            "ssh" => ServiceKind::Ssh,
            "smb" | "microsoft-ds" | "netbios-ssn" => ServiceKind::Smb,
            _ => match port {
                80 | 8000 | 8080 | 8888 | 3000 | 5000 => ServiceKind::Http { tls: false },
                443 | 8443 => ServiceKind::Http { tls: true },
                21 => ServiceKind::Ftp,
                22 => ServiceKind::Ssh,
                139 | 445 => ServiceKind::Smb,
                _ => ServiceKind::Other,
            },
        }
    }
}

/// Banner grabbing and protocol-specific enumeration.
#[async_trait]
pub trait ServiceProber: Send + Sync {
    /// First bytes the service volunteers after connect, if any.
    async fn grab_banner(&self, host: &Host, port: u16, timeout: Duration) -> Option<String>;

    /// Protocol details. Never fails: errors are recorded inside the details.
    async fn probe(&self, host: &Host, port: u16, kind: ServiceKind) -> ServiceDetails;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub timeout: Duration,
    pub follow_redirects: bool,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            headers: BTreeMap::new(),
            timeout,
            follow_redirects: true,
        }
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_string(), value.into());
        self
    }

    pub fn no_redirects(mut self) -> Self {
        self.follow_redirects = false;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    /// Header names are lower-case.
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

#[async_trait]
pub trait WebClient: Send + Sync {
    async fn get(&self, request: &HttpRequest) -> Result<HttpResponse, ProbeError>;
}

/// The set of external capabilities a scan run is wired to.
#[derive(Clone)]
pub struct Capabilities {
    pub network: Arc<dyn NetworkScanner>,
    pub services: Arc<dyn ServiceProber>,
    pub web: Arc<dyn WebClient>,
}

impl Capabilities {
    /// TCP-connect scanning, banner probes and a reqwest web client.
    pub fn tcp_connect(config: &AppConfig) -> Result<Self, ProbeError> {
        let web: Arc<dyn WebClient> = Arc::new(http::HttpClient::new()?);
        Ok(Self {
            network: Arc::new(tcp::TcpScanner::new(config.connect_timeout())),
            services: Arc::new(service::BannerProber::new(
                Arc::clone(&web),
                config.http_timeout(),
            )),
            web,
        })
    }
}
