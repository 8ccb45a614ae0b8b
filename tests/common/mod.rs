//! In-memory capabilities for orchestrator and scheduler tests.
#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use sniffy_rs::error::ProbeError;
use sniffy_rs::orchestrator::{ScanOrchestrator, ScanSettings};
use sniffy_rs::phases::web::WebSettings;
use sniffy_rs::ports;
use sniffy_rs::probe::{
    Capabilities, HttpRequest, HttpResponse, NetworkScanner, PortScanRequest, ServiceKind,
    ServiceProber, WebClient,
};
use sniffy_rs::stealth::StealthPolicy;
use sniffy_rs::target::{Host, Target};
use sniffy_rs::types::{PortFinding, PortState, Protocol, ServiceDetails};

/// Network of named hosts with fixed open ports.
#[derive(Default)]
pub struct FakeNetwork {
    open: HashMap<String, Vec<u16>>,
    hidden: HashSet<String>,
    panics: HashSet<String>,
    delays: HashMap<String, Duration>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl FakeNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// A host that answers discovery and has `ports` open.
    pub fn host(mut self, name: &str, ports: &[u16]) -> Self {
        self.open.insert(name.to_string(), ports.to_vec());
        self
    }

    /// A host that ignores discovery probes but still answers port scans.
    pub fn hidden(mut self, name: &str, ports: &[u16]) -> Self {
        self.hidden.insert(name.to_string());
        self.host(name, ports)
    }

    pub fn panics_on(mut self, name: &str) -> Self {
        self.panics.insert(name.to_string());
        self
    }

    pub fn slow(mut self, name: &str, delay: Duration) -> Self {
        self.delays.insert(name.to_string(), delay);
        self
    }

    /// Highest number of port scans observed running at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NetworkScanner for FakeNetwork {
    async fn discover(
        &self,
        target: &Target,
        _policy: &StealthPolicy,
    ) -> Result<Vec<Host>, ProbeError> {
        let key = target.key();
        if self.open.contains_key(&key) && !self.hidden.contains(&key) {
            Ok(vec![Host::from(key.as_str())])
        } else {
            Err(ProbeError::Io(std::io::Error::other(format!(
                "{key} did not answer"
            ))))
        }
    }

    async fn scan_ports(
        &self,
        host: &Host,
        request: &PortScanRequest<'_>,
    ) -> Result<Vec<PortFinding>, ProbeError> {
        let key = host.to_string();
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delays.get(&key) {
            tokio::time::sleep(*delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.panics.contains(&key) {
            panic!("scanner crashed on {key}");
        }
        let Some(open) = self.open.get(&key) else {
            return Err(ProbeError::Timeout(Duration::from_secs(1)));
        };
        Ok(open
            .iter()
            .filter(|p| request.range.contains(**p))
            .map(|&port| PortFinding {
                host: host.clone(),
                port,
                protocol: Protocol::Tcp,
                state: PortState::Open,
                service_name: ports::service_name(port).map(str::to_string),
                product: None,
                version: None,
                banner: None,
            })
            .collect())
    }
}

/// Every HTTP probe answers 200; other protocols report nothing.
pub struct FakeServices;

#[async_trait]
impl ServiceProber for FakeServices {
    async fn grab_banner(&self, _host: &Host, port: u16, _timeout: Duration) -> Option<String> {
        (port == 22).then(|| "SSH-2.0-OpenSSH_9.6".to_string())
    }

    async fn probe(&self, _host: &Host, _port: u16, kind: ServiceKind) -> ServiceDetails {
        match kind {
            ServiceKind::Http { .. } => ServiceDetails::Http {
                status_code: Some(200),
                server: Some("nginx".into()),
                powered_by: None,
                content_length: Some(42),
                error: None,
            },
            _ => ServiceDetails::Unknown {
                raw: BTreeMap::new(),
            },
        }
    }
}

/// Serves fixed pages by exact URL; everything else is a 404.
#[derive(Default)]
pub struct FakeWeb {
    pages: HashMap<String, (u16, String)>,
    offline: bool,
}

impl FakeWeb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, url: &str, status: u16, body: &str) -> Self {
        self.pages.insert(url.to_string(), (status, body.to_string()));
        self
    }

    pub fn offline() -> Self {
        Self {
            offline: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl WebClient for FakeWeb {
    async fn get(&self, request: &HttpRequest) -> Result<HttpResponse, ProbeError> {
        if self.offline {
            return Err(ProbeError::Http("connection refused".into()));
        }
        let (status, body) = self
            .pages
            .get(&request.url)
            .cloned()
            .unwrap_or((404, "not found".to_string()));
        let mut headers = BTreeMap::new();
        headers.insert("server".to_string(), "nginx".to_string());
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

pub fn capabilities(network: Arc<FakeNetwork>, web: FakeWeb) -> Capabilities {
    Capabilities {
        network,
        services: Arc::new(FakeServices),
        web: Arc::new(web),
    }
}

pub fn settings() -> ScanSettings {
    ScanSettings {
        deep: false,
        rate_limit: 0,
        banner_timeout: Duration::from_millis(100),
        max_hosts_per_range: 4096,
        web: WebSettings {
            http_timeout: Duration::from_secs(1),
            wordlist: vec!["admin".to_string(), "backup".to_string()].into(),
            max_directory_words: 10,
        },
    }
}

pub fn orchestrator(network: Arc<FakeNetwork>, web: FakeWeb) -> ScanOrchestrator {
    ScanOrchestrator::new(capabilities(network, web), StealthPolicy::normal(), settings())
}

pub fn target(s: &str) -> Target {
    Target::parse(s).unwrap()
}
