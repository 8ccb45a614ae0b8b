use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sniffy_rs::config::StealthConfig;
use sniffy_rs::error::ProbeError;
use sniffy_rs::phases::{services, web};
use sniffy_rs::probe::{HttpRequest, HttpResponse, ServiceKind, ServiceProber, WebClient};
use sniffy_rs::stealth::StealthPolicy;
use sniffy_rs::target::Host;
use sniffy_rs::types::{PortFinding, PortState, Protocol, ServiceDetails};

/// Counts calls running at the same time.
#[derive(Default)]
struct InFlight {
    now: AtomicUsize,
    peak: AtomicUsize,
}

impl InFlight {
    async fn hold(&self, d: Duration) {
        let now = self.now.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(d).await;
        self.now.fetch_sub(1, Ordering::SeqCst);
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct SlowProber {
    calls: InFlight,
}

#[async_trait]
impl ServiceProber for SlowProber {
    async fn grab_banner(&self, _host: &Host, _port: u16, _timeout: Duration) -> Option<String> {
        self.calls.hold(Duration::from_millis(30)).await;
        None
    }

    async fn probe(&self, _host: &Host, _port: u16, _kind: ServiceKind) -> ServiceDetails {
        ServiceDetails::Unknown {
            raw: BTreeMap::new(),
        }
    }
}

/// Answers every URL with 200 after a short delay. Rejects URLs that do not parse.
#[derive(Default)]
struct SlowSite {
    calls: InFlight,
}

#[async_trait]
impl WebClient for SlowSite {
    async fn get(&self, request: &HttpRequest) -> Result<HttpResponse, ProbeError> {
        reqwest::Url::parse(&request.url)
            .map_err(|e| ProbeError::Http(format!("{}: {e}", request.url)))?;
        self.calls.hold(Duration::from_millis(30)).await;
        Ok(HttpResponse {
            status: if request.url.ends_with('/') { 200 } else { 404 },
            ..HttpResponse::default()
        })
    }
}

fn capped(cap: usize) -> StealthPolicy {
    let cfg = StealthConfig {
        normal_concurrency: cap,
        ..StealthConfig::default()
    };
    StealthPolicy::from_config(false, &cfg)
}

fn open(host: &str, port: u16) -> PortFinding {
    PortFinding {
        host: Host::from(host),
        port,
        protocol: Protocol::Tcp,
        state: PortState::Open,
        service_name: None,
        product: None,
        version: None,
        banner: None,
    }
}

fn web_settings(words: usize) -> web::WebSettings {
    web::WebSettings {
        http_timeout: Duration::from_secs(1),
        wordlist: (0..words).map(|i| format!("dir{i}")).collect::<Vec<_>>().into(),
        max_directory_words: words,
    }
}

#[tokio::test]
async fn service_enumeration_stays_within_the_cap() {
    let prober = Arc::new(SlowProber::default());
    let ports: Vec<PortFinding> = (1..=10).map(|p| open("10.0.0.1", 1000 + p)).collect();

    let result = services::run(
        Arc::clone(&prober) as Arc<dyn ServiceProber>,
        &ports,
        Duration::from_millis(100),
        &capped(2),
    )
    .await;

    assert_eq!(result.ok().unwrap().services.len(), 10);
    assert_eq!(prober.calls.peak(), 2);
}

#[tokio::test]
async fn directory_brute_force_stays_within_the_cap() {
    let site = Arc::new(SlowSite::default());

    let result = web::run(
        Arc::clone(&site) as Arc<dyn WebClient>,
        &[open("10.0.0.1", 80)],
        &capped(2),
        &web_settings(10),
    )
    .await;

    assert!(result.is_ok());
    assert_eq!(site.calls.peak(), 2);
}

#[tokio::test]
async fn ipv6_web_service_is_probed() {
    let site: Arc<dyn WebClient> = Arc::new(SlowSite::default());

    let result = web::run(
        site,
        &[open("2001:db8::5", 80)],
        &StealthPolicy::normal(),
        &web_settings(1),
    )
    .await;

    let out = result.ok().unwrap();
    assert!(out.errors.is_empty(), "{:?}", out.errors);
    assert_eq!(out.web_services[0].url, "http://[2001:db8::5]:80");
}
