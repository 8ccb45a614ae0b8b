use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use regex::Regex;
use tokio::io::AsyncReadExt;
use tokio::net::{lookup_host, TcpStream};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::debug;

use crate::error::ProbeError;
use crate::network::{expand_cidr_to_ips, host_count};
use crate::ports::{self, LIVENESS_PORTS};
use crate::probe::{NetworkScanner, PortScanRequest};
use crate::stealth::StealthPolicy;
use crate::target::{Host, Target};
use crate::types::{OsMatch, PortFinding, PortState, Protocol};

static PRODUCT_VERSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b([A-Za-z][A-Za-z0-9-]*)[ /_]v?(\d+\.\d+(?:\.\d+)*[A-Za-z0-9]*)")
        .expect("product/version pattern is valid")
});

const PEEK_TIMEOUT: Duration = Duration::from_millis(200);

/// Asynchronous TCP-connect scanner.
///
/// - Limits concurrent connects with a `Semaphore` sized from the stealth policy.
/// - Bounds each connect with `tokio::time::timeout`.
/// - Paces attempts to the requested rate and sleeps the policy's jitter between dispatches.
/// - On a successful connect, peeks at the banner (up to 256 bytes, 200ms).
///
/// Plain connects cannot spoof sources, so decoys are accepted and ignored.
#[derive(Debug, Clone)]
pub struct TcpScanner {
    connect_timeout: Duration,
}

impl TcpScanner {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    async fn is_alive(&self, ip: IpAddr) -> bool {
        for port in LIVENESS_PORTS {
            match connect(SocketAddr::new(ip, port), self.connect_timeout).await {
                Outcome::Open(_) | Outcome::Closed => return true,
                Outcome::Filtered | Outcome::Unreachable(_) => {}
            }
        }
        false
    }
}

enum Outcome {
    Open(TcpStream),
    Closed,
    Filtered,
    Unreachable(io::Error),
}

async fn connect(addr: SocketAddr, timeout: Duration) -> Outcome {
    match time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => Outcome::Open(stream),
        Ok(Err(e)) if e.kind() == io::ErrorKind::ConnectionRefused => Outcome::Closed,
        Ok(Err(e)) => Outcome::Unreachable(e),
        Err(_) => Outcome::Filtered,
    }
}

pub(crate) async fn resolve(host: &Host) -> Result<IpAddr, ProbeError> {
    match host {
        Host::Ip(ip) => Ok(*ip),
        Host::Name(name) => lookup_host((name.as_str(), 0))
            .await
            .map_err(|_| ProbeError::Resolve(name.clone()))?
            .map(|sa| sa.ip())
            .next()
            .ok_or_else(|| ProbeError::Resolve(name.clone())),
    }
}

#[async_trait]
impl NetworkScanner for TcpScanner {
    async fn discover(
        &self,
        target: &Target,
        policy: &StealthPolicy,
    ) -> Result<Vec<Host>, ProbeError> {
        let candidates: Vec<(Host, IpAddr)> = match target {
            Target::Host(host) => vec![(host.clone(), resolve(host).await?)],
            Target::Range(net) => {
                debug!(range = %net, hosts = host_count(net), "expanding range");
                expand_cidr_to_ips(*net)
                    .into_iter()
                    .map(|ip| (Host::Ip(ip), ip))
                    .collect()
            }
        };

        let mut candidates = candidates;
        if policy.is_enabled() {
            candidates.shuffle(&mut rand::rng());
        }

        let sem = Arc::new(Semaphore::new(policy.concurrency_cap()));
        let mut set = JoinSet::new();
        for (host, ip) in candidates {
            policy.pause().await;
            let Ok(permit) = sem.clone().acquire_owned().await else {
                break;
            };
            let scanner = self.clone();
            set.spawn(async move {
                let _permit = permit;
                scanner.is_alive(ip).await.then_some(host)
            });
        }

        let mut live = Vec::new();
        while let Some(res) = set.join_next().await {
            if let Ok(Some(host)) = res {
                live.push(host);
            }
        }
        live.sort();
        Ok(live)
    }

    async fn scan_ports(
        &self,
        host: &Host,
        request: &PortScanRequest<'_>,
    ) -> Result<Vec<PortFinding>, ProbeError> {
        let ip = resolve(host).await?;
        if !request.decoys.is_empty() {
            debug!(%host, decoys = ?request.decoys, "connect scan cannot spoof decoy sources");
        }

        let policy = request.policy;
        let sem = Arc::new(Semaphore::new(policy.concurrency_cap()));
        let mut set = JoinSet::new();
        let mut pacer = (request.rate_limit > 0).then(|| {
            let period = (Duration::from_secs(1) / request.rate_limit).max(Duration::from_nanos(1));
            let mut iv = time::interval(period);
            iv.set_missed_tick_behavior(MissedTickBehavior::Delay);
            iv
        });

        let started = Instant::now();
        for port in request.range.iter() {
            if let Some(pacer) = pacer.as_mut() {
                pacer.tick().await;
            }
            policy.pause().await;
            let Ok(permit) = sem.clone().acquire_owned().await else {
                break;
            };
            let timeout = self.connect_timeout;
            let host = host.clone();
            set.spawn(async move {
                let _permit = permit; // keep permit until task completes
                match connect(SocketAddr::new(ip, port), timeout).await {
                    Outcome::Open(mut stream) => {
                        let banner = read_banner(&mut stream, 256, PEEK_TIMEOUT).await;
                        Ok(Some(open_finding(host, port, banner)))
                    }
                    Outcome::Closed | Outcome::Filtered => Ok(None),
                    Outcome::Unreachable(e) => Err(e),
                }
            });
        }

        let mut found = Vec::new();
        let mut unreachable: Option<io::Error> = None;
        let mut attempted = 0usize;
        let mut failed = 0usize;
        while let Some(res) = set.join_next().await {
            attempted += 1;
            match res {
                Ok(Ok(Some(finding))) => found.push(finding),
                Ok(Ok(None)) => {}
                Ok(Err(e)) => {
                    failed += 1;
                    unreachable.get_or_insert(e);
                }
                Err(_) => failed += 1,
            }
        }
        debug!(
            %host,
            attempted,
            open = found.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "port scan finished"
        );

        if found.is_empty() && attempted > 0 && failed == attempted {
            return Err(unreachable
                .map(ProbeError::Io)
                .unwrap_or_else(|| ProbeError::Io(io::Error::other("every probe failed"))));
        }
        found.sort_by_key(|f| f.port);
        Ok(found)
    }

    async fn detect_os(&self, host: &Host) -> Result<Option<OsMatch>, ProbeError> {
        let ip = resolve(host).await?;
        if let Outcome::Open(mut stream) = connect(SocketAddr::new(ip, 22), self.connect_timeout).await {
            if let Some(banner) = read_banner(&mut stream, 256, PEEK_TIMEOUT).await {
                if let Some(name) = os_from_ssh_banner(&banner) {
                    return Ok(Some(OsMatch {
                        host: host.clone(),
                        name: name.to_string(),
                        accuracy: 80,
                    }));
                }
            }
        }
        for port in [3389, 445] {
            if let Outcome::Open(_) = connect(SocketAddr::new(ip, port), self.connect_timeout).await {
                return Ok(Some(OsMatch {
                    host: host.clone(),
                    name: "Microsoft Windows".to_string(),
                    accuracy: 60,
                }));
            }
        }
        Ok(None)
    }
}

fn open_finding(host: Host, port: u16, banner: Option<String>) -> PortFinding {
    let (product, version) = banner
        .as_deref()
        .map(product_from_banner)
        .unwrap_or((None, None));
    PortFinding {
        host,
        port,
        protocol: Protocol::Tcp,
        state: PortState::Open,
        service_name: ports::service_name(port).map(str::to_string),
        product,
        version,
        banner,
    }
}

/// Read whatever the service sends first, as lossy UTF-8 with line breaks escaped.
pub(crate) async fn read_banner(
    stream: &mut TcpStream,
    max: usize,
    timeout: Duration,
) -> Option<String> {
    let mut buf = vec![0u8; max];
    match time::timeout(timeout, stream.read(&mut buf)).await {
        Ok(Ok(n)) if n > 0 => {
            buf.truncate(n);
            let s = String::from_utf8_lossy(&buf).trim().to_string();
            let s = s.replace('\n', "\\n").replace('\r', "\\r");
            (!s.is_empty()).then_some(s)
        }
        _ => None,
    }
}

/// Best-effort `(product, version)` from a service banner.
pub fn product_from_banner(banner: &str) -> (Option<String>, Option<String>) {
    // SSH-2.0-OpenSSH_8.9p1 Ubuntu-3ubuntu0.6
    if let Some(rest) = banner.strip_prefix("SSH-") {
        let software = rest.split_once('-').map(|(_, s)| s).unwrap_or(rest);
        let software = software.split_whitespace().next().unwrap_or(software);
        return match software.split_once('_') {
            Some((p, v)) => (Some(p.to_string()), Some(v.to_string())),
            None => (Some(software.to_string()), None),
        };
    }
    match PRODUCT_VERSION.captures(banner) {
        Some(c) => (Some(c[1].to_string()), Some(c[2].to_string())),
        None => (None, None),
    }
}

fn os_from_ssh_banner(banner: &str) -> Option<&'static str> {
    let lower = banner.to_ascii_lowercase();
    [
        ("ubuntu", "Linux (Ubuntu)"),
        ("debian", "Linux (Debian)"),
        ("raspbian", "Linux (Raspbian)"),
        ("centos", "Linux (CentOS)"),
        ("el7", "Linux (RHEL 7)"),
        ("el8", "Linux (RHEL 8)"),
        ("freebsd", "FreeBSD"),
        ("windows", "Microsoft Windows"),
    ]
    .into_iter()
    .find(|(needle, _)| lower.contains(needle))
    .map(|(_, name)| name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StealthConfig;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    #[test]
    fn ssh_banner_product() {
        assert_eq!(
            product_from_banner("SSH-2.0-OpenSSH_8.9p1 Ubuntu-3ubuntu0.6"),
            (Some("OpenSSH".into()), Some("8.9p1".into()))
        );
        assert_eq!(
            product_from_banner("SSH-2.0-dropbear"),
            (Some("dropbear".into()), None)
        );
    }

    #[test]
    fn generic_banner_product() {
        assert_eq!(
            product_from_banner("220 (vsFTPd 3.0.3)"),
            (Some("vsFTPd".into()), Some("3.0.3".into()))
        );
        assert_eq!(
            product_from_banner("220 ProFTPD 1.3.5e Server ready"),
            (Some("ProFTPD".into()), Some("1.3.5e".into()))
        );
        assert_eq!(product_from_banner("+OK ready"), (None, None));
    }

    #[test]
    fn os_hints() {
        assert_eq!(
            os_from_ssh_banner("SSH-2.0-OpenSSH_8.2p1 Ubuntu-4ubuntu0.5"),
            Some("Linux (Ubuntu)")
        );
        assert_eq!(os_from_ssh_banner("SSH-2.0-OpenSSH_9.6"), None);
    }

    #[tokio::test]
    async fn finds_open_local_port_with_banner() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((mut sock, _)) = listener.accept().await {
                let _ = sock.write_all(b"SSH-2.0-OpenSSH_9.3\r\n").await;
            }
        });

        let scanner = TcpScanner::new(Duration::from_millis(300));
        let policy = StealthPolicy::normal();
        let request = PortScanRequest {
            range: ports::PortRange { start: port, end: port },
            rate_limit: 0,
            policy: &policy,
            decoys: &[],
        };
        let host = Host::Ip("127.0.0.1".parse().unwrap());
        let found = scanner.scan_ports(&host, &request).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].port, port);
        assert_eq!(found[0].product.as_deref(), Some("OpenSSH"));
        assert_eq!(found[0].version.as_deref(), Some("9.3"));
    }

    /// Listeners on `n` consecutive loopback ports. Nothing accepts on them,
    /// so connects complete in the backlog and the banner read times out.
    fn consecutive_listeners(n: u16) -> (u16, Vec<std::net::TcpListener>) {
        for _ in 0..50 {
            let first = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            let base = first.local_addr().unwrap().port();
            if base > u16::MAX - n {
                continue;
            }
            let rest: Result<Vec<_>, _> = (1..n)
                .map(|i| std::net::TcpListener::bind(("127.0.0.1", base + i)))
                .collect();
            if let Ok(mut listeners) = rest {
                listeners.insert(0, first);
                return (base, listeners);
            }
        }
        panic!("no run of {n} free ports");
    }

    #[tokio::test]
    async fn connects_stay_within_the_concurrency_cap() {
        let (base, _listeners) = consecutive_listeners(6);
        let cfg = StealthConfig {
            normal_concurrency: 2,
            ..StealthConfig::default()
        };
        let policy = StealthPolicy::from_config(false, &cfg);
        let request = PortScanRequest {
            range: ports::PortRange {
                start: base,
                end: base + 5,
            },
            rate_limit: 0,
            policy: &policy,
            decoys: &[],
        };
        let scanner = TcpScanner::new(Duration::from_millis(500));
        let host = Host::Ip("127.0.0.1".parse().unwrap());

        let started = Instant::now();
        let found = scanner.scan_ports(&host, &request).await.unwrap();
        assert_eq!(found.len(), 6);
        // Six silent ports, each held for the banner peek, two at a time.
        let elapsed = started.elapsed();
        assert!(elapsed >= PEEK_TIMEOUT * 3 - Duration::from_millis(10), "{elapsed:?}");
    }

    #[tokio::test]
    async fn unresolvable_name_is_a_resolve_error() {
        let scanner = TcpScanner::new(Duration::from_millis(100));
        let target = Target::Host(Host::Name("does-not-exist.invalid".into()));
        let err = scanner
            .discover(&target, &StealthPolicy::normal())
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::Resolve(_)));
    }
}
