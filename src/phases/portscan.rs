use tracing::{debug, info, warn};

use crate::ports::PortRange;
use crate::probe::{NetworkScanner, PortScanRequest};
use crate::stealth::StealthPolicy;
use crate::target::Host;
use crate::types::{PhaseResult, PortScanOutput};

/// Scan every host in turn and merge their open ports.
///
/// A host that fails is recorded in `errors`; the phase only fails when no
/// host could be scanned at all.
pub async fn run(
    network: &dyn NetworkScanner,
    hosts: &[Host],
    range: PortRange,
    rate_limit: u32,
    policy: &StealthPolicy,
) -> PhaseResult<PortScanOutput> {
    if hosts.is_empty() {
        return PhaseResult::failed("no hosts to scan");
    }

    let mut out = PortScanOutput::default();
    let mut scanned = 0usize;
    for host in hosts {
        let decoys = if policy.is_enabled() {
            policy.generate_decoys(host)
        } else {
            Vec::new()
        };
        let request = PortScanRequest {
            range,
            rate_limit,
            policy,
            decoys: &decoys,
        };
        info!("scanning ports {range} on {host}");
        match network.scan_ports(host, &request).await {
            Ok(found) => {
                scanned += 1;
                let open: Vec<_> = found.into_iter().filter(|p| p.is_open()).collect();
                debug!(%host, open = open.len(), "ports scanned");
                if !open.is_empty() {
                    match network.detect_os(host).await {
                        Ok(Some(os)) => out.os_detection.push(os),
                        Ok(None) => {}
                        Err(e) => debug!(%host, error = %e, "os detection failed"),
                    }
                }
                out.open_ports.extend(open);
            }
            Err(e) => {
                warn!(%host, error = %e, "port scan failed");
                out.errors.push(format!("{host}: {e}"));
            }
        }
        if !decoys.is_empty() {
            out.decoys.insert(host.clone(), decoys);
        }
    }

    if scanned == 0 {
        return PhaseResult::failed(out.errors.join("; "));
    }
    PhaseResult::Ok(out)
}
