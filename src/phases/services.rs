use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::probe::{ServiceKind, ServiceProber};
use crate::stealth::StealthPolicy;
use crate::types::{PhaseResult, PortFinding, ServiceFinding, ServiceOutput};

/// Banner grab and protocol probe for every open port, up to the policy's
/// concurrency cap at once.
pub async fn run(
    prober: Arc<dyn ServiceProber>,
    open_ports: &[PortFinding],
    banner_timeout: Duration,
    policy: &StealthPolicy,
) -> PhaseResult<ServiceOutput> {
    let sem = Arc::new(Semaphore::new(policy.concurrency_cap()));
    let mut set = JoinSet::new();

    for finding in open_ports.iter().cloned() {
        policy.pause().await;
        let Ok(permit) = sem.clone().acquire_owned().await else {
            break;
        };
        let prober = Arc::clone(&prober);
        set.spawn(async move {
            let _permit = permit;
            let banner = match finding.banner {
                Some(b) => Some(b),
                None => {
                    prober
                        .grab_banner(&finding.host, finding.port, banner_timeout)
                        .await
                }
            };
            let service = finding
                .service_name
                .unwrap_or_else(|| "unknown".to_string());
            let kind = ServiceKind::classify(&service, finding.port);
            let details = prober.probe(&finding.host, finding.port, kind).await;
            ServiceFinding {
                host: finding.host,
                port: finding.port,
                service,
                banner,
                details,
            }
        });
    }

    let mut services = Vec::with_capacity(open_ports.len());
    while let Some(res) = set.join_next().await {
        match res {
            Ok(found) => services.push(found),
            Err(e) => warn!(error = %e, "service probe task aborted"),
        }
    }
    services.sort_by(|a, b| (&a.host, a.port).cmp(&(&b.host, b.port)));
    debug!(services = services.len(), "service enumeration finished");
    PhaseResult::Ok(ServiceOutput { services })
}
