use tracing::{debug, warn};

use crate::probe::NetworkScanner;
use crate::stealth::StealthPolicy;
use crate::target::Target;
use crate::types::{DiscoveryOutput, PhaseResult};

/// Live hosts for `target`. A target where nothing answers is a failed
/// discovery, so the orchestrator can fall back to the literal target.
pub async fn run(
    network: &dyn NetworkScanner,
    target: &Target,
    policy: &StealthPolicy,
) -> PhaseResult<DiscoveryOutput> {
    let hosts = match network.discover(target, policy).await {
        Ok(hosts) if hosts.is_empty() => {
            warn!(%target, "no live hosts found");
            return PhaseResult::failed("no live hosts found");
        }
        Ok(hosts) => {
            debug!(%target, live = hosts.len(), "discovery finished");
            Ok(hosts)
        }
        Err(e) => {
            warn!(%target, error = %e, "discovery failed");
            Err(e)
        }
    };
    PhaseResult::from_probe(hosts.map(|hosts| DiscoveryOutput {
        hosts_discovered: hosts,
    }))
}
