//! Stealth policy: concurrency caps, inter-probe jitter and decoy selection.
//!
//! The policy is built once per run and shared read-only by every phase of
//! every target. It performs no I/O apart from [`StealthPolicy::pause`].

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use rand::seq::SliceRandom;

use crate::config::{StealthConfig, MAX_DELAY_SECS};
use crate::network::enclosing_v4_24;
use crate::target::Host;

const USER_AGENTS: [&str; 3] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StealthPolicy {
    enabled: bool,
    concurrency_cap: usize,
    delay_min: Duration,
    delay_max: Duration,
    decoy_count: usize,
    rotate_user_agents: bool,
}

impl StealthPolicy {
    /// Full speed: 20 concurrent sub-probes, no delays, no decoys.
    pub fn normal() -> Self {
        Self {
            enabled: false,
            concurrency_cap: 20,
            delay_min: Duration::ZERO,
            delay_max: Duration::ZERO,
            decoy_count: 0,
            rotate_user_agents: false,
        }
    }

    /// 5 concurrent sub-probes, 100-500ms jitter, 3 decoys.
    pub fn stealth() -> Self {
        Self {
            enabled: true,
            concurrency_cap: 5,
            delay_min: Duration::from_millis(100),
            delay_max: Duration::from_millis(500),
            decoy_count: 3,
            rotate_user_agents: true,
        }
    }

    pub fn from_config(enabled: bool, cfg: &StealthConfig) -> Self {
        if !enabled {
            return Self {
                concurrency_cap: cfg.normal_concurrency.max(1),
                ..Self::normal()
            };
        }
        let [lo, hi] = cfg.delay_range;
        Self {
            enabled: true,
            concurrency_cap: cfg.stealth_concurrency.max(1),
            delay_min: delay_secs(lo),
            delay_max: delay_secs(hi.max(lo)),
            decoy_count: if cfg.use_decoys { cfg.decoy_count } else { 0 },
            rotate_user_agents: cfg.randomize_user_agents,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Upper bound on concurrent sub-probes inside a single phase runner.
    pub fn concurrency_cap(&self) -> usize {
        self.concurrency_cap
    }

    pub fn delay_bounds(&self) -> (Duration, Duration) {
        (self.delay_min, self.delay_max)
    }

    pub fn decoy_count(&self) -> usize {
        self.decoy_count
    }

    /// Uniformly random in `[delay_min, delay_max]`; zero when disabled.
    pub fn next_delay(&self) -> Duration {
        if !self.enabled || self.delay_max.is_zero() {
            return Duration::ZERO;
        }
        let lo = self.delay_min.as_micros() as u64;
        let hi = self.delay_max.as_micros() as u64;
        if lo >= hi {
            return self.delay_min;
        }
        Duration::from_micros(rand::random_range(lo..=hi))
    }

    /// Sleep for [`next_delay`](Self::next_delay); returns immediately when disabled.
    pub async fn pause(&self) {
        let delay = self.next_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    /// Up to `decoy_count` distinct addresses from the /24 around `subject`,
    /// never `subject` itself.
    ///
    /// Hostnames and IPv6 addresses have no enclosing /24 and yield no decoys.
    pub fn generate_decoys(&self, subject: &Host) -> Vec<IpAddr> {
        if self.decoy_count == 0 {
            return Vec::new();
        }
        let Some(IpAddr::V4(ip)) = subject.ip() else {
            return Vec::new();
        };
        let base = u32::from(enclosing_v4_24(ip).network());
        let mut pool: Vec<Ipv4Addr> = (1..=254u32)
            .map(|offset| Ipv4Addr::from(base + offset))
            .filter(|candidate| *candidate != ip)
            .collect();
        pool.shuffle(&mut rand::rng());
        pool.truncate(self.decoy_count);
        pool.into_iter().map(IpAddr::V4).collect()
    }

    pub fn user_agent(&self) -> &'static str {
        if self.enabled && self.rotate_user_agents {
            USER_AGENTS[rand::random_range(0..USER_AGENTS.len())]
        } else {
            USER_AGENTS[0]
        }
    }
}

/// Out-of-range or NaN values are clamped into `[0, MAX_DELAY_SECS]`.
fn delay_secs(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs.clamp(0.0, MAX_DELAY_SECS)).unwrap_or(Duration::ZERO)
}

impl Default for StealthPolicy {
    fn default() -> Self {
        Self::normal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn presets() {
        let n = StealthPolicy::normal();
        assert!(!n.is_enabled());
        assert_eq!(n.concurrency_cap(), 20);
        assert_eq!(n.decoy_count(), 0);

        let s = StealthPolicy::stealth();
        assert!(s.is_enabled());
        assert_eq!(s.concurrency_cap(), 5);
        assert_eq!(
            s.delay_bounds(),
            (Duration::from_millis(100), Duration::from_millis(500))
        );
        assert_eq!(s.decoy_count(), 3);
    }

    #[test]
    fn delays_are_zero_when_disabled() {
        let n = StealthPolicy::normal();
        for _ in 0..50 {
            assert_eq!(n.next_delay(), Duration::ZERO);
        }
    }

    #[test]
    fn delays_stay_within_bounds_and_vary() {
        let s = StealthPolicy::stealth();
        let mut seen = HashSet::new();
        for _ in 0..200 {
            let d = s.next_delay();
            assert!(d >= Duration::from_millis(100) && d <= Duration::from_millis(500), "{d:?}");
            seen.insert(d);
        }
        assert!(seen.len() > 1);
    }

    #[test]
    fn decoys_stay_in_subnet_and_skip_subject() {
        let s = StealthPolicy::stealth();
        let subject = Host::Ip("10.0.0.5".parse().unwrap());
        let net = enclosing_v4_24(Ipv4Addr::new(10, 0, 0, 5));
        for _ in 0..100 {
            let decoys = s.generate_decoys(&subject);
            assert!(decoys.len() <= 3);
            let unique: HashSet<_> = decoys.iter().collect();
            assert_eq!(unique.len(), decoys.len());
            for d in &decoys {
                let IpAddr::V4(v4) = d else { panic!("non-v4 decoy {d}") };
                assert!(net.contains(v4), "{d} outside {net}");
                assert_ne!(d.to_string(), "10.0.0.5");
            }
        }
    }

    #[test]
    fn hostnames_get_no_decoys() {
        let s = StealthPolicy::stealth();
        assert!(s
            .generate_decoys(&Host::Name("intranet.example".into()))
            .is_empty());
        assert!(StealthPolicy::normal()
            .generate_decoys(&Host::Ip("10.0.0.5".parse().unwrap()))
            .is_empty());
    }

    #[test]
    fn config_overrides_caps() {
        let cfg = StealthConfig {
            stealth_concurrency: 2,
            delay_range: [0.0, 0.0],
            use_decoys: false,
            ..StealthConfig::default()
        };
        let p = StealthPolicy::from_config(true, &cfg);
        assert_eq!(p.concurrency_cap(), 2);
        assert_eq!(p.decoy_count(), 0);
        assert_eq!(p.next_delay(), Duration::ZERO);
    }

    #[test]
    fn oversized_delays_are_clamped() {
        let cfg = StealthConfig {
            delay_range: [0.1, 1e30],
            ..StealthConfig::default()
        };
        let p = StealthPolicy::from_config(true, &cfg);
        assert_eq!(
            p.delay_bounds(),
            (Duration::from_millis(100), Duration::from_secs_f64(MAX_DELAY_SECS))
        );

        let cfg = StealthConfig {
            delay_range: [f64::NAN, f64::NAN],
            ..StealthConfig::default()
        };
        let p = StealthPolicy::from_config(true, &cfg);
        assert_eq!(p.delay_bounds(), (Duration::ZERO, Duration::ZERO));
    }

    #[tokio::test(start_paused = true)]
    async fn pause_only_sleeps_in_stealth_mode() {
        let start = tokio::time::Instant::now();
        StealthPolicy::normal().pause().await;
        assert_eq!(start.elapsed(), Duration::ZERO);

        let start = tokio::time::Instant::now();
        StealthPolicy::stealth().pause().await;
        let slept = start.elapsed();
        assert!(
            slept >= Duration::from_millis(100) && slept <= Duration::from_millis(501),
            "{slept:?}"
        );
    }
}
