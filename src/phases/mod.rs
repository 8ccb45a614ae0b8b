//! Phase runners.
//!
//! Each runner drives one external capability for one target and returns a
//! [`PhaseResult`](crate::types::PhaseResult). Failures from the capability
//! are mapped into `PhaseResult::Failed`; nothing escapes to the orchestrator.
//!
//! Runners that fan out sub-probes bound them with a `Semaphore` sized by
//! [`StealthPolicy::concurrency_cap`](crate::stealth::StealthPolicy::concurrency_cap)
//! and sleep [`StealthPolicy::pause`](crate::stealth::StealthPolicy::pause)
//! between dispatches. The cap is per runner: with `max_parallel_targets`
//! targets in flight, up to `max_parallel_targets × concurrency_cap` probes can
//! be outstanding at once. Lower either knob to reduce the ceiling.

pub mod discovery;
pub mod portscan;
pub mod services;
pub mod vuln;
pub mod web;
