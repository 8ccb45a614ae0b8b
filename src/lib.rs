//! Library crate for sniffy-rs: multi-phase reconnaissance across one or many targets.
pub mod config;
pub mod error;
pub mod logging;
pub mod network;
pub mod orchestrator;
pub mod phases;
pub mod ports;
pub mod probe;
pub mod report;
pub mod scheduler;
pub mod stealth;
pub mod target;
pub mod types;
