//! Batch scheduling across targets.
//!
//! Up to `max_parallel` orchestrator runs are in flight at once. Each run
//! returns its own finished entry; only this loop writes the batch, into a
//! slot per submitted target, so the result keeps submission order no matter
//! which target finishes first.

use std::collections::HashSet;
use std::future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::{AbortHandle, JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::TargetFatalError;
use crate::orchestrator::ScanOrchestrator;
use crate::target::Target;
use crate::types::{BatchEntry, BatchResult, FailureKind};

/// Aborts the wrapped task when dropped, so a scan abandoned by the
/// scheduler does not keep running in the background.
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn panic_message(err: JoinError) -> String {
    match err.try_into_panic() {
        Ok(payload) => payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "panic".to_string()),
        Err(err) => err.to_string(),
    }
}

pub struct ScopeScheduler {
    orchestrator: ScanOrchestrator,
    max_parallel: usize,
    timeout: Option<Duration>,
}

impl ScopeScheduler {
    pub fn new(orchestrator: ScanOrchestrator, max_parallel: usize) -> Self {
        Self {
            orchestrator,
            max_parallel: max_parallel.max(1),
            timeout: None,
        }
    }

    /// Bound the whole batch. Targets unfinished at the deadline are recorded
    /// as timed out; their partial output is discarded.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Scan `targets` and collect one entry per distinct target.
    ///
    /// Cancelling `cancel` stops the batch; unfinished targets are recorded
    /// as interrupted.
    pub async fn run(&self, targets: Vec<Target>, cancel: CancellationToken) -> BatchResult {
        let mut seen = HashSet::new();
        let targets: Vec<(String, Target)> = targets
            .into_iter()
            .filter_map(|t| {
                let key = t.key();
                if seen.insert(key.clone()) {
                    Some((key, t))
                } else {
                    warn!("duplicate target {key} ignored");
                    None
                }
            })
            .collect();
        let total = targets.len();
        info!(
            "scanning {total} target(s), {} at a time",
            self.max_parallel.min(total.max(1))
        );

        let sem = Arc::new(Semaphore::new(self.max_parallel));
        let mut set = JoinSet::new();
        for (idx, (_, target)) in targets.iter().enumerate() {
            let sem = Arc::clone(&sem);
            let orchestrator = self.orchestrator.clone();
            let target = target.clone();
            set.spawn(async move {
                let Ok(_permit) = sem.acquire_owned().await else {
                    return (idx, BatchEntry::failed(FailureKind::Fatal, "scheduler closed"));
                };
                let handle = tokio::spawn(async move { orchestrator.run(&target).await });
                let _guard = AbortOnDrop(handle.abort_handle());
                let entry = match handle.await {
                    Ok(Ok(result)) => BatchEntry::Completed(Box::new(result)),
                    Ok(Err(fatal)) => BatchEntry::failed(FailureKind::Fatal, fatal.to_string()),
                    Err(join) => {
                        let fatal = TargetFatalError::Panicked(panic_message(join));
                        BatchEntry::failed(FailureKind::Fatal, fatal.to_string())
                    }
                };
                (idx, entry)
            });
        }

        let mut slots: Vec<Option<BatchEntry>> = vec![None; total];
        let mut done = 0usize;
        let deadline = async {
            match self.timeout {
                Some(d) => tokio::time::sleep(d).await,
                None => future::pending().await,
            }
        };
        tokio::pin!(deadline);

        let stopped = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break Some(FailureKind::Interrupted),
                _ = &mut deadline => break Some(FailureKind::Timeout),
                next = set.join_next() => match next {
                    Some(Ok((idx, entry))) => {
                        done += 1;
                        match &entry {
                            BatchEntry::Completed(_) => {
                                info!("[{done}/{total}] {} completed", targets[idx].0)
                            }
                            BatchEntry::Failed { error, .. } => {
                                error!("[{done}/{total}] {} failed: {error}", targets[idx].0)
                            }
                        }
                        slots[idx] = Some(entry);
                    }
                    Some(Err(e)) => warn!(error = %e, "scan task lost"),
                    None => break None,
                },
            }
        };

        if let Some(kind) = stopped {
            let pending = slots.iter().filter(|s| s.is_none()).count();
            warn!("batch stopped ({kind:?}), {pending} target(s) unfinished");
            set.shutdown().await;
        }

        let reason = match stopped {
            Some(FailureKind::Timeout) => match self.timeout {
                Some(d) => format!("scan timed out after {}s", d.as_secs()),
                None => "scan timed out".to_string(),
            },
            Some(FailureKind::Interrupted) => "scan interrupted by user".to_string(),
            _ => "scan task aborted".to_string(),
        };
        let kind = stopped.unwrap_or(FailureKind::Fatal);

        let entries = targets
            .into_iter()
            .zip(slots)
            .map(|((key, _), slot)| {
                let entry = slot.unwrap_or_else(|| BatchEntry::failed(kind, reason.clone()));
                (key, entry)
            })
            .collect();
        BatchResult::from_entries(entries)
    }
}
