//! Poll loop driving config generation.
//!
//! Each cycle:
//! - Lists the node's allocations
//! - Updates the allocation gauge
//! - Derives, renders and writes the shipper config
//!
//! Cycles never overlap. Errors are logged and the next tick is the retry.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::materialize::ApplyOutcome;
use crate::metrics::Metrics;
use crate::nomad::AllocationSource;
use crate::shipper::LogShipper;

pub struct Poller {
    source: Arc<dyn AllocationSource>,
    shipper: Arc<dyn LogShipper>,
    metrics: Arc<Metrics>,
    interval: Duration,
}

impl Poller {
    pub fn new(
        source: Arc<dyn AllocationSource>,
        shipper: Arc<dyn LogShipper>,
        metrics: Arc<Metrics>,
        interval: Duration,
    ) -> Self {
        Self {
            source,
            shipper,
            metrics,
            interval,
        }
    }

    /// Poll until shutdown is signalled. Every cycle starts after sleeping
    /// one interval.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            shipper = self.shipper.name(),
            interval_secs = self.interval.as_secs_f64(),
            path = %self.shipper.pipeline().writer().path().display(),
            "Starting poll loop"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    if let Err(e) = self.poll_once().await {
                        error!(shipper = self.shipper.name(), error = %e, "Config update failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Poll loop shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Run a single cycle.
    ///
    /// A failed allocation listing is logged and treated as an empty list, so
    /// the generated config follows what could be fetched.
    pub async fn poll_once(&self) -> Result<ApplyOutcome> {
        let allocs = match self.source.list_allocations().await {
            Ok(allocs) => allocs,
            Err(e) => {
                warn!(error = %e, "Failed to list allocations");
                Vec::new()
            }
        };

        self.metrics.set_allocation_count(allocs.len());

        let outcome = self.shipper.derive_and_apply(&allocs).await?;
        debug!(
            alloc_count = allocs.len(),
            written = outcome.is_written(),
            "Poll cycle complete"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::materialize::{CommandRunner, ConfigWriter};
    use crate::nomad::{Allocation, Job, Task, TaskGroup};
    use crate::shipper::{Pipeline, Promtail};
    use crate::source::{DeriverConfig, LogSourceDeriver};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl AllocationSource for CountingSource {
        async fn list_allocations(&self) -> anyhow::Result<Vec<Allocation>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("connection refused");
            }
            Ok(vec![Allocation {
                id: "alloc-1".to_string(),
                task_group: "api".to_string(),
                job: Some(Job {
                    task_groups: vec![TaskGroup {
                        name: "api".to_string(),
                        tasks: vec![Task::new("server", HashMap::new())],
                    }],
                }),
                ..Default::default()
            }])
        }
    }

    struct NoopRunner;

    #[async_trait]
    impl CommandRunner for NoopRunner {
        async fn run(&self, _command: &str) -> Result<String> {
            Ok(String::new())
        }
    }

    fn poller(
        dir: &tempfile::TempDir,
        fail: bool,
        interval: Duration,
    ) -> (Poller, Arc<CountingSource>, Arc<Metrics>) {
        let source = Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
            fail,
        });
        let metrics = Arc::new(Metrics::new().unwrap());
        let deriver = LogSourceDeriver::new(DeriverConfig::default()).unwrap();
        let writer = ConfigWriter::new(dir.path().join("nomad.yaml"), "", Arc::new(NoopRunner));
        let shipper = Arc::new(Promtail::new(Pipeline::new(deriver, writer)));

        let poller = Poller::new(source.clone(), shipper, Arc::clone(&metrics), interval);
        (poller, source, metrics)
    }

    #[tokio::test]
    async fn test_poll_once_updates_gauge_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let (poller, _, metrics) = poller(&dir, false, Duration::from_secs(1));

        assert!(poller.poll_once().await.unwrap().is_written());
        assert_eq!(metrics.allocation_count(), 1.0);
        assert_eq!(poller.poll_once().await.unwrap(), ApplyOutcome::Unchanged);
    }

    #[tokio::test]
    async fn test_fetch_failure_renders_empty_config() {
        let dir = tempfile::tempdir().unwrap();
        let (poller, _, metrics) = poller(&dir, true, Duration::from_secs(1));
        metrics.set_allocation_count(7);

        // An empty target list is still a document, unlike the missing file
        assert!(poller.poll_once().await.unwrap().is_written());
        assert_eq!(metrics.allocation_count(), 0.0);
        let written = std::fs::read_to_string(dir.path().join("nomad.yaml")).unwrap();
        assert_eq!(written.trim(), "[]");
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_period_follows_interval() {
        let dir = tempfile::tempdir().unwrap();
        let (poller, source, _) = poller(&dir, true, Duration::from_secs(10));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move { poller.run(shutdown_rx).await });

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
