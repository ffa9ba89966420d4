use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::engine::FuseEngine;

/// What happens when a tick arrives while the previous sweep is still running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlapPolicy {
    /// Sweeps run inline; ticks missed while a sweep runs are dropped.
    #[default]
    Skip,
    /// Every tick starts a sweep, even if earlier ones are still running.
    Concurrent,
}

/// Runs [`FuseEngine::sweep`] on a fixed period until stopped.
///
/// The first sweep starts immediately. Sweeps that shutdown cancelled before
/// any feature type converted are not counted as completed.
pub struct Scheduler {
    shutdown: watch::Sender<bool>,
    completed: watch::Receiver<u64>,
    task: JoinHandle<()>,
}

impl Scheduler {
    pub fn start(engine: Arc<FuseEngine>, period: Duration, overlap: OverlapPolicy) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (completed_tx, completed) = watch::channel(0u64);
        info!(period_ms = period.as_millis() as u64, ?overlap, "Scheduler started");
        let task = tokio::spawn(run(engine, period, overlap, shutdown_rx, Arc::new(completed_tx)));
        Self {
            shutdown,
            completed,
            task,
        }
    }

    /// Sweeps finished so far.
    pub fn completed(&self) -> u64 {
        *self.completed.borrow()
    }

    /// Waits until at least `count` sweeps have finished.
    pub async fn wait_for_sweeps(&self, count: u64) {
        let mut completed = self.completed.clone();
        if completed.wait_for(|n| *n >= count).await.is_err() {
            warn!("Scheduler loop ended before reaching the requested sweep count");
        }
    }

    /// Signals shutdown and waits for the loop and any in-flight sweeps to end.
    ///
    /// A sweep in progress stops at the next feature type boundary.
    pub async fn stop(self) -> u64 {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            error!(error = %e, "Scheduler task panicked");
        }
        let completed = *self.completed.borrow();
        info!(completed, "Scheduler stopped");
        completed
    }
}

async fn run(
    engine: Arc<FuseEngine>,
    period: Duration,
    overlap: OverlapPolicy,
    mut shutdown: watch::Receiver<bool>,
    completed: Arc<watch::Sender<u64>>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut in_flight = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(e) = joined {
                    error!(error = %e, "Sweep task panicked");
                }
            }
            _ = ticker.tick() => {
                if *shutdown.borrow() {
                    break;
                }
                let engine = engine.clone();
                let shutdown = shutdown.clone();
                let completed = completed.clone();
                let sweep = async move {
                    let report = engine.sweep(Some(&shutdown)).await;
                    let cancelled = report.cancelled();
                    report.join_publishes().await;
                    if cancelled {
                        debug!("Sweep cancelled before converting anything, not counted");
                        return;
                    }
                    completed.send_modify(|n| *n += 1);
                    debug!(completed = *completed.borrow(), "Sweep finished");
                };
                match overlap {
                    OverlapPolicy::Skip => sweep.await,
                    OverlapPolicy::Concurrent => {
                        in_flight.spawn(sweep);
                    }
                }
            }
        }
    }

    while let Some(joined) = in_flight.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "Sweep task panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fuse::clock::SystemClock;
    use crate::geometry::GeometryKernel;
    use crate::publish::testing::RecordingPublisher;
    use crate::store::InMemoryStore;

    fn engine() -> Arc<FuseEngine> {
        Arc::new(FuseEngine::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(GeometryKernel::default()),
            Arc::new(SystemClock),
            Arc::new(RecordingPublisher::default()),
        ))
    }

    #[tokio::test]
    async fn test_runs_repeatedly_until_stopped() {
        let scheduler = Scheduler::start(engine(), Duration::from_millis(10), OverlapPolicy::Skip);
        scheduler.wait_for_sweeps(3).await;

        let completed = scheduler.stop().await;
        assert!(completed >= 3);
    }

    #[tokio::test]
    async fn test_concurrent_policy_drains_on_stop() {
        let scheduler = Scheduler::start(
            engine(),
            Duration::from_millis(10),
            OverlapPolicy::Concurrent,
        );
        scheduler.wait_for_sweeps(2).await;
        assert!(scheduler.stop().await >= 2);
    }

    #[tokio::test]
    async fn test_first_sweep_is_immediate() {
        let scheduler = Scheduler::start(engine(), Duration::from_secs(3600), OverlapPolicy::Skip);
        tokio::time::timeout(Duration::from_secs(5), scheduler.wait_for_sweeps(1))
            .await
            .unwrap();
        assert_eq!(scheduler.stop().await, 1);
    }

    #[tokio::test]
    async fn test_cancelled_sweeps_are_not_counted() {
        use crate::config::{
            AggregationConfig, AggregationMethod, GranularityRelationConfig,
            SpatialMappingMethod, TemporalMappingMethod,
        };
        use std::collections::BTreeMap;

        let engine = engine();
        let relation = GranularityRelationConfig {
            feature_type: "rain".into(),
            spatial_granularity: "stations".into(),
            target_spatial_granularity: "areas".into(),
            spatial_mapping: SpatialMappingMethod::Contain,
            temporal_granularity: "hour".into(),
            target_temporal_granularity: "day".into(),
            temporal_mapping: TemporalMappingMethod::Aggregate,
            relation_value: 24,
            extent: None,
        };
        let aggregation = AggregationConfig {
            feature_type: "rain".into(),
            index_col: "StationID".into(),
            aggregate_on: "ObservedValue".into(),
            timestamp_column: "dtg".into(),
            spatial_aggregation_method: AggregationMethod::Mean,
            temporal_aggregation_method: AggregationMethod::Mean,
            spatial_interpolation: false,
            temporal_interpolation: false,
            timestamp_format: "%Y-%m-%d".into(),
        };
        engine
            .reconfigure(
                BTreeMap::from([("rain".to_string(), relation)]),
                BTreeMap::from([("rain".to_string(), aggregation)]),
            )
            .await;

        let (shutdown, shutdown_rx) = watch::channel(true);
        let (completed_tx, completed) = watch::channel(0u64);
        // Shutdown already signalled: the loop must not count a sweep.
        run(
            engine,
            Duration::from_millis(10),
            OverlapPolicy::Skip,
            shutdown_rx,
            Arc::new(completed_tx),
        )
        .await;
        drop(shutdown);
        assert_eq!(*completed.borrow(), 0);
    }

    #[test]
    fn test_overlap_policy_serde() {
        let policy: OverlapPolicy = serde_json::from_str("\"concurrent\"").unwrap();
        assert_eq!(policy, OverlapPolicy::Concurrent);
        assert_eq!(OverlapPolicy::default(), OverlapPolicy::Skip);
    }
}
