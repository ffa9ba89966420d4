use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwap;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{Instrument, error, info, info_span, warn};

use super::clock::Clock;
use super::convertor::GranularityConvertor;
use super::relation_mapper::GranularityRelationMapper;
use crate::config::{AggregationConfig, GranularityRelationConfig};
use crate::error::FusionError;
use crate::geometry::GeometryOps;
use crate::model::{GranularityMap, SpatioTemporallyAggregatedCollection};
use crate::publish::Publisher;
use crate::store::FeatureStore;

/// Configuration and relation maps a sweep reads from.
///
/// Replaced as a whole; a sweep in progress keeps the snapshot it started with.
#[derive(Debug, Clone, Default)]
pub struct EngineState {
    pub relation_configs: BTreeMap<String, GranularityRelationConfig>,
    pub aggregation_configs: BTreeMap<String, AggregationConfig>,
    pub maps: BTreeMap<String, Arc<GranularityMap>>,
}

/// Result of one pass over every feature type with a granularity map.
#[derive(Debug, Default)]
pub struct SweepReport {
    /// Feature type → features produced, or why it failed.
    pub outcomes: Vec<(String, Result<usize, FusionError>)>,
    /// Publishing tasks spawned for successful conversions.
    pub publishes: Vec<JoinHandle<()>>,
}

impl SweepReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|(_, r)| r.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    /// True when shutdown cancelled every feature type before it converted.
    pub fn cancelled(&self) -> bool {
        !self.outcomes.is_empty()
            && self
                .outcomes
                .iter()
                .all(|(_, r)| matches!(r, Err(FusionError::Cancelled(_))))
    }

    pub fn outcome(&self, feature_type: &str) -> Option<&Result<usize, FusionError>> {
        self.outcomes
            .iter()
            .find(|(ft, _)| ft == feature_type)
            .map(|(_, r)| r)
    }

    /// Waits for every spawned publish to finish.
    pub async fn join_publishes(self) {
        for handle in self.publishes {
            if let Err(e) = handle.await {
                error!(error = %e, "Publish task panicked");
            }
        }
    }
}

/// Owns the granularity map table and drives conversion sweeps.
pub struct FuseEngine {
    mapper: GranularityRelationMapper,
    convertor: GranularityConvertor,
    publisher: Arc<dyn Publisher>,
    state: ArcSwap<EngineState>,
}

impl FuseEngine {
    pub fn new(
        store: Arc<dyn FeatureStore>,
        geometry: Arc<dyn GeometryOps>,
        clock: Arc<dyn Clock>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            mapper: GranularityRelationMapper::new(store.clone(), geometry.clone()),
            convertor: GranularityConvertor::new(store, geometry, clock),
            publisher,
            state: ArcSwap::from_pointee(EngineState::default()),
        }
    }

    /// Current configuration and map table.
    pub fn snapshot(&self) -> Arc<EngineState> {
        self.state.load_full()
    }

    pub fn map(&self, feature_type: &str) -> Option<Arc<GranularityMap>> {
        self.state.load().maps.get(feature_type).cloned()
    }

    /// Replaces both config tables and rebuilds every granularity map.
    ///
    /// The new table is swapped in only once fully built. Returns the number of maps.
    pub async fn reconfigure(
        &self,
        relation_configs: BTreeMap<String, GranularityRelationConfig>,
        aggregation_configs: BTreeMap<String, AggregationConfig>,
    ) -> usize {
        let maps = self.build_maps(&relation_configs).await;
        let count = maps.len();
        self.state.store(Arc::new(EngineState {
            relation_configs,
            aggregation_configs,
            maps,
        }));
        info!(maps = count, "Granularity map table replaced");
        count
    }

    /// Rebuilds the maps from the current relation configs, e.g. after the
    /// granule sets changed in the store.
    pub async fn refresh_maps(&self) -> usize {
        let current = self.snapshot();
        self.reconfigure(
            current.relation_configs.clone(),
            current.aggregation_configs.clone(),
        )
        .await
    }

    async fn build_maps(
        &self,
        relation_configs: &BTreeMap<String, GranularityRelationConfig>,
    ) -> BTreeMap<String, Arc<GranularityMap>> {
        let mut maps = BTreeMap::new();
        for (feature_type, config) in relation_configs {
            let map = self.mapper.build_granularity_map(config).await;
            maps.insert(feature_type.clone(), Arc::new(map));
        }
        maps
    }

    /// Converts one feature type on demand without publishing.
    pub async fn convert(
        &self,
        feature_type: &str,
    ) -> Result<SpatioTemporallyAggregatedCollection, FusionError> {
        let state = self.snapshot();
        let map = state
            .maps
            .get(feature_type)
            .ok_or_else(|| FusionError::MissingRelationMap(feature_type.to_string()))?;
        let config = state
            .aggregation_configs
            .get(feature_type)
            .ok_or_else(|| FusionError::MissingAggregationConfig(feature_type.to_string()))?;
        self.convertor.convert(map, config).await
    }

    /// Converts every feature type in the map table, in feature-type order.
    ///
    /// Each conversion runs on its own task: an error or panic is recorded for
    /// that feature type and the sweep moves on. When `shutdown` turns true the
    /// remaining feature types are recorded as cancelled.
    #[tracing::instrument(skip_all)]
    pub async fn sweep(&self, shutdown: Option<&watch::Receiver<bool>>) -> SweepReport {
        let started = Instant::now();
        let state = self.snapshot();
        let mut report = SweepReport::default();

        if state.maps.is_empty() {
            info!("Granularity map table is empty, nothing to aggregate");
            return report;
        }

        for (feature_type, map) in &state.maps {
            if shutdown.is_some_and(|rx| *rx.borrow()) {
                report
                    .outcomes
                    .push((feature_type.clone(), Err(FusionError::Cancelled(feature_type.clone()))));
                continue;
            }

            let result = match state.aggregation_configs.get(feature_type) {
                Some(config) => self.convert_isolated(map.clone(), config.clone()).await,
                None => Err(FusionError::MissingAggregationConfig(feature_type.clone())),
            };

            match result {
                Ok(collection) => {
                    report
                        .outcomes
                        .push((feature_type.clone(), Ok(collection.features.len())));
                    report.publishes.push(self.spawn_publish(collection));
                }
                Err(e) => {
                    warn!(feature_type = %feature_type, error = %e, kind = e.kind(), "Conversion failed");
                    report.outcomes.push((feature_type.clone(), Err(e)));
                }
            }
        }

        info!(
            succeeded = report.succeeded(),
            failed = report.failed(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Sweep complete"
        );
        report
    }

    async fn convert_isolated(
        &self,
        map: Arc<GranularityMap>,
        config: AggregationConfig,
    ) -> Result<SpatioTemporallyAggregatedCollection, FusionError> {
        let convertor = self.convertor.clone();
        let feature_type = config.feature_type.clone();
        let task = tokio::spawn(async move { convertor.convert(&map, &config).await });
        match task.await {
            Ok(result) => result,
            Err(e) => Err(FusionError::Aborted {
                feature_type,
                message: e.to_string(),
            }),
        }
    }

    fn spawn_publish(&self, collection: SpatioTemporallyAggregatedCollection) -> JoinHandle<()> {
        let publisher = self.publisher.clone();
        let span = info_span!(
            "publish",
            publisher = publisher.name(),
            feature_type = %collection.feature_type
        );
        tokio::spawn(
            async move {
                if let Err(e) = publisher.publish(&collection).await {
                    let err = FusionError::Publish {
                        feature_type: collection.feature_type.clone(),
                        message: format!("{e:#}"),
                    };
                    error!(error = %err, kind = err.kind(), "Publish failed");
                }
            }
            .instrument(span),
        )
    }
}
