//! Two-phase granularity conversion.
//!
//! Phase 1 reduces each base granule's observations over the temporal window.
//! Phase 2 reduces the phase 1 values of each target granule's related base
//! granules into one value per target.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use super::aggregate::{self, Sample};
use super::clock::Clock;
use super::relation_mapper::GranularityRelationMapper;
use crate::config::AggregationConfig;
use crate::error::FusionError;
use crate::geometry::GeometryOps;
use crate::model::{
    Aggregate, AggregatedFeature, Feature, GranularityMap, GranuleAggregate, GranuleSet,
    PhaseReport, SpatioTemporallyAggregatedCollection, TemporallyAggregatedCollection,
};
use crate::store::{FeatureStore, Query, TimeWindow, parse_timestamp};

/// Base and target granules fetched once per conversion.
#[derive(Debug, Clone, Default)]
pub struct GranuleCache {
    pub base: GranuleSet,
    pub target: GranuleSet,
}

#[derive(Clone)]
pub struct GranularityConvertor {
    store: Arc<dyn FeatureStore>,
    geometry: Arc<dyn GeometryOps>,
    clock: Arc<dyn Clock>,
    granules: GranularityRelationMapper,
}

impl GranularityConvertor {
    pub fn new(
        store: Arc<dyn FeatureStore>,
        geometry: Arc<dyn GeometryOps>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let granules = GranularityRelationMapper::new(store.clone(), geometry.clone());
        Self {
            store,
            geometry,
            clock,
            granules,
        }
    }

    /// Runs both phases for one feature type against the current clock.
    #[instrument(skip_all, fields(feature_type = %map.feature_type))]
    pub async fn convert(
        &self,
        map: &GranularityMap,
        config: &AggregationConfig,
    ) -> Result<SpatioTemporallyAggregatedCollection, FusionError> {
        let reference = self.clock.now();
        self.check_schema(config).await;

        let cache = self.load_granules(map).await?;
        let temporal = self
            .temporal_aggregate(map, config, &cache.base, reference)
            .await?;
        let report = &temporal.report;
        info!(
            granules = temporal.features.len(),
            skipped_records = report.skipped_records,
            omitted_granules = report.omitted_granules,
            failed_granules = report.failed_granules.len(),
            "Temporal phase complete"
        );

        let collection = self.spatial_aggregate(map, config, &cache, &temporal);
        info!(
            targets = collection.features.len(),
            no_data = collection.features.iter().filter(|f| f.value.is_no_data()).count(),
            "Spatial phase complete"
        );
        Ok(collection)
    }

    /// Fetches both granule sets. Failure here aborts the conversion.
    pub async fn load_granules(&self, map: &GranularityMap) -> Result<GranuleCache, FusionError> {
        Ok(GranuleCache {
            base: self
                .granules
                .granule_set(&map.base_spatial_granularity, map.extent)
                .await?,
            target: self
                .granules
                .granule_set(&map.target_spatial_granularity, map.extent)
                .await?,
        })
    }

    async fn check_schema(&self, config: &AggregationConfig) {
        match self.store.attribute_names(&config.feature_type).await {
            Ok(names) => {
                for column in [&config.index_col, &config.aggregate_on, &config.timestamp_column] {
                    if !names.contains(column) {
                        warn!(column = %column, "Attribute not in feature type schema");
                    }
                }
            }
            Err(e) => warn!(error = %e, kind = e.kind(), "Could not read feature type schema"),
        }
    }

    /// Phase 1: one value per base granule from observations in
    /// `[reference - window, reference]`.
    ///
    /// Granules without a valid observation are omitted; records that fail to
    /// parse are skipped and counted in the report. Fails with
    /// [`FusionError::Config`] when the window reaches outside the date range.
    pub async fn temporal_aggregate(
        &self,
        map: &GranularityMap,
        config: &AggregationConfig,
        bases: &GranuleSet,
        reference: DateTime<Utc>,
    ) -> Result<TemporallyAggregatedCollection, FusionError> {
        let window = map
            .temporal
            .window()
            .and_then(|length| TimeWindow::ending_at(reference, length))
            .ok_or_else(|| {
                FusionError::Config(format!(
                    "window of {} hours for `{}` is out of range",
                    map.temporal.relation_value, map.feature_type
                ))
            })?;
        let method = config.temporal_aggregation_method;
        if config.temporal_interpolation {
            warn!("Temporal interpolation is not supported, granules reduce to NoData");
        }

        let mut report = PhaseReport::default();
        let mut features = Vec::new();

        for granule in bases.iter() {
            let query = Query::all(&config.feature_type)
                .equals(&config.index_col, &granule.id)
                .during(&config.timestamp_column, window);
            let records = match self.store.query(&query).await {
                Ok(records) => records,
                Err(e) => {
                    warn!(granule = %granule.id, error = %e, kind = e.kind(), "Observation query failed");
                    report.failed_granules.push((granule.id.clone(), e));
                    continue;
                }
            };

            // Keyed by timestamp: a repeated timestamp keeps the last record.
            let mut series: BTreeMap<DateTime<Utc>, f64> = BTreeMap::new();
            for record in &records {
                match observation(record, config) {
                    Ok((ts, value)) if window.contains(ts) => {
                        series.insert(ts, value);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        debug!(error = %e, "Record skipped");
                        report.skipped_records += 1;
                    }
                }
            }

            if series.is_empty() {
                report.omitted_granules += 1;
                continue;
            }

            let samples: Vec<Sample> = series.values().map(|&v| Sample::new(v)).collect();
            let value = if config.temporal_interpolation {
                Aggregate::NoData
            } else {
                aggregate::invoke(method, &samples)
            };
            features.push(GranuleAggregate {
                granule_id: granule.id.clone(),
                value,
                geometry: granule.geometry.clone(),
                observations: samples.len(),
            });
        }

        Ok(TemporallyAggregatedCollection {
            feature_type: config.feature_type.clone(),
            features,
            base_spatial_granularity: map.base_spatial_granularity.clone(),
            target_temporal_granularity: map.target_temporal_granularity.clone(),
            reference,
            report,
        })
    }

    /// Phase 2: exactly one feature per target granule.
    ///
    /// Only related base granules that produced a value in phase 1 contribute;
    /// a target with none gets NoData.
    pub fn spatial_aggregate(
        &self,
        map: &GranularityMap,
        config: &AggregationConfig,
        cache: &GranuleCache,
        temporal: &TemporallyAggregatedCollection,
    ) -> SpatioTemporallyAggregatedCollection {
        let method = config.spatial_aggregation_method;
        if config.spatial_interpolation {
            warn!("Spatial interpolation is not supported, targets reduce to NoData");
        }

        let values: HashMap<&str, f64> = temporal
            .features
            .iter()
            .filter_map(|f| Some((f.granule_id.as_str(), f.value.value()?)))
            .collect();
        let timestamp = format_timestamp(temporal.reference, &config.timestamp_format);

        let features = cache
            .target
            .iter()
            .map(|target| {
                let base_ids: &[String] = match map.spatial.base_ids(&target.id) {
                    Some(ids) => ids,
                    None => {
                        debug!(granule = %target.id, "Target not in relation map");
                        &[]
                    }
                };

                let samples: Vec<Sample> = base_ids
                    .iter()
                    .filter_map(|id| {
                        let value = *values.get(id.as_str())?;
                        let distance = if method.needs_distances() {
                            self.distance(cache, target.geometry.as_ref(), id)
                        } else {
                            None
                        };
                        Some(Sample { value, distance })
                    })
                    .collect();

                let value = if config.spatial_interpolation {
                    Aggregate::NoData
                } else {
                    aggregate::invoke(method, &samples)
                };
                AggregatedFeature {
                    granule_id: target.id.clone(),
                    value,
                    geometry: target.geometry.clone(),
                    timestamp: timestamp.clone(),
                    contributors: samples.len(),
                }
            })
            .collect();

        SpatioTemporallyAggregatedCollection {
            feature_type: config.feature_type.clone(),
            features,
            target_spatial_granularity: map.target_spatial_granularity.clone(),
            target_temporal_granularity: map.target_temporal_granularity.clone(),
            reference: temporal.reference,
            timestamp,
            attributes: vec![
                config.index_col.clone(),
                config.aggregate_on.clone(),
                config.timestamp_column.clone(),
            ],
        }
    }

    fn distance(
        &self,
        cache: &GranuleCache,
        target: Option<&geo::Geometry<f64>>,
        base_id: &str,
    ) -> Option<f64> {
        let base = cache.base.get(base_id)?.geometry.as_ref()?;
        self.geometry.distance(target?, base)
    }
}

fn observation(
    record: &Feature,
    config: &AggregationConfig,
) -> Result<(DateTime<Utc>, f64), FusionError> {
    let invalid = |field: &str, value: Option<&str>| FusionError::InvalidRecord {
        record: record.id.clone(),
        field: field.to_string(),
        value: value.unwrap_or_default().to_string(),
    };

    let raw_ts = record.attribute(&config.timestamp_column);
    let ts = raw_ts
        .and_then(parse_timestamp)
        .ok_or_else(|| invalid(&config.timestamp_column, raw_ts))?;

    let raw_value = record.attribute(&config.aggregate_on);
    let value = raw_value
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .ok_or_else(|| invalid(&config.aggregate_on, raw_value))?;

    Ok((ts, value))
}

/// Formats `reference` with a chrono format string, `None` if the format is invalid.
pub fn format_timestamp(reference: DateTime<Utc>, format: &str) -> Option<String> {
    let mut out = String::new();
    match write!(out, "{}", reference.format(format)) {
        Ok(()) => Some(out),
        Err(_) => {
            warn!(format, "Invalid timestamp format, timestamp omitted");
            None
        }
    }
}
