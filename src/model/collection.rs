//! Per-cycle aggregation results.

use chrono::{DateTime, Utc};
use geo::Geometry;
use serde::Serialize;

use crate::error::FusionError;

/// Outcome of reducing a value set: a scalar, or the NoData sentinel when
/// nothing valid contributed (or the method cannot produce a value).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(into = "Option<f64>")]
pub enum Aggregate {
    Value(f64),
    NoData,
}

impl Aggregate {
    pub fn value(self) -> Option<f64> {
        match self {
            Aggregate::Value(v) => Some(v),
            Aggregate::NoData => None,
        }
    }

    pub fn is_no_data(self) -> bool {
        matches!(self, Aggregate::NoData)
    }
}

impl From<Aggregate> for Option<f64> {
    fn from(aggregate: Aggregate) -> Self {
        aggregate.value()
    }
}

/// One base granule reduced over the temporal window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GranuleAggregate {
    pub granule_id: String,
    pub value: Aggregate,
    pub geometry: Option<Geometry<f64>>,
    /// Valid observations that went into `value`.
    pub observations: usize,
}

/// What phase 1 skipped or could not read, surfaced instead of swallowed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhaseReport {
    /// Records the store returned but whose value or timestamp did not parse.
    ///
    /// Stores that evaluate the window predicate themselves, like
    /// `InMemoryStore`, already drop records with an unparseable timestamp,
    /// so in practice this counts bad values.
    pub skipped_records: usize,
    /// Granules with no valid observation in the window.
    pub omitted_granules: usize,
    /// Granules whose observation query failed.
    pub failed_granules: Vec<(String, FusionError)>,
}

/// Phase 1 output: one entry per base granule with valid observations.
#[derive(Debug, Clone, PartialEq)]
pub struct TemporallyAggregatedCollection {
    pub feature_type: String,
    pub features: Vec<GranuleAggregate>,
    pub base_spatial_granularity: String,
    pub target_temporal_granularity: String,
    pub reference: DateTime<Utc>,
    pub report: PhaseReport,
}

impl TemporallyAggregatedCollection {
    pub fn get(&self, granule_id: &str) -> Option<&GranuleAggregate> {
        self.features.iter().find(|f| f.granule_id == granule_id)
    }
}

/// One target granule in the final output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatedFeature {
    pub granule_id: String,
    pub value: Aggregate,
    pub geometry: Option<Geometry<f64>>,
    /// Formatted reference timestamp, `None` if formatting failed.
    pub timestamp: Option<String>,
    /// Base granules that contributed a value.
    pub contributors: usize,
}

/// Final per-cycle output for one feature type: one feature per target granule.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpatioTemporallyAggregatedCollection {
    pub feature_type: String,
    pub features: Vec<AggregatedFeature>,
    pub target_spatial_granularity: String,
    pub target_temporal_granularity: String,
    pub reference: DateTime<Utc>,
    pub timestamp: Option<String>,
    pub attributes: Vec<String>,
}

impl SpatioTemporallyAggregatedCollection {
    pub fn get(&self, granule_id: &str) -> Option<&AggregatedFeature> {
        self.features.iter().find(|f| f.granule_id == granule_id)
    }
}
