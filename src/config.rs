//! Granularity and aggregation configuration.
//!
//! Stored as a single JSON document on disk:
//! ```json
//! {
//!   "schedule": { "period_secs": 20, "overlap": "skip" },
//!   "distance_metric": "euclidean",
//!   "sources": [
//!     { "type_name": "weatherstations", "format": "granules_json", "location": "data/stations.json" },
//!     { "type_name": "precipitation", "format": "csv", "location": "data/rainfall.csv" }
//!   ],
//!   "granularity_relations": [{
//!     "feature_type": "precipitation",
//!     "spatial_granularity": "weatherstations",
//!     "target_spatial_granularity": "mohareas",
//!     "spatial_mapping": { "method": "nearest", "neighbors": 3, "max_distance": 0.5 },
//!     "temporal_granularity": "day",
//!     "target_temporal_granularity": "week",
//!     "temporal_mapping": "aggregate",
//!     "relation_value": 168
//!   }],
//!   "aggregations": [{
//!     "feature_type": "precipitation",
//!     "index_col": "StationID",
//!     "aggregate_on": "ObservedValue",
//!     "spatial_aggregation_method": "inverseDistance",
//!     "temporal_aggregation_method": "sum"
//!   }]
//! }
//! ```

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use geo::Rect;
use serde::{Deserialize, Serialize};

use crate::error::FusionError;
use crate::fuse::scheduler::OverlapPolicy;
use crate::geometry::DistanceMetric;

/// Whether a base granule exactly at `max_distance` still qualifies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceBoundary {
    #[default]
    Inclusive,
    Exclusive,
}

impl DistanceBoundary {
    pub fn admits(self, distance: f64, max_distance: f64) -> bool {
        match self {
            DistanceBoundary::Inclusive => distance <= max_distance,
            DistanceBoundary::Exclusive => distance < max_distance,
        }
    }
}

/// Ordering among base granules at the same distance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// Keep the order the granules came out of the store.
    #[default]
    InputOrder,
    /// Lexicographic granule id.
    GranuleId,
}

/// How target granules are related to base granules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum SpatialMappingMethod {
    Nearest {
        neighbors: usize,
        max_distance: f64,
        #[serde(default)]
        boundary: DistanceBoundary,
        #[serde(default)]
        tie_break: TieBreak,
    },
    Contain,
    /// Any method name this build does not know. Maps to an empty relation map.
    #[serde(other)]
    Unknown,
}

/// Temporal relation method. Only carried as a label on the temporal map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TemporalMappingMethod {
    Aggregate,
    Interpolate,
    Unknown,
}

impl From<String> for TemporalMappingMethod {
    fn from(name: String) -> Self {
        match name.as_str() {
            "aggregate" => TemporalMappingMethod::Aggregate,
            "interpolate" => TemporalMappingMethod::Interpolate,
            _ => TemporalMappingMethod::Unknown,
        }
    }
}

impl From<TemporalMappingMethod> for String {
    fn from(method: TemporalMappingMethod) -> Self {
        method.as_str().to_string()
    }
}

impl TemporalMappingMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            TemporalMappingMethod::Aggregate => "aggregate",
            TemporalMappingMethod::Interpolate => "interpolate",
            TemporalMappingMethod::Unknown => "unknown",
        }
    }
}

/// Scalar reduction applied to a value set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AggregationMethod {
    Mean,
    Sum,
    Max,
    Min,
    InverseDistance,
    /// Unrecognised name; always reduces to NoData.
    Unknown,
}

impl From<String> for AggregationMethod {
    fn from(name: String) -> Self {
        match name.as_str() {
            "mean" => AggregationMethod::Mean,
            "sum" => AggregationMethod::Sum,
            "max" => AggregationMethod::Max,
            "min" => AggregationMethod::Min,
            "inverseDistance" => AggregationMethod::InverseDistance,
            _ => AggregationMethod::Unknown,
        }
    }
}

impl From<AggregationMethod> for String {
    fn from(method: AggregationMethod) -> Self {
        method.as_str().to_string()
    }
}

impl AggregationMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            AggregationMethod::Mean => "mean",
            AggregationMethod::Sum => "sum",
            AggregationMethod::Max => "max",
            AggregationMethod::Min => "min",
            AggregationMethod::InverseDistance => "inverseDistance",
            AggregationMethod::Unknown => "unknown",
        }
    }

    /// Methods that weight each contribution by its distance to the target.
    pub fn needs_distances(self) -> bool {
        matches!(self, AggregationMethod::InverseDistance)
    }
}

/// Longest accepted temporal window: a thousand years of hours.
pub const MAX_RELATION_HOURS: i64 = 24 * 366 * 1000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GranularityRelationConfig {
    pub feature_type: String,
    /// Base spatial granularity the observations are recorded at.
    pub spatial_granularity: String,
    pub target_spatial_granularity: String,
    pub spatial_mapping: SpatialMappingMethod,
    pub temporal_granularity: String,
    pub target_temporal_granularity: String,
    pub temporal_mapping: TemporalMappingMethod,
    /// Temporal window length in hours.
    pub relation_value: i64,
    /// Optional `[min_x, min_y, max_x, max_y]` restricting both granule sets.
    #[serde(default)]
    pub extent: Option<[f64; 4]>,
}

impl GranularityRelationConfig {
    pub fn extent_rect(&self) -> Option<Rect<f64>> {
        self.extent
            .map(|[min_x, min_y, max_x, max_y]| Rect::new((min_x, min_y), (max_x, max_y)))
    }
}

fn default_timestamp_column() -> String {
    "dtg".to_string()
}

fn default_timestamp_format() -> String {
    "%Y-%m-%d %H:%M:%S".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationConfig {
    pub feature_type: String,
    /// Attribute holding the base granule id on each observation.
    pub index_col: String,
    /// Numeric attribute to aggregate.
    pub aggregate_on: String,
    #[serde(default = "default_timestamp_column")]
    pub timestamp_column: String,
    pub spatial_aggregation_method: AggregationMethod,
    pub temporal_aggregation_method: AggregationMethod,
    /// `true` selects interpolation semantics, which are not implemented.
    #[serde(default)]
    pub spatial_interpolation: bool,
    #[serde(default)]
    pub temporal_interpolation: bool,
    #[serde(default = "default_timestamp_format")]
    pub timestamp_format: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "ScheduleConfig::default_period_secs")]
    pub period_secs: u64,
    #[serde(default)]
    pub overlap: OverlapPolicy,
}

impl ScheduleConfig {
    fn default_period_secs() -> u64 {
        20
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            period_secs: Self::default_period_secs(),
            overlap: OverlapPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
    /// JSON array of features with `geo` geometries.
    GranulesJson,
    /// CSV with a header row.
    Csv,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub type_name: String,
    pub format: SourceFormat,
    /// File path or `http(s)` URL.
    pub location: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusionConfig {
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub distance_metric: DistanceMetric,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    pub granularity_relations: Vec<GranularityRelationConfig>,
    pub aggregations: Vec<AggregationConfig>,
}

impl FusionConfig {
    /// Loads the config from a JSON file at `path`.
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config '{path}'"))?;
        Ok(Self::from_json(&content)?)
    }

    pub fn from_json(content: &str) -> Result<Self, FusionError> {
        let config: FusionConfig =
            serde_json::from_str(content).map_err(|e| FusionError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), FusionError> {
        if self.schedule.period_secs == 0 {
            return Err(FusionError::Config("schedule.period_secs must be > 0".into()));
        }
        for relation in &self.granularity_relations {
            if !(0..=MAX_RELATION_HOURS).contains(&relation.relation_value) {
                return Err(FusionError::Config(format!(
                    "relation_value for `{}` must be between 0 and {MAX_RELATION_HOURS} hours, got {}",
                    relation.feature_type, relation.relation_value
                )));
            }
        }
        check_unique(self.granularity_relations.iter().map(|c| &c.feature_type))?;
        check_unique(self.aggregations.iter().map(|c| &c.feature_type))?;
        Ok(())
    }

    /// Relation configs keyed by feature type.
    pub fn relation_configs(&self) -> BTreeMap<String, GranularityRelationConfig> {
        self.granularity_relations
            .iter()
            .map(|c| (c.feature_type.clone(), c.clone()))
            .collect()
    }

    /// Aggregation configs keyed by feature type.
    pub fn aggregation_configs(&self) -> BTreeMap<String, AggregationConfig> {
        self.aggregations
            .iter()
            .map(|c| (c.feature_type.clone(), c.clone()))
            .collect()
    }
}

fn check_unique<'a>(names: impl Iterator<Item = &'a String>) -> Result<(), FusionError> {
    let mut seen = std::collections::HashSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(FusionError::Config(format!(
                "feature type `{name}` configured twice"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "granularity_relations": [{
            "feature_type": "precipitation",
            "spatial_granularity": "weatherstations",
            "target_spatial_granularity": "mohareas",
            "spatial_mapping": { "method": "nearest", "neighbors": 3, "max_distance": 0.5 },
            "temporal_granularity": "day",
            "target_temporal_granularity": "week",
            "temporal_mapping": "aggregate",
            "relation_value": 168
        }],
        "aggregations": [{
            "feature_type": "precipitation",
            "index_col": "StationID",
            "aggregate_on": "ObservedValue",
            "spatial_aggregation_method": "inverseDistance",
            "temporal_aggregation_method": "sum"
        }]
    }"#;

    #[test]
    fn test_parse_sample_with_defaults() {
        let config = FusionConfig::from_json(SAMPLE).unwrap();

        assert_eq!(config.schedule.period_secs, 20);
        assert_eq!(config.schedule.overlap, OverlapPolicy::Skip);
        assert_eq!(config.distance_metric, DistanceMetric::Euclidean);

        let relation = &config.granularity_relations[0];
        assert_eq!(
            relation.spatial_mapping,
            SpatialMappingMethod::Nearest {
                neighbors: 3,
                max_distance: 0.5,
                boundary: DistanceBoundary::Inclusive,
                tie_break: TieBreak::InputOrder,
            }
        );
        assert_eq!(relation.temporal_mapping, TemporalMappingMethod::Aggregate);

        let aggregation = &config.aggregations[0];
        assert_eq!(
            aggregation.spatial_aggregation_method,
            AggregationMethod::InverseDistance
        );
        assert_eq!(aggregation.timestamp_column, "dtg");
        assert_eq!(aggregation.timestamp_format, "%Y-%m-%d %H:%M:%S");
        assert!(!aggregation.spatial_interpolation);
    }

    #[test]
    fn test_unknown_method_names_degrade() {
        let json = SAMPLE
            .replace(r#""method": "nearest", "neighbors": 3, "max_distance": 0.5"#, r#""method": "voronoi""#)
            .replace(r#""sum""#, r#""median""#);
        let config = FusionConfig::from_json(&json).unwrap();

        assert_eq!(
            config.granularity_relations[0].spatial_mapping,
            SpatialMappingMethod::Unknown
        );
        assert_eq!(
            config.aggregations[0].temporal_aggregation_method,
            AggregationMethod::Unknown
        );
    }

    #[test]
    fn test_duplicate_feature_type_rejected() {
        let mut config = FusionConfig::from_json(SAMPLE).unwrap();
        config.aggregations.push(config.aggregations[0].clone());
        let json = serde_json::to_string(&config).unwrap();

        let err = FusionConfig::from_json(&json).unwrap_err();
        assert!(matches!(err, FusionError::Config(_)));
    }

    #[test]
    fn test_relation_value_range() {
        for bad in ["-1", "10000000000"] {
            let json = SAMPLE.replace(
                r#""relation_value": 168"#,
                &format!(r#""relation_value": {bad}"#),
            );
            let err = FusionConfig::from_json(&json).unwrap_err();
            assert!(matches!(err, FusionError::Config(_)), "{bad}: {err:?}");
        }

        let json = SAMPLE.replace(
            r#""relation_value": 168"#,
            &format!(r#""relation_value": {MAX_RELATION_HOURS}"#),
        );
        assert!(FusionConfig::from_json(&json).is_ok());
    }

    #[test]
    fn test_boundary_admits() {
        assert!(DistanceBoundary::Inclusive.admits(5.0, 5.0));
        assert!(!DistanceBoundary::Exclusive.admits(5.0, 5.0));
        assert!(DistanceBoundary::Exclusive.admits(4.9, 5.0));
    }

    #[test]
    fn test_extent_rect() {
        let mut config = FusionConfig::from_json(SAMPLE).unwrap();
        assert!(config.granularity_relations[0].extent_rect().is_none());

        config.granularity_relations[0].extent = Some([0.0, 0.0, 2.0, 1.0]);
        let rect = config.granularity_relations[0].extent_rect().unwrap();
        assert_eq!(rect.width(), 2.0);
        assert_eq!(rect.height(), 1.0);
    }
}
