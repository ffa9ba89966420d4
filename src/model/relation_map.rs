use std::collections::BTreeMap;

use chrono::TimeDelta;
use geo::Rect;
use serde::Serialize;

use crate::config::TemporalMappingMethod;

/// Target granule id → ordered base granule ids.
///
/// Built once per feature type by a mapping strategy and never mutated after.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SpatialGranularityRelationMap {
    mappings: BTreeMap<String, Vec<String>>,
}

impl SpatialGranularityRelationMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, target_id: &str, base_ids: Vec<String>) {
        self.mappings.insert(target_id.to_string(), base_ids);
    }

    /// Base ids related to `target_id`, `None` if the target was unknown at build time.
    pub fn base_ids(&self, target_id: &str) -> Option<&[String]> {
        self.mappings.get(target_id).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemporalGranularityMap {
    pub base_temporal_granularity: String,
    pub target_temporal_granularity: String,
    pub feature_type: String,
    pub method: TemporalMappingMethod,
    /// Window length in hours.
    pub relation_value: i64,
}

impl TemporalGranularityMap {
    /// Window length, `None` when `relation_value` hours overflows a `TimeDelta`.
    pub fn window(&self) -> Option<TimeDelta> {
        TimeDelta::try_hours(self.relation_value)
    }
}

/// Spatial and temporal relation maps for one feature type.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GranularityMap {
    pub feature_type: String,
    pub spatial: SpatialGranularityRelationMap,
    pub temporal: TemporalGranularityMap,
    pub base_spatial_granularity: String,
    pub base_temporal_granularity: String,
    pub target_spatial_granularity: String,
    pub target_temporal_granularity: String,
    /// Bounding box both granule sets were restricted to, if any.
    pub extent: Option<Rect<f64>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_entry_is_distinct_from_missing() {
        let mut map = SpatialGranularityRelationMap::new();
        map.insert("t1", vec!["a".into(), "b".into()]);
        map.insert("t2", vec![]);

        assert_eq!(map.base_ids("t1").unwrap(), ["a", "b"]);
        assert_eq!(map.base_ids("t2").unwrap().len(), 0);
        assert!(map.base_ids("t3").is_none());
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_temporal_window_hours() {
        let map = TemporalGranularityMap {
            base_temporal_granularity: "hour".into(),
            target_temporal_granularity: "day".into(),
            feature_type: "rain".into(),
            method: TemporalMappingMethod::Aggregate,
            relation_value: 24,
        };
        assert_eq!(map.window(), Some(TimeDelta::hours(24)));

        let huge = TemporalGranularityMap {
            relation_value: i64::MAX,
            ..map
        };
        assert_eq!(huge.window(), None);
    }
}
