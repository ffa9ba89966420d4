use std::sync::Arc;

use geo::Rect;
use tracing::{debug, info, instrument, warn};

use crate::config::GranularityRelationConfig;
use crate::error::FusionError;
use crate::geometry::GeometryOps;
use crate::mapping::builder_for;
use crate::model::{
    GranularityMap, GranuleSet, SpatialGranularityRelationMap, TemporalGranularityMap,
};
use crate::store::{FeatureStore, Query};

/// Builds the spatial and temporal relation maps for a feature type.
#[derive(Clone)]
pub struct GranularityRelationMapper {
    store: Arc<dyn FeatureStore>,
    geometry: Arc<dyn GeometryOps>,
}

impl GranularityRelationMapper {
    pub fn new(store: Arc<dyn FeatureStore>, geometry: Arc<dyn GeometryOps>) -> Self {
        Self { store, geometry }
    }

    /// All granules of `granularity`, optionally restricted to `extent`.
    pub async fn granule_set(
        &self,
        granularity: &str,
        extent: Option<Rect<f64>>,
    ) -> Result<GranuleSet, FusionError> {
        let mut query = Query::all(granularity);
        if let Some(bbox) = extent {
            query = query.intersects(bbox);
        }
        let features = self.store.query(&query).await?;
        debug!(granularity, count = features.len(), "Granules fetched");
        Ok(GranuleSet::from_features(granularity, features))
    }

    /// Relates every target granule to base granules with the configured strategy.
    ///
    /// A granule set that cannot be read is treated as empty; an unknown
    /// strategy yields an empty map.
    #[instrument(skip(self, config), fields(feature_type = %config.feature_type))]
    pub async fn build_spatial_map(
        &self,
        config: &GranularityRelationConfig,
    ) -> SpatialGranularityRelationMap {
        let Some(builder) = builder_for(&config.spatial_mapping) else {
            warn!("Unknown spatial mapping method, relation map left empty");
            return SpatialGranularityRelationMap::new();
        };

        let extent = config.extent_rect();
        let targets = self
            .granule_set_or_empty(&config.target_spatial_granularity, extent)
            .await;
        let bases = self
            .granule_set_or_empty(&config.spatial_granularity, extent)
            .await;

        let map = builder.build(&targets, &bases, self.geometry.as_ref());
        info!(
            method = builder.name(),
            targets = targets.len(),
            bases = bases.len(),
            "Spatial relation map built"
        );
        map
    }

    async fn granule_set_or_empty(&self, granularity: &str, extent: Option<Rect<f64>>) -> GranuleSet {
        match self.granule_set(granularity, extent).await {
            Ok(set) => set,
            Err(e) => {
                warn!(granularity, error = %e, kind = e.kind(), "Granule query failed, using an empty set");
                GranuleSet::default()
            }
        }
    }

    pub fn build_temporal_map(config: &GranularityRelationConfig) -> TemporalGranularityMap {
        TemporalGranularityMap {
            base_temporal_granularity: config.temporal_granularity.clone(),
            target_temporal_granularity: config.target_temporal_granularity.clone(),
            feature_type: config.feature_type.clone(),
            method: config.temporal_mapping,
            relation_value: config.relation_value,
        }
    }

    pub async fn build_granularity_map(&self, config: &GranularityRelationConfig) -> GranularityMap {
        GranularityMap {
            feature_type: config.feature_type.clone(),
            spatial: self.build_spatial_map(config).await,
            temporal: Self::build_temporal_map(config),
            base_spatial_granularity: config.spatial_granularity.clone(),
            base_temporal_granularity: config.temporal_granularity.clone(),
            target_spatial_granularity: config.target_spatial_granularity.clone(),
            target_temporal_granularity: config.target_temporal_granularity.clone(),
            extent: config.extent_rect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SpatialMappingMethod, TemporalMappingMethod};
    use crate::geometry::{GeometryKernel, polygon};
    use crate::model::Feature;
    use crate::store::InMemoryStore;
    use geo::Point;

    fn relation(method: SpatialMappingMethod) -> GranularityRelationConfig {
        GranularityRelationConfig {
            feature_type: "rain".into(),
            spatial_granularity: "stations".into(),
            target_spatial_granularity: "areas".into(),
            spatial_mapping: method,
            temporal_granularity: "hour".into(),
            target_temporal_granularity: "day".into(),
            temporal_mapping: TemporalMappingMethod::Aggregate,
            relation_value: 24,
            extent: None,
        }
    }

    fn mapper() -> GranularityRelationMapper {
        let store = InMemoryStore::new();
        store
            .ingest(
                "stations",
                &[],
                vec![
                    Feature::new("s1").with_geometry(Point::new(1.0, 1.0)),
                    Feature::new("s2").with_geometry(Point::new(8.0, 8.0)),
                ],
            )
            .unwrap();
        store
            .ingest(
                "areas",
                &[],
                vec![Feature::new("a1").with_geometry(polygon(&[
                    (0.0, 0.0),
                    (4.0, 0.0),
                    (4.0, 4.0),
                    (0.0, 4.0),
                    (0.0, 0.0),
                ]))],
            )
            .unwrap();
        GranularityRelationMapper::new(Arc::new(store), Arc::new(GeometryKernel::default()))
    }

    #[tokio::test]
    async fn test_contain_map() {
        let map = mapper()
            .build_spatial_map(&relation(SpatialMappingMethod::Contain))
            .await;
        assert_eq!(map.base_ids("a1").unwrap(), ["s1"]);
    }

    #[tokio::test]
    async fn test_unknown_method_is_empty() {
        let map = mapper()
            .build_spatial_map(&relation(SpatialMappingMethod::Unknown))
            .await;
        assert!(map.is_empty());
    }

    #[tokio::test]
    async fn test_unreadable_base_set_gives_empty_entries() {
        let mut config = relation(SpatialMappingMethod::Contain);
        config.spatial_granularity = "missing".into();

        let map = mapper().build_spatial_map(&config).await;
        assert_eq!(map.len(), 1);
        assert!(map.base_ids("a1").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_extent_restricts_granules() {
        let mapper = mapper();
        let set = mapper
            .granule_set("stations", Some(Rect::new((0.0, 0.0), (5.0, 5.0))))
            .await
            .unwrap();
        assert_eq!(set.len(), 1);
        assert!(set.get("s1").is_some());
    }

    #[tokio::test]
    async fn test_granularity_map_carries_names() {
        let config = relation(SpatialMappingMethod::Nearest {
            neighbors: 1,
            max_distance: 100.0,
            boundary: Default::default(),
            tie_break: Default::default(),
        });
        let map = mapper().build_granularity_map(&config).await;

        assert_eq!(map.base_spatial_granularity, "stations");
        assert_eq!(map.target_temporal_granularity, "day");
        assert_eq!(map.temporal.window(), Some(chrono::Duration::hours(24)));
        assert_eq!(map.spatial.base_ids("a1").unwrap(), ["s1"]);
    }
}
