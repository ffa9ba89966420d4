use super::RelationBuilder;
use crate::geometry::GeometryOps;
use crate::model::{GranuleSet, SpatialGranularityRelationMap};

/// Relates a target polygon to every base granule whose centroid it contains.
///
/// Only the centroid is tested, so a base polygon straddling the target
/// boundary belongs to whichever target holds its centroid.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContainMapper;

impl RelationBuilder for ContainMapper {
    fn name(&self) -> &'static str {
        "contain"
    }

    fn build(
        &self,
        targets: &GranuleSet,
        bases: &GranuleSet,
        geometry: &dyn GeometryOps,
    ) -> SpatialGranularityRelationMap {
        // Centroids are target-independent.
        let centroids: Vec<_> = bases
            .iter()
            .filter_map(|base| {
                let centroid = geometry.centroid(base.geometry.as_ref()?)?;
                Some((base.id.as_str(), centroid))
            })
            .collect();

        let mut map = SpatialGranularityRelationMap::new();
        for target in targets.iter() {
            let contained = match &target.geometry {
                Some(polygon) => centroids
                    .iter()
                    .filter(|(_, c)| geometry.contains(polygon, c))
                    .map(|(id, _)| id.to_string())
                    .collect(),
                None => Vec::new(),
            };
            map.insert(&target.id, contained);
        }
        map
    }
}
