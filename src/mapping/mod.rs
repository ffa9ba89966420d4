//! Spatial mapping strategies relating target granules to base granules.

mod contain;
mod nearest;

pub use contain::ContainMapper;
pub use nearest::NearestMapper;

use crate::config::SpatialMappingMethod;
use crate::geometry::GeometryOps;
use crate::model::{GranuleSet, SpatialGranularityRelationMap};

/// Capability shared by all mapping strategies.
pub trait RelationBuilder: Send + Sync {
    fn name(&self) -> &'static str;

    /// Builds target id → base ids. Every target granule gets an entry.
    fn build(
        &self,
        targets: &GranuleSet,
        bases: &GranuleSet,
        geometry: &dyn GeometryOps,
    ) -> SpatialGranularityRelationMap;
}

/// Strategy for a configured method, `None` for an unknown method.
pub fn builder_for(method: &SpatialMappingMethod) -> Option<Box<dyn RelationBuilder>> {
    match *method {
        SpatialMappingMethod::Nearest {
            neighbors,
            max_distance,
            boundary,
            tie_break,
        } => Some(Box::new(
            NearestMapper::new(neighbors, max_distance)
                .with_boundary(boundary)
                .with_tie_break(tie_break),
        )),
        SpatialMappingMethod::Contain => Some(Box::new(ContainMapper)),
        SpatialMappingMethod::Unknown => None,
    }
}
