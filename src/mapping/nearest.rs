use std::cmp::Ordering;

use tracing::debug;

use super::RelationBuilder;
use crate::config::{DistanceBoundary, TieBreak};
use crate::geometry::GeometryOps;
use crate::model::{GranuleSet, SpatialGranularityRelationMap};

/// Relates each target granule to its `neighbors` closest base granules
/// within `max_distance`, closest first.
///
/// Every target is compared against every base granule (O(T×B)); there is
/// no spatial index.
#[derive(Debug, Clone)]
pub struct NearestMapper {
    neighbors: usize,
    max_distance: f64,
    boundary: DistanceBoundary,
    tie_break: TieBreak,
}

impl NearestMapper {
    pub fn new(neighbors: usize, max_distance: f64) -> Self {
        Self {
            neighbors,
            max_distance,
            boundary: DistanceBoundary::default(),
            tie_break: TieBreak::default(),
        }
    }

    pub fn with_boundary(mut self, boundary: DistanceBoundary) -> Self {
        self.boundary = boundary;
        self
    }

    pub fn with_tie_break(mut self, tie_break: TieBreak) -> Self {
        self.tie_break = tie_break;
        self
    }
}

impl RelationBuilder for NearestMapper {
    fn name(&self) -> &'static str {
        "nearest"
    }

    fn build(
        &self,
        targets: &GranuleSet,
        bases: &GranuleSet,
        geometry: &dyn GeometryOps,
    ) -> SpatialGranularityRelationMap {
        let mut map = SpatialGranularityRelationMap::new();

        for target in targets.iter() {
            let mut candidates: Vec<(f64, &str)> = match &target.geometry {
                Some(target_geom) => bases
                    .iter()
                    .filter_map(|base| {
                        let d = geometry.distance(target_geom, base.geometry.as_ref()?)?;
                        self.boundary
                            .admits(d, self.max_distance)
                            .then_some((d, base.id.as_str()))
                    })
                    .collect(),
                None => {
                    debug!(granule = %target.id, "Target granule has no geometry");
                    Vec::new()
                }
            };

            // Stable sort: equal distances keep input order unless ids break the tie.
            candidates.sort_by(|a, b| {
                let by_distance = a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal);
                match self.tie_break {
                    TieBreak::InputOrder => by_distance,
                    TieBreak::GranuleId => by_distance.then_with(|| a.1.cmp(b.1)),
                }
            });

            let nearest = candidates
                .into_iter()
                .take(self.neighbors)
                .map(|(_, id)| id.to_string())
                .collect();
            map.insert(&target.id, nearest);
        }

        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::GeometryKernel;
    use crate::model::Feature;
    use geo::Point;

    fn points(granularity: &str, pts: &[(&str, f64, f64)]) -> GranuleSet {
        GranuleSet::from_features(
            granularity,
            pts.iter()
                .map(|(id, x, y)| Feature::new(*id).with_geometry(Point::new(*x, *y)))
                .collect(),
        )
    }

    #[test]
    fn test_k_nearest_within_max_distance() {
        let targets = points("t", &[("T", 0.0, 0.0)]);
        let bases = points("b", &[("C", 10.0, 0.0), ("B", 3.0, 0.0), ("A", 1.0, 0.0)]);

        let map = NearestMapper::new(2, 5.0).build(&targets, &bases, &GeometryKernel::default());

        assert_eq!(map.base_ids("T").unwrap(), ["A", "B"]);
    }

    #[test]
    fn test_fewer_than_k_qualify() {
        let targets = points("t", &[("T", 0.0, 0.0)]);
        let bases = points("b", &[("A", 1.0, 0.0), ("C", 10.0, 0.0)]);

        let map = NearestMapper::new(3, 5.0).build(&targets, &bases, &GeometryKernel::default());

        assert_eq!(map.base_ids("T").unwrap(), ["A"]);
    }

    #[test]
    fn test_none_qualify_gives_empty_entry() {
        let targets = points("t", &[("T", 0.0, 0.0), ("U", 100.0, 0.0)]);
        let bases = points("b", &[("A", 1.0, 0.0)]);

        let map = NearestMapper::new(2, 5.0).build(&targets, &bases, &GeometryKernel::default());

        assert_eq!(map.len(), 2);
        assert!(map.base_ids("U").unwrap().is_empty());
    }

    #[test]
    fn test_boundary_inclusivity() {
        let targets = points("t", &[("T", 0.0, 0.0)]);
        let bases = points("b", &[("A", 5.0, 0.0)]);
        let kernel = GeometryKernel::default();

        let inclusive = NearestMapper::new(1, 5.0).build(&targets, &bases, &kernel);
        assert_eq!(inclusive.base_ids("T").unwrap(), ["A"]);

        let exclusive = NearestMapper::new(1, 5.0)
            .with_boundary(DistanceBoundary::Exclusive)
            .build(&targets, &bases, &kernel);
        assert!(exclusive.base_ids("T").unwrap().is_empty());
    }

    #[test]
    fn test_ties_keep_input_order_by_default() {
        let targets = points("t", &[("T", 0.0, 0.0)]);
        let bases = points("b", &[("z", 0.0, 2.0), ("y", 2.0, 0.0), ("x", -2.0, 0.0)]);
        let kernel = GeometryKernel::default();

        let by_input = NearestMapper::new(2, 5.0).build(&targets, &bases, &kernel);
        assert_eq!(by_input.base_ids("T").unwrap(), ["z", "y"]);

        let by_id = NearestMapper::new(2, 5.0)
            .with_tie_break(TieBreak::GranuleId)
            .build(&targets, &bases, &kernel);
        assert_eq!(by_id.base_ids("T").unwrap(), ["x", "y"]);
    }

    #[test]
    fn test_base_without_geometry_is_skipped() {
        let targets = points("t", &[("T", 0.0, 0.0)]);
        let bases = GranuleSet::from_features(
            "b",
            vec![
                Feature::new("nogeom"),
                Feature::new("A").with_geometry(Point::new(1.0, 1.0)),
            ],
        );

        let map = NearestMapper::new(2, 5.0).build(&targets, &bases, &GeometryKernel::default());
        assert_eq!(map.base_ids("T").unwrap(), ["A"]);
    }
}
