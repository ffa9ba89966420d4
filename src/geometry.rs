//! Geometry collaborator: centroid, distance and point-in-polygon.

use geo::{
    Centroid, Contains, EuclideanDistance, Geometry, HaversineDistance, MultiPolygon, Point,
    Polygon,
};
use serde::{Deserialize, Serialize};

/// Geometric operations the mappers and the convertor rely on.
pub trait GeometryOps: Send + Sync {
    fn centroid(&self, geometry: &Geometry<f64>) -> Option<Point<f64>>;

    /// Distance between two geometries, `None` when it cannot be computed.
    fn distance(&self, a: &Geometry<f64>, b: &Geometry<f64>) -> Option<f64>;

    /// Whether `polygon` contains `point`. Non-areal geometries contain nothing.
    fn contains(&self, polygon: &Geometry<f64>, point: &Point<f64>) -> bool;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// Planar distance in coordinate units.
    #[default]
    Euclidean,
    /// Great-circle distance in metres between centroids (lon/lat input).
    Haversine,
}

/// [`GeometryOps`] backed by the `geo` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeometryKernel {
    metric: DistanceMetric,
}

impl GeometryKernel {
    pub fn new(metric: DistanceMetric) -> Self {
        Self { metric }
    }
}

impl GeometryOps for GeometryKernel {
    fn centroid(&self, geometry: &Geometry<f64>) -> Option<Point<f64>> {
        geometry.centroid()
    }

    fn distance(&self, a: &Geometry<f64>, b: &Geometry<f64>) -> Option<f64> {
        let d = match self.metric {
            DistanceMetric::Euclidean => euclidean(a, b)?,
            DistanceMetric::Haversine => {
                let (ca, cb) = (a.centroid()?, b.centroid()?);
                ca.haversine_distance(&cb)
            }
        };
        d.is_finite().then_some(d)
    }

    fn contains(&self, polygon: &Geometry<f64>, point: &Point<f64>) -> bool {
        match polygon {
            Geometry::Polygon(p) => p.contains(point),
            Geometry::MultiPolygon(mp) => mp.contains(point),
            Geometry::Rect(r) => r.contains(point),
            Geometry::Triangle(t) => t.to_polygon().contains(point),
            _ => false,
        }
    }
}

fn euclidean(a: &Geometry<f64>, b: &Geometry<f64>) -> Option<f64> {
    match (a, b) {
        (Geometry::Point(p), other) | (other, Geometry::Point(p)) => point_to(p, other),
        _ => {
            let (ca, cb) = (a.centroid()?, b.centroid()?);
            Some(ca.euclidean_distance(&cb))
        }
    }
}

fn point_to(p: &Point<f64>, other: &Geometry<f64>) -> Option<f64> {
    match other {
        Geometry::Point(q) => Some(p.euclidean_distance(q)),
        Geometry::Polygon(poly) => Some(p.euclidean_distance(poly)),
        Geometry::MultiPolygon(mp) => Some(p.euclidean_distance(mp)),
        Geometry::Rect(r) => Some(p.euclidean_distance(&r.to_polygon())),
        other => Some(p.euclidean_distance(&other.centroid()?)),
    }
}

/// Builds a polygon from an exterior ring of `(x, y)` pairs.
pub fn polygon(exterior: &[(f64, f64)]) -> Geometry<f64> {
    Geometry::Polygon(Polygon::new(exterior.to_vec().into(), vec![]))
}

/// Builds a multipolygon from several exterior rings.
pub fn multi_polygon(exteriors: &[&[(f64, f64)]]) -> Geometry<f64> {
    Geometry::MultiPolygon(MultiPolygon::new(
        exteriors
            .iter()
            .map(|ring| Polygon::new(ring.to_vec().into(), vec![]))
            .collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(x0: f64, y0: f64, side: f64) -> Geometry<f64> {
        polygon(&[
            (x0, y0),
            (x0 + side, y0),
            (x0 + side, y0 + side),
            (x0, y0 + side),
            (x0, y0),
        ])
    }

    #[test]
    fn test_point_to_point_distance() {
        let kernel = GeometryKernel::default();
        let a = Geometry::Point(Point::new(0.0, 0.0));
        let b = Geometry::Point(Point::new(3.0, 4.0));
        assert_eq!(kernel.distance(&a, &b), Some(5.0));
    }

    #[test]
    fn test_point_to_polygon_distance_is_symmetric() {
        let kernel = GeometryKernel::default();
        let p = Geometry::Point(Point::new(5.0, 1.0));
        let sq = square(0.0, 0.0, 2.0);
        assert_eq!(kernel.distance(&p, &sq), Some(3.0));
        assert_eq!(kernel.distance(&sq, &p), Some(3.0));

        let inside = Geometry::Point(Point::new(1.0, 1.0));
        assert_eq!(kernel.distance(&inside, &sq), Some(0.0));
    }

    #[test]
    fn test_polygon_to_polygon_uses_centroids() {
        let kernel = GeometryKernel::default();
        let a = square(0.0, 0.0, 2.0);
        let b = square(10.0, 0.0, 2.0);
        assert_eq!(kernel.distance(&a, &b), Some(10.0));
    }

    #[test]
    fn test_haversine_distance_in_metres() {
        let kernel = GeometryKernel::new(DistanceMetric::Haversine);
        let colombo = Geometry::Point(Point::new(79.8612, 6.9271));
        let kandy = Geometry::Point(Point::new(80.6337, 7.2906));
        let d = kernel.distance(&colombo, &kandy).unwrap();
        assert!(d > 90_000.0 && d < 100_000.0, "got {d}");
    }

    #[test]
    fn test_contains_centroid() {
        let kernel = GeometryKernel::default();
        let sq = square(0.0, 0.0, 2.0);
        assert!(kernel.contains(&sq, &Point::new(1.0, 1.0)));
        assert!(!kernel.contains(&sq, &Point::new(3.0, 1.0)));

        let line_like = Geometry::Point(Point::new(1.0, 1.0));
        assert!(!kernel.contains(&line_like, &Point::new(1.0, 1.0)));
    }

    #[test]
    fn test_multi_polygon_contains() {
        let kernel = GeometryKernel::default();
        let mp = multi_polygon(&[
            &[(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0), (0.0, 0.0)],
            &[(5.0, 5.0), (6.0, 5.0), (6.0, 6.0), (5.0, 6.0), (5.0, 5.0)],
        ]);
        assert!(kernel.contains(&mp, &Point::new(5.5, 5.5)));
        assert!(!kernel.contains(&mp, &Point::new(3.0, 3.0)));
    }

    #[test]
    fn test_centroid_of_square() {
        let kernel = GeometryKernel::default();
        let c = kernel.centroid(&square(0.0, 0.0, 2.0)).unwrap();
        assert_eq!((c.x(), c.y()), (1.0, 1.0));
    }
}
