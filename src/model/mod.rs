//! Data model shared by the mappers, the convertor and the publishers.

pub mod collection;
pub mod feature;
pub mod relation_map;

pub use collection::{
    Aggregate, AggregatedFeature, GranuleAggregate, PhaseReport,
    SpatioTemporallyAggregatedCollection, TemporallyAggregatedCollection,
};
pub use feature::{Feature, GranuleSet};
pub use relation_map::{GranularityMap, SpatialGranularityRelationMap, TemporalGranularityMap};
