//! The conversion engine: reductions, relation maps, the two-phase convertor
//! and the periodic sweep that drives it.

pub mod aggregate;
pub mod clock;
pub mod convertor;
pub mod engine;
pub mod relation_mapper;
pub mod scheduler;

pub use clock::{Clock, FixedClock, SystemClock};
pub use convertor::{GranularityConvertor, GranuleCache, format_timestamp};
pub use engine::{EngineState, FuseEngine, SweepReport};
pub use relation_mapper::GranularityRelationMapper;
pub use scheduler::{OverlapPolicy, Scheduler};
