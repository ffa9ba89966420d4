pub mod config;
pub mod error;
pub mod fetch;
pub mod fuse;
pub mod geometry;
pub mod mapping;
pub mod model;
pub mod publish;
pub mod store;

pub use error::FusionError;
