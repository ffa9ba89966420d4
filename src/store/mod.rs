//! Feature storage collaborator.
//!
//! [`FeatureStore`] is the async seam the fusion engine queries. [`InMemoryStore`]
//! implements it for tests and for the CLI, which fills it with [`loader::load_sources`].

pub mod loader;
mod memory;

pub use memory::InMemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeDelta, Utc};
use geo::Rect;

use crate::error::FusionError;
use crate::model::Feature;

/// Query-able feature storage.
#[async_trait]
pub trait FeatureStore: Send + Sync {
    /// Features of `query.type_name` matching every predicate, in store order.
    async fn query(&self, query: &Query) -> Result<Vec<Feature>, FusionError>;

    /// Attribute names of a feature type, in schema order.
    async fn attribute_names(&self, type_name: &str) -> Result<Vec<String>, FusionError>;
}

/// Closed time window `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Window of length `length` ending at `end`, `None` if the start falls
    /// outside the representable date range.
    pub fn ending_at(end: DateTime<Utc>, length: TimeDelta) -> Option<Self> {
        Some(Self {
            start: end.checked_sub_signed(length)?,
            end,
        })
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start <= ts && ts <= self.end
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Attribute (or `id`) equals `value`.
    Equals { attribute: String, value: String },
    /// Attribute parses as a timestamp inside `window`.
    During { attribute: String, window: TimeWindow },
    /// Feature bounding rectangle intersects `bbox`.
    Intersects { bbox: Rect<f64> },
}

/// A typed query: all features of a type, narrowed by ANDed predicates.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub type_name: String,
    pub predicates: Vec<Predicate>,
}

impl Query {
    pub fn all(type_name: &str) -> Self {
        Self {
            type_name: type_name.to_string(),
            predicates: Vec::new(),
        }
    }

    pub fn equals(mut self, attribute: &str, value: &str) -> Self {
        self.predicates.push(Predicate::Equals {
            attribute: attribute.to_string(),
            value: value.to_string(),
        });
        self
    }

    pub fn during(mut self, attribute: &str, window: TimeWindow) -> Self {
        self.predicates.push(Predicate::During {
            attribute: attribute.to_string(),
            window,
        });
        self
    }

    pub fn intersects(mut self, bbox: Rect<f64>) -> Self {
        self.predicates.push(Predicate::Intersects { bbox });
        self
    }
}

/// Parses RFC 3339, `YYYY-MM-DDTHH:MM[:SS]`, `YYYY-MM-DD HH:MM[:SS]` or a bare
/// date. Naive values are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    const NAIVE_FORMATS: &[&str] = &[
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
    ];
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
