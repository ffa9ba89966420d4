use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use geo::{BoundingRect, Intersects};
use tracing::debug;

use super::{FeatureStore, Predicate, Query, parse_timestamp};
use crate::error::FusionError;
use crate::model::Feature;

#[derive(Debug, Default)]
struct TypeEntry {
    schema: Vec<String>,
    features: Vec<Feature>,
}

/// Feature store held in memory, keyed by type name.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    types: RwLock<HashMap<String, TypeEntry>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bulk-appends features to `type_name`, extending its schema with any
    /// attribute names not seen before.
    pub fn ingest(
        &self,
        type_name: &str,
        schema: &[String],
        features: Vec<Feature>,
    ) -> Result<usize, FusionError> {
        let mut types = self
            .types
            .write()
            .map_err(|e| FusionError::storage(type_name, e))?;
        let entry = types.entry(type_name.to_string()).or_default();

        for name in schema {
            if !entry.schema.contains(name) {
                entry.schema.push(name.clone());
            }
        }
        let count = features.len();
        entry.features.extend(features);

        debug!(type_name, count, total = entry.features.len(), "Ingested features");
        Ok(count)
    }
}

fn matches(feature: &Feature, predicate: &Predicate) -> bool {
    match predicate {
        Predicate::Equals { attribute, value } => feature.attribute(attribute) == Some(value.as_str()),
        Predicate::During { attribute, window } => feature
            .attribute(attribute)
            .and_then(parse_timestamp)
            .is_some_and(|ts| window.contains(ts)),
        Predicate::Intersects { bbox } => feature
            .geometry
            .as_ref()
            .and_then(|g| g.bounding_rect())
            .is_some_and(|rect| rect.intersects(bbox)),
    }
}

#[async_trait]
impl FeatureStore for InMemoryStore {
    async fn query(&self, query: &Query) -> Result<Vec<Feature>, FusionError> {
        let types = self
            .types
            .read()
            .map_err(|e| FusionError::storage(&query.type_name, e))?;
        let entry = types.get(&query.type_name).ok_or_else(|| {
            FusionError::storage(&query.type_name, "unknown feature type")
        })?;

        Ok(entry
            .features
            .iter()
            .filter(|f| query.predicates.iter().all(|p| matches(f, p)))
            .cloned()
            .collect())
    }

    async fn attribute_names(&self, type_name: &str) -> Result<Vec<String>, FusionError> {
        let types = self
            .types
            .read()
            .map_err(|e| FusionError::storage(type_name, e))?;
        types
            .get(type_name)
            .map(|entry| entry.schema.clone())
            .ok_or_else(|| FusionError::storage(type_name, "unknown feature type"))
    }
}
