//! CSV persistence for converted collections.
//!
//! One file per feature type and day:
//! `<output_dir>/feature_type=<ft>/date=<YYYY-MM-DD>.csv`, appended to on
//! every cycle.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;
use csv::WriterBuilder;
use serde::Serialize;
use tracing::debug;

use super::Publisher;
use crate::model::SpatioTemporallyAggregatedCollection;

#[derive(Debug, Serialize)]
struct Row<'a> {
    reference: String,
    feature_type: &'a str,
    target_spatial_granularity: &'a str,
    target_temporal_granularity: &'a str,
    granule_id: &'a str,
    value: Option<f64>,
    contributors: usize,
    timestamp: Option<&'a str>,
}

/// Appends every feature of `collection` as a row of the CSV at `path`.
///
/// Creates the file with headers if it does not already exist.
pub fn append_collection(path: &Path, collection: &SpatioTemporallyAggregatedCollection) -> Result<()> {
    let file_exists = path.exists();
    debug!(path = %path.display(), file_exists, rows = collection.features.len(), "Appending CSV rows");

    let file = OpenOptions::new().append(true).create(true).open(path)?;
    let mut writer = WriterBuilder::new()
        .has_headers(!file_exists)
        .from_writer(file);

    let reference = collection.reference.to_rfc3339();
    for feature in &collection.features {
        writer.serialize(Row {
            reference: reference.clone(),
            feature_type: &collection.feature_type,
            target_spatial_granularity: &collection.target_spatial_granularity,
            target_temporal_granularity: &collection.target_temporal_granularity,
            granule_id: &feature.granule_id,
            value: feature.value.value(),
            contributors: feature.contributors,
            timestamp: feature.timestamp.as_deref(),
        })?;
    }
    writer.flush()?;

    Ok(())
}

/// Writes collections under a partitioned directory tree.
#[derive(Debug, Clone)]
pub struct CsvPublisher {
    output_dir: PathBuf,
}

impl CsvPublisher {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn path_for(&self, collection: &SpatioTemporallyAggregatedCollection) -> PathBuf {
        self.output_dir
            .join(format!("feature_type={}", collection.feature_type))
            .join(format!("date={}.csv", collection.reference.format("%Y-%m-%d")))
    }
}

#[async_trait]
impl Publisher for CsvPublisher {
    fn name(&self) -> &'static str {
        "csv"
    }

    async fn publish(&self, collection: &SpatioTemporallyAggregatedCollection) -> Result<()> {
        let path = self.path_for(collection);
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        append_collection(&path, collection)
    }
}
