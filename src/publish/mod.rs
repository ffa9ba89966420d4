//! Sinks for converted collections.
//!
//! The engine hands each finished [`SpatioTemporallyAggregatedCollection`] to a
//! [`Publisher`] on a spawned task, so a slow sink never delays the next
//! feature type.

mod file;
mod s3;

pub use file::{CsvPublisher, append_collection};
pub use s3::{S3Publisher, encode_body, object_key};

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info};

use crate::model::SpatioTemporallyAggregatedCollection;

#[async_trait]
pub trait Publisher: Send + Sync {
    fn name(&self) -> &'static str;

    async fn publish(&self, collection: &SpatioTemporallyAggregatedCollection) -> Result<()>;
}

/// Logs each collection as pretty-printed JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogPublisher;

#[async_trait]
impl Publisher for LogPublisher {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn publish(&self, collection: &SpatioTemporallyAggregatedCollection) -> Result<()> {
        info!(
            feature_type = %collection.feature_type,
            "{}",
            serde_json::to_string_pretty(collection)?
        );
        Ok(())
    }
}

/// Publishes to every inner publisher in order, stopping at the first failure.
#[derive(Clone, Default)]
pub struct FanoutPublisher {
    publishers: Vec<Arc<dyn Publisher>>,
}

impl FanoutPublisher {
    pub fn new(publishers: Vec<Arc<dyn Publisher>>) -> Self {
        Self { publishers }
    }
}

#[async_trait]
impl Publisher for FanoutPublisher {
    fn name(&self) -> &'static str {
        "fanout"
    }

    async fn publish(&self, collection: &SpatioTemporallyAggregatedCollection) -> Result<()> {
        for publisher in &self.publishers {
            publisher.publish(collection).await?;
            debug!(publisher = publisher.name(), feature_type = %collection.feature_type, "Published");
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Keeps every published collection in memory.
    #[derive(Default)]
    pub struct RecordingPublisher {
        pub published: Mutex<Vec<SpatioTemporallyAggregatedCollection>>,
    }

    #[async_trait]
    impl Publisher for RecordingPublisher {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn publish(&self, collection: &SpatioTemporallyAggregatedCollection) -> Result<()> {
            self.published.lock().unwrap().push(collection.clone());
            Ok(())
        }
    }
}
