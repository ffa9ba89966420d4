use std::io::Write;

use anyhow::Result;
use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use flate2::Compression;
use flate2::write::GzEncoder;
use tracing::info;

use super::Publisher;
use crate::model::SpatioTemporallyAggregatedCollection;

/// Uploads each collection as a JSON object, optionally gzip-compressed.
#[derive(Debug, Clone)]
pub struct S3Publisher {
    client: aws_sdk_s3::Client,
    bucket: String,
    prefix: String,
    gzip: bool,
}

impl S3Publisher {
    pub fn new(client: aws_sdk_s3::Client, bucket: &str, gzip: bool) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
            prefix: "aggregates".to_string(),
            gzip,
        }
    }

    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.prefix = prefix.trim_end_matches('/').to_string();
        self
    }
}

/// `<prefix>/feature_type=<ft>/<reference>.json[.gz]`
pub fn object_key(prefix: &str, collection: &SpatioTemporallyAggregatedCollection, gzip: bool) -> String {
    let key = format!(
        "{prefix}/feature_type={}/{}.json",
        collection.feature_type,
        collection.reference.format("%Y-%m-%dT%H%M%SZ")
    );
    if gzip { format!("{key}.gz") } else { key }
}

/// Serializes `collection` to JSON, gzip-compressing it when asked.
pub fn encode_body(collection: &SpatioTemporallyAggregatedCollection, gzip: bool) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(collection)?;
    if !gzip {
        return Ok(json);
    }
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json)?;
    Ok(encoder.finish()?)
}

#[async_trait]
impl Publisher for S3Publisher {
    fn name(&self) -> &'static str {
        "s3"
    }

    #[tracing::instrument(skip_all, fields(bucket = %self.bucket, feature_type = %collection.feature_type))]
    async fn publish(&self, collection: &SpatioTemporallyAggregatedCollection) -> Result<()> {
        let key = object_key(&self.prefix, collection, self.gzip);
        let body = encode_body(collection, self.gzip)?;
        let size = body.len();

        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(body))
            .content_type("application/json");
        if self.gzip {
            request = request.content_encoding("gzip");
        }
        request.send().await?;

        info!(key = %key, bytes = size, "Collection uploaded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use flate2::read::GzDecoder;
    use std::io::Read;

    fn collection() -> SpatioTemporallyAggregatedCollection {
        SpatioTemporallyAggregatedCollection {
            feature_type: "rain".into(),
            features: vec![],
            target_spatial_granularity: "areas".into(),
            target_temporal_granularity: "day".into(),
            reference: Utc.with_ymd_and_hms(2013, 1, 4, 8, 0, 0).unwrap(),
            timestamp: None,
            attributes: vec!["StationID".into()],
        }
    }

    #[test]
    fn test_object_key() {
        assert_eq!(
            object_key("aggregates", &collection(), false),
            "aggregates/feature_type=rain/2013-01-04T080000Z.json"
        );
        assert!(object_key("aggregates", &collection(), true).ends_with(".json.gz"));
    }

    #[test]
    fn test_with_prefix_trims_trailing_slash() {
        let config = aws_sdk_s3::Config::builder()
            .behavior_version(aws_sdk_s3::config::BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new("us-east-1"))
            .build();
        let publisher = S3Publisher::new(aws_sdk_s3::Client::from_conf(config), "bucket", false)
            .with_prefix("archive/rain/");

        assert_eq!(publisher.prefix, "archive/rain");
        assert_eq!(
            object_key(&publisher.prefix, &collection(), publisher.gzip),
            "archive/rain/feature_type=rain/2013-01-04T080000Z.json"
        );
    }

    #[test]
    fn test_gzip_body_decodes_to_json() {
        let body = encode_body(&collection(), true).unwrap();

        let mut json = String::new();
        GzDecoder::new(body.as_slice()).read_to_string(&mut json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["feature_type"], "rain");
        assert_eq!(value["attributes"][0], "StationID");
    }
}
