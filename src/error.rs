//! Error taxonomy for the fusion pipeline.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum FusionError {
    /// A storage query failed (I/O kind).
    #[error("storage query on `{type_name}` failed: {message}")]
    Storage { type_name: String, message: String },
    /// A record field could not be parsed (data kind).
    #[error("invalid `{field}` value `{value}` in record `{record}`")]
    InvalidRecord {
        record: String,
        field: String,
        value: String,
    },
    #[error("no granularity map built for feature type `{0}`")]
    MissingRelationMap(String),
    #[error("no aggregation config for feature type `{0}`")]
    MissingAggregationConfig(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("publishing `{feature_type}` failed: {message}")]
    Publish {
        feature_type: String,
        message: String,
    },
    #[error("sweep cancelled before `{0}`")]
    Cancelled(String),
    #[error("conversion of `{feature_type}` aborted: {message}")]
    Aborted {
        feature_type: String,
        message: String,
    },
}

impl FusionError {
    pub fn storage(type_name: &str, message: impl ToString) -> Self {
        FusionError::Storage {
            type_name: type_name.to_string(),
            message: message.to_string(),
        }
    }

    /// Short machine-readable kind, used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            FusionError::Storage { .. } => "io",
            FusionError::InvalidRecord { .. } => "data",
            FusionError::MissingRelationMap(_) | FusionError::MissingAggregationConfig(_) => {
                "missing_configuration"
            }
            FusionError::Config(_) => "configuration",
            FusionError::Publish { .. } => "publish",
            FusionError::Cancelled(_) => "cancelled",
            FusionError::Aborted { .. } => "aborted",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_groups_missing_configuration() {
        assert_eq!(
            FusionError::MissingRelationMap("rain".into()).kind(),
            "missing_configuration"
        );
        assert_eq!(
            FusionError::MissingAggregationConfig("rain".into()).kind(),
            "missing_configuration"
        );
        assert_eq!(FusionError::storage("stations", "timeout").kind(), "io");
    }

    #[test]
    fn test_storage_message() {
        let err = FusionError::storage("stations", "connection reset");
        assert_eq!(
            err.to_string(),
            "storage query on `stations` failed: connection reset"
        );
    }
}
