use std::path::PathBuf;

/// Errors raised by a policy/value model.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("normalization stats have width {actual}, model expects {expected}")]
    StatsShape { expected: usize, actual: usize },

    #[error("failed to read tensor data: {0}")]
    TensorData(String),
}

/// Errors raised while searching or evaluating the lookahead function.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("{what}: expected {expected} rows, got {actual}")]
    BatchMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("{what}: expected width {expected}, got {actual}")]
    WidthMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("lane {lane} is not terminal but has no legal action")]
    NoLegalAction { lane: usize },

    #[error("non-finite {what} in lane {lane}")]
    NonFinite { what: &'static str, lane: usize },

    #[error("invalid noise distribution: {0}")]
    Distribution(String),

    #[error("model error: {0}")]
    Model(#[from] ModelError),
}

/// Errors that can occur during training.
#[derive(Debug, thiserror::Error)]
pub enum TrainingError {
    #[error("shape mismatch: {0}")]
    Shape(String),

    #[error("non-finite loss (policy {policy}, value {value})")]
    NonFiniteLoss { policy: f32, value: f32 },

    #[error("expected {expected} replica batches, got {actual}")]
    ReplicaCount { expected: usize, actual: usize },

    #[error("model did not return normalization stats in training mode")]
    MissingStats,

    #[error("replica worker failed: {0}")]
    Worker(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("search error: {0}")]
    Search(#[from] SearchError),

    #[error("model error: {0}")]
    Model(#[from] ModelError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("config validation error: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_error_display() {
        let err = SearchError::BatchMismatch {
            what: "root value",
            expected: 4,
            actual: 3,
        };
        assert_eq!(err.to_string(), "root value: expected 4 rows, got 3");
    }

    #[test]
    fn test_training_error_wraps_model_error() {
        let err: TrainingError = ModelError::StatsShape {
            expected: 8,
            actual: 4,
        }
        .into();
        assert_eq!(
            err.to_string(),
            "model error: normalization stats have width 4, model expects 8"
        );
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::Validation("learning_rate must be > 0".to_string());
        assert_eq!(
            err.to_string(),
            "config validation error: learning_rate must be > 0"
        );
    }
}
