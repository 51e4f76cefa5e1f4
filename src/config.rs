use std::path::Path;

use log::warn;

use crate::error::ConfigError;
use crate::network::ModelConfig;
use crate::training::{SelfPlayConfig, TrainingConfig};

/// Top-level application configuration, loadable from TOML.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub selfplay: SelfPlayConfig,
    pub training: TrainingConfig,
    pub model: ModelConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: AppConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the file
    /// does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            warn!("config file '{}' not found, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Lanes each replica plays per iteration.
    pub fn lanes_per_replica(&self) -> usize {
        self.selfplay.selfplay_batch_size / self.training.num_replicas.max(1)
    }

    /// Training rows one iteration produces across all replicas.
    pub fn rows_per_iteration(&self) -> usize {
        self.selfplay.selfplay_batch_size * self.selfplay.max_num_steps
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let sp = &self.selfplay;
        let tr = &self.training;

        if tr.num_replicas == 0 {
            return Err(ConfigError::Validation(
                "training.num_replicas must be >= 1".into(),
            ));
        }
        if sp.selfplay_batch_size == 0 || sp.selfplay_batch_size % tr.num_replicas != 0 {
            return Err(ConfigError::Validation(format!(
                "selfplay.selfplay_batch_size ({}) must be a positive multiple of training.num_replicas ({})",
                sp.selfplay_batch_size, tr.num_replicas
            )));
        }
        if tr.training_batch_size == 0 || tr.training_batch_size % tr.num_replicas != 0 {
            return Err(ConfigError::Validation(format!(
                "training.training_batch_size ({}) must be a positive multiple of training.num_replicas ({})",
                tr.training_batch_size, tr.num_replicas
            )));
        }
        if sp.num_simulations == 0 {
            return Err(ConfigError::Validation(
                "selfplay.num_simulations must be >= 1".into(),
            ));
        }
        if sp.max_num_steps == 0 {
            return Err(ConfigError::Validation(
                "selfplay.max_num_steps must be >= 1".into(),
            ));
        }
        if self.rows_per_iteration() < tr.training_batch_size {
            return Err(ConfigError::Validation(format!(
                "one iteration yields {} rows, fewer than training.training_batch_size ({})",
                self.rows_per_iteration(),
                tr.training_batch_size
            )));
        }
        if sp.max_num_considered_actions == 0 {
            return Err(ConfigError::Validation(
                "selfplay.max_num_considered_actions must be >= 1".into(),
            ));
        }
        if sp.gumbel_scale.is_nan() || sp.gumbel_scale < 0.0 {
            return Err(ConfigError::Validation(
                "selfplay.gumbel_scale must be >= 0".into(),
            ));
        }
        if tr.learning_rate.is_nan() || tr.learning_rate <= 0.0 {
            return Err(ConfigError::Validation(
                "training.learning_rate must be > 0".into(),
            ));
        }
        if tr.max_num_iters == 0 {
            return Err(ConfigError::Validation(
                "training.max_num_iters must be > 0".into(),
            ));
        }
        if tr.log_interval == 0 {
            return Err(ConfigError::Validation(
                "training.log_interval must be > 0".into(),
            ));
        }
        if self.model.hidden_size == 0 {
            return Err(ConfigError::Validation(
                "model.hidden_size must be > 0".into(),
            ));
        }
        if !(0.0..1.0).contains(&self.model.norm_momentum) {
            return Err(ConfigError::Validation(
                "model.norm_momentum must be in [0, 1)".into(),
            ));
        }

        Ok(())
    }

    /// Generate a TOML string with all default values (useful for creating
    /// example config files).
    pub fn default_toml() -> Result<String, ConfigError> {
        toml::to_string_pretty(&AppConfig::default())
            .map_err(|e| ConfigError::Validation(format!("default config does not serialize: {e}")))
    }
}
