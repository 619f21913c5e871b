use std::path::Path;

use lumi_image::IngestConfig;
use serde::{Deserialize, Serialize};

use crate::encoder::VisionEncoderConfig;
use crate::prompt::PromptConfig;

/// Errors produced while loading or validating a configuration.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Invalid(String),
}

/// Token sampling parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    pub seed: u64,
    pub temperature: f64,
    pub top_p: f64,
    pub do_sample: bool,
    pub repeat_penalty: f32,
    pub repeat_last_n: usize,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            temperature: 1.0,
            top_p: 0.8,
            do_sample: true,
            repeat_penalty: 1.0,
            repeat_last_n: 64,
        }
    }
}

/// Limits and sampling of a single generation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Tokens produced at most per call to `start_generation`.
    pub max_new_tokens: usize,
    /// Context positions a session can hold over its lifetime.
    pub max_context_positions: usize,
    /// Token ids ending a generation on top of the model's own.
    pub extra_stop_tokens: Vec<u32>,
    pub sampling: SamplingConfig,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_new_tokens: 512,
            max_context_positions: 2048,
            extra_stop_tokens: Vec::new(),
            sampling: SamplingConfig::default(),
        }
    }
}

/// Everything an [`crate::Engine`] needs besides its collaborators.
///
/// Every field falls back to its default when missing from JSON.
///
/// ```
/// use lumi_vlm::EngineConfig;
///
/// let config = EngineConfig::from_json_str(r#"{ "generation": { "max_new_tokens": 64 } }"#).unwrap();
/// assert_eq!(config.generation.max_new_tokens, 64);
/// assert_eq!(config.generation.max_context_positions, 2048);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub ingest: IngestConfig,
    pub encoder: VisionEncoderConfig,
    pub generation: GenerationConfig,
    pub prompt: PromptConfig,
}

impl EngineConfig {
    /// Parse and validate a JSON configuration.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path)?;
        Self::from_json_str(&data)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self
            .encoder
            .image_std
            .iter()
            .any(|s| !s.is_finite() || *s <= 0.0)
        {
            return Err(ConfigError::Invalid(format!(
                "encoder.image_std must be positive, got {:?}",
                self.encoder.image_std
            )));
        }
        if !self.encoder.rescale_factor.is_finite() {
            return Err(ConfigError::Invalid(
                "encoder.rescale_factor must be finite".to_string(),
            ));
        }

        let generation = &self.generation;
        if generation.max_new_tokens == 0 {
            return Err(ConfigError::Invalid(
                "generation.max_new_tokens must be positive".to_string(),
            ));
        }
        if generation.max_context_positions == 0 {
            return Err(ConfigError::Invalid(
                "generation.max_context_positions must be positive".to_string(),
            ));
        }

        let sampling = &generation.sampling;
        if !sampling.temperature.is_finite() || sampling.temperature < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "sampling.temperature must be >= 0, got {}",
                sampling.temperature
            )));
        }
        if !(sampling.top_p > 0.0 && sampling.top_p <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "sampling.top_p must be in (0, 1], got {}",
                sampling.top_p
            )));
        }
        if !sampling.repeat_penalty.is_finite() || sampling.repeat_penalty <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "sampling.repeat_penalty must be positive, got {}",
                sampling.repeat_penalty
            )));
        }

        let history = &self.prompt.history;
        if history.max_turns == 0 || history.max_chars == 0 {
            return Err(ConfigError::Invalid(
                "prompt.history budgets must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults_are_valid() -> Result<(), ConfigError> {
        let config = EngineConfig::default();
        config.validate()?;

        assert_eq!(config.ingest.max_longest_edge, Some(1024));
        assert_eq!(config.generation.max_new_tokens, 512);
        assert_eq!(config.generation.max_context_positions, 2048);
        assert_eq!(config.generation.sampling.seed, 42);
        assert_eq!(config.prompt.history.max_turns, 10);
        assert_eq!(config.prompt.history.max_chars, 4200);
        Ok(())
    }

    #[test]
    fn partial_json_keeps_defaults() -> Result<(), ConfigError> {
        let config = EngineConfig::from_json_str(
            r#"{
                "ingest": { "max_longest_edge": null },
                "generation": { "sampling": { "do_sample": false, "seed": 7 } }
            }"#,
        )?;
        assert_eq!(config.ingest.max_longest_edge, None);
        assert!(!config.generation.sampling.do_sample);
        assert_eq!(config.generation.sampling.seed, 7);
        assert_eq!(config.generation.sampling.top_p, 0.8);
        assert_eq!(config.encoder, VisionEncoderConfig::default());
        Ok(())
    }

    #[test]
    fn invalid_values_are_rejected() {
        for json in [
            r#"{ "generation": { "max_new_tokens": 0 } }"#,
            r#"{ "generation": { "sampling": { "top_p": 1.5 } } }"#,
            r#"{ "generation": { "sampling": { "temperature": -1.0 } } }"#,
            r#"{ "encoder": { "image_std": [0.5, 0.0, 0.5] } }"#,
            r#"{ "prompt": { "history": { "max_turns": 0 } } }"#,
        ] {
            assert!(
                matches!(EngineConfig::from_json_str(json), Err(ConfigError::Invalid(_))),
                "{json}"
            );
        }

        assert!(matches!(
            EngineConfig::from_json_str("{ not json"),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn config_from_file() -> Result<(), Box<dyn std::error::Error>> {
        let mut file = tempfile::NamedTempFile::new()?;
        write!(file, r#"{{ "generation": {{ "extra_stop_tokens": [1, 106] }} }}"#)?;

        let config = EngineConfig::from_json_file(file.path())?;
        assert_eq!(config.generation.extra_stop_tokens, vec![1, 106]);

        let missing = EngineConfig::from_json_file(file.path().with_extension("missing"));
        assert!(matches!(missing, Err(ConfigError::Io(_))));
        Ok(())
    }
}
