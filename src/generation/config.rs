//! Generation configuration
//!
//! A [`GenerationConfig`] holds a model's default decoding settings. Each call
//! resolves a private copy with caller overrides applied, so the shared
//! defaults are never mutated.

use anyhow::Result;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// `max_length` used when neither `max_length` nor `max_new_tokens` is set
pub const DEFAULT_MAX_LENGTH: usize = 20;

/// Decoding settings for the incremental generation loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Total sequence length (prompt included) at which generation stops
    pub max_length: Option<usize>,
    /// Number of tokens to generate; takes precedence over `max_length`
    pub max_new_tokens: Option<usize>,
    /// Nucleus sampling threshold in (0, 1]
    pub top_p: Option<f32>,
    /// Keep only the k highest-scoring tokens (0 disables)
    pub top_k: Option<usize>,
    /// Softmax temperature, must be > 0
    pub temperature: Option<f32>,
    /// Sample from the distribution instead of picking the argmax
    pub do_sample: bool,
    /// 1.0 disables the penalty
    pub repetition_penalty: f32,
    /// End-of-sequence ids; accepts a single id or a list
    #[serde(deserialize_with = "one_or_many")]
    pub eos_token_id: Vec<u32>,
    /// Seed for reproducible sampling
    pub seed: Option<u64>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_length: None,
            max_new_tokens: None,
            top_p: None,
            top_k: None,
            temperature: None,
            do_sample: true,
            repetition_penalty: 1.0,
            eos_token_id: Vec::new(),
            seed: None,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(u32),
    Many(Vec<u32>),
}

fn one_or_many<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u32>, D::Error> {
    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(id)) => vec![id],
        Some(OneOrMany::Many(ids)) => ids,
    })
}

impl GenerationConfig {
    /// Greedy decoding with a fixed token budget
    pub fn greedy(max_new_tokens: usize) -> Self {
        Self {
            max_new_tokens: Some(max_new_tokens),
            do_sample: false,
            ..Default::default()
        }
    }

    /// Set the end-of-sequence ids
    pub fn with_eos_token_ids(mut self, eos_token_id: Vec<u32>) -> Self {
        self.eos_token_id = eos_token_id;
        self
    }

    /// Resolve the settings for one call
    ///
    /// Works on a copy of `self` with `overrides` applied. `input_len` is the
    /// prompt length in tokens.
    pub fn resolve(
        &self,
        overrides: &GenerationOverrides,
        additional_eos_token_id: Option<u32>,
        input_len: usize,
    ) -> Result<ResolvedGeneration> {
        let mut config = self.clone();
        overrides.apply(&mut config);
        config.validate()?;

        let mut eos_token_ids = config.eos_token_id.clone();
        if let Some(id) = additional_eos_token_id {
            if !eos_token_ids.contains(&id) {
                eos_token_ids.push(id);
            }
        }

        let mut warnings = Vec::new();
        let max_length = match (config.max_new_tokens, config.max_length) {
            (Some(max_new_tokens), max_length) => {
                if let Some(max_length) = max_length {
                    warnings.push(LengthWarning::ConflictingLimits {
                        max_length,
                        max_new_tokens,
                    });
                }
                max_new_tokens + input_len
            }
            (None, Some(max_length)) => max_length,
            (None, None) => {
                warnings.push(LengthWarning::ImplicitMaxLength(DEFAULT_MAX_LENGTH));
                DEFAULT_MAX_LENGTH
            }
        };
        config.max_length = Some(max_length);

        if input_len >= max_length {
            warnings.push(LengthWarning::PromptExceedsMaxLength {
                input_len,
                max_length,
            });
        }

        for warning in &warnings {
            tracing::warn!("{}", warning);
        }

        Ok(ResolvedGeneration {
            config,
            max_length,
            eos_token_ids,
            warnings,
        })
    }

    /// Reject parameters no generation call could run with
    pub(crate) fn validate(&self) -> Result<()> {
        if !(self.repetition_penalty > 0.0 && self.repetition_penalty.is_finite()) {
            anyhow::bail!(
                "repetition_penalty has to be a strictly positive float, got {}",
                self.repetition_penalty
            );
        }
        if !self.do_sample {
            return Ok(());
        }
        if let Some(temperature) = self.temperature {
            if !(temperature > 0.0 && temperature.is_finite()) {
                anyhow::bail!(
                    "temperature has to be a strictly positive float, got {}",
                    temperature
                );
            }
        }
        if let Some(top_p) = self.top_p {
            if !(top_p > 0.0 && top_p <= 1.0) {
                anyhow::bail!("top_p has to be a float in (0, 1], got {}", top_p);
            }
        }
        Ok(())
    }
}

/// Per-call overrides merged into a copy of the model defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationOverrides {
    pub max_length: Option<usize>,
    pub max_new_tokens: Option<usize>,
    pub top_p: Option<f32>,
    pub top_k: Option<usize>,
    pub temperature: Option<f32>,
    pub do_sample: Option<bool>,
    pub repetition_penalty: Option<f32>,
    pub seed: Option<u64>,
}

impl GenerationOverrides {
    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = Some(max_length);
        self
    }

    pub fn with_max_new_tokens(mut self, max_new_tokens: usize) -> Self {
        self.max_new_tokens = Some(max_new_tokens);
        self
    }

    pub fn with_do_sample(mut self, do_sample: bool) -> Self {
        self.do_sample = Some(do_sample);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }

    pub fn with_repetition_penalty(mut self, penalty: f32) -> Self {
        self.repetition_penalty = Some(penalty);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Write every set field into `config`
    pub fn apply(&self, config: &mut GenerationConfig) {
        if let Some(max_length) = self.max_length {
            config.max_length = Some(max_length);
        }
        if let Some(max_new_tokens) = self.max_new_tokens {
            config.max_new_tokens = Some(max_new_tokens);
        }
        if let Some(top_p) = self.top_p {
            config.top_p = Some(top_p);
        }
        if let Some(top_k) = self.top_k {
            config.top_k = Some(top_k);
        }
        if let Some(temperature) = self.temperature {
            config.temperature = Some(temperature);
        }
        if let Some(do_sample) = self.do_sample {
            config.do_sample = do_sample;
        }
        if let Some(penalty) = self.repetition_penalty {
            config.repetition_penalty = penalty;
        }
        if let Some(seed) = self.seed {
            config.seed = Some(seed);
        }
    }
}

/// Soft diagnostics raised while resolving lengths
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthWarning {
    /// Neither limit was configured; the default was used
    ImplicitMaxLength(usize),
    /// Both limits were set; `max_new_tokens` won
    ConflictingLimits { max_length: usize, max_new_tokens: usize },
    /// The prompt already fills the length budget
    PromptExceedsMaxLength { input_len: usize, max_length: usize },
}

impl fmt::Display for LengthWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ImplicitMaxLength(max_length) => write!(
                f,
                "Neither max_length nor max_new_tokens is set, using max_length = {}",
                max_length
            ),
            Self::ConflictingLimits {
                max_length,
                max_new_tokens,
            } => write!(
                f,
                "Both max_new_tokens ({}) and max_length ({}) are set, max_new_tokens takes precedence",
                max_new_tokens, max_length
            ),
            Self::PromptExceedsMaxLength {
                input_len,
                max_length,
            } => write!(
                f,
                "Input length {} already reaches max_length {}, consider increasing max_new_tokens",
                input_len, max_length
            ),
        }
    }
}

/// Effective settings for one generation call
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedGeneration {
    /// Private copy with overrides applied and `max_length` filled in
    pub config: GenerationConfig,
    pub max_length: usize,
    /// Model eos ids plus the caller's additional id
    pub eos_token_ids: Vec<u32>,
    pub warnings: Vec<LengthWarning>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GenerationConfig::default();
        assert!(config.do_sample);
        assert_eq!(config.repetition_penalty, 1.0);
        assert!(config.max_length.is_none());
    }

    #[test]
    fn test_max_new_tokens_takes_precedence() {
        let config = GenerationConfig {
            max_length: Some(100),
            ..Default::default()
        };
        let overrides = GenerationOverrides::default().with_max_new_tokens(10);

        let resolved = config.resolve(&overrides, None, 5).unwrap();

        assert_eq!(resolved.max_length, 15);
        assert_eq!(resolved.config.max_length, Some(15));
        assert_eq!(
            resolved.warnings,
            vec![LengthWarning::ConflictingLimits {
                max_length: 100,
                max_new_tokens: 10
            }]
        );
    }

    #[test]
    fn test_implicit_max_length() {
        let resolved = GenerationConfig::default()
            .resolve(&GenerationOverrides::default(), None, 3)
            .unwrap();

        assert_eq!(resolved.max_length, DEFAULT_MAX_LENGTH);
        assert_eq!(
            resolved.warnings,
            vec![LengthWarning::ImplicitMaxLength(DEFAULT_MAX_LENGTH)]
        );
    }

    #[test]
    fn test_prompt_over_max_length_is_soft() {
        let config = GenerationConfig {
            max_length: Some(4),
            ..Default::default()
        };
        let resolved = config.resolve(&GenerationOverrides::default(), None, 6).unwrap();

        assert_eq!(resolved.max_length, 4);
        assert!(resolved.warnings.contains(&LengthWarning::PromptExceedsMaxLength {
            input_len: 6,
            max_length: 4
        }));
    }

    #[test]
    fn test_resolve_never_mutates_defaults() {
        let config = GenerationConfig::default().with_eos_token_ids(vec![2]);
        let snapshot = config.clone();
        let overrides = GenerationOverrides::default()
            .with_max_new_tokens(8)
            .with_do_sample(false)
            .with_temperature(0.3);

        let resolved = config.resolve(&overrides, Some(7), 4).unwrap();

        assert_eq!(config, snapshot);
        assert!(!resolved.config.do_sample);
        assert_eq!(resolved.config.temperature, Some(0.3));
        assert_eq!(resolved.eos_token_ids, vec![2, 7]);
    }

    #[test]
    fn test_additional_eos_not_duplicated() {
        let config = GenerationConfig::greedy(4).with_eos_token_ids(vec![2, 3]);
        let resolved = config.resolve(&GenerationOverrides::default(), Some(3), 1).unwrap();
        assert_eq!(resolved.eos_token_ids, vec![2, 3]);
    }

    #[test]
    fn test_invalid_sampling_settings() {
        let config = GenerationConfig::greedy(4);
        let bad_temperature = GenerationOverrides::default()
            .with_do_sample(true)
            .with_temperature(0.0);
        assert!(config.resolve(&bad_temperature, None, 1).is_err());

        let bad_top_p = GenerationOverrides::default().with_do_sample(true).with_top_p(1.5);
        assert!(config.resolve(&bad_top_p, None, 1).is_err());

        // Ignored while decoding greedily
        let greedy = GenerationOverrides::default().with_temperature(0.0);
        assert!(config.resolve(&greedy, None, 1).is_ok());

        let bad_penalty = GenerationOverrides::default().with_repetition_penalty(0.0);
        assert!(config.resolve(&bad_penalty, None, 1).is_err());
    }

    #[test]
    fn test_eos_one_or_many() {
        let single: GenerationConfig = serde_json::from_str(r#"{"eos_token_id": 151643}"#).unwrap();
        assert_eq!(single.eos_token_id, vec![151643]);

        let many: GenerationConfig = serde_json::from_str(
            r#"{"do_sample": true, "eos_token_id": [151645, 151643], "top_p": 0.8, "bos_token_id": 151643}"#,
        )
        .unwrap();
        assert_eq!(many.eos_token_id, vec![151645, 151643]);
        assert_eq!(many.top_p, Some(0.8));
    }
}
