//! Candle-based causal LM
//!
//! A Qwen2 model loaded from a local directory holding `config.json`,
//! safetensors weights, `tokenizer.json` and optionally
//! `generation_config.json`.

use crate::generation::{CausalLm, GenerationConfig, LocalGenerator, Tokenizer};
use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::qwen2::{Config as Qwen2Config, ModelForCausalLM as Qwen2Model};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Qwen2 end-of-text id, used when no config names one
const QWEN2_EOS_TOKEN_ID: u32 = 151643;

/// Device preference for model placement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DevicePreference {
    Cuda,
    Metal,
    Cpu,
    #[default]
    Auto,
}

impl std::str::FromStr for DevicePreference {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "cuda" | "gpu" => Ok(Self::Cuda),
            "metal" => Ok(Self::Metal),
            "cpu" => Ok(Self::Cpu),
            "auto" => Ok(Self::Auto),
            _ => Err(anyhow::anyhow!(
                "Invalid device preference: {}. Valid options: cuda, metal, cpu, auto",
                s
            )),
        }
    }
}

/// Select a device, falling back to CPU when the preferred one is unavailable
pub fn select_device(preference: DevicePreference) -> Result<Device> {
    match preference {
        DevicePreference::Cuda => {
            #[cfg(feature = "cuda")]
            {
                match Device::new_cuda(0) {
                    Ok(device) => return Ok(device),
                    Err(e) => tracing::warn!("CUDA initialization failed: {}, falling back to CPU", e),
                }
            }
            #[cfg(not(feature = "cuda"))]
            tracing::warn!("CUDA requested but not compiled with 'cuda' feature, falling back to CPU");
            Ok(Device::Cpu)
        }
        DevicePreference::Metal => {
            #[cfg(feature = "metal")]
            {
                match Device::new_metal(0) {
                    Ok(device) => return Ok(device),
                    Err(e) => tracing::warn!("Metal initialization failed: {}, falling back to CPU", e),
                }
            }
            #[cfg(not(feature = "metal"))]
            tracing::warn!("Metal requested but not compiled with 'metal' feature, falling back to CPU");
            Ok(Device::Cpu)
        }
        DevicePreference::Cpu => Ok(Device::Cpu),
        DevicePreference::Auto => {
            #[cfg(feature = "cuda")]
            {
                if let Ok(device) = Device::new_cuda(0) {
                    return Ok(device);
                }
            }
            #[cfg(feature = "metal")]
            {
                if let Ok(device) = Device::new_metal(0) {
                    return Ok(device);
                }
            }
            Ok(Device::Cpu)
        }
    }
}

/// Parse a dtype name ("f32", "f16", "bf16")
pub fn parse_dtype(dtype: &str) -> Result<DType> {
    match dtype {
        "f32" => Ok(DType::F32),
        "f16" => Ok(DType::F16),
        "bf16" => Ok(DType::BF16),
        other => anyhow::bail!("Unsupported dtype: {}. Supported: f32, f16, bf16", other),
    }
}

/// Qwen2 causal LM with a KV cache
pub struct Qwen2CausalLm {
    model: Qwen2Model,
    device: Device,
    generation_config: GenerationConfig,
}

impl Qwen2CausalLm {
    /// Load config, weights and generation defaults from `model_dir`
    pub fn load(model_dir: &Path, device: &Device, dtype: DType) -> Result<Self> {
        tracing::info!("Loading Qwen2 model from {:?} on {:?}", model_dir, device);

        let config_path = model_dir.join("config.json");
        let config_str = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read model config {:?}", config_path))?;
        let qwen_config: Qwen2Config =
            serde_json::from_str(&config_str).context("Failed to parse Qwen2 config")?;

        tracing::info!(
            "Qwen2: vocab={}, hidden={}, layers={}",
            qwen_config.vocab_size,
            qwen_config.hidden_size,
            qwen_config.num_hidden_layers
        );

        let weights = safetensors_files(model_dir)?;
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&weights, dtype, device)
                .context("Failed to load model weights")?
        };
        let model = Qwen2Model::new(&qwen_config, vb).context("Failed to create Qwen2 model")?;

        let generation_config = load_generation_config(model_dir, &config_str)?;
        tracing::info!("Qwen2 eos ids: {:?}", generation_config.eos_token_id);

        Ok(Self {
            model,
            device: device.clone(),
            generation_config,
        })
    }
}

impl CausalLm for Qwen2CausalLm {
    fn forward(&mut self, input_ids: &[u32], past_len: usize) -> Result<Vec<f32>> {
        let input = Tensor::new(input_ids, &self.device)?.unsqueeze(0)?;
        let logits = self.model.forward(&input, past_len)?;

        // (1, 1, vocab) for the last position
        let logits = logits.squeeze(0)?;
        let logits = if logits.rank() > 1 {
            logits.get(logits.dim(0)? - 1)?
        } else {
            logits
        };
        Ok(logits.to_dtype(DType::F32)?.to_vec1::<f32>()?)
    }

    fn reset(&mut self) {
        self.model.clear_kv_cache();
    }

    fn generation_config(&self) -> &GenerationConfig {
        &self.generation_config
    }
}

/// HuggingFace `tokenizer.json` tokenizer
pub struct HfTokenizer {
    inner: tokenizers::Tokenizer,
}

impl HfTokenizer {
    pub fn from_file(path: &Path) -> Result<Self> {
        let inner = tokenizers::Tokenizer::from_file(path)
            .map_err(anyhow::Error::msg)
            .with_context(|| format!("Failed to load tokenizer {:?}", path))?;
        Ok(Self { inner })
    }
}

impl Tokenizer for HfTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let encoding = self.inner.encode(text, false).map_err(anyhow::Error::msg)?;
        Ok(encoding.get_ids().to_vec())
    }

    fn decode(&self, token_ids: &[u32]) -> Result<String> {
        self.inner.decode(token_ids, true).map_err(anyhow::Error::msg)
    }
}

/// Load a [`LocalGenerator`] over a Qwen2 model directory
///
/// `generation` replaces the model's defaults; when it names no eos ids the
/// model's own are kept.
pub fn load_local_generator(
    model_dir: &Path,
    device: DevicePreference,
    dtype: &str,
    generation: Option<GenerationConfig>,
) -> Result<LocalGenerator> {
    let device = select_device(device)?;
    let model = Qwen2CausalLm::load(model_dir, &device, parse_dtype(dtype)?)?;
    let tokenizer = HfTokenizer::from_file(&model_dir.join("tokenizer.json"))?;

    let generation = generation.map(|mut config| {
        if config.eos_token_id.is_empty() {
            config.eos_token_id = model.generation_config().eos_token_id.clone();
        }
        config
    });

    let generator = LocalGenerator::new(
        Box::new(model),
        Arc::new(tokenizer),
        model_dir.display().to_string(),
    );
    Ok(match generation {
        Some(config) => generator.with_generation_config(config),
        None => generator,
    })
}

fn safetensors_files(model_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(model_dir)
        .with_context(|| format!("Failed to read model directory {:?}", model_dir))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().map_or(false, |ext| ext == "safetensors"))
        .collect();
    files.sort();

    if files.is_empty() {
        anyhow::bail!("No .safetensors weights found in {:?}", model_dir);
    }
    Ok(files)
}

/// Generation defaults from `generation_config.json`, eos ids falling back to `config.json`
fn load_generation_config(model_dir: &Path, model_config: &str) -> Result<GenerationConfig> {
    let path = model_dir.join("generation_config.json");
    let mut config = if path.exists() {
        let json = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {:?}", path))?;
        serde_json::from_str(&json).with_context(|| format!("Failed to parse {:?}", path))?
    } else {
        GenerationConfig::default()
    };

    if config.eos_token_id.is_empty() {
        let fallback: GenerationConfig = serde_json::from_str(model_config).unwrap_or_default();
        config.eos_token_id = if fallback.eos_token_id.is_empty() {
            vec![QWEN2_EOS_TOKEN_ID]
        } else {
            fallback.eos_token_id
        };
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_device_preference_parse() {
        assert_eq!("gpu".parse::<DevicePreference>().unwrap(), DevicePreference::Cuda);
        assert_eq!("CPU".parse::<DevicePreference>().unwrap(), DevicePreference::Cpu);
        assert!("tpu".parse::<DevicePreference>().is_err());
    }

    #[test]
    fn test_cpu_device() {
        assert!(matches!(select_device(DevicePreference::Cpu).unwrap(), Device::Cpu));
    }

    #[test]
    fn test_generation_config_eos_fallback() {
        let dir = tempdir().unwrap();
        let config = load_generation_config(dir.path(), r#"{"eos_token_id": 151645}"#).unwrap();
        assert_eq!(config.eos_token_id, vec![151645]);

        fs::write(
            dir.path().join("generation_config.json"),
            r#"{"do_sample": true, "eos_token_id": [151645, 151643], "top_p": 0.8}"#,
        )
        .unwrap();
        let config = load_generation_config(dir.path(), "{}").unwrap();
        assert_eq!(config.eos_token_id, vec![151645, 151643]);
        assert_eq!(config.top_p, Some(0.8));
    }
}
