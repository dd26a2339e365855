use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::{anyhow, bail, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::generation::LogitsProcessor;
use candle_transformers::models::mistral::{Config as MistralConfig, Model as Mistral};
use hf_hub::api::sync::ApiRepo;
use rand::random;
use tokenizers::Tokenizer;

/// Mistral-7B-Instruct-v0.1 attends over a 4096 token sliding window. Both the
/// tokenized prompt and the total output length are bounded by it.
pub const MAX_CONTEXT: usize = 4096;

const INDEX_FILENAME: &str = "model.safetensors.index.json";
const TOKENIZER_FILENAME: &str = "tokenizer.json";
const EOS_TOKEN: &str = "</s>";

// Taken from
// https://github.com/huggingface/candle/blob/main/candle-examples/examples/mistral/main.rs
#[derive(Clone)]
pub struct MistralPipeline {
    pub model: Mistral,
    pub device: Device,
    pub tokenizer: Tokenizer,
    pub eos_token: u32,
    pub repeat_penalty: f32,
    pub repeat_context_size: usize,
}

impl MistralPipeline {
    /// Downloads the tokenizer and the sharded safetensors weights from the
    /// hub and builds the model on the given device with the given precision.
    pub fn with_safetensors(
        repo: &ApiRepo,
        device: &Device,
        dtype: DType,
        repeat_penalty: f32,
        repeat_context_size: usize,
    ) -> Result<MistralPipeline> {
        let tokenizer_file = repo.get(TOKENIZER_FILENAME)?;
        let weight_files = hub_safetensors_files(repo)?;

        let config = MistralConfig::config_7b_v0_1(false);
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&weight_files, dtype, device)? };
        let model = Mistral::new(&config, vb)?;
        let tokenizer = Tokenizer::from_file(tokenizer_file)
            .map_err(|e| anyhow!("Cannot load tokenizer: {e}"))?;

        let eos_token = match tokenizer.get_vocab(true).get(EOS_TOKEN) {
            Some(token) => *token,
            None => bail!("Cannot find the {EOS_TOKEN} token"),
        };

        Ok(MistralPipeline {
            model,
            device: device.clone(),
            tokenizer,
            eos_token,
            repeat_penalty,
            repeat_context_size,
        })
    }

    /// Samples a continuation of `prompt` until `max_length` total tokens or
    /// the end-of-sequence token. Returns the decoded sequence (prompt
    /// included, special tokens stripped) and the raw output token count.
    pub fn generate(
        &mut self,
        prompt: &str,
        max_length: usize,
        temperature: f64,
        top_p: f64,
    ) -> Result<(String, usize)> {
        self.model.clear_kv_cache();

        let encoded = self
            .tokenizer
            .encode(prompt, true)
            .map_err(|e| anyhow!("Cannot encode prompt: {e}"))?;
        let mut tokens = encoded.get_ids().to_vec();
        if tokens.is_empty() {
            bail!("Prompt is empty");
        }
        tokens.truncate(MAX_CONTEXT);

        let max_length = bounded_max_length(max_length);
        let mut logits_processor = LogitsProcessor::new(random(), Some(temperature), Some(top_p));

        let mut index = 0;
        while tokens.len() < max_length {
            let context_size = if index > 0 { 1 } else { tokens.len() };
            let start_pos = tokens.len().saturating_sub(context_size);
            let input = Tensor::new(&tokens[start_pos..], &self.device)?.unsqueeze(0)?;
            let logits = self.model.forward(&input, start_pos)?;
            let logits = logits.squeeze(0)?.squeeze(0)?.to_dtype(DType::F32)?;
            let logits = if (self.repeat_penalty - 1.).abs() < f32::EPSILON {
                logits
            } else {
                let start_at = tokens.len().saturating_sub(self.repeat_context_size);
                candle_transformers::utils::apply_repeat_penalty(
                    &logits,
                    self.repeat_penalty,
                    &tokens[start_at..],
                )?
            };

            let next_token = logits_processor.sample(&logits)?;
            tokens.push(next_token);
            index += 1;
            if next_token == self.eos_token {
                break;
            }
        }

        let output = self
            .tokenizer
            .decode(&tokens, true)
            .map_err(|e| anyhow!("Cannot decode tokens: {e}"))?;
        Ok((output, tokens.len()))
    }
}

/// Wraps a user prompt in the fixed Mistral instruction template.
pub fn format_instruct_prompt(prompt: &str) -> String {
    format!("<s>[INST] {prompt} [/INST]")
}

pub(crate) fn bounded_max_length(requested: usize) -> usize {
    requested.min(MAX_CONTEXT)
}

/// Resolves the safetensors shards listed in the hub index file, fetching any
/// that are not yet in the local cache.
fn hub_safetensors_files(repo: &ApiRepo) -> Result<Vec<PathBuf>> {
    let index_file = repo.get(INDEX_FILENAME)?;
    let index: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(index_file)?)?;
    let weight_map = match index.get("weight_map") {
        Some(serde_json::Value::Object(map)) => map,
        _ => bail!("No weight_map found in {INDEX_FILENAME}"),
    };

    let mut filenames = HashSet::new();
    for value in weight_map.values() {
        if let Some(file) = value.as_str() {
            filenames.insert(file.to_string());
        }
    }
    filenames.into_iter().map(|f| Ok(repo.get(&f)?)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instruct_template_wraps_the_prompt() {
        let formatted = format_instruct_prompt("What is 2+2?");
        assert_eq!(formatted, "<s>[INST] What is 2+2? [/INST]");
    }

    #[test]
    fn max_length_is_clamped_to_the_context_window() {
        assert_eq!(bounded_max_length(1000), 1000);
        assert_eq!(bounded_max_length(MAX_CONTEXT + 1), MAX_CONTEXT);
        assert_eq!(bounded_max_length(0), 0);
    }
}
