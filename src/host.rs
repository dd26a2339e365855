use candle_core::utils::cuda_is_available;
use candle_core::{DType, Device};
use hf_hub::api::sync::Api;
use hf_hub::{Repo, RepoType};
use tracing::{debug, info};

use crate::config::Config;
use crate::inference::task::generate::{GenerateRequest, GenerateResponse};
use crate::inference::text_pipeline::{format_instruct_prompt, MistralPipeline};

/// Failures of the model host, mapped to HTTP responses at the handler
/// boundary. `NotReady` is recoverable by retrying once the model has loaded.
#[derive(Debug)]
pub enum HostError {
    Initialization(anyhow::Error),
    NotReady,
    Generation(anyhow::Error),
}

impl std::fmt::Display for HostError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HostError::Initialization(e) => write!(f, "Failed to initialize model: {e}"),
            HostError::NotReady => write!(f, "Model not initialized"),
            HostError::Generation(e) => write!(f, "Text generation failed: {e}"),
        }
    }
}

impl std::error::Error for HostError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            HostError::NotReady => None,
            HostError::Initialization(e) | HostError::Generation(e) => Some(e.as_ref()),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HostStatus {
    pub loaded: bool,
    pub gpu_available: bool,
}

/// Owns the loaded model/tokenizer pair. Built once at startup and never
/// mutated afterwards; request handlers share it through an `Arc` and clone
/// the pipeline per call, so no locking is needed.
pub struct ModelHost {
    pipeline: Option<MistralPipeline>,
    gpu_available: bool,
}

impl ModelHost {
    pub fn initialize(config: &Config) -> Result<ModelHost, HostError> {
        let gpu_available = cuda_is_available();
        let device = if gpu_available && !config.cpu {
            Device::new_cuda(0).map_err(|e| HostError::Initialization(e.into()))?
        } else {
            Device::Cpu
        };
        let dtype = if device.is_cuda() {
            DType::F16
        } else {
            DType::F32
        };

        info!(
            "Loading model {} (revision {}) on {:?} as {:?}",
            config.repo_id, config.repo_revision, device, dtype
        );
        let api = Api::new().map_err(|e| HostError::Initialization(e.into()))?;
        let repo = api.repo(Repo::with_revision(
            config.repo_id.clone(),
            RepoType::Model,
            config.repo_revision.clone(),
        ));
        let pipeline = MistralPipeline::with_safetensors(
            &repo,
            &device,
            dtype,
            config.repeat_penalty,
            config.repeat_context_size,
        )
        .map_err(HostError::Initialization)?;
        info!("Model and tokenizer loaded successfully");

        Ok(ModelHost {
            pipeline: Some(pipeline),
            gpu_available,
        })
    }

    /// Host without a pipeline. Keeps the service answering `/health`
    /// truthfully after a failed load while `/generate/` returns 503.
    pub fn unloaded() -> ModelHost {
        ModelHost {
            pipeline: None,
            gpu_available: cuda_is_available(),
        }
    }

    pub fn generate(&self, request: GenerateRequest) -> Result<GenerateResponse, HostError> {
        let Some(pipeline) = &self.pipeline else {
            return Err(HostError::NotReady);
        };
        if request.num_return_sequences > 1 {
            // Matches the service this replaces: extra sequences were computed
            // and then discarded, so they are not sampled here at all.
            debug!(
                "Returning only the first of {} requested sequences",
                request.num_return_sequences
            );
        }

        let prompt = format_instruct_prompt(&request.prompt);
        let (generated_text, tokens_used) = pipeline
            .clone()
            .generate(
                &prompt,
                request.max_length,
                request.temperature,
                request.top_p,
            )
            .map_err(HostError::Generation)?;

        Ok(GenerateResponse {
            generated_text,
            tokens_used,
        })
    }

    pub fn status(&self) -> HostStatus {
        HostStatus {
            loaded: self.pipeline.is_some(),
            gpu_available: self.gpu_available,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(prompt: &str) -> GenerateRequest {
        serde_json::from_value(serde_json::json!({ "prompt": prompt })).unwrap()
    }

    #[test]
    fn unloaded_host_refuses_generation() {
        let host = ModelHost::unloaded();
        match host.generate(request("What is 2+2?")) {
            Err(HostError::NotReady) => {}
            other => panic!("Expected NotReady, got {other:?}"),
        }
    }

    #[test]
    fn unloaded_host_reports_not_loaded() {
        let host = ModelHost::unloaded();
        assert!(!host.status().loaded);
    }

    #[test]
    fn not_ready_error_message_is_stable() {
        assert_eq!(HostError::NotReady.to_string(), "Model not initialized");
    }

    #[test]
    fn generation_error_carries_the_cause() {
        let err = HostError::Generation(anyhow::anyhow!("Cannot encode prompt"));
        assert_eq!(err.to_string(), "Text generation failed: Cannot encode prompt");
        assert!(std::error::Error::source(&err).is_some());
    }
}
