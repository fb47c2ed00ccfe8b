//! Local LLM runtime client (Ollama)
//!
//! Thin HTTP client over the Ollama API. The summarizer drives it for MAP,
//! REDUCE, and structured extraction; the health endpoint uses it for model
//! discovery. Prompts and completions never reach the logs.


use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::LlmConfig;
use crate::error::EngineError;

/// Text-generation capability the summarizer depends on.
///
/// Kept as a trait seam so the summarizer can be driven by any local
/// runtime client (or a test double) without knowing its transport.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Run a bounded, non-streaming completion.
    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        num_predict: u32,
    ) -> Result<String, LlmError>;

    /// Run a completion constrained by a JSON schema.
    async fn generate_structured(
        &self,
        model: &str,
        prompt: &str,
        num_predict: u32,
        schema: &serde_json::Value,
    ) -> Result<String, LlmError>;
}

/// Errors from the LLM runtime.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("LLM runtime unreachable: {message}")]
    Unreachable { message: String },

    #[error("LLM API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse LLM response: {message}")]
    Parse { message: String },

    #[error("Model {model} is not installed")]
    ModelMissing { model: String },
}

impl LlmError {
    /// Transient errors are worth one retry during MAP.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unreachable { .. } | Self::Api { status: 500..=599, .. })
    }

    /// Convert into the start-session facing error with a pull hint.
    pub fn into_unavailable(self, model: &str) -> EngineError {
        let hint = match &self {
            LlmError::ModelMissing { .. } => Some(format!("Run: ollama pull {}", model)),
            LlmError::Unreachable { .. } => Some("Start the runtime with: ollama serve".to_string()),
            _ => None,
        };
        EngineError::LlmUnavailable {
            message: self.to_string(),
            hint,
        }
    }
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'a serde_json::Value>,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
    error: Option<String>,
}

#[derive(Deserialize)]
struct TagsResponse {
    models: Option<Vec<ModelInfo>>,
}

#[derive(Deserialize)]
struct ModelInfo {
    name: String,
}

/// Client for a local Ollama instance.
#[derive(Clone)]
pub struct OllamaClient {
    client: Client,
    base_url: String,
}

impl OllamaClient {
    pub fn new(config: &LlmConfig) -> Result<Self, EngineError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| EngineError::internal(format!("HTTP client construction failed: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn generate_inner(
        &self,
        model: &str,
        prompt: &str,
        num_predict: u32,
        format: Option<&serde_json::Value>,
    ) -> Result<String, LlmError> {
        let url = format!("{}/api/generate", self.base_url);
        let request = GenerateRequest {
            model,
            prompt,
            stream: false,
            format,
            options: GenerateOptions {
                temperature: 0.2,
                num_predict,
            },
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::Unreachable {
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: GenerateResponse = response.json().await.map_err(|e| LlmError::Parse {
            message: e.to_string(),
        })?;

        if let Some(error) = body.error {
            return Err(LlmError::Api {
                status: 200,
                message: error,
            });
        }

        Ok(body.response)
    }

    /// List model identifiers known to the runtime.
    pub async fn list_models(&self) -> Result<Vec<String>, LlmError> {
        let url = format!("{}/api/tags", self.base_url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| LlmError::Unreachable {
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(LlmError::Api {
                status: response.status().as_u16(),
                message: "failed to list models".to_string(),
            });
        }

        let tags: TagsResponse = response.json().await.map_err(|e| LlmError::Parse {
            message: e.to_string(),
        })?;

        Ok(tags
            .models
            .unwrap_or_default()
            .into_iter()
            .map(|m| m.name)
            .collect())
    }

    /// Verify the runtime is reachable and the model is installed.
    ///
    /// Model names may carry a tag (`llama3.2:latest`); a bare configured
    /// name matches any tag of the same model.
    pub async fn ensure_model(&self, model: &str) -> Result<(), LlmError> {
        let models = self.list_models().await?;
        let installed = models.iter().any(|name| {
            name == model || name.split(':').next() == Some(model) || model.split(':').next() == Some(name)
        });

        if installed {
            Ok(())
        } else {
            Err(LlmError::ModelMissing {
                model: model.to_string(),
            })
        }
    }
}

#[async_trait]
impl GenerationClient for OllamaClient {
    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        num_predict: u32,
    ) -> Result<String, LlmError> {
        self.generate_inner(model, prompt, num_predict, None).await
    }

    /// Ollama expresses schema-constrained generation via the `format` field.
    async fn generate_structured(
        &self,
        model: &str,
        prompt: &str,
        num_predict: u32,
        schema: &serde_json::Value,
    ) -> Result<String, LlmError> {
        self.generate_inner(model, prompt, num_predict, Some(schema))
            .await
    }
}
