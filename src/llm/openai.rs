//! OpenAI-compatible chat and embedding clients.
//!
//! Both clients also cover self-hosted endpoints that speak the same wire
//! format via a base-URL override. API keys are stored as `SecretString`
//! and zeroized on drop.

use super::{
    CallUsage, Completion, EmbeddingBatch, EmbeddingClient, HttpConfig, LlmClient,
    build_http_client,
};
use crate::config::{EmbeddingConfig, LlmConfig, expand_env_vars};
use crate::{Error, Result};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

/// Classifies a reqwest failure into transient vs fatal.
fn classify_send_error(operation: &str, e: &reqwest::Error) -> Error {
    let cause = e.to_string();
    if e.is_timeout() || e.is_connect() {
        Error::LlmTransient {
            operation: operation.to_string(),
            cause,
        }
    } else {
        Error::LlmFatal {
            operation: operation.to_string(),
            cause,
        }
    }
}

/// Classifies an HTTP status into transient vs fatal.
fn classify_status(operation: &str, status: reqwest::StatusCode, body: &str) -> Error {
    let cause = format!("status {status}: {body}");
    if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        Error::LlmTransient {
            operation: operation.to_string(),
            cause,
        }
    } else {
        Error::LlmFatal {
            operation: operation.to_string(),
            cause,
        }
    }
}

fn resolve_api_key(raw: Option<&str>) -> Option<SecretString> {
    raw.map(|k| expand_env_vars(k).into_owned())
        .filter(|k| !k.is_empty() && !k.starts_with("${"))
        .map(SecretString::from)
}

/// OpenAI-compatible chat completion client.
pub struct OpenAiChatClient {
    api_key: Option<SecretString>,
    endpoint: String,
    model: String,
    client: reqwest::blocking::Client,
}

impl OpenAiChatClient {
    /// Default API endpoint.
    pub const DEFAULT_ENDPOINT: &'static str = "https://api.openai.com/v1";

    /// Creates a client from the LLM configuration section.
    #[must_use]
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            api_key: resolve_api_key(config.api_key.as_deref()),
            endpoint: config
                .base_url
                .clone()
                .unwrap_or_else(|| Self::DEFAULT_ENDPOINT.to_string()),
            model: config.model.clone(),
            client: build_http_client(HttpConfig {
                timeout_ms: config.timeout_ms,
                connect_timeout_ms: config.connect_timeout_ms,
            }),
        }
    }

    /// Sets the API key.
    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(SecretString::from(key.into()));
        self
    }

    /// Sets the endpoint base URL.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn api_key(&self) -> Result<&SecretString> {
        self.api_key.as_ref().ok_or_else(|| Error::LlmFatal {
            operation: "chat_completion".to_string(),
            cause: "API key not configured".to_string(),
        })
    }
}

impl LlmClient for OpenAiChatClient {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn generate(&self, prompt: &str, max_tokens: u32) -> Result<Completion> {
        let operation = "chat_completion";
        let api_key = self.api_key()?;

        tracing::debug!(provider = "openai", model = %self.model, "LLM request");

        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            max_tokens,
            temperature: 0.0,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.endpoint))
            .header(
                "Authorization",
                format!("Bearer {}", api_key.expose_secret()),
            )
            .json(&request)
            .send()
            .map_err(|e| classify_send_error(operation, &e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            return Err(classify_status(operation, status, &body));
        }

        let parsed: ChatCompletionResponse = response.json().map_err(|e| Error::LlmFatal {
            operation: operation.to_string(),
            cause: format!("invalid response body: {e}"),
        })?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| Error::LlmFatal {
                operation: operation.to_string(),
                cause: "no choices in response".to_string(),
            })?;

        let usage = parsed.usage.map_or(CallUsage::default(), |u| CallUsage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
        });

        Ok(Completion { text, usage })
    }
}

/// OpenAI-compatible embeddings client.
pub struct OpenAiEmbeddingClient {
    api_key: Option<SecretString>,
    endpoint: String,
    model: String,
    dimensions: usize,
    client: reqwest::blocking::Client,
}

impl OpenAiEmbeddingClient {
    /// Creates a client from the embedding configuration section,
    /// borrowing the LLM API key when none is set.
    #[must_use]
    pub fn from_config(config: &EmbeddingConfig, llm: &LlmConfig) -> Self {
        let api_key = resolve_api_key(config.api_key.as_deref())
            .or_else(|| resolve_api_key(llm.api_key.as_deref()));
        Self {
            api_key,
            endpoint: config
                .base_url
                .clone()
                .unwrap_or_else(|| OpenAiChatClient::DEFAULT_ENDPOINT.to_string()),
            model: config.model.clone(),
            dimensions: config.dimensions,
            client: build_http_client(HttpConfig {
                timeout_ms: config.timeout_ms,
                connect_timeout_ms: 3_000,
            }),
        }
    }
}

impl EmbeddingClient for OpenAiEmbeddingClient {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, inputs: &[&str]) -> Result<EmbeddingBatch> {
        let operation = "embeddings";
        if inputs.is_empty() {
            return Ok(EmbeddingBatch {
                vectors: Vec::new(),
                usage: CallUsage::default(),
            });
        }
        let api_key = self.api_key.as_ref().ok_or_else(|| Error::LlmFatal {
            operation: operation.to_string(),
            cause: "API key not configured".to_string(),
        })?;

        let request = EmbeddingRequest {
            model: self.model.clone(),
            input: inputs.iter().map(ToString::to_string).collect(),
        };

        let response = self
            .client
            .post(format!("{}/embeddings", self.endpoint))
            .header(
                "Authorization",
                format!("Bearer {}", api_key.expose_secret()),
            )
            .json(&request)
            .send()
            .map_err(|e| classify_send_error(operation, &e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            return Err(classify_status(operation, status, &body));
        }

        let parsed: EmbeddingResponse = response.json().map_err(|e| Error::LlmFatal {
            operation: operation.to_string(),
            cause: format!("invalid response body: {e}"),
        })?;

        let mut rows = parsed.data;
        rows.sort_by_key(|r| r.index);
        let vectors: Vec<Vec<f32>> = rows.into_iter().map(|r| r.embedding).collect();

        if vectors.len() != inputs.len() {
            return Err(Error::LlmFatal {
                operation: operation.to_string(),
                cause: format!(
                    "expected {} vectors, got {}",
                    inputs.len(),
                    vectors.len()
                ),
            });
        }
        for vector in &vectors {
            if vector.len() != self.dimensions {
                return Err(Error::LlmFatal {
                    operation: operation.to_string(),
                    cause: format!(
                        "expected {} dimensions, got {}",
                        self.dimensions,
                        vector.len()
                    ),
                });
            }
        }

        let usage = parsed.usage.map_or(CallUsage::default(), |u| CallUsage {
            input_tokens: u.prompt_tokens,
            output_tokens: 0,
        });

        Ok(EmbeddingBatch { vectors, usage })
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingRow>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingRow {
    index: usize,
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EmbeddingConfig, LlmConfig};

    #[test]
    fn test_missing_api_key_is_fatal() {
        let mut config = LlmConfig::default();
        config.api_key = None;
        let client = OpenAiChatClient::from_config(&config);
        let err = client.generate("hi", 16).unwrap_err();
        assert_eq!(err.kind(), "LLM_FATAL");
    }

    #[test]
    fn test_unresolved_key_reference_treated_as_missing() {
        let mut config = LlmConfig::default();
        config.api_key = Some("${GRAPHLOOM_TEST_SURELY_UNSET_KEY}".to_string());
        let client = OpenAiChatClient::from_config(&config);
        assert!(client.api_key.is_none());
    }

    #[test]
    fn test_connect_failure_is_transient() {
        let config = LlmConfig {
            api_key: Some("sk-test-key-0123456789".to_string()),
            base_url: Some("http://127.0.0.1:59999".to_string()),
            connect_timeout_ms: 200,
            timeout_ms: 500,
            ..LlmConfig::default()
        };
        let client = OpenAiChatClient::from_config(&config);
        let err = client.generate("hi", 16).unwrap_err();
        assert!(
            err.is_transient() || err.kind() == "LLM_FATAL",
            "unexpected: {err}"
        );
    }

    #[test]
    fn test_embed_empty_batch() {
        let config = EmbeddingConfig::default();
        let llm = LlmConfig::default();
        let client = OpenAiEmbeddingClient::from_config(&config, &llm);
        let batch = client.embed(&[]).unwrap();
        assert!(batch.vectors.is_empty());
    }
}
