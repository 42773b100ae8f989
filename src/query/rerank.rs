//! External reranking with circuit-breaker fallback (C13).
//!
//! When the provider is `none`, disabled, timing out, erroring, or the
//! circuit is open, the adapter returns the identity mapping: the
//! original retrieval order truncated to `top_k`. Scores below
//! `min_score` are filtered from provider results. Breaker state is
//! process-wide per adapter instance.

use crate::config::{RerankConfig, expand_env_vars};
use crate::llm::resilience::CircuitBreaker;
use crate::llm::{HttpConfig, build_http_client};
use crate::{Error, Result};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

/// One reranked passage.
#[derive(Debug, Clone)]
pub struct RerankedItem {
    /// Index into the caller's original list.
    pub index: usize,
    /// Provider score, `None` on the fallback path.
    pub score: Option<f64>,
    /// Rank before reranking.
    pub old_rank: usize,
    /// Rank after reranking.
    pub new_rank: usize,
}

/// Outcome of a rerank call.
#[derive(Debug, Clone)]
pub struct RerankOutcome {
    /// Reordered items, best first, at most `top_k`.
    pub items: Vec<RerankedItem>,
    /// Whether the identity fallback was used.
    pub fallback: bool,
}

/// Trait for rerank providers.
pub trait RerankProvider: Send + Sync {
    /// The provider name.
    fn name(&self) -> &'static str;

    /// Scores `passages` against `query`; returns `(index, score)` pairs,
    /// best first.
    ///
    /// # Errors
    ///
    /// Returns an error on timeout or a provider failure.
    fn rerank(&self, query: &str, passages: &[&str], top_k: usize) -> Result<Vec<(usize, f64)>>;
}

/// HTTP rerank provider (Cohere-compatible `/rerank` wire format).
pub struct HttpRerankProvider {
    endpoint: String,
    model: String,
    api_key: Option<SecretString>,
    client: reqwest::blocking::Client,
}

impl HttpRerankProvider {
    /// Creates a provider from configuration. The request timeout is the
    /// fallback timeout: a slow provider is indistinguishable from a dead
    /// one.
    #[must_use]
    pub fn from_config(config: &RerankConfig) -> Self {
        Self {
            endpoint: config
                .endpoint
                .clone()
                .unwrap_or_else(|| "https://api.cohere.com/v2/rerank".to_string()),
            model: config
                .model
                .clone()
                .unwrap_or_else(|| "rerank-v3.5".to_string()),
            api_key: config
                .api_key
                .as_deref()
                .map(|k| expand_env_vars(k).into_owned())
                .filter(|k| !k.is_empty() && !k.starts_with("${"))
                .map(SecretString::from),
            client: build_http_client(HttpConfig {
                timeout_ms: config.fallback_timeout_ms,
                connect_timeout_ms: config.fallback_timeout_ms.min(2000),
            }),
        }
    }
}

#[derive(Debug, Serialize)]
struct RerankRequest<'a> {
    model: &'a str,
    query: &'a str,
    documents: Vec<&'a str>,
    top_n: usize,
}

#[derive(Debug, Deserialize)]
struct RerankResponse {
    results: Vec<RerankResult>,
}

#[derive(Debug, Deserialize)]
struct RerankResult {
    index: usize,
    relevance_score: f64,
}

impl RerankProvider for HttpRerankProvider {
    fn name(&self) -> &'static str {
        "http"
    }

    fn rerank(&self, query: &str, passages: &[&str], top_k: usize) -> Result<Vec<(usize, f64)>> {
        let operation = "rerank";
        let api_key = self.api_key.as_ref().ok_or_else(|| Error::LlmFatal {
            operation: operation.to_string(),
            cause: "rerank API key not configured".to_string(),
        })?;

        let request = RerankRequest {
            model: &self.model,
            query,
            documents: passages.to_vec(),
            top_n: top_k,
        };
        let response = self
            .client
            .post(&self.endpoint)
            .header(
                "Authorization",
                format!("Bearer {}", api_key.expose_secret()),
            )
            .json(&request)
            .send()
            .map_err(|e| Error::LlmTransient {
                operation: operation.to_string(),
                cause: e.to_string(),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(Error::LlmTransient {
                operation: operation.to_string(),
                cause: format!("status {status}"),
            });
        }

        let parsed: RerankResponse = response.json().map_err(|e| Error::LlmFatal {
            operation: operation.to_string(),
            cause: format!("invalid response body: {e}"),
        })?;
        Ok(parsed
            .results
            .into_iter()
            .map(|r| (r.index, r.relevance_score))
            .collect())
    }
}

/// Reranker adapter with circuit breaker and identity fallback.
pub struct Reranker {
    provider: Option<Box<dyn RerankProvider>>,
    breaker: CircuitBreaker,
    min_score: f64,
}

impl Reranker {
    /// Builds the adapter from configuration. A `none` provider or a
    /// disabled flag yields a permanently-identity adapter.
    #[must_use]
    pub fn from_config(config: &RerankConfig) -> Self {
        let provider: Option<Box<dyn RerankProvider>> =
            if config.enabled && config.provider != "none" {
                Some(Box::new(HttpRerankProvider::from_config(config)))
            } else {
                None
            };
        Self {
            provider,
            breaker: CircuitBreaker::new(
                config.breaker_failure_threshold,
                config.breaker_reset_timeout_ms,
            ),
            min_score: config.min_score,
        }
    }

    /// Adapter with an injected provider (tests).
    #[must_use]
    pub fn with_provider(provider: Box<dyn RerankProvider>, config: &RerankConfig) -> Self {
        Self {
            provider: Some(provider),
            breaker: CircuitBreaker::new(
                config.breaker_failure_threshold,
                config.breaker_reset_timeout_ms,
            ),
            min_score: config.min_score,
        }
    }

    /// Whether any call would go to a real provider right now.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.provider.is_some() && !self.breaker.is_open()
    }

    fn identity(passages_len: usize, top_k: usize, fallback: bool) -> RerankOutcome {
        let items = (0..passages_len.min(top_k))
            .map(|i| RerankedItem {
                index: i,
                score: None,
                old_rank: i,
                new_rank: i,
            })
            .collect();
        RerankOutcome {
            items,
            fallback,
        }
    }

    /// Reranks `passages`, preserving original order on any failure.
    #[must_use]
    pub fn rerank(&self, query: &str, passages: &[&str], top_k: usize) -> RerankOutcome {
        let Some(provider) = &self.provider else {
            return Self::identity(passages.len(), top_k, false);
        };
        if passages.is_empty() || top_k == 0 {
            return Self::identity(passages.len(), top_k, false);
        }
        if !self.breaker.allow() {
            metrics::counter!("rerank_fallback_total", "reason" => "circuit_open").increment(1);
            tracing::debug!("rerank circuit open, preserving original order");
            return Self::identity(passages.len(), top_k, true);
        }

        match provider.rerank(query, passages, top_k) {
            Ok(scored) => {
                self.breaker.on_success();
                let mut items: Vec<RerankedItem> = scored
                    .into_iter()
                    .filter(|(index, score)| *index < passages.len() && *score >= self.min_score)
                    .enumerate()
                    .map(|(new_rank, (index, score))| RerankedItem {
                        index,
                        score: Some(score),
                        old_rank: index,
                        new_rank,
                    })
                    .collect();
                items.truncate(top_k);
                RerankOutcome {
                    items,
                    fallback: false,
                }
            }
            Err(err) => {
                let tripped = self.breaker.on_failure();
                if tripped {
                    tracing::warn!(provider = provider.name(), "rerank circuit breaker opened");
                }
                metrics::counter!("rerank_fallback_total", "reason" => "error").increment(1);
                tracing::warn!(error = %err, "rerank failed, preserving original order");
                Self::identity(passages.len(), top_k, true)
            }
        }
    }
}
