//! Configuration management.
//!
//! Configuration is resolved once at process start: built-in defaults,
//! overridden by an optional TOML file, overridden by `GRAPHLOOM_*`
//! environment variables. Values may reference environment variables with
//! `${VAR}` syntax (used for API keys).

use crate::{Error, Result};
use serde::Deserialize;
use std::borrow::Cow;
use std::path::{Path, PathBuf};

/// Expands environment variable references in a string.
///
/// Supports `${VAR_NAME}` syntax. If the variable is not set, the original
/// reference is preserved.
///
/// Uses `Cow<str>` to avoid allocation when no expansion is needed.
#[must_use]
pub fn expand_env_vars(input: &str) -> Cow<'_, str> {
    if !input.contains("${") {
        return Cow::Borrowed(input);
    }

    let mut result = input.to_string();
    let mut start = 0;

    while let Some(var_start) = result[start..].find("${") {
        let var_start = start + var_start;
        if let Some(var_end) = result[var_start..].find('}') {
            let var_end = var_start + var_end;
            let var_name = &result[var_start + 2..var_end];
            if let Ok(value) = std::env::var(var_name) {
                result.replace_range(var_start..=var_end, &value);
                start = var_start + value.len();
            } else {
                start = var_end + 1;
            }
        } else {
            break;
        }
    }

    Cow::Owned(result)
}

/// Relational/vector/graph storage engine selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Embedded SQLite (bundled), the default.
    #[default]
    Sqlite,
}

impl StorageBackend {
    /// Parses a backend name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" => Some(Self::Sqlite),
            _ => None,
        }
    }
}

/// Storage configuration.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Engine family, selected at process start.
    pub backend: StorageBackend,
    /// Database path. `None` selects an in-memory database (tests).
    pub path: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let path = directories::ProjectDirs::from("io", "graphloom", "graphloom")
            .map(|dirs| dirs.data_dir().join("graphloom.db"));
        Self {
            backend: StorageBackend::Sqlite,
            path,
        }
    }
}

/// Chunking configuration shared by the prose and code chunkers.
#[derive(Debug, Clone, Copy)]
pub struct ChunkingConfig {
    /// Maximum tokens per chunk.
    pub max_tokens: usize,
    /// Tokens shared between consecutive chunks.
    pub overlap_tokens: usize,
    /// Estimated characters per token for size estimation.
    pub chars_per_token: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: 1200,
            overlap_tokens: 100,
            chars_per_token: 4,
        }
    }
}

/// Entity extraction configuration.
#[derive(Debug, Clone, Copy)]
pub struct ExtractionConfig {
    /// Number of follow-up gleaning passes.
    pub gleaning_max_passes: u32,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            gleaning_max_passes: 1,
        }
    }
}

/// Entity accumulation configuration.
#[derive(Debug, Clone, Copy)]
pub struct EntityConfig {
    /// Summarizer threshold on a single description, in tokens.
    pub description_max_tokens: usize,
    /// FIFO cap on `source_chunk_ids` / `source_file_paths`.
    pub max_source_ids: usize,
}

impl Default for EntityConfig {
    fn default() -> Self {
        Self {
            description_max_tokens: 500,
            max_source_ids: 50,
        }
    }
}

/// Description summarization (map-reduce) configuration.
#[derive(Debug, Clone)]
pub struct DescriptionConfig {
    /// Description count that forces summarization.
    pub force_summary_count: usize,
    /// Total token count that forces summarization.
    pub summary_context_size: usize,
    /// Per-batch token budget in the map step.
    pub summary_max_tokens: usize,
    /// Recursion bound on the reduce step.
    pub max_map_iterations: u32,
    /// Separator used when joining without summarization.
    pub separator: String,
}

impl Default for DescriptionConfig {
    fn default() -> Self {
        Self {
            force_summary_count: 6,
            summary_context_size: 10_000,
            summary_max_tokens: 500,
            max_map_iterations: 3,
            separator: " | ".to_string(),
        }
    }
}

/// Query-path configuration.
#[derive(Debug, Clone, Copy)]
pub struct QueryConfig {
    /// Keyword cache TTL in seconds.
    pub keyword_cache_ttl_secs: u64,
    /// Keyword cache capacity (entries).
    pub keyword_cache_capacity: usize,
    /// Context token budget.
    pub context_max_tokens: usize,
    /// Budget fraction for the entity source.
    pub entity_ratio: f64,
    /// Budget fraction for the relation source.
    pub relation_ratio: f64,
    /// Budget fraction for the chunk source.
    pub chunk_ratio: f64,
    /// Vector search fan-out per source.
    pub top_k: usize,
    /// Hard query timeout in milliseconds.
    pub hard_timeout_ms: u64,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            keyword_cache_ttl_secs: 3600,
            keyword_cache_capacity: 1024,
            context_max_tokens: 4000,
            entity_ratio: 0.4,
            relation_ratio: 0.3,
            chunk_ratio: 0.3,
            top_k: 20,
            hard_timeout_ms: 5000,
        }
    }
}

/// Graph store configuration.
#[derive(Debug, Clone, Copy)]
pub struct GraphConfig {
    /// IN-clause batch size for batched reads.
    pub batch_size: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self { batch_size: 500 }
    }
}

/// Reranker configuration.
#[derive(Debug, Clone)]
pub struct RerankConfig {
    /// Whether reranking is enabled at all.
    pub enabled: bool,
    /// Provider name; `none` disables reranking.
    pub provider: String,
    /// Endpoint URL for the HTTP provider.
    pub endpoint: Option<String>,
    /// Model name sent to the provider.
    pub model: Option<String>,
    /// API key; may be a `${VAR}` reference.
    pub api_key: Option<String>,
    /// Scores below this are filtered out.
    pub min_score: f64,
    /// Provider timeout; on expiry the original order is preserved.
    pub fallback_timeout_ms: u64,
    /// Consecutive failures before the circuit opens.
    pub breaker_failure_threshold: u32,
    /// How long the circuit stays open before half-open.
    pub breaker_reset_timeout_ms: u64,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: "none".to_string(),
            endpoint: None,
            model: None,
            api_key: None,
            min_score: 0.1,
            fallback_timeout_ms: 2000,
            breaker_failure_threshold: 3,
            breaker_reset_timeout_ms: 30_000,
        }
    }
}

/// Ingestion scheduler configuration.
#[derive(Debug, Clone, Copy)]
pub struct ScheduleConfig {
    /// Marker job period in seconds.
    pub marking_secs: u64,
    /// Processor job period in seconds.
    pub processing_secs: u64,
    /// Documents claimed per marker pass.
    pub batch_size: usize,
    /// Failed attempts after which a document is left unclaimed.
    pub max_attempts: u32,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            marking_secs: 5,
            processing_secs: 10,
            batch_size: 8,
            max_attempts: 3,
        }
    }
}

/// LLM endpoint configuration.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Provider name (`openai`-compatible chat endpoint).
    pub provider: String,
    /// Model name.
    pub model: String,
    /// API key; may be a `${VAR}` reference.
    pub api_key: Option<String>,
    /// Base URL override for self-hosted endpoints.
    pub base_url: Option<String>,
    /// Completion token limit per call.
    pub max_tokens: u32,
    /// Request timeout in milliseconds.
    pub timeout_ms: u64,
    /// Connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Maximum retries for transient failures.
    pub max_retries: u32,
    /// Initial retry backoff in milliseconds (doubles per attempt).
    pub retry_backoff_ms: u64,
    /// Consecutive failures before the circuit opens.
    pub breaker_failure_threshold: u32,
    /// How long the circuit stays open before half-open.
    pub breaker_reset_timeout_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: Some("${OPENAI_API_KEY}".to_string()),
            base_url: None,
            max_tokens: 2048,
            timeout_ms: 30_000,
            connect_timeout_ms: 3_000,
            max_retries: 2,
            retry_backoff_ms: 250,
            breaker_failure_threshold: 3,
            breaker_reset_timeout_ms: 30_000,
        }
    }
}

/// Embedding endpoint configuration.
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    /// Model name.
    pub model: String,
    /// API key; may be a `${VAR}` reference. Falls back to the LLM key.
    pub api_key: Option<String>,
    /// Base URL override.
    pub base_url: Option<String>,
    /// Vector dimensionality; all stored vectors must match.
    pub dimensions: usize,
    /// Inputs per embedding request.
    pub batch_size: usize,
    /// Request timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "text-embedding-3-small".to_string(),
            api_key: None,
            base_url: None,
            dimensions: 1536,
            batch_size: 32,
            timeout_ms: 15_000,
        }
    }
}

/// Top-level configuration for graphloom.
#[derive(Debug, Clone, Default)]
pub struct GraphLoomConfig {
    /// Storage engine selection.
    pub storage: StorageConfig,
    /// Chunker tuning.
    pub chunking: ChunkingConfig,
    /// Extraction/gleaning tuning.
    pub extraction: ExtractionConfig,
    /// Entity accumulation tuning.
    pub entity: EntityConfig,
    /// Summarization tuning.
    pub description: DescriptionConfig,
    /// Query-path tuning.
    pub query: QueryConfig,
    /// Graph store tuning.
    pub graph: GraphConfig,
    /// Reranker control.
    pub rerank: RerankConfig,
    /// Scheduler timings.
    pub schedule: ScheduleConfig,
    /// LLM endpoint settings.
    pub llm: LlmConfig,
    /// Embedding endpoint settings.
    pub embedding: EmbeddingConfig,
}

impl GraphLoomConfig {
    /// Loads configuration: defaults, then the TOML file at `path` if
    /// given, then `GRAPHLOOM_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] when the file exists but cannot be
    /// parsed, or a ratio override does not sum sensibly.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(path) = path {
            let raw = std::fs::read_to_string(path).map_err(|e| {
                Error::InvalidInput(format!("cannot read config {}: {e}", path.display()))
            })?;
            let file: ConfigFile = toml::from_str(&raw).map_err(|e| {
                Error::InvalidInput(format!("cannot parse config {}: {e}", path.display()))
            })?;
            file.apply(&mut config);
        }
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Creates an in-memory configuration for tests.
    #[must_use]
    pub fn in_memory() -> Self {
        let mut config = Self::default();
        config.storage.path = None;
        config
    }

    /// Applies `GRAPHLOOM_*` environment variable overrides.
    #[allow(clippy::cognitive_complexity)]
    pub fn apply_env_overrides(&mut self) {
        override_u32(
            "GRAPHLOOM_EXTRACTION_GLEANING_MAX_PASSES",
            &mut self.extraction.gleaning_max_passes,
        );
        override_usize(
            "GRAPHLOOM_ENTITY_DESCRIPTION_MAX_TOKENS",
            &mut self.entity.description_max_tokens,
        );
        override_usize(
            "GRAPHLOOM_ENTITY_MAX_SOURCE_IDS",
            &mut self.entity.max_source_ids,
        );
        override_u64(
            "GRAPHLOOM_QUERY_KEYWORD_CACHE_TTL",
            &mut self.query.keyword_cache_ttl_secs,
        );
        override_usize(
            "GRAPHLOOM_QUERY_CONTEXT_MAX_TOKENS",
            &mut self.query.context_max_tokens,
        );
        override_f64("GRAPHLOOM_QUERY_ENTITY_RATIO", &mut self.query.entity_ratio);
        override_f64(
            "GRAPHLOOM_QUERY_RELATION_RATIO",
            &mut self.query.relation_ratio,
        );
        override_f64("GRAPHLOOM_QUERY_CHUNK_RATIO", &mut self.query.chunk_ratio);
        override_usize("GRAPHLOOM_GRAPH_BATCH_SIZE", &mut self.graph.batch_size);
        override_bool("GRAPHLOOM_RERANK_ENABLED", &mut self.rerank.enabled);
        override_string("GRAPHLOOM_RERANK_PROVIDER", &mut self.rerank.provider);
        override_f64("GRAPHLOOM_RERANK_MIN_SCORE", &mut self.rerank.min_score);
        override_u64(
            "GRAPHLOOM_RERANK_FALLBACK_TIMEOUT_MS",
            &mut self.rerank.fallback_timeout_ms,
        );
        override_usize(
            "GRAPHLOOM_DESCRIPTION_FORCE_SUMMARY_COUNT",
            &mut self.description.force_summary_count,
        );
        override_usize(
            "GRAPHLOOM_DESCRIPTION_SUMMARY_CONTEXT_SIZE",
            &mut self.description.summary_context_size,
        );
        override_u32(
            "GRAPHLOOM_DESCRIPTION_MAX_MAP_ITERATIONS",
            &mut self.description.max_map_iterations,
        );
        override_u64("GRAPHLOOM_SCHEDULE_MARKING", &mut self.schedule.marking_secs);
        override_u64(
            "GRAPHLOOM_SCHEDULE_PROCESSING",
            &mut self.schedule.processing_secs,
        );
        override_usize("GRAPHLOOM_BATCH_SIZE", &mut self.schedule.batch_size);
        override_string("GRAPHLOOM_LLM_MODEL", &mut self.llm.model);
        override_u32("GRAPHLOOM_LLM_MAX_RETRIES", &mut self.llm.max_retries);
        override_u64("GRAPHLOOM_LLM_TIMEOUT_MS", &mut self.llm.timeout_ms);
        override_string("GRAPHLOOM_EMBEDDING_MODEL", &mut self.embedding.model);
        override_usize(
            "GRAPHLOOM_EMBEDDING_DIMENSIONS",
            &mut self.embedding.dimensions,
        );

        if let Ok(v) = std::env::var("GRAPHLOOM_STORAGE_BACKEND")
            && let Some(backend) = StorageBackend::parse(&v)
        {
            self.storage.backend = backend;
        }
        if let Ok(v) = std::env::var("GRAPHLOOM_STORAGE_PATH") {
            self.storage.path = Some(PathBuf::from(v));
        }
        if let Ok(v) = std::env::var("GRAPHLOOM_LLM_BASE_URL") {
            self.llm.base_url = Some(v);
        }
        if let Ok(v) = std::env::var("GRAPHLOOM_LLM_API_KEY") {
            self.llm.api_key = Some(v);
        }
    }

    /// Validates invariants that cross option boundaries.
    fn validate(&self) -> Result<()> {
        let ratios = self.query.entity_ratio + self.query.relation_ratio + self.query.chunk_ratio;
        if !(0.99..=1.01).contains(&ratios) {
            return Err(Error::InvalidInput(format!(
                "query context ratios must sum to 1.0, got {ratios:.2}"
            )));
        }
        if self.chunking.overlap_tokens >= self.chunking.max_tokens {
            return Err(Error::InvalidInput(
                "chunk overlap must be smaller than the chunk size".to_string(),
            ));
        }
        Ok(())
    }
}

fn override_string(var: &str, target: &mut String) {
    if let Ok(v) = std::env::var(var) {
        *target = v;
    }
}

fn override_bool(var: &str, target: &mut bool) {
    if let Ok(v) = std::env::var(var)
        && let Ok(parsed) = v.parse()
    {
        *target = parsed;
    }
}

fn override_u32(var: &str, target: &mut u32) {
    if let Ok(v) = std::env::var(var)
        && let Ok(parsed) = v.parse()
    {
        *target = parsed;
    }
}

fn override_u64(var: &str, target: &mut u64) {
    if let Ok(v) = std::env::var(var)
        && let Ok(parsed) = v.parse()
    {
        *target = parsed;
    }
}

fn override_usize(var: &str, target: &mut usize) {
    if let Ok(v) = std::env::var(var)
        && let Ok(parsed) = v.parse()
    {
        *target = parsed;
    }
}

fn override_f64(var: &str, target: &mut f64) {
    if let Ok(v) = std::env::var(var)
        && let Ok(parsed) = v.parse()
    {
        *target = parsed;
    }
}

/// Raw TOML file shape; every field optional.
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    storage: Option<StorageFileSection>,
    chunking: Option<ChunkingFileSection>,
    extraction: Option<ExtractionFileSection>,
    entity: Option<EntityFileSection>,
    description: Option<DescriptionFileSection>,
    query: Option<QueryFileSection>,
    graph: Option<GraphFileSection>,
    rerank: Option<RerankFileSection>,
    schedule: Option<ScheduleFileSection>,
    llm: Option<LlmFileSection>,
    embedding: Option<EmbeddingFileSection>,
}

#[derive(Debug, Default, Deserialize)]
struct StorageFileSection {
    backend: Option<StorageBackend>,
    path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkingFileSection {
    max_tokens: Option<usize>,
    overlap_tokens: Option<usize>,
    chars_per_token: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct ExtractionFileSection {
    #[serde(rename = "gleaning")]
    gleaning: Option<GleaningFileSection>,
}

#[derive(Debug, Default, Deserialize)]
struct GleaningFileSection {
    max_passes: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct EntityFileSection {
    description_max_tokens: Option<usize>,
    max_source_ids: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct DescriptionFileSection {
    force_summary_count: Option<usize>,
    summary_context_size: Option<usize>,
    summary_max_tokens: Option<usize>,
    max_map_iterations: Option<u32>,
    separator: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct QueryFileSection {
    keyword_cache_ttl: Option<u64>,
    context_max_tokens: Option<usize>,
    entity_ratio: Option<f64>,
    relation_ratio: Option<f64>,
    chunk_ratio: Option<f64>,
    top_k: Option<usize>,
    hard_timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct GraphFileSection {
    batch_size: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct RerankFileSection {
    enabled: Option<bool>,
    provider: Option<String>,
    endpoint: Option<String>,
    model: Option<String>,
    api_key: Option<String>,
    min_score: Option<f64>,
    fallback_timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ScheduleFileSection {
    marking: Option<u64>,
    processing: Option<u64>,
    batch_size: Option<usize>,
    max_attempts: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmFileSection {
    provider: Option<String>,
    model: Option<String>,
    api_key: Option<String>,
    base_url: Option<String>,
    max_tokens: Option<u32>,
    timeout_ms: Option<u64>,
    max_retries: Option<u32>,
    retry_backoff_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct EmbeddingFileSection {
    model: Option<String>,
    api_key: Option<String>,
    base_url: Option<String>,
    dimensions: Option<usize>,
    batch_size: Option<usize>,
}

macro_rules! apply_field {
    ($src:expr, $dst:expr) => {
        if let Some(v) = $src {
            $dst = v;
        }
    };
}

impl ConfigFile {
    #[allow(clippy::cognitive_complexity, clippy::too_many_lines)]
    fn apply(self, config: &mut GraphLoomConfig) {
        if let Some(s) = self.storage {
            apply_field!(s.backend, config.storage.backend);
            if s.path.is_some() {
                config.storage.path = s.path;
            }
        }
        if let Some(s) = self.chunking {
            apply_field!(s.max_tokens, config.chunking.max_tokens);
            apply_field!(s.overlap_tokens, config.chunking.overlap_tokens);
            apply_field!(s.chars_per_token, config.chunking.chars_per_token);
        }
        if let Some(s) = self.extraction
            && let Some(g) = s.gleaning
        {
            apply_field!(g.max_passes, config.extraction.gleaning_max_passes);
        }
        if let Some(s) = self.entity {
            apply_field!(s.description_max_tokens, config.entity.description_max_tokens);
            apply_field!(s.max_source_ids, config.entity.max_source_ids);
        }
        if let Some(s) = self.description {
            apply_field!(s.force_summary_count, config.description.force_summary_count);
            apply_field!(s.summary_context_size, config.description.summary_context_size);
            apply_field!(s.summary_max_tokens, config.description.summary_max_tokens);
            apply_field!(s.max_map_iterations, config.description.max_map_iterations);
            apply_field!(s.separator, config.description.separator);
        }
        if let Some(s) = self.query {
            apply_field!(s.keyword_cache_ttl, config.query.keyword_cache_ttl_secs);
            apply_field!(s.context_max_tokens, config.query.context_max_tokens);
            apply_field!(s.entity_ratio, config.query.entity_ratio);
            apply_field!(s.relation_ratio, config.query.relation_ratio);
            apply_field!(s.chunk_ratio, config.query.chunk_ratio);
            apply_field!(s.top_k, config.query.top_k);
            apply_field!(s.hard_timeout_ms, config.query.hard_timeout_ms);
        }
        if let Some(s) = self.graph {
            apply_field!(s.batch_size, config.graph.batch_size);
        }
        if let Some(s) = self.rerank {
            apply_field!(s.enabled, config.rerank.enabled);
            apply_field!(s.provider, config.rerank.provider);
            if s.endpoint.is_some() {
                config.rerank.endpoint = s.endpoint;
            }
            if s.model.is_some() {
                config.rerank.model = s.model;
            }
            if s.api_key.is_some() {
                config.rerank.api_key = s.api_key;
            }
            apply_field!(s.min_score, config.rerank.min_score);
            apply_field!(s.fallback_timeout_ms, config.rerank.fallback_timeout_ms);
        }
        if let Some(s) = self.schedule {
            apply_field!(s.marking, config.schedule.marking_secs);
            apply_field!(s.processing, config.schedule.processing_secs);
            apply_field!(s.batch_size, config.schedule.batch_size);
            apply_field!(s.max_attempts, config.schedule.max_attempts);
        }
        if let Some(s) = self.llm {
            apply_field!(s.provider, config.llm.provider);
            apply_field!(s.model, config.llm.model);
            if s.api_key.is_some() {
                config.llm.api_key = s.api_key;
            }
            if s.base_url.is_some() {
                config.llm.base_url = s.base_url;
            }
            apply_field!(s.max_tokens, config.llm.max_tokens);
            apply_field!(s.timeout_ms, config.llm.timeout_ms);
            apply_field!(s.max_retries, config.llm.max_retries);
            apply_field!(s.retry_backoff_ms, config.llm.retry_backoff_ms);
        }
        if let Some(s) = self.embedding {
            apply_field!(s.model, config.embedding.model);
            if s.api_key.is_some() {
                config.embedding.api_key = s.api_key;
            }
            if s.base_url.is_some() {
                config.embedding.base_url = s.base_url;
            }
            apply_field!(s.dimensions, config.embedding.dimensions);
            apply_field!(s.batch_size, config.embedding.batch_size);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = GraphLoomConfig::default();
        assert_eq!(config.extraction.gleaning_max_passes, 1);
        assert_eq!(config.entity.max_source_ids, 50);
        assert_eq!(config.entity.description_max_tokens, 500);
        assert_eq!(config.query.keyword_cache_ttl_secs, 3600);
        assert_eq!(config.query.context_max_tokens, 4000);
        assert_eq!(config.description.force_summary_count, 6);
        assert_eq!(config.description.summary_context_size, 10_000);
        assert_eq!(config.description.max_map_iterations, 3);
        assert_eq!(config.graph.batch_size, 500);
        assert!((config.rerank.min_score - 0.1).abs() < f64::EPSILON);
        assert_eq!(config.rerank.fallback_timeout_ms, 2000);
    }

    #[test]
    fn test_ratio_validation() {
        let mut config = GraphLoomConfig::in_memory();
        config.query.entity_ratio = 0.9;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_section_apply() {
        let file: ConfigFile = toml::from_str(
            r#"
            [extraction.gleaning]
            max_passes = 3

            [query]
            context_max_tokens = 2000

            [rerank]
            enabled = true
            provider = "http"
            "#,
        )
        .unwrap();
        let mut config = GraphLoomConfig::in_memory();
        file.apply(&mut config);
        assert_eq!(config.extraction.gleaning_max_passes, 3);
        assert_eq!(config.query.context_max_tokens, 2000);
        assert!(config.rerank.enabled);
        assert_eq!(config.rerank.provider, "http");
    }

    #[test]
    fn test_expand_env_vars_passthrough() {
        assert_eq!(expand_env_vars("no vars here"), "no vars here");
        assert_eq!(expand_env_vars("${DEFINITELY_UNSET_VAR_XYZ}"), "${DEFINITELY_UNSET_VAR_XYZ}");
    }
}
