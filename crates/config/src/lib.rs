//! Configuration loading, validation, and management for Kenning.
//!
//! Loads configuration from `~/.kenning/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.kenning/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// LLM client configuration
    #[serde(default)]
    pub llm: LlmConfig,

    /// Record store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Unit pipeline configuration
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Entity resolver configuration
    #[serde(default)]
    pub resolver: ResolverConfig,

    /// Observer dispatch configuration
    #[serde(default)]
    pub observers: ObserverConfig,

    /// Salience, decay, and promotion configuration
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_true() -> bool {
    true
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

// ── LLM ─────────────────────────────────────────────────────────────────────

#[derive(Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// OpenAI-compatible base URL
    #[serde(default = "default_api_url")]
    pub api_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Model per tier
    #[serde(default)]
    pub models: TierModels,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Request-level timeout owned by the client
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_api_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_max_tokens() -> u32 {
    2048
}
fn default_timeout_secs() -> u64 {
    60
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            api_key: None,
            models: TierModels::default(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("api_url", &self.api_url)
            .field("api_key", &redact(&self.api_key))
            .field("models", &self.models)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierModels {
    #[serde(default = "default_small_model")]
    pub small: String,

    #[serde(default = "default_medium_model")]
    pub medium: String,

    #[serde(default = "default_large_model")]
    pub large: String,
}

fn default_small_model() -> String {
    "gpt-4o-mini".into()
}
fn default_medium_model() -> String {
    "gpt-4o-mini".into()
}
fn default_large_model() -> String {
    "gpt-4o".into()
}

impl Default for TierModels {
    fn default() -> Self {
        Self {
            small: default_small_model(),
            medium: default_medium_model(),
            large: default_large_model(),
        }
    }
}

// ── Store ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// "sqlite" or "memory"
    #[serde(default = "default_store_backend")]
    pub backend: String,

    /// SQLite database path; defaults to `~/.kenning/kenning.sqlite`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

fn default_store_backend() -> String {
    "sqlite".into()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            path: None,
        }
    }
}

impl StoreConfig {
    pub fn resolved_path(&self) -> PathBuf {
        self.path
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| AppConfig::config_dir().join("kenning.sqlite"))
    }
}

// ── Pipeline ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Canonical entities given to the extractor as context
    #[serde(default = "default_recent_entities")]
    pub recent_entities: usize,

    /// Earlier propositions given to the extractor for discourse continuity
    #[serde(default = "default_recent_propositions")]
    pub recent_propositions: usize,

    /// Attempt budget recorded on each task (retries are external)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Model tier used for extraction: "small", "medium", "large"
    #[serde(default = "default_extraction_tier")]
    pub extraction_tier: String,
}

fn default_recent_entities() -> usize {
    20
}
fn default_recent_propositions() -> usize {
    10
}
fn default_max_attempts() -> u32 {
    3
}
fn default_extraction_tier() -> String {
    "medium".into()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            recent_entities: default_recent_entities(),
            recent_propositions: default_recent_propositions(),
            max_attempts: default_max_attempts(),
            extraction_tier: default_extraction_tier(),
        }
    }
}

// ── Resolver ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Recently referenced entities kept in the resolution context
    #[serde(default = "default_recency_window")]
    pub recency_window: usize,

    /// Maximum edit distance for a fuzzy name match
    #[serde(default = "default_fuzzy_max_distance")]
    pub fuzzy_max_distance: usize,

    /// Known speech-to-text mishearings: heard form → canonical name
    #[serde(default)]
    pub spelling: HashMap<String, String>,
}

fn default_recency_window() -> usize {
    10
}
fn default_fuzzy_max_distance() -> usize {
    2
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            recency_window: default_recency_window(),
            fuzzy_max_distance: default_fuzzy_max_distance(),
            spelling: HashMap::new(),
        }
    }
}

// ── Observers ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObserverConfig {
    /// LLM-using observers allowed to run at once
    #[serde(default = "default_max_concurrent_llm")]
    pub max_concurrent_llm: usize,

    /// Default per-observer rate limit
    #[serde(default = "default_min_run_interval_ms")]
    pub min_run_interval_ms: u64,

    #[serde(default = "default_stalled_goal_days")]
    pub stalled_goal_days: i64,

    #[serde(default = "default_narrative_min_claims")]
    pub narrative_min_claims: usize,

    #[serde(default = "default_contradiction_max_candidates")]
    pub contradiction_max_candidates: usize,

    #[serde(default = "default_contradiction_min_similarity")]
    pub contradiction_min_similarity: f64,

    #[serde(default = "default_pattern_min_occurrences")]
    pub pattern_min_occurrences: usize,

    /// Promote claims the consolidation observer flags
    #[serde(default = "default_true")]
    pub auto_promote: bool,

    /// Observer type ids that are not registered
    #[serde(default)]
    pub disabled: Vec<String>,
}

fn default_max_concurrent_llm() -> usize {
    2
}
fn default_min_run_interval_ms() -> u64 {
    500
}
fn default_stalled_goal_days() -> i64 {
    7
}
fn default_narrative_min_claims() -> usize {
    10
}
fn default_contradiction_max_candidates() -> usize {
    5
}
fn default_contradiction_min_similarity() -> f64 {
    0.5
}
fn default_pattern_min_occurrences() -> usize {
    3
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            max_concurrent_llm: default_max_concurrent_llm(),
            min_run_interval_ms: default_min_run_interval_ms(),
            stalled_goal_days: default_stalled_goal_days(),
            narrative_min_claims: default_narrative_min_claims(),
            contradiction_max_candidates: default_contradiction_max_candidates(),
            contradiction_min_similarity: default_contradiction_min_similarity(),
            pattern_min_occurrences: default_pattern_min_occurrences(),
            auto_promote: true,
            disabled: vec![],
        }
    }
}

// ── Memory ──────────────────────────────────────────────────────────────────

/// Weights of the salience blend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SalienceWeights {
    #[serde(default = "default_w_recency")]
    pub recency: f64,
    #[serde(default = "default_w_emotional")]
    pub emotional: f64,
    #[serde(default = "default_w_stakes")]
    pub stakes: f64,
    #[serde(default = "default_w_confirmation")]
    pub confirmation: f64,
    #[serde(default = "default_w_access")]
    pub access: f64,
}

fn default_w_recency() -> f64 {
    0.25
}
fn default_w_emotional() -> f64 {
    0.2
}
fn default_w_stakes() -> f64 {
    0.2
}
fn default_w_confirmation() -> f64 {
    0.15
}
fn default_w_access() -> f64 {
    0.2
}

impl Default for SalienceWeights {
    fn default() -> Self {
        Self {
            recency: default_w_recency(),
            emotional: default_w_emotional(),
            stakes: default_w_stakes(),
            confirmation: default_w_confirmation(),
            access: default_w_access(),
        }
    }
}

impl SalienceWeights {
    pub fn total(&self) -> f64 {
        self.recency + self.emotional + self.stakes + self.confirmation + self.access
    }
}

/// Confidence half-lives per temporality, in days.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HalfLives {
    #[serde(default = "default_fast_half_life")]
    pub fast_decaying_days: f64,
    #[serde(default = "default_point_half_life")]
    pub point_in_time_days: f64,
    #[serde(default = "default_slow_half_life")]
    pub slowly_decaying_days: f64,
}

fn default_fast_half_life() -> f64 {
    3.0
}
fn default_point_half_life() -> f64 {
    14.0
}
fn default_slow_half_life() -> f64 {
    60.0
}

impl Default for HalfLives {
    fn default() -> Self {
        Self {
            fast_decaying_days: default_fast_half_life(),
            point_in_time_days: default_point_half_life(),
            slowly_decaying_days: default_slow_half_life(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default)]
    pub weights: SalienceWeights,

    /// Half-life of the recency factor, measured from last confirmation
    #[serde(default = "default_recency_half_life_days")]
    pub recency_half_life_days: f64,

    /// Window over which a recent access boosts salience
    #[serde(default = "default_access_boost_hours")]
    pub access_boost_hours: f64,

    #[serde(default)]
    pub half_lives: HalfLives,

    /// Long-term claims decay this many times slower
    #[serde(default = "default_long_term_multiplier")]
    pub long_term_half_life_multiplier: f64,

    #[serde(default = "default_stale_threshold")]
    pub stale_threshold: f64,

    #[serde(default = "default_dormant_threshold")]
    pub dormant_threshold: f64,

    #[serde(default = "default_long_term_floor")]
    pub long_term_floor: f64,

    #[serde(default = "default_promotion_threshold")]
    pub promotion_threshold: f64,

    #[serde(default = "default_top_of_mind_limit")]
    pub top_of_mind_limit: usize,
}

fn default_recency_half_life_days() -> f64 {
    7.0
}
fn default_access_boost_hours() -> f64 {
    24.0
}
fn default_long_term_multiplier() -> f64 {
    4.0
}
fn default_stale_threshold() -> f64 {
    0.3
}
fn default_dormant_threshold() -> f64 {
    0.1
}
fn default_long_term_floor() -> f64 {
    0.3
}
fn default_promotion_threshold() -> f64 {
    0.6
}
fn default_top_of_mind_limit() -> usize {
    5
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            weights: SalienceWeights::default(),
            recency_half_life_days: default_recency_half_life_days(),
            access_boost_hours: default_access_boost_hours(),
            half_lives: HalfLives::default(),
            long_term_half_life_multiplier: default_long_term_multiplier(),
            stale_threshold: default_stale_threshold(),
            dormant_threshold: default_dormant_threshold(),
            long_term_floor: default_long_term_floor(),
            promotion_threshold: default_promotion_threshold(),
            top_of_mind_limit: default_top_of_mind_limit(),
        }
    }
}

// ── Logging ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.kenning/config.toml).
    ///
    /// Also checks environment variables:
    /// - `KENNING_API_KEY` (highest priority), then `OPENAI_API_KEY`, `OPENROUTER_API_KEY`
    /// - `KENNING_API_URL`
    /// - `KENNING_DB`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env();
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply `KENNING_*` environment overrides.
    pub fn apply_env(&mut self) {
        if self.llm.api_key.is_none() {
            self.llm.api_key = std::env::var("KENNING_API_KEY")
                .ok()
                .or_else(|| std::env::var("OPENAI_API_KEY").ok())
                .or_else(|| std::env::var("OPENROUTER_API_KEY").ok());
        }

        if let Ok(url) = std::env::var("KENNING_API_URL") {
            self.llm.api_url = url;
        }

        if let Ok(path) = std::env::var("KENNING_DB") {
            self.store.path = Some(path);
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".kenning")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.llm.temperature < 0.0 || self.llm.temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "llm.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if !matches!(self.pipeline.extraction_tier.as_str(), "small" | "medium" | "large") {
            return Err(ConfigError::ValidationError(format!(
                "pipeline.extraction_tier must be small, medium, or large (got '{}')",
                self.pipeline.extraction_tier
            )));
        }

        if !matches!(self.store.backend.as_str(), "sqlite" | "memory") {
            return Err(ConfigError::ValidationError(format!(
                "store.backend must be sqlite or memory (got '{}')",
                self.store.backend
            )));
        }

        if self.observers.max_concurrent_llm == 0 {
            return Err(ConfigError::ValidationError(
                "observers.max_concurrent_llm must be at least 1".into(),
            ));
        }

        let w = &self.memory.weights;
        if [w.recency, w.emotional, w.stakes, w.confirmation, w.access]
            .iter()
            .any(|v| *v < 0.0)
            || w.total() <= 0.0
        {
            return Err(ConfigError::ValidationError(
                "memory.weights must be non-negative with a positive sum".into(),
            ));
        }

        let m = &self.memory;
        if !(0.0 <= m.dormant_threshold && m.dormant_threshold < m.stale_threshold && m.stale_threshold <= 1.0) {
            return Err(ConfigError::ValidationError(
                "memory thresholds must satisfy 0 <= dormant < stale <= 1".into(),
            ));
        }

        let h = &m.half_lives;
        if [
            h.fast_decaying_days,
            h.point_in_time_days,
            h.slowly_decaying_days,
            m.recency_half_life_days,
            m.access_boost_hours,
            m.long_term_half_life_multiplier,
        ]
        .iter()
        .any(|v| *v <= 0.0)
        {
            return Err(ConfigError::ValidationError(
                "half-lives, access window, and long-term multiplier must be > 0".into(),
            ));
        }

        Ok(())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for kenning_core::Error {
    fn from(e: ConfigError) -> Self {
        kenning_core::Error::Config {
            message: e.to_string(),
        }
    }
}
