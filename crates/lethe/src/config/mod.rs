use serde::Deserialize;
use std::path::PathBuf;

use crate::scoring::ScoringParams;

/// Main configuration structure for Lethe
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Storage substrate configuration
    #[serde(default)]
    pub storage: StorageConfig,
    /// Significance scoring parameters
    #[serde(default)]
    pub scoring: ScoringParams,
    /// Active-context (ephemeral) tier configuration
    #[serde(default)]
    pub active: ActiveContextConfig,
    /// Promotion engine configuration
    #[serde(default)]
    pub promotion: PromotionConfig,
    /// Consolidation engine configuration
    #[serde(default)]
    pub consolidation: ConsolidationConfig,
    /// Distillation engine configuration
    #[serde(default)]
    pub distillation: DistillationConfig,
    /// Lifecycle event bus configuration
    #[serde(default)]
    pub bus: BusConfig,
    /// Reconciliation sweep configuration
    #[serde(default)]
    pub sweep: SweepConfig,
    /// External language capability configuration
    #[serde(default)]
    pub capability: CapabilityConfig,
}

/// Storage substrate configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Number of shards for the in-process substrate
    #[serde(default = "default_shard_count")]
    pub shard_count: usize,
    /// Base directory for daemon state
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            shard_count: default_shard_count(),
            data_dir: default_data_dir(),
        }
    }
}

fn default_shard_count() -> usize {
    16
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".lethe"))
        .unwrap_or_else(|| PathBuf::from(".lethe"))
}

/// Active-context tier configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ActiveContextConfig {
    /// Retention window for raw turns, in seconds
    #[serde(default = "default_turn_ttl_secs")]
    pub turn_ttl_secs: u64,
    /// Unpromoted-turn count that triggers a buffer-threshold event
    #[serde(default = "default_buffer_threshold")]
    pub buffer_threshold: usize,
    /// Maximum turns held in the per-scope read cache
    #[serde(default = "default_turn_cache_size")]
    pub turn_cache_size: usize,
}

impl Default for ActiveContextConfig {
    fn default() -> Self {
        Self {
            turn_ttl_secs: default_turn_ttl_secs(),
            buffer_threshold: default_buffer_threshold(),
            turn_cache_size: default_turn_cache_size(),
        }
    }
}

fn default_turn_ttl_secs() -> u64 {
    86_400
}

fn default_buffer_threshold() -> usize {
    10
}

fn default_turn_cache_size() -> usize {
    256
}

/// Promotion engine configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PromotionConfig {
    /// Minimum turns before a batch is worth extracting
    #[serde(default = "default_min_batch")]
    pub min_batch: usize,
    /// Maximum turns per extraction batch
    #[serde(default = "default_max_batch")]
    pub max_batch: usize,
    /// Interval between promotion sweeps, in seconds
    #[serde(default = "default_promotion_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Timeout for one promotion run, in seconds
    #[serde(default = "default_run_timeout_secs")]
    pub run_timeout_secs: u64,
}

impl Default for PromotionConfig {
    fn default() -> Self {
        Self {
            min_batch: default_min_batch(),
            max_batch: default_max_batch(),
            sweep_interval_secs: default_promotion_interval_secs(),
            run_timeout_secs: default_run_timeout_secs(),
        }
    }
}

fn default_min_batch() -> usize {
    10
}

fn default_max_batch() -> usize {
    20
}

fn default_promotion_interval_secs() -> u64 {
    60
}

fn default_run_timeout_secs() -> u64 {
    120
}

/// Consolidation engine configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ConsolidationConfig {
    /// Interval between consolidation sweeps, in seconds
    #[serde(default = "default_consolidation_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Maximum temporal gap between facts in one episode segment, in minutes
    #[serde(default = "default_cluster_gap_minutes")]
    pub cluster_gap_minutes: u64,
    /// Minimum cosine similarity for a fact to join a segment
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    /// Prior similar episodes to link during look-back, 0 disables
    #[serde(default = "default_lookback_k")]
    pub lookback_k: usize,
    /// Timeout for one consolidation run, in seconds
    #[serde(default = "default_run_timeout_secs")]
    pub run_timeout_secs: u64,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_consolidation_interval_secs(),
            cluster_gap_minutes: default_cluster_gap_minutes(),
            similarity_threshold: default_similarity_threshold(),
            lookback_k: default_lookback_k(),
            run_timeout_secs: default_run_timeout_secs(),
        }
    }
}

fn default_consolidation_interval_secs() -> u64 {
    300
}

fn default_cluster_gap_minutes() -> u64 {
    60
}

fn default_similarity_threshold() -> f32 {
    0.35
}

fn default_lookback_k() -> usize {
    3
}

/// Distillation engine configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DistillationConfig {
    /// Interval between distillation sweeps, in seconds
    #[serde(default = "default_distillation_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Minimum number of episodes a theme must recur in
    #[serde(default = "default_min_support")]
    pub min_support: usize,
    /// Timeout for one distillation run, in seconds
    #[serde(default = "default_run_timeout_secs")]
    pub run_timeout_secs: u64,
}

impl Default for DistillationConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_distillation_interval_secs(),
            min_support: default_min_support(),
            run_timeout_secs: default_run_timeout_secs(),
        }
    }
}

fn default_distillation_interval_secs() -> u64 {
    900
}

fn default_min_support() -> usize {
    3
}

/// Lifecycle event bus configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BusConfig {
    /// Maximum retained events; older entries are trimmed (bounded by count)
    #[serde(default = "default_bus_capacity")]
    pub capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            capacity: default_bus_capacity(),
        }
    }
}

fn default_bus_capacity() -> usize {
    1024
}

/// Reconciliation sweep configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SweepConfig {
    /// Interval between reconciliation sweeps, in seconds
    #[serde(default = "default_sweep_interval_secs")]
    pub interval_secs: u64,
    /// Age past which an unprocessed item counts as stranded, in seconds
    #[serde(default = "default_stranded_after_secs")]
    pub stranded_after_secs: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_sweep_interval_secs(),
            stranded_after_secs: default_stranded_after_secs(),
        }
    }
}

fn default_sweep_interval_secs() -> u64 {
    120
}

fn default_stranded_after_secs() -> u64 {
    600
}

/// External language capability configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CapabilityConfig {
    /// OpenAI-compatible API endpoint; empty disables the remote capability
    #[serde(default)]
    pub api_url: String,
    /// Environment variable name for the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Model identifier
    #[serde(default = "default_capability_model")]
    pub model: String,
    /// Request timeout in seconds
    #[serde(default = "default_capability_timeout_secs")]
    pub timeout_secs: u64,
    /// Consecutive failures before the circuit breaker opens
    #[serde(default = "default_breaker_threshold")]
    pub breaker_threshold: u32,
    /// Cooldown before a half-open probe, in seconds
    #[serde(default = "default_breaker_cooldown_secs")]
    pub breaker_cooldown_secs: u64,
}

impl Default for CapabilityConfig {
    fn default() -> Self {
        Self {
            api_url: String::new(),
            api_key_env: default_api_key_env(),
            model: default_capability_model(),
            timeout_secs: default_capability_timeout_secs(),
            breaker_threshold: default_breaker_threshold(),
            breaker_cooldown_secs: default_breaker_cooldown_secs(),
        }
    }
}

fn default_api_key_env() -> String {
    "LETHE_API_KEY".to_string()
}

fn default_capability_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_capability_timeout_secs() -> u64 {
    30
}

fn default_breaker_threshold() -> u32 {
    3
}

fn default_breaker_cooldown_secs() -> u64 {
    60
}
