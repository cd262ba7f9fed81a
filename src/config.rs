//! Configuration System
//!
//! Provides hierarchical configuration loading from:
//! - config.toml (default configuration)
//! - config.local.toml (git-ignored local overrides)
//! - Environment variables (SEARCHD_* prefix)
//!
//! ## Example
//!
//! ```toml
//! # config.toml
//! [query]
//! timeout_ms = 30000
//! shard_timeout_ms = 10000
//!
//! [cache]
//! logical_capacity = 1024
//! physical_capacity = 1024
//! ```
//!
//! Environment variable overrides:
//! ```bash
//! SEARCHD_QUERY__TIMEOUT_MS=5000
//! SEARCHD_HTTP__PORT=9201
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Main configuration struct
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub optimizer: OptimizerConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub aggregation: AggregationConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Search execution deadlines
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Overall request deadline in milliseconds (0 = no deadline)
    #[serde(default = "default_query_timeout_ms")]
    pub timeout_ms: u64,

    /// Per-shard deadline cap in milliseconds; the effective per-shard
    /// budget is the smaller of this and the remaining request budget
    #[serde(default = "default_shard_timeout_ms")]
    pub shard_timeout_ms: u64,

    /// Planning ceiling in milliseconds
    #[serde(default = "default_planning_timeout_ms")]
    pub planning_timeout_ms: u64,
}

/// Plan cache sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// LRU capacity of the logical plan cache
    #[serde(default = "default_cache_capacity")]
    pub logical_capacity: usize,

    /// LRU capacity of the physical plan cache
    #[serde(default = "default_cache_capacity")]
    pub physical_capacity: usize,
}

/// Rule engine limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerConfig {
    /// Safety cap on rule firings per plan; exceeding it without reaching
    /// a fixpoint fails planning
    #[serde(default = "default_visitation_cap")]
    pub visitation_cap: usize,
}

/// Pipeline engine defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Per-pipeline timeout in milliseconds, unless the pipeline overrides it
    #[serde(default = "default_pipeline_timeout_ms")]
    pub default_timeout_ms: u64,
}

/// Aggregation tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationConfig {
    /// How many extra terms each shard returns to keep the merged top-size
    /// accurate: shard_size = size * multiplier + 10
    #[serde(default = "default_terms_multiplier")]
    pub terms_shard_size_multiplier: f64,
}

impl AggregationConfig {
    /// Per-shard terms bucket count for a requested top `size`.
    pub fn terms_shard_size(&self, size: usize) -> usize {
        (size as f64 * self.terms_shard_size_multiplier) as usize + 10
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Explicit CORS origins; empty means same-origin only
    #[serde(default)]
    pub cors_origins: Vec<String>,

    /// Dev-mode opt-in: allow all origins
    #[serde(default)]
    pub cors_allow_all: bool,

    /// Request body size limit in bytes
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

/// Local node identity and index defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Stable name for the local data node
    #[serde(default = "default_node_name")]
    pub node_name: String,

    /// Shard count used when index creation omits one
    #[serde(default = "default_shards")]
    pub default_shards: u32,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (text, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_query_timeout_ms() -> u64 {
    30_000
}
fn default_shard_timeout_ms() -> u64 {
    10_000
}
fn default_planning_timeout_ms() -> u64 {
    100
}
fn default_cache_capacity() -> usize {
    1024
}
fn default_visitation_cap() -> usize {
    64
}
fn default_pipeline_timeout_ms() -> u64 {
    5_000
}
fn default_terms_multiplier() -> f64 {
    1.5
}
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    9200
}
fn default_max_body_bytes() -> usize {
    16 * 1024 * 1024
}
fn default_node_name() -> String {
    "node-1".to_string()
}
fn default_shards() -> u32 {
    1
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Merges in order:
    /// 1. config.toml (base configuration)
    /// 2. config.local.toml (local overrides, git-ignored)
    /// 3. Environment variables (SEARCHD_* prefix)
    pub fn load() -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file("config.toml"))
            .merge(Toml::file("config.local.toml"))
            .merge(Env::prefixed("SEARCHD_").split("__"))
            .extract()
    }

    /// Load configuration from a specific file path
    pub fn from_file(path: &str) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("SEARCHD_").split("__"))
            .extract()
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        QueryConfig {
            timeout_ms: default_query_timeout_ms(),
            shard_timeout_ms: default_shard_timeout_ms(),
            planning_timeout_ms: default_planning_timeout_ms(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            logical_capacity: default_cache_capacity(),
            physical_capacity: default_cache_capacity(),
        }
    }
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        OptimizerConfig {
            visitation_cap: default_visitation_cap(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            default_timeout_ms: default_pipeline_timeout_ms(),
        }
    }
}

impl Default for AggregationConfig {
    fn default() -> Self {
        AggregationConfig {
            terms_shard_size_multiplier: default_terms_multiplier(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        HttpConfig {
            host: default_host(),
            port: default_port(),
            cors_origins: Vec::new(),
            cors_allow_all: false,
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        ClusterConfig {
            node_name: default_node_name(),
            default_shards: default_shards(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}
