//! Engine configuration.

use std::path::PathBuf;

/// Engine-wide configuration. Pure data; parsing from CLI flags or env vars
/// happens at the `apps/*` boundary, not here.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Data directory for the embedded KV engine and CTE spill files.
    pub data_dir: PathBuf,
    /// Transaction deadline in milliseconds before the tx-timeout sweeper
    /// rolls it back (spec §4.8, §5).
    pub tx_timeout_ms: u64,
    /// Interval at which the tx-timeout sweeper scans for expired transactions.
    pub tx_sweep_interval_ms: u64,
    /// Interval at which the TTL sweeper scans `ttlidx:` for expired entities.
    pub ttl_sweep_interval_ms: u64,
    /// Interval at which the changefeed retention sweeper runs.
    pub changefeed_sweep_interval_ms: u64,
    /// Changefeed entries older than this watermark (by sequence count kept)
    /// are eligible for deletion.
    pub changefeed_retention_entries: u64,
    /// CTE cache memory budget before spilling to disk (spec §4.11).
    pub cte_cache_max_memory_bytes: u64,
    /// Directory CTE spill files are written to.
    pub cte_spill_dir: PathBuf,
    /// Default HNSW `M` parameter for newly created vector indexes.
    pub hnsw_default_m: usize,
    /// Default HNSW `efConstruction` for newly created vector indexes.
    pub hnsw_default_ef_construction: usize,
    /// Default `efSearch` used when a query does not override it.
    pub hnsw_default_ef_search: usize,
    /// Tombstone fraction (0.0-1.0) above which a vector index is rebuilt.
    pub hnsw_tombstone_rebuild_threshold: f64,
    /// Overfetch multiplier used by prefiltered HNSW search.
    pub vector_overfetch_multiplier: usize,
    /// Query pipeline deadline in milliseconds.
    pub request_timeout_ms: u64,
    /// Retries for transient storage I/O errors.
    pub persistence_max_retries: u32,
    /// Delay between persistence retry attempts.
    pub persistence_retry_delay_ms: u64,
    /// Semantic cache capacity (entry count) before LRU-style eviction.
    pub semantic_cache_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            tx_timeout_ms: 30_000,
            tx_sweep_interval_ms: 1_000,
            ttl_sweep_interval_ms: 1_000,
            changefeed_sweep_interval_ms: 5_000,
            changefeed_retention_entries: 1_000_000,
            cte_cache_max_memory_bytes: 100 * 1024 * 1024,
            cte_spill_dir: PathBuf::from("./data/cte-spill"),
            hnsw_default_m: 16,
            hnsw_default_ef_construction: 200,
            hnsw_default_ef_search: 64,
            hnsw_tombstone_rebuild_threshold: 0.2,
            vector_overfetch_multiplier: 4,
            request_timeout_ms: 10_000,
            persistence_max_retries: 3,
            persistence_retry_delay_ms: 100,
            semantic_cache_capacity: 10_000,
        }
    }
}
