//! Metric names. Recorded through the `metrics` facade; the embedding host
//! installs whatever exporter it wants.

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: engine operations. Labels: op, status (`ok` or an error kind).
pub const OPERATIONS_TOTAL: &str = "roomkeep_operations_total";

/// Counter: requests refused because they overlap an existing interval. Labels: kind.
pub const OVERLAP_REJECTIONS_TOTAL: &str = "roomkeep_overlap_rejections_total";

/// Counter: room or hotel write locks not acquired within the timeout.
pub const LOCK_TIMEOUTS_TOTAL: &str = "roomkeep_lock_timeouts_total";

/// Counter: merged ledger reads served from the cache.
pub const LEDGER_CACHE_HITS_TOTAL: &str = "roomkeep_ledger_cache_hits_total";

/// Counter: merged ledger reads that had to rebuild the view.
pub const LEDGER_CACHE_MISSES_TOTAL: &str = "roomkeep_ledger_cache_misses_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "roomkeep_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "roomkeep_wal_flush_batch_size";

/// Counter: completed WAL compactions.
pub const WAL_COMPACTIONS_TOTAL: &str = "roomkeep_wal_compactions_total";
