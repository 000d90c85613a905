//! Prometheus Metrics for txcache
//!
//! Counters and gauges for the cache engine:
//! - Store lookups, puts and purges
//! - Invalidations by delivery mode
//! - Pending transaction buffers
//! - Executor calls made on behalf of the cache

use lazy_static::lazy_static;
use prometheus::{
    Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge, TextEncoder,
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
};

lazy_static! {
    // ============================================================================
    // Store Metrics
    // ============================================================================

    /// Lookups by outcome (hit, miss, bypass)
    pub static ref CACHE_LOOKUPS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "txcache_lookups_total",
        "Total number of cache lookups by outcome",
        &["outcome"]
    ).unwrap();

    /// Entries written to the store
    pub static ref CACHE_PUTS_TOTAL: IntCounter = register_int_counter!(
        "txcache_puts_total",
        "Total number of entries written to the cache"
    ).unwrap();

    /// Entries removed by the purge pass
    pub static ref CACHE_PURGED_TOTAL: IntCounter = register_int_counter!(
        "txcache_purged_entries_total",
        "Total number of expired entries removed by purge"
    ).unwrap();

    // ============================================================================
    // Invalidation Metrics
    // ============================================================================

    /// Tag invalidations by mode (immediate, deferred, flushed, discarded)
    pub static ref INVALIDATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "txcache_invalidations_total",
        "Total number of dependency tag invalidations by mode",
        &["mode"]
    ).unwrap();

    /// Transactions currently holding buffered invalidations, summed over
    /// every coordinator in the process
    pub static ref PENDING_TRANSACTIONS: IntGauge = register_int_gauge!(
        "txcache_pending_transactions",
        "Transactions with buffered invalidations awaiting commit or rollback"
    ).unwrap();

    // ============================================================================
    // Executor Metrics
    // ============================================================================

    /// Executor call latency in seconds
    pub static ref EXECUTE_DURATION: HistogramVec = register_histogram_vec!(
        "txcache_execute_duration_seconds",
        "Latency of commands executed through the caching executor",
        &["kind", "source"],
        vec![0.00001, 0.0001, 0.001, 0.01, 0.1, 1.0]
    ).unwrap();
}

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Record a lookup outcome
pub fn record_lookup(outcome: &str) {
    CACHE_LOOKUPS_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_put() {
    CACHE_PUTS_TOTAL.inc();
}

pub fn record_purged(count: usize) {
    CACHE_PURGED_TOTAL.inc_by(count as u64);
}

/// Record tag invalidations delivered in the given mode
pub fn record_invalidation(mode: &str, tags: usize) {
    INVALIDATIONS_TOTAL
        .with_label_values(&[mode])
        .inc_by(tags as u64);
}

/// A transaction started buffering invalidations
pub fn pending_transaction_opened() {
    PENDING_TRANSACTIONS.inc();
}

/// `count` buffers were flushed, discarded or dropped
pub fn pending_transactions_closed(count: usize) {
    PENDING_TRANSACTIONS.sub(count as i64);
}

/// Record an executor call; `source` is `cache` when served from the cache
pub fn record_execute(kind: &str, source: &str, duration_secs: f64) {
    EXECUTE_DURATION
        .with_label_values(&[kind, source])
        .observe(duration_secs);
}
