//! Metrics for the security core
//!
//! Thin wrappers over the `metrics` facade so call sites stay one line and
//! metric names stay in one place. Without an installed recorder these are
//! no-ops.

use metrics::{counter, gauge, histogram};

// ============================================================================
// Authentication Metrics
// ============================================================================

/// Record a login outcome
pub fn record_login(result: &str) {
    counter!("realmgate_login_total", "result" => result.to_string()).increment(1);
}

/// Record a realm that errored during login or authorization
pub fn record_realm_error(realm: &str) {
    counter!("realmgate_realm_errors_total", "realm" => realm.to_string()).increment(1);
}

/// Record login latency
pub fn record_login_latency(latency_us: f64) {
    histogram!("realmgate_login_duration_us").record(latency_us);
}

// ============================================================================
// Auth Cache Metrics
// ============================================================================

/// Record cache hit/miss
pub fn record_cache_access(hit: bool) {
    if hit {
        counter!("realmgate_auth_cache_hits_total").increment(1);
    } else {
        counter!("realmgate_auth_cache_misses_total").increment(1);
    }
}

/// Record an entry evicted to make room
pub fn record_cache_eviction() {
    counter!("realmgate_auth_cache_evictions_total").increment(1);
}

/// Update cache size gauge
#[allow(clippy::cast_precision_loss)]
pub fn set_cache_size(entries: usize) {
    gauge!("realmgate_auth_cache_entries").set(entries as f64);
}

// ============================================================================
// Record Store Metrics
// ============================================================================

/// Record a persisted rewrite of a record file
pub fn record_store_write(store: &str, records: usize) {
    counter!("realmgate_store_writes_total", "store" => store.to_string()).increment(1);
    #[allow(clippy::cast_precision_loss)]
    gauge!("realmgate_store_records", "store" => store.to_string()).set(records as f64);
}

/// Record a skipped malformed line
pub fn record_corrupt_line(store: &str) {
    counter!("realmgate_store_corrupt_lines_total", "store" => store.to_string()).increment(1);
}

/// Record a hot reload attempt
pub fn record_reload(outcome: &str) {
    counter!("realmgate_reload_total", "outcome" => outcome.to_string()).increment(1);
}
