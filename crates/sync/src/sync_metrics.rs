//! Metric names, recorded when the `metrics` feature is enabled.

/// Working-copy writes accepted by the store
pub const WRITES_TOTAL: &str = "quill_sync_writes_total";
/// Writes stopped because the store had moved past the base revision
pub const CONFLICTS_TOTAL: &str = "quill_sync_conflicts_total";
/// Async results dropped because a newer operation owned the fence
pub const SUPERSEDED_TOTAL: &str = "quill_sync_superseded_total";
/// Health checks that found the store unreachable
pub const HEALTH_FAILURES_TOTAL: &str = "quill_sync_health_failures_total";
