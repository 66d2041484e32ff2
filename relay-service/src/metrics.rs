//! Metrics definitions for the relay.
//!
//! This module defines all metrics keys used by the service and provides a
//! helper [`describe_metrics`] to set metadata for each metric using the
//! `metrics` crate.

/// Metrics key for the number of live WebSocket connections.
pub const METRICS_ID_CONNECTIONS_OPEN: &str = "relay.connections.open";
/// Metrics key for the number of persisted messages.
pub const METRICS_ID_MESSAGES_PERSISTED: &str = "relay.messages.persisted";
/// Metrics key for the number of messages dropped as duplicates.
pub const METRICS_ID_MESSAGES_DROPPED_DUPLICATE: &str = "relay.messages.dropped_duplicate";
/// Metrics key for the number of update events emitted.
pub const METRICS_ID_UPDATES_EMITTED: &str = "relay.updates.emitted";
/// Metrics key for the number of optimistic-concurrency version conflicts.
pub const METRICS_ID_VERSION_CONFLICTS: &str = "relay.version_conflicts";
/// Metrics key for the number of RPC calls routed.
pub const METRICS_ID_RPC_CALLS: &str = "relay.rpc.calls";
/// Metrics key for the number of RPC calls that timed out.
pub const METRICS_ID_RPC_TIMEOUTS: &str = "relay.rpc.timeouts";
/// Metrics key for the duration of an `rpc-call` round-trip.
pub const METRICS_ID_RPC_CALL_DURATION: &str = "relay.rpc.call_duration";

/// Describe all metrics used by the service.
///
/// This calls the `describe_*` functions from the `metrics` crate to set
/// metadata on the different metrics.
pub fn describe_metrics() {
    metrics::describe_gauge!(
        METRICS_ID_CONNECTIONS_OPEN,
        metrics::Unit::Count,
        "Number of currently connected WebSocket clients"
    );

    metrics::describe_counter!(
        METRICS_ID_MESSAGES_PERSISTED,
        metrics::Unit::Count,
        "Number of session messages persisted"
    );

    metrics::describe_counter!(
        METRICS_ID_MESSAGES_DROPPED_DUPLICATE,
        metrics::Unit::Count,
        "Number of message sends dropped due to a duplicate localId"
    );

    metrics::describe_counter!(
        METRICS_ID_UPDATES_EMITTED,
        metrics::Unit::Count,
        "Number of update events emitted to connections"
    );

    metrics::describe_counter!(
        METRICS_ID_VERSION_CONFLICTS,
        metrics::Unit::Count,
        "Number of optimistic-concurrency updates that lost a version race"
    );

    metrics::describe_counter!(
        METRICS_ID_RPC_CALLS,
        metrics::Unit::Count,
        "Number of rpc-call frames routed between clients"
    );

    metrics::describe_counter!(
        METRICS_ID_RPC_TIMEOUTS,
        metrics::Unit::Count,
        "Number of rpc-call frames that timed out waiting for an ack"
    );

    metrics::describe_histogram!(
        METRICS_ID_RPC_CALL_DURATION,
        metrics::Unit::Milliseconds,
        "Duration of an rpc-call round-trip"
    );
}
