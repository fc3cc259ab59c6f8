//! Distribution metrics with pre-defined names.

use metrics::{counter, describe_counter, describe_gauge, gauge};

/// Pre-defined metrics for value distribution.
///
/// All metrics follow the naming convention `cellstream_<subject>_<metric>`.
/// Category labels take the values `position`, `portfolio` and `system`.
pub struct DistributionMetrics;

impl DistributionMetrics {
    /// Register all metric descriptions.
    pub fn register() {
        describe_gauge!("cellstream_sessions", "Number of registered sessions");
        describe_gauge!(
            "cellstream_subscribed_keys",
            "Number of keys with at least one subscriber, by category"
        );
        describe_counter!(
            "cellstream_updates_published_total",
            "Value updates offered to the server for fan-out"
        );
        describe_counter!(
            "cellstream_callbacks_pushed_total",
            "Callbacks queued to session channels"
        );
        describe_counter!(
            "cellstream_push_failures_total",
            "Pushes that failed and removed the receiving session"
        );
        describe_counter!(
            "cellstream_calls_total",
            "Remote calls handled by the server, by operation"
        );
        describe_counter!(
            "cellstream_client_reconnects_total",
            "Reconnect attempts made by client connection monitors"
        );
        describe_counter!(
            "cellstream_teardown_failures_total",
            "Best-effort teardown calls that failed and were ignored"
        );
    }

    /// Update the number of registered sessions.
    #[allow(clippy::cast_precision_loss)]
    pub fn sessions(count: usize) {
        gauge!("cellstream_sessions").set(count as f64);
    }

    /// Update the number of live keys in a category.
    #[allow(clippy::cast_precision_loss)]
    pub fn subscribed_keys(category: &'static str, count: usize) {
        gauge!("cellstream_subscribed_keys", "category" => category).set(count as f64);
    }

    /// Record an update offered for fan-out.
    pub fn update_published(category: &'static str) {
        counter!("cellstream_updates_published_total", "category" => category).increment(1);
    }

    /// Record callbacks queued to sessions.
    pub fn callbacks_pushed(category: &'static str, count: usize) {
        counter!("cellstream_callbacks_pushed_total", "category" => category)
            .increment(count as u64);
    }

    /// Record a failed push.
    pub fn push_failed(reason: &'static str) {
        counter!("cellstream_push_failures_total", "reason" => reason).increment(1);
    }

    /// Record a handled remote call.
    pub fn call_handled(operation: &'static str, ok: bool) {
        counter!(
            "cellstream_calls_total",
            "operation" => operation,
            "outcome" => if ok { "ok" } else { "fault" }
        )
        .increment(1);
    }

    /// Record a reconnect attempt by a client monitor.
    pub fn client_reconnect(success: bool) {
        counter!(
            "cellstream_client_reconnects_total",
            "success" => if success { "true" } else { "false" }
        )
        .increment(1);
    }

    /// Record failed best-effort teardown calls.
    pub fn teardown_failures(count: usize) {
        if count > 0 {
            counter!("cellstream_teardown_failures_total").increment(count as u64);
        }
    }
}
