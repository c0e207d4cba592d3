//! Coordinator metrics via the `metrics` facade
//!
//! Zero-cost unless the `metrics-prometheus` feature is enabled; the
//! hosting process installs the recorder/exporter.

/// Coordinator-level gauges and counters
pub struct CoordinatorMetrics;

impl CoordinatorMetrics {
    // ---- Changefeed bucket gauges ----

    pub fn set_changefeed_total(count: usize) {
        #[cfg(feature = "metrics-prometheus")]
        metrics::gauge!("weir_coordinator_changefeeds", "state" => "total").set(count as f64);
        #[cfg(not(feature = "metrics-prometheus"))]
        let _ = count;
    }

    pub fn set_changefeed_absent(count: usize) {
        #[cfg(feature = "metrics-prometheus")]
        metrics::gauge!("weir_coordinator_changefeeds", "state" => "absent").set(count as f64);
        #[cfg(not(feature = "metrics-prometheus"))]
        let _ = count;
    }

    pub fn set_changefeed_scheduling(count: usize) {
        #[cfg(feature = "metrics-prometheus")]
        metrics::gauge!("weir_coordinator_changefeeds", "state" => "scheduling").set(count as f64);
        #[cfg(not(feature = "metrics-prometheus"))]
        let _ = count;
    }

    pub fn set_changefeed_replicating(count: usize) {
        #[cfg(feature = "metrics-prometheus")]
        metrics::gauge!("weir_coordinator_changefeeds", "state" => "replicating").set(count as f64);
        #[cfg(not(feature = "metrics-prometheus"))]
        let _ = count;
    }

    pub fn set_changefeed_stopped(count: usize) {
        #[cfg(feature = "metrics-prometheus")]
        metrics::gauge!("weir_coordinator_changefeeds", "state" => "stopped").set(count as f64);
        #[cfg(not(feature = "metrics-prometheus"))]
        let _ = count;
    }

    // ---- Operator metrics ----

    pub fn set_operator_count(count: usize) {
        #[cfg(feature = "metrics-prometheus")]
        metrics::gauge!("weir_coordinator_operators").set(count as f64);
        #[cfg(not(feature = "metrics-prometheus"))]
        let _ = count;
    }

    pub fn increment_operators_created(kind: &'static str) {
        #[cfg(feature = "metrics-prometheus")]
        metrics::counter!("weir_coordinator_operators_created_total", "kind" => kind).increment(1);
        #[cfg(not(feature = "metrics-prometheus"))]
        let _ = kind;
    }

    pub fn increment_operators_finished(kind: &'static str) {
        #[cfg(feature = "metrics-prometheus")]
        metrics::counter!("weir_coordinator_operators_finished_total", "kind" => kind).increment(1);
        #[cfg(not(feature = "metrics-prometheus"))]
        let _ = kind;
    }

    // ---- Event loop ----

    pub fn record_slow_event(seconds: f64) {
        #[cfg(feature = "metrics-prometheus")]
        metrics::histogram!("weir_coordinator_slow_event_seconds").record(seconds);
        #[cfg(not(feature = "metrics-prometheus"))]
        let _ = seconds;
    }
}
