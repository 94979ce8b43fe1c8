//! Optional metrics instrumentation for dtimer.
//!
//! When the `observe` feature is enabled, scheduling operations emit
//! counters and histograms via the [`metrics`] crate. A downstream
//! application must install a metrics recorder to collect the data.
//!
//! When the feature is **not** enabled every function in this module is a
//! zero-cost no-op.

/// Record one run of the scheduling update (counter + latency histogram).
///
/// - `dtimer.update.total` – counter with `mode` label (`claim` / `housekeeping`)
/// - `dtimer.update.duration_seconds` – histogram
#[inline]
pub fn record_update(duration: std::time::Duration, claim: bool) {
    #[cfg(feature = "observe")]
    {
        let mode = if claim { "claim" } else { "housekeeping" };
        metrics::counter!("dtimer.update.total", "mode" => mode).increment(1);
        metrics::histogram!("dtimer.update.duration_seconds").record(duration.as_secs_f64());
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = (duration, claim);
    }
}

/// Record the outcome of lease expiry and claiming within one update.
///
/// - `dtimer.events.claimed_total` – counter
/// - `dtimer.events.retried_total` – counter
/// - `dtimer.events.dropped_total` – counter
#[inline]
pub fn record_update_outcome(claimed: u64, retried: u64, dropped: u64) {
    #[cfg(feature = "observe")]
    {
        metrics::counter!("dtimer.events.claimed_total").increment(claimed);
        metrics::counter!("dtimer.events.retried_total").increment(retried);
        metrics::counter!("dtimer.events.dropped_total").increment(dropped);
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = (claimed, retried, dropped);
    }
}

/// Record events handed to a consumer.
///
/// - `dtimer.events.delivered_total` – counter
#[inline]
pub fn record_delivered(count: u64) {
    #[cfg(feature = "observe")]
    {
        metrics::counter!("dtimer.events.delivered_total").increment(count);
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = count;
    }
}

/// Record a wake hint publish attempt.
///
/// - `dtimer.hints.published_total` – counter with `outcome` label (`ok` / `fail`)
#[inline]
pub fn record_hint(success: bool) {
    #[cfg(feature = "observe")]
    {
        let outcome = if success { "ok" } else { "fail" };
        metrics::counter!("dtimer.hints.published_total", "outcome" => outcome).increment(1);
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = success;
    }
}

/// Record a polling cycle that fell back to the failure backoff.
///
/// - `dtimer.node.backoffs_total` – counter
#[inline]
pub fn record_backoff() {
    #[cfg(feature = "observe")]
    {
        metrics::counter!("dtimer.node.backoffs_total").increment(1);
    }
}
