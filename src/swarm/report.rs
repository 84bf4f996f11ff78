use std::{sync::Arc, time::Duration};

use tokio_util::sync::CancellationToken;

use super::Shared;
use crate::prelude::*;


/// Logs a progress line per action every `interval` until `cancel` fires.
/// Does nothing if `interval` is zero.
pub(super) async fn periodic(shared: Arc<Shared>, interval: Duration, cancel: CancellationToken) {
    if interval.is_zero() {
        return;
    }

    let mut ticker = tokio::time::interval(interval);
    // The first tick completes immediately, there is nothing to report yet.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let summary = shared.stats.summary();
        for a in &summary.actions {
            info!(
                action = a.action.name(),
                requests = a.requests,
                failures = a.failures,
                errors = a.errors,
                p95_ms = a.p95_ms,
                "{:.2} req/s",
                a.requests_per_sec,
            );
        }
        info!(
            requests = summary.total.requests,
            failures = summary.total.failures,
            "total: {:.2} req/s after {:.0}s",
            summary.total.requests_per_sec,
            summary.duration_secs,
        );
    }
}
