//! Aggregated results of a load test run.

use std::{
    collections::BTreeMap,
    fmt,
    sync::Mutex,
    time::{Duration, Instant},
};

use serde::Serialize;

use crate::scenario::{Action, ActionReport, Outcome};


/// Collects the reports of all simulated users. Shared via `Arc`.
pub struct Stats {
    start: Instant,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    actions: BTreeMap<Action, ActionStats>,
    users_authenticated: u64,
    users_unauthenticated: u64,
    users_stopped_without_token: u64,
}

#[derive(Debug, Clone, Default)]
struct ActionStats {
    requests: u64,
    failures: u64,
    errors: u64,
    total_ms: u64,
    min_ms: Option<u64>,
    max_ms: u64,
    /// Response times rounded via `rounded_ms` to their count.
    histogram: BTreeMap<u64, u64>,
    statuses: BTreeMap<u16, u64>,
    failure_reasons: BTreeMap<String, u64>,
}

/// How a user's token exchange went, from the statistics' point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserStart {
    Authenticated,
    Unauthenticated,
    /// No token and `auth.require_token` is set.
    Stopped,
}

impl Stats {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // Poisoning only means a panic happened while holding the lock. The
        // counters are still meaningful, so we keep going.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn record(&self, report: &ActionReport) {
        let elapsed_ms = u64::try_from(report.elapsed.as_millis()).unwrap_or(u64::MAX);

        let mut inner = self.lock();
        let stats = inner.actions.entry(report.action).or_default();
        stats.requests += 1;
        stats.total_ms = stats.total_ms.saturating_add(elapsed_ms);
        stats.min_ms = Some(stats.min_ms.map_or(elapsed_ms, |min| min.min(elapsed_ms)));
        stats.max_ms = stats.max_ms.max(elapsed_ms);
        *stats.histogram.entry(rounded_ms(elapsed_ms)).or_default() += 1;
        if let Some(status) = report.status {
            *stats.statuses.entry(status.as_u16()).or_default() += 1;
        }
        if let Outcome::Failure(reason) = &report.outcome {
            stats.failures += 1;
            *stats.failure_reasons.entry(reason.clone()).or_default() += 1;
        }
    }

    /// Records that performing `action` panicked.
    pub fn record_error(&self, action: Action, message: &str) {
        let mut inner = self.lock();
        let stats = inner.actions.entry(action).or_default();
        stats.errors += 1;
        *stats.failure_reasons.entry(format!("panic: {message}")).or_default() += 1;
    }

    pub fn record_user_start(&self, start: UserStart) {
        let mut inner = self.lock();
        match start {
            UserStart::Authenticated => inner.users_authenticated += 1,
            UserStart::Unauthenticated => inner.users_unauthenticated += 1,
            UserStart::Stopped => inner.users_stopped_without_token += 1,
        }
    }

    pub fn summary(&self) -> Summary {
        let elapsed = self.start.elapsed();
        let inner = self.lock();
        let actions = inner.actions.iter()
            .map(|(action, stats)| stats.summarize(*action, elapsed))
            .collect::<Vec<_>>();

        Summary {
            duration_secs: elapsed.as_secs_f64(),
            users_authenticated: inner.users_authenticated,
            users_unauthenticated: inner.users_unauthenticated,
            users_stopped_without_token: inner.users_stopped_without_token,
            total: Totals::of(&actions, elapsed),
            actions,
        }
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionStats {
    fn summarize(&self, action: Action, elapsed: Duration) -> ActionSummary {
        ActionSummary {
            action,
            requests: self.requests,
            failures: self.failures,
            errors: self.errors,
            requests_per_sec: per_sec(self.requests, elapsed),
            avg_ms: if self.requests == 0 { 0.0 } else { self.total_ms as f64 / self.requests as f64 },
            min_ms: self.min_ms.unwrap_or(0),
            max_ms: self.max_ms,
            p50_ms: percentile(&self.histogram, self.requests, 0.50),
            p95_ms: percentile(&self.histogram, self.requests, 0.95),
            p99_ms: percentile(&self.histogram, self.requests, 0.99),
            statuses: self.statuses.clone(),
            failure_reasons: self.failure_reasons.clone(),
        }
    }
}

/// Rounds response times to keep the histogram small: exact below 100ms, to
/// 10ms below 1s and to 100ms above.
fn rounded_ms(ms: u64) -> u64 {
    let round = |step: u64| (ms + step / 2) / step * step;
    match ms {
        0..100 => ms,
        100..1000 => round(10),
        _ => round(100),
    }
}

/// Smallest recorded (rounded) response time such that at least `fraction`
/// of all requests were as fast or faster.
fn percentile(histogram: &BTreeMap<u64, u64>, total: u64, fraction: f64) -> u64 {
    if total == 0 {
        return 0;
    }
    let needed = ((total as f64) * fraction).ceil().max(1.0) as u64;
    let mut seen = 0;
    for (ms, count) in histogram {
        seen += count;
        if seen >= needed {
            return *ms;
        }
    }
    histogram.keys().next_back().copied().unwrap_or(0)
}

fn per_sec(count: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs == 0.0 { 0.0 } else { count as f64 / secs }
}


/// Snapshot of all statistics, printed at the end and optionally written to
/// a JSON file.
#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub duration_secs: f64,
    pub users_authenticated: u64,
    pub users_unauthenticated: u64,
    pub users_stopped_without_token: u64,
    pub total: Totals,
    pub actions: Vec<ActionSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Totals {
    pub requests: u64,
    pub failures: u64,
    pub errors: u64,
    pub requests_per_sec: f64,
}

impl Totals {
    fn of(actions: &[ActionSummary], elapsed: Duration) -> Self {
        let requests = actions.iter().map(|a| a.requests).sum();
        Self {
            requests,
            failures: actions.iter().map(|a| a.failures).sum(),
            errors: actions.iter().map(|a| a.errors).sum(),
            requests_per_sec: per_sec(requests, elapsed),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ActionSummary {
    pub action: Action,
    pub requests: u64,
    pub failures: u64,
    pub errors: u64,
    pub requests_per_sec: f64,
    pub avg_ms: f64,
    pub min_ms: u64,
    pub max_ms: u64,
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub p99_ms: u64,
    pub statuses: BTreeMap<u16, u64>,
    pub failure_reasons: BTreeMap<String, u64>,
}

impl Summary {
    #[cfg(test)]
    pub fn action(&self, action: Action) -> Option<&ActionSummary> {
        self.actions.iter().find(|a| a.action == action)
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<16} {:>9} {:>9} {:>7} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8}",
            "Action", "# reqs", "# fails", "# errs", "req/s", "avg ms", "min ms", "p50 ms",
            "p95 ms", "max ms",
        )?;
        writeln!(f, "{}", "-".repeat(100))?;
        for a in &self.actions {
            writeln!(
                f,
                "{:<16} {:>9} {:>9} {:>7} {:>8.2} {:>8.1} {:>8} {:>8} {:>8} {:>8}",
                a.action.name(), a.requests, a.failures, a.errors, a.requests_per_sec,
                a.avg_ms, a.min_ms, a.p50_ms, a.p95_ms, a.max_ms,
            )?;
        }
        writeln!(f, "{}", "-".repeat(100))?;
        writeln!(
            f,
            "{:<16} {:>9} {:>9} {:>7} {:>8.2}",
            "Total", self.total.requests, self.total.failures, self.total.errors,
            self.total.requests_per_sec,
        )?;
        writeln!(f)?;
        writeln!(
            f,
            "Users: {} authenticated, {} without token, {} stopped for lack of token ({:.1}s)",
            self.users_authenticated,
            self.users_unauthenticated,
            self.users_stopped_without_token,
            self.duration_secs,
        )?;

        let failures = self.actions.iter()
            .flat_map(|a| a.failure_reasons.iter().map(move |(r, n)| (a.action, r, n)))
            .collect::<Vec<_>>();
        if !failures.is_empty() {
            writeln!(f)?;
            writeln!(f, "Failures:")?;
            for (action, reason, count) in failures {
                writeln!(f, "  {count:>7}  {action}: {reason}")?;
            }
        }
        Ok(())
    }
}
