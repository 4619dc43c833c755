//! Backoff policy for failed fetches.

/// Delay gating the next attempt after `num_fail` consecutive failures.
///
/// The fourth-power curve is intentionally steep, approximately 1min,
/// 16min, 1.3hr, 4.2hr, 10.5hr, 21.6hr, 40hr, 2.8day, 4.5day, 1wk for
/// num_fail = 1..10, so a consistently broken source is hit less and less
/// often before being given up on entirely.
pub fn backoff_delay_secs(num_fail: u32) -> i64 {
    (num_fail as i64).pow(4) * 60
}

/// Whether enough time has elapsed since `log_time` for the next attempt.
///
/// Strictly more than the delay must have passed.
pub fn retry_due(num_fail: u32, log_time: i64, now: i64) -> bool {
    now - log_time > backoff_delay_secs(num_fail)
}

/// What a `maybe_retry` call did, for callers and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    /// No ledger row exists; the key must be seeded before retries apply.
    NotSeeded,
    /// Cached or permanently skipped; nothing to do.
    UpToDate,
    /// The failure count exceeds the attempt cap; never retried again
    /// unless the entry is removed.
    GaveUp,
    /// The backoff window has not elapsed yet.
    NotDue,
    /// Another caller won the claim for this retry window.
    LostRace,
    /// This caller won the claim and the fetch succeeded.
    Refreshed,
    /// This caller won the claim but the fetch failed; the fallback
    /// artifact was written and the failure recorded.
    FailedAgain,
}
