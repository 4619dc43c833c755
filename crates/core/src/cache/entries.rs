//! Ledger row operations: seeding, status, claim arbitration, and outcome
//! recording.
//!
//! The conditional increment in [`CacheDb::try_claim_retry`] is the single
//! arbitration point for concurrent retries: of all callers reading the same
//! stale failure count, only the one whose UPDATE applies may fetch.

use super::connection::CacheDb;
use crate::Error;
use serde::{Deserialize, Serialize};
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite;

/// How far in the past a freshly seeded row is dated.
///
/// The first retry check compares elapsed time against a 60s delay for a
/// single failure; dating the seed 120s back guarantees that check fires
/// immediately on the first real request.
const SEED_BACKDATE_SECS: i64 = 120;

/// Stored entry state.
///
/// `Cached` and `SkippedTooLarge` behave identically from the outside
/// (serve the artifact, never retry); keeping them distinct makes the
/// oversized-skip case visible in diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryState {
    Cached,
    SkippedTooLarge,
    Failing,
}

impl EntryState {
    fn as_str(self) -> &'static str {
        match self {
            EntryState::Cached => "cached",
            EntryState::SkippedTooLarge => "skipped",
            EntryState::Failing => "failing",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "cached" => EntryState::Cached,
            "skipped" => EntryState::SkippedTooLarge,
            _ => EntryState::Failing,
        }
    }
}

/// One ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// The derived cache key.
    pub filename: String,
    /// Unix seconds: last success, last recorded failure, or backdated seed.
    pub log_time: i64,
    /// Consecutive failures since the last success; 0 means done.
    pub num_fail: u32,
    pub state: EntryState,
}

impl CacheEntry {
    /// Derived status for this row.
    pub fn status(&self) -> CacheStatus {
        match self.state {
            EntryState::Cached => CacheStatus::Cached,
            EntryState::SkippedTooLarge => CacheStatus::SkippedTooLarge,
            EntryState::Failing => CacheStatus::Failing(self.num_fail),
        }
    }
}

/// Derived cache status for a key. Never stored; computed from the row
/// (or its absence).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// No row exists; the key has never been seeded.
    NotFound,
    /// A real artifact was fetched and cached.
    Cached,
    /// Permanently skipped at seed time because the declared size exceeded
    /// the configured cap; the fallback artifact is served forever.
    SkippedTooLarge,
    /// N consecutive fetch failures since the last success.
    Failing(u32),
}

/// Result of seeding a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedOutcome {
    /// Whether this call created the row (false: already present, no-op).
    pub created: bool,
    /// Whether the new row was flagged as permanently skipped.
    pub skipped_too_large: bool,
}

impl CacheDb {
    /// Create the initial row for a key, if absent.
    ///
    /// An existing row is left untouched. Otherwise, when `max_size_mb` is
    /// configured and the probed size exceeds it, the row is inserted as
    /// done-without-fetching; in the normal case it is inserted backdated
    /// and pre-seeded as already failed once, so the very next retry check
    /// is eligible immediately.
    pub async fn seed_entry(&self, key: &str, size_mb: f64, max_size_mb: Option<f64>) -> Result<SeedOutcome, Error> {
        let now = chrono::Utc::now().timestamp();
        let oversized = max_size_mb.is_some_and(|cap| size_mb > cap);

        let (log_time, num_fail, state) = if oversized {
            (now, 0i64, EntryState::SkippedTooLarge)
        } else {
            (now - SEED_BACKDATE_SECS, 1, EntryState::Failing)
        };

        let key = key.to_string();
        let created = self
            .conn
            .call(move |conn| -> Result<bool, Error> {
                let changed = conn.execute(
                    "INSERT OR IGNORE INTO image_cache (filename, log_time, num_fail, state)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![key, log_time, num_fail, state.as_str()],
                )?;
                Ok(changed > 0)
            })
            .await
            .map_err(Error::from)?;

        Ok(SeedOutcome { created, skipped_too_large: created && oversized })
    }

    /// Get the ledger row for a key.
    ///
    /// Returns None if the key has never been seeded.
    pub async fn get_entry(&self, key: &str) -> Result<Option<CacheEntry>, Error> {
        let key = key.to_string();
        self.conn
            .call(move |conn| -> Result<Option<CacheEntry>, Error> {
                let result = conn.query_row(
                    "SELECT filename, log_time, num_fail, state FROM image_cache WHERE filename = ?1",
                    params![key],
                    |row| {
                        Ok(CacheEntry {
                            filename: row.get(0)?,
                            log_time: row.get(1)?,
                            num_fail: row.get::<_, i64>(2)? as u32,
                            state: EntryState::parse(&row.get::<_, String>(3)?),
                        })
                    },
                );

                match result {
                    Ok(entry) => Ok(Some(entry)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)
    }

    /// Derived status for a key.
    pub async fn entry_status(&self, key: &str) -> Result<CacheStatus, Error> {
        Ok(self
            .get_entry(key)
            .await?
            .map_or(CacheStatus::NotFound, |entry| entry.status()))
    }

    /// Try to claim the right to perform the next fetch attempt.
    ///
    /// Increments the failure count only if it still equals
    /// `expected_fail` and the row is actually failing. Returns true iff
    /// this caller's update was the one applied; every other caller racing
    /// on the same stale count loses and must not fetch.
    ///
    /// `log_time` is deliberately left alone: the backoff ladder is
    /// measured from the seed/last-recorded time, so the cumulative delays
    /// land roughly one week out from the initial failure.
    pub async fn try_claim_retry(&self, key: &str, expected_fail: u32) -> Result<bool, Error> {
        let key = key.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let changed = conn.execute(
                    "UPDATE image_cache
                     SET num_fail = num_fail + 1
                     WHERE filename = ?1 AND num_fail = ?2 AND state = 'failing'",
                    params![key, expected_fail as i64],
                )?;
                Ok(changed == 1)
            })
            .await
            .map_err(Error::from)
    }

    /// Record a successful fetch. Success always wins and resets the row,
    /// whatever was there before.
    pub async fn record_success(&self, key: &str) -> Result<(), Error> {
        let now = chrono::Utc::now().timestamp();
        let key = key.to_string();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT INTO image_cache (filename, log_time, num_fail, state)
                     VALUES (?1, ?2, 0, 'cached')
                     ON CONFLICT(filename) DO UPDATE SET
                        log_time = excluded.log_time,
                        num_fail = 0,
                        state = 'cached'",
                    params![key, now],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Record a failed fetch, but only if no row exists yet.
    ///
    /// On the normal path the claim already incremented the count, so this
    /// is a no-op; it must never decrement or overwrite a higher count.
    pub async fn record_failure_if_absent(&self, key: &str) -> Result<(), Error> {
        let now = chrono::Utc::now().timestamp();
        let key = key.to_string();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT OR IGNORE INTO image_cache (filename, log_time, num_fail, state)
                     VALUES (?1, ?2, 1, 'failing')",
                    params![key, now],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Bump the last-touched time of a cached row if it has gone stale.
    ///
    /// Only applies to `cached` rows, and only when more than
    /// `stale_after_secs` have elapsed since the stored time; keeps a rough
    /// last-seen-alive signal without a write on every hit. Returns whether
    /// a bump happened.
    pub async fn refresh_hit_time(&self, key: &str, stale_after_secs: i64) -> Result<bool, Error> {
        let now = chrono::Utc::now().timestamp();
        let key = key.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let changed = conn.execute(
                    "UPDATE image_cache
                     SET log_time = ?2
                     WHERE filename = ?1 AND state = 'cached' AND log_time + ?3 < ?2",
                    params![key, now, stale_after_secs],
                )?;
                Ok(changed > 0)
            })
            .await
            .map_err(Error::from)
    }

    /// Delete one ledger row.
    pub async fn remove_entry(&self, key: &str) -> Result<(), Error> {
        let key = key.to_string();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute("DELETE FROM image_cache WHERE filename = ?1", params![key])?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Delete every ledger row unconditionally.
    ///
    /// Returns the number of deleted entries.
    pub async fn prune_entries(&self) -> Result<u64, Error> {
        self.conn
            .call(|conn| -> Result<u64, Error> {
                let count = conn.execute("DELETE FROM image_cache", [])?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "aaaabbbbccccddddaaaabbbbccccddddaaaabbbbccccddddaaaabbbbccccdddd";

    async fn set_log_time(db: &CacheDb, key: &str, log_time: i64) {
        let key = key.to_string();
        db.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE image_cache SET log_time = ?2 WHERE filename = ?1",
                    params![key, log_time],
                )
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_seed_normal_backdated_and_prefailed() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let before = chrono::Utc::now().timestamp();

        let outcome = db.seed_entry(KEY, 1.0, Some(5.0)).await.unwrap();
        assert!(outcome.created);
        assert!(!outcome.skipped_too_large);

        let entry = db.get_entry(KEY).await.unwrap().unwrap();
        assert_eq!(entry.num_fail, 1);
        assert_eq!(entry.state, EntryState::Failing);
        assert!(entry.log_time <= before - 118);
        assert_eq!(entry.status(), CacheStatus::Failing(1));
    }

    #[tokio::test]
    async fn test_seed_oversized_skips_forever() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let before = chrono::Utc::now().timestamp();

        let outcome = db.seed_entry(KEY, 10.0, Some(5.0)).await.unwrap();
        assert!(outcome.created);
        assert!(outcome.skipped_too_large);

        let entry = db.get_entry(KEY).await.unwrap().unwrap();
        assert_eq!(entry.num_fail, 0);
        assert_eq!(entry.state, EntryState::SkippedTooLarge);
        assert!(entry.log_time >= before);
        assert_eq!(db.entry_status(KEY).await.unwrap(), CacheStatus::SkippedTooLarge);

        // The skip state is terminal: it never takes part in claim races.
        assert!(!db.try_claim_retry(KEY, 0).await.unwrap());
    }

    #[tokio::test]
    async fn test_seed_without_cap_ignores_size() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let outcome = db.seed_entry(KEY, 100.0, None).await.unwrap();
        assert!(outcome.created);
        assert!(!outcome.skipped_too_large);
        assert_eq!(db.entry_status(KEY).await.unwrap(), CacheStatus::Failing(1));
    }

    #[tokio::test]
    async fn test_seed_idempotent() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let first = db.seed_entry(KEY, 1.0, Some(5.0)).await.unwrap();
        assert!(first.created);

        // A second seed, even with a different sniffed size, is a no-op.
        let second = db.seed_entry(KEY, 10.0, Some(5.0)).await.unwrap();
        assert!(!second.created);
        assert!(!second.skipped_too_large);

        let count: i64 = db
            .conn
            .call(|conn| conn.query_row("SELECT COUNT(*) FROM image_cache", [], |row| row.get(0)))
            .await
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(db.entry_status(KEY).await.unwrap(), CacheStatus::Failing(1));
    }

    #[tokio::test]
    async fn test_status_not_found() {
        let db = CacheDb::open_in_memory().await.unwrap();
        assert_eq!(db.entry_status(KEY).await.unwrap(), CacheStatus::NotFound);
        assert!(db.get_entry(KEY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_claim_with_current_count_wins() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.seed_entry(KEY, 0.0, None).await.unwrap();

        assert!(db.try_claim_retry(KEY, 1).await.unwrap());
        assert_eq!(db.entry_status(KEY).await.unwrap(), CacheStatus::Failing(2));
    }

    #[tokio::test]
    async fn test_claim_with_stale_count_loses() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.seed_entry(KEY, 0.0, None).await.unwrap();

        assert!(db.try_claim_retry(KEY, 1).await.unwrap());
        // Second caller still holds the old count and must lose.
        assert!(!db.try_claim_retry(KEY, 1).await.unwrap());
        assert_eq!(db.entry_status(KEY).await.unwrap(), CacheStatus::Failing(2));
    }

    #[tokio::test]
    async fn test_claim_race_exactly_one_winner() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.seed_entry(KEY, 0.0, None).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let db = db.clone();
            handles.push(tokio::spawn(async move { db.try_claim_retry(KEY, 1).await.unwrap() }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }

        assert_eq!(winners, 1);
        assert_eq!(db.entry_status(KEY).await.unwrap(), CacheStatus::Failing(2));
    }

    #[tokio::test]
    async fn test_record_success_resets() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.seed_entry(KEY, 0.0, None).await.unwrap();
        db.try_claim_retry(KEY, 1).await.unwrap();

        db.record_success(KEY).await.unwrap();
        let entry = db.get_entry(KEY).await.unwrap().unwrap();
        assert_eq!(entry.num_fail, 0);
        assert_eq!(entry.state, EntryState::Cached);
        assert_eq!(entry.status(), CacheStatus::Cached);
    }

    #[tokio::test]
    async fn test_record_success_upserts_without_row() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.record_success(KEY).await.unwrap();
        assert_eq!(db.entry_status(KEY).await.unwrap(), CacheStatus::Cached);
    }

    #[tokio::test]
    async fn test_record_failure_noop_when_present() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.seed_entry(KEY, 0.0, None).await.unwrap();
        db.try_claim_retry(KEY, 1).await.unwrap();
        db.try_claim_retry(KEY, 2).await.unwrap();

        // The count was already incremented by the claims; recording the
        // failure must not reset it back down.
        db.record_failure_if_absent(KEY).await.unwrap();
        assert_eq!(db.entry_status(KEY).await.unwrap(), CacheStatus::Failing(3));
    }

    #[tokio::test]
    async fn test_record_failure_inserts_when_absent() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.record_failure_if_absent(KEY).await.unwrap();
        assert_eq!(db.entry_status(KEY).await.unwrap(), CacheStatus::Failing(1));
    }

    #[tokio::test]
    async fn test_fresh_cycle_after_success_counts_from_one() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.seed_entry(KEY, 0.0, None).await.unwrap();
        db.try_claim_retry(KEY, 1).await.unwrap();
        db.record_success(KEY).await.unwrap();

        // A later remove-and-reseed cycle starts the count over at one.
        db.remove_entry(KEY).await.unwrap();
        db.seed_entry(KEY, 0.0, None).await.unwrap();
        assert_eq!(db.entry_status(KEY).await.unwrap(), CacheStatus::Failing(1));
    }

    #[tokio::test]
    async fn test_refresh_hit_time_only_when_stale() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.record_success(KEY).await.unwrap();

        // Freshly written: not stale, no bump.
        assert!(!db.refresh_hit_time(KEY, 3600).await.unwrap());

        let stale = chrono::Utc::now().timestamp() - 7200;
        set_log_time(&db, KEY, stale).await;
        assert!(db.refresh_hit_time(KEY, 3600).await.unwrap());

        let entry = db.get_entry(KEY).await.unwrap().unwrap();
        assert!(entry.log_time > stale + 3600);
    }

    #[tokio::test]
    async fn test_refresh_hit_time_ignores_failing_rows() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.seed_entry(KEY, 0.0, None).await.unwrap();

        let stale = chrono::Utc::now().timestamp() - 7200;
        set_log_time(&db, KEY, stale).await;

        assert!(!db.refresh_hit_time(KEY, 3600).await.unwrap());
        let entry = db.get_entry(KEY).await.unwrap().unwrap();
        assert_eq!(entry.log_time, stale);
    }

    #[tokio::test]
    async fn test_remove_entry() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.record_success(KEY).await.unwrap();
        db.remove_entry(KEY).await.unwrap();
        assert_eq!(db.entry_status(KEY).await.unwrap(), CacheStatus::NotFound);
    }

    #[tokio::test]
    async fn test_prune_entries_clears_everything() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.record_success(KEY).await.unwrap();
        db.seed_entry("other-key", 0.0, None).await.unwrap();

        let deleted = db.prune_entries().await.unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(db.entry_status(KEY).await.unwrap(), CacheStatus::NotFound);
        assert_eq!(db.entry_status("other-key").await.unwrap(), CacheStatus::NotFound);

        // Idempotent: pruning an empty ledger is fine.
        assert_eq!(db.prune_entries().await.unwrap(), 0);
    }
}
