//! The caching-proxy facade.
//!
//! `ImageCacheProxy` ties the ledger, the fetcher, and the backoff policy
//! together behind the operations the embedding application drives: seed on
//! first sight of a URL, opportunistic retry on later requests, hit-time
//! refresh, removal, and bulk prune. Everything here degrades to "something
//! servable": a fetch that fails leaves the fallback placeholder in the
//! artifact slot rather than an error in the caller's lap.

pub mod retry;

use std::path::PathBuf;
use std::sync::Arc;

use pixmirror_core::{
    ARTIFACT_PREFIX, AppConfig, ArtifactKind, CacheDb, CacheStatus, Error, SeedOutcome, artifact_path,
    cache::key,
};

use crate::fetch::ImageFetcher;
pub use retry::RetryOutcome;

/// Cached rows older than this get their hit time refreshed, once, on the
/// next hit. Keeps the write rate down to roughly one per key per hour.
const HIT_REFRESH_SECS: i64 = 3600;

/// Facade over the cache ledger, fetcher, and retry policy.
pub struct ImageCacheProxy {
    db: CacheDb,
    fetcher: Arc<dyn ImageFetcher>,
    cache_dir: PathBuf,
    fallback_image: PathBuf,
    max_artifact_size_mb: Option<f64>,
    max_retry_attempts: u32,
    salt: String,
}

impl ImageCacheProxy {
    /// Build the proxy, resolving the secret salt once at startup.
    ///
    /// A configured `secret_salt` wins; otherwise the persisted one is used,
    /// generated on first ever startup.
    pub async fn new(db: CacheDb, fetcher: Arc<dyn ImageFetcher>, config: &AppConfig) -> Result<Self, Error> {
        let salt = match &config.secret_salt {
            Some(salt) if !salt.is_empty() => salt.clone(),
            _ => db.ensure_salt().await?,
        };

        Ok(Self {
            db,
            fetcher,
            cache_dir: config.cache_dir.clone(),
            fallback_image: config.fallback_image.clone(),
            max_artifact_size_mb: config.max_artifact_size_mb,
            max_retry_attempts: config.max_retry_attempts,
            salt,
        })
    }

    /// The cache key for a source URL under this proxy's salt.
    pub fn compute_key(&self, url: &str) -> String {
        key::compute_key(url, &self.salt)
    }

    /// The deterministic artifact location the serving layer streams from.
    pub fn artifact_path_for(&self, url: &str) -> PathBuf {
        artifact_path(&self.cache_dir, &self.compute_key(url), ArtifactKind::from_url(url))
    }

    /// Create the initial ledger row for a URL, if absent.
    ///
    /// An already-present key is a no-op and issues no network request.
    /// Otherwise, when a size cap is configured the remote is probed first,
    /// and an oversized resource is flagged done-without-fetching. Every
    /// newly created row also gets the fallback placeholder written into
    /// its artifact slot, so there is something servable before the first
    /// real fetch happens.
    pub async fn seed(&self, url: &str) -> Result<SeedOutcome, Error> {
        let cache_key = self.compute_key(url);

        if self.db.get_entry(&cache_key).await?.is_some() {
            return Ok(SeedOutcome { created: false, skipped_too_large: false });
        }

        let size_mb = match self.max_artifact_size_mb {
            Some(_) => self.fetcher.sniff_size_mb(url).await,
            None => 0.0,
        };

        let outcome = self.db.seed_entry(&cache_key, size_mb, self.max_artifact_size_mb).await?;
        if outcome.created {
            self.write_fallback(url, &cache_key).await;
        }

        Ok(outcome)
    }

    /// Derived cache status for a key.
    pub async fn status(&self, cache_key: &str) -> Result<CacheStatus, Error> {
        self.db.entry_status(cache_key).await
    }

    /// Retry a previously failed fetch, if one is due.
    ///
    /// Acts only on failing entries:
    /// - past the attempt cap, gives up without writing anything (the
    ///   decision re-derives identically on every future call)
    /// - inside the backoff window, does nothing
    /// - otherwise races for the claim; only the winner fetches, and the
    ///   outcome is written back through the ledger
    pub async fn maybe_retry(&self, url: &str) -> Result<RetryOutcome, Error> {
        let cache_key = self.compute_key(url);

        let entry = match self.db.get_entry(&cache_key).await? {
            Some(entry) => entry,
            None => return Ok(RetryOutcome::NotSeeded),
        };

        let num_fail = match entry.status() {
            CacheStatus::Cached | CacheStatus::SkippedTooLarge => return Ok(RetryOutcome::UpToDate),
            CacheStatus::NotFound => return Ok(RetryOutcome::NotSeeded),
            CacheStatus::Failing(n) => n,
        };

        if num_fail > self.max_retry_attempts {
            return Ok(RetryOutcome::GaveUp);
        }

        let now = chrono::Utc::now().timestamp();
        if !retry::retry_due(num_fail, entry.log_time, now) {
            return Ok(RetryOutcome::NotDue);
        }

        // Sole mutual-exclusion point: of all callers that read the same
        // stale count, only the one whose increment applies may fetch.
        if !self.db.try_claim_retry(&cache_key, num_fail).await? {
            return Ok(RetryOutcome::LostRace);
        }

        let kind = ArtifactKind::from_url(url);
        let dest = artifact_path(&self.cache_dir, &cache_key, kind);

        match self.fetcher.fetch_and_store(url, &dest, kind).await {
            Ok(()) => {
                // The artifact is on disk either way; losing this write only
                // costs a redundant refetch on some future retry.
                if let Err(e) = self.db.record_success(&cache_key).await {
                    tracing::warn!(key = %cache_key, "fetched artifact but could not record success: {e}");
                }
                Ok(RetryOutcome::Refreshed)
            }
            Err(e) => {
                tracing::debug!(key = %cache_key, attempt = num_fail + 1, "fetch attempt failed: {e}");
                if let Err(e) = self.db.record_failure_if_absent(&cache_key).await {
                    tracing::warn!(key = %cache_key, "could not record fetch failure: {e}");
                }
                self.write_fallback(url, &cache_key).await;
                Ok(RetryOutcome::FailedAgain)
            }
        }
    }

    /// Note a successful cache hit, refreshing the row's last-touched time
    /// if it has gone stale. Returns whether a refresh happened.
    pub async fn record_hit(&self, cache_key: &str) -> Result<bool, Error> {
        self.db.refresh_hit_time(cache_key, HIT_REFRESH_SECS).await
    }

    /// Delete a single ledger row; the next seed/fetch cycle starts over.
    pub async fn remove(&self, cache_key: &str) -> Result<(), Error> {
        self.db.remove_entry(cache_key).await
    }

    /// Reset the whole cache: best-effort delete of every artifact matching
    /// the naming convention, then unconditionally clear the ledger.
    ///
    /// Returns the number of ledger rows deleted. Idempotent; rerunning
    /// after a partial failure converges on the same empty state.
    pub async fn prune_all(&self) -> Result<u64, Error> {
        self.sweep_artifacts().await;
        self.db.prune_entries().await
    }

    async fn sweep_artifacts(&self) {
        let mut dir = match tokio::fs::read_dir(&self.cache_dir).await {
            Ok(dir) => dir,
            Err(e) => {
                tracing::debug!("cache dir {} not swept: {e}", self.cache_dir.display());
                return;
            }
        };

        loop {
            match dir.next_entry().await {
                Ok(Some(entry)) => {
                    let name = entry.file_name();
                    let Some(name) = name.to_str() else { continue };
                    if !name.starts_with(ARTIFACT_PREFIX) {
                        continue;
                    }
                    if let Err(e) = tokio::fs::remove_file(entry.path()).await {
                        tracing::warn!("could not remove {}: {e}", entry.path().display());
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("artifact sweep stopped early: {e}");
                    break;
                }
            }
        }
    }

    /// Best-effort copy of the placeholder into the artifact slot.
    async fn write_fallback(&self, url: &str, cache_key: &str) {
        let dest = artifact_path(&self.cache_dir, cache_key, ArtifactKind::from_url(url));
        if let Some(parent) = dest.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }
        if let Err(e) = tokio::fs::copy(&self.fallback_image, &dest).await {
            tracing::warn!(key = %cache_key, "could not write fallback artifact: {e}");
        }
    }
}
