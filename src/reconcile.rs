use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::repo::{Purge, Repo, RepoResult};
use crate::storage::BlobStore;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Catalog rows removed for good.
    pub purged: usize,
    pub blobs_removed: usize,
    /// Rows whose blob was already gone.
    pub blobs_missing: usize,
    pub failed: usize,
}

/// Permanently removes tombstoned artworks and their blobs.
#[derive(Clone)]
pub struct Reconciler {
    repo: Arc<dyn Repo>,
    blobs: Arc<dyn BlobStore>,
}

impl Reconciler {
    pub fn new(repo: Arc<dyn Repo>, blobs: Arc<dyn BlobStore>) -> Self {
        Self { repo, blobs }
    }

    /// One pass over every tombstone. Only listing the tombstones can fail the
    /// pass; per-row failures are logged and counted, and a row whose blob
    /// could not be removed is retried on the next pass.
    pub async fn run(&self) -> RepoResult<ReconcileReport> {
        let mut report = ReconcileReport::default();
        for artwork in self.repo.list_deleted().await? {
            match self.repo.purge_deleted(&artwork.id, self.blobs.as_ref()).await {
                Ok(Purge::Purged { blob_found: true }) => {
                    report.purged += 1;
                    report.blobs_removed += 1;
                }
                Ok(Purge::Purged { blob_found: false }) => {
                    warn!(artwork = %artwork.id, "blob already absent");
                    report.purged += 1;
                    report.blobs_missing += 1;
                }
                // a concurrent resurrection won; the row is left alone
                Ok(Purge::Skipped) => info!(artwork = %artwork.id, "tombstone cleared before purge, skipping"),
                Ok(Purge::BlobFailed(e)) => {
                    error!(artwork = %artwork.id, "failed to remove blob, tombstone kept: {e}");
                    report.failed += 1;
                }
                Err(e) => {
                    error!(artwork = %artwork.id, "failed to purge tombstone: {e}");
                    report.failed += 1;
                }
            }
        }
        info!(
            purged = report.purged,
            blobs_removed = report.blobs_removed,
            blobs_missing = report.blobs_missing,
            failed = report.failed,
            "reconciliation finished"
        );
        Ok(report)
    }

    /// Runs `run` every `every` on the actix runtime. The first tick fires
    /// after one full interval; startup runs its own pass.
    pub fn spawn_periodic(self, every: Duration) {
        actix_web::rt::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = self.run().await {
                    error!("scheduled reconciliation failed: {e}");
                }
            }
        });
    }
}
