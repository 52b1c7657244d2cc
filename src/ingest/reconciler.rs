use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::database::Database;
use crate::storage::Storage;

/// Error recorded when the corruption sweep finds a row whose file is gone.
/// Distinct from processing failures so operators can tell "we lost the
/// file" apart from "we failed to process it".
const FILE_MISSING_MESSAGE: &str =
    "Source file is missing from storage; the document cannot be recovered. Please re-upload.";

/// Error recorded when a stuck PENDING/PROCESSING row is rescued.
const STUCK_MESSAGE: &str =
    "Processing was interrupted before completion. Please re-upload the document.";

/// Outcome of one corruption sweep.
#[derive(Debug, Default)]
pub struct SweepReport {
    pub checked: usize,
    pub healthy: usize,
    pub corrupted: usize,
    /// Per-row details for rows that were flagged or could not be checked.
    pub details: Vec<String>,
}

/// Outcome of one stuck-document rescue.
#[derive(Debug, Default)]
pub struct RescueReport {
    pub examined: usize,
    pub rescued: u64,
}

/// Detects and repairs drift between the metadata store (record of truth)
/// and blob-store reality after crashes or partial failures.
///
/// Both checks are idempotent and safe to run repeatedly and concurrently
/// with new uploads: they only consider rows older than a grace window, so
/// a live admission or pipeline job is never raced.
pub struct ConsistencyReconciler {
    database: Arc<dyn Database>,
    storage: Arc<dyn Storage>,
    /// PENDING/PROCESSING rows older than this are presumed abandoned.
    stale_age: Duration,
    /// Rows younger than this are skipped by the corruption sweep.
    sweep_grace: Duration,
}

impl ConsistencyReconciler {
    pub fn new(
        database: Arc<dyn Database>,
        storage: Arc<dyn Storage>,
        stale_age: Duration,
        sweep_grace: Duration,
    ) -> Self {
        Self {
            database,
            storage,
            stale_age,
            sweep_grace,
        }
    }

    /// Verify that every non-FAILED document still has its file in storage;
    /// flag the ones that don't. A single bad row never aborts the sweep.
    pub async fn corruption_sweep(&self) -> anyhow::Result<SweepReport> {
        let docs = self
            .database
            .list_unfailed_documents(self.sweep_grace.as_secs())
            .await?;

        let mut report = SweepReport::default();
        let mut corrupted_ids = Vec::new();

        for doc in docs {
            report.checked += 1;
            match self.storage.exists(&doc.file_path).await {
                Ok(true) => report.healthy += 1,
                Ok(false) => {
                    report
                        .details
                        .push(format!("{}: file missing at {}", doc.id, doc.file_path));
                    corrupted_ids.push(doc.id);
                }
                Err(e) => {
                    // Collect and continue; the row is re-checked next sweep.
                    report
                        .details
                        .push(format!("{}: storage check failed: {e}", doc.id));
                }
            }
        }

        if !corrupted_ids.is_empty() {
            // One atomic statement flags the whole batch; a crash here just
            // means the next sweep re-flags the same rows.
            self.database
                .mark_failed_batch(&corrupted_ids, FILE_MISSING_MESSAGE)
                .await?;
            report.corrupted = corrupted_ids.len();
            warn!(
                "Corruption sweep flagged {} of {} documents",
                report.corrupted, report.checked
            );
            for detail in &report.details {
                warn!("Corruption sweep: {detail}");
            }
        } else {
            info!(
                "Corruption sweep: {} documents checked, all healthy",
                report.checked
            );
        }

        Ok(report)
    }

    /// Fail PENDING/PROCESSING documents older than the stale threshold.
    /// Run at startup: after a restart the owning background task is gone,
    /// and a half-processed document cannot be resumed safely — recovery is
    /// re-upload, regardless of whether the file still exists.
    pub async fn rescue_stuck(&self) -> anyhow::Result<RescueReport> {
        let docs = self
            .database
            .list_stuck_documents(self.stale_age.as_secs())
            .await?;

        let mut report = RescueReport {
            examined: docs.len(),
            rescued: 0,
        };

        if !docs.is_empty() {
            let ids: Vec<String> = docs.into_iter().map(|d| d.id).collect();
            report.rescued = self.database.mark_failed_batch(&ids, STUCK_MESSAGE).await?;
            warn!("Rescued {} stuck documents", report.rescued);
        }

        Ok(report)
    }

    /// Startup pass: rescue stuck rows, then sweep for missing files.
    pub async fn run_startup(&self) -> anyhow::Result<()> {
        let rescue = self.rescue_stuck().await?;
        let sweep = self.corruption_sweep().await?;
        info!(
            "Startup reconciliation: {} stuck rescued, {}/{} corrupted",
            rescue.rescued, sweep.corrupted, sweep.checked
        );
        Ok(())
    }

    /// Spawn the periodic corruption sweep. A zero interval disables it.
    pub fn spawn_periodic_sweep(self: Arc<Self>, interval: Duration) -> Option<JoinHandle<()>> {
        if interval.is_zero() {
            return None;
        }
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The startup pass already ran; skip the immediate tick.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = self.corruption_sweep().await {
                    error!("Periodic corruption sweep failed: {e}");
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::testutil::{MockDatabase, MockStorage};
    use crate::models::document::DocumentStatus;

    fn reconciler(
        database: Arc<MockDatabase>,
        storage: Arc<MockStorage>,
    ) -> ConsistencyReconciler {
        ConsistencyReconciler::new(
            database,
            storage,
            Duration::from_secs(600),
            Duration::from_secs(30),
        )
    }

    fn seed_old(database: &MockDatabase, id: &str, file_path: &str, status: DocumentStatus) {
        let mut doc = MockDatabase::make_document(id, "proj-a", file_path);
        doc.status = status;
        database.seed(doc);
        database.backdate(id, 3600);
    }

    #[tokio::test]
    async fn test_sweep_flags_missing_files() {
        let database = Arc::new(MockDatabase::new());
        let storage = Arc::new(MockStorage::new());

        seed_old(&database, "ok", "proj-a/ok.txt", DocumentStatus::Ready);
        storage.seed("proj-a/ok.txt", b"fine");
        seed_old(&database, "gone", "proj-a/gone.txt", DocumentStatus::Ready);

        let report = reconciler(database.clone(), storage).corruption_sweep().await.unwrap();

        assert_eq!(report.checked, 2);
        assert_eq!(report.healthy, 1);
        assert_eq!(report.corrupted, 1);
        assert_eq!(database.status_of("ok"), Some(DocumentStatus::Ready));
        assert_eq!(database.status_of("gone"), Some(DocumentStatus::Failed));
        assert!(database.error_of("gone").unwrap().contains("missing"));
    }

    #[tokio::test]
    async fn test_sweep_is_idempotent() {
        let database = Arc::new(MockDatabase::new());
        let storage = Arc::new(MockStorage::new());
        seed_old(&database, "gone", "proj-a/gone.txt", DocumentStatus::Ready);

        let r = reconciler(database.clone(), storage);
        let first = r.corruption_sweep().await.unwrap();
        assert_eq!(first.corrupted, 1);

        // FAILED rows are excluded, so the second run finds nothing new.
        let second = r.corruption_sweep().await.unwrap();
        assert_eq!(second.checked, 0);
        assert_eq!(second.corrupted, 0);
        assert_eq!(database.status_of("gone"), Some(DocumentStatus::Failed));
    }

    #[tokio::test]
    async fn test_sweep_skips_recent_rows() {
        let database = Arc::new(MockDatabase::new());
        let storage = Arc::new(MockStorage::new());

        // Fresh row with no file yet: a live admission mid-write.
        database.seed(MockDatabase::make_document(
            "fresh",
            "proj-a",
            "proj-a/fresh.txt",
        ));

        let report = reconciler(database.clone(), storage).corruption_sweep().await.unwrap();
        assert_eq!(report.checked, 0);
        assert_eq!(database.status_of("fresh"), Some(DocumentStatus::Pending));
    }

    #[tokio::test]
    async fn test_rescue_fails_stuck_documents() {
        let database = Arc::new(MockDatabase::new());
        let storage = Arc::new(MockStorage::new());

        seed_old(&database, "stuck-pending", "proj-a/a.txt", DocumentStatus::Pending);
        seed_old(&database, "stuck-processing", "proj-a/b.txt", DocumentStatus::Processing);
        seed_old(&database, "done", "proj-a/c.txt", DocumentStatus::Ready);
        // File existence is irrelevant for rescue.
        storage.seed("proj-a/a.txt", b"bytes");

        let report = reconciler(database.clone(), storage).rescue_stuck().await.unwrap();

        assert_eq!(report.examined, 2);
        assert_eq!(report.rescued, 2);
        assert_eq!(
            database.status_of("stuck-pending"),
            Some(DocumentStatus::Failed)
        );
        assert_eq!(
            database.status_of("stuck-processing"),
            Some(DocumentStatus::Failed)
        );
        assert_eq!(database.status_of("done"), Some(DocumentStatus::Ready));
        assert!(database
            .error_of("stuck-processing")
            .unwrap()
            .contains("interrupted"));
    }

    #[tokio::test]
    async fn test_rescue_ignores_recent_in_flight_documents() {
        let database = Arc::new(MockDatabase::new());
        let storage = Arc::new(MockStorage::new());

        // Fresh PROCESSING row: its job is presumed alive.
        let mut doc = MockDatabase::make_document("live", "proj-a", "proj-a/live.txt");
        doc.status = DocumentStatus::Processing;
        database.seed(doc);

        let report = reconciler(database.clone(), storage).rescue_stuck().await.unwrap();
        assert_eq!(report.examined, 0);
        assert_eq!(database.status_of("live"), Some(DocumentStatus::Processing));
    }
}
