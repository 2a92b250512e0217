//! C9 — Reconciler. Sweeps image rows and verifies each storage reference
//! against C1, repairing divergence the worker's own failure paths might
//! have missed (a crash between `put_object` succeeding and the DB write
//! landing, for instance).
//!
//! Exposed two ways: `reconcile` is called synchronously by the admin HTTP
//! route, and `ServiceComponent::start` runs the same sweep on a timer when
//! `reconciler_sweep_interval_secs` is configured. Both paths are idempotent
//! — running the sweep twice in a row with no intervening writes produces
//! `updated: 0` the second time.

use std::time::Duration;

use futures_util::stream::{self, StreamExt};
use r2e::service::ServiceComponent;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::ApiResult;
use crate::models::{Image, ImageStatus};
use crate::objectstore::{ObjectStore, S3CompatibleStore};
use crate::store::ImageStore;

#[derive(Clone)]
pub struct Reconciler {
    store: ImageStore,
    object_store: S3CompatibleStore,
    concurrency: usize,
    sweep_interval_secs: Option<i64>,
}

#[derive(Debug, Default, Clone, Serialize, PartialEq, Eq)]
pub struct ReconcileReport {
    pub checked: u64,
    pub updated: u64,
    pub would_update: u64,
    pub errors: u64,
}

/// One image's verdict, already carrying its own id so the fan-in step
/// never has to reach back into a shared map.
enum Verdict {
    Ok,
    Missing { image_id: Uuid, reason: String },
    ProbeFailed,
}

impl Reconciler {
    pub fn new(store: ImageStore, object_store: S3CompatibleStore, concurrency: usize, sweep_interval_secs: Option<i64>) -> Self {
        Self { store, object_store, concurrency: concurrency.max(1), sweep_interval_secs }
    }

    /// §4.9. `project_id` scopes the sweep; `None` sweeps every image.
    pub async fn reconcile(&self, project_id: Option<Uuid>, dry_run: bool) -> ApiResult<ReconcileReport> {
        let images = match project_id {
            Some(id) => self.store.list_images_by_project(id).await?,
            None => self.store.list_all_images().await?,
        };

        let concurrency = self.concurrency;
        let verdicts: Vec<Verdict> = stream::iter(images)
            .map(|image| async move { self.judge(&image).await })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        let mut report = ReconcileReport::default();
        for verdict in verdicts {
            report.checked += 1;
            match verdict {
                Verdict::Ok => {}
                Verdict::Missing { image_id, reason } => {
                    if dry_run {
                        // Must not mutate the DB in dry-run mode — the known
                        // defect this fixes was incrementing `updated` here.
                        report.would_update += 1;
                    } else {
                        if let Err(e) = self
                            .store
                            .set_status(image_id, ImageStatus::Error, Some(&reason), None, true)
                            .await
                        {
                            tracing::warn!(%image_id, error = %e, "reconciler failed to write error status");
                        }
                        report.updated += 1;
                    }
                }
                Verdict::ProbeFailed => {
                    // HEAD itself failed (network, 5xx) — distinct from a
                    // confirmed-missing object; never counted as `updated`.
                    report.errors += 1;
                }
            }
        }
        Ok(report)
    }

    /// Checks every storage reference this image owns (its `original_url`
    /// if it is one of our keys, its `staged_url` if present) and returns
    /// the first non-`Ok` verdict encountered. Externally-sourced originals
    /// are not ours to reconcile and are skipped.
    async fn judge(&self, image: &Image) -> Verdict {
        if let Some(key) = self.object_store.key_from_url(&image.original_url) {
            match self.check_key(key).await {
                Verdict::Ok => {}
                other => return relabel(other, image.id, "original"),
            }
        }

        if let Some(staged_url) = &image.staged_url {
            if let Some(key) = self.object_store.key_from_url(staged_url) {
                match self.check_key(key).await {
                    Verdict::Ok => {}
                    other => return relabel(other, image.id, "staged"),
                }
            }
        }

        Verdict::Ok
    }

    async fn check_key(&self, key: &str) -> Verdict {
        match self.object_store.head(key).await {
            Ok(head) if head.exists => Verdict::Ok,
            Ok(_) => Verdict::Missing { image_id: Uuid::nil(), reason: String::new() },
            Err(_) => Verdict::ProbeFailed,
        }
    }
}

/// `check_key` doesn't know the image id or which field it was checking;
/// this fills both in once the caller knows.
fn relabel(verdict: Verdict, image_id: Uuid, field: &str) -> Verdict {
    match verdict {
        Verdict::Missing { .. } => Verdict::Missing {
            image_id,
            reason: format!("{field} object not found in storage"),
        },
        other => other,
    }
}

impl ServiceComponent<crate::state::AppState> for Reconciler {
    fn from_state(state: &crate::state::AppState) -> Self {
        state.reconciler.clone()
    }

    /// A no-op unless `reconciler_sweep_interval_secs` is set — the periodic
    /// sweep is an addition beyond the admin-triggered contract and stays
    /// off by default so it never changes observed behavior on its own.
    async fn start(self, shutdown: CancellationToken) {
        let Some(interval_secs) = self.sweep_interval_secs else {
            return;
        };
        let interval = Duration::from_secs(interval_secs.max(1) as u64);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(interval) => {}
            }
            match self.reconcile(None, false).await {
                Ok(report) => tracing::info!(
                    checked = report.checked,
                    updated = report.updated,
                    errors = report.errors,
                    "periodic reconciliation sweep complete"
                ),
                Err(e) => tracing::warn!(error = %e, "periodic reconciliation sweep failed"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dry_run_accumulation_never_touches_updated() {
        let mut report = ReconcileReport::default();
        for _ in 0..3 {
            report.checked += 1;
            report.would_update += 1;
        }
        assert_eq!(report, ReconcileReport { checked: 3, updated: 0, would_update: 3, errors: 0 });
    }

    #[test]
    fn relabel_fills_in_the_image_id_and_field_only_for_missing() {
        let id = Uuid::new_v4();
        match relabel(Verdict::Missing { image_id: Uuid::nil(), reason: String::new() }, id, "staged") {
            Verdict::Missing { image_id, reason } => {
                assert_eq!(image_id, id);
                assert_eq!(reason, "staged object not found in storage");
            }
            _ => panic!("expected Missing"),
        }
        assert!(matches!(relabel(Verdict::ProbeFailed, id, "staged"), Verdict::ProbeFailed));
    }
}
