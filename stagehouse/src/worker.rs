//! C6 — Worker. Consumes `stage:run` jobs from C2, drives a job through
//! `queued/processing → {ready, error}`, publishing each transition via C3.
//!
//! Runs as an [`r2e::service::ServiceComponent`] — a sibling long-running
//! task started alongside `AppBuilder::serve`, not a route (§4.6). Each
//! slot is stateless across retries: step 1 always re-reads the image/job
//! rows from the DB, so a stale or duplicate queue payload is harmless.

use r2e::service::ServiceComponent;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::models::{Image, ImageStatus, JobState};
use crate::objectstore::{staged_key, ObjectStore, S3CompatibleStore};
use crate::pubsub::{ImageBus, WireStatus};
use crate::queue::{HandlerResult, StageQueue};
use crate::store::ImageStore;
use crate::vendor::{ModelClient, ModelInput, ModelVariant, ReqwestModelClient, VendorError};

/// Independent state needed to run one job end to end; slots never share
/// mutable state beyond clones of these clients (§5).
#[derive(Clone)]
pub struct WorkerPool {
    store: ImageStore,
    queue: StageQueue,
    bus: ImageBus,
    object_store: S3CompatibleStore,
    model_client: ReqwestModelClient,
    concurrency: usize,
    model_id: String,
}

impl ServiceComponent<crate::state::AppState> for WorkerPool {
    fn from_state(state: &crate::state::AppState) -> Self {
        state.worker_pool.clone()
    }

    async fn start(self, shutdown: CancellationToken) {
        if let Err(e) = self.queue.ensure_group().await {
            tracing::error!(error = %e, "failed to create consumer group, worker will retry connections per-slot");
        }
        let this = self.clone();
        let exhausted = self.clone();
        self.queue
            .run(
                self.concurrency,
                "stagehouse-worker",
                shutdown,
                move |image_id| {
                    let this = this.clone();
                    async move { this.run_job(image_id).await }
                },
                move |image_id, message| {
                    let exhausted = exhausted.clone();
                    async move { exhausted.record_exhausted(image_id, message).await }
                },
            )
            .await;
    }
}

impl WorkerPool {
    pub fn new(
        store: ImageStore,
        queue: StageQueue,
        bus: ImageBus,
        object_store: S3CompatibleStore,
        model_client: ReqwestModelClient,
        config: &AppConfig,
    ) -> Self {
        Self {
            store,
            queue,
            bus,
            object_store,
            model_client,
            concurrency: config.worker_concurrency.max(1) as usize,
            model_id: config.model_id.clone(),
        }
    }

    /// §4.6 steps 1–8. Returns `Done` for success and for non-retryable
    /// failures (both cases already recorded a terminal status and must be
    /// acked); returns `Retry` only for upstream 5xx/timeout.
    async fn run_job(&self, image_id: Uuid) -> HandlerResult {
        let image = match self.store.get_image(image_id).await {
            Ok(Some(image)) => image,
            Ok(None) => {
                tracing::warn!(%image_id, "job references an image that no longer exists, dropping");
                return HandlerResult::Done;
            }
            Err(e) => {
                tracing::warn!(%image_id, error = %e, "failed to read image, retrying");
                return HandlerResult::Retry(e.to_string());
            }
        };

        if image.status.is_terminal() {
            tracing::info!(%image_id, status = image.status.as_str(), "job for already-terminal image, treating as duplicate delivery");
            return HandlerResult::Done;
        }

        if let Err(e) = self.store.set_job_state(image_id, JobState::Running).await {
            tracing::warn!(%image_id, error = %e, "failed to mark job running");
        }

        // Idempotent transition: queued or processing → processing.
        if let Err(e) = self
            .store
            .set_status(image_id, ImageStatus::Processing, None, None, false)
            .await
        {
            tracing::warn!(%image_id, error = %e, "failed to transition to processing, retrying");
            return HandlerResult::Retry(e.to_string());
        }
        let _ = self.bus.publish(image_id, WireStatus::Processing).await;

        match self.stage(&image).await {
            Ok(staged_url) => {
                if let Err(e) = self
                    .store
                    .set_status(image_id, ImageStatus::Ready, None, Some(&staged_url), false)
                    .await
                {
                    tracing::warn!(%image_id, error = %e, "failed to record ready status, retrying");
                    return HandlerResult::Retry(e.to_string());
                }
                let _ = self.bus.publish(image_id, WireStatus::Ready).await;
                let _ = self.store.set_job_state(image_id, JobState::Succeeded).await;
                HandlerResult::Done
            }
            Err(StageOutcome::Retryable(message)) => HandlerResult::Retry(message),
            Err(StageOutcome::Fatal(message)) => {
                self.fail_image(image_id, &message).await;
                HandlerResult::Done
            }
        }
    }

    /// §4.6 steps 3–6: fetch source bytes, build a vendor input, invoke the
    /// model, upload the result. Returns the public `staged_url`.
    async fn stage(&self, image: &Image) -> Result<String, StageOutcome> {
        let source_bytes = self.fetch_source(image).await?;

        let variant = ModelVariant::resolve(&self.model_id).ok_or_else(|| {
            StageOutcome::Fatal(format!("unknown model_id '{}'", self.model_id))
        })?;
        let input = ModelInput::build(variant, source_bytes, image.room_type.as_deref(), image.style.as_deref(), image.seed);

        let result_bytes = self.model_client.invoke(variant, &input).await.map_err(|e| match e {
            VendorError::NonRetryable(msg) => StageOutcome::Fatal(msg),
            VendorError::Retryable(msg) => StageOutcome::Retryable(msg),
        })?;

        let user_id = owner_hint(image);
        let key = staged_key(user_id, "png");
        let url = self
            .object_store
            .put_object(&key, result_bytes, "image/png")
            .await
            .map_err(|e| StageOutcome::Retryable(e.to_string()))?;
        Ok(url)
    }

    async fn fetch_source(&self, image: &Image) -> Result<Vec<u8>, StageOutcome> {
        if is_storage_key(&image.original_url) {
            self.object_store
                .get_object(&image.original_url)
                .await
                .map_err(|e| StageOutcome::Retryable(e.to_string()))
        } else {
            self.model_client
                .fetch_external(&image.original_url)
                .await
                .map_err(|e| StageOutcome::Retryable(e.to_string()))
        }
    }

    async fn fail_image(&self, image_id: Uuid, message: &str) {
        if let Err(e) = self
            .store
            .set_status(image_id, ImageStatus::Error, Some(message), None, false)
            .await
        {
            tracing::error!(%image_id, error = %e, "failed to record error status");
        }
        let _ = self.bus.publish(image_id, WireStatus::Error).await;
        let _ = self.store.set_job_state(image_id, JobState::Failed).await;
    }

    /// Called by the queue adapter once, before the DLQ write, when a
    /// transient failure exhausts its attempts (§4.6 step 8 / "final
    /// attempt records error status").
    async fn record_exhausted(&self, image_id: Uuid, message: String) {
        self.fail_image(image_id, &format!("upstream unavailable: {message}")).await;
    }
}

enum StageOutcome {
    Retryable(String),
    Fatal(String),
}

fn is_storage_key(original_url: &str) -> bool {
    url::Url::parse(original_url).is_err() || original_url.starts_with("uploads/")
}

/// Best-effort extraction of the owning user id from an `uploads/{user_id}/…`
/// key so staged results land in the same per-user namespace; falls back to
/// a fresh id for externally-sourced originals.
fn owner_hint(image: &Image) -> Uuid {
    image
        .original_url
        .strip_prefix("uploads/")
        .and_then(|rest| rest.split('/').next())
        .and_then(|s| Uuid::parse_str(s).ok())
        .unwrap_or(image.project_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_keys_are_distinguished_from_external_urls() {
        assert!(is_storage_key("uploads/u1/a.jpg"));
        assert!(!is_storage_key("https://example.com/photo.jpg"));
    }

    #[test]
    fn owner_hint_falls_back_to_project_id_for_external_urls() {
        let mut image = sample_image();
        image.original_url = "https://example.com/a.jpg".into();
        assert_eq!(owner_hint(&image), image.project_id);
    }

    #[test]
    fn owner_hint_reads_the_uploads_key_namespace() {
        let user_id = Uuid::new_v4();
        let mut image = sample_image();
        image.original_url = format!("uploads/{user_id}/a.jpg");
        assert_eq!(owner_hint(&image), user_id);
    }

    fn sample_image() -> Image {
        Image {
            id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            original_url: String::new(),
            staged_url: None,
            status: ImageStatus::Queued,
            error: None,
            room_type: None,
            style: None,
            seed: None,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }
}
