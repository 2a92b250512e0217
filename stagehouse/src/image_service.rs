//! C5 — Image service. `create_image` and `batch_create_images` share one
//! create-and-enqueue primitive (§9 — "do not duplicate validation between
//! the single and batch paths"); `presign_upload` is a thin pass-through to
//! C1 with key generation.

use std::time::Duration;

use r2e::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::identity::StagehouseUser;
use crate::models::Image;
use crate::objectstore::{upload_key, Disposition, ObjectStore, S3CompatibleStore};
use crate::pubsub::{ImageBus, WireStatus};
use crate::queue::StageQueue;
use crate::store::ImageStore;

const MIN_BATCH_ITEMS: usize = 1;
const MAX_BATCH_ITEMS: usize = 50;
const PRESIGN_TTL: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Deserialize, garde::Validate, schemars::JsonSchema)]
pub struct CreateImageRequest {
    pub project_id: Uuid,
    #[garde(length(min = 1))]
    pub original_url: String,
    #[garde(skip)]
    pub room_type: Option<String>,
    #[garde(skip)]
    pub style: Option<String>,
    #[garde(skip)]
    pub seed: Option<i64>,
}

#[derive(Debug, Deserialize, garde::Validate, schemars::JsonSchema)]
pub struct BatchCreateImagesRequest {
    #[garde(length(min = 1, max = 50))]
    pub items: Vec<CreateImageRequest>,
}

#[derive(Debug, Serialize)]
pub struct BatchItemError {
    pub index: usize,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct BatchCreateResult {
    pub created: Vec<Image>,
    pub errors: Vec<BatchItemError>,
    pub success_count: usize,
    pub failed_count: usize,
}

#[derive(Debug, Deserialize, garde::Validate, schemars::JsonSchema)]
pub struct PresignUploadRequest {
    #[garde(length(min = 1))]
    pub content_type: String,
    #[garde(range(min = 1))]
    pub max_bytes: u64,
}

#[derive(Debug, Serialize)]
pub struct PresignUploadResponse {
    pub url: String,
    pub key: String,
}

#[derive(Clone)]
pub struct ImageService {
    store: ImageStore,
    queue: StageQueue,
    bus: ImageBus,
    object_store: S3CompatibleStore,
}

#[bean]
impl ImageService {
    pub fn new(store: ImageStore, queue: StageQueue, bus: ImageBus, object_store: S3CompatibleStore) -> Self {
        Self { store, queue, bus, object_store }
    }
}

impl ImageService {
    async fn assert_owns_project(&self, user: &StagehouseUser, project_id: Uuid) -> ApiResult<()> {
        let project = self
            .store
            .get_project(project_id)
            .await?
            .ok_or_else(|| ApiError::Forbidden("project not found".into()))?;
        if project.user_id != user.user_id {
            return Err(ApiError::Forbidden("project not found".into()));
        }
        Ok(())
    }

    /// Validate ownership, persist image+job, enqueue. On enqueue failure,
    /// the image is compensated to `error` rather than left `queued`
    /// forever (§4.5 step 4; the reconciler is the safety net beyond that).
    async fn create_and_enqueue(&self, user: &StagehouseUser, req: CreateImageRequest) -> ApiResult<Image> {
        self.assert_owns_project(user, req.project_id).await?;

        if url::Url::parse(&req.original_url).is_err() && !req.original_url.starts_with("uploads/") {
            return Err(ApiError::Validation(
                "original_url must be a valid URL or an uploads/ storage key".into(),
            ));
        }

        let (image, _job) = self
            .store
            .create_image(
                req.project_id,
                &req.original_url,
                req.room_type.as_deref(),
                req.style.as_deref(),
                req.seed,
            )
            .await?;

        if let Err(e) = self.queue.enqueue(image.id).await {
            tracing::warn!(error = %e, image_id = %image.id, "enqueue failed, marking image error");
            let compensated = self
                .store
                .set_status(image.id, crate::models::ImageStatus::Error, Some("failed to enqueue job"), None, true)
                .await?;
            let _ = self.bus.publish(image.id, WireStatus::Error).await;
            return Err(ApiError::QueueUnavailable(format!("image {} could not be enqueued: {e}", compensated.id)));
        }

        Ok(image)
    }

    pub async fn create_image(&self, user: &StagehouseUser, req: CreateImageRequest) -> ApiResult<Image> {
        self.create_and_enqueue(user, req).await
    }

    /// Each item is processed independently; one failure never aborts the
    /// batch. Status-code mapping from the result lives at the HTTP edge.
    pub async fn batch_create_images(
        &self,
        user: &StagehouseUser,
        items: Vec<CreateImageRequest>,
    ) -> ApiResult<BatchCreateResult> {
        if items.len() < MIN_BATCH_ITEMS || items.len() > MAX_BATCH_ITEMS {
            return Err(ApiError::Validation(format!(
                "batch must contain between {MIN_BATCH_ITEMS} and {MAX_BATCH_ITEMS} items"
            )));
        }

        let mut created = Vec::with_capacity(items.len());
        let mut errors = Vec::new();

        for (index, item) in items.into_iter().enumerate() {
            match self.create_and_enqueue(user, item).await {
                Ok(image) => created.push(image),
                Err(e) => errors.push(BatchItemError { index, message: e.kind().to_string() }),
            }
        }

        let success_count = created.len();
        let failed_count = errors.len();
        Ok(BatchCreateResult { created, errors, success_count, failed_count })
    }

    pub async fn get_image(&self, user: &StagehouseUser, id: Uuid) -> ApiResult<Image> {
        let image = self
            .store
            .get_image(id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("image {id} not found")))?;
        self.assert_owns_project(user, image.project_id).await?;
        Ok(image)
    }

    pub async fn list_images(&self, user: &StagehouseUser, project_id: Uuid) -> ApiResult<Vec<Image>> {
        self.assert_owns_project(user, project_id).await?;
        self.store.list_images_by_project(project_id).await
    }

    pub async fn presign_upload(&self, user: &StagehouseUser, req: PresignUploadRequest) -> ApiResult<PresignUploadResponse> {
        let ext = extension_for_content_type(&req.content_type);
        let key = upload_key(user.user_id, ext);
        let url = self
            .object_store
            .presign_put(&key, &req.content_type, req.max_bytes, PRESIGN_TTL)
            .await?;
        Ok(PresignUploadResponse { url, key })
    }

    pub async fn presign_download(
        &self,
        user: &StagehouseUser,
        image_id: Uuid,
        kind: PresignKind,
        download: bool,
    ) -> ApiResult<PresignUploadResponse> {
        let image = self.get_image(user, image_id).await?;
        let key = match kind {
            PresignKind::Original => image.original_url,
            PresignKind::Staged => image
                .staged_url
                .ok_or_else(|| ApiError::NotFound("image has no staged result yet".into()))?,
        };
        let disposition = if download { Disposition::Attachment } else { Disposition::Inline };
        let url = self.object_store.presign_get(&key, PRESIGN_TTL, Some(disposition)).await?;
        Ok(PresignUploadResponse { url, key })
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresignKind {
    Original,
    Staged,
}

impl Default for PresignKind {
    /// `?kind=` defaults to the staged result — the common case for a
    /// client polling for the finished image.
    fn default() -> Self {
        PresignKind::Staged
    }
}

fn extension_for_content_type(content_type: &str) -> &'static str {
    match content_type {
        "image/png" => "png",
        "image/webp" => "webp",
        _ => "jpg",
    }
}
