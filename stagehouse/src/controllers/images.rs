use r2e::http::{Json, Path, Query, StatusCode};
use r2e::prelude::*;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::ApiError;
use crate::identity::StagehouseUser;
use crate::image_service::{
    BatchCreateImagesRequest, BatchCreateResult, CreateImageRequest, ImageService, PresignKind, PresignUploadRequest,
    PresignUploadResponse,
};
use crate::models::Image;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct PresignDownloadQuery {
    #[serde(default)]
    pub kind: PresignKind,
    #[serde(default)]
    pub download: bool,
}

#[derive(Controller)]
#[controller(path = "/api/v1", state = AppState)]
pub struct ImageController {
    #[inject]
    images: ImageService,
}

#[routes]
impl ImageController {
    #[post("/uploads/presign")]
    async fn presign_upload(
        &self,
        #[inject(identity)] user: StagehouseUser,
        Json(req): Json<PresignUploadRequest>,
    ) -> Result<Json<PresignUploadResponse>, ApiError> {
        Ok(Json(self.images.presign_upload(&user, req).await?))
    }

    #[post("/images")]
    #[status(202)]
    async fn create(
        &self,
        #[inject(identity)] user: StagehouseUser,
        Json(req): Json<CreateImageRequest>,
    ) -> Result<Json<Image>, ApiError> {
        Ok(Json(self.images.create_image(&user, req).await?))
    }

    /// Status varies with outcome (all/partial/no success), so this handler
    /// builds its response tuple directly instead of using `#[status(..)]`.
    #[post("/images/batch")]
    async fn create_batch(
        &self,
        #[inject(identity)] user: StagehouseUser,
        Json(req): Json<BatchCreateImagesRequest>,
    ) -> Result<(StatusCode, Json<BatchCreateResult>), ApiError> {
        let result = self.images.batch_create_images(&user, req.items).await?;
        let status = if result.failed_count == 0 {
            StatusCode::CREATED
        } else if result.success_count == 0 {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::MULTI_STATUS
        };
        Ok((status, Json(result)))
    }

    #[get("/images/{id}")]
    async fn get(
        &self,
        #[inject(identity)] user: StagehouseUser,
        Path(id): Path<Uuid>,
    ) -> Result<Json<Image>, ApiError> {
        Ok(Json(self.images.get_image(&user, id).await?))
    }

    #[get("/images/{id}/presign")]
    async fn presign_download(
        &self,
        #[inject(identity)] user: StagehouseUser,
        Path(id): Path<Uuid>,
        Query(query): Query<PresignDownloadQuery>,
    ) -> Result<Json<PresignUploadResponse>, ApiError> {
        Ok(Json(
            self.images.presign_download(&user, id, query.kind, query.download).await?,
        ))
    }
}
