use r2e::http::{Json, Path, StatusCode};
use r2e::prelude::*;
use uuid::Uuid;

use crate::error::ApiError;
use crate::identity::StagehouseUser;
use crate::models::{Image, Project};
use crate::project_service::{CreateProjectRequest, ProjectService, RenameProjectRequest};
use crate::state::AppState;

#[derive(Controller)]
#[controller(path = "/api/v1", state = AppState)]
pub struct ProjectController {
    #[inject]
    projects: ProjectService,
}

#[routes]
impl ProjectController {
    #[get("/projects")]
    async fn list(&self, #[inject(identity)] user: StagehouseUser) -> Result<Json<Vec<Project>>, ApiError> {
        Ok(Json(self.projects.list(&user).await?))
    }

    #[post("/projects")]
    #[status(201)]
    async fn create(
        &self,
        #[inject(identity)] user: StagehouseUser,
        Json(req): Json<CreateProjectRequest>,
    ) -> Result<Json<Project>, ApiError> {
        Ok(Json(self.projects.create(&user, req).await?))
    }

    #[patch("/projects/{id}")]
    async fn rename(
        &self,
        #[inject(identity)] user: StagehouseUser,
        Path(id): Path<Uuid>,
        Json(req): Json<RenameProjectRequest>,
    ) -> Result<Json<Project>, ApiError> {
        Ok(Json(self.projects.rename(&user, id, req).await?))
    }

    #[delete("/projects/{id}")]
    #[status(204)]
    async fn delete(
        &self,
        #[inject(identity)] user: StagehouseUser,
        Path(id): Path<Uuid>,
    ) -> Result<StatusCode, ApiError> {
        self.projects.delete(&user, id).await?;
        Ok(StatusCode::NO_CONTENT)
    }

    #[get("/projects/{id}/images")]
    async fn list_images(
        &self,
        #[inject(identity)] user: StagehouseUser,
        Path(id): Path<Uuid>,
    ) -> Result<Json<Vec<Image>>, ApiError> {
        Ok(Json(self.projects.list_images(&user, id).await?))
    }
}
