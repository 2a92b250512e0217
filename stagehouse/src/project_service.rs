//! Project CRUD (named out-of-scope "direct SQL" in the distilled spec's
//! exclusions — present because the route table in §6 requires it to
//! exist, deliberately thin beyond ownership checks).

use r2e::prelude::*;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::identity::StagehouseUser;
use crate::models::Project;
use crate::store::ImageStore;

#[derive(Debug, Deserialize, garde::Validate, schemars::JsonSchema)]
pub struct CreateProjectRequest {
    #[garde(length(min = 1, max = 200))]
    pub name: String,
}

#[derive(Debug, Deserialize, garde::Validate, schemars::JsonSchema)]
pub struct RenameProjectRequest {
    #[garde(length(min = 1, max = 200))]
    pub name: String,
}

#[derive(Clone)]
pub struct ProjectService {
    store: ImageStore,
}

#[bean]
impl ProjectService {
    pub fn new(store: ImageStore) -> Self {
        Self { store }
    }
}

impl ProjectService {
    pub async fn list(&self, user: &StagehouseUser) -> ApiResult<Vec<Project>> {
        self.store.list_projects(user.user_id).await
    }

    pub async fn create(&self, user: &StagehouseUser, req: CreateProjectRequest) -> ApiResult<Project> {
        self.store.create_project(user.user_id, &req.name).await
    }

    async fn assert_owns(&self, user: &StagehouseUser, id: Uuid) -> ApiResult<Project> {
        let project = self
            .store
            .get_project(id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("project {id} not found")))?;
        if project.user_id != user.user_id {
            return Err(ApiError::Forbidden("project not found".into()));
        }
        Ok(project)
    }

    pub async fn rename(&self, user: &StagehouseUser, id: Uuid, req: RenameProjectRequest) -> ApiResult<Project> {
        self.assert_owns(user, id).await?;
        self.store.rename_project(id, &req.name).await
    }

    pub async fn delete(&self, user: &StagehouseUser, id: Uuid) -> ApiResult<()> {
        self.assert_owns(user, id).await?;
        self.store.delete_project(id).await
    }

    pub async fn list_images(&self, user: &StagehouseUser, id: Uuid) -> ApiResult<Vec<crate::models::Image>> {
        self.assert_owns(user, id).await?;
        self.store.list_images_by_project(id).await
    }
}

