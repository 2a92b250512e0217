use r2e::http::Json;
use r2e::prelude::*;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::ApiError;
use crate::identity::StagehouseUser;
use crate::reconciler::{ReconcileReport, Reconciler};
use crate::state::AppState;

#[derive(Debug, Deserialize, Default)]
pub struct ReconcileRequest {
    pub project_id: Option<Uuid>,
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Controller)]
#[controller(path = "/api/v1", state = AppState)]
pub struct AdminController {
    #[inject]
    reconciler: Reconciler,
}

#[routes]
impl AdminController {
    /// Ad hoc sweep on top of the periodic one `Reconciler::start` runs
    /// (§4.9 — "operators can also trigger a sweep on demand").
    #[post("/reconcile/images")]
    #[roles("admin")]
    async fn reconcile(
        &self,
        #[inject(identity)] _user: StagehouseUser,
        Json(req): Json<ReconcileRequest>,
    ) -> Result<Json<ReconcileReport>, ApiError> {
        Ok(Json(self.reconciler.reconcile(req.project_id, req.dry_run).await?))
    }
}
