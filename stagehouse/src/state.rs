//! Application state. Every field is resolvable via `FromRef<AppState>`
//! (generated by `#[derive(BeanState)]`), so controllers and the raw SSE
//! handler alike can pull exactly the clients they need.

use std::sync::Arc;

use r2e::prelude::*;
use r2e::r2e_security::JwtClaimsValidator;
use sqlx::PgPool;

use crate::config::AppConfig;
use crate::image_service::ImageService;
use crate::objectstore::S3CompatibleStore;
use crate::project_service::ProjectService;
use crate::pubsub::ImageBus;
use crate::queue::StageQueue;
use crate::reconciler::Reconciler;
use crate::store::ImageStore;
use crate::webhook::WebhookIngestor;
use crate::worker::WorkerPool;

#[derive(Clone, BeanState)]
pub struct AppState {
    pub pool: PgPool,
    pub config: R2eConfig<AppConfig>,
    pub claims_validator: Arc<JwtClaimsValidator>,
    pub store: ImageStore,
    pub queue: StageQueue,
    pub bus: ImageBus,
    pub object_store: S3CompatibleStore,
    pub image_service: ImageService,
    pub project_service: ProjectService,
    pub webhook_ingestor: WebhookIngestor,
    pub reconciler: Reconciler,
    pub worker_pool: WorkerPool,
}
