use std::sync::Arc;

use r2e::prelude::*;
use r2e::r2e_security::{JwksCache, JwtClaimsValidator, SecurityConfig};
use sqlx::postgres::PgPoolOptions;

mod config;
mod controllers;
mod error;
mod identity;
mod image_service;
mod models;
mod objectstore;
mod project_service;
mod pubsub;
mod queue;
mod reconciler;
mod sse;
mod state;
mod store;
mod vendor;
mod webhook;
mod worker;

use config::AppConfig;
use controllers::admin::AdminController;
use controllers::images::ImageController;
use controllers::projects::ProjectController;
use controllers::webhook::WebhookController;
use objectstore::S3CompatibleStore;
use pubsub::ImageBus;
use queue::StageQueue;
use reconciler::Reconciler;
use state::AppState;
use store::ImageStore;
use vendor::ReqwestModelClient;
use webhook::WebhookIngestor;
use worker::WorkerPool;

#[tokio::main]
async fn main() {
    r2e::init_tracing();

    let config = R2eConfig::load("dev")
        .unwrap_or_else(|_| R2eConfig::empty())
        .with_typed::<AppConfig>()
        .expect("invalid application configuration");
    let app = config.typed().clone();
    let profile = config.profile().to_string();

    if app.webhook_secret.is_none() && app.webhook_secret_required(&profile) {
        panic!("app.webhook_secret is required outside the dev profile");
    }

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&app.database_url)
        .await
        .expect("failed to connect to postgres");

    let security_config = SecurityConfig::new(app.jwt_jwks_url.clone(), app.jwt_issuer.clone(), app.jwt_audience.clone());
    let jwks = JwksCache::new(security_config.clone())
        .await
        .expect("failed to fetch JWKS");
    let claims_validator = Arc::new(JwtClaimsValidator::new(Arc::new(jwks), security_config));

    let store = ImageStore::new(pool.clone());
    let queue =
        StageQueue::new(&app.queue_url, &app.queue_name, app.queue_max_attempts).expect("invalid queue url");
    let bus = ImageBus::new(&app.queue_url).expect("invalid pub/sub url");
    let object_store = S3CompatibleStore::new(
        app.object_store_bucket.clone(),
        app.object_store_endpoint.clone(),
        app.object_store_public_endpoint.clone(),
        app.object_store_signing_key.clone().into_bytes(),
    );
    let model_client = ReqwestModelClient::new(app.model_api_key.clone());
    let worker_pool = WorkerPool::new(store.clone(), queue.clone(), bus.clone(), object_store.clone(), model_client, &app);
    let webhook_ingestor = WebhookIngestor::new(store.clone(), app.webhook_secret.clone(), app.signature_tolerance_secs, profile == "dev");
    let reconciler = Reconciler::new(
        store.clone(),
        object_store.clone(),
        app.reconciler_concurrency.max(1) as usize,
        app.reconciler_sweep_interval_secs,
    );

    AppBuilder::new()
        .provide(config.clone())
        .provide(pool)
        .provide(claims_validator)
        .provide(store)
        .provide(queue)
        .provide(bus)
        .provide(object_store)
        .provide(worker_pool)
        .provide(webhook_ingestor)
        .provide(reconciler)
        .with_bean::<image_service::ImageService>()
        .with_bean::<project_service::ProjectService>()
        .build_state::<AppState, _>()
        .await
        .with_config(config.raw())
        .with(Health)
        .with(Cors::permissive())
        .with(Tracing)
        .with(ErrorHandling)
        .on_start(|state: AppState| async move {
            sqlx::migrate!("./migrations")
                .run(&state.pool)
                .await
                .map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)?;
            tracing::info!("database migrations applied");
            Ok(())
        })
        .register_controller::<ImageController>()
        .register_controller::<ProjectController>()
        .register_controller::<WebhookController>()
        .register_controller::<AdminController>()
        .merge_router(sse::router())
        .spawn_service::<WorkerPool>()
        .spawn_service::<Reconciler>()
        .serve("0.0.0.0:3000")
        .await
        .unwrap();
}
