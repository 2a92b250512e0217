//! Typed configuration, resolved from `application.yaml` + `.env` + env vars
//! via `R2eConfig<AppConfig>` (see `r2e_core::config`).

use r2e::prelude::*;

#[derive(Clone, Debug, ConfigProperties)]
#[config(prefix = "app")]
pub struct AppConfig {
    pub database_url: String,

    pub queue_url: String,

    #[config(default = "default")]
    pub queue_name: String,

    #[config(default = 5)]
    pub worker_concurrency: i64,

    #[config(default = 5)]
    pub queue_max_attempts: u32,

    #[config(default = 30)]
    pub sse_heartbeat_interval_secs: i64,

    pub sse_subscribe_timeout_secs: Option<i64>,

    pub webhook_secret: Option<String>,

    #[config(default = 300)]
    pub signature_tolerance_secs: i64,

    pub jwt_audience: String,

    pub jwt_issuer: String,

    pub jwt_jwks_url: String,

    pub object_store_bucket: String,

    pub object_store_endpoint: String,

    pub object_store_public_endpoint: String,

    /// Shared secret behind the hand-rolled presigning scheme (see
    /// `objectstore::S3CompatibleStore`). Not a real AWS credential.
    #[config(default = "dev-object-store-signing-key")]
    pub object_store_signing_key: String,

    #[config(default = "qwen/qwen-image-edit")]
    pub model_id: String,

    pub model_api_key: Option<String>,

    #[config(default = 4)]
    pub reconciler_concurrency: i64,

    pub reconciler_sweep_interval_secs: Option<i64>,
}

impl AppConfig {
    /// Production profiles must configure a webhook secret; only `dev` may
    /// run without one (see `WebhookIngestor::verify_signature`).
    pub fn webhook_secret_required(&self, profile: &str) -> bool {
        profile != "dev"
    }
}
