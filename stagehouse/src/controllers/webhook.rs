use r2e::http::{Bytes, HeaderMap, Json};
use r2e::prelude::*;

use crate::error::ApiError;
use crate::state::AppState;
use crate::webhook::{WebhookIngestor, WebhookOutcome};

const SIGNATURE_HEADER: &str = "stripe-signature";

#[derive(Controller)]
#[controller(path = "/api/v1", state = AppState)]
pub struct WebhookController {
    #[inject]
    webhook: WebhookIngestor,
}

#[routes]
impl WebhookController {
    /// Raw bytes, not `Json<T>`: the signature is computed over the exact
    /// wire payload, so the body must reach the ingestor unparsed.
    #[post("/stripe/webhook")]
    async fn receive(&self, headers: HeaderMap, body: Bytes) -> Result<Json<WebhookOutcome>, ApiError> {
        let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
        let outcome = self.webhook.ingest(&body, signature, chrono::Utc::now()).await?;
        Ok(Json(outcome))
    }
}
