//! C3 — Per-image pub/sub bus.
//!
//! Channel namespace `jobs:image:{image_id}`. Publish takes `{"status": "..."}`;
//! subscribe returns a restartable stream scoped to one channel. Messages are
//! ephemeral: durability of status lives in the DB (C4); this is a
//! notification fast path only (§9 — do not add message persistence here).

use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WireStatus {
    Queued,
    Processing,
    Ready,
    Error,
}

impl From<crate::models::ImageStatus> for WireStatus {
    fn from(s: crate::models::ImageStatus) -> Self {
        match s {
            crate::models::ImageStatus::Queued => WireStatus::Queued,
            crate::models::ImageStatus::Processing => WireStatus::Processing,
            crate::models::ImageStatus::Ready => WireStatus::Ready,
            crate::models::ImageStatus::Error => WireStatus::Error,
        }
    }
}

#[derive(Clone)]
pub struct ImageBus {
    client: redis::Client,
}

fn channel_name(image_id: Uuid) -> String {
    format!("jobs:image:{image_id}")
}

impl ImageBus {
    pub fn new(queue_url: &str) -> ApiResult<Self> {
        let client = redis::Client::open(queue_url)
            .map_err(|e| ApiError::QueueUnavailable(e.to_string()))?;
        Ok(Self { client })
    }

    pub async fn publish(&self, image_id: Uuid, status: WireStatus) -> ApiResult<()> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| ApiError::QueueUnavailable(e.to_string()))?;
        let payload = serde_json::json!({ "status": status }).to_string();
        let _: () = conn
            .publish(channel_name(image_id), payload)
            .await
            .map_err(|e| ApiError::QueueUnavailable(e.to_string()))?;
        Ok(())
    }

    /// Subscribe to a single image's channel. On subscription failure,
    /// returns the error before any bytes are written by the caller.
    pub async fn subscribe(&self, image_id: Uuid) -> ApiResult<ImageSubscription> {
        let conn = self
            .client
            .get_async_connection()
            .await
            .map_err(|e| ApiError::QueueUnavailable(e.to_string()))?;
        let mut pubsub = conn.into_pubsub();
        pubsub
            .subscribe(channel_name(image_id))
            .await
            .map_err(|e| ApiError::QueueUnavailable(e.to_string()))?;
        Ok(ImageSubscription { pubsub })
    }
}

pub struct ImageSubscription {
    pubsub: redis::aio::PubSub,
}

impl ImageSubscription {
    /// Pull the next raw message payload, parsed as `{"status": "..."}`.
    /// Malformed payloads are returned as `None` by the caller's parse step
    /// (C7 is responsible for ignoring them, not this layer).
    pub async fn next_raw(&mut self) -> Option<String> {
        use futures_util::StreamExt;
        let msg = self.pubsub.on_message().next().await?;
        msg.get_payload::<String>().ok()
    }
}
