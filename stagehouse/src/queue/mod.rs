//! C2 — Queue adapter over Redis Streams.
//!
//! Single stream (named from `AppConfig::queue_name`, default `default`)
//! shared by all worker slots through one consumer group, giving
//! at-least-once delivery and per-consumer claims for free. The adapter
//! owns retry/backoff/DLQ bookkeeping; it carries an `attempt` counter in
//! the stream entry itself (not exposed past this module) so a crashed
//! consumer's in-flight message can be redelivered and re-attempted without
//! consulting anything outside Redis. Business logic still re-reads the
//! image/job rows from the DB on every dequeue per the data model's "stale
//! payloads are harmless" contract — `attempt` here is purely
//! queue-internal backoff bookkeeping.

use std::collections::HashMap;
use std::time::Duration;

use redis::streams::{StreamId, StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, Value};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};

const GROUP_SUFFIX: &str = "workers";
const DLQ_SUFFIX: &str = "dlq";
const FIELD_IMAGE_ID: &str = "image_id";
const FIELD_ATTEMPT: &str = "attempt";
const FIELD_ERROR: &str = "error";

/// What a handler decided about the job it just ran.
pub enum HandlerResult {
    /// Job finished (success, or a terminal failure the handler already
    /// recorded as `error` status itself).
    Done,
    /// Transient failure; eligible for backoff and redelivery.
    Retry(String),
}

#[derive(Clone)]
pub struct StageQueue {
    client: redis::Client,
    max_attempts: u32,
    stream: String,
    group: String,
    dlq_stream: String,
}

impl StageQueue {
    /// `queue_name` (`AppConfig::queue_name`, default `default`) names the
    /// underlying Redis stream; the consumer group and DLQ stream are
    /// derived from it so a deployment can run more than one queue by
    /// changing a single config value.
    pub fn new(queue_url: &str, queue_name: &str, max_attempts: u32) -> ApiResult<Self> {
        let client = redis::Client::open(queue_url)
            .map_err(|e| ApiError::QueueUnavailable(e.to_string()))?;
        Ok(Self {
            client,
            max_attempts,
            stream: format!("{queue_name}:stage:run"),
            group: format!("{queue_name}:stage:run:{GROUP_SUFFIX}"),
            dlq_stream: format!("{queue_name}:stage:run:{DLQ_SUFFIX}"),
        })
    }

    async fn conn(&self) -> ApiResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| ApiError::QueueUnavailable(e.to_string()))
    }

    /// Create the consumer group if it doesn't exist yet. Idempotent —
    /// called once at startup before the worker pool subscribes.
    pub async fn ensure_group(&self) -> ApiResult<()> {
        let mut conn = self.conn().await?;
        let res: redis::RedisResult<()> = conn.xgroup_create_mkstream(&self.stream, &self.group, "0").await;
        match res {
            Ok(()) => Ok(()),
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(ApiError::QueueUnavailable(e.to_string())),
        }
    }

    /// Enqueue `{image_id}`. Returns the stream entry ID as a job handle.
    pub async fn enqueue(&self, image_id: Uuid) -> ApiResult<String> {
        let mut conn = self.conn().await?;
        let id: String = conn
            .xadd(&self.stream, "*", &[(FIELD_IMAGE_ID, image_id.to_string())])
            .await
            .map_err(|e| ApiError::QueueUnavailable(e.to_string()))?;
        Ok(id)
    }

    /// Run `concurrency` consumer slots until `shutdown` fires. Each slot
    /// pulls one message at a time, runs `handler`, and acks, redelivers
    /// with backoff, or routes to the DLQ depending on the outcome.
    /// `on_exhausted` is called once, before the DLQ write, when a job's
    /// attempts run out on a transient failure — it exists so the worker
    /// can record the image's terminal `error` status (§4.6 step 8).
    pub async fn run<H, HFut, G, GFut>(
        &self,
        concurrency: usize,
        consumer_prefix: &str,
        shutdown: CancellationToken,
        handler: H,
        on_exhausted: G,
    ) where
        H: Fn(Uuid) -> HFut + Clone + Send + Sync + 'static,
        HFut: std::future::Future<Output = HandlerResult> + Send,
        G: Fn(Uuid, String) -> GFut + Clone + Send + Sync + 'static,
        GFut: std::future::Future<Output = ()> + Send,
    {
        let mut tasks = tokio::task::JoinSet::new();
        for slot in 0..concurrency {
            let queue = self.clone();
            let consumer_name = format!("{consumer_prefix}-{slot}");
            let handler = handler.clone();
            let on_exhausted = on_exhausted.clone();
            let shutdown = shutdown.clone();
            tasks.spawn(async move {
                queue.run_slot(consumer_name, shutdown, handler, on_exhausted).await;
            });
        }
        while tasks.join_next().await.is_some() {}
    }

    async fn run_slot<H, HFut, G, GFut>(
        &self,
        consumer_name: String,
        shutdown: CancellationToken,
        handler: H,
        on_exhausted: G,
    ) where
        H: Fn(Uuid) -> HFut + Send + Sync,
        HFut: std::future::Future<Output = HandlerResult> + Send,
        G: Fn(Uuid, String) -> GFut + Send + Sync,
        GFut: std::future::Future<Output = ()> + Send,
    {
        loop {
            if shutdown.is_cancelled() {
                return;
            }
            let mut conn = match self.conn().await {
                Ok(c) => c,
                Err(e) => {
                    warn!(error = %e, "queue connection failed, retrying in 1s");
                    tokio::select! {
                        _ = shutdown.cancelled() => return,
                        _ = tokio::time::sleep(Duration::from_secs(1)) => continue,
                    }
                }
            };

            let opts = StreamReadOptions::default()
                .group(&self.group, &consumer_name)
                .block(2_000)
                .count(1);

            let read: Option<StreamReadReply> = tokio::select! {
                _ = shutdown.cancelled() => return,
                res = conn.xread_options(&[&self.stream], &[">"], &opts) => {
                    match res {
                        Ok(reply) => Some(reply),
                        Err(e) => {
                            warn!(error = %e, "XREADGROUP failed");
                            None
                        }
                    }
                }
            };

            let Some(reply) = read else { continue };
            for key in reply.keys {
                for entry in key.ids {
                    self.handle_entry(&mut conn, &entry, &handler, &on_exhausted).await;
                }
            }
        }
    }

    async fn handle_entry<H, HFut, G, GFut>(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        entry: &StreamId,
        handler: &H,
        on_exhausted: &G,
    ) where
        H: Fn(Uuid) -> HFut + Send + Sync,
        HFut: std::future::Future<Output = HandlerResult> + Send,
        G: Fn(Uuid, String) -> GFut + Send + Sync,
        GFut: std::future::Future<Output = ()> + Send,
    {
        let Some((image_id, attempt)) = parse_entry(&entry.map) else {
            warn!(entry_id = %entry.id, "malformed stream entry, acking and dropping");
            let _: redis::RedisResult<()> = conn.xack(&self.stream, &self.group, &[&entry.id]).await;
            return;
        };

        match handler(image_id).await {
            HandlerResult::Done => {
                let _: redis::RedisResult<()> = conn.xack(&self.stream, &self.group, &[&entry.id]).await;
            }
            HandlerResult::Retry(message) => {
                let next_attempt = attempt + 1;
                if next_attempt >= self.max_attempts {
                    on_exhausted(image_id, message.clone()).await;
                    let dlq_result: redis::RedisResult<String> = conn
                        .xadd(
                            &self.dlq_stream,
                            "*",
                            &[
                                (FIELD_IMAGE_ID, image_id.to_string()),
                                (FIELD_ATTEMPT, next_attempt.to_string()),
                                (FIELD_ERROR, message),
                            ],
                        )
                        .await;
                    if let Err(e) = dlq_result {
                        warn!(error = %e, %image_id, "failed to write DLQ entry");
                    }
                    let _: redis::RedisResult<()> = conn.xack(&self.stream, &self.group, &[&entry.id]).await;
                } else {
                    info!(%image_id, attempt = next_attempt, "retrying job after backoff");
                    tokio::time::sleep(backoff_delay(attempt)).await;
                    let requeue: redis::RedisResult<String> = conn
                        .xadd(
                            &self.stream,
                            "*",
                            &[
                                (FIELD_IMAGE_ID, image_id.to_string()),
                                (FIELD_ATTEMPT, next_attempt.to_string()),
                            ],
                        )
                        .await;
                    if let Err(e) = requeue {
                        warn!(error = %e, %image_id, "failed to requeue job, it will be lost");
                    }
                    let _: redis::RedisResult<()> = conn.xack(&self.stream, &self.group, &[&entry.id]).await;
                }
            }
        }
    }
}

fn parse_entry(map: &HashMap<String, Value>) -> Option<(Uuid, u32)> {
    let image_id = match map.get(FIELD_IMAGE_ID)? {
        Value::BulkString(bytes) => Uuid::parse_str(&String::from_utf8_lossy(bytes)).ok()?,
        Value::SimpleString(s) => Uuid::parse_str(s).ok()?,
        _ => return None,
    };
    let attempt = match map.get(FIELD_ATTEMPT) {
        Some(Value::BulkString(bytes)) => String::from_utf8_lossy(bytes).parse().unwrap_or(0),
        Some(Value::SimpleString(s)) => s.parse().unwrap_or(0),
        _ => 0,
    };
    Some((image_id, attempt))
}

/// Exponential backoff capped at 30s, keyed by the attempt that just failed.
fn backoff_delay(attempt: u32) -> Duration {
    let secs = 1u64.saturating_shl(attempt.min(5));
    Duration::from_secs(secs.min(30))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_entry_reads_image_id_and_defaults_attempt_to_zero() {
        let id = Uuid::new_v4();
        let mut map = HashMap::new();
        map.insert(FIELD_IMAGE_ID.to_string(), Value::BulkString(id.to_string().into_bytes()));
        let (parsed_id, attempt) = parse_entry(&map).unwrap();
        assert_eq!(parsed_id, id);
        assert_eq!(attempt, 0);
    }

    #[test]
    fn parse_entry_rejects_missing_image_id() {
        let map = HashMap::new();
        assert!(parse_entry(&map).is_none());
    }

    #[test]
    fn backoff_delay_grows_and_caps_at_thirty_seconds() {
        assert_eq!(backoff_delay(0), Duration::from_secs(1));
        assert_eq!(backoff_delay(1), Duration::from_secs(2));
        assert_eq!(backoff_delay(10), Duration::from_secs(30));
    }
}
