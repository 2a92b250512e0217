//! C7 — SSE streamer.
//!
//! A hand-rolled raw handler rather than the `SseBroadcaster` sugar
//! (`r2e_core::sse`): that broadcaster is one global channel, but every
//! image needs its own stream scoped to its own pub/sub channel (C3). Merged
//! into the app via `AppBuilder::register_routes` so it still rides the
//! global `Tracing`/`Cors`/`ErrorHandling` plugins, just without
//! controller-level DI or guards.

use std::convert::Infallible;
use std::time::Duration;

use r2e::http::{HeaderMap, Query, Router, Sse, SseEvent, SseKeepAlive, State};
use r2e::r2e_security::ClaimsIdentity;
use serde::Deserialize;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use crate::error::ApiError;
use crate::identity::StagehouseUser;
use crate::models::ImageStatus;
use crate::pubsub::ImageSubscription;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
struct EventsQuery {
    image_id: Uuid,
    access_token: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/api/v1/events", r2e::http::routing::get(events_handler))
}

/// §4.7 steps 1–3. Authenticates, checks ownership, then bridges the
/// per-image bus subscription and a heartbeat ticker into one SSE stream.
async fn events_handler(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
    headers: HeaderMap,
) -> Result<Sse<ReceiverStream<Result<SseEvent, Infallible>>>, ApiError> {
    let token = bearer_token(&headers, &query)?;
    let claims = state
        .claims_validator
        .validate(&token)
        .await
        .map_err(|e| ApiError::Unauthenticated(e.to_string()))?;
    let user = StagehouseUser::from_jwt_claims(claims, &state)
        .await
        .map_err(|e| ApiError::Unauthenticated(e.to_string()))?;

    let image = state
        .store
        .get_image(query.image_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("image {} not found", query.image_id)))?;
    let project = state
        .store
        .get_project(image.project_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("project {} not found", image.project_id)))?;
    if project.user_id != user.user_id {
        return Err(ApiError::Forbidden("image not found".into()));
    }

    let subscription = state.bus.subscribe(query.image_id).await?;
    let heartbeat = Duration::from_secs(state.config.typed().sse_heartbeat_interval_secs.max(1) as u64);

    let stream = spawn_event_stream(subscription, heartbeat);
    Ok(Sse::new(stream).keep_alive(SseKeepAlive::default()))
}

/// `Authorization: Bearer <t>` takes precedence; `?access_token=` exists
/// purely because browser `EventSource` cannot set headers.
fn bearer_token(headers: &HeaderMap, query: &EventsQuery) -> Result<String, ApiError> {
    if let Some(value) = headers.get(r2e::http::AUTHORIZATION) {
        let value = value.to_str().map_err(|_| ApiError::Unauthenticated("malformed authorization header".into()))?;
        if let Some(token) = value.strip_prefix("Bearer ") {
            return Ok(token.to_string());
        }
    }
    query
        .access_token
        .clone()
        .ok_or_else(|| ApiError::Unauthenticated("missing bearer token".into()))
}

/// Drives the select loop in a spawned task and forwards framed events
/// through a channel, the same bridging shape `pubsub::async_gen_stream`
/// uses for the one-layer-down Redis subscription.
fn spawn_event_stream(
    mut subscription: ImageSubscription,
    heartbeat_interval: Duration,
) -> ReceiverStream<Result<SseEvent, Infallible>> {
    let (tx, rx) = tokio::sync::mpsc::channel(64);

    tokio::spawn(async move {
        let connected = SseEvent::default()
            .event("connected")
            .data(r#"{"message":"Connected to image stream"}"#);
        if tx.send(Ok(connected)).await.is_err() {
            return;
        }

        let mut ticker = tokio::time::interval(heartbeat_interval);
        ticker.tick().await; // first tick fires immediately; skip it

        loop {
            tokio::select! {
                _ = tx.closed() => return,
                _ = ticker.tick() => {
                    let event = SseEvent::default()
                        .event("heartbeat")
                        .data(format!(r#"{{"timestamp":{}}}"#, chrono::Utc::now().timestamp()));
                    if tx.send(Ok(event)).await.is_err() {
                        return;
                    }
                }
                payload = subscription.next_raw() => {
                    let Some(payload) = payload else { return };
                    if let Some(event) = parse_job_update(&payload) {
                        if tx.send(Ok(event)).await.is_err() {
                            return;
                        }
                    }
                }
            }
        }
    });

    ReceiverStream::new(rx)
}

/// Parses `{"status":"<s>"}`; malformed or empty-status payloads are
/// ignored, leaving the stream healthy (§8 — "the stream remains healthy").
fn parse_job_update(payload: &str) -> Option<SseEvent> {
    let value: serde_json::Value = serde_json::from_str(payload).ok()?;
    let status = value.get("status")?.as_str()?;
    if status.is_empty() {
        return None;
    }
    let _: ImageStatus = serde_json::from_value(serde_json::Value::String(status.to_string())).ok()?;
    Some(SseEvent::default().event("job_update").data(format!(r#"{{"status":"{status}"}}"#)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_formed_status_produces_a_job_update_event() {
        let event = parse_job_update(r#"{"status":"processing"}"#);
        assert!(event.is_some());
    }

    #[test]
    fn empty_status_is_ignored() {
        assert!(parse_job_update(r#"{"status":""}"#).is_none());
    }

    #[test]
    fn malformed_json_is_ignored() {
        assert!(parse_job_update("not json").is_none());
    }

    #[test]
    fn unknown_status_value_is_ignored() {
        assert!(parse_job_update(r#"{"status":"nonexistent"}"#).is_none());
    }
}
