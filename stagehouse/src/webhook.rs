//! C8 — Webhook ingestor. Signature verification, replay protection, and
//! idempotent upsert of billing entities against user records (§4.8).

use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{ApiError, ApiResult};
use crate::store::{ImageStore, InvoiceUpsert, SubscriptionUpsert};

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
pub struct WebhookIngestor {
    store: ImageStore,
    secret: Option<String>,
    tolerance_secs: i64,
    is_dev_profile: bool,
}

#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: WebhookEventData,
}

#[derive(Debug, Deserialize)]
pub struct WebhookEventData {
    pub object: serde_json::Value,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum WebhookOutcome {
    Processed,
    Duplicate,
}

impl WebhookIngestor {
    pub fn new(store: ImageStore, secret: Option<String>, tolerance_secs: i64, is_dev_profile: bool) -> Self {
        Self { store, secret, tolerance_secs, is_dev_profile }
    }

    /// §4.8 steps 1–7.
    pub async fn ingest(&self, body: &[u8], signature_header: Option<&str>, now: DateTime<Utc>) -> ApiResult<WebhookOutcome> {
        if body.is_empty() {
            return Err(ApiError::Validation("empty webhook body".into()));
        }

        verify_signature(body, signature_header, now, self.secret.as_deref(), self.tolerance_secs, self.is_dev_profile)?;

        let event: WebhookEvent =
            serde_json::from_slice(body).map_err(|e| ApiError::Validation(format!("malformed webhook payload: {e}")))?;

        if self.store.get_processed_event(&event.id).await?.is_some() {
            return Ok(WebhookOutcome::Duplicate);
        }

        self.dispatch(&event).await?;

        // Open question (§9, resolved): only mark processed after dispatch
        // returns ok. A failure to mark is logged but still returns success —
        // idempotency may fire again on provider retry, which is acceptable.
        let payload: serde_json::Value =
            serde_json::from_slice(body).unwrap_or(serde_json::Value::Null);
        if let Err(e) = self.store.mark_processed(&event.id, &event.event_type, &payload).await {
            tracing::warn!(event_id = %event.id, error = %e, "failed to mark webhook event processed");
        }

        Ok(WebhookOutcome::Processed)
    }

    async fn dispatch(&self, event: &WebhookEvent) -> ApiResult<()> {
        let object = &event.data.object;
        match event.event_type.as_str() {
            "checkout.session.completed" => self.handle_checkout_completed(object).await,
            "customer.subscription.created" | "customer.subscription.updated" => {
                self.handle_subscription_upsert(object, None).await
            }
            "customer.subscription.deleted" => self.handle_subscription_upsert(object, Some("canceled")).await,
            "invoice.payment_succeeded" => self.handle_invoice_upsert(object, "paid").await,
            "invoice.payment_failed" => self.handle_invoice_upsert(object, "failed").await,
            "customer.created" | "customer.updated" | "customer.deleted" => {
                tracing::info!(event_type = %event.event_type, "customer event logged, no DB effect");
                Ok(())
            }
            other => {
                tracing::info!(event_type = %other, "unhandled webhook event type, marking processed");
                Ok(())
            }
        }
    }

    /// A user-lookup miss is logged and treated as success (§4.8 step 7 —
    /// "the external event is not retryable into existence").
    async fn handle_checkout_completed(&self, object: &serde_json::Value) -> ApiResult<()> {
        let Some(client_reference_id) = object.get("client_reference_id").and_then(|v| v.as_str()) else {
            tracing::warn!("checkout.session.completed missing client_reference_id");
            return Ok(());
        };
        let Some(customer) = object.get("customer").and_then(|v| v.as_str()) else {
            tracing::warn!("checkout.session.completed missing customer id");
            return Ok(());
        };

        let Some(user) = self.store.get_user_by_auth_subject(client_reference_id).await? else {
            tracing::info!(%client_reference_id, "checkout.session.completed references unknown user");
            return Ok(());
        };

        self.store.set_stripe_customer_id_if_empty(user.id, customer).await?;
        Ok(())
    }

    async fn handle_subscription_upsert(&self, object: &serde_json::Value, forced_status: Option<&str>) -> ApiResult<()> {
        let Some(customer) = object.get("customer").and_then(|v| v.as_str()) else {
            tracing::warn!("subscription event missing customer id");
            return Ok(());
        };
        let Some(subscription_id) = object.get("id").and_then(|v| v.as_str()) else {
            tracing::warn!("subscription event missing id");
            return Ok(());
        };

        let Some(user) = self.store.get_user_by_stripe_customer_id(customer).await? else {
            tracing::info!(%customer, "subscription event references unknown customer");
            return Ok(());
        };

        let status = forced_status
            .map(str::to_string)
            .or_else(|| object.get("status").and_then(|v| v.as_str()).map(str::to_string))
            .unwrap_or_else(|| "unknown".to_string());
        let price_id = object
            .get("items")
            .and_then(|items| items.get("data"))
            .and_then(|data| data.get(0))
            .and_then(|item| item.get("price"))
            .and_then(|price| price.get("id"))
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let period_start = object.get("current_period_start").and_then(|v| v.as_i64()).and_then(unix_to_datetime);
        let period_end = object.get("current_period_end").and_then(|v| v.as_i64()).and_then(unix_to_datetime);
        let cancel_at_period_end = object.get("cancel_at_period_end").and_then(|v| v.as_bool()).unwrap_or(false);

        self.store
            .upsert_subscription(
                user.id,
                &SubscriptionUpsert {
                    stripe_subscription_id: subscription_id,
                    status: &status,
                    price_id: price_id.as_deref(),
                    current_period_start: period_start,
                    current_period_end: period_end,
                    cancel_at_period_end,
                },
            )
            .await
    }

    async fn handle_invoice_upsert(&self, object: &serde_json::Value, default_status: &str) -> ApiResult<()> {
        let Some(customer) = object.get("customer").and_then(|v| v.as_str()) else {
            tracing::warn!("invoice event missing customer id");
            return Ok(());
        };
        let Some(invoice_id) = object.get("id").and_then(|v| v.as_str()) else {
            tracing::warn!("invoice event missing id");
            return Ok(());
        };

        let Some(user) = self.store.get_user_by_stripe_customer_id(customer).await? else {
            tracing::info!(%customer, "invoice event references unknown customer");
            return Ok(());
        };

        let status = object
            .get("status")
            .and_then(|v| v.as_str())
            .unwrap_or(default_status)
            .to_string();
        let subscription_id = object.get("subscription").and_then(|v| v.as_str()).map(str::to_string);
        let amount_due = object.get("amount_due").and_then(|v| v.as_i64()).unwrap_or(0);
        let amount_paid = object.get("amount_paid").and_then(|v| v.as_i64()).unwrap_or(0);
        let currency = object.get("currency").and_then(|v| v.as_str()).unwrap_or("usd").to_string();
        let number = object.get("number").and_then(|v| v.as_str()).map(str::to_string);

        self.store
            .upsert_invoice(
                user.id,
                &InvoiceUpsert {
                    stripe_invoice_id: invoice_id,
                    stripe_subscription_id: subscription_id.as_deref(),
                    status: &status,
                    amount_due,
                    amount_paid,
                    currency: &currency,
                    number: number.as_deref(),
                },
            )
            .await
    }
}

/// Pure function of `(body, header, secret, now)` per §8's testable
/// property. Header format: `t=<unix>,v1=<hex>[,v1=<hex>...]`.
fn verify_signature(
    body: &[u8],
    header: Option<&str>,
    now: DateTime<Utc>,
    secret: Option<&str>,
    tolerance_secs: i64,
    is_dev_profile: bool,
) -> ApiResult<()> {
    let Some(secret) = secret else {
        if is_dev_profile {
            return Ok(());
        }
        return Err(ApiError::ServiceUnavailable("webhook secret not configured".into()));
    };

    let header = header.ok_or_else(|| ApiError::SignatureInvalid("missing signature header".into()))?;
    let (timestamp, signatures) =
        parse_signature_header(header).ok_or_else(|| ApiError::SignatureInvalid("malformed signature header".into()))?;

    let event_time = Utc
        .timestamp_opt(timestamp, 0)
        .single()
        .ok_or_else(|| ApiError::SignatureInvalid("malformed timestamp".into()))?;
    let skew = (now - event_time).num_seconds().abs();
    if skew > tolerance_secs {
        return Err(ApiError::SignatureInvalid("timestamp outside tolerance".into()));
    }

    let signed_payload = format!("{timestamp}.{}", String::from_utf8_lossy(body));
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ApiError::Internal(format!("invalid webhook secret: {e}")))?;
    mac.update(signed_payload.as_bytes());
    let expected = mac.finalize().into_bytes();
    let expected_hex = hex_encode(&expected);

    let matched = signatures.iter().any(|candidate| constant_time_hex_eq(candidate, &expected_hex));
    if !matched {
        return Err(ApiError::SignatureInvalid("signature mismatch".into()));
    }
    Ok(())
}

fn unix_to_datetime(ts: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(ts, 0).single()
}

/// Parses `t=<unix>,v1=<hex>[,v1=<hex>...]`, ignoring unrecognized keys.
fn parse_signature_header(header: &str) -> Option<(i64, Vec<String>)> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        let part = part.trim();
        let (key, value) = part.split_once('=')?;
        match key.trim() {
            "t" => timestamp = value.trim().parse::<i64>().ok(),
            "v1" => signatures.push(value.trim().to_string()),
            _ => {}
        }
    }

    let timestamp = timestamp?;
    if signatures.is_empty() {
        return None;
    }
    Some((timestamp, signatures))
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}

/// Constant-time comparison of two hex strings (equal length required, a
/// length mismatch is itself declared "no match" before any timing-relevant
/// comparison happens).
fn constant_time_hex_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, timestamp: i64, body: &str) -> String {
        let signed_payload = format!("{timestamp}.{body}");
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(signed_payload.as_bytes());
        hex_encode(&mac.finalize().into_bytes())
    }

    #[test]
    fn parses_multiple_v1_signatures() {
        let (ts, sigs) = parse_signature_header("t=1700000000,v1=aaa,v1=bbb").unwrap();
        assert_eq!(ts, 1700000000);
        assert_eq!(sigs, vec!["aaa".to_string(), "bbb".to_string()]);
    }

    #[test]
    fn rejects_header_without_timestamp() {
        assert!(parse_signature_header("v1=aaa").is_none());
    }

    #[test]
    fn accepts_a_matching_signature_within_tolerance() {
        let body = br#"{"id":"evt_1"}"#;
        let secret = "whsec_test";
        let now = Utc::now();
        let ts = now.timestamp();
        let sig = sign(secret, ts, &String::from_utf8_lossy(body));
        let header = format!("t={ts},v1={sig}");

        assert!(verify_signature(body, Some(&header), now, Some(secret), 300, false).is_ok());
    }

    #[test]
    fn rejects_a_timestamp_outside_tolerance() {
        let body = br#"{"id":"evt_1"}"#;
        let secret = "whsec_test";
        let now = Utc::now();
        let ts = now.timestamp() - 600;
        let sig = sign(secret, ts, &String::from_utf8_lossy(body));
        let header = format!("t={ts},v1={sig}");

        assert!(verify_signature(body, Some(&header), now, Some(secret), 300, false).is_err());
    }

    #[test]
    fn missing_secret_outside_dev_profile_is_rejected() {
        let err = verify_signature(b"{}", None, Utc::now(), None, 300, false);
        assert!(matches!(err, Err(ApiError::ServiceUnavailable(_))));
    }

    #[test]
    fn missing_secret_in_dev_profile_is_permitted() {
        assert!(verify_signature(b"{}", None, Utc::now(), None, 300, true).is_ok());
    }
}
