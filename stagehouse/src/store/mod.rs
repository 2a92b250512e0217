//! C4 — Image store. Typed persistence for users, projects, images, jobs,
//! and the billing entities the webhook ingestor (C8) upserts. Every write
//! that touches more than one row runs inside a `Tx` (`r2e_data_sqlx`'s
//! managed-transaction wrapper, acquired and released by hand here since
//! these methods are also called from the worker and reconciler, not just
//! HTTP handlers `#[managed]` can scope a transaction to).

use chrono::{DateTime, Utc};
use r2e::prelude::*;
use r2e::r2e_data_sqlx::{HasPool, Tx};
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::models::{Image, ImageStatus, Job, JobState, Plan, ProcessedEvent, Project, User};

#[derive(Clone)]
pub struct ImageStore {
    pool: PgPool,
}

#[bean]
impl ImageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl HasPool<Postgres> for ImageStore {
    fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl ImageStore {
    /// Begins a `Tx` the same way the `#[managed]` macro would for a
    /// handler parameter, just invoked directly — these call sites run
    /// from the worker and reconciler as well as from HTTP handlers.
    async fn acquire_tx(&self) -> ApiResult<Tx<'static, Postgres>> {
        Tx::acquire(self).await.map_err(|e| ApiError::Internal(e.to_string()))
    }

    /// Commits on `success`; on `!success` the `Tx` would already have been
    /// dropped (and rolled back) by the caller instead of reaching here.
    async fn release_tx(&self, tx: Tx<'static, Postgres>, success: bool) -> ApiResult<()> {
        tx.release(success).await.map_err(|e| ApiError::Internal(e.to_string()))
    }

    /// Look up a user by `auth_subject`, creating one on first sight.
    /// Never deletes, never updates the subject — this is purely
    /// find-or-create, matching the data model's "created on first
    /// authenticated request" rule.
    pub async fn get_or_create_user(&self, auth_subject: &str) -> ApiResult<User> {
        if let Some(user) = sqlx::query_as::<_, User>(
            "SELECT id, auth_subject, stripe_customer_id, role, created_at, updated_at \
             FROM users WHERE auth_subject = $1",
        )
        .bind(auth_subject)
        .fetch_optional(&self.pool)
        .await?
        {
            return Ok(user);
        }

        let user = sqlx::query_as::<_, User>(
            "INSERT INTO users (id, auth_subject, role, created_at, updated_at) \
             VALUES ($1, $2, 'user', now(), now()) \
             ON CONFLICT (auth_subject) DO UPDATE SET auth_subject = EXCLUDED.auth_subject \
             RETURNING id, auth_subject, stripe_customer_id, role, created_at, updated_at",
        )
        .bind(Uuid::new_v4())
        .bind(auth_subject)
        .fetch_one(&self.pool)
        .await?;
        Ok(user)
    }

    pub async fn get_user_by_stripe_customer_id(&self, customer_id: &str) -> ApiResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, auth_subject, stripe_customer_id, role, created_at, updated_at \
             FROM users WHERE stripe_customer_id = $1",
        )
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    /// `client_reference_id` on checkout sessions is the user's `auth_subject`.
    pub async fn get_user_by_auth_subject(&self, auth_subject: &str) -> ApiResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, auth_subject, stripe_customer_id, role, created_at, updated_at \
             FROM users WHERE auth_subject = $1",
        )
        .bind(auth_subject)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    /// Sets `stripe_customer_id` only if currently empty, per the webhook
    /// dispatch table for `checkout.session.completed`.
    pub async fn set_stripe_customer_id_if_empty(&self, user_id: Uuid, customer_id: &str) -> ApiResult<()> {
        sqlx::query(
            "UPDATE users SET stripe_customer_id = $1, updated_at = now() \
             WHERE id = $2 AND stripe_customer_id IS NULL",
        )
        .bind(customer_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_project(&self, id: Uuid) -> ApiResult<Option<Project>> {
        let project = sqlx::query_as::<_, Project>(
            "SELECT id, user_id, name, created_at FROM projects WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(project)
    }

    pub async fn list_projects(&self, user_id: Uuid) -> ApiResult<Vec<Project>> {
        let projects = sqlx::query_as::<_, Project>(
            "SELECT id, user_id, name, created_at FROM projects WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(projects)
    }

    pub async fn create_project(&self, user_id: Uuid, name: &str) -> ApiResult<Project> {
        let project = sqlx::query_as::<_, Project>(
            "INSERT INTO projects (id, user_id, name, created_at) VALUES ($1, $2, $3, now()) \
             RETURNING id, user_id, name, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(name)
        .fetch_one(&self.pool)
        .await?;
        Ok(project)
    }

    pub async fn rename_project(&self, id: Uuid, name: &str) -> ApiResult<Project> {
        let project = sqlx::query_as::<_, Project>(
            "UPDATE projects SET name = $2 WHERE id = $1 \
             RETURNING id, user_id, name, created_at",
        )
        .bind(id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("project {id} not found")))?;
        Ok(project)
    }

    /// Cascades to the project's images (foreign key `ON DELETE CASCADE`).
    pub async fn delete_project(&self, id: Uuid) -> ApiResult<()> {
        let result = sqlx::query("DELETE FROM projects WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(ApiError::NotFound(format!("project {id} not found")));
        }
        Ok(())
    }

    /// Inserts an `image` row (status `queued`) and its `stage:run` job row
    /// in one transaction. Enqueueing onto C2 is the caller's (C5's)
    /// responsibility — this method only persists.
    pub async fn create_image(
        &self,
        project_id: Uuid,
        original_url: &str,
        room_type: Option<&str>,
        style: Option<&str>,
        seed: Option<i64>,
    ) -> ApiResult<(Image, Job)> {
        let mut tx = self.acquire_tx().await?;

        let image = sqlx::query_as::<_, Image>(
            "INSERT INTO images \
             (id, project_id, original_url, staged_url, status, error, room_type, style, seed, created_at, updated_at) \
             VALUES ($1, $2, $3, NULL, 'queued', NULL, $4, $5, $6, now(), now()) \
             RETURNING id, project_id, original_url, staged_url, status, error, room_type, style, seed, created_at, updated_at",
        )
        .bind(Uuid::new_v4())
        .bind(project_id)
        .bind(original_url)
        .bind(room_type)
        .bind(style)
        .bind(seed)
        .fetch_one(tx.as_mut())
        .await?;

        let job = sqlx::query_as::<_, Job>(
            "INSERT INTO jobs (id, image_id, job_type, attempt, state, created_at, updated_at) \
             VALUES ($1, $2, 'stage:run', 0, 'pending', now(), now()) \
             RETURNING id, image_id, job_type, attempt, state, created_at, updated_at",
        )
        .bind(Uuid::new_v4())
        .bind(image.id)
        .fetch_one(tx.as_mut())
        .await?;

        self.release_tx(tx, true).await?;
        Ok((image, job))
    }

    pub async fn get_image(&self, id: Uuid) -> ApiResult<Option<Image>> {
        let image = sqlx::query_as::<_, Image>(
            "SELECT id, project_id, original_url, staged_url, status, error, room_type, style, seed, created_at, updated_at \
             FROM images WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(image)
    }

    /// Unscoped listing for the reconciler sweep (§4.9) — no project filter.
    pub async fn list_all_images(&self) -> ApiResult<Vec<Image>> {
        let images = sqlx::query_as::<_, Image>(
            "SELECT id, project_id, original_url, staged_url, status, error, room_type, style, seed, created_at, updated_at \
             FROM images ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(images)
    }

    pub async fn list_images_by_project(&self, project_id: Uuid) -> ApiResult<Vec<Image>> {
        let images = sqlx::query_as::<_, Image>(
            "SELECT id, project_id, original_url, staged_url, status, error, room_type, style, seed, created_at, updated_at \
             FROM images WHERE project_id = $1 ORDER BY created_at DESC",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(images)
    }

    /// Refuses to transition out of a terminal status (`ready`/`error`)
    /// unless `override_terminal` is set — the reconciler is the only
    /// caller that ever passes `true`.
    pub async fn set_status(
        &self,
        id: Uuid,
        status: ImageStatus,
        error: Option<&str>,
        staged_url: Option<&str>,
        override_terminal: bool,
    ) -> ApiResult<Image> {
        validate_status_args(status, error, staged_url)?;

        let mut tx = self.acquire_tx().await?;

        let current = sqlx::query_as::<_, Image>(
            "SELECT id, project_id, original_url, staged_url, status, error, room_type, style, seed, created_at, updated_at \
             FROM images WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(tx.as_mut())
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("image {id} not found")))?;

        if current.status.is_terminal() && !override_terminal {
            // `tx` is dropped here uncommitted, which rolls back the `FOR
            // UPDATE` lock — matches `Tx::release(false)`'s semantics.
            return Err(ApiError::Conflict(format!(
                "image {id} is already in terminal status {}",
                current.status.as_str()
            )));
        }

        let image = sqlx::query_as::<_, Image>(
            "UPDATE images SET status = $2, error = $3, staged_url = $4, updated_at = now() \
             WHERE id = $1 \
             RETURNING id, project_id, original_url, staged_url, status, error, room_type, style, seed, created_at, updated_at",
        )
        .bind(id)
        .bind(status)
        .bind(error)
        .bind(staged_url)
        .fetch_one(tx.as_mut())
        .await?;

        self.release_tx(tx, true).await?;
        Ok(image)
    }

    pub async fn bump_job_attempt(&self, image_id: Uuid, state: JobState) -> ApiResult<()> {
        sqlx::query(
            "UPDATE jobs SET attempt = attempt + 1, state = $2, updated_at = now() \
             WHERE image_id = $1",
        )
        .bind(image_id)
        .bind(state)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_job_state(&self, image_id: Uuid, state: JobState) -> ApiResult<()> {
        sqlx::query("UPDATE jobs SET state = $2, updated_at = now() WHERE image_id = $1")
            .bind(image_id)
            .bind(state)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ── Billing (upserted by the webhook ingestor, C8) ──────────────────

    pub async fn get_processed_event(&self, stripe_event_id: &str) -> ApiResult<Option<ProcessedEvent>> {
        let event = sqlx::query_as::<_, ProcessedEvent>(
            "SELECT id, stripe_event_id, event_type, payload, received_at \
             FROM processed_events WHERE stripe_event_id = $1",
        )
        .bind(stripe_event_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(event)
    }

    /// Inserts the processed-event marker. Returns `true` if this call
    /// created the row (i.e. this was genuinely the first delivery).
    /// Modeled as a unique index plus an upsert that reports whether a row
    /// pre-existed, per the idempotency design note — never read-then-write.
    pub async fn mark_processed(
        &self,
        stripe_event_id: &str,
        event_type: &str,
        payload: &serde_json::Value,
    ) -> ApiResult<bool> {
        let inserted: Option<(Uuid,)> = sqlx::query_as(
            "INSERT INTO processed_events (id, stripe_event_id, event_type, payload, received_at) \
             VALUES ($1, $2, $3, $4, now()) \
             ON CONFLICT (stripe_event_id) DO NOTHING \
             RETURNING id",
        )
        .bind(Uuid::new_v4())
        .bind(stripe_event_id)
        .bind(event_type)
        .bind(payload)
        .fetch_optional(&self.pool)
        .await?;
        Ok(inserted.is_some())
    }

    pub async fn upsert_subscription(&self, user_id: Uuid, sub: &SubscriptionUpsert<'_>) -> ApiResult<()> {
        sqlx::query(
            "INSERT INTO subscriptions \
             (id, user_id, stripe_subscription_id, status, price_id, current_period_start, current_period_end, cancel_at_period_end, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, now(), now()) \
             ON CONFLICT (stripe_subscription_id) DO UPDATE SET \
               status = EXCLUDED.status, \
               price_id = EXCLUDED.price_id, \
               current_period_start = EXCLUDED.current_period_start, \
               current_period_end = EXCLUDED.current_period_end, \
               cancel_at_period_end = EXCLUDED.cancel_at_period_end, \
               updated_at = now()",
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(sub.stripe_subscription_id)
        .bind(sub.status)
        .bind(sub.price_id)
        .bind(sub.current_period_start)
        .bind(sub.current_period_end)
        .bind(sub.cancel_at_period_end)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn upsert_invoice(&self, user_id: Uuid, inv: &InvoiceUpsert<'_>) -> ApiResult<()> {
        sqlx::query(
            "INSERT INTO invoices \
             (id, user_id, stripe_invoice_id, stripe_subscription_id, status, amount_due, amount_paid, currency, number, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, now(), now()) \
             ON CONFLICT (stripe_invoice_id) DO UPDATE SET \
               status = EXCLUDED.status, \
               amount_due = EXCLUDED.amount_due, \
               amount_paid = EXCLUDED.amount_paid, \
               currency = EXCLUDED.currency, \
               number = EXCLUDED.number, \
               updated_at = now()",
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(inv.stripe_invoice_id)
        .bind(inv.stripe_subscription_id)
        .bind(inv.status)
        .bind(inv.amount_due)
        .bind(inv.amount_paid)
        .bind(inv.currency)
        .bind(inv.number)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_plans(&self) -> ApiResult<Vec<Plan>> {
        let plans = sqlx::query_as::<_, Plan>(
            "SELECT id, name, stripe_price_id, monthly_image_quota FROM plans ORDER BY monthly_image_quota",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(plans)
    }
}

pub struct SubscriptionUpsert<'a> {
    pub stripe_subscription_id: &'a str,
    pub status: &'a str,
    pub price_id: Option<&'a str>,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
}

pub struct InvoiceUpsert<'a> {
    pub stripe_invoice_id: &'a str,
    pub stripe_subscription_id: Option<&'a str>,
    pub status: &'a str,
    pub amount_due: i64,
    pub amount_paid: i64,
    pub currency: &'a str,
    pub number: Option<&'a str>,
}

/// Guard clause for `set_status`, extracted so it's testable without a live
/// pool (§8 — `status=ready ⇔ staged_url ≠ null`, `status=error ⇔ error ≠ null`).
fn validate_status_args(status: ImageStatus, error: Option<&str>, staged_url: Option<&str>) -> ApiResult<()> {
    if status == ImageStatus::Ready && staged_url.is_none() {
        return Err(ApiError::Internal("ready status requires a staged_url".into()));
    }
    if status == ImageStatus::Error && error.is_none() {
        return Err(ApiError::Internal("error status requires an error message".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // `ImageStore` is exercised against a real Postgres instance in
    // integration tests (migrations use Postgres-only syntax like `now()`
    // and `FOR UPDATE`); these unit tests cover the pure guard clause at
    // the top of `set_status` without needing a live pool.

    #[test]
    fn ready_status_without_staged_url_is_rejected_before_any_query() {
        let err = validate_status_args(ImageStatus::Ready, None, None);
        assert!(matches!(err, Err(ApiError::Internal(_))));
    }

    #[test]
    fn error_status_without_message_is_rejected() {
        let err = validate_status_args(ImageStatus::Error, None, None);
        assert!(matches!(err, Err(ApiError::Internal(_))));
    }

    #[test]
    fn queued_and_processing_need_neither_field() {
        assert!(validate_status_args(ImageStatus::Queued, None, None).is_ok());
        assert!(validate_status_args(ImageStatus::Processing, None, None).is_ok());
    }
}
