//! C1 — Object-store gateway.
//!
//! Presigned PUT/GET issuance and HEAD probing against an S3-compatible
//! endpoint. Internal endpoint (used by the worker for direct GET/PUT) and
//! public endpoint (used for browser-facing presigned URLs) are separate so
//! the two audiences never collide.
//!
//! Presigning here is a simplified HMAC scheme (`expires`, `sig` query
//! params signed over method+key+expiry), not full AWS SigV4 — adequate for
//! a single shared-secret S3-compatible deployment and grounded in the same
//! HMAC-over-canonical-string approach used by the webhook verifier (C8).

use std::time::Duration;

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{ApiError, ApiResult};

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone, Copy, Debug)]
pub enum Disposition {
    Inline,
    Attachment,
}

#[derive(Clone, Debug)]
pub struct HeadResult {
    pub exists: bool,
    pub size: Option<u64>,
}

#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    async fn presign_put(
        &self,
        key: &str,
        content_type: &str,
        max_bytes: u64,
        ttl: Duration,
    ) -> ApiResult<String>;

    async fn presign_get(
        &self,
        key: &str,
        ttl: Duration,
        disposition: Option<Disposition>,
    ) -> ApiResult<String>;

    async fn head(&self, key: &str) -> ApiResult<HeadResult>;

    async fn get_object(&self, key: &str) -> ApiResult<Vec<u8>>;

    async fn put_object(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> ApiResult<String>;
}

#[derive(Clone)]
pub struct S3CompatibleStore {
    client: reqwest::Client,
    bucket: String,
    internal_endpoint: String,
    public_endpoint: String,
    signing_key: Vec<u8>,
}

impl S3CompatibleStore {
    pub fn new(
        bucket: impl Into<String>,
        internal_endpoint: impl Into<String>,
        public_endpoint: impl Into<String>,
        signing_key: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            bucket: bucket.into(),
            internal_endpoint: internal_endpoint.into(),
            public_endpoint: public_endpoint.into(),
            signing_key: signing_key.into(),
        }
    }

    fn sign(&self, canonical: &str) -> ApiResult<String> {
        let mut mac = HmacSha256::new_from_slice(&self.signing_key)
            .map_err(|e| ApiError::Internal(format!("invalid signing key: {e}")))?;
        mac.update(canonical.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn object_url(&self, base: &str, key: &str) -> String {
        format!("{}/{}/{}", base.trim_end_matches('/'), self.bucket, key)
    }

    fn internal_object_url(&self, key: &str) -> String {
        self.object_url(&self.internal_endpoint, key)
    }

    /// Recovers the storage key from a URL this store produced (the reverse
    /// of `object_url`), for callers (the reconciler) that only have the
    /// persisted `staged_url`/`original_url` string to work with. Returns
    /// `None` for a URL that was never one of ours (an externally-sourced
    /// original, for instance).
    pub fn key_from_url<'a>(&self, url: &'a str) -> Option<&'a str> {
        for base in [&self.public_endpoint, &self.internal_endpoint] {
            let prefix = format!("{}/{}/", base.trim_end_matches('/'), self.bucket);
            if let Some(key) = url.strip_prefix(prefix.as_str()) {
                let key = key.split('?').next().unwrap_or(key);
                return Some(key);
            }
        }
        None
    }
}

/// Minimal hex encoding so we don't add a fourth encoding dependency for a
/// handful of bytes; kept local to this module.
mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        use std::fmt::Write;
        let mut s = String::with_capacity(bytes.as_ref().len() * 2);
        for b in bytes.as_ref() {
            let _ = write!(s, "{b:02x}");
        }
        s
    }
}

#[async_trait::async_trait]
impl ObjectStore for S3CompatibleStore {
    async fn presign_put(
        &self,
        key: &str,
        content_type: &str,
        max_bytes: u64,
        ttl: Duration,
    ) -> ApiResult<String> {
        let expires = chrono::Utc::now().timestamp() + ttl.as_secs() as i64;
        let canonical = format!("PUT\n{key}\n{content_type}\n{max_bytes}\n{expires}");
        let sig = self.sign(&canonical)?;
        let base = self.object_url(&self.public_endpoint, key);
        Ok(format!(
            "{base}?expires={expires}&max_bytes={max_bytes}&content_type={content_type}&sig={sig}"
        ))
    }

    async fn presign_get(
        &self,
        key: &str,
        ttl: Duration,
        disposition: Option<Disposition>,
    ) -> ApiResult<String> {
        let expires = chrono::Utc::now().timestamp() + ttl.as_secs() as i64;
        let disp = match disposition {
            Some(Disposition::Attachment) => "attachment",
            _ => "inline",
        };
        let canonical = format!("GET\n{key}\n{disp}\n{expires}");
        let sig = self.sign(&canonical)?;
        let base = self.object_url(&self.public_endpoint, key);
        Ok(format!("{base}?expires={expires}&disposition={disp}&sig={sig}"))
    }

    async fn head(&self, key: &str) -> ApiResult<HeadResult> {
        let url = self.internal_object_url(key);
        let resp = self
            .client
            .head(&url)
            .send()
            .await
            .map_err(|e| ApiError::StorageUnavailable(e.to_string()))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(HeadResult { exists: false, size: None });
        }
        if !resp.status().is_success() {
            return Err(ApiError::StorageUnavailable(format!(
                "HEAD {key} returned {}",
                resp.status()
            )));
        }
        let size = resp
            .headers()
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        Ok(HeadResult { exists: true, size })
    }

    async fn get_object(&self, key: &str) -> ApiResult<Vec<u8>> {
        let url = self.internal_object_url(key);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ApiError::StorageUnavailable(e.to_string()))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ApiError::NotFound(format!("object {key} not found")));
        }
        if !resp.status().is_success() {
            return Err(ApiError::StorageUnavailable(format!(
                "GET {key} returned {}",
                resp.status()
            )));
        }
        Ok(resp
            .bytes()
            .await
            .map_err(|e| ApiError::StorageUnavailable(e.to_string()))?
            .to_vec())
    }

    async fn put_object(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> ApiResult<String> {
        let url = self.internal_object_url(key);
        let resp = self
            .client
            .put(&url)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await
            .map_err(|e| ApiError::StorageUnavailable(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(ApiError::StorageUnavailable(format!(
                "PUT {key} returned {}",
                resp.status()
            )));
        }
        Ok(self.object_url(&self.public_endpoint, key))
    }
}

/// `uploads/{user_id}/{uuid}.{ext}`
pub fn upload_key(user_id: uuid::Uuid, ext: &str) -> String {
    format!("uploads/{user_id}/{}.{ext}", uuid::Uuid::new_v4())
}

/// `staged/{user_id}/{uuid}.{ext}`
pub fn staged_key(user_id: uuid::Uuid, ext: &str) -> String {
    format!("staged/{user_id}/{}.{ext}", uuid::Uuid::new_v4())
}
