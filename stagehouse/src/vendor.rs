//! Model vendor registry (§9 — "tagged variants over inheritance"). The
//! registry is a closed set (`qwen`, `flux-kontext`) with a per-variant
//! input builder and a dispatch keyed by the configured `model_id`; adding
//! a vendor means adding an enum arm, never touching call sites.

use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelVariant {
    Qwen,
    FluxKontext,
}

impl ModelVariant {
    /// `model_id` is a vendor-qualified string, e.g. `qwen/qwen-image-edit`
    /// or `black-forest-labs/flux-kontext`. Only the vendor prefix is
    /// dispatched on; the remainder selects the specific checkpoint within
    /// that vendor's API (carried through verbatim in the input payload).
    pub fn resolve(model_id: &str) -> Option<Self> {
        let vendor = model_id.split('/').next()?;
        match vendor {
            "qwen" => Some(ModelVariant::Qwen),
            "black-forest-labs" | "flux-kontext" => Some(ModelVariant::FluxKontext),
            _ => None,
        }
    }

    fn endpoint(self) -> &'static str {
        match self {
            ModelVariant::Qwen => "https://api.qwen.example/v1/images/edits",
            ModelVariant::FluxKontext => "https://api.flux-kontext.example/v1/edit",
        }
    }
}

/// Vendor-specific input built from `{image_bytes, prompt, seed}` (§4.6
/// step 4). The two known vendors share this shape today; a future vendor
/// with a genuinely different payload gets its own builder + enum arm
/// rather than a conditional inside this one.
#[derive(Serialize)]
pub struct ModelInput {
    #[serde(skip)]
    pub image_bytes: Vec<u8>,
    pub prompt: String,
    pub seed: Option<i64>,
}

impl ModelInput {
    pub fn build(_variant: ModelVariant, image_bytes: Vec<u8>, room_type: Option<&str>, style: Option<&str>, seed: Option<i64>) -> Self {
        Self { image_bytes, prompt: build_prompt(room_type, style), seed }
    }
}

fn build_prompt(room_type: Option<&str>, style: Option<&str>) -> String {
    match (room_type, style) {
        (Some(room), Some(style)) => format!("Restage this {room} in {style} style."),
        (Some(room), None) => format!("Restage this {room}."),
        (None, Some(style)) => format!("Restage this room in {style} style."),
        (None, None) => "Restage this room.".to_string(),
    }
}

pub enum VendorError {
    /// 4xx — the request itself is wrong; retrying will not help (§4.6 step 5).
    NonRetryable(String),
    /// 5xx/timeout — the queue adapter will back off and redeliver.
    Retryable(String),
}

#[async_trait::async_trait]
pub trait ModelClient: Send + Sync {
    async fn invoke(&self, variant: ModelVariant, input: &ModelInput) -> Result<Vec<u8>, VendorError>;
    async fn fetch_external(&self, url: &str) -> Result<Vec<u8>, VendorError>;
}

#[derive(Clone)]
pub struct ReqwestModelClient {
    client: reqwest::Client,
    api_key: Option<String>,
}

impl ReqwestModelClient {
    pub fn new(api_key: Option<String>) -> Self {
        Self { client: reqwest::Client::new(), api_key }
    }
}

#[async_trait::async_trait]
impl ModelClient for ReqwestModelClient {
    async fn invoke(&self, variant: ModelVariant, input: &ModelInput) -> Result<Vec<u8>, VendorError> {
        let mut request = self
            .client
            .post(variant.endpoint())
            .multipart(
                reqwest::multipart::Form::new()
                    .text("prompt", input.prompt.clone())
                    .part(
                        "image",
                        reqwest::multipart::Part::bytes(input.image_bytes.clone()).file_name("source.png"),
                    ),
            );
        if let Some(seed) = input.seed {
            request = request.query(&[("seed", seed)]);
        }
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                VendorError::Retryable(format!("vendor timeout: {e}"))
            } else {
                VendorError::Retryable(format!("vendor request failed: {e}"))
            }
        })?;

        let status = response.status();
        if status.is_client_error() {
            return Err(VendorError::NonRetryable(format!("vendor rejected request: {status}")));
        }
        if !status.is_success() {
            return Err(VendorError::Retryable(format!("vendor returned {status}")));
        }

        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| VendorError::Retryable(format!("failed to read vendor response: {e}")))
    }

    async fn fetch_external(&self, url: &str) -> Result<Vec<u8>, VendorError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| VendorError::Retryable(format!("fetch of original failed: {e}")))?;
        let status = response.status();
        if status.is_client_error() {
            return Err(VendorError::NonRetryable(format!("original fetch rejected: {status}")));
        }
        if !status.is_success() {
            return Err(VendorError::Retryable(format!("original fetch returned {status}")));
        }
        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| VendorError::Retryable(format!("failed to read original bytes: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_picks_the_vendor_by_model_id_prefix() {
        assert_eq!(ModelVariant::resolve("qwen/qwen-image-edit"), Some(ModelVariant::Qwen));
        assert_eq!(
            ModelVariant::resolve("black-forest-labs/flux-kontext-pro"),
            Some(ModelVariant::FluxKontext)
        );
        assert_eq!(ModelVariant::resolve("unknown-vendor/model"), None);
    }

    #[test]
    fn prompt_combines_room_type_and_style_when_both_present() {
        assert_eq!(build_prompt(Some("bedroom"), Some("modern")), "Restage this bedroom in modern style.");
        assert_eq!(build_prompt(None, None), "Restage this room.");
    }
}
