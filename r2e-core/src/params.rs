use crate::http::response::{IntoResponse, Response};
use crate::http::{Json, StatusCode};

/// Error type for parameter extraction failures in `#[derive(Params)]`.
#[derive(Debug)]
pub struct ParamError {
    pub message: String,
}

impl std::fmt::Display for ParamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl IntoResponse for ParamError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.message });
        (StatusCode::BAD_REQUEST, Json(body)).into_response()
    }
}

impl From<ParamError> for Response {
    fn from(err: ParamError) -> Self {
        err.into_response()
    }
}

/// Parse a query string into key-value pairs.
pub fn parse_query_string(query: Option<&str>) -> Vec<(String, String)> {
    match query {
        Some(q) => form_urlencoded::parse(q.as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect(),
        None => Vec::new(),
    }
}

/// Compose a nested `#[params(prefix = "...")]` field's query key with its
/// parent prefix. Empty prefix is the common case (top-level `Params` struct).
pub fn prefixed_key<'a>(prefix: &str, name: &'a str) -> std::borrow::Cow<'a, str> {
    if prefix.is_empty() {
        std::borrow::Cow::Borrowed(name)
    } else {
        std::borrow::Cow::Owned(format!("{prefix}{name}"))
    }
}

/// Extracts `Self` out of request parts given a query-key prefix, so that a
/// `#[derive(Params)]` struct nested inside another one (`#[params(prefix =
/// "...")]`) resolves its query keys relative to the parent's prefix.
///
/// `#[derive(Params)]` generates this impl, plus a top-level
/// [`FromRequestParts`](crate::http::extract::FromRequestParts) impl that
/// calls it with an empty prefix.
pub trait PrefixedExtract<S>: Sized {
    fn extract_prefixed(
        parts: &mut crate::http::header::Parts,
        state: &S,
        prefix: &str,
    ) -> impl std::future::Future<Output = Result<Self, Response>> + Send;
}

/// OpenAPI-facing description of a `#[derive(Params)]` struct's fields,
/// consumed by `r2e-openapi` to document query/path/header parameters.
pub trait ParamsMetadata {
    fn param_infos() -> Vec<crate::meta::ParamInfo>;
}
