pub use axum::extract::{
    ConnectInfo, DefaultBodyLimit, Form, FromRef, FromRequest, FromRequestParts,
    MatchedPath, OptionalFromRequestParts, OriginalUri, Path, Query, RawPathParams, Request,
    State,
};
