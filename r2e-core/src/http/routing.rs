pub use axum::routing::{any, delete, get, patch, post, put, Route};
