//! C10 — HTTP surface. One controller per resource group; each is a thin
//! pass-through to the service/ingestor it wraps (§4.10 — "routing, auth
//! gate, error mapping; no business logic lives here").

pub mod admin;
pub mod images;
pub mod projects;
pub mod webhook;
