//! The [`Controller`] trait that `#[derive(Controller)]` + `#[routes]`
//! implement for you, and the [`StatefulConstruct`] trait used to build a
//! controller instance straight out of application state.

use crate::config::{MissingKeyError, R2eConfig};
use crate::http::Router;
use crate::meta::MetaRegistry;
use std::any::Any;

/// A set of HTTP routes, wired to application state `S`, plus the
/// housekeeping a controller needs from the builder: metadata for
/// introspection plugins (OpenAPI, health), pre-auth guard middleware,
/// event consumer registration, scheduled task collection, and config
/// validation.
///
/// You never implement this by hand — `#[derive(Controller)]` on the
/// struct and `#[routes]` on its `impl` block generate it.
pub trait Controller<S>: Sized {
    /// Build the Axum router for this controller's routes.
    fn routes() -> Router<S>;

    /// Push this controller's route/SSE/WS metadata into the shared registry.
    fn register_meta(_registry: &mut MetaRegistry) {}

    /// Wrap pre-auth-guarded routes with their guard middleware.
    ///
    /// Only routes using `#[pre_guard(...)]` need this; the default is a
    /// no-op for controllers that don't use it.
    fn apply_pre_auth_guards(router: Router<S>, _state: &S) -> Router<S> {
        router
    }

    /// Start this controller's `#[consumer(bus = "...")]` methods, if any.
    fn register_consumers(_state: &S) {}

    /// Collect this controller's `#[scheduled]` methods as type-erased
    /// tasks for the scheduler plugin to pick up.
    fn scheduled_tasks_boxed(_state: &S) -> Vec<Box<dyn Any + Send>> {
        Vec::new()
    }

    /// Check that every `#[config("...")]` / `#[config(section = ...)]`
    /// field this controller declares is present, returning the missing
    /// ones instead of panicking.
    fn validate_config(_config: &R2eConfig) -> Vec<MissingKeyError> {
        Vec::new()
    }
}

/// Construct `Self` directly out of application state `S`.
///
/// Generated by `#[derive(Controller)]` for controllers with no
/// `#[inject(identity)]` fields, since those require per-request identity
/// extraction and instead go through the generated Axum extractor.
pub trait StatefulConstruct<S> {
    fn from_state(state: &S) -> Self;
}
