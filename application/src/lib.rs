//! Application provides REST API for interacting with the [`Service`].

#![deny(
    nonstandard_style,
    rust_2018_idioms,
    rustdoc::all,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code
)]
#![forbid(non_ascii_idents)]
#![warn(
    clippy::allow_attributes,
    clippy::allow_attributes_without_reason,
    clippy::pedantic,
    clippy::wildcard_enum_match_arm,
    deprecated_in_future,
    missing_copy_implementations,
    missing_debug_implementations,
    missing_docs,
    unreachable_pub,
    unused_crate_dependencies,
    unused_import_braces,
    unused_labels,
    unused_lifetimes,
    unused_qualifications,
    unused_results
)]

pub mod api;
pub mod args;
pub mod config;
pub mod error;

use axum::{
    routing::{get, patch, post},
    Extension, Router,
};
// Used in binary.
use axum_client_ip as _;
use futures as _;
use tokio as _;
use tower_http as _;
use tracing_subscriber as _;

pub use self::{
    args::Args,
    config::Config,
    error::{AsError, Error},
};

/// [`Service`] with filled infrastructure dependencies.
///
/// [`Service`]: service::Service
pub type Service =
    service::Service<service::infra::Memory, service::infra::Ledger>;

/// Creates a new [`Router`] serving the REST API of the provided
/// [`Service`].
pub fn router(service: Service) -> Router {
    Router::new()
        .route("/cart/sync", post(api::cart::create))
        .route("/cart/sync/:code", post(api::cart::resolve))
        .route("/cart/process-payment", post(api::cart::process_payment))
        .route(
            "/cart/:session_id",
            get(api::cart::get).delete(api::cart::cancel),
        )
        .route("/cart/:session_id/status", patch(api::cart::update_status))
        .route("/healthz", get(api::healthz))
        .layer(Extension(service))
}
