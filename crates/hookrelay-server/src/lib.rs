//! HTTP server for the hookrelay webhook relay.
//!
//! Wires the catalog, resolution cache, fan-out coordinator and delivery
//! worker pool behind an axum router:
//!
//! - `GET|POST /meta/webhook`: provider verification and notification intake
//! - `/admin/...`: catalog CRUD, cache and queue inspection, health
//! - `/`, `/healthz`, `/readyz`, `/metrics`

pub mod admin;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod handlers;
pub mod intake;
pub mod metrics;
pub mod observability;
pub mod server;
pub mod state;

pub use config::AppConfig;
pub use error::{ApiError, ApiResult};
pub use server::{HookRelayServer, ServerBuilder, build_app};
pub use state::AppState;
