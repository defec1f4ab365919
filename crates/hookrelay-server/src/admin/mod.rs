//! Admin API endpoints.
//!
//! # Endpoints
//!
//! ## Catalog
//!
//! - `GET|POST /business-accounts`
//! - `GET /business-accounts/{business_id}/apps`
//! - `POST /apps`, `GET /apps/{app_id}/phone-numbers`
//! - `POST /phone-numbers`, `GET /phone-numbers/{phone_number_id}/destinations`
//! - `GET|POST /destinations`, `PATCH /destinations/{id}`
//! - `POST /mappings`, `DELETE /mappings/{phone_number_id}/{destination_id}`
//!
//! ## System
//!
//! - `POST /system/cache/clear`, `DELETE /system/cache/{phone_number_id}`
//! - `GET /system/cache/stats`, `GET /system/queue/stats`
//! - `GET /system/queue/jobs?status=&limit=`, `GET /system/queue/jobs/{id}`
//! - `GET /health`

pub mod catalog;
pub mod system;

use axum::Router;
use axum::extract::FromRef;
use axum::routing::{delete, get, patch, post};

use crate::state::AppState;

/// Creates the admin routes, to be nested under `/admin`.
pub fn admin_routes<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    AppState: FromRef<S>,
{
    Router::new()
        .route(
            "/business-accounts",
            get(catalog::list_business_accounts).post(catalog::create_business_account),
        )
        .route(
            "/business-accounts/{business_id}/apps",
            get(catalog::list_apps),
        )
        .route("/apps", post(catalog::create_app))
        .route("/apps/{app_id}/phone-numbers", get(catalog::list_phone_numbers))
        .route("/phone-numbers", post(catalog::create_phone_number))
        .route(
            "/phone-numbers/{phone_number_id}/destinations",
            get(catalog::list_phone_number_destinations),
        )
        .route(
            "/destinations",
            get(catalog::list_destinations).post(catalog::create_destination),
        )
        .route("/destinations/{id}", patch(catalog::update_destination))
        .route("/mappings", post(catalog::upsert_mapping))
        .route(
            "/mappings/{phone_number_id}/{destination_id}",
            delete(catalog::delete_mapping),
        )
        .route("/system/cache/clear", post(system::clear_cache))
        .route(
            "/system/cache/{phone_number_id}",
            delete(system::invalidate_cache_entry),
        )
        .route("/system/cache/stats", get(system::cache_stats))
        .route("/system/queue/stats", get(system::queue_stats))
        .route("/system/queue/jobs", get(system::list_jobs))
        .route("/system/queue/jobs/{id}", get(system::get_job))
        .route("/health", get(system::health))
}
