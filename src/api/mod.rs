//! HTTP admin API. Handlers translate requests into library calls and nothing more.
pub mod checks;
pub mod providers;
pub mod records;
pub mod zones;

use axum::{
    Extension, Router,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::SharedState;

pub fn create_router(state: SharedState) -> Router {
    Router::new()
        // providers
        .route(
            "/api/providers",
            get(providers::list_providers).post(providers::create_provider),
        )
        .route(
            "/api/providers/{id}",
            get(providers::get_provider)
                .patch(providers::update_provider)
                .delete(providers::delete_provider),
        )
        .route("/api/providers/{id}/test", post(providers::test_provider))
        .route("/api/providers/{id}/sync", post(providers::sync_provider))
        .route("/api/sync", post(providers::sync_all))
        // zones
        .route(
            "/api/providers/{id}/zones",
            get(zones::list_provider_zones).post(zones::create_zone),
        )
        .route("/api/zones", get(zones::list_zones))
        .route(
            "/api/zones/{id}",
            get(zones::get_zone)
                .patch(zones::update_zone)
                .delete(zones::delete_zone),
        )
        .route("/api/zones/{id}/sync", post(zones::sync_zone))
        .route("/api/zones/{id}/export", get(zones::export_zone))
        // records
        .route(
            "/api/zones/{id}/records",
            get(records::list_records).post(records::create_record),
        )
        .route(
            "/api/records/{id}",
            get(records::get_record)
                .patch(records::update_record)
                .delete(records::delete_record),
        )
        // dnssec
        .route("/api/zones/{id}/dnssec/enable", post(checks::enable_dnssec))
        .route("/api/zones/{id}/dnssec/disable", post(checks::disable_dnssec))
        .route(
            "/api/zones/{id}/dnssec/keys",
            get(checks::list_keys).post(checks::generate_keys),
        )
        .route(
            "/api/zones/{id}/dnssec/keys/{key_id}/activate",
            post(checks::activate_key),
        )
        .route("/api/zones/{id}/dnssec/rollover", post(checks::rollover))
        .route("/api/zones/{id}/dnssec/validate", get(checks::validate_dnssec))
        .route("/api/dnssec/enable", post(checks::enable_many))
        // diagnostics
        .route("/api/fcrdns", get(checks::fcrdns))
        .layer(Extension(state))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
