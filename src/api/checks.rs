//! DNSSEC lifecycle and FCrDNS endpoints.
use std::net::IpAddr;
use std::time::Duration;

use axum::{
    Extension, Json,
    extract::{Path, Query},
};
use serde::Deserialize;

use crate::SharedState;
use crate::auth::Authenticated;
use crate::dnssec::{self, BulkResult, DnssecValidation, RolloverReport};
use crate::error::AppResult;
use crate::fcrdns::{self, FcrDnsReport};
use crate::models::{DnssecKey, KeyType, Zone};

pub async fn enable_dnssec(
    _: Authenticated,
    Extension(state): Extension<SharedState>,
    Path(id): Path<i64>,
) -> AppResult<Json<Zone>> {
    Ok(Json(dnssec::enable(&state, id).await?))
}

pub async fn disable_dnssec(
    _: Authenticated,
    Extension(state): Extension<SharedState>,
    Path(id): Path<i64>,
) -> AppResult<Json<Zone>> {
    Ok(Json(dnssec::disable(&state, id).await?))
}

pub async fn list_keys(
    _: Authenticated,
    Extension(state): Extension<SharedState>,
    Path(id): Path<i64>,
) -> AppResult<Json<Vec<DnssecKey>>> {
    Ok(Json(dnssec::list_keys(&state, id).await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct GenerateKeysRequest {
    pub algorithm: Option<String>,
}

pub async fn generate_keys(
    _: Authenticated,
    Extension(state): Extension<SharedState>,
    Path(id): Path<i64>,
    Json(req): Json<GenerateKeysRequest>,
) -> AppResult<Json<Vec<DnssecKey>>> {
    Ok(Json(
        dnssec::generate_keys(&state, id, req.algorithm.as_deref()).await?,
    ))
}

pub async fn activate_key(
    _: Authenticated,
    Extension(state): Extension<SharedState>,
    Path((id, key_id)): Path<(i64, String)>,
) -> AppResult<Json<DnssecKey>> {
    Ok(Json(dnssec::activate_key(&state, id, &key_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct RolloverRequest {
    pub key_type: KeyType,
    #[serde(default)]
    pub confirm: bool,
}

pub async fn rollover(
    _: Authenticated,
    Extension(state): Extension<SharedState>,
    Path(id): Path<i64>,
    Json(req): Json<RolloverRequest>,
) -> AppResult<Json<RolloverReport>> {
    Ok(Json(
        dnssec::rollover(&state, id, req.key_type, req.confirm).await?,
    ))
}

pub async fn validate_dnssec(
    _: Authenticated,
    Extension(state): Extension<SharedState>,
    Path(id): Path<i64>,
) -> AppResult<Json<DnssecValidation>> {
    Ok(Json(dnssec::validate(&state, id).await?))
}

#[derive(Debug, Deserialize)]
pub struct EnableManyRequest {
    pub zone_ids: Vec<i64>,
}

pub async fn enable_many(
    _: Authenticated,
    Extension(state): Extension<SharedState>,
    Json(req): Json<EnableManyRequest>,
) -> Json<Vec<BulkResult>> {
    Json(dnssec::enable_many(&state, &req.zone_ids).await)
}

#[derive(Debug, Deserialize)]
pub struct FcrDnsQuery {
    pub fqdn: String,
    pub ip: IpAddr,
    /// Poll for this many seconds before the final check.
    pub wait: Option<u64>,
}

pub async fn fcrdns(
    _: Authenticated,
    Extension(state): Extension<SharedState>,
    Query(q): Query<FcrDnsQuery>,
) -> Json<FcrDnsReport> {
    let lookup = state.lookup.as_ref();
    if let Some(secs) = q.wait {
        fcrdns::wait_for_propagation(
            lookup,
            &q.fqdn,
            q.ip,
            Duration::from_secs(secs),
            state.config.propagation.interval,
        )
        .await;
    }
    Json(fcrdns::validate(lookup, &q.fqdn, q.ip).await)
}
