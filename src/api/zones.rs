use axum::{
    Extension, Json,
    extract::{Path, Query},
    http::{StatusCode, header},
    response::IntoResponse,
};

use crate::SharedState;
use crate::auth::Authenticated;
use crate::engine::WriteOutcome;
use crate::engine::zones::{self as engine, DeleteZoneOptions, ZonePatch, ZoneRequest};
use crate::error::AppResult;
use crate::export;
use crate::models::Zone;
use crate::sync::{self, SyncReport};

pub async fn list_zones(
    _: Authenticated,
    Extension(state): Extension<SharedState>,
) -> AppResult<Json<Vec<Zone>>> {
    Ok(Json(engine::list_zones(&state, None).await?))
}

pub async fn list_provider_zones(
    _: Authenticated,
    Extension(state): Extension<SharedState>,
    Path(provider_id): Path<i64>,
) -> AppResult<Json<Vec<Zone>>> {
    state.provider(provider_id).await?;
    Ok(Json(engine::list_zones(&state, Some(provider_id)).await?))
}

pub async fn get_zone(
    _: Authenticated,
    Extension(state): Extension<SharedState>,
    Path(id): Path<i64>,
) -> AppResult<Json<Zone>> {
    Ok(Json(engine::get_zone(&state, id).await?))
}

pub async fn create_zone(
    _: Authenticated,
    Extension(state): Extension<SharedState>,
    Path(provider_id): Path<i64>,
    Json(req): Json<ZoneRequest>,
) -> AppResult<(StatusCode, Json<WriteOutcome<Zone>>)> {
    let outcome = engine::create_zone(&state, provider_id, req).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

pub async fn update_zone(
    _: Authenticated,
    Extension(state): Extension<SharedState>,
    Path(id): Path<i64>,
    Json(patch): Json<ZonePatch>,
) -> AppResult<Json<WriteOutcome<Zone>>> {
    Ok(Json(engine::update_zone(&state, id, patch).await?))
}

pub async fn delete_zone(
    _: Authenticated,
    Extension(state): Extension<SharedState>,
    Path(id): Path<i64>,
    Query(opts): Query<DeleteZoneOptions>,
) -> AppResult<Json<WriteOutcome<Zone>>> {
    Ok(Json(engine::delete_zone(&state, id, opts).await?))
}

pub async fn sync_zone(
    _: Authenticated,
    Extension(state): Extension<SharedState>,
    Path(id): Path<i64>,
) -> AppResult<Json<SyncReport>> {
    Ok(Json(sync::sync_zone(&state, id).await?))
}

pub async fn export_zone(
    _: Authenticated,
    Extension(state): Extension<SharedState>,
    Path(id): Path<i64>,
) -> AppResult<impl IntoResponse> {
    let text = export::export_zone(&state, id).await?;
    Ok(([(header::CONTENT_TYPE, "text/dns; charset=utf-8")], text))
}
