use axum::{
    Extension, Json,
    extract::{Path, Query},
    http::StatusCode,
};

use crate::SharedState;
use crate::auth::Authenticated;
use crate::engine::WriteOutcome;
use crate::engine::records::{self as engine, DeleteRecordOptions, RecordPatch, RecordRequest};
use crate::error::AppResult;
use crate::models::Record;

pub async fn list_records(
    _: Authenticated,
    Extension(state): Extension<SharedState>,
    Path(zone_id): Path<i64>,
) -> AppResult<Json<Vec<Record>>> {
    Ok(Json(engine::list_records(&state, zone_id).await?))
}

pub async fn get_record(
    _: Authenticated,
    Extension(state): Extension<SharedState>,
    Path(id): Path<i64>,
) -> AppResult<Json<Record>> {
    Ok(Json(engine::get_record(&state, id).await?))
}

pub async fn create_record(
    _: Authenticated,
    Extension(state): Extension<SharedState>,
    Path(zone_id): Path<i64>,
    Json(req): Json<RecordRequest>,
) -> AppResult<(StatusCode, Json<WriteOutcome<Record>>)> {
    let outcome = engine::create_record(&state, zone_id, req).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

pub async fn update_record(
    _: Authenticated,
    Extension(state): Extension<SharedState>,
    Path(id): Path<i64>,
    Json(patch): Json<RecordPatch>,
) -> AppResult<Json<WriteOutcome<Record>>> {
    Ok(Json(engine::update_record(&state, id, patch).await?))
}

pub async fn delete_record(
    _: Authenticated,
    Extension(state): Extension<SharedState>,
    Path(id): Path<i64>,
    Query(opts): Query<DeleteRecordOptions>,
) -> AppResult<Json<WriteOutcome<Record>>> {
    Ok(Json(engine::delete_record(&state, id, opts).await?))
}
