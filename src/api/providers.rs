use axum::{
    Extension, Json,
    extract::{Path, Query},
    http::StatusCode,
};
use serde::Deserialize;

use crate::auth::Authenticated;
use crate::engine::providers::{
    self as engine, ConnectionTest, DeleteMode, ProviderPatch, ProviderRequest,
};
use crate::error::{AppError, AppResult};
use crate::models::Provider;
use crate::sync::{self, SyncReport};
use crate::SharedState;

pub async fn list_providers(
    _: Authenticated,
    Extension(state): Extension<SharedState>,
) -> AppResult<Json<Vec<Provider>>> {
    Ok(Json(engine::list_providers(&state).await?))
}

pub async fn get_provider(
    _: Authenticated,
    Extension(state): Extension<SharedState>,
    Path(id): Path<i64>,
) -> AppResult<Json<Provider>> {
    Ok(Json(state.provider(id).await?))
}

pub async fn create_provider(
    _: Authenticated,
    Extension(state): Extension<SharedState>,
    Json(req): Json<ProviderRequest>,
) -> AppResult<(StatusCode, Json<Provider>)> {
    let provider = engine::create_provider(&state, req).await?;
    Ok((StatusCode::CREATED, Json(provider)))
}

pub async fn update_provider(
    _: Authenticated,
    Extension(state): Extension<SharedState>,
    Path(id): Path<i64>,
    Json(patch): Json<ProviderPatch>,
) -> AppResult<Json<Provider>> {
    Ok(Json(engine::update_provider(&state, id, patch).await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct DeleteQuery {
    /// refuse (default), cascade, force, or reassign together with `to`.
    pub mode: Option<String>,
    pub to: Option<i64>,
}

impl DeleteQuery {
    fn mode(&self) -> AppResult<DeleteMode> {
        match (self.mode.as_deref(), self.to) {
            (None | Some("refuse"), _) => Ok(DeleteMode::Refuse),
            (Some("cascade"), _) => Ok(DeleteMode::Cascade),
            (Some("force"), _) => Ok(DeleteMode::Force),
            (Some("reassign"), Some(to)) => Ok(DeleteMode::Reassign(to)),
            (Some("reassign"), None) => Err(AppError::validation("reassign needs `to`")),
            (Some(other), _) => Err(AppError::validation(format!("unknown delete mode '{other}'"))),
        }
    }
}

pub async fn delete_provider(
    _: Authenticated,
    Extension(state): Extension<SharedState>,
    Path(id): Path<i64>,
    Query(q): Query<DeleteQuery>,
) -> AppResult<StatusCode> {
    engine::delete_provider(&state, id, q.mode()?).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn test_provider(
    _: Authenticated,
    Extension(state): Extension<SharedState>,
    Path(id): Path<i64>,
) -> AppResult<Json<ConnectionTest>> {
    Ok(Json(engine::test_provider(&state, id).await?))
}

pub async fn sync_provider(
    _: Authenticated,
    Extension(state): Extension<SharedState>,
    Path(id): Path<i64>,
) -> AppResult<Json<SyncReport>> {
    Ok(Json(sync::sync_provider(&state, id).await?))
}

pub async fn sync_all(
    _: Authenticated,
    Extension(state): Extension<SharedState>,
) -> AppResult<Json<SyncReport>> {
    Ok(Json(sync::sync_all(&state).await?))
}
