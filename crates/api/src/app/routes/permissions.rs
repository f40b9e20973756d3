use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    routing::{delete, get, post, put},
};
use serde::Deserialize;

use omms_auth::catalog::codes;
use omms_auth::{Guard, NewPermission, Permission, PermissionPatch};
use omms_core::{Page, PermissionId};
use omms_infra::PermissionFilter;

use super::{Message, parse_id};
use crate::app::errors::ApiResult;
use crate::app::state::AppState;
use crate::middleware::guarded;

#[derive(Debug, Default, Deserialize)]
pub struct ListPermissionsQuery {
    pub skip: Option<u32>,
    pub limit: Option<u32>,
    pub code: Option<String>,
    pub name: Option<String>,
}

pub fn router() -> Router {
    Router::new()
        .route("/", guarded(get(list_permissions), Guard::permissions([codes::PERMISSION_LIST])))
        .route("/", guarded(post(create_permission), Guard::permissions([codes::PERMISSION_CREATE])))
        .route("/:id", guarded(get(get_permission), Guard::permissions([codes::PERMISSION_READ])))
        .route("/:id", guarded(put(update_permission), Guard::permissions([codes::PERMISSION_UPDATE])))
        .route("/:id", guarded(delete(delete_permission), Guard::permissions([codes::PERMISSION_DELETE])))
}

pub async fn list_permissions(
    Extension(state): Extension<Arc<AppState>>,
    Query(q): Query<ListPermissionsQuery>,
) -> ApiResult<Json<Vec<Permission>>> {
    let filter = PermissionFilter {
        code: q.code,
        name: q.name,
    };
    let permissions = state
        .directory
        .list_permissions(&filter, Page::new(q.skip, q.limit))
        .await?;
    Ok(Json(permissions))
}

pub async fn create_permission(
    Extension(state): Extension<Arc<AppState>>,
    Json(body): Json<NewPermission>,
) -> ApiResult<(StatusCode, Json<Permission>)> {
    let permission = state.directory.create_permission(body).await?;
    tracing::info!(permission_id = %permission.id, code = %permission.code, "permission created");
    Ok((StatusCode::CREATED, Json(permission)))
}

pub async fn get_permission(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Permission>> {
    let id: PermissionId = parse_id(&id)?;
    Ok(Json(state.directory.get_permission(id).await?))
}

pub async fn update_permission(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<PermissionPatch>,
) -> ApiResult<Json<Permission>> {
    let id: PermissionId = parse_id(&id)?;
    Ok(Json(state.directory.update_permission(id, body).await?))
}

pub async fn delete_permission(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Message>> {
    let id: PermissionId = parse_id(&id)?;
    state.directory.delete_permission(id).await?;
    tracing::info!(permission_id = %id, "permission deleted");
    Ok(Json(Message { message: "permission deleted" }))
}
