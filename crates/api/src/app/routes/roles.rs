use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    routing::{delete, get, post, put},
};
use serde::Deserialize;

use omms_auth::catalog::codes;
use omms_auth::{Guard, NewRole, Role, RolePatch};
use omms_core::{Page, PermissionId, RoleId};
use omms_infra::RoleFilter;

use super::{Message, parse_id};
use crate::app::errors::ApiResult;
use crate::app::state::AppState;
use crate::middleware::guarded;

#[derive(Debug, Default, Deserialize)]
pub struct ListRolesQuery {
    pub skip: Option<u32>,
    pub limit: Option<u32>,
    pub name: Option<String>,
}

pub fn router() -> Router {
    Router::new()
        .route("/", guarded(get(list_roles), Guard::permissions([codes::ROLE_LIST])))
        .route("/", guarded(post(create_role), Guard::permissions([codes::ROLE_CREATE])))
        .route("/:id", guarded(get(get_role), Guard::permissions([codes::ROLE_READ])))
        .route("/:id", guarded(put(update_role), Guard::permissions([codes::ROLE_UPDATE])))
        .route("/:id", guarded(delete(delete_role), Guard::permissions([codes::ROLE_DELETE])))
        .route(
            "/:id/permissions/:permission_id",
            guarded(post(grant_permission), Guard::permissions([codes::ROLE_ASSIGN_PERMISSION])),
        )
        .route(
            "/:id/permissions/:permission_id",
            guarded(delete(revoke_permission), Guard::permissions([codes::ROLE_REMOVE_PERMISSION])),
        )
}

pub async fn list_roles(
    Extension(state): Extension<Arc<AppState>>,
    Query(q): Query<ListRolesQuery>,
) -> ApiResult<Json<Vec<Role>>> {
    let filter = RoleFilter { name: q.name };
    Ok(Json(state.directory.list_roles(&filter, Page::new(q.skip, q.limit)).await?))
}

pub async fn create_role(
    Extension(state): Extension<Arc<AppState>>,
    Json(body): Json<NewRole>,
) -> ApiResult<(StatusCode, Json<Role>)> {
    let role = state.directory.create_role(body).await?;
    tracing::info!(role_id = %role.id, name = %role.name, "role created");
    Ok((StatusCode::CREATED, Json(role)))
}

pub async fn get_role(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Role>> {
    let id: RoleId = parse_id(&id)?;
    Ok(Json(state.directory.get_role(id).await?))
}

pub async fn update_role(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<RolePatch>,
) -> ApiResult<Json<Role>> {
    let id: RoleId = parse_id(&id)?;
    Ok(Json(state.directory.update_role(id, body).await?))
}

pub async fn delete_role(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Message>> {
    let id: RoleId = parse_id(&id)?;
    state.directory.delete_role(id).await?;
    tracing::info!(role_id = %id, "role deleted");
    Ok(Json(Message { message: "role deleted" }))
}

pub async fn grant_permission(
    Extension(state): Extension<Arc<AppState>>,
    Path((id, permission_id)): Path<(String, String)>,
) -> ApiResult<Json<Role>> {
    let id: RoleId = parse_id(&id)?;
    let permission_id: PermissionId = parse_id(&permission_id)?;
    Ok(Json(state.directory.grant_permission(id, permission_id).await?))
}

pub async fn revoke_permission(
    Extension(state): Extension<Arc<AppState>>,
    Path((id, permission_id)): Path<(String, String)>,
) -> ApiResult<Json<Role>> {
    let id: RoleId = parse_id(&id)?;
    let permission_id: PermissionId = parse_id(&permission_id)?;
    Ok(Json(state.directory.revoke_permission(id, permission_id).await?))
}
