//! User administration endpoints.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    routing::{delete, get, post, put},
};
use serde::Deserialize;

use omms_auth::catalog::codes;
use omms_auth::{Guard, NewUser, User, UserPatch};
use omms_core::{Page, RoleId, UserId};
use omms_infra::UserFilter;

use super::auth::PermissionsView;
use super::{Message, parse_id};
use crate::app::errors::ApiResult;
use crate::app::state::AppState;
use crate::middleware::guarded;

#[derive(Debug, Default, Deserialize)]
pub struct ListUsersQuery {
    pub skip: Option<u32>,
    pub limit: Option<u32>,
    pub username: Option<String>,
    pub email: Option<String>,
    pub is_active: Option<bool>,
    pub is_superuser: Option<bool>,
}

pub fn router() -> Router {
    Router::new()
        .route("/", guarded(get(list_users), Guard::permissions([codes::USER_LIST])))
        .route("/", guarded(post(create_user), Guard::permissions([codes::USER_CREATE])))
        .route("/:id", guarded(get(get_user), Guard::permissions([codes::USER_READ])))
        .route("/:id", guarded(put(update_user), Guard::permissions([codes::USER_UPDATE])))
        .route("/:id", guarded(delete(delete_user), Guard::permissions([codes::USER_DELETE])))
        .route(
            "/:id/permissions",
            guarded(get(user_permissions), Guard::permissions([codes::USER_READ_PERMISSIONS])),
        )
        .route(
            "/:id/roles/:role_id",
            guarded(post(assign_role), Guard::permissions([codes::USER_ASSIGN_ROLE])),
        )
        .route(
            "/:id/roles/:role_id",
            guarded(delete(remove_role), Guard::permissions([codes::USER_REMOVE_ROLE])),
        )
}

/// GET /auth/users
pub async fn list_users(
    Extension(state): Extension<Arc<AppState>>,
    Query(q): Query<ListUsersQuery>,
) -> ApiResult<Json<Vec<User>>> {
    let filter = UserFilter {
        username: q.username,
        email: q.email,
        is_active: q.is_active,
        is_superuser: q.is_superuser,
    };
    let users = state
        .directory
        .list_users(&filter, Page::new(q.skip, q.limit))
        .await?;
    Ok(Json(users))
}

/// POST /auth/users
pub async fn create_user(
    Extension(state): Extension<Arc<AppState>>,
    Json(body): Json<NewUser>,
) -> ApiResult<(StatusCode, Json<User>)> {
    let user = state.directory.create_user(body).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

/// GET /auth/users/:id
pub async fn get_user(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<User>> {
    let id: UserId = parse_id(&id)?;
    Ok(Json(state.directory.get_user(id).await?))
}

/// PUT /auth/users/:id
pub async fn update_user(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<UserPatch>,
) -> ApiResult<Json<User>> {
    let id: UserId = parse_id(&id)?;
    Ok(Json(state.directory.update_user(id, body).await?))
}

/// DELETE /auth/users/:id
pub async fn delete_user(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Message>> {
    let id: UserId = parse_id(&id)?;
    state.directory.delete_user(id).await?;
    Ok(Json(Message { message: "user deleted" }))
}

/// GET /auth/users/:id/permissions
pub async fn user_permissions(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<PermissionsView>> {
    let user_id: UserId = parse_id(&id)?;
    let permissions = state.resolver().resolve_user_permissions(user_id).await?;
    Ok(Json(PermissionsView {
        user_id,
        permissions: permissions.into_iter().collect(),
    }))
}

/// POST /auth/users/:id/roles/:role_id
pub async fn assign_role(
    Extension(state): Extension<Arc<AppState>>,
    Path((id, role_id)): Path<(String, String)>,
) -> ApiResult<Json<User>> {
    let id: UserId = parse_id(&id)?;
    let role_id: RoleId = parse_id(&role_id)?;
    Ok(Json(state.directory.assign_role(id, role_id).await?))
}

/// DELETE /auth/users/:id/roles/:role_id
pub async fn remove_role(
    Extension(state): Extension<Arc<AppState>>,
    Path((id, role_id)): Path<(String, String)>,
) -> ApiResult<Json<User>> {
    let id: UserId = parse_id(&id)?;
    let role_id: RoleId = parse_id(&role_id)?;
    Ok(Json(state.directory.remove_role(id, role_id).await?))
}
