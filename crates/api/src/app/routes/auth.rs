//! Login and "who am I" endpoints.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::Extension,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use omms_auth::{Guard, PermissionCode, User};
use omms_core::UserId;
use omms_infra::LoginResponse;

use crate::app::errors::ApiResult;
use crate::app::state::AppState;
use crate::context::PrincipalContext;
use crate::middleware::guarded;

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct PermissionsView {
    pub user_id: UserId,
    pub permissions: Vec<PermissionCode>,
}

/// Routes reachable without a token.
pub fn public_router() -> Router {
    Router::new().route("/login", post(login))
}

pub fn router() -> Router {
    Router::new()
        .route("/me", guarded(get(me), Guard::authenticated()))
        .route("/me/permissions", guarded(get(my_permissions), Guard::authenticated()))
}

/// POST /auth/login
pub async fn login(
    Extension(state): Extension<Arc<AppState>>,
    Json(body): Json<LoginRequest>,
) -> ApiResult<Json<LoginResponse>> {
    Ok(Json(state.login.login(&body.username, &body.password).await?))
}

/// GET /auth/me - the caller's current account, read fresh from the store
pub async fn me(
    Extension(state): Extension<Arc<AppState>>,
    Extension(ctx): Extension<PrincipalContext>,
) -> ApiResult<Json<User>> {
    Ok(Json(state.directory.get_user(ctx.principal().user_id()).await?))
}

/// GET /auth/me/permissions - effective permissions as of now, not as of login
pub async fn my_permissions(
    Extension(state): Extension<Arc<AppState>>,
    Extension(ctx): Extension<PrincipalContext>,
) -> ApiResult<Json<PermissionsView>> {
    let user_id = ctx.principal().user_id();
    let permissions = state.resolver().resolve_user_permissions(user_id).await?;
    Ok(Json(PermissionsView {
        user_id,
        permissions: permissions.into_iter().collect(),
    }))
}
