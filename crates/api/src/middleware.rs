use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::MethodRouter,
};
use chrono::Utc;
use tracing::Instrument;

use omms_auth::{AuthzError, Guard, TokenService, authenticate};

use crate::app::errors::ApiError;
use crate::context::{PrincipalContext, RequestId};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Clone)]
pub struct AuthState {
    pub tokens: Arc<TokenService>,
}

/// Validate the bearer token and attach the principal to the request.
///
/// Runs before any per-route guard, so a bad or expired token is always
/// reported as 401 regardless of what the route requires.
pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let principal = match authorization_header(req.headers())
        .and_then(|header| authenticate(&state.tokens, Some(header), Utc::now()))
    {
        Ok(principal) => principal,
        Err(e) => return ApiError::from(e).into_response(),
    };

    tracing::debug!(user_id = %principal.user_id(), "authenticated");
    req.extensions_mut().insert(PrincipalContext::new(principal));

    next.run(req).await
}

fn authorization_header(headers: &HeaderMap) -> Result<&str, AuthzError> {
    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .ok_or_else(|| AuthzError::Unauthenticated("missing Authorization header".to_string()))?;

    header
        .to_str()
        .map_err(|_| AuthzError::Unauthenticated("malformed Authorization header".to_string()))
}

/// Evaluate a route's [`Guard`] against the principal set by [`auth_middleware`].
pub async fn guard_middleware(
    State(guard): State<Arc<Guard>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let Some(ctx) = req.extensions().get::<PrincipalContext>() else {
        return ApiError::from(AuthzError::Unauthenticated("no principal".to_string())).into_response();
    };
    if let Err(e) = guard.check(ctx.principal()) {
        return ApiError::from(e).into_response();
    }

    next.run(req).await
}

/// Attach a guard to a single method route.
pub fn guarded(route: MethodRouter, guard: Guard) -> MethodRouter {
    route.route_layer(axum::middleware::from_fn_with_state(
        Arc::new(guard),
        guard_middleware,
    ))
}

/// Tag every request with a [`RequestId`] and log its outcome inside a span.
pub async fn trace_middleware(mut req: Request<Body>, next: Next) -> Response {
    let request_id = RequestId::new();
    req.extensions_mut().insert(request_id);

    let span = tracing::info_span!(
        "http_request",
        request_id = %request_id,
        method = %req.method(),
        path = %req.uri().path(),
    );

    async move {
        let started = Instant::now();
        let mut resp = next.run(req).await;
        tracing::info!(
            status = resp.status().as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "request completed"
        );
        if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
            resp.headers_mut().insert(REQUEST_ID_HEADER, value);
        }
        resp
    }
    .instrument(span)
    .await
}
