//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `state.rs`: credential store, directory and login service wiring
//! - `routes/`: HTTP routes + handlers (one file per resource)
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

use crate::middleware;

pub mod errors;
pub mod routes;
pub mod state;

pub use state::{AppState, build_state};

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub fn build_app(state: Arc<AppState>) -> Router {
    let auth_state = middleware::AuthState {
        tokens: Arc::new(state.tokens().clone()),
    };

    // Protected routes: the token is checked before any route guard runs.
    let protected = routes::router().layer(axum::middleware::from_fn_with_state(
        auth_state,
        middleware::auth_middleware,
    ));

    let auth = routes::auth::public_router().merge(protected);

    Router::new()
        .route("/health", get(routes::system::health))
        .nest("/auth", auth)
        .layer(
            ServiceBuilder::new()
                .layer(axum::middleware::from_fn(middleware::trace_middleware))
                .layer(Extension(state)),
        )
}
