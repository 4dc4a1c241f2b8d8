//! API route modules.

pub mod audit;
pub mod health;
pub mod history;
pub mod notify;

use axum::Router;

use crate::api::middleware::jwt_auth_middleware;
use crate::api::server::AppState;

/// Create the main API router.
///
/// Everything except `/health` requires a bearer token. Without a configured
/// [`JwtService`](crate::api::jwt::JwtService) the protected routes answer 401.
pub fn create_router(state: AppState) -> Router {
    let mut protected = Router::new()
        .merge(notify::router())
        .merge(history::router())
        .merge(audit::router());

    if let Some(jwt_service) = state.jwt_service.clone() {
        protected = protected.route_layer(axum::middleware::from_fn_with_state(
            jwt_service,
            jwt_auth_middleware,
        ));
    }

    Router::new()
        .merge(protected)
        .nest("/health", health::router())
        .with_state(state)
}
