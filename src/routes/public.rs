use crate::{
    AppState,
    handlers::{self, auth},
};
use axum::{
    Router,
    routing::{get, post},
};

/// Public Router Module
///
/// Routes reachable without a bearer token: liveness, self-registration of a new
/// association and login.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        // GET /health
        .route("/health", get(handlers::health))
        // POST /auth/register-association
        // Creates an association together with its first association administrator.
        .route("/auth/register-association", post(auth::register_association))
        // POST /auth/login
        // Accepts a username or an email address in the `username` field.
        .route("/auth/login", post(auth::login))
}
