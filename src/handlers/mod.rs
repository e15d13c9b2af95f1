//! Thin HTTP layer. Handlers validate input, ask the engine (`policy`, `scope`, `guard`)
//! for a decision and hand the write to the repository together with its tenancy
//! references.

pub mod admin;
pub mod associations;
pub mod auth;
pub mod campuses;
pub mod students;

/// health
///
/// [Public Route] Liveness probe.
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is up", body = String))
)]
pub async fn health() -> &'static str {
    "ok"
}
