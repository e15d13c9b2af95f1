use crate::{
    AppState,
    handlers::{associations, auth, campuses, students},
};
use axum::{
    Router,
    routing::get,
};

/// Authenticated Router Module
///
/// Routes open to any resolved caller. The auth layer above rejects requests without a
/// valid identity; what each caller then sees is decided by the scope filter inside the
/// handlers, and campus mutations additionally require an association administrator.
pub fn authenticated_routes() -> Router<AppState> {
    Router::<AppState>::new()
        // GET /auth/me
        .route("/auth/me", get(auth::get_me))
        // --- Associations ---
        .route("/associations", get(associations::list_associations))
        .route("/associations/{id}", get(associations::get_association))
        // GET /me/association
        // The caller's association with its visible campuses (and groups, for admins).
        .route("/me/association", get(associations::get_my_association))
        // --- Campuses ---
        .route(
            "/campuses",
            get(campuses::list_campuses).post(campuses::create_campus),
        )
        .route(
            "/campuses/{id}",
            get(campuses::get_campus)
                .put(campuses::update_campus)
                .delete(campuses::delete_campus),
        )
        // --- Students ---
        // Scoped by the caller's user group for every caller, administrators included.
        .route(
            "/students",
            get(students::list_students).post(students::create_student),
        )
        .route(
            "/students/{id}",
            get(students::get_student)
                .put(students::update_student)
                .delete(students::delete_student),
        )
}
