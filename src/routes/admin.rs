use crate::{AppState, handlers::admin};
use axum::{
    Router,
    routing::{get, post, put},
};

/// Admin Router Module
///
/// User and user-group management, nested under `/admin`.
///
/// Access Control:
/// Every handler extracts a `Caller` (401 without a valid identity) and then checks its
/// tier through the role policy: listing and deleting users needs an association
/// administrator, everything else a group administrator or better.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        // --- Users ---
        .route("/users", get(admin::list_users).post(admin::create_user))
        .route(
            "/users/{id}",
            put(admin::update_user).delete(admin::delete_user),
        )
        .route("/users/{id}/reset-password", post(admin::reset_password))
        // POST /admin/users/assign-group
        // Group membership only ever points into the caller's own association.
        .route("/users/assign-group", post(admin::assign_group))
        // POST /admin/users/assign-association
        // The only cross-tenant write; clears the user's group.
        .route("/users/assign-association", post(admin::assign_association))
        // --- User Groups ---
        .route(
            "/user-groups",
            get(admin::list_user_groups).post(admin::create_user_group),
        )
        .route(
            "/user-groups/{id}",
            get(admin::get_user_group)
                .put(admin::update_user_group)
                .delete(admin::delete_user_group),
        )
}
