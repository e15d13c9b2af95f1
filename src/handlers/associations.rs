use axum::{
    Json,
    extract::{Path, State},
};
use uuid::Uuid;

use crate::{
    AppState,
    auth::Caller,
    error::ApiError,
    models::{Association, MyAssociationResponse, UserGroup, UserGroupDetail},
    policy,
    repository::Repository,
    scope,
};

/// Attaches the campus set to a group.
pub(crate) async fn group_detail(repo: &dyn Repository, group: UserGroup) -> Result<UserGroupDetail, ApiError> {
    let campus_ids = repo.list_group_campus_ids(group.id).await?;
    Ok(UserGroupDetail { group, campus_ids })
}

/// list_associations
///
/// [Authenticated Route] Every association, used to pick a target when reassigning a user.
#[utoipa::path(
    get,
    path = "/associations",
    responses((status = 200, description = "Associations", body = [Association]))
)]
pub async fn list_associations(
    _caller: Caller,
    State(state): State<AppState>,
) -> Result<Json<Vec<Association>>, ApiError> {
    Ok(Json(state.repo.list_associations().await?))
}

/// get_association
#[utoipa::path(
    get,
    path = "/associations/{id}",
    params(("id" = Uuid, Path, description = "Association id")),
    responses(
        (status = 200, description = "Association", body = Association),
        (status = 404, description = "Not found")
    )
)]
pub async fn get_association(
    _caller: Caller,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Association>, ApiError> {
    state
        .repo
        .get_association(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Association not found"))
}

/// get_my_association
///
/// [Authenticated Route] The caller's association with the campuses they can see.
/// Groups are included for privileged callers only.
#[utoipa::path(
    get,
    path = "/me/association",
    responses(
        (status = 200, description = "Caller's association", body = MyAssociationResponse),
        (status = 404, description = "Caller has no association")
    )
)]
pub async fn get_my_association(
    caller: Caller,
    State(state): State<AppState>,
) -> Result<Json<MyAssociationResponse>, ApiError> {
    let association_id = caller
        .association_id
        .ok_or_else(|| ApiError::not_found("User is not associated with any association"))?;
    let association = state
        .repo
        .get_association(association_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Association not found"))?;

    let mut user_groups = Vec::new();
    if policy::is_privileged(&caller) {
        for group in scope::visible_user_groups(state.repo.as_ref(), &caller).await? {
            user_groups.push(group_detail(state.repo.as_ref(), group).await?);
        }
    }
    let campuses = scope::visible_campuses(state.repo.as_ref(), &caller).await?;

    Ok(Json(MyAssociationResponse {
        association,
        user_groups,
        campuses,
    }))
}
