use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use uuid::Uuid;

use crate::{
    AppState,
    auth::Caller,
    error::ApiError,
    guard::{EntityKind, TenantRef},
    models::{Campus, CampusDetail, CreateCampusRequest, UpdateCampusRequest},
    policy, scope,
};

/// list_campuses
///
/// [Authenticated Route] The caller's visible campuses: the whole association for
/// association administrators, the group's campus set for everyone else.
#[utoipa::path(
    get,
    path = "/campuses",
    responses((status = 200, description = "Visible campuses", body = [Campus]))
)]
pub async fn list_campuses(
    caller: Caller,
    State(state): State<AppState>,
) -> Result<Json<Vec<Campus>>, ApiError> {
    Ok(Json(scope::visible_campuses(state.repo.as_ref(), &caller).await?))
}

/// get_campus
///
/// [Authenticated Route] A single campus with its enrolled students.
#[utoipa::path(
    get,
    path = "/campuses/{id}",
    params(("id" = Uuid, Path, description = "Campus id")),
    responses(
        (status = 200, description = "Campus", body = CampusDetail),
        (status = 403, description = "Campus outside the caller's scope"),
        (status = 404, description = "Not found")
    )
)]
pub async fn get_campus(
    caller: Caller,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<CampusDetail>, ApiError> {
    let campus = scope::fetch_campus(state.repo.as_ref(), &caller, id).await?;
    let students = state.repo.list_students(&[campus.id]).await?;
    Ok(Json(CampusDetail { campus, students }))
}

/// create_campus
///
/// [Association Admin] New campuses always belong to the caller's association.
#[utoipa::path(
    post,
    path = "/campuses",
    request_body = CreateCampusRequest,
    responses(
        (status = 201, description = "Created", body = Campus),
        (status = 403, description = "Association admin access required")
    )
)]
pub async fn create_campus(
    caller: Caller,
    State(state): State<AppState>,
    Json(payload): Json<CreateCampusRequest>,
) -> Result<(StatusCode, Json<Campus>), ApiError> {
    policy::require_association_admin(&caller)?;
    payload.validate()?;
    let tenant = policy::tenant(&caller)?;

    let refs = [TenantRef::existing(EntityKind::Association, tenant)];
    let campus = state.repo.create_campus(payload, tenant, &refs).await?;
    tracing::info!(campus = %campus.id, association = %tenant, "campus created");
    Ok((StatusCode::CREATED, Json(campus)))
}

/// update_campus
#[utoipa::path(
    put,
    path = "/campuses/{id}",
    params(("id" = Uuid, Path, description = "Campus id")),
    request_body = UpdateCampusRequest,
    responses(
        (status = 200, description = "Updated", body = Campus),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Not found")
    )
)]
pub async fn update_campus(
    caller: Caller,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateCampusRequest>,
) -> Result<Json<Campus>, ApiError> {
    policy::require_association_admin(&caller)?;
    payload.validate()?;
    let tenant = policy::tenant(&caller)?;
    scope::fetch_campus(state.repo.as_ref(), &caller, id).await?;

    let refs = [TenantRef::target(EntityKind::Campus, id, tenant)];
    Ok(Json(state.repo.update_campus(id, payload, &refs).await?))
}

/// delete_campus
///
/// Students of the campus are unassigned, not deleted.
#[utoipa::path(
    delete,
    path = "/campuses/{id}",
    params(("id" = Uuid, Path, description = "Campus id")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Not found")
    )
)]
pub async fn delete_campus(
    caller: Caller,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    policy::require_association_admin(&caller)?;
    let tenant = policy::tenant(&caller)?;
    scope::fetch_campus(state.repo.as_ref(), &caller, id).await?;

    let refs = [TenantRef::target(EntityKind::Campus, id, tenant)];
    state.repo.delete_campus(id, &refs).await?;
    tracing::info!(campus = %id, "campus deleted");
    Ok(StatusCode::NO_CONTENT)
}
