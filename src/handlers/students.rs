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
    guard::{self, EntityKind, TenantRef},
    models::{CreateStudentRequest, Student, UpdateStudentRequest},
    policy, scope,
};

/// Checks a campus a student is about to be placed on: it must belong to the caller's
/// association, and non-administrators may only use campuses of their own group.
async fn campus_reference(state: &AppState, caller: &Caller, tenant: Uuid, campus_id: Uuid) -> Result<TenantRef, ApiError> {
    let reference = TenantRef::reference(EntityKind::Campus, campus_id, tenant);
    guard::verify_refs(state.repo.as_ref(), &[reference]).await?;
    scope::ensure_campus_placeable(state.repo.as_ref(), caller, campus_id).await?;
    Ok(reference)
}

/// list_students
///
/// [Authenticated Route] Students on the campuses of the caller's group. Association
/// administrators are bounded by their group here too.
#[utoipa::path(
    get,
    path = "/students",
    responses((status = 200, description = "Visible students", body = [Student]))
)]
pub async fn list_students(
    caller: Caller,
    State(state): State<AppState>,
) -> Result<Json<Vec<Student>>, ApiError> {
    Ok(Json(scope::visible_students(state.repo.as_ref(), &caller).await?))
}

/// get_student
#[utoipa::path(
    get,
    path = "/students/{id}",
    params(("id" = Uuid, Path, description = "Student id")),
    responses(
        (status = 200, description = "Student", body = Student),
        (status = 403, description = "Student outside the caller's scope"),
        (status = 404, description = "Not found")
    )
)]
pub async fn get_student(
    caller: Caller,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Student>, ApiError> {
    Ok(Json(scope::fetch_student(state.repo.as_ref(), &caller, id).await?))
}

/// create_student
///
/// A student without a campus belongs to no tenant and drops out of every scope, so only
/// association administrators may create one.
#[utoipa::path(
    post,
    path = "/students",
    request_body = CreateStudentRequest,
    responses(
        (status = 201, description = "Created", body = Student),
        (status = 400, description = "Invalid input"),
        (status = 403, description = "Campus in another association, outside the caller's group, or missing for a non-administrator"),
        (status = 404, description = "Campus does not exist")
    )
)]
pub async fn create_student(
    caller: Caller,
    State(state): State<AppState>,
    Json(payload): Json<CreateStudentRequest>,
) -> Result<(StatusCode, Json<Student>), ApiError> {
    payload.validate()?;
    let tenant = policy::tenant(&caller)?;

    let mut refs = Vec::new();
    match payload.campus_id {
        Some(campus_id) => refs.push(campus_reference(&state, &caller, tenant, campus_id).await?),
        None => policy::require_association_admin(&caller)?,
    }
    let student = state.repo.create_student(payload, &refs).await?;
    tracing::info!(student = %student.id, "student created");
    Ok((StatusCode::CREATED, Json(student)))
}

/// update_student
///
/// Partial update. An explicit `"campus_id": null` unassigns the student; like creating a
/// campus-less student, that is reserved to association administrators.
#[utoipa::path(
    put,
    path = "/students/{id}",
    params(("id" = Uuid, Path, description = "Student id")),
    request_body = UpdateStudentRequest,
    responses(
        (status = 200, description = "Updated", body = Student),
        (status = 403, description = "Forbidden or cross-tenant campus"),
        (status = 404, description = "Student or campus not found")
    )
)]
pub async fn update_student(
    caller: Caller,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateStudentRequest>,
) -> Result<Json<Student>, ApiError> {
    payload.validate()?;
    let tenant = policy::tenant(&caller)?;

    // A foreign campus reports as a cross-tenant violation even when the target is out of scope.
    let mut refs = Vec::new();
    match payload.campus_id {
        Some(Some(campus_id)) => refs.push(campus_reference(&state, &caller, tenant, campus_id).await?),
        Some(None) => policy::require_association_admin(&caller)?,
        None => {}
    }
    scope::fetch_student(state.repo.as_ref(), &caller, id).await?;
    refs.push(TenantRef::target(EntityKind::Student, id, tenant));

    Ok(Json(state.repo.update_student(id, payload, &refs).await?))
}

/// delete_student
#[utoipa::path(
    delete,
    path = "/students/{id}",
    params(("id" = Uuid, Path, description = "Student id")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Not found")
    )
)]
pub async fn delete_student(
    caller: Caller,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let tenant = policy::tenant(&caller)?;
    scope::fetch_student(state.repo.as_ref(), &caller, id).await?;

    let refs = [TenantRef::target(EntityKind::Student, id, tenant)];
    state.repo.delete_student(id, &refs).await?;
    tracing::info!(student = %id, "student deleted");
    Ok(StatusCode::NO_CONTENT)
}
