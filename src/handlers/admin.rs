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
    handlers::associations::group_detail,
    mailer::{PasswordResetEmail, WelcomeEmail},
    models::{
        AssignAssociationRequest, AssignGroupRequest, CreateUserGroupRequest, CreateUserRequest,
        MessageResponse, NewUser, UpdateUserGroupRequest, UpdateUserRequest, User, UserChanges,
        UserGroupDetail,
    },
    password::{generate_default_password, hash_password},
    policy, scope,
};

// --- Users ---

/// list_users
///
/// [Association Admin] Every user of the caller's association.
#[utoipa::path(
    get,
    path = "/admin/users",
    responses(
        (status = 200, description = "Users", body = [User]),
        (status = 403, description = "Association admin access required")
    )
)]
pub async fn list_users(caller: Caller, State(state): State<AppState>) -> Result<Json<Vec<User>>, ApiError> {
    Ok(Json(scope::visible_users(state.repo.as_ref(), &caller).await?))
}

/// create_user
///
/// [Group Admin+] Creates a user in the caller's association. Without a password, a
/// temporary one is generated and mailed; mail failure does not fail the request.
#[utoipa::path(
    post,
    path = "/admin/users",
    request_body = CreateUserRequest,
    responses(
        (status = 201, description = "Created", body = User),
        (status = 400, description = "Invalid input or duplicate username/email"),
        (status = 403, description = "Forbidden or cross-tenant group")
    )
)]
pub async fn create_user(
    caller: Caller,
    State(state): State<AppState>,
    Json(payload): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<User>), ApiError> {
    policy::require_privileged(&caller)?;
    payload.validate()?;
    let tenant = policy::tenant(&caller)?;
    policy::ensure_can_grant(&caller, payload.is_association_admin)?;

    let refs: Vec<TenantRef> = payload
        .user_group_id
        .map(|group| TenantRef::reference(EntityKind::UserGroup, group, tenant))
        .into_iter()
        .collect();
    guard::verify_refs(state.repo.as_ref(), &refs).await?;

    let generated = payload.password.is_none();
    let password = payload.password.unwrap_or_else(generate_default_password);
    let new_user = NewUser {
        username: payload.username.trim().to_string(),
        email: payload.email.trim().to_string(),
        password_hash: hash_password(&password).map_err(ApiError::Internal)?,
        first_name: payload.first_name.trim().to_string(),
        last_name: payload.last_name.trim().to_string(),
        is_association_admin: payload.is_association_admin,
        is_group_admin: payload.is_group_admin,
        association_id: Some(tenant),
        user_group_id: payload.user_group_id,
    };
    let user = state.repo.create_user(new_user, &refs).await?;
    tracing::info!(user = %user.id, created_by = %caller.id, "user created");

    if generated {
        let email = WelcomeEmail {
            to: user.email.clone(),
            first_name: user.first_name.clone(),
            username: user.username.clone(),
            temporary_password: password,
        };
        if let Err(e) = state.mailer.send_welcome_email(&email).await {
            tracing::warn!(user = %user.id, error = %e, "welcome email not sent");
        }
    }

    Ok((StatusCode::CREATED, Json(user.into())))
}

/// update_user
///
/// [Group Admin+] Partial profile/role update. Group administrators cannot touch
/// association administrators or hand out the association-admin flag.
#[utoipa::path(
    put,
    path = "/admin/users/{id}",
    params(("id" = Uuid, Path, description = "User id")),
    request_body = UpdateUserRequest,
    responses(
        (status = 200, description = "Updated", body = User),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Not found")
    )
)]
pub async fn update_user(
    caller: Caller,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateUserRequest>,
) -> Result<Json<User>, ApiError> {
    policy::require_privileged(&caller)?;
    payload.validate()?;
    let tenant = policy::tenant(&caller)?;
    let target = scope::manageable_user(&caller, state.repo.get_user(id).await?)?;
    policy::ensure_can_manage(&caller, &target)?;
    if payload.is_association_admin == Some(true) {
        policy::ensure_can_grant(&caller, true)?;
    }

    let password_hash = match &payload.password {
        Some(password) => Some(hash_password(password).map_err(ApiError::Internal)?),
        None => None,
    };
    let changes = UserChanges {
        username: payload.username.map(|v| v.trim().to_string()),
        email: payload.email.map(|v| v.trim().to_string()),
        password_hash,
        first_name: payload.first_name.map(|v| v.trim().to_string()),
        last_name: payload.last_name.map(|v| v.trim().to_string()),
        is_association_admin: payload.is_association_admin,
        is_group_admin: payload.is_group_admin,
    };
    let refs = [TenantRef::target(EntityKind::User, id, tenant)];
    let user = state.repo.update_user(id, changes, &refs).await?;
    Ok(Json(user.into()))
}

/// delete_user
///
/// [Association Admin] Administrators cannot delete their own account.
#[utoipa::path(
    delete,
    path = "/admin/users/{id}",
    params(("id" = Uuid, Path, description = "User id")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 400, description = "Attempt to delete own account"),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Not found")
    )
)]
pub async fn delete_user(
    caller: Caller,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    policy::require_association_admin(&caller)?;
    let tenant = policy::tenant(&caller)?;
    let target = scope::fetch_user(state.repo.as_ref(), &caller, id).await?;
    if target.id == caller.id {
        return Err(ApiError::validation("Cannot delete your own account"));
    }

    let refs = [TenantRef::target(EntityKind::User, id, tenant)];
    state.repo.delete_user(id, &refs).await?;
    tracing::info!(user = %id, deleted_by = %caller.id, "user deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// reset_password
///
/// [Group Admin+] Replaces the user's password with a generated one and mails it.
#[utoipa::path(
    post,
    path = "/admin/users/{id}/reset-password",
    params(("id" = Uuid, Path, description = "User id")),
    responses(
        (status = 200, description = "Password reset", body = MessageResponse),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Not found")
    )
)]
pub async fn reset_password(
    caller: Caller,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<MessageResponse>, ApiError> {
    policy::require_privileged(&caller)?;
    let tenant = policy::tenant(&caller)?;
    let target = scope::manageable_user(&caller, state.repo.get_user(id).await?)?;
    policy::ensure_can_manage(&caller, &target)?;

    let password = generate_default_password();
    let changes = UserChanges {
        password_hash: Some(hash_password(&password).map_err(ApiError::Internal)?),
        ..UserChanges::default()
    };
    let refs = [TenantRef::target(EntityKind::User, id, tenant)];
    let user = state.repo.update_user(id, changes, &refs).await?;
    tracing::info!(user = %user.id, reset_by = %caller.id, "password reset");

    let email = PasswordResetEmail {
        to: user.email.clone(),
        first_name: user.first_name.clone(),
        temporary_password: password,
    };
    if let Err(e) = state.mailer.send_password_reset_email(&email).await {
        tracing::warn!(user = %user.id, error = %e, "password reset email not sent");
    }

    Ok(Json(MessageResponse {
        message: "Password reset successfully. The new password has been sent to the user's email."
            .to_string(),
    }))
}

/// assign_group
///
/// [Group Admin+] Moves a user into a group of the same association, or out of any
/// group with `user_group_id: null`.
#[utoipa::path(
    post,
    path = "/admin/users/assign-group",
    request_body = AssignGroupRequest,
    responses(
        (status = 200, description = "Assigned", body = User),
        (status = 403, description = "Forbidden or cross-tenant group"),
        (status = 404, description = "User or group not found")
    )
)]
pub async fn assign_group(
    caller: Caller,
    State(state): State<AppState>,
    Json(payload): Json<AssignGroupRequest>,
) -> Result<Json<User>, ApiError> {
    policy::require_privileged(&caller)?;
    let tenant = policy::tenant(&caller)?;

    let mut refs: Vec<TenantRef> = payload
        .user_group_id
        .map(|group| TenantRef::reference(EntityKind::UserGroup, group, tenant))
        .into_iter()
        .collect();
    guard::verify_refs(state.repo.as_ref(), &refs).await?;

    let found = state
        .repo
        .find_user_by_login(payload.username_or_email.trim())
        .await?;
    let target = scope::manageable_user(&caller, found)?;
    policy::ensure_can_manage(&caller, &target)?;
    refs.push(TenantRef::target(EntityKind::User, target.id, tenant));

    let user = state
        .repo
        .set_user_group(target.id, payload.user_group_id, &refs)
        .await?;
    tracing::info!(user = %user.id, group = ?user.user_group_id, "user group assigned");
    Ok(Json(user.into()))
}

/// assign_association
///
/// [Association Admin] Moves a user of the caller's association into another
/// association. The one write allowed to cross tenants: the target association only has
/// to exist. The user's group and admin flags are cleared.
#[utoipa::path(
    post,
    path = "/admin/users/assign-association",
    request_body = AssignAssociationRequest,
    responses(
        (status = 200, description = "Reassigned", body = User),
        (status = 400, description = "Attempt to reassign own account"),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "User or association not found")
    )
)]
pub async fn assign_association(
    caller: Caller,
    State(state): State<AppState>,
    Json(payload): Json<AssignAssociationRequest>,
) -> Result<Json<User>, ApiError> {
    policy::require_association_admin(&caller)?;
    let tenant = policy::tenant(&caller)?;

    let destination = TenantRef::existing(EntityKind::Association, payload.association_id);
    guard::verify_refs(state.repo.as_ref(), &[destination]).await?;

    let found = state
        .repo
        .find_user_by_login(payload.username_or_email.trim())
        .await?;
    let target = scope::manageable_user(&caller, found)?;
    if target.id == caller.id {
        return Err(ApiError::validation("Cannot reassign your own account"));
    }

    let refs = [
        destination,
        TenantRef::target(EntityKind::User, target.id, tenant),
    ];
    let user = state
        .repo
        .move_user_to_association(target.id, payload.association_id, &refs)
        .await?;
    tracing::info!(
        user = %user.id,
        from = %tenant,
        to = %payload.association_id,
        "user moved to another association"
    );
    Ok(Json(user.into()))
}

// --- User Groups ---

/// Guard references carried by a group write: the parent group and every campus.
fn group_refs(tenant: Uuid, parent: Option<Uuid>, campus_ids: &[Uuid]) -> Vec<TenantRef> {
    let mut seen = Vec::with_capacity(campus_ids.len());
    let mut refs: Vec<TenantRef> = parent
        .map(|p| TenantRef::reference(EntityKind::UserGroup, p, tenant))
        .into_iter()
        .collect();
    for campus_id in campus_ids {
        if !seen.contains(campus_id) {
            seen.push(*campus_id);
            refs.push(TenantRef::reference(EntityKind::Campus, *campus_id, tenant));
        }
    }
    refs
}

/// list_user_groups
#[utoipa::path(
    get,
    path = "/admin/user-groups",
    responses(
        (status = 200, description = "User groups", body = [UserGroupDetail]),
        (status = 403, description = "Group admin or association admin access required")
    )
)]
pub async fn list_user_groups(
    caller: Caller,
    State(state): State<AppState>,
) -> Result<Json<Vec<UserGroupDetail>>, ApiError> {
    let groups = scope::visible_user_groups(state.repo.as_ref(), &caller).await?;
    let mut details = Vec::with_capacity(groups.len());
    for group in groups {
        details.push(group_detail(state.repo.as_ref(), group).await?);
    }
    Ok(Json(details))
}

/// get_user_group
#[utoipa::path(
    get,
    path = "/admin/user-groups/{id}",
    params(("id" = Uuid, Path, description = "User group id")),
    responses(
        (status = 200, description = "User group", body = UserGroupDetail),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Not found")
    )
)]
pub async fn get_user_group(
    caller: Caller,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<UserGroupDetail>, ApiError> {
    let group = scope::fetch_user_group(state.repo.as_ref(), &caller, id).await?;
    Ok(Json(group_detail(state.repo.as_ref(), group).await?))
}

/// create_user_group
///
/// [Group Admin+] The parent group and every campus must belong to the caller's
/// association.
#[utoipa::path(
    post,
    path = "/admin/user-groups",
    request_body = CreateUserGroupRequest,
    responses(
        (status = 201, description = "Created", body = UserGroupDetail),
        (status = 403, description = "Forbidden or cross-tenant reference"),
        (status = 404, description = "Referenced parent or campus not found")
    )
)]
pub async fn create_user_group(
    caller: Caller,
    State(state): State<AppState>,
    Json(payload): Json<CreateUserGroupRequest>,
) -> Result<(StatusCode, Json<UserGroupDetail>), ApiError> {
    policy::require_privileged(&caller)?;
    payload.validate()?;
    let tenant = policy::tenant(&caller)?;

    let refs = group_refs(tenant, payload.parent_group_id, &payload.campus_ids);
    guard::verify_refs(state.repo.as_ref(), &refs).await?;

    let group = state.repo.create_user_group(payload, tenant, &refs).await?;
    tracing::info!(group = %group.id, association = %tenant, "user group created");
    Ok((StatusCode::CREATED, Json(group_detail(state.repo.as_ref(), group).await?)))
}

/// update_user_group
///
/// [Group Admin+] Partial update; `campus_ids` replaces the campus set. A parent that
/// would make the group its own ancestor is rejected.
#[utoipa::path(
    put,
    path = "/admin/user-groups/{id}",
    params(("id" = Uuid, Path, description = "User group id")),
    request_body = UpdateUserGroupRequest,
    responses(
        (status = 200, description = "Updated", body = UserGroupDetail),
        (status = 400, description = "Invalid input or parent cycle"),
        (status = 403, description = "Forbidden or cross-tenant reference"),
        (status = 404, description = "Group, parent or campus not found")
    )
)]
pub async fn update_user_group(
    caller: Caller,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateUserGroupRequest>,
) -> Result<Json<UserGroupDetail>, ApiError> {
    policy::require_privileged(&caller)?;
    payload.validate()?;
    let tenant = policy::tenant(&caller)?;

    let mut refs = group_refs(
        tenant,
        payload.parent_group_id.flatten(),
        payload.campus_ids.as_deref().unwrap_or_default(),
    );
    guard::verify_refs(state.repo.as_ref(), &refs).await?;
    scope::fetch_user_group(state.repo.as_ref(), &caller, id).await?;
    refs.push(TenantRef::target(EntityKind::UserGroup, id, tenant));

    let group = state.repo.update_user_group(id, payload, &refs).await?;
    Ok(Json(group_detail(state.repo.as_ref(), group).await?))
}

/// delete_user_group
///
/// Members lose their group; child groups become roots.
#[utoipa::path(
    delete,
    path = "/admin/user-groups/{id}",
    params(("id" = Uuid, Path, description = "User group id")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Not found")
    )
)]
pub async fn delete_user_group(
    caller: Caller,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    policy::require_privileged(&caller)?;
    let tenant = policy::tenant(&caller)?;
    scope::fetch_user_group(state.repo.as_ref(), &caller, id).await?;

    let refs = [TenantRef::target(EntityKind::UserGroup, id, tenant)];
    state.repo.delete_user_group(id, &refs).await?;
    tracing::info!(group = %id, "user group deleted");
    Ok(StatusCode::NO_CONTENT)
}
