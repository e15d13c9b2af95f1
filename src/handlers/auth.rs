use axum::{
    Json,
    extract::State,
    http::StatusCode,
};

use crate::{
    AppState,
    auth::{Caller, issue_token},
    error::ApiError,
    models::{AuthResponse, LoginRequest, NewUser, RegisterAssociationRequest, User},
    password::{hash_password, verify_password},
};

/// register_association
///
/// [Public Route] Self-registration. Creates the association and its first
/// association administrator atomically, then signs them in.
#[utoipa::path(
    post,
    path = "/auth/register-association",
    request_body = RegisterAssociationRequest,
    responses(
        (status = 201, description = "Association and administrator created", body = AuthResponse),
        (status = 400, description = "Invalid input or duplicate name, username or email")
    )
)]
pub async fn register_association(
    State(state): State<AppState>,
    Json(payload): Json<RegisterAssociationRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), ApiError> {
    payload.validate()?;
    let password_hash = hash_password(&payload.password).map_err(ApiError::Internal)?;

    let admin = NewUser {
        username: payload.username.trim().to_string(),
        email: payload.email.trim().to_string(),
        password_hash,
        first_name: payload.first_name.trim().to_string(),
        last_name: payload.last_name.trim().to_string(),
        is_association_admin: true,
        is_group_admin: false,
        association_id: None,
        user_group_id: None,
    };
    let (association, user) = state
        .repo
        .create_association_with_admin(
            payload.association_name.trim().to_string(),
            payload.association_description,
            admin,
        )
        .await?;
    tracing::info!(association = %association.id, user = %user.id, "association registered");

    let token = issue_token(user.id, &state.config)?;
    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            token,
            user: user.into(),
        }),
    ))
}

/// login
///
/// [Public Route] Exchanges a username (or email) and password for a bearer token.
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Signed in", body = AuthResponse),
        (status = 401, description = "Invalid credentials")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let invalid = || ApiError::Unauthenticated("Invalid credentials".to_string());

    let user = state
        .repo
        .find_user_by_login(payload.username.trim())
        .await?
        .ok_or_else(invalid)?;
    if !verify_password(&payload.password, &user.password_hash).map_err(ApiError::Internal)? {
        tracing::info!(user = %user.id, "login rejected: wrong password");
        return Err(invalid());
    }

    let token = issue_token(user.id, &state.config)?;
    Ok(Json(AuthResponse {
        token,
        user: user.into(),
    }))
}

/// get_me
///
/// [Authenticated Route] The caller's own account.
#[utoipa::path(
    get,
    path = "/auth/me",
    responses(
        (status = 200, description = "Current user", body = User),
        (status = 401, description = "Unauthenticated")
    )
)]
pub async fn get_me(caller: Caller, State(state): State<AppState>) -> Result<Json<User>, ApiError> {
    let user = state
        .repo
        .get_user(caller.id)
        .await?
        .ok_or_else(|| ApiError::Unauthenticated("Invalid token".to_string()))?;
    Ok(Json(user.into()))
}
