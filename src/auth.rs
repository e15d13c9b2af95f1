use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::{
    config::{AppConfig, Env},
    error::ApiError,
    models::UserRecord,
    repository::{RepoError, Repository, RepositoryState},
};

/// Claims
///
/// Payload of the bearer tokens this service issues. Only the subject is trusted; role
/// and tenancy are always re-read from the database.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (sub): the user id.
    pub sub: Uuid,
    /// Expiration Time (exp).
    pub exp: usize,
    /// Issued At (iat).
    pub iat: usize,
}

/// AuthError
///
/// Failure modes of identity resolution. Credential problems are reported to the client
/// as a plain 401; `Signing` and `Lookup` are server faults.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("access token required")]
    MissingCredential,

    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("token has expired")]
    ExpiredToken,

    #[error("token subject no longer exists")]
    IdentityNotFound,

    #[error("token signing failed: {0}")]
    Signing(String),

    #[error("user lookup failed: {0}")]
    Lookup(#[source] RepoError),
}

/// Caller
///
/// The resolved identity of the current request: who is calling, which tenant they act in,
/// and which admin tiers they hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub id: Uuid,
    pub association_id: Option<Uuid>,
    pub user_group_id: Option<Uuid>,
    pub is_association_admin: bool,
    pub is_group_admin: bool,
}

impl From<&UserRecord> for Caller {
    fn from(user: &UserRecord) -> Self {
        Caller {
            id: user.id,
            association_id: user.association_id,
            user_group_id: user.user_group_id,
            is_association_admin: user.is_association_admin,
            is_group_admin: user.is_group_admin,
        }
    }
}

/// issue_token
///
/// Signs a token for `user_id`, valid for `config.token_ttl_days`.
pub fn issue_token(user_id: Uuid, config: &AppConfig) -> Result<String, AuthError> {
    let now = Utc::now();
    let expires = now + Duration::days(config.token_ttl_days);
    let claims = Claims {
        sub: user_id,
        iat: now.timestamp() as usize,
        exp: expires.timestamp() as usize,
    };

    let key = EncodingKey::from_secret(config.jwt_secret.as_bytes());
    encode(&Header::default(), &claims, &key).map_err(|e| AuthError::Signing(e.to_string()))
}

/// verify_token
///
/// Checks signature and expiry, distinguishing expired tokens from every other defect.
pub fn verify_token(token: &str, config: &AppConfig) -> Result<Claims, AuthError> {
    let key = DecodingKey::from_secret(config.jwt_secret.as_bytes());
    let mut validation = Validation::default();
    validation.validate_exp = true;
    validation.leeway = 0;

    decode::<Claims>(token, &key, &validation)
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => AuthError::ExpiredToken,
            _ => AuthError::InvalidToken(e.to_string()),
        })
}

/// resolve_caller
///
/// Turns a bearer token into a [`Caller`]. The subject is looked up on every request so a
/// deleted user, or a user whose roles changed, is seen immediately.
pub async fn resolve_caller(
    repo: &dyn Repository,
    config: &AppConfig,
    token: &str,
) -> Result<Caller, AuthError> {
    let claims = verify_token(token, config)?;
    let user = repo
        .get_user(claims.sub)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "user lookup failed during authentication");
            AuthError::Lookup(e)
        })?
        .ok_or(AuthError::IdentityNotFound)?;
    Ok(Caller::from(&user))
}

/// bearer_token
///
/// Pulls the token out of an `Authorization: Bearer <token>` header.
pub fn bearer_token(parts: &Parts) -> Result<&str, AuthError> {
    parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or(AuthError::MissingCredential)
}

/// Caller Extractor Implementation
///
/// Makes `Caller` usable as a handler argument. A bad credential rejects the request with
/// 401 before the handler runs; a failed user lookup is a 500.
///
/// In `Env::Local` an `x-user-id` header naming an existing user is accepted instead of a
/// token, to speed up manual testing against a seeded database.
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
    RepositoryState: FromRef<S>,
    AppConfig: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let repo = RepositoryState::from_ref(state);
        let config = AppConfig::from_ref(state);

        if config.env == Env::Local {
            let bypass_id = parts
                .headers
                .get("x-user-id")
                .and_then(|value| value.to_str().ok())
                .and_then(|value| Uuid::parse_str(value).ok());
            if let Some(user_id) = bypass_id {
                match repo.get_user(user_id).await {
                    Ok(Some(user)) => {
                        tracing::debug!(user_id = %user.id, "local x-user-id bypass");
                        return Ok(Caller::from(&user));
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::error!(error = %e, "user lookup failed during x-user-id bypass");
                        return Err(AuthError::Lookup(e).into());
                    }
                }
            }
        }

        let token = bearer_token(parts).map_err(ApiError::from)?;
        let caller = resolve_caller(repo.as_ref(), &config, token)
            .await
            .map_err(|e| {
                tracing::debug!(reason = %e, "rejected credential");
                ApiError::from(e)
            })?;
        Ok(caller)
    }
}
