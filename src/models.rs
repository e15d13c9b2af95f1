use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use sqlx::FromRow;
use ts_rs::TS;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::ApiError;

/// Image used for campuses created without an explicit `image_url`.
pub const DEFAULT_CAMPUS_IMAGE: &str =
    "https://t4.ftcdn.net/jpg/15/12/04/11/360_F_1512041110_c0NFJDcHLmUJiwfDowzcKUgsPALmbjdD.jpg";

/// Image used for students created without an explicit `image_url`.
pub const DEFAULT_STUDENT_IMAGE: &str = "https://www.gravatar.com/avatar/?d=mp";

// --- Core Application Schemas (Mapped to Database) ---

/// Association
///
/// The top-level tenant. Every group, campus and user hangs off exactly one association.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct Association {
    pub id: Uuid,
    // Unique across the whole system.
    pub name: String,
    pub description: Option<String>,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
}

/// UserGroup
///
/// A subdivision of an association. Its campus set is the visibility boundary for members
/// who are not association administrators.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct UserGroup {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    // Lookup-only back reference; must point into the same association.
    pub parent_group_id: Option<Uuid>,
    pub association_id: Uuid,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
}

/// UserGroupDetail
///
/// A group together with the ids of the campuses assigned to it.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct UserGroupDetail {
    #[serde(flatten)]
    pub group: UserGroup,
    pub campus_ids: Vec<Uuid>,
}

/// Campus
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct Campus {
    pub id: Uuid,
    pub name: String,
    pub address: String,
    pub description: Option<String>,
    pub image_url: String,
    pub association_id: Uuid,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
}

/// CampusDetail
///
/// Single-campus view, carrying the students enrolled on it.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct CampusDetail {
    #[serde(flatten)]
    pub campus: Campus,
    pub students: Vec<Student>,
}

/// Student
///
/// A student's association is never stored: it is whatever association owns `campus_id`.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct Student {
    pub id: Uuid,
    pub firstname: String,
    pub lastname: String,
    pub email: String,
    pub image_url: String,
    pub gpa: f64,
    pub campus_id: Option<Uuid>,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
}

/// UserRecord
///
/// Raw database row for `users`, including the password hash. Internal only; everything
/// that leaves the process goes through [`User`].
#[derive(Clone, FromRow, Default)]
pub struct UserRecord {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub is_association_admin: bool,
    pub is_group_admin: bool,
    pub association_id: Option<Uuid>,
    pub user_group_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl std::fmt::Debug for UserRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserRecord")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("email", &self.email)
            .field("password_hash", &"<redacted>")
            .field("is_association_admin", &self.is_association_admin)
            .field("is_group_admin", &self.is_group_admin)
            .field("association_id", &self.association_id)
            .field("user_group_id", &self.user_group_id)
            .finish()
    }
}

/// User
///
/// The public shape of a user account. Never carries the password.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default, PartialEq)]
#[ts(export)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub is_association_admin: bool,
    pub is_group_admin: bool,
    pub association_id: Option<Uuid>,
    pub user_group_id: Option<Uuid>,
}

impl From<UserRecord> for User {
    fn from(record: UserRecord) -> Self {
        User {
            id: record.id,
            username: record.username,
            email: record.email,
            first_name: record.first_name,
            last_name: record.last_name,
            is_association_admin: record.is_association_admin,
            is_group_admin: record.is_group_admin,
            association_id: record.association_id,
            user_group_id: record.user_group_id,
        }
    }
}

/// --- Request Payloads (Input Schemas) ---

/// RegisterAssociationRequest
///
/// Public self-registration: creates one association and its first administrator.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct RegisterAssociationRequest {
    pub association_name: String,
    #[serde(default)]
    pub association_description: Option<String>,
    pub username: String,
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
}

impl RegisterAssociationRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        require_text("association_name", &self.association_name)?;
        require_text("username", &self.username)?;
        require_email(&self.email)?;
        require_password(&self.password)?;
        require_text("first_name", &self.first_name)?;
        require_text("last_name", &self.last_name)
    }
}

/// LoginRequest
///
/// `username` accepts either the username or the email address.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// AuthResponse
///
/// Returned by login and association registration.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct AuthResponse {
    pub token: String,
    pub user: User,
}

/// CreateUserRequest
///
/// Administrator-driven account creation. A missing password is generated and mailed.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct CreateUserRequest {
    pub username: String,
    pub email: String,
    #[serde(default)]
    pub password: Option<String>,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub user_group_id: Option<Uuid>,
    #[serde(default)]
    pub is_association_admin: bool,
    #[serde(default)]
    pub is_group_admin: bool,
}

impl CreateUserRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        require_text("username", &self.username)?;
        require_email(&self.email)?;
        if let Some(password) = &self.password {
            require_password(password)?;
        }
        require_text("first_name", &self.first_name)?;
        require_text("last_name", &self.last_name)
    }
}

/// UpdateUserRequest
///
/// Partial update of a user's profile and role flags. Group and association membership are
/// changed through the dedicated assign operations.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct UpdateUserRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_association_admin: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_group_admin: Option<bool>,
}

impl UpdateUserRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        if let Some(username) = &self.username {
            require_text("username", username)?;
        }
        if let Some(email) = &self.email {
            require_email(email)?;
        }
        if let Some(password) = &self.password {
            require_password(password)?;
        }
        if let Some(first_name) = &self.first_name {
            require_text("first_name", first_name)?;
        }
        if let Some(last_name) = &self.last_name {
            require_text("last_name", last_name)?;
        }
        Ok(())
    }
}

/// AssignGroupRequest
///
/// `user_group_id: null` removes the user from their group.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct AssignGroupRequest {
    pub username_or_email: String,
    pub user_group_id: Option<Uuid>,
}

/// AssignAssociationRequest
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct AssignAssociationRequest {
    pub username_or_email: String,
    pub association_id: Uuid,
}

/// CreateUserGroupRequest
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct CreateUserGroupRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub parent_group_id: Option<Uuid>,
    #[serde(default)]
    pub campus_ids: Vec<Uuid>,
}

impl CreateUserGroupRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        require_text("name", &self.name)
    }
}

/// UpdateUserGroupRequest
///
/// Partial update. `campus_ids`, when present, replaces the whole campus set;
/// `parent_group_id: null` detaches the group from its parent.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct UpdateUserGroupRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(
        default,
        deserialize_with = "deserialize_some",
        skip_serializing_if = "Option::is_none"
    )]
    #[ts(optional)]
    #[schema(value_type = Option<Uuid>)]
    pub parent_group_id: Option<Option<Uuid>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub campus_ids: Option<Vec<Uuid>>,
}

impl UpdateUserGroupRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        match &self.name {
            Some(name) => require_text("name", name),
            None => Ok(()),
        }
    }
}

/// CreateCampusRequest
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct CreateCampusRequest {
    pub name: String,
    pub address: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
}

impl CreateCampusRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        require_text("name", &self.name)?;
        require_text("address", &self.address)
    }
}

/// UpdateCampusRequest
///
/// Partial update; omitted fields keep their stored value.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct UpdateCampusRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

impl UpdateCampusRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        if let Some(name) = &self.name {
            require_text("name", name)?;
        }
        if let Some(address) = &self.address {
            require_text("address", address)?;
        }
        Ok(())
    }
}

/// CreateStudentRequest
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct CreateStudentRequest {
    pub firstname: String,
    pub lastname: String,
    pub email: String,
    #[serde(default)]
    pub image_url: Option<String>,
    pub gpa: f64,
    #[serde(default)]
    pub campus_id: Option<Uuid>,
}

impl CreateStudentRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        require_text("firstname", &self.firstname)?;
        require_text("lastname", &self.lastname)?;
        require_email(&self.email)?;
        require_gpa(self.gpa)
    }
}

/// UpdateStudentRequest
///
/// Partial update. `campus_id: null` unassigns the student; an absent `campus_id` leaves it.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct UpdateStudentRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firstname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lastname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpa: Option<f64>,
    #[serde(
        default,
        deserialize_with = "deserialize_some",
        skip_serializing_if = "Option::is_none"
    )]
    #[ts(optional)]
    #[schema(value_type = Option<Uuid>)]
    pub campus_id: Option<Option<Uuid>>,
}

impl UpdateStudentRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        if let Some(firstname) = &self.firstname {
            require_text("firstname", firstname)?;
        }
        if let Some(lastname) = &self.lastname {
            require_text("lastname", lastname)?;
        }
        if let Some(email) = &self.email {
            require_email(email)?;
        }
        match self.gpa {
            Some(gpa) => require_gpa(gpa),
            None => Ok(()),
        }
    }
}

/// --- Response Schemas (Output) ---

/// MyAssociationResponse
///
/// The caller's own association, with the groups and campuses they are allowed to see.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct MyAssociationResponse {
    pub association: Association,
    pub user_groups: Vec<UserGroupDetail>,
    pub campuses: Vec<Campus>,
}

/// MessageResponse
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct MessageResponse {
    pub message: String,
}

/// --- Persistence Inputs (Internal) ---

/// NewUser
///
/// A user ready for insertion; the password is already hashed.
#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub is_association_admin: bool,
    pub is_group_admin: bool,
    pub association_id: Option<Uuid>,
    pub user_group_id: Option<Uuid>,
}

/// UserChanges
///
/// Column-level partial update for `users`; `None` keeps the stored value.
#[derive(Debug, Clone, Default)]
pub struct UserChanges {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password_hash: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub is_association_admin: Option<bool>,
    pub is_group_admin: Option<bool>,
}

// --- Validation Helpers ---

fn require_text(field: &str, value: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(ApiError::validation(format!("{field} is required")));
    }
    Ok(())
}

fn require_email(value: &str) -> Result<(), ApiError> {
    require_text("email", value)?;
    let trimmed = value.trim();
    match trimmed.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(()),
        _ => Err(ApiError::validation("email must be a valid email address")),
    }
}

fn require_password(value: &str) -> Result<(), ApiError> {
    if value.chars().count() < 8 {
        return Err(ApiError::validation(
            "password must be at least 8 characters",
        ));
    }
    Ok(())
}

fn require_gpa(value: f64) -> Result<(), ApiError> {
    if !(0.0..=4.0).contains(&value) {
        return Err(ApiError::validation("gpa must be between 0.0 and 4.0"));
    }
    Ok(())
}

/// Distinguishes an explicit `null` (`Some(None)`) from an absent field (`None`).
fn deserialize_some<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}
