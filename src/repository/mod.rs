use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::{
    guard::{EntityKind, GuardError, TenantRef},
    models::{
        Association, Campus, CreateCampusRequest, CreateStudentRequest, CreateUserGroupRequest,
        NewUser, Student, UpdateCampusRequest, UpdateStudentRequest, UpdateUserGroupRequest,
        UserChanges, UserGroup, UserRecord,
    },
};

mod memory;
mod postgres;

pub use memory::InMemoryRepository;
pub use postgres::PostgresRepository;

/// RepoError
///
/// Persistence failures. `Guard` carries a tenancy violation detected inside the write
/// transaction; `Conflict` a unique-constraint violation.
#[derive(Debug, Error)]
pub enum RepoError {
    #[error(transparent)]
    Guard(#[from] GuardError),

    #[error("{0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for RepoError {
    fn from(err: sqlx::Error) -> Self {
        if let Some(db) = err.as_database_error() {
            if db.is_unique_violation() {
                return conflict(db.constraint().unwrap_or_default());
            }
        }
        RepoError::Database(err.to_string())
    }
}

/// Maps a unique constraint name onto the message shown to the client.
pub(crate) fn conflict(constraint: &str) -> RepoError {
    let message = match constraint {
        "associations_name_key" => "Association name already exists",
        "users_username_key" => "Username already exists",
        "users_email_key" => "Email already exists",
        "user_groups_name_key" => "User group name already exists",
        _ => "A record with the same unique value already exists",
    };
    RepoError::Conflict(message.to_string())
}

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository Trait
///
/// The persistence collaborator of the engine: lookups by id, filtered lists and writes.
///
/// Every mutating method takes the [`TenantRef`]s the write depends on. Implementations
/// re-read the tenancy of each reference atomically with the write and abort with
/// [`RepoError::Guard`] when one no longer holds. A write whose target row has vanished
/// fails with `GuardError::TargetNotFound` even when no reference names it.
///
/// **Send + Sync + async_trait** make `Arc<dyn Repository>` shareable across Axum tasks.
#[async_trait]
pub trait Repository: Send + Sync {
    // --- Tenancy ---
    /// `None` if the row does not exist, otherwise the association that owns it.
    async fn association_of(&self, kind: EntityKind, id: Uuid) -> RepoResult<Option<Option<Uuid>>>;

    // --- Associations ---
    async fn get_association(&self, id: Uuid) -> RepoResult<Option<Association>>;
    async fn list_associations(&self) -> RepoResult<Vec<Association>>;
    // Creates the association and its first administrator in one transaction.
    async fn create_association_with_admin(
        &self,
        name: String,
        description: Option<String>,
        admin: NewUser,
    ) -> RepoResult<(Association, UserRecord)>;

    // --- Users ---
    async fn get_user(&self, id: Uuid) -> RepoResult<Option<UserRecord>>;
    // Matches either the username or the email address.
    async fn find_user_by_login(&self, username_or_email: &str) -> RepoResult<Option<UserRecord>>;
    async fn list_users(&self, association_id: Uuid) -> RepoResult<Vec<UserRecord>>;
    async fn create_user(&self, user: NewUser, refs: &[TenantRef]) -> RepoResult<UserRecord>;
    async fn update_user(&self, id: Uuid, changes: UserChanges, refs: &[TenantRef]) -> RepoResult<UserRecord>;
    async fn set_user_group(
        &self,
        id: Uuid,
        user_group_id: Option<Uuid>,
        refs: &[TenantRef],
    ) -> RepoResult<UserRecord>;
    // Moves the user and clears their group and admin flags.
    async fn move_user_to_association(
        &self,
        id: Uuid,
        association_id: Uuid,
        refs: &[TenantRef],
    ) -> RepoResult<UserRecord>;
    async fn delete_user(&self, id: Uuid, refs: &[TenantRef]) -> RepoResult<()>;

    // --- User Groups ---
    async fn get_user_group(&self, id: Uuid) -> RepoResult<Option<UserGroup>>;
    async fn list_user_groups(&self, association_id: Uuid) -> RepoResult<Vec<UserGroup>>;
    async fn list_group_campus_ids(&self, user_group_id: Uuid) -> RepoResult<Vec<Uuid>>;
    async fn create_user_group(
        &self,
        req: CreateUserGroupRequest,
        association_id: Uuid,
        refs: &[TenantRef],
    ) -> RepoResult<UserGroup>;
    // Rejects a new parent that would close a loop in the group tree.
    async fn update_user_group(
        &self,
        id: Uuid,
        req: UpdateUserGroupRequest,
        refs: &[TenantRef],
    ) -> RepoResult<UserGroup>;
    async fn delete_user_group(&self, id: Uuid, refs: &[TenantRef]) -> RepoResult<()>;

    // --- Campuses ---
    async fn get_campus(&self, id: Uuid) -> RepoResult<Option<Campus>>;
    // `ids`, when given, restricts the result to that campus set.
    async fn list_campuses(&self, association_id: Uuid, ids: Option<&[Uuid]>) -> RepoResult<Vec<Campus>>;
    async fn create_campus(
        &self,
        req: CreateCampusRequest,
        association_id: Uuid,
        refs: &[TenantRef],
    ) -> RepoResult<Campus>;
    async fn update_campus(&self, id: Uuid, req: UpdateCampusRequest, refs: &[TenantRef]) -> RepoResult<Campus>;
    async fn delete_campus(&self, id: Uuid, refs: &[TenantRef]) -> RepoResult<()>;

    // --- Students ---
    async fn get_student(&self, id: Uuid) -> RepoResult<Option<Student>>;
    async fn list_students(&self, campus_ids: &[Uuid]) -> RepoResult<Vec<Student>>;
    async fn create_student(&self, req: CreateStudentRequest, refs: &[TenantRef]) -> RepoResult<Student>;
    async fn update_student(&self, id: Uuid, req: UpdateStudentRequest, refs: &[TenantRef]) -> RepoResult<Student>;
    async fn delete_student(&self, id: Uuid, refs: &[TenantRef]) -> RepoResult<()>;
}

/// RepositoryState
///
/// The concrete type used to share the persistence layer across the application state.
pub type RepositoryState = Arc<dyn Repository>;

/// Ids of `user_group_id` and its ancestors, nearest first.
///
/// Walks parent pointers through `parent_of`, stopping at a root, at a missing group, or
/// when a group repeats (a pre-existing loop).
pub(crate) fn ancestor_chain(user_group_id: Uuid, parent_of: impl Fn(Uuid) -> Option<Uuid>) -> Vec<Uuid> {
    let mut chain = vec![user_group_id];
    let mut current = user_group_id;
    while let Some(parent) = parent_of(current) {
        if chain.contains(&parent) {
            break;
        }
        chain.push(parent);
        current = parent;
    }
    chain
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ancestor_chain_follows_parents_and_stops_on_loops() {
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let parent_of = |id: Uuid| match id {
            x if x == a => Some(b),
            x if x == b => Some(c),
            x if x == c => Some(a),
            _ => None,
        };
        assert_eq!(ancestor_chain(a, parent_of), vec![a, b, c]);
        assert_eq!(ancestor_chain(Uuid::nil(), parent_of), vec![Uuid::nil()]);
    }

    #[test]
    fn unique_violations_carry_a_readable_message() {
        assert!(matches!(
            conflict("users_email_key"),
            RepoError::Conflict(m) if m == "Email already exists"
        ));
    }
}
