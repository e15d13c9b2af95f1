//! Shared fixtures for the integration tests.
//!
//! Everything runs against `InMemoryRepository` and `MockMailer`, except the fault paths,
//! which use [`UnavailableRepository`]. Seeding goes straight
//! through the repository with no tenancy references, so tests can build cross-tenant
//! situations the handlers would refuse to create.

#![allow(dead_code)]

use std::sync::Arc;

use campus_portal::{
    AppConfig, AppState, InMemoryRepository, MockMailer, RepositoryState,
    auth::{Caller, issue_token},
    guard::{EntityKind, TenantRef},
    models::{
        Association, Campus, CreateCampusRequest, CreateStudentRequest, CreateUserGroupRequest,
        NewUser, Student, UpdateCampusRequest, UpdateStudentRequest, UpdateUserGroupRequest,
        UserChanges, UserGroup, UserRecord,
    },
    repository::{RepoError, RepoResult, Repository},
};
use async_trait::async_trait;
use uuid::Uuid;

/// Placeholder for seeded accounts that never log in. Not a valid PHC string.
pub const UNUSABLE_HASH: &str = "seeded-without-password";

pub struct TestApp {
    pub state: AppState,
    pub repo: RepositoryState,
    pub mailer: MockMailer,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_mailer(MockMailer::new())
    }

    pub fn with_mailer(mailer: MockMailer) -> Self {
        Self::with_parts(Arc::new(InMemoryRepository::new()), mailer)
    }

    /// Runs against a store that fails every call.
    pub fn unavailable() -> Self {
        Self::with_parts(Arc::new(UnavailableRepository), MockMailer::new())
    }

    fn with_parts(repo: RepositoryState, mailer: MockMailer) -> Self {
        let state = AppState {
            repo: repo.clone(),
            mailer: Arc::new(mailer.clone()),
            config: AppConfig::default(),
        };
        TestApp { state, repo, mailer }
    }

    pub fn token_for(&self, user: &UserRecord) -> String {
        issue_token(user.id, &self.state.config).expect("token signing")
    }

    /// An association together with its first administrator (no group).
    pub async fn association(&self, name: &str) -> (Association, UserRecord) {
        self.repo
            .create_association_with_admin(
                unique(name),
                None,
                new_user(&format!("{name}-admin"), true, false, None, None),
            )
            .await
            .expect("seed association")
    }

    pub async fn campus(&self, association_id: Uuid, name: &str) -> Campus {
        let req = CreateCampusRequest {
            name: name.to_string(),
            address: format!("1 {name} Road"),
            description: None,
            image_url: None,
        };
        self.repo
            .create_campus(req, association_id, &[])
            .await
            .expect("seed campus")
    }

    pub async fn group(&self, association_id: Uuid, name: &str, campus_ids: &[Uuid]) -> UserGroup {
        self.child_group(association_id, name, None, campus_ids).await
    }

    pub async fn child_group(
        &self,
        association_id: Uuid,
        name: &str,
        parent: Option<Uuid>,
        campus_ids: &[Uuid],
    ) -> UserGroup {
        let req = CreateUserGroupRequest {
            name: unique(name),
            description: None,
            parent_group_id: parent,
            campus_ids: campus_ids.to_vec(),
        };
        self.repo
            .create_user_group(req, association_id, &[])
            .await
            .expect("seed user group")
    }

    pub async fn member(&self, association_id: Uuid, group: Option<Uuid>, name: &str) -> UserRecord {
        self.user(association_id, group, name, false, false).await
    }

    pub async fn group_admin(&self, association_id: Uuid, group: Option<Uuid>, name: &str) -> UserRecord {
        self.user(association_id, group, name, false, true).await
    }

    pub async fn association_admin(
        &self,
        association_id: Uuid,
        group: Option<Uuid>,
        name: &str,
    ) -> UserRecord {
        self.user(association_id, group, name, true, false).await
    }

    async fn user(
        &self,
        association_id: Uuid,
        group: Option<Uuid>,
        name: &str,
        association_admin: bool,
        group_admin: bool,
    ) -> UserRecord {
        self.repo
            .create_user(
                new_user(name, association_admin, group_admin, Some(association_id), group),
                &[],
            )
            .await
            .expect("seed user")
    }

    pub async fn student(&self, campus_id: Option<Uuid>, name: &str) -> Student {
        let req = CreateStudentRequest {
            firstname: name.to_string(),
            lastname: "Tester".to_string(),
            email: format!("{}@students.test", unique(name)),
            image_url: None,
            gpa: 3.2,
            campus_id,
        };
        self.repo
            .create_student(req, &[])
            .await
            .expect("seed student")
    }
}

pub fn caller(user: &UserRecord) -> Caller {
    Caller::from(user)
}

/// `prefix` plus a short random suffix, for columns with unique constraints.
pub fn unique(prefix: &str) -> String {
    format!("{prefix}-{}", &Uuid::new_v4().simple().to_string()[..8])
}

fn new_user(
    name: &str,
    association_admin: bool,
    group_admin: bool,
    association_id: Option<Uuid>,
    user_group_id: Option<Uuid>,
) -> NewUser {
    let username = unique(name);
    NewUser {
        email: format!("{username}@campus.test"),
        username,
        password_hash: UNUSABLE_HASH.to_string(),
        first_name: name.to_string(),
        last_name: "Tester".to_string(),
        is_association_admin: association_admin,
        is_group_admin: group_admin,
        association_id,
        user_group_id,
    }
}

pub fn ids<T>(rows: &[T], id: impl Fn(&T) -> Uuid) -> Vec<Uuid> {
    let mut ids: Vec<Uuid> = rows.iter().map(id).collect();
    ids.sort();
    ids
}

/// A store whose connection is gone: every call fails with a database error.
pub struct UnavailableRepository;

fn down<T>() -> RepoResult<T> {
    Err(RepoError::Database("connection refused".to_string()))
}

#[async_trait]
impl Repository for UnavailableRepository {
    async fn association_of(&self, _: EntityKind, _: Uuid) -> RepoResult<Option<Option<Uuid>>> {
        down()
    }
    async fn get_association(&self, _: Uuid) -> RepoResult<Option<Association>> {
        down()
    }
    async fn list_associations(&self) -> RepoResult<Vec<Association>> {
        down()
    }
    async fn create_association_with_admin(
        &self,
        _: String,
        _: Option<String>,
        _: NewUser,
    ) -> RepoResult<(Association, UserRecord)> {
        down()
    }
    async fn get_user(&self, _: Uuid) -> RepoResult<Option<UserRecord>> {
        down()
    }
    async fn find_user_by_login(&self, _: &str) -> RepoResult<Option<UserRecord>> {
        down()
    }
    async fn list_users(&self, _: Uuid) -> RepoResult<Vec<UserRecord>> {
        down()
    }
    async fn create_user(&self, _: NewUser, _: &[TenantRef]) -> RepoResult<UserRecord> {
        down()
    }
    async fn update_user(&self, _: Uuid, _: UserChanges, _: &[TenantRef]) -> RepoResult<UserRecord> {
        down()
    }
    async fn set_user_group(&self, _: Uuid, _: Option<Uuid>, _: &[TenantRef]) -> RepoResult<UserRecord> {
        down()
    }
    async fn move_user_to_association(&self, _: Uuid, _: Uuid, _: &[TenantRef]) -> RepoResult<UserRecord> {
        down()
    }
    async fn delete_user(&self, _: Uuid, _: &[TenantRef]) -> RepoResult<()> {
        down()
    }
    async fn get_user_group(&self, _: Uuid) -> RepoResult<Option<UserGroup>> {
        down()
    }
    async fn list_user_groups(&self, _: Uuid) -> RepoResult<Vec<UserGroup>> {
        down()
    }
    async fn list_group_campus_ids(&self, _: Uuid) -> RepoResult<Vec<Uuid>> {
        down()
    }
    async fn create_user_group(
        &self,
        _: CreateUserGroupRequest,
        _: Uuid,
        _: &[TenantRef],
    ) -> RepoResult<UserGroup> {
        down()
    }
    async fn update_user_group(
        &self,
        _: Uuid,
        _: UpdateUserGroupRequest,
        _: &[TenantRef],
    ) -> RepoResult<UserGroup> {
        down()
    }
    async fn delete_user_group(&self, _: Uuid, _: &[TenantRef]) -> RepoResult<()> {
        down()
    }
    async fn get_campus(&self, _: Uuid) -> RepoResult<Option<Campus>> {
        down()
    }
    async fn list_campuses(&self, _: Uuid, _: Option<&[Uuid]>) -> RepoResult<Vec<Campus>> {
        down()
    }
    async fn create_campus(&self, _: CreateCampusRequest, _: Uuid, _: &[TenantRef]) -> RepoResult<Campus> {
        down()
    }
    async fn update_campus(&self, _: Uuid, _: UpdateCampusRequest, _: &[TenantRef]) -> RepoResult<Campus> {
        down()
    }
    async fn delete_campus(&self, _: Uuid, _: &[TenantRef]) -> RepoResult<()> {
        down()
    }
    async fn get_student(&self, _: Uuid) -> RepoResult<Option<Student>> {
        down()
    }
    async fn list_students(&self, _: &[Uuid]) -> RepoResult<Vec<Student>> {
        down()
    }
    async fn create_student(&self, _: CreateStudentRequest, _: &[TenantRef]) -> RepoResult<Student> {
        down()
    }
    async fn update_student(&self, _: Uuid, _: UpdateStudentRequest, _: &[TenantRef]) -> RepoResult<Student> {
        down()
    }
    async fn delete_student(&self, _: Uuid, _: &[TenantRef]) -> RepoResult<()> {
        down()
    }
}
