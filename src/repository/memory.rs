use std::{
    collections::{BTreeSet, HashMap},
    sync::{Mutex, MutexGuard},
};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use super::{RepoError, RepoResult, Repository, ancestor_chain, conflict};
use crate::{
    guard::{EntityKind, GuardError, TenantRef, ensure_acyclic},
    models::{
        Association, Campus, CreateCampusRequest, CreateStudentRequest, CreateUserGroupRequest,
        DEFAULT_CAMPUS_IMAGE, DEFAULT_STUDENT_IMAGE, NewUser, Student, UpdateCampusRequest,
        UpdateStudentRequest, UpdateUserGroupRequest, UserChanges, UserGroup, UserRecord,
    },
};

#[derive(Default)]
struct Store {
    associations: HashMap<Uuid, Association>,
    users: HashMap<Uuid, UserRecord>,
    user_groups: HashMap<Uuid, UserGroup>,
    // (user_group_id, campus_id)
    group_campuses: BTreeSet<(Uuid, Uuid)>,
    campuses: HashMap<Uuid, Campus>,
    students: HashMap<Uuid, Student>,
}

impl Store {
    fn association_of(&self, kind: EntityKind, id: Uuid) -> Option<Option<Uuid>> {
        match kind {
            EntityKind::Association => self.associations.get(&id).map(|a| Some(a.id)),
            EntityKind::UserGroup => self.user_groups.get(&id).map(|g| Some(g.association_id)),
            EntityKind::Campus => self.campuses.get(&id).map(|c| Some(c.association_id)),
            EntityKind::User => self.users.get(&id).map(|u| u.association_id),
            EntityKind::Student => self.students.get(&id).map(|s| {
                s.campus_id
                    .and_then(|campus_id| self.campuses.get(&campus_id))
                    .map(|c| c.association_id)
            }),
        }
    }

    fn verify(&self, refs: &[TenantRef]) -> Result<(), GuardError> {
        refs.iter()
            .try_for_each(|r| r.check(self.association_of(r.kind, r.id)))
    }

    fn ensure_user_unique(&self, username: &str, email: &str, except: Option<Uuid>) -> RepoResult<()> {
        let others = self.users.values().filter(|u| Some(u.id) != except);
        for user in others {
            if user.username == username {
                return Err(conflict("users_username_key"));
            }
            if user.email == email {
                return Err(conflict("users_email_key"));
            }
        }
        Ok(())
    }

    fn ensure_group_name_unique(&self, name: &str, except: Option<Uuid>) -> RepoResult<()> {
        if self
            .user_groups
            .values()
            .any(|g| g.name == name && Some(g.id) != except)
        {
            return Err(conflict("user_groups_name_key"));
        }
        Ok(())
    }

    fn insert_user(&mut self, user: NewUser) -> RepoResult<UserRecord> {
        self.ensure_user_unique(&user.username, &user.email, None)?;
        let now = Utc::now();
        let record = UserRecord {
            id: Uuid::new_v4(),
            username: user.username,
            email: user.email,
            password_hash: user.password_hash,
            first_name: user.first_name,
            last_name: user.last_name,
            is_association_admin: user.is_association_admin,
            is_group_admin: user.is_group_admin,
            association_id: user.association_id,
            user_group_id: user.user_group_id,
            created_at: now,
            updated_at: now,
        };
        self.users.insert(record.id, record.clone());
        Ok(record)
    }

    fn user_mut(&mut self, id: Uuid) -> RepoResult<&mut UserRecord> {
        self.users.get_mut(&id).ok_or_else(|| {
            RepoError::Guard(GuardError::TargetNotFound {
                kind: EntityKind::User,
                id,
            })
        })
    }

    fn replace_group_campuses(&mut self, user_group_id: Uuid, campus_ids: &[Uuid]) {
        self.group_campuses.retain(|(group, _)| *group != user_group_id);
        self.group_campuses
            .extend(campus_ids.iter().map(|campus_id| (user_group_id, *campus_id)));
    }
}

fn target_missing(kind: EntityKind, id: Uuid) -> RepoError {
    RepoError::Guard(GuardError::TargetNotFound { kind, id })
}

/// InMemoryRepository
///
/// A `Repository` held entirely in process memory. All state sits behind one mutex, so each
/// write, including its tenancy re-check, happens in a single critical section. Used by the
/// test-suite and for running the service without a database.
#[derive(Default)]
pub struct InMemoryRepository {
    store: Mutex<Store>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn association_of(&self, kind: EntityKind, id: Uuid) -> RepoResult<Option<Option<Uuid>>> {
        Ok(self.lock().association_of(kind, id))
    }

    // --- Associations ---

    async fn get_association(&self, id: Uuid) -> RepoResult<Option<Association>> {
        Ok(self.lock().associations.get(&id).cloned())
    }

    async fn list_associations(&self) -> RepoResult<Vec<Association>> {
        let mut associations: Vec<Association> = self.lock().associations.values().cloned().collect();
        associations.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(associations)
    }

    async fn create_association_with_admin(
        &self,
        name: String,
        description: Option<String>,
        admin: NewUser,
    ) -> RepoResult<(Association, UserRecord)> {
        let mut store = self.lock();
        if store.associations.values().any(|a| a.name == name) {
            return Err(conflict("associations_name_key"));
        }
        store.ensure_user_unique(&admin.username, &admin.email, None)?;

        let now = Utc::now();
        let association = Association {
            id: Uuid::new_v4(),
            name,
            description,
            created_at: now,
            updated_at: now,
        };
        store.associations.insert(association.id, association.clone());
        let admin = store.insert_user(NewUser {
            association_id: Some(association.id),
            ..admin
        })?;
        Ok((association, admin))
    }

    // --- Users ---

    async fn get_user(&self, id: Uuid) -> RepoResult<Option<UserRecord>> {
        Ok(self.lock().users.get(&id).cloned())
    }

    async fn find_user_by_login(&self, username_or_email: &str) -> RepoResult<Option<UserRecord>> {
        Ok(self
            .lock()
            .users
            .values()
            .find(|u| u.username == username_or_email || u.email == username_or_email)
            .cloned())
    }

    async fn list_users(&self, association_id: Uuid) -> RepoResult<Vec<UserRecord>> {
        let mut users: Vec<UserRecord> = self
            .lock()
            .users
            .values()
            .filter(|u| u.association_id == Some(association_id))
            .cloned()
            .collect();
        users.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(users)
    }

    async fn create_user(&self, user: NewUser, refs: &[TenantRef]) -> RepoResult<UserRecord> {
        let mut store = self.lock();
        store.verify(refs)?;
        store.insert_user(user)
    }

    async fn update_user(&self, id: Uuid, changes: UserChanges, refs: &[TenantRef]) -> RepoResult<UserRecord> {
        let mut store = self.lock();
        store.verify(refs)?;
        let current = store.users.get(&id).cloned().ok_or_else(|| target_missing(EntityKind::User, id))?;
        let username = changes.username.unwrap_or(current.username);
        let email = changes.email.unwrap_or(current.email);
        store.ensure_user_unique(&username, &email, Some(id))?;

        let user = store.user_mut(id)?;
        user.username = username;
        user.email = email;
        if let Some(hash) = changes.password_hash {
            user.password_hash = hash;
        }
        if let Some(first_name) = changes.first_name {
            user.first_name = first_name;
        }
        if let Some(last_name) = changes.last_name {
            user.last_name = last_name;
        }
        if let Some(flag) = changes.is_association_admin {
            user.is_association_admin = flag;
        }
        if let Some(flag) = changes.is_group_admin {
            user.is_group_admin = flag;
        }
        user.updated_at = Utc::now();
        Ok(user.clone())
    }

    async fn set_user_group(
        &self,
        id: Uuid,
        user_group_id: Option<Uuid>,
        refs: &[TenantRef],
    ) -> RepoResult<UserRecord> {
        let mut store = self.lock();
        store.verify(refs)?;
        let user = store.user_mut(id)?;
        user.user_group_id = user_group_id;
        user.updated_at = Utc::now();
        Ok(user.clone())
    }

    async fn move_user_to_association(
        &self,
        id: Uuid,
        association_id: Uuid,
        refs: &[TenantRef],
    ) -> RepoResult<UserRecord> {
        let mut store = self.lock();
        store.verify(refs)?;
        let user = store.user_mut(id)?;
        user.association_id = Some(association_id);
        user.user_group_id = None;
        user.is_association_admin = false;
        user.is_group_admin = false;
        user.updated_at = Utc::now();
        Ok(user.clone())
    }

    async fn delete_user(&self, id: Uuid, refs: &[TenantRef]) -> RepoResult<()> {
        let mut store = self.lock();
        store.verify(refs)?;
        store
            .users
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| target_missing(EntityKind::User, id))
    }

    // --- User Groups ---

    async fn get_user_group(&self, id: Uuid) -> RepoResult<Option<UserGroup>> {
        Ok(self.lock().user_groups.get(&id).cloned())
    }

    async fn list_user_groups(&self, association_id: Uuid) -> RepoResult<Vec<UserGroup>> {
        let mut groups: Vec<UserGroup> = self
            .lock()
            .user_groups
            .values()
            .filter(|g| g.association_id == association_id)
            .cloned()
            .collect();
        groups.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(groups)
    }

    async fn list_group_campus_ids(&self, user_group_id: Uuid) -> RepoResult<Vec<Uuid>> {
        Ok(self
            .lock()
            .group_campuses
            .iter()
            .filter(|(group, _)| *group == user_group_id)
            .map(|(_, campus)| *campus)
            .collect())
    }

    async fn create_user_group(
        &self,
        req: CreateUserGroupRequest,
        association_id: Uuid,
        refs: &[TenantRef],
    ) -> RepoResult<UserGroup> {
        let mut store = self.lock();
        store.verify(refs)?;
        store.ensure_group_name_unique(&req.name, None)?;

        let now = Utc::now();
        let group = UserGroup {
            id: Uuid::new_v4(),
            name: req.name,
            description: req.description,
            parent_group_id: req.parent_group_id,
            association_id,
            created_at: now,
            updated_at: now,
        };
        store.user_groups.insert(group.id, group.clone());
        store.replace_group_campuses(group.id, &req.campus_ids);
        Ok(group)
    }

    async fn update_user_group(
        &self,
        id: Uuid,
        req: UpdateUserGroupRequest,
        refs: &[TenantRef],
    ) -> RepoResult<UserGroup> {
        let mut store = self.lock();
        store.verify(refs)?;
        if !store.user_groups.contains_key(&id) {
            return Err(target_missing(EntityKind::UserGroup, id));
        }
        if let Some(name) = &req.name {
            store.ensure_group_name_unique(name, Some(id))?;
        }
        if let Some(Some(parent)) = req.parent_group_id {
            let chain = ancestor_chain(parent, |g| {
                store.user_groups.get(&g).and_then(|group| group.parent_group_id)
            });
            ensure_acyclic(id, &chain)?;
        }
        if let Some(campus_ids) = &req.campus_ids {
            store.replace_group_campuses(id, campus_ids);
        }

        let group = store
            .user_groups
            .get_mut(&id)
            .ok_or_else(|| target_missing(EntityKind::UserGroup, id))?;
        if let Some(name) = req.name {
            group.name = name;
        }
        if let Some(description) = req.description {
            group.description = Some(description);
        }
        if let Some(parent) = req.parent_group_id {
            group.parent_group_id = parent;
        }
        group.updated_at = Utc::now();
        Ok(group.clone())
    }

    async fn delete_user_group(&self, id: Uuid, refs: &[TenantRef]) -> RepoResult<()> {
        let mut store = self.lock();
        store.verify(refs)?;
        if store.user_groups.remove(&id).is_none() {
            return Err(target_missing(EntityKind::UserGroup, id));
        }
        store.group_campuses.retain(|(group, _)| *group != id);
        for user in store.users.values_mut().filter(|u| u.user_group_id == Some(id)) {
            user.user_group_id = None;
        }
        for child in store
            .user_groups
            .values_mut()
            .filter(|g| g.parent_group_id == Some(id))
        {
            child.parent_group_id = None;
        }
        Ok(())
    }

    // --- Campuses ---

    async fn get_campus(&self, id: Uuid) -> RepoResult<Option<Campus>> {
        Ok(self.lock().campuses.get(&id).cloned())
    }

    async fn list_campuses(&self, association_id: Uuid, ids: Option<&[Uuid]>) -> RepoResult<Vec<Campus>> {
        let mut campuses: Vec<Campus> = self
            .lock()
            .campuses
            .values()
            .filter(|c| c.association_id == association_id)
            .filter(|c| ids.is_none_or(|ids| ids.contains(&c.id)))
            .cloned()
            .collect();
        campuses.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(campuses)
    }

    async fn create_campus(
        &self,
        req: CreateCampusRequest,
        association_id: Uuid,
        refs: &[TenantRef],
    ) -> RepoResult<Campus> {
        let mut store = self.lock();
        store.verify(refs)?;
        let now = Utc::now();
        let campus = Campus {
            id: Uuid::new_v4(),
            name: req.name,
            address: req.address,
            description: req.description,
            image_url: req.image_url.unwrap_or_else(|| DEFAULT_CAMPUS_IMAGE.to_string()),
            association_id,
            created_at: now,
            updated_at: now,
        };
        store.campuses.insert(campus.id, campus.clone());
        Ok(campus)
    }

    async fn update_campus(&self, id: Uuid, req: UpdateCampusRequest, refs: &[TenantRef]) -> RepoResult<Campus> {
        let mut store = self.lock();
        store.verify(refs)?;
        let campus = store
            .campuses
            .get_mut(&id)
            .ok_or_else(|| target_missing(EntityKind::Campus, id))?;
        if let Some(name) = req.name {
            campus.name = name;
        }
        if let Some(address) = req.address {
            campus.address = address;
        }
        if let Some(description) = req.description {
            campus.description = Some(description);
        }
        if let Some(image_url) = req.image_url {
            campus.image_url = image_url;
        }
        campus.updated_at = Utc::now();
        Ok(campus.clone())
    }

    async fn delete_campus(&self, id: Uuid, refs: &[TenantRef]) -> RepoResult<()> {
        let mut store = self.lock();
        store.verify(refs)?;
        if store.campuses.remove(&id).is_none() {
            return Err(target_missing(EntityKind::Campus, id));
        }
        store.group_campuses.retain(|(_, campus)| *campus != id);
        for student in store.students.values_mut().filter(|s| s.campus_id == Some(id)) {
            student.campus_id = None;
        }
        Ok(())
    }

    // --- Students ---

    async fn get_student(&self, id: Uuid) -> RepoResult<Option<Student>> {
        Ok(self.lock().students.get(&id).cloned())
    }

    async fn list_students(&self, campus_ids: &[Uuid]) -> RepoResult<Vec<Student>> {
        let mut students: Vec<Student> = self
            .lock()
            .students
            .values()
            .filter(|s| s.campus_id.is_some_and(|c| campus_ids.contains(&c)))
            .cloned()
            .collect();
        students.sort_by(|a, b| {
            (&a.lastname, &a.firstname, a.id).cmp(&(&b.lastname, &b.firstname, b.id))
        });
        Ok(students)
    }

    async fn create_student(&self, req: CreateStudentRequest, refs: &[TenantRef]) -> RepoResult<Student> {
        let mut store = self.lock();
        store.verify(refs)?;
        let now = Utc::now();
        let student = Student {
            id: Uuid::new_v4(),
            firstname: req.firstname,
            lastname: req.lastname,
            email: req.email,
            image_url: req.image_url.unwrap_or_else(|| DEFAULT_STUDENT_IMAGE.to_string()),
            gpa: req.gpa,
            campus_id: req.campus_id,
            created_at: now,
            updated_at: now,
        };
        store.students.insert(student.id, student.clone());
        Ok(student)
    }

    async fn update_student(&self, id: Uuid, req: UpdateStudentRequest, refs: &[TenantRef]) -> RepoResult<Student> {
        let mut store = self.lock();
        store.verify(refs)?;
        let student = store
            .students
            .get_mut(&id)
            .ok_or_else(|| target_missing(EntityKind::Student, id))?;
        if let Some(firstname) = req.firstname {
            student.firstname = firstname;
        }
        if let Some(lastname) = req.lastname {
            student.lastname = lastname;
        }
        if let Some(email) = req.email {
            student.email = email;
        }
        if let Some(image_url) = req.image_url {
            student.image_url = image_url;
        }
        if let Some(gpa) = req.gpa {
            student.gpa = gpa;
        }
        if let Some(campus_id) = req.campus_id {
            student.campus_id = campus_id;
        }
        student.updated_at = Utc::now();
        Ok(student.clone())
    }

    async fn delete_student(&self, id: Uuid, refs: &[TenantRef]) -> RepoResult<()> {
        let mut store = self.lock();
        store.verify(refs)?;
        store
            .students
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| target_missing(EntityKind::Student, id))
    }
}
