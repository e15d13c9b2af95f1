//! Scope filter: which rows a [`Caller`] may see.
//!
//! Every rule starts from the caller's association; a caller without one sees nothing.
//! Inside the association, campuses are bounded by the caller's user group unless the
//! caller is an association administrator.
//!
//! Students follow the group boundary for *everyone*, administrators included. The campus
//! rule and the student rule are therefore kept as two separate scopes
//! ([`campus_scope`] and [`student_scope`]) rather than one shared helper.
//!
//! List operations degrade to an empty result when the caller lacks an association or a
//! group. Single-row fetches distinguish a missing row (`NotFound`) from a row outside the
//! caller's scope (`Forbidden`).

use uuid::Uuid;

use crate::{
    auth::Caller,
    error::ApiError,
    models::{Campus, Student, User, UserGroup, UserRecord},
    policy,
    repository::Repository,
};

/// The campus set a caller's view is restricted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CampusScope {
    Nothing,
    /// Every campus of the association.
    Association(Uuid),
    /// Campuses of the association that are members of the group.
    Group {
        association_id: Uuid,
        user_group_id: Uuid,
    },
}

/// Scope used for campus reads. Association administrators bypass the group boundary.
pub fn campus_scope(caller: &Caller) -> CampusScope {
    match (caller.association_id, caller.user_group_id) {
        (None, _) => CampusScope::Nothing,
        (Some(association_id), _) if policy::is_association_admin(caller) => {
            CampusScope::Association(association_id)
        }
        (Some(association_id), Some(user_group_id)) => CampusScope::Group {
            association_id,
            user_group_id,
        },
        (Some(_), None) => CampusScope::Nothing,
    }
}

/// Scope used for student reads. No administrator bypass.
pub fn student_scope(caller: &Caller) -> CampusScope {
    match (caller.association_id, caller.user_group_id) {
        (Some(association_id), Some(user_group_id)) => CampusScope::Group {
            association_id,
            user_group_id,
        },
        _ => CampusScope::Nothing,
    }
}

/// campus_in_scope
///
/// Whether `campus` lies inside `scope`.
/// `group_campus_ids` is the campus set of the scope's group (ignored for the other scopes).
pub fn campus_in_scope(scope: CampusScope, campus: &Campus, group_campus_ids: &[Uuid]) -> bool {
    match scope {
        CampusScope::Nothing => false,
        CampusScope::Association(association_id) => campus.association_id == association_id,
        CampusScope::Group { association_id, .. } => {
            campus.association_id == association_id && group_campus_ids.contains(&campus.id)
        }
    }
}

/// student_in_scope
///
/// A student is in scope through its campus; students without one never are.
/// `campus` is the student's campus row, when it has one.
pub fn student_in_scope(
    scope: CampusScope,
    student: &Student,
    campus: Option<&Campus>,
    group_campus_ids: &[Uuid],
) -> bool {
    match (student.campus_id, campus) {
        (Some(campus_id), Some(campus)) if campus.id == campus_id => {
            campus_in_scope(scope, campus, group_campus_ids)
        }
        _ => false,
    }
}

pub fn user_group_in_scope(caller: &Caller, group: &UserGroup) -> bool {
    policy::is_privileged(caller) && caller.association_id == Some(group.association_id)
}

/// Users are visible to association administrators of the same association.
pub fn user_in_scope(caller: &Caller, user: &UserRecord) -> bool {
    policy::is_association_admin(caller)
        && caller.association_id.is_some()
        && caller.association_id == user.association_id
}

/// Users that privileged callers may act on through the directed admin operations
/// (update, reset password, assign).
pub fn user_manageable(caller: &Caller, user: &UserRecord) -> bool {
    policy::is_privileged(caller)
        && caller.association_id.is_some()
        && caller.association_id == user.association_id
}

async fn scope_campus_ids(repo: &dyn Repository, scope: CampusScope) -> Result<Vec<Uuid>, ApiError> {
    match scope {
        CampusScope::Group { user_group_id, .. } => Ok(repo.list_group_campus_ids(user_group_id).await?),
        _ => Ok(Vec::new()),
    }
}

async fn campuses_in(repo: &dyn Repository, scope: CampusScope) -> Result<Vec<Campus>, ApiError> {
    let campuses = match scope {
        CampusScope::Nothing => Vec::new(),
        CampusScope::Association(association_id) => repo.list_campuses(association_id, None).await?,
        CampusScope::Group { association_id, .. } => {
            let ids = scope_campus_ids(repo, scope).await?;
            if ids.is_empty() {
                Vec::new()
            } else {
                repo.list_campuses(association_id, Some(&ids)).await?
            }
        }
    };
    Ok(campuses)
}

/// visible_campuses
///
/// Campuses of the caller's association, narrowed to the caller's group for non-administrators.
pub async fn visible_campuses(repo: &dyn Repository, caller: &Caller) -> Result<Vec<Campus>, ApiError> {
    let scope = campus_scope(caller);
    let campuses = campuses_in(repo, scope).await?;
    tracing::debug!(caller = %caller.id, ?scope, count = campuses.len(), "resolved visible campuses");
    Ok(campuses)
}

/// visible_students
///
/// Students on the campuses of the caller's group, within the caller's association.
pub async fn visible_students(repo: &dyn Repository, caller: &Caller) -> Result<Vec<Student>, ApiError> {
    let scope = student_scope(caller);
    let campus_ids: Vec<Uuid> = campuses_in(repo, scope).await?.into_iter().map(|c| c.id).collect();
    if campus_ids.is_empty() {
        return Ok(Vec::new());
    }
    let students = repo.list_students(&campus_ids).await?;
    tracing::debug!(caller = %caller.id, count = students.len(), "resolved visible students");
    Ok(students)
}

/// visible_user_groups
///
/// Privileged callers only; everyone else is refused rather than given an empty list.
pub async fn visible_user_groups(repo: &dyn Repository, caller: &Caller) -> Result<Vec<UserGroup>, ApiError> {
    policy::require_privileged(caller)?;
    match caller.association_id {
        Some(association_id) => Ok(repo.list_user_groups(association_id).await?),
        None => Ok(Vec::new()),
    }
}

/// visible_users
///
/// Association administrators only. Group administrators reach individual users through
/// the directed operations instead.
pub async fn visible_users(repo: &dyn Repository, caller: &Caller) -> Result<Vec<User>, ApiError> {
    policy::require_association_admin(caller)?;
    match caller.association_id {
        Some(association_id) => Ok(repo
            .list_users(association_id)
            .await?
            .into_iter()
            .map(User::from)
            .collect()),
        None => Ok(Vec::new()),
    }
}

/// fetch_campus
///
/// `NotFound` when the campus does not exist, `Forbidden` when it is outside [`campus_scope`].
pub async fn fetch_campus(repo: &dyn Repository, caller: &Caller, id: Uuid) -> Result<Campus, ApiError> {
    let campus = repo
        .get_campus(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Campus not found"))?;
    let scope = campus_scope(caller);
    let group_campus_ids = scope_campus_ids(repo, scope).await?;
    if !campus_in_scope(scope, &campus, &group_campus_ids) {
        tracing::warn!(caller = %caller.id, campus = %id, "campus outside caller scope");
        return Err(ApiError::forbidden("Access denied"));
    }
    Ok(campus)
}

/// fetch_student
///
/// `NotFound` when the student does not exist, `Forbidden` when it is outside [`student_scope`].
pub async fn fetch_student(repo: &dyn Repository, caller: &Caller, id: Uuid) -> Result<Student, ApiError> {
    let student = repo
        .get_student(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Student not found"))?;
    let campus = match student.campus_id {
        Some(campus_id) => repo.get_campus(campus_id).await?,
        None => None,
    };
    let scope = student_scope(caller);
    let group_campus_ids = scope_campus_ids(repo, scope).await?;
    if !student_in_scope(scope, &student, campus.as_ref(), &group_campus_ids) {
        tracing::warn!(caller = %caller.id, student = %id, "student outside caller scope");
        return Err(ApiError::forbidden("Access denied"));
    }
    Ok(student)
}

/// fetch_user_group
///
/// Privileged callers of the group's own association only.
pub async fn fetch_user_group(repo: &dyn Repository, caller: &Caller, id: Uuid) -> Result<UserGroup, ApiError> {
    let group = repo
        .get_user_group(id)
        .await?
        .ok_or_else(|| ApiError::not_found("User group not found"))?;
    if !user_group_in_scope(caller, &group) {
        tracing::warn!(caller = %caller.id, group = %id, "user group outside caller scope");
        return Err(ApiError::forbidden("Access denied"));
    }
    Ok(group)
}

/// fetch_user
///
/// Single-user fetch for association administrators, mirroring [`visible_users`].
pub async fn fetch_user(repo: &dyn Repository, caller: &Caller, id: Uuid) -> Result<UserRecord, ApiError> {
    let user = repo
        .get_user(id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;
    if !user_in_scope(caller, &user) {
        tracing::warn!(caller = %caller.id, user = %id, "user outside caller scope");
        return Err(ApiError::forbidden("Access denied"));
    }
    Ok(user)
}

/// manageable_user
///
/// Checks the target of a directed admin operation, already looked up by id or by
/// username/email.
pub fn manageable_user(caller: &Caller, user: Option<UserRecord>) -> Result<UserRecord, ApiError> {
    let user = user.ok_or_else(|| ApiError::not_found("User not found"))?;
    if !user_manageable(caller, &user) {
        tracing::warn!(caller = %caller.id, user = %user.id, "user outside caller scope");
        return Err(ApiError::forbidden("Access denied"));
    }
    Ok(user)
}

/// ensure_campus_placeable
///
/// Non-administrators may only place students on campuses of their own group.
pub async fn ensure_campus_placeable(
    repo: &dyn Repository,
    caller: &Caller,
    campus_id: Uuid,
) -> Result<(), ApiError> {
    if policy::is_association_admin(caller) {
        return Ok(());
    }
    fetch_campus(repo, caller, campus_id).await.map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caller(association_admin: bool, group: Option<Uuid>) -> Caller {
        Caller {
            id: Uuid::new_v4(),
            association_id: Some(Uuid::new_v4()),
            user_group_id: group,
            is_association_admin: association_admin,
            is_group_admin: false,
        }
    }

    fn campus_of(association_id: Uuid) -> Campus {
        Campus {
            id: Uuid::new_v4(),
            association_id,
            ..Campus::default()
        }
    }

    #[test]
    fn admins_bypass_the_group_for_campuses_only() {
        let admin = caller(true, None);
        assert!(matches!(campus_scope(&admin), CampusScope::Association(_)));
        assert_eq!(student_scope(&admin), CampusScope::Nothing);

        let grouped_admin = caller(true, Some(Uuid::new_v4()));
        assert!(matches!(student_scope(&grouped_admin), CampusScope::Group { .. }));
    }

    #[test]
    fn group_scope_needs_both_association_and_membership() {
        let member = caller(false, Some(Uuid::new_v4()));
        let scope = campus_scope(&member);
        let association_id = member.association_id.unwrap();

        let in_group = campus_of(association_id);
        let outside_group = campus_of(association_id);
        let foreign = campus_of(Uuid::new_v4());
        let group_campuses = [in_group.id, foreign.id];

        assert!(campus_in_scope(scope, &in_group, &group_campuses));
        assert!(!campus_in_scope(scope, &outside_group, &group_campuses));
        assert!(!campus_in_scope(scope, &foreign, &group_campuses));
    }

    #[test]
    fn student_needs_a_matching_campus_row() {
        let member = caller(false, Some(Uuid::new_v4()));
        let campus = campus_of(member.association_id.unwrap());
        let scope = student_scope(&member);
        let on_campus = Student {
            campus_id: Some(campus.id),
            ..Student::default()
        };
        let unassigned = Student::default();

        assert!(student_in_scope(scope, &on_campus, Some(&campus), &[campus.id]));
        assert!(!student_in_scope(scope, &unassigned, None, &[campus.id]));
        // A campus row that is not the student's own is ignored.
        let other = campus_of(member.association_id.unwrap());
        assert!(!student_in_scope(scope, &on_campus, Some(&other), &[other.id]));
    }
}
