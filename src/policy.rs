//! Role policy: pure predicates over a [`Caller`].
//!
//! Association administrators hold a strict superset of group-administrator rights. Where
//! both tiers pass a check, only group administrators are subject to the extra per-tenant
//! restrictions below.

use uuid::Uuid;

use crate::{auth::Caller, error::ApiError, models::UserRecord};

pub fn is_association_admin(caller: &Caller) -> bool {
    caller.is_association_admin
}

pub fn is_group_admin(caller: &Caller) -> bool {
    caller.is_group_admin
}

pub fn is_privileged(caller: &Caller) -> bool {
    is_association_admin(caller) || is_group_admin(caller)
}

pub fn require_association_admin(caller: &Caller) -> Result<(), ApiError> {
    if is_association_admin(caller) {
        Ok(())
    } else {
        tracing::warn!(caller = %caller.id, "association admin access denied");
        Err(ApiError::forbidden("Association admin access required"))
    }
}

pub fn require_privileged(caller: &Caller) -> Result<(), ApiError> {
    if is_privileged(caller) {
        Ok(())
    } else {
        tracing::warn!(caller = %caller.id, "group admin access denied");
        Err(ApiError::forbidden(
            "Group admin or association admin access required",
        ))
    }
}

/// The association the caller acts in. Writes are impossible without one.
pub fn tenant(caller: &Caller) -> Result<Uuid, ApiError> {
    caller
        .association_id
        .ok_or_else(|| ApiError::forbidden("User is not associated with any association"))
}

/// Only association administrators may hand out the association-admin flag.
/// Either privileged tier may hand out the group-admin flag.
pub fn ensure_can_grant(caller: &Caller, association_admin: bool) -> Result<(), ApiError> {
    if association_admin && !is_association_admin(caller) {
        return Err(ApiError::forbidden(
            "Only association admins can grant association admin rights",
        ));
    }
    Ok(())
}

/// Group administrators may manage ordinary users and other group administrators, but
/// never an association administrator.
pub fn ensure_can_manage(caller: &Caller, target: &UserRecord) -> Result<(), ApiError> {
    if target.is_association_admin && !is_association_admin(caller) {
        return Err(ApiError::forbidden(
            "Only association admins can manage association admins",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caller(association_admin: bool, group_admin: bool) -> Caller {
        Caller {
            id: Uuid::new_v4(),
            association_id: Some(Uuid::new_v4()),
            user_group_id: None,
            is_association_admin: association_admin,
            is_group_admin: group_admin,
        }
    }

    #[test]
    fn privilege_tiers() {
        assert!(!is_privileged(&caller(false, false)));
        assert!(is_privileged(&caller(false, true)));
        assert!(is_privileged(&caller(true, false)));
        assert!(require_association_admin(&caller(false, true)).is_err());
        assert!(require_privileged(&caller(false, true)).is_ok());
    }

    #[test]
    fn only_association_admins_grant_association_admin() {
        assert!(ensure_can_grant(&caller(true, false), true).is_ok());
        assert!(matches!(
            ensure_can_grant(&caller(false, true), true),
            Err(ApiError::Forbidden(_))
        ));
        assert!(ensure_can_grant(&caller(false, true), false).is_ok());
    }

    #[test]
    fn group_admins_cannot_manage_association_admins() {
        let target = UserRecord {
            is_association_admin: true,
            ..UserRecord::default()
        };
        assert!(ensure_can_manage(&caller(false, true), &target).is_err());
        assert!(ensure_can_manage(&caller(true, false), &target).is_ok());
    }

    #[test]
    fn tenant_requires_an_association() {
        let mut c = caller(true, false);
        c.association_id = None;
        assert!(matches!(tenant(&c), Err(ApiError::Forbidden(_))));
    }
}
