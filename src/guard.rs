//! Cross-tenant guard.
//!
//! A write never trusts ids it did not load itself. Before a mutation the handler builds the
//! list of [`TenantRef`]s the write depends on: the row being changed (a *target*) and every
//! foreign id it points at (a *reference*). The repository re-reads the tenancy of each one
//! inside the same transaction as the write and runs [`TenantRef::check`] on it, so a row
//! cannot change association between the check and the write.

use std::fmt;

use thiserror::Error;
use uuid::Uuid;

use crate::{error::ApiError, repository::Repository};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Association,
    UserGroup,
    Campus,
    Student,
    User,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::Association => "association",
            EntityKind::UserGroup => "user group",
            EntityKind::Campus => "campus",
            EntityKind::Student => "student",
            EntityKind::User => "user",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuardError {
    #[error("{kind} {id} not found")]
    TargetNotFound { kind: EntityKind, id: Uuid },

    #[error("Access denied to {kind} {id}")]
    OutOfScope { kind: EntityKind, id: Uuid },

    #[error("Referenced {kind} {id} does not exist")]
    ReferenceNotFound { kind: EntityKind, id: Uuid },

    #[error("Referenced {kind} {id} belongs to a different association")]
    CrossTenant { kind: EntityKind, id: Uuid },

    #[error("Setting {parent} as parent of user group {group} would create a cycle")]
    Cycle { group: Uuid, parent: Uuid },
}

/// Whether the id is the row being written or a foreign key the write points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefRole {
    Target,
    Reference,
}

/// What the referenced row's association must be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expected {
    Association(Uuid),
    /// Only existence is required. Used by association reassignment, the one write allowed
    /// to cross tenants.
    Exists,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TenantRef {
    pub kind: EntityKind,
    pub id: Uuid,
    pub role: RefRole,
    pub expected: Expected,
}

impl TenantRef {
    pub fn target(kind: EntityKind, id: Uuid, association_id: Uuid) -> Self {
        TenantRef {
            kind,
            id,
            role: RefRole::Target,
            expected: Expected::Association(association_id),
        }
    }

    pub fn reference(kind: EntityKind, id: Uuid, association_id: Uuid) -> Self {
        TenantRef {
            kind,
            id,
            role: RefRole::Reference,
            expected: Expected::Association(association_id),
        }
    }

    pub fn existing(kind: EntityKind, id: Uuid) -> Self {
        TenantRef {
            kind,
            id,
            role: RefRole::Reference,
            expected: Expected::Exists,
        }
    }

    /// check
    ///
    /// Compares this reference with what the store holds for it.
    /// `found` is what the store knows about the row: `None` when it does not exist,
    /// `Some(association)` otherwise. An association row reports its own id; a student
    /// reports the association of its campus, or `None` when it has no campus.
    pub fn check(&self, found: Option<Option<Uuid>>) -> Result<(), GuardError> {
        let (kind, id) = (self.kind, self.id);
        let Some(actual) = found else {
            return Err(match self.role {
                RefRole::Target => GuardError::TargetNotFound { kind, id },
                RefRole::Reference => GuardError::ReferenceNotFound { kind, id },
            });
        };
        match self.expected {
            Expected::Exists => Ok(()),
            Expected::Association(expected) if actual == Some(expected) => Ok(()),
            Expected::Association(_) => Err(match self.role {
                RefRole::Target => GuardError::OutOfScope { kind, id },
                RefRole::Reference => GuardError::CrossTenant { kind, id },
            }),
        }
    }
}

/// ensure_acyclic
///
/// Rejects a parent assignment that would make a group its own ancestor.
/// `parent_chain` is the proposed parent followed by its ancestors, nearest first.
/// Making `parent_chain[0]` the parent of `group_id` closes a loop iff `group_id` already
/// appears in that chain.
pub fn ensure_acyclic(group_id: Uuid, parent_chain: &[Uuid]) -> Result<(), GuardError> {
    match parent_chain.first() {
        Some(&parent) if parent_chain.contains(&group_id) => Err(GuardError::Cycle {
            group: group_id,
            parent,
        }),
        _ => Ok(()),
    }
}

/// verify_refs
///
/// Evaluates every reference against the current state of the store. Handlers call this
/// to fail early with a precise error; the repository repeats the same checks atomically
/// with the write.
pub async fn verify_refs(repo: &dyn Repository, refs: &[TenantRef]) -> Result<(), ApiError> {
    for reference in refs {
        let found = repo.association_of(reference.kind, reference.id).await?;
        if let Err(violation) = reference.check(found) {
            tracing::warn!(
                kind = %reference.kind,
                id = %reference.id,
                error = %violation,
                "tenancy check rejected write"
            );
            return Err(violation.into());
        }
    }
    Ok(())
}
