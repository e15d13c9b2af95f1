use async_trait::async_trait;
use sqlx::{PgConnection, PgExecutor, PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{RepoError, RepoResult, Repository};
use crate::{
    guard::{EntityKind, GuardError, TenantRef, ensure_acyclic},
    models::{
        Association, Campus, CreateCampusRequest, CreateStudentRequest, CreateUserGroupRequest,
        DEFAULT_CAMPUS_IMAGE, DEFAULT_STUDENT_IMAGE, NewUser, Student, UpdateCampusRequest,
        UpdateStudentRequest, UpdateUserGroupRequest, UserChanges, UserGroup, UserRecord,
    },
};

const ASSOCIATION_COLUMNS: &str = "id, name, description, created_at, updated_at";
const USER_COLUMNS: &str = "id, username, email, password_hash, first_name, last_name, \
     is_association_admin, is_group_admin, association_id, user_group_id, created_at, updated_at";
const USER_GROUP_COLUMNS: &str =
    "id, name, description, parent_group_id, association_id, created_at, updated_at";
const CAMPUS_COLUMNS: &str =
    "id, name, address, description, image_url, association_id, created_at, updated_at";
const STUDENT_COLUMNS: &str =
    "id, firstname, lastname, email, image_url, gpa, campus_id, created_at, updated_at";

/// PostgresRepository
///
/// The concrete implementation of the `Repository` trait, backed by PostgreSQL.
///
/// Writes run inside a transaction that first takes a `FOR SHARE` lock on every row named
/// by the write's tenancy references, so the association of a referenced row cannot change
/// between the check and the commit.
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    /// Creates a new repository instance using the initialized connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Opens a transaction and verifies `refs` inside it.
    async fn begin_verified(&self, refs: &[TenantRef]) -> RepoResult<Transaction<'static, Postgres>> {
        let mut tx = self.pool.begin().await?;
        for reference in refs {
            let found = association_of(&mut *tx, reference.kind, reference.id, true).await?;
            if let Err(violation) = reference.check(found) {
                tracing::warn!(
                    kind = %reference.kind,
                    id = %reference.id,
                    error = %violation,
                    "tenancy re-check failed inside transaction"
                );
                // Dropping `tx` rolls it back.
                return Err(violation.into());
            }
        }
        Ok(tx)
    }
}

/// Looks up the owning association of a row, optionally taking a share lock on it.
async fn association_of<'e, E>(
    executor: E,
    kind: EntityKind,
    id: Uuid,
    lock: bool,
) -> Result<Option<Option<Uuid>>, sqlx::Error>
where
    E: PgExecutor<'e>,
{
    let (select, lock_clause) = match kind {
        EntityKind::Association => ("SELECT id FROM associations WHERE id = $1", " FOR SHARE"),
        EntityKind::UserGroup => ("SELECT association_id FROM user_groups WHERE id = $1", " FOR SHARE"),
        EntityKind::Campus => ("SELECT association_id FROM campuses WHERE id = $1", " FOR SHARE"),
        EntityKind::User => ("SELECT association_id FROM users WHERE id = $1", " FOR SHARE"),
        EntityKind::Student => (
            "SELECT c.association_id FROM students s \
             LEFT JOIN campuses c ON c.id = s.campus_id WHERE s.id = $1",
            " FOR SHARE OF s",
        ),
    };
    let sql = if lock {
        format!("{select}{lock_clause}")
    } else {
        select.to_string()
    };
    sqlx::query_scalar::<_, Option<Uuid>>(&sql)
        .bind(id)
        .fetch_optional(executor)
        .await
}

/// Ids of `user_group_id` and its ancestors, nearest first.
async fn ancestor_chain(conn: &mut PgConnection, user_group_id: Uuid) -> Result<Vec<Uuid>, sqlx::Error> {
    // CYCLE guards against loops already present in the table.
    sqlx::query_scalar::<_, Uuid>(
        r#"
        WITH RECURSIVE chain(id, parent_group_id, depth) AS (
            SELECT id, parent_group_id, 0 FROM user_groups WHERE id = $1
            UNION ALL
            SELECT g.id, g.parent_group_id, chain.depth + 1
            FROM user_groups g JOIN chain ON g.id = chain.parent_group_id
        ) CYCLE id SET is_cycle USING path
        SELECT id FROM chain WHERE NOT is_cycle ORDER BY depth
        "#,
    )
    .bind(user_group_id)
    .fetch_all(conn)
    .await
}

async fn replace_group_campuses(
    conn: &mut PgConnection,
    user_group_id: Uuid,
    campus_ids: &[Uuid],
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM user_group_campuses WHERE user_group_id = $1")
        .bind(user_group_id)
        .execute(&mut *conn)
        .await?;
    sqlx::query(
        "INSERT INTO user_group_campuses (user_group_id, campus_id) \
         SELECT $1, UNNEST($2::uuid[]) ON CONFLICT DO NOTHING",
    )
    .bind(user_group_id)
    .bind(campus_ids)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn insert_user(conn: &mut PgConnection, user: NewUser) -> Result<UserRecord, sqlx::Error> {
    let sql = format!(
        "INSERT INTO users (id, username, email, password_hash, first_name, last_name, \
         is_association_admin, is_group_admin, association_id, user_group_id, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, NOW(), NOW()) RETURNING {USER_COLUMNS}"
    );
    sqlx::query_as::<_, UserRecord>(&sql)
        .bind(Uuid::new_v4())
        .bind(user.username)
        .bind(user.email)
        .bind(user.password_hash)
        .bind(user.first_name)
        .bind(user.last_name)
        .bind(user.is_association_admin)
        .bind(user.is_group_admin)
        .bind(user.association_id)
        .bind(user.user_group_id)
        .fetch_one(conn)
        .await
}

fn target_missing(kind: EntityKind, id: Uuid) -> RepoError {
    RepoError::Guard(GuardError::TargetNotFound { kind, id })
}

#[async_trait]
impl Repository for PostgresRepository {
    async fn association_of(&self, kind: EntityKind, id: Uuid) -> RepoResult<Option<Option<Uuid>>> {
        Ok(association_of(&self.pool, kind, id, false).await?)
    }

    // --- Associations ---

    async fn get_association(&self, id: Uuid) -> RepoResult<Option<Association>> {
        let sql = format!("SELECT {ASSOCIATION_COLUMNS} FROM associations WHERE id = $1");
        Ok(sqlx::query_as::<_, Association>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn list_associations(&self) -> RepoResult<Vec<Association>> {
        let sql = format!("SELECT {ASSOCIATION_COLUMNS} FROM associations ORDER BY name");
        Ok(sqlx::query_as::<_, Association>(&sql).fetch_all(&self.pool).await?)
    }

    /// create_association_with_admin
    ///
    /// Both rows are written in one transaction; a duplicate association name, username or
    /// email rolls back the whole registration.
    async fn create_association_with_admin(
        &self,
        name: String,
        description: Option<String>,
        admin: NewUser,
    ) -> RepoResult<(Association, UserRecord)> {
        let mut tx = self.pool.begin().await?;
        let sql = format!(
            "INSERT INTO associations (id, name, description, created_at, updated_at) \
             VALUES ($1, $2, $3, NOW(), NOW()) RETURNING {ASSOCIATION_COLUMNS}"
        );
        let association = sqlx::query_as::<_, Association>(&sql)
            .bind(Uuid::new_v4())
            .bind(name)
            .bind(description)
            .fetch_one(&mut *tx)
            .await?;
        let admin = insert_user(
            &mut tx,
            NewUser {
                association_id: Some(association.id),
                ..admin
            },
        )
        .await?;
        tx.commit().await?;
        Ok((association, admin))
    }

    // --- Users ---

    async fn get_user(&self, id: Uuid) -> RepoResult<Option<UserRecord>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        Ok(sqlx::query_as::<_, UserRecord>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_user_by_login(&self, username_or_email: &str) -> RepoResult<Option<UserRecord>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE username = $1 OR email = $1 LIMIT 1");
        Ok(sqlx::query_as::<_, UserRecord>(&sql)
            .bind(username_or_email)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn list_users(&self, association_id: Uuid) -> RepoResult<Vec<UserRecord>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE association_id = $1 ORDER BY username");
        Ok(sqlx::query_as::<_, UserRecord>(&sql)
            .bind(association_id)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn create_user(&self, user: NewUser, refs: &[TenantRef]) -> RepoResult<UserRecord> {
        let mut tx = self.begin_verified(refs).await?;
        let user = insert_user(&mut tx, user).await?;
        tx.commit().await?;
        Ok(user)
    }

    /// update_user
    ///
    /// Partial update; `COALESCE` keeps the stored value for every `None` field.
    async fn update_user(&self, id: Uuid, changes: UserChanges, refs: &[TenantRef]) -> RepoResult<UserRecord> {
        let mut tx = self.begin_verified(refs).await?;
        let sql = format!(
            "UPDATE users SET username = COALESCE($2, username), email = COALESCE($3, email), \
             password_hash = COALESCE($4, password_hash), first_name = COALESCE($5, first_name), \
             last_name = COALESCE($6, last_name), \
             is_association_admin = COALESCE($7, is_association_admin), \
             is_group_admin = COALESCE($8, is_group_admin), updated_at = NOW() \
             WHERE id = $1 RETURNING {USER_COLUMNS}"
        );
        let user = sqlx::query_as::<_, UserRecord>(&sql)
            .bind(id)
            .bind(changes.username)
            .bind(changes.email)
            .bind(changes.password_hash)
            .bind(changes.first_name)
            .bind(changes.last_name)
            .bind(changes.is_association_admin)
            .bind(changes.is_group_admin)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| target_missing(EntityKind::User, id))?;
        tx.commit().await?;
        Ok(user)
    }

    async fn set_user_group(
        &self,
        id: Uuid,
        user_group_id: Option<Uuid>,
        refs: &[TenantRef],
    ) -> RepoResult<UserRecord> {
        let mut tx = self.begin_verified(refs).await?;
        let sql = format!(
            "UPDATE users SET user_group_id = $2, updated_at = NOW() WHERE id = $1 RETURNING {USER_COLUMNS}"
        );
        let user = sqlx::query_as::<_, UserRecord>(&sql)
            .bind(id)
            .bind(user_group_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| target_missing(EntityKind::User, id))?;
        tx.commit().await?;
        Ok(user)
    }

    async fn move_user_to_association(
        &self,
        id: Uuid,
        association_id: Uuid,
        refs: &[TenantRef],
    ) -> RepoResult<UserRecord> {
        let mut tx = self.begin_verified(refs).await?;
        let sql = format!(
            "UPDATE users SET association_id = $2, user_group_id = NULL, \
             is_association_admin = FALSE, is_group_admin = FALSE, updated_at = NOW() \
             WHERE id = $1 RETURNING {USER_COLUMNS}"
        );
        let user = sqlx::query_as::<_, UserRecord>(&sql)
            .bind(id)
            .bind(association_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| target_missing(EntityKind::User, id))?;
        tx.commit().await?;
        Ok(user)
    }

    async fn delete_user(&self, id: Uuid, refs: &[TenantRef]) -> RepoResult<()> {
        let mut tx = self.begin_verified(refs).await?;
        let deleted = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if deleted == 0 {
            return Err(target_missing(EntityKind::User, id));
        }
        tx.commit().await?;
        Ok(())
    }

    // --- User Groups ---

    async fn get_user_group(&self, id: Uuid) -> RepoResult<Option<UserGroup>> {
        let sql = format!("SELECT {USER_GROUP_COLUMNS} FROM user_groups WHERE id = $1");
        Ok(sqlx::query_as::<_, UserGroup>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn list_user_groups(&self, association_id: Uuid) -> RepoResult<Vec<UserGroup>> {
        let sql = format!(
            "SELECT {USER_GROUP_COLUMNS} FROM user_groups WHERE association_id = $1 ORDER BY name"
        );
        Ok(sqlx::query_as::<_, UserGroup>(&sql)
            .bind(association_id)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn list_group_campus_ids(&self, user_group_id: Uuid) -> RepoResult<Vec<Uuid>> {
        Ok(sqlx::query_scalar::<_, Uuid>(
            "SELECT campus_id FROM user_group_campuses WHERE user_group_id = $1 ORDER BY campus_id",
        )
        .bind(user_group_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn create_user_group(
        &self,
        req: CreateUserGroupRequest,
        association_id: Uuid,
        refs: &[TenantRef],
    ) -> RepoResult<UserGroup> {
        let mut tx = self.begin_verified(refs).await?;
        let sql = format!(
            "INSERT INTO user_groups (id, name, description, parent_group_id, association_id, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, NOW(), NOW()) RETURNING {USER_GROUP_COLUMNS}"
        );
        let group = sqlx::query_as::<_, UserGroup>(&sql)
            .bind(Uuid::new_v4())
            .bind(req.name)
            .bind(req.description)
            .bind(req.parent_group_id)
            .bind(association_id)
            .fetch_one(&mut *tx)
            .await?;
        replace_group_campuses(&mut tx, group.id, &req.campus_ids).await?;
        tx.commit().await?;
        Ok(group)
    }

    async fn update_user_group(
        &self,
        id: Uuid,
        req: UpdateUserGroupRequest,
        refs: &[TenantRef],
    ) -> RepoResult<UserGroup> {
        let mut tx = self.begin_verified(refs).await?;
        if let Some(Some(parent)) = req.parent_group_id {
            let chain = ancestor_chain(&mut tx, parent).await?;
            ensure_acyclic(id, &chain)?;
        }

        let sql = format!(
            "UPDATE user_groups SET name = COALESCE($2, name), \
             description = COALESCE($3, description), \
             parent_group_id = CASE WHEN $4 THEN $5 ELSE parent_group_id END, \
             updated_at = NOW() WHERE id = $1 RETURNING {USER_GROUP_COLUMNS}"
        );
        let group = sqlx::query_as::<_, UserGroup>(&sql)
            .bind(id)
            .bind(req.name)
            .bind(req.description)
            .bind(req.parent_group_id.is_some())
            .bind(req.parent_group_id.flatten())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| target_missing(EntityKind::UserGroup, id))?;
        if let Some(campus_ids) = &req.campus_ids {
            replace_group_campuses(&mut tx, id, campus_ids).await?;
        }
        tx.commit().await?;
        Ok(group)
    }

    /// delete_user_group
    ///
    /// Member users and child groups are detached by the schema's `ON DELETE SET NULL`.
    async fn delete_user_group(&self, id: Uuid, refs: &[TenantRef]) -> RepoResult<()> {
        let mut tx = self.begin_verified(refs).await?;
        let deleted = sqlx::query("DELETE FROM user_groups WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if deleted == 0 {
            return Err(target_missing(EntityKind::UserGroup, id));
        }
        tx.commit().await?;
        Ok(())
    }

    // --- Campuses ---

    async fn get_campus(&self, id: Uuid) -> RepoResult<Option<Campus>> {
        let sql = format!("SELECT {CAMPUS_COLUMNS} FROM campuses WHERE id = $1");
        Ok(sqlx::query_as::<_, Campus>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn list_campuses(&self, association_id: Uuid, ids: Option<&[Uuid]>) -> RepoResult<Vec<Campus>> {
        let sql = format!(
            "SELECT {CAMPUS_COLUMNS} FROM campuses \
             WHERE association_id = $1 AND ($2::uuid[] IS NULL OR id = ANY($2)) \
             ORDER BY name, id"
        );
        Ok(sqlx::query_as::<_, Campus>(&sql)
            .bind(association_id)
            .bind(ids)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn create_campus(
        &self,
        req: CreateCampusRequest,
        association_id: Uuid,
        refs: &[TenantRef],
    ) -> RepoResult<Campus> {
        let mut tx = self.begin_verified(refs).await?;
        let sql = format!(
            "INSERT INTO campuses (id, name, address, description, image_url, association_id, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, NOW(), NOW()) RETURNING {CAMPUS_COLUMNS}"
        );
        let campus = sqlx::query_as::<_, Campus>(&sql)
            .bind(Uuid::new_v4())
            .bind(req.name)
            .bind(req.address)
            .bind(req.description)
            .bind(req.image_url.unwrap_or_else(|| DEFAULT_CAMPUS_IMAGE.to_string()))
            .bind(association_id)
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(campus)
    }

    async fn update_campus(&self, id: Uuid, req: UpdateCampusRequest, refs: &[TenantRef]) -> RepoResult<Campus> {
        let mut tx = self.begin_verified(refs).await?;
        let sql = format!(
            "UPDATE campuses SET name = COALESCE($2, name), address = COALESCE($3, address), \
             description = COALESCE($4, description), image_url = COALESCE($5, image_url), \
             updated_at = NOW() WHERE id = $1 RETURNING {CAMPUS_COLUMNS}"
        );
        let campus = sqlx::query_as::<_, Campus>(&sql)
            .bind(id)
            .bind(req.name)
            .bind(req.address)
            .bind(req.description)
            .bind(req.image_url)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| target_missing(EntityKind::Campus, id))?;
        tx.commit().await?;
        Ok(campus)
    }

    /// delete_campus
    ///
    /// Students are unassigned and group memberships dropped by the schema's cascades.
    async fn delete_campus(&self, id: Uuid, refs: &[TenantRef]) -> RepoResult<()> {
        let mut tx = self.begin_verified(refs).await?;
        let deleted = sqlx::query("DELETE FROM campuses WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if deleted == 0 {
            return Err(target_missing(EntityKind::Campus, id));
        }
        tx.commit().await?;
        Ok(())
    }

    // --- Students ---

    async fn get_student(&self, id: Uuid) -> RepoResult<Option<Student>> {
        let sql = format!("SELECT {STUDENT_COLUMNS} FROM students WHERE id = $1");
        Ok(sqlx::query_as::<_, Student>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn list_students(&self, campus_ids: &[Uuid]) -> RepoResult<Vec<Student>> {
        let sql = format!(
            "SELECT {STUDENT_COLUMNS} FROM students WHERE campus_id = ANY($1) \
             ORDER BY lastname, firstname, id"
        );
        Ok(sqlx::query_as::<_, Student>(&sql)
            .bind(campus_ids)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn create_student(&self, req: CreateStudentRequest, refs: &[TenantRef]) -> RepoResult<Student> {
        let mut tx = self.begin_verified(refs).await?;
        let sql = format!(
            "INSERT INTO students (id, firstname, lastname, email, image_url, gpa, campus_id, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, NOW(), NOW()) RETURNING {STUDENT_COLUMNS}"
        );
        let student = sqlx::query_as::<_, Student>(&sql)
            .bind(Uuid::new_v4())
            .bind(req.firstname)
            .bind(req.lastname)
            .bind(req.email)
            .bind(req.image_url.unwrap_or_else(|| DEFAULT_STUDENT_IMAGE.to_string()))
            .bind(req.gpa)
            .bind(req.campus_id)
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(student)
    }

    /// update_student
    ///
    /// `campus_id` distinguishes "leave as is" (absent) from "unassign" (explicit null),
    /// hence the `CASE` instead of `COALESCE` for that column.
    async fn update_student(&self, id: Uuid, req: UpdateStudentRequest, refs: &[TenantRef]) -> RepoResult<Student> {
        let mut tx = self.begin_verified(refs).await?;
        let sql = format!(
            "UPDATE students SET firstname = COALESCE($2, firstname), lastname = COALESCE($3, lastname), \
             email = COALESCE($4, email), image_url = COALESCE($5, image_url), gpa = COALESCE($6, gpa), \
             campus_id = CASE WHEN $7 THEN $8 ELSE campus_id END, updated_at = NOW() \
             WHERE id = $1 RETURNING {STUDENT_COLUMNS}"
        );
        let student = sqlx::query_as::<_, Student>(&sql)
            .bind(id)
            .bind(req.firstname)
            .bind(req.lastname)
            .bind(req.email)
            .bind(req.image_url)
            .bind(req.gpa)
            .bind(req.campus_id.is_some())
            .bind(req.campus_id.flatten())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| target_missing(EntityKind::Student, id))?;
        tx.commit().await?;
        Ok(student)
    }

    async fn delete_student(&self, id: Uuid, refs: &[TenantRef]) -> RepoResult<()> {
        let mut tx = self.begin_verified(refs).await?;
        let deleted = sqlx::query("DELETE FROM students WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if deleted == 0 {
            return Err(target_missing(EntityKind::Student, id));
        }
        tx.commit().await?;
        Ok(())
    }
}
