/// Role Registry
///
/// Named permission bundles ordered by seniority tier, and the single role
/// each user holds. The action ledger consults this before every append.
use super::{decode_timestamp, encode_timestamp, normalize_identity, now, ActionKind, ActionSet};
use crate::db::Database;
use crate::error::{ModError, ModResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::Row;
use tracing::info;

/// A role with its current number of holders
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleSummary {
    pub name: String,
    pub tier: i64,
    pub permissions: ActionSet,
    pub user_count: i64,
}

/// Role held by a user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub user: String,
    pub role: String,
    pub tier: i64,
    pub permissions: ActionSet,
    pub assigned_by: Option<String>,
    pub assigned_at: DateTime<Utc>,
}

/// Role registry
#[derive(Clone)]
pub struct RoleRegistry {
    db: Database,
}

impl RoleRegistry {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Define a new role.
    ///
    /// Permissions must be monotonic by tier: a role never grants what a
    /// more senior role lacks, nor lacks what a junior role grants.
    pub async fn define_role(
        &self,
        name: &str,
        tier: i64,
        permissions: ActionSet,
    ) -> ModResult<RoleSummary> {
        let name = normalize_identity("role name", name)?;
        if tier < 0 {
            return Err(ModError::Validation("Role tier must not be negative".to_string()));
        }

        let mut txn = self.db.begin_write().await?;

        if find_role(txn.conn(), &name).await?.is_some() {
            return Err(ModError::Duplicate(format!("Role already defined: {}", name)));
        }

        let existing = sqlx::query("SELECT name, tier, permissions FROM roles")
            .fetch_all(txn.conn())
            .await?;

        for row in existing {
            let other: String = row.get("name");
            let other_tier: i64 = row.get("tier");
            let other_perms = ActionSet::from_bits_truncate(row.get("permissions"));

            if other_tier < tier && !permissions.contains(other_perms) {
                return Err(ModError::Validation(format!(
                    "Role {} (tier {}) would lack permissions held by junior role {} (tier {})",
                    name, tier, other, other_tier
                )));
            }
            if other_tier > tier && !other_perms.contains(permissions) {
                return Err(ModError::Validation(format!(
                    "Role {} (tier {}) would exceed permissions of senior role {} (tier {})",
                    name, tier, other, other_tier
                )));
            }
        }

        sqlx::query("INSERT INTO roles (name, tier, permissions, created_at) VALUES (?, ?, ?, ?)")
            .bind(&name)
            .bind(tier)
            .bind(permissions.bits())
            .bind(encode_timestamp(now()))
            .execute(txn.conn())
            .await?;

        txn.commit().await?;

        info!(role = %name, tier, permissions = ?permissions.kinds(), "role defined");

        Ok(RoleSummary {
            name,
            tier,
            permissions,
            user_count: 0,
        })
    }

    /// Assign a role to a user, replacing any role they held
    pub async fn assign_role(
        &self,
        user: &str,
        role_name: &str,
        assigned_by: Option<&str>,
    ) -> ModResult<RoleAssignment> {
        let user = normalize_identity("user", user)?;
        let mut txn = self.db.begin_write().await?;
        let assignment = assign_in(txn.conn(), &user, role_name, assigned_by).await?;
        txn.commit().await?;

        info!(
            user = %assignment.user,
            role = %assignment.role,
            assigned_by = ?assignment.assigned_by,
            "role assigned"
        );

        Ok(assignment)
    }

    /// Remove the role held by a user
    pub async fn revoke_role(&self, user: &str) -> ModResult<()> {
        let user = normalize_identity("user", user)?;
        let mut txn = self.db.begin_write().await?;

        let result = sqlx::query("DELETE FROM role_assignments WHERE user_id = ?")
            .bind(&user)
            .execute(txn.conn())
            .await?;

        if result.rows_affected() == 0 {
            return Err(ModError::NotFound(format!("No role assigned to {}", user)));
        }

        txn.commit().await?;
        info!(user = %user, "role revoked");
        Ok(())
    }

    /// Action kinds a role may perform
    pub async fn permitted_actions(&self, role_name: &str) -> ModResult<ActionSet> {
        let mut conn = self.db.pool().acquire().await?;
        let (_, _, permissions) = find_role(&mut conn, role_name.trim())
            .await?
            .ok_or_else(|| ModError::UnknownRole(role_name.to_string()))?;
        Ok(permissions)
    }

    /// Role currently held by a user
    pub async fn role_of(&self, user: &str) -> ModResult<Option<RoleAssignment>> {
        let mut conn = self.db.pool().acquire().await?;
        role_of_in(&mut conn, user.trim()).await
    }

    /// All roles, most senior first, with holder counts
    pub async fn list_roles(&self) -> ModResult<Vec<RoleSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT r.name, r.tier, r.permissions, COUNT(a.user_id) AS user_count
            FROM roles r
            LEFT JOIN role_assignments a ON a.role = r.name
            GROUP BY r.name, r.tier, r.permissions
            ORDER BY r.tier DESC, r.name ASC
            "#,
        )
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| RoleSummary {
                name: row.get("name"),
                tier: row.get("tier"),
                permissions: ActionSet::from_bits_truncate(row.get("permissions")),
                user_count: row.get("user_count"),
            })
            .collect())
    }

    /// Fail unless `user` holds a role permitting `kind`
    pub async fn authorize(&self, user: &str, kind: ActionKind) -> ModResult<()> {
        let mut conn = self.db.pool().acquire().await?;
        authorize_in(&mut conn, user, kind).await
    }

    /// Fail unless `user` holds a role of the most senior defined tier
    pub async fn require_top_tier(&self, user: &str) -> ModResult<RoleAssignment> {
        let assignment = self
            .role_of(user)
            .await?
            .ok_or_else(|| ModError::Authorization(format!("{} holds no role", user)))?;

        let top: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(tier), 0) FROM roles")
            .fetch_one(self.db.pool())
            .await?;

        if assignment.tier < top {
            return Err(ModError::Authorization(format!(
                "Role {} cannot manage roles",
                assignment.role
            )));
        }

        Ok(assignment)
    }

    /// Fail unless `user` holds any role
    pub async fn require_any_role(&self, user: &str) -> ModResult<RoleAssignment> {
        self.role_of(user)
            .await?
            .ok_or_else(|| ModError::Authorization(format!("{} holds no role", user)))
    }

    /// Give configured administrators the most senior role if they hold none
    pub async fn bootstrap_admins(&self, admin_ids: &[String]) -> ModResult<usize> {
        if admin_ids.is_empty() {
            return Ok(0);
        }

        let mut txn = self.db.begin_write().await?;

        let top: Option<String> =
            sqlx::query_scalar("SELECT name FROM roles ORDER BY tier DESC, name ASC LIMIT 1")
                .fetch_optional(txn.conn())
                .await?;
        let Some(top) = top else {
            return Ok(0);
        };

        let mut granted = 0;
        for id in admin_ids {
            let id = id.trim();
            if id.is_empty() || role_of_in(txn.conn(), id).await?.is_some() {
                continue;
            }
            assign_in(txn.conn(), id, &top, None).await?;
            granted += 1;
        }

        txn.commit().await?;

        if granted > 0 {
            info!(granted, role = %top, "bootstrap administrators assigned");
        }

        Ok(granted)
    }
}

/// Look up a role by case-insensitive name: (name, tier, permissions)
async fn find_role(
    conn: &mut SqliteConnection,
    name: &str,
) -> ModResult<Option<(String, i64, ActionSet)>> {
    let row = sqlx::query("SELECT name, tier, permissions FROM roles WHERE name = ?")
        .bind(name)
        .fetch_optional(conn)
        .await?;

    Ok(row.map(|row| {
        (
            row.get("name"),
            row.get("tier"),
            ActionSet::from_bits_truncate(row.get("permissions")),
        )
    }))
}

async fn assign_in(
    conn: &mut SqliteConnection,
    user: &str,
    role_name: &str,
    assigned_by: Option<&str>,
) -> ModResult<RoleAssignment> {
    let (role, tier, permissions) = find_role(&mut *conn, role_name.trim())
        .await?
        .ok_or_else(|| ModError::UnknownRole(role_name.to_string()))?;

    let assigned_at = now();

    sqlx::query(
        r#"
        INSERT INTO role_assignments (user_id, role, assigned_by, assigned_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT (user_id) DO UPDATE
        SET role = excluded.role,
            assigned_by = excluded.assigned_by,
            assigned_at = excluded.assigned_at
        "#,
    )
    .bind(user)
    .bind(&role)
    .bind(assigned_by)
    .bind(encode_timestamp(assigned_at))
    .execute(conn)
    .await?;

    Ok(RoleAssignment {
        user: user.to_string(),
        role,
        tier,
        permissions,
        assigned_by: assigned_by.map(str::to_string),
        assigned_at,
    })
}

pub(crate) async fn role_of_in(
    conn: &mut SqliteConnection,
    user: &str,
) -> ModResult<Option<RoleAssignment>> {
    let row = sqlx::query(
        r#"
        SELECT a.user_id, a.role, a.assigned_by, a.assigned_at, r.tier, r.permissions
        FROM role_assignments a
        JOIN roles r ON r.name = a.role
        WHERE a.user_id = ?
        "#,
    )
    .bind(user)
    .fetch_optional(conn)
    .await?;

    row.map(|row| parse_assignment(&row)).transpose()
}

/// Authorization check usable inside a write transaction
pub(crate) async fn authorize_in(
    conn: &mut SqliteConnection,
    user: &str,
    kind: ActionKind,
) -> ModResult<()> {
    let assignment = role_of_in(conn, user.trim())
        .await?
        .ok_or_else(|| ModError::Authorization(format!("{} holds no moderator role", user)))?;

    if !assignment.permissions.allows(kind) {
        return Err(ModError::Authorization(format!(
            "Role {} may not {}",
            assignment.role,
            kind.as_str()
        )));
    }

    Ok(())
}

fn parse_assignment(row: &SqliteRow) -> ModResult<RoleAssignment> {
    let assigned_at: String = row.get("assigned_at");

    Ok(RoleAssignment {
        user: row.get("user_id"),
        role: row.get("role"),
        tier: row.get("tier"),
        permissions: ActionSet::from_bits_truncate(row.get("permissions")),
        assigned_by: row.get("assigned_by"),
        assigned_at: decode_timestamp(&assigned_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn registry() -> RoleRegistry {
        RoleRegistry::new(Database::in_memory().await.unwrap())
    }

    #[tokio::test]
    async fn test_default_roles() {
        let roles = registry().await;

        let listed = roles.list_roles().await.unwrap();
        let names: Vec<&str> = listed.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["Administrator", "Moderator", "Junior Moderator"]);

        let junior = roles.permitted_actions("Junior Moderator").await.unwrap();
        assert_eq!(junior, ActionSet::MUTE | ActionSet::WARN);

        // Names are case-insensitive
        let moderator = roles.permitted_actions("moderator").await.unwrap();
        assert!(moderator.allows(ActionKind::Ban));
    }

    #[tokio::test]
    async fn test_unknown_role() {
        let roles = registry().await;

        let err = roles.assign_role("mod1", "Overlord", None).await.unwrap_err();
        assert!(matches!(err, ModError::UnknownRole(_)));

        let err = roles.permitted_actions("Overlord").await.unwrap_err();
        assert!(matches!(err, ModError::UnknownRole(_)));
    }

    #[tokio::test]
    async fn test_assign_counts_and_replaces() {
        let roles = registry().await;

        roles.assign_role("mod1", "Moderator", Some("root")).await.unwrap();
        roles.assign_role("mod2", "Moderator", None).await.unwrap();
        roles.assign_role("mod2", "junior moderator", None).await.unwrap();

        let listed = roles.list_roles().await.unwrap();
        let count = |name: &str| {
            listed
                .iter()
                .find(|r| r.name == name)
                .map(|r| r.user_count)
                .unwrap()
        };
        assert_eq!(count("Moderator"), 1);
        assert_eq!(count("Junior Moderator"), 1);
        assert_eq!(count("Administrator"), 0);

        let held = roles.role_of("mod2").await.unwrap().unwrap();
        assert_eq!(held.role, "Junior Moderator");
    }

    #[tokio::test]
    async fn test_authorize() {
        let roles = registry().await;
        roles.assign_role("junior", "Junior Moderator", None).await.unwrap();

        assert!(roles.authorize("junior", ActionKind::Warn).await.is_ok());
        assert!(matches!(
            roles.authorize("junior", ActionKind::Ban).await.unwrap_err(),
            ModError::Authorization(_)
        ));
        assert!(matches!(
            roles.authorize("nobody", ActionKind::Warn).await.unwrap_err(),
            ModError::Authorization(_)
        ));
    }

    #[tokio::test]
    async fn test_define_role_enforces_monotonic_tiers() {
        let roles = registry().await;

        // Between Junior Moderator (mute+warn) and Moderator (all): must hold mute+warn
        let err = roles
            .define_role("Trainee", 2, ActionSet::WARN)
            .await
            .unwrap_err();
        assert!(matches!(err, ModError::Validation(_)));

        // Tier 0 with ban would exceed Junior Moderator
        let err = roles
            .define_role("Helper", 0, ActionSet::BAN)
            .await
            .unwrap_err();
        assert!(matches!(err, ModError::Validation(_)));

        let helper = roles.define_role("Helper", 0, ActionSet::WARN).await.unwrap();
        assert_eq!(helper.user_count, 0);

        let err = roles
            .define_role("helper", 0, ActionSet::WARN)
            .await
            .unwrap_err();
        assert!(matches!(err, ModError::Duplicate(_)));
    }

    #[tokio::test]
    async fn test_revoke_role() {
        let roles = registry().await;
        roles.assign_role("mod1", "Moderator", None).await.unwrap();

        roles.revoke_role("mod1").await.unwrap();
        assert!(roles.role_of("mod1").await.unwrap().is_none());

        let err = roles.revoke_role("mod1").await.unwrap_err();
        assert!(matches!(err, ModError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_bootstrap_admins() {
        let roles = registry().await;
        roles.assign_role("existing", "Moderator", None).await.unwrap();

        let granted = roles
            .bootstrap_admins(&["root".to_string(), "existing".to_string()])
            .await
            .unwrap();
        assert_eq!(granted, 1);

        assert!(roles.require_top_tier("root").await.is_ok());
        assert!(roles.require_top_tier("existing").await.is_err());
        assert!(roles.require_any_role("existing").await.is_ok());
    }
}
