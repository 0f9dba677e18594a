/// Ban Registry
///
/// Users currently banned. A ban appends to the ledger and inserts here in
/// one transaction; an unban only removes the registry entry.
use super::ledger::{self, ModerationAction, NewAction};
use super::{decode_timestamp, encode_timestamp, normalize_identity, ActionKind};
use crate::db::Database;
use crate::error::{ModError, ModResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::info;

/// Active ban
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BanEntry {
    pub user: String,
    pub reason: String,
    pub banned_by: String,
    pub banned_at: DateTime<Utc>,
    /// Ledger entry that created this ban
    pub action_id: i64,
}

#[derive(Clone)]
pub struct BanRegistry {
    db: Database,
}

impl BanRegistry {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Ban a user, recording the action in the ledger.
    ///
    /// Fails with `AlreadyBanned` without touching the ledger when the user
    /// is already banned; a failed ledger write leaves the registry unchanged.
    pub async fn ban(
        &self,
        user: &str,
        reason: &str,
        moderator: &str,
    ) -> ModResult<(BanEntry, ModerationAction)> {
        let user = normalize_identity("target user", user)?;
        let mut txn = self.db.begin_write().await?;

        let existing: Option<String> =
            sqlx::query_scalar("SELECT user_id FROM banned_users WHERE user_id = ?")
                .bind(&user)
                .fetch_optional(txn.conn())
                .await?;
        if existing.is_some() {
            return Err(ModError::AlreadyBanned(user));
        }

        let action = ledger::append(
            txn.conn(),
            &NewAction::new(moderator, ActionKind::Ban, &user, reason),
        )
        .await?;

        sqlx::query(
            r#"
            INSERT INTO banned_users (user_id, reason, banned_by, banned_at, action_id)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&action.user)
        .bind(&action.reason)
        .bind(&action.moderator)
        .bind(encode_timestamp(action.timestamp))
        .bind(action.id)
        .execute(txn.conn())
        .await?;

        txn.commit().await?;
        ledger::note_recorded(&action);

        let entry = BanEntry {
            user: action.user.clone(),
            reason: action.reason.clone(),
            banned_by: action.moderator.clone(),
            banned_at: action.timestamp,
            action_id: action.id,
        };

        Ok((entry, action))
    }

    /// Lift a ban; ledger history is left untouched
    pub async fn unban(&self, user: &str) -> ModResult<BanEntry> {
        let user = normalize_identity("target user", user)?;
        let mut txn = self.db.begin_write().await?;

        let row = sqlx::query(
            r#"
            SELECT user_id, reason, banned_by, banned_at, action_id
            FROM banned_users
            WHERE user_id = ?
            "#,
        )
        .bind(&user)
        .fetch_optional(txn.conn())
        .await?;

        let entry = match row {
            Some(row) => parse_ban(&row)?,
            None => return Err(ModError::NotBanned(user)),
        };

        sqlx::query("DELETE FROM banned_users WHERE user_id = ?")
            .bind(&user)
            .execute(txn.conn())
            .await?;

        txn.commit().await?;
        info!(user = %user, "user unbanned");

        Ok(entry)
    }

    pub async fn is_banned(&self, user: &str) -> ModResult<bool> {
        let found: Option<String> =
            sqlx::query_scalar("SELECT user_id FROM banned_users WHERE user_id = ?")
                .bind(user.trim())
                .fetch_optional(self.db.pool())
                .await?;
        Ok(found.is_some())
    }

    /// Currently banned users, most recent first
    pub async fn list(&self) -> ModResult<Vec<BanEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT user_id, reason, banned_by, banned_at, action_id
            FROM banned_users
            ORDER BY banned_at DESC, user_id ASC
            "#,
        )
        .fetch_all(self.db.pool())
        .await?;

        rows.iter().map(parse_ban).collect()
    }
}

fn parse_ban(row: &SqliteRow) -> ModResult<BanEntry> {
    let banned_at: String = row.get("banned_at");

    Ok(BanEntry {
        user: row.get("user_id"),
        reason: row.get("reason"),
        banned_by: row.get("banned_by"),
        banned_at: decode_timestamp(&banned_at)?,
        action_id: row.get("action_id"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin::{ActionLedger, AggregateCounters, RoleRegistry};

    struct Fixture {
        bans: BanRegistry,
        ledger: ActionLedger,
        counters: AggregateCounters,
        roles: RoleRegistry,
        db: Database,
    }

    async fn fixture() -> Fixture {
        let db = Database::in_memory().await.unwrap();
        let roles = RoleRegistry::new(db.clone());
        roles.assign_role("admin", "Administrator", None).await.unwrap();
        roles.assign_role("junior", "Junior Moderator", None).await.unwrap();

        Fixture {
            bans: BanRegistry::new(db.clone()),
            ledger: ActionLedger::new(db.clone(), 100),
            counters: AggregateCounters::new(db.clone()),
            roles,
            db,
        }
    }

    #[tokio::test]
    async fn test_ban_then_unban_keeps_history() {
        let f = fixture().await;

        let (entry, action) = f.bans.ban("@spammer123", "spam", "admin").await.unwrap();
        assert_eq!(entry.action_id, action.id);
        assert!(f.bans.is_banned("@spammer123").await.unwrap());

        f.bans.unban("@spammer123").await.unwrap();
        assert!(!f.bans.is_banned("@spammer123").await.unwrap());

        let history = f.ledger.history("@spammer123").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].action, ActionKind::Ban);
        assert_eq!(f.counters.snapshot().await.unwrap().total_bans, 1);
    }

    #[tokio::test]
    async fn test_double_ban_rejected_without_ledger_entry() {
        let f = fixture().await;

        f.bans.ban("@u1", "spam", "admin").await.unwrap();
        let err = f.bans.ban("@u1", "again", "admin").await.unwrap_err();
        assert!(matches!(err, ModError::AlreadyBanned(_)));

        assert_eq!(f.ledger.len().await.unwrap(), 1);
        assert_eq!(f.counters.snapshot().await.unwrap().total_bans, 1);
    }

    #[tokio::test]
    async fn test_unban_unknown_user() {
        let f = fixture().await;
        let err = f.bans.unban("@ghost").await.unwrap_err();
        assert!(matches!(err, ModError::NotBanned(_)));
    }

    #[tokio::test]
    async fn test_failed_ledger_write_prevents_ban() {
        let f = fixture().await;

        let err = f.bans.ban("@u1", "spam", "junior").await.unwrap_err();
        assert!(matches!(err, ModError::Authorization(_)));
        assert!(!f.bans.is_banned("@u1").await.unwrap());
        assert_eq!(f.ledger.len().await.unwrap(), 0);

        f.roles.assign_role("junior", "Moderator", None).await.unwrap();
        assert!(f.bans.ban("@u1", "spam", "junior").await.is_ok());
    }

    #[tokio::test]
    async fn test_registry_insert_failure_rolls_back_ledger() {
        let f = fixture().await;

        sqlx::query(
            r#"
            CREATE TRIGGER reject_bans BEFORE INSERT ON banned_users
            BEGIN
                SELECT RAISE(ABORT, 'bans disabled');
            END
            "#,
        )
        .execute(f.db.pool())
        .await
        .unwrap();

        assert!(f.bans.ban("@u1", "spam", "admin").await.is_err());
        assert!(!f.bans.is_banned("@u1").await.unwrap());
        assert_eq!(f.ledger.len().await.unwrap(), 0);
        assert_eq!(f.counters.snapshot().await.unwrap().total_bans, 0);
        assert!(f.counters.audit().await.unwrap().is_consistent());
    }

    #[tokio::test]
    async fn test_list_bans() {
        let f = fixture().await;
        for user in ["@spammer123", "@bot_faker", "@scammer999"] {
            f.bans.ban(user, "", "admin").await.unwrap();
        }

        let listed = f.bans.list().await.unwrap();
        assert_eq!(listed.len(), 3);
        assert!(listed.iter().all(|b| b.reason == ledger::DEFAULT_REASON));
    }
}
