/// Mutes and warnings
use super::ledger::{self, ModerationAction, NewAction};
use super::{decode_timestamp, encode_timestamp, normalize_identity, ActionKind};
use crate::db::Database;
use crate::error::{ModError, ModResult};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::info;

/// Active mute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MuteEntry {
    pub user: String,
    pub reason: String,
    pub muted_by: String,
    pub muted_at: DateTime<Utc>,
    pub muted_until: DateTime<Utc>,
    pub action_id: i64,
}

/// Result of a warning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarnOutcome {
    pub action: ModerationAction,
    /// Warnings for this user in the last 24 hours, including this one
    pub recent_warnings: i64,
    pub limit: i64,
}

impl WarnOutcome {
    pub fn limit_reached(&self) -> bool {
        self.recent_warnings >= self.limit
    }
}

/// Longest mute accepted, one year
pub const MAX_MUTE_MINUTES: i64 = 366 * 24 * 60;

/// Convert a mute length in minutes, rejecting lengths outside `1..=MAX_MUTE_MINUTES`
pub fn mute_duration(minutes: i64) -> ModResult<Duration> {
    if minutes <= 0 {
        return Err(ModError::Validation("Mute duration must be positive".to_string()));
    }
    if minutes > MAX_MUTE_MINUTES {
        return Err(ModError::Validation("Mute duration out of range".to_string()));
    }
    Duration::try_minutes(minutes)
        .ok_or_else(|| ModError::Validation("Mute duration out of range".to_string()))
}

/// Moderation manager
#[derive(Clone)]
pub struct ModerationManager {
    db: Database,
    default_mute: Duration,
    warn_limit: i64,
}

impl ModerationManager {
    /// `default_mute_minutes` is checked by `ServerConfig::validate`; out of
    /// range values fall back to one hour.
    pub fn new(db: Database, default_mute_minutes: i64, warn_limit: i64) -> Self {
        Self {
            db,
            default_mute: mute_duration(default_mute_minutes)
                .unwrap_or_else(|_| Duration::hours(1)),
            warn_limit,
        }
    }

    /// Mute a user; muting again replaces reason and expiry
    pub async fn mute(
        &self,
        user: &str,
        reason: &str,
        moderator: &str,
        duration: Option<Duration>,
    ) -> ModResult<(MuteEntry, ModerationAction)> {
        let duration = duration.unwrap_or(self.default_mute);
        if duration <= Duration::zero() {
            return Err(ModError::Validation("Mute duration must be positive".to_string()));
        }
        if duration > Duration::minutes(MAX_MUTE_MINUTES) {
            return Err(ModError::Validation("Mute duration out of range".to_string()));
        }

        let mut txn = self.db.begin_write().await?;

        let action = ledger::append(
            txn.conn(),
            &NewAction::new(moderator, ActionKind::Mute, user, reason),
        )
        .await?;
        let muted_until = action
            .timestamp
            .checked_add_signed(duration)
            .ok_or_else(|| ModError::Validation("Mute duration out of range".to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO muted_users (user_id, reason, muted_by, muted_at, muted_until, action_id)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (user_id) DO UPDATE
            SET reason = excluded.reason,
                muted_by = excluded.muted_by,
                muted_at = excluded.muted_at,
                muted_until = excluded.muted_until,
                action_id = excluded.action_id
            "#,
        )
        .bind(&action.user)
        .bind(&action.reason)
        .bind(&action.moderator)
        .bind(encode_timestamp(action.timestamp))
        .bind(encode_timestamp(muted_until))
        .bind(action.id)
        .execute(txn.conn())
        .await?;

        txn.commit().await?;
        ledger::note_recorded(&action);

        let entry = MuteEntry {
            user: action.user.clone(),
            reason: action.reason.clone(),
            muted_by: action.moderator.clone(),
            muted_at: action.timestamp,
            muted_until,
            action_id: action.id,
        };

        Ok((entry, action))
    }

    /// Lift an active mute
    pub async fn unmute(&self, user: &str) -> ModResult<()> {
        let user = normalize_identity("target user", user)?;
        let mut txn = self.db.begin_write().await?;

        let result = sqlx::query("DELETE FROM muted_users WHERE user_id = ? AND muted_until > ?")
            .bind(&user)
            .bind(encode_timestamp(Utc::now()))
            .execute(txn.conn())
            .await?;

        if result.rows_affected() == 0 {
            return Err(ModError::NotFound(format!("{} is not muted", user)));
        }

        txn.commit().await?;
        info!(user = %user, "user unmuted");
        Ok(())
    }

    pub async fn is_muted(&self, user: &str) -> ModResult<bool> {
        let found: Option<String> = sqlx::query_scalar(
            "SELECT user_id FROM muted_users WHERE user_id = ? AND muted_until > ?",
        )
        .bind(user.trim())
        .bind(encode_timestamp(Utc::now()))
        .fetch_optional(self.db.pool())
        .await?;

        Ok(found.is_some())
    }

    /// Active mutes, soonest expiry first
    pub async fn list_mutes(&self) -> ModResult<Vec<MuteEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT user_id, reason, muted_by, muted_at, muted_until, action_id
            FROM muted_users
            WHERE muted_until > ?
            ORDER BY muted_until ASC
            "#,
        )
        .bind(encode_timestamp(Utc::now()))
        .fetch_all(self.db.pool())
        .await?;

        rows.iter().map(parse_mute).collect()
    }

    /// Warn a user and report their warnings over the last 24 hours
    pub async fn warn(&self, user: &str, reason: &str, moderator: &str) -> ModResult<WarnOutcome> {
        let mut txn = self.db.begin_write().await?;

        let action = ledger::append(
            txn.conn(),
            &NewAction::new(moderator, ActionKind::Warn, user, reason),
        )
        .await?;

        let since = action.timestamp - Duration::hours(24);
        let recent_warnings: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM moderation_actions
            WHERE target = ? AND action = 'warn' AND created_at > ?
            "#,
        )
        .bind(&action.user)
        .bind(encode_timestamp(since))
        .fetch_one(txn.conn())
        .await?;

        txn.commit().await?;
        ledger::note_recorded(&action);

        Ok(WarnOutcome {
            action,
            recent_warnings,
            limit: self.warn_limit,
        })
    }

    /// Delete mutes whose expiry has passed
    pub async fn cleanup_expired_mutes(&self) -> ModResult<u64> {
        let mut txn = self.db.begin_write().await?;

        let result = sqlx::query("DELETE FROM muted_users WHERE muted_until <= ?")
            .bind(encode_timestamp(Utc::now()))
            .execute(txn.conn())
            .await?;

        txn.commit().await?;
        Ok(result.rows_affected())
    }
}

fn parse_mute(row: &SqliteRow) -> ModResult<MuteEntry> {
    let muted_at: String = row.get("muted_at");
    let muted_until: String = row.get("muted_until");

    Ok(MuteEntry {
        user: row.get("user_id"),
        reason: row.get("reason"),
        muted_by: row.get("muted_by"),
        muted_at: decode_timestamp(&muted_at)?,
        muted_until: decode_timestamp(&muted_until)?,
        action_id: row.get("action_id"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin::{ActionLedger, AggregateCounters, RoleRegistry};

    async fn setup() -> (ModerationManager, ActionLedger, AggregateCounters, Database) {
        let db = Database::in_memory().await.unwrap();
        let roles = RoleRegistry::new(db.clone());
        roles.assign_role("mod", "Junior Moderator", None).await.unwrap();

        (
            ModerationManager::new(db.clone(), 60, 3),
            ActionLedger::new(db.clone(), 100),
            AggregateCounters::new(db.clone()),
            db,
        )
    }

    #[tokio::test]
    async fn test_mute_default_duration() {
        let (manager, _, counters, _) = setup().await;

        let (entry, _) = manager.mute("@user456", "flood", "mod", None).await.unwrap();
        assert_eq!(entry.muted_until - entry.muted_at, Duration::minutes(60));
        assert!(manager.is_muted("@user456").await.unwrap());
        assert_eq!(counters.snapshot().await.unwrap().total_mutes, 1);
    }

    #[tokio::test]
    async fn test_remute_extends() {
        let (manager, ledger, _, _) = setup().await;

        manager.mute("@u", "flood", "mod", None).await.unwrap();
        let (entry, _) = manager
            .mute("@u", "flood again", "mod", Some(Duration::hours(5)))
            .await
            .unwrap();

        let mutes = manager.list_mutes().await.unwrap();
        assert_eq!(mutes.len(), 1);
        assert_eq!(mutes[0].reason, "flood again");
        assert_eq!(mutes[0].muted_until, entry.muted_until);
        assert_eq!(ledger.history("@u").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_zero_duration_rejected() {
        let (manager, ledger, _, _) = setup().await;

        let err = manager
            .mute("@u", "flood", "mod", Some(Duration::zero()))
            .await
            .unwrap_err();
        assert!(matches!(err, ModError::Validation(_)));
        assert_eq!(ledger.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_oversized_duration_rejected() {
        let (manager, ledger, counters, _) = setup().await;

        for duration in [
            Duration::minutes(1_000_000_000_000),
            Duration::minutes(MAX_MUTE_MINUTES + 1),
            Duration::days(1_000_000_000),
        ] {
            let err = manager
                .mute("@u", "flood", "mod", Some(duration))
                .await
                .unwrap_err();
            assert!(matches!(err, ModError::Validation(_)));
        }

        assert_eq!(ledger.len().await.unwrap(), 0);
        assert_eq!(counters.snapshot().await.unwrap().total_mutes, 0);
        assert!(!manager.is_muted("@u").await.unwrap());
    }

    #[test]
    fn test_mute_duration_bounds() {
        assert_eq!(mute_duration(30).unwrap(), Duration::minutes(30));
        assert!(mute_duration(MAX_MUTE_MINUTES).is_ok());
        assert!(mute_duration(0).is_err());
        assert!(mute_duration(MAX_MUTE_MINUTES + 1).is_err());
        assert!(mute_duration(i64::MAX).is_err());
    }

    #[tokio::test]
    async fn test_mute_rolls_back_when_registry_insert_fails() {
        let (manager, ledger, counters, db) = setup().await;

        sqlx::query(
            r#"
            CREATE TRIGGER reject_mutes BEFORE INSERT ON muted_users
            BEGIN
                SELECT RAISE(ABORT, 'mutes disabled');
            END
            "#,
        )
        .execute(db.pool())
        .await
        .unwrap();

        assert!(manager.mute("@u", "flood", "mod", None).await.is_err());
        assert_eq!(ledger.len().await.unwrap(), 0);
        assert_eq!(counters.snapshot().await.unwrap().total_mutes, 0);
        assert!(!manager.is_muted("@u").await.unwrap());
    }

    #[tokio::test]
    async fn test_unmute() {
        let (manager, _, _, _) = setup().await;

        manager.mute("@u", "flood", "mod", None).await.unwrap();
        manager.unmute("@u").await.unwrap();
        assert!(!manager.is_muted("@u").await.unwrap());

        let err = manager.unmute("@u").await.unwrap_err();
        assert!(matches!(err, ModError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_expired_mutes_cleaned_up() {
        let (manager, _, _, db) = setup().await;

        manager.mute("@old", "flood", "mod", None).await.unwrap();
        manager.mute("@new", "flood", "mod", None).await.unwrap();

        let past = encode_timestamp(Utc::now() - Duration::minutes(1));
        sqlx::query("UPDATE muted_users SET muted_until = ? WHERE user_id = '@old'")
            .bind(past)
            .execute(db.pool())
            .await
            .unwrap();

        assert!(!manager.is_muted("@old").await.unwrap());
        assert_eq!(manager.cleanup_expired_mutes().await.unwrap(), 1);
        assert_eq!(manager.list_mutes().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_warnings_count_toward_limit() {
        let (manager, _, counters, _) = setup().await;

        let first = manager.warn("@newbie789", "links", "mod").await.unwrap();
        assert_eq!(first.recent_warnings, 1);
        assert!(!first.limit_reached());

        manager.warn("@other", "caps", "mod").await.unwrap();
        manager.warn("@newbie789", "links", "mod").await.unwrap();
        let third = manager.warn("@newbie789", "links", "mod").await.unwrap();
        assert_eq!(third.recent_warnings, 3);
        assert!(third.limit_reached());

        assert_eq!(counters.snapshot().await.unwrap().total_warns, 4);
    }

    #[tokio::test]
    async fn test_unauthorized_warn() {
        let (manager, ledger, _, _) = setup().await;

        let err = manager.warn("@u", "caps", "stranger").await.unwrap_err();
        assert!(matches!(err, ModError::Authorization(_)));
        assert_eq!(ledger.len().await.unwrap(), 0);
    }
}
