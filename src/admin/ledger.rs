/// Action Ledger
///
/// Append-only record of ban/mute/warn actions. Every append authorizes the
/// moderator against the role registry and bumps the matching aggregate
/// counter inside the same transaction.
use super::{
    counters, decode_timestamp, encode_timestamp, normalize_identity, now, roles, ActionKind,
};
use crate::db::Database;
use crate::error::ModResult;
use crate::metrics;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::Row;
use tracing::info;

/// Reason stored when a moderator gives none
pub const DEFAULT_REASON: &str = "Rule violation";

/// Default page size for ledger listings
pub const DEFAULT_LIST_LIMIT: u32 = 50;

/// Ledger entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModerationAction {
    pub id: i64,
    pub moderator: String,
    pub action: ActionKind,
    pub user: String,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

/// Request to append an action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAction {
    pub moderator: String,
    pub action: ActionKind,
    pub user: String,
    #[serde(default)]
    pub reason: String,
}

impl NewAction {
    pub fn new(moderator: &str, action: ActionKind, user: &str, reason: &str) -> Self {
        Self {
            moderator: moderator.to_string(),
            action,
            user: user.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Action ledger
#[derive(Clone)]
pub struct ActionLedger {
    db: Database,
    max_list_limit: u32,
}

impl ActionLedger {
    pub fn new(db: Database, max_list_limit: u32) -> Self {
        Self {
            db,
            max_list_limit: max_list_limit.max(1),
        }
    }

    /// Append an action and update its counter atomically
    pub async fn record(&self, action: NewAction) -> ModResult<ModerationAction> {
        let mut txn = self.db.begin_write().await?;
        let entry = append(txn.conn(), &action).await?;
        txn.commit().await?;

        note_recorded(&entry);
        Ok(entry)
    }

    /// Page through the ledger, most recent first
    pub async fn list(&self, limit: Option<u32>, offset: u32) -> ModResult<Vec<ModerationAction>> {
        let limit = limit
            .unwrap_or(DEFAULT_LIST_LIMIT)
            .clamp(1, self.max_list_limit);

        let rows = sqlx::query(
            r#"
            SELECT id, moderator, action, target, reason, created_at
            FROM moderation_actions
            ORDER BY id DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(i64::from(limit))
        .bind(i64::from(offset))
        .fetch_all(self.db.pool())
        .await?;

        rows.iter().map(parse_action).collect()
    }

    /// Every action taken against a user, most recent first
    pub async fn history(&self, user: &str) -> ModResult<Vec<ModerationAction>> {
        let rows = sqlx::query(
            r#"
            SELECT id, moderator, action, target, reason, created_at
            FROM moderation_actions
            WHERE target = ?
            ORDER BY id DESC
            "#,
        )
        .bind(user.trim())
        .fetch_all(self.db.pool())
        .await?;

        rows.iter().map(parse_action).collect()
    }

    /// Total number of ledger entries
    pub async fn len(&self) -> ModResult<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM moderation_actions")
            .fetch_one(self.db.pool())
            .await?;
        Ok(count)
    }
}

/// Validate, authorize, insert and count, all on the caller's transaction
pub(crate) async fn append(
    conn: &mut SqliteConnection,
    action: &NewAction,
) -> ModResult<ModerationAction> {
    let moderator = normalize_identity("moderator", &action.moderator)?;
    let user = normalize_identity("target user", &action.user)?;
    let reason = match action.reason.trim() {
        "" => DEFAULT_REASON.to_string(),
        r => r.to_string(),
    };

    roles::authorize_in(&mut *conn, &moderator, action.action).await?;

    let timestamp = now();

    let result = sqlx::query(
        r#"
        INSERT INTO moderation_actions (moderator, action, target, reason, created_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(&moderator)
    .bind(action.action.as_str())
    .bind(&user)
    .bind(&reason)
    .bind(encode_timestamp(timestamp))
    .execute(&mut *conn)
    .await?;

    counters::increment(conn, action.action.as_str(), 1).await?;

    Ok(ModerationAction {
        id: result.last_insert_rowid(),
        moderator,
        action: action.action,
        user,
        reason,
        timestamp,
    })
}

/// Log and count an entry once its transaction has committed
pub(crate) fn note_recorded(entry: &ModerationAction) {
    metrics::record_moderation_action(entry.action.as_str());
    info!(
        id = entry.id,
        moderator = %entry.moderator,
        action = entry.action.as_str(),
        user = %entry.user,
        "moderation action recorded"
    );
}

fn parse_action(row: &SqliteRow) -> ModResult<ModerationAction> {
    let action: String = row.get("action");
    let created_at: String = row.get("created_at");

    Ok(ModerationAction {
        id: row.get("id"),
        moderator: row.get("moderator"),
        action: ActionKind::from_str(&action)?,
        user: row.get("target"),
        reason: row.get("reason"),
        timestamp: decode_timestamp(&created_at)?,
    })
}
