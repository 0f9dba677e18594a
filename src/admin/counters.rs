/// Aggregate Counters
///
/// Cached totals per action kind plus the blocked-message counter. The
/// action totals are always recomputable from the ledger.
use crate::db::Database;
use crate::error::ModResult;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteConnection;
use sqlx::Row;
use tracing::warn;

pub(crate) const BLOCKED_MESSAGES: &str = "blocked_messages";

/// Dashboard counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterSnapshot {
    pub total_bans: i64,
    pub total_mutes: i64,
    pub total_warns: i64,
    pub blocked_messages: i64,
}

impl CounterSnapshot {
    fn set(&mut self, kind: &str, total: i64) {
        match kind {
            "ban" => self.total_bans = total,
            "mute" => self.total_mutes = total,
            "warn" => self.total_warns = total,
            BLOCKED_MESSAGES => self.blocked_messages = total,
            _ => {}
        }
    }
}

/// Cached counters compared with a recount of the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterAudit {
    pub cached: CounterSnapshot,
    pub recomputed: CounterSnapshot,
}

impl CounterAudit {
    pub fn is_consistent(&self) -> bool {
        self.cached == self.recomputed
    }
}

/// Aggregate counter store
#[derive(Clone)]
pub struct AggregateCounters {
    db: Database,
}

impl AggregateCounters {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Current cached totals
    pub async fn snapshot(&self) -> ModResult<CounterSnapshot> {
        let rows = sqlx::query("SELECT kind, total FROM action_counters")
            .fetch_all(self.db.pool())
            .await?;

        let mut snapshot = CounterSnapshot::default();
        for row in rows {
            let kind: String = row.get("kind");
            snapshot.set(&kind, row.get("total"));
        }
        Ok(snapshot)
    }

    /// Action totals counted straight from the ledger.
    /// `blocked_messages` is not ledger-derived and is carried over from the cache.
    pub async fn recompute(&self) -> ModResult<CounterSnapshot> {
        let blocked = self.snapshot().await?.blocked_messages;
        let mut conn = self.db.pool().acquire().await?;
        let mut snapshot = recount(&mut conn).await?;
        snapshot.blocked_messages = blocked;
        Ok(snapshot)
    }

    pub async fn audit(&self) -> ModResult<CounterAudit> {
        Ok(CounterAudit {
            cached: self.snapshot().await?,
            recomputed: self.recompute().await?,
        })
    }

    /// Overwrite cached action totals with a ledger recount
    pub async fn repair(&self) -> ModResult<CounterAudit> {
        let mut txn = self.db.begin_write().await?;

        let mut cached = CounterSnapshot::default();
        for row in sqlx::query("SELECT kind, total FROM action_counters")
            .fetch_all(txn.conn())
            .await?
        {
            let kind: String = row.get("kind");
            cached.set(&kind, row.get("total"));
        }

        let mut recomputed = recount(txn.conn()).await?;
        recomputed.blocked_messages = cached.blocked_messages;

        let audit = CounterAudit { cached, recomputed };
        if !audit.is_consistent() {
            warn!(?cached, ?recomputed, "aggregate counters drifted from ledger; repairing");
            for (kind, total) in [
                ("ban", recomputed.total_bans),
                ("mute", recomputed.total_mutes),
                ("warn", recomputed.total_warns),
            ] {
                sqlx::query("UPDATE action_counters SET total = ? WHERE kind = ?")
                    .bind(total)
                    .bind(kind)
                    .execute(txn.conn())
                    .await?;
            }
        }

        txn.commit().await?;
        Ok(audit)
    }

    /// Count messages rejected by scanning
    pub async fn record_blocked(&self, count: i64) -> ModResult<()> {
        if count <= 0 {
            return Ok(());
        }
        let mut txn = self.db.begin_write().await?;
        increment(txn.conn(), BLOCKED_MESSAGES, count).await?;
        txn.commit().await
    }
}

/// Single-statement upsert increment on the caller's transaction
pub(crate) async fn increment(conn: &mut SqliteConnection, kind: &str, by: i64) -> ModResult<()> {
    sqlx::query(
        r#"
        INSERT INTO action_counters (kind, total) VALUES (?, ?)
        ON CONFLICT (kind) DO UPDATE SET total = total + excluded.total
        "#,
    )
    .bind(kind)
    .bind(by)
    .execute(conn)
    .await?;

    Ok(())
}

async fn recount(conn: &mut SqliteConnection) -> ModResult<CounterSnapshot> {
    let rows = sqlx::query(
        "SELECT action, COUNT(*) AS total FROM moderation_actions GROUP BY action",
    )
    .fetch_all(conn)
    .await?;

    let mut snapshot = CounterSnapshot::default();
    for row in rows {
        let kind: String = row.get("action");
        snapshot.set(&kind, row.get("total"));
    }
    Ok(snapshot)
}
