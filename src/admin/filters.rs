/// Filter Policy Store
///
/// Filter toggles and the keyword denylist. Persisted write-through; reads
/// are served from an in-memory snapshot swapped after each committed write.
use super::{encode_timestamp, now};
use crate::db::Database;
use crate::error::{ModError, ModResult};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sqlx::Row;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// Automatic message checks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSettings {
    pub links: bool,
    pub invites: bool,
    pub spam: bool,
    pub caps: bool,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            links: true,
            invites: true,
            spam: true,
            caps: false,
        }
    }
}

impl FilterSettings {
    pub fn get(&self, key: FilterKey) -> bool {
        match key {
            FilterKey::Links => self.links,
            FilterKey::Invites => self.invites,
            FilterKey::Spam => self.spam,
            FilterKey::Caps => self.caps,
        }
    }

    fn set(&mut self, key: FilterKey, value: bool) {
        match key {
            FilterKey::Links => self.links = value,
            FilterKey::Invites => self.invites = value,
            FilterKey::Spam => self.spam = value,
            FilterKey::Caps => self.caps = value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterKey {
    Links,
    Invites,
    Spam,
    Caps,
}

impl FilterKey {
    pub const ALL: [FilterKey; 4] = [
        FilterKey::Links,
        FilterKey::Invites,
        FilterKey::Spam,
        FilterKey::Caps,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FilterKey::Links => "links",
            FilterKey::Invites => "invites",
            FilterKey::Spam => "spam",
            FilterKey::Caps => "caps",
        }
    }

    pub fn from_str(s: &str) -> ModResult<Self> {
        match s.trim().to_lowercase().as_str() {
            "links" => Ok(FilterKey::Links),
            "invites" => Ok(FilterKey::Invites),
            "spam" => Ok(FilterKey::Spam),
            "caps" => Ok(FilterKey::Caps),
            _ => Err(ModError::Validation(format!("Unknown filter: {}", s))),
        }
    }
}

/// Everything message scanning needs, as one immutable snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterPolicy {
    pub settings: FilterSettings,
    pub keywords: BTreeSet<String>,
}

/// Filter policy store
#[derive(Clone)]
pub struct FilterPolicyStore {
    db: Database,
    current: Arc<RwLock<Arc<FilterPolicy>>>,
    // Held from write through swap so snapshots apply in commit order
    writer: Arc<Mutex<()>>,
}

impl FilterPolicyStore {
    /// Load persisted policy into memory
    pub async fn load(db: Database) -> ModResult<Self> {
        let mut settings = FilterSettings::default();
        for row in sqlx::query("SELECT key, enabled FROM filter_settings")
            .fetch_all(db.pool())
            .await?
        {
            let key: String = row.get("key");
            // Unknown keys are left over from other versions
            if let Ok(key) = FilterKey::from_str(&key) {
                settings.set(key, row.get("enabled"));
            }
        }

        let keywords: Vec<String> = sqlx::query_scalar("SELECT word FROM banned_keywords")
            .fetch_all(db.pool())
            .await?;

        let policy = FilterPolicy {
            settings,
            keywords: keywords.into_iter().collect(),
        };

        Ok(Self {
            db,
            current: Arc::new(RwLock::new(Arc::new(policy))),
            writer: Arc::new(Mutex::new(())),
        })
    }

    /// Shared snapshot for scanning
    pub fn policy(&self) -> Arc<FilterPolicy> {
        Arc::clone(&*self.current.read())
    }

    pub fn get(&self) -> FilterSettings {
        self.current.read().settings
    }

    /// Sorted denylist
    pub fn keywords(&self) -> Vec<String> {
        self.current.read().keywords.iter().cloned().collect()
    }

    /// Set a single toggle; setting the current value is a no-op
    pub async fn set(&self, key: FilterKey, value: bool) -> ModResult<FilterSettings> {
        let _writer = self.writer.lock().await;
        let mut txn = self.db.begin_write().await?;

        sqlx::query(
            r#"
            INSERT INTO filter_settings (key, enabled) VALUES (?, ?)
            ON CONFLICT (key) DO UPDATE SET enabled = excluded.enabled
            "#,
        )
        .bind(key.as_str())
        .bind(value)
        .execute(txn.conn())
        .await?;

        txn.commit().await?;

        let settings = self.update(|policy| policy.settings.set(key, value)).settings;
        info!(filter = key.as_str(), enabled = value, "filter setting updated");
        Ok(settings)
    }

    pub async fn add_keyword(&self, word: &str, added_by: Option<&str>) -> ModResult<String> {
        let word = normalize_keyword(word)?;
        let _writer = self.writer.lock().await;
        let mut txn = self.db.begin_write().await?;

        let existing: Option<String> =
            sqlx::query_scalar("SELECT word FROM banned_keywords WHERE word = ?")
                .bind(&word)
                .fetch_optional(txn.conn())
                .await?;
        if existing.is_some() {
            return Err(ModError::Duplicate(format!("Keyword already listed: {}", word)));
        }

        sqlx::query("INSERT INTO banned_keywords (word, added_by, added_at) VALUES (?, ?, ?)")
            .bind(&word)
            .bind(added_by)
            .bind(encode_timestamp(now()))
            .execute(txn.conn())
            .await?;

        txn.commit().await?;

        self.update(|policy| {
            policy.keywords.insert(word.clone());
        });
        info!(keyword = %word, added_by = ?added_by, "keyword added");
        Ok(word)
    }

    pub async fn remove_keyword(&self, word: &str) -> ModResult<()> {
        let word = normalize_keyword(word)?;
        let _writer = self.writer.lock().await;
        let mut txn = self.db.begin_write().await?;

        let result = sqlx::query("DELETE FROM banned_keywords WHERE word = ?")
            .bind(&word)
            .execute(txn.conn())
            .await?;

        if result.rows_affected() == 0 {
            return Err(ModError::NotFound(format!("Keyword not listed: {}", word)));
        }

        txn.commit().await?;

        self.update(|policy| {
            policy.keywords.remove(&word);
        });
        info!(keyword = %word, "keyword removed");
        Ok(())
    }

    /// Copy-on-write swap of the in-memory snapshot, after the change committed
    fn update(&self, apply: impl FnOnce(&mut FilterPolicy)) -> Arc<FilterPolicy> {
        let mut current = self.current.write();
        let mut next = (**current).clone();
        apply(&mut next);
        let next = Arc::new(next);
        *current = Arc::clone(&next);
        next
    }
}

fn normalize_keyword(word: &str) -> ModResult<String> {
    let word = word.trim().to_lowercase();
    if word.is_empty() {
        return Err(ModError::Validation("Keyword must not be empty".to_string()));
    }
    Ok(word)
}
