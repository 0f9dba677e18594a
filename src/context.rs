/// Application context and dependency injection
use crate::{
    admin::{
        ActionLedger, AggregateCounters, BanRegistry, FilterPolicyStore, ModerationManager,
        RoleRegistry,
    },
    config::ServerConfig,
    db::{Database, DatabaseOptions},
    error::{ModError, ModResult},
    rate_limit::RateLimiter,
    scanner::MessageScanner,
};
use std::sync::Arc;
use std::time::Instant;

/// Application context holding all shared services
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ServerConfig>,
    pub db: Database,
    // Moderation core
    pub roles: Arc<RoleRegistry>,
    pub ledger: Arc<ActionLedger>,
    pub counters: Arc<AggregateCounters>,
    pub bans: Arc<BanRegistry>,
    pub moderation: Arc<ModerationManager>,
    pub filters: Arc<FilterPolicyStore>,
    pub scanner: Arc<MessageScanner>,
    // Rate limiter
    pub rate_limiter: Arc<RateLimiter>,
    pub started_at: Instant,
}

impl AppContext {
    /// Create a new application context from configuration
    pub async fn new(config: ServerConfig) -> ModResult<Self> {
        // Validate configuration
        config.validate()?;

        // Create data directory if it doesn't exist
        Self::ensure_directories(&config).await?;

        let db = Database::open(&config.storage.database, DatabaseOptions::default()).await?;

        Self::with_database(config, db).await
    }

    /// Build the context around an already-migrated database
    pub async fn with_database(config: ServerConfig, db: Database) -> ModResult<Self> {
        let roles = Arc::new(RoleRegistry::new(db.clone()));
        roles.bootstrap_admins(&config.moderation.admin_ids).await?;

        let ledger = Arc::new(ActionLedger::new(
            db.clone(),
            config.moderation.max_list_limit,
        ));
        let counters = Arc::new(AggregateCounters::new(db.clone()));
        let bans = Arc::new(BanRegistry::new(db.clone()));
        let moderation = Arc::new(ModerationManager::new(
            db.clone(),
            config.moderation.default_mute_minutes,
            config.moderation.warn_limit,
        ));

        // Filter policy is served from memory after this load
        let filters = Arc::new(FilterPolicyStore::load(db.clone()).await?);
        let scanner = Arc::new(MessageScanner::new(&config.filters));

        let rate_limiter = Arc::new(RateLimiter::new(&config.rate_limit));

        Ok(Self {
            config: Arc::new(config),
            db,
            roles,
            ledger,
            counters,
            bans,
            moderation,
            filters,
            scanner,
            rate_limiter,
            started_at: Instant::now(),
        })
    }

    /// Ensure required directories exist
    async fn ensure_directories(config: &ServerConfig) -> ModResult<()> {
        let dir = &config.storage.data_directory;
        if !dir.exists() {
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                ModError::Internal(format!("Failed to create directory {:?}: {}", dir, e))
            })?;
        }
        Ok(())
    }

    /// Get service URL
    pub fn service_url(&self) -> String {
        format!(
            "http://{}:{}",
            self.config.service.hostname, self.config.service.port
        )
    }
}
