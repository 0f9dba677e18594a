/// Configuration management for Modguard
use crate::admin::moderation::MAX_MUTE_MINUTES;
use crate::error::{ModError, ModResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Main server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub service: ServiceConfig,
    pub storage: StorageConfig,
    pub moderation: ModerationConfig,
    pub filters: FilterConfig,
    pub rate_limit: RateLimitSettings,
    pub logging: LoggingConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub hostname: String,
    pub port: u16,
    pub version: String,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_directory: PathBuf,
    pub database: PathBuf,
}

/// Moderation behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModerationConfig {
    /// Users granted the most senior role at startup when they hold none
    pub admin_ids: Vec<String>,
    pub default_mute_minutes: i64,
    /// Warnings within 24 hours reported against this limit
    pub warn_limit: i64,
    pub max_list_limit: u32,
}

/// Message scanning thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    pub spam_max_char_repetition: usize,
    pub caps_ratio: f64,
    pub caps_min_length: usize,
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    pub enabled: bool,
    pub admin_rps: u32,
    pub scan_rps: u32,
    pub burst_size: u32,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            admin_ids: Vec::new(),
            default_mute_minutes: 60,
            warn_limit: 3,
            max_list_limit: 500,
        }
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            spam_max_char_repetition: 10,
            caps_ratio: 0.7,
            caps_min_length: 10,
        }
    }
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            admin_rps: 50,
            scan_rps: 1000,
            burst_size: 100,
        }
    }
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> ModResult<Self> {
        dotenv::dotenv().ok();

        let hostname = env::var("MODGUARD_HOSTNAME").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("MODGUARD_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .map_err(|_| ModError::Validation("Invalid port number".to_string()))?;
        let version = env!("CARGO_PKG_VERSION").to_string();

        let data_directory: PathBuf = env::var("MODGUARD_DATA_DIRECTORY")
            .unwrap_or_else(|_| "./data".to_string())
            .into();
        let database = env::var("MODGUARD_DATABASE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_directory.join("modguard.sqlite"));

        // Parse admin ids from comma-separated list
        let admin_ids = env::var("MODGUARD_ADMIN_IDS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect::<Vec<String>>();

        let moderation_defaults = ModerationConfig::default();
        let filter_defaults = FilterConfig::default();
        let rate_defaults = RateLimitSettings::default();

        Ok(ServerConfig {
            service: ServiceConfig {
                hostname,
                port,
                version,
            },
            storage: StorageConfig {
                data_directory,
                database,
            },
            moderation: ModerationConfig {
                admin_ids,
                default_mute_minutes: parse_or(
                    "MODGUARD_MUTE_MINUTES",
                    moderation_defaults.default_mute_minutes,
                ),
                warn_limit: parse_or("MODGUARD_WARN_LIMIT", moderation_defaults.warn_limit),
                max_list_limit: parse_or(
                    "MODGUARD_MAX_LIST_LIMIT",
                    moderation_defaults.max_list_limit,
                ),
            },
            filters: FilterConfig {
                spam_max_char_repetition: parse_or(
                    "MODGUARD_SPAM_MAX_REPEAT",
                    filter_defaults.spam_max_char_repetition,
                ),
                caps_ratio: parse_or("MODGUARD_CAPS_RATIO", filter_defaults.caps_ratio),
                caps_min_length: parse_or(
                    "MODGUARD_CAPS_MIN_LENGTH",
                    filter_defaults.caps_min_length,
                ),
            },
            rate_limit: RateLimitSettings {
                enabled: parse_or("MODGUARD_RATE_LIMITS_ENABLED", rate_defaults.enabled),
                admin_rps: parse_or("MODGUARD_ADMIN_RPS", rate_defaults.admin_rps),
                scan_rps: parse_or("MODGUARD_SCAN_RPS", rate_defaults.scan_rps),
                burst_size: parse_or("MODGUARD_RATE_LIMIT_BURST", rate_defaults.burst_size),
            },
            logging: LoggingConfig {
                level: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
                json: parse_or("MODGUARD_LOG_JSON", false),
            },
        })
    }

    /// Configuration for tests and embedding: defaults around a given database path
    pub fn with_database(database: PathBuf) -> Self {
        let data_directory = database
            .parent()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        ServerConfig {
            service: ServiceConfig {
                hostname: "127.0.0.1".to_string(),
                port: 8080,
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            storage: StorageConfig {
                data_directory,
                database,
            },
            moderation: ModerationConfig::default(),
            filters: FilterConfig::default(),
            rate_limit: RateLimitSettings::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
                json: false,
            },
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> ModResult<()> {
        if self.service.hostname.is_empty() {
            return Err(ModError::Validation("Hostname cannot be empty".to_string()));
        }

        if self.moderation.default_mute_minutes <= 0 {
            return Err(ModError::Validation(
                "Default mute duration must be positive".to_string(),
            ));
        }

        if self.moderation.default_mute_minutes > MAX_MUTE_MINUTES {
            return Err(ModError::Validation(format!(
                "Default mute duration cannot exceed {} minutes",
                MAX_MUTE_MINUTES
            )));
        }

        if self.moderation.warn_limit <= 0 {
            return Err(ModError::Validation("Warn limit must be positive".to_string()));
        }

        if self.moderation.max_list_limit == 0 {
            return Err(ModError::Validation("List limit must be positive".to_string()));
        }

        if !(0.0..=1.0).contains(&self.filters.caps_ratio) {
            return Err(ModError::Validation(
                "Caps ratio must be between 0 and 1".to_string(),
            ));
        }

        if self.filters.spam_max_char_repetition < 2 {
            return Err(ModError::Validation(
                "Spam repetition threshold must be at least 2".to_string(),
            ));
        }

        Ok(())
    }
}
