/// Modguard - chat moderation backend
///
/// Records moderation actions in an append-only ledger, keeps dashboard
/// counters in step with it, tracks bans, mutes and moderator roles, and
/// scans chat messages against configurable filters.

pub mod admin;
pub mod api;
pub mod auth;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod jobs;
pub mod metrics;
pub mod rate_limit;
pub mod scanner;
pub mod server;

pub use context::AppContext;
pub use error::{ModError, ModResult};
