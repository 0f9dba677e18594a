/// API routes and handlers
pub mod filters;
pub mod health;
pub mod middleware;
pub mod moderation;
pub mod roles;

use crate::context::AppContext;
use axum::Router;

/// Build API routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .merge(health::routes())
        .merge(moderation::routes())
        .merge(filters::routes())
        .merge(roles::routes())
}
