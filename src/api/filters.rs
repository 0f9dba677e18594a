/// Filter API Endpoints
///
/// Filter toggles, the keyword denylist and message scanning.
use crate::{
    admin::{FilterKey, FilterSettings},
    auth::ModeratorContext,
    error::ModResult,
    scanner::ScanReport,
    AppContext,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

/// Build filter API routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/api/v1/filters", get(get_filters))
        .route("/api/v1/filters/keywords", get(list_keywords).post(add_keyword))
        .route("/api/v1/filters/keywords/:word", delete(remove_keyword))
        .route("/api/v1/filters/:key", put(set_filter))
        .route("/api/v1/scan", post(scan_message))
}

async fn get_filters(State(ctx): State<AppContext>) -> Json<FilterSettings> {
    Json(ctx.filters.get())
}

#[derive(Debug, Deserialize)]
struct SetFilterRequest {
    enabled: bool,
}

async fn set_filter(
    State(ctx): State<AppContext>,
    auth: ModeratorContext,
    Path(key): Path<String>,
    Json(req): Json<SetFilterRequest>,
) -> ModResult<Json<FilterSettings>> {
    let key = FilterKey::from_str(&key)?;
    ctx.roles.require_any_role(&auth.moderator).await?;

    Ok(Json(ctx.filters.set(key, req.enabled).await?))
}

// ============================================================================
// Keywords
// ============================================================================

async fn list_keywords(State(ctx): State<AppContext>) -> Json<Value> {
    Json(json!({ "keywords": ctx.filters.keywords() }))
}

#[derive(Debug, Deserialize)]
struct KeywordRequest {
    word: String,
}

async fn add_keyword(
    State(ctx): State<AppContext>,
    auth: ModeratorContext,
    Json(req): Json<KeywordRequest>,
) -> ModResult<(StatusCode, Json<Value>)> {
    ctx.roles.require_any_role(&auth.moderator).await?;
    let word = ctx
        .filters
        .add_keyword(&req.word, Some(&auth.moderator))
        .await?;

    Ok((StatusCode::CREATED, Json(json!({ "word": word }))))
}

async fn remove_keyword(
    State(ctx): State<AppContext>,
    auth: ModeratorContext,
    Path(word): Path<String>,
) -> ModResult<Json<Value>> {
    ctx.roles.require_any_role(&auth.moderator).await?;
    ctx.filters.remove_keyword(&word).await?;

    Ok(Json(json!({ "success": true })))
}

// ============================================================================
// Scanning
// ============================================================================

#[derive(Debug, Deserialize)]
struct ScanRequest {
    #[serde(default)]
    user: Option<String>,
    text: String,
}

/// Check a chat message against the active filters
async fn scan_message(
    State(ctx): State<AppContext>,
    Json(req): Json<ScanRequest>,
) -> ModResult<Json<ScanReport>> {
    let report = ctx
        .scanner
        .check_message(&ctx.filters, &ctx.counters, &req.text)
        .await?;

    if report.blocked {
        debug!(
            user = ?req.user,
            violations = ?report.violations,
            "message blocked"
        );
    }

    Ok(Json(report))
}
