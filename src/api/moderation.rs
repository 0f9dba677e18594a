/// Moderation API Endpoints
///
/// Dashboard counters, the action ledger, bans, mutes and warnings.
use crate::{
    admin::{moderation::mute_duration, ActionKind, CounterSnapshot, NewAction},
    auth::ModeratorContext,
    error::ModResult,
    AppContext,
};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

/// Build moderation API routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        // Counters
        .route("/api/v1/stats", get(get_stats))
        .route("/api/v1/stats/audit", get(audit_stats))
        // Ledger
        .route("/api/v1/actions", get(list_actions).post(record_action))
        .route("/api/v1/actions/history", get(user_history))
        // Bans
        .route("/api/v1/bans", get(list_bans).post(ban_user))
        .route("/api/v1/bans/remove", post(unban_user))
        // Mutes and warnings
        .route("/api/v1/mutes", get(list_mutes).post(mute_user))
        .route("/api/v1/mutes/remove", post(unmute_user))
        .route("/api/v1/warnings", post(warn_user))
}

// ============================================================================
// Counters
// ============================================================================

async fn get_stats(State(ctx): State<AppContext>) -> ModResult<Json<CounterSnapshot>> {
    Ok(Json(ctx.counters.snapshot().await?))
}

/// Cached counters alongside a recount of the ledger
async fn audit_stats(State(ctx): State<AppContext>) -> ModResult<Json<Value>> {
    let audit = ctx.counters.audit().await?;
    Ok(Json(json!({
        "consistent": audit.is_consistent(),
        "cached": audit.cached,
        "recomputed": audit.recomputed,
    })))
}

// ============================================================================
// Ledger
// ============================================================================

#[derive(Debug, Deserialize)]
struct ListActionsQuery {
    limit: Option<u32>,
    #[serde(default)]
    offset: u32,
}

async fn list_actions(
    State(ctx): State<AppContext>,
    Query(query): Query<ListActionsQuery>,
) -> ModResult<Json<Value>> {
    let actions = ctx.ledger.list(query.limit, query.offset).await?;
    let total = ctx.ledger.len().await?;

    Ok(Json(json!({
        "actions": actions,
        "total": total,
    })))
}

#[derive(Debug, Deserialize)]
struct RecordActionRequest {
    action: ActionKind,
    user: String,
    #[serde(default)]
    reason: String,
}

/// Append a raw ledger entry without touching the ban or mute registries
async fn record_action(
    State(ctx): State<AppContext>,
    auth: ModeratorContext,
    Json(req): Json<RecordActionRequest>,
) -> ModResult<(StatusCode, Json<Value>)> {
    let entry = ctx
        .ledger
        .record(NewAction::new(&auth.moderator, req.action, &req.user, &req.reason))
        .await?;

    Ok((StatusCode::CREATED, Json(json!(entry))))
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    user: String,
}

async fn user_history(
    State(ctx): State<AppContext>,
    Query(query): Query<HistoryQuery>,
) -> ModResult<Json<Value>> {
    let actions = ctx.ledger.history(&query.user).await?;
    let banned = ctx.bans.is_banned(&query.user).await?;
    let muted = ctx.moderation.is_muted(&query.user).await?;

    Ok(Json(json!({
        "user": query.user.trim(),
        "banned": banned,
        "muted": muted,
        "actions": actions,
    })))
}

// ============================================================================
// Bans
// ============================================================================

#[derive(Debug, Deserialize)]
struct TargetRequest {
    user: String,
    #[serde(default)]
    reason: String,
}

async fn list_bans(State(ctx): State<AppContext>) -> ModResult<Json<Value>> {
    let bans = ctx.bans.list().await?;
    Ok(Json(json!({ "bans": bans })))
}

async fn ban_user(
    State(ctx): State<AppContext>,
    auth: ModeratorContext,
    Json(req): Json<TargetRequest>,
) -> ModResult<(StatusCode, Json<Value>)> {
    let (ban, action) = ctx.bans.ban(&req.user, &req.reason, &auth.moderator).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "ban": ban,
            "action": action,
        })),
    ))
}

#[derive(Debug, Deserialize)]
struct UserRequest {
    user: String,
}

/// Lifting a ban requires the permission to ban
async fn unban_user(
    State(ctx): State<AppContext>,
    auth: ModeratorContext,
    Json(req): Json<UserRequest>,
) -> ModResult<Json<Value>> {
    ctx.roles.authorize(&auth.moderator, ActionKind::Ban).await?;
    let lifted = ctx.bans.unban(&req.user).await?;

    Ok(Json(json!({
        "success": true,
        "ban": lifted,
    })))
}

// ============================================================================
// Mutes and warnings
// ============================================================================

#[derive(Debug, Deserialize)]
struct MuteRequest {
    user: String,
    #[serde(default)]
    reason: String,
    duration_minutes: Option<i64>,
}

async fn list_mutes(State(ctx): State<AppContext>) -> ModResult<Json<Value>> {
    let mutes = ctx.moderation.list_mutes().await?;
    Ok(Json(json!({ "mutes": mutes })))
}

async fn mute_user(
    State(ctx): State<AppContext>,
    auth: ModeratorContext,
    Json(req): Json<MuteRequest>,
) -> ModResult<(StatusCode, Json<Value>)> {
    let duration = req.duration_minutes.map(mute_duration).transpose()?;
    let (mute, action) = ctx
        .moderation
        .mute(&req.user, &req.reason, &auth.moderator, duration)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "mute": mute,
            "action": action,
        })),
    ))
}

async fn unmute_user(
    State(ctx): State<AppContext>,
    auth: ModeratorContext,
    Json(req): Json<UserRequest>,
) -> ModResult<Json<Value>> {
    ctx.roles.authorize(&auth.moderator, ActionKind::Mute).await?;
    ctx.moderation.unmute(&req.user).await?;

    Ok(Json(json!({
        "success": true,
        "user": req.user.trim(),
    })))
}

async fn warn_user(
    State(ctx): State<AppContext>,
    auth: ModeratorContext,
    Json(req): Json<TargetRequest>,
) -> ModResult<(StatusCode, Json<Value>)> {
    let outcome = ctx
        .moderation
        .warn(&req.user, &req.reason, &auth.moderator)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "action": outcome.action,
            "recentWarnings": outcome.recent_warnings,
            "limit": outcome.limit,
            "limitReached": outcome.limit_reached(),
        })),
    ))
}
