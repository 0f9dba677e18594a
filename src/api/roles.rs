/// Role Management Endpoints
use crate::{
    admin::{ActionSet, RoleAssignment, RoleSummary},
    auth::ModeratorContext,
    error::ModResult,
    AppContext,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

/// Build role API routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/api/v1/roles", get(list_roles).post(define_role))
        .route("/api/v1/roles/:name/permissions", get(role_permissions))
        .route("/api/v1/roles/assign", post(assign_role))
        .route("/api/v1/roles/revoke", post(revoke_role))
}

/// All roles with holder counts, most senior first
async fn list_roles(State(ctx): State<AppContext>) -> ModResult<Json<Value>> {
    let roles = ctx.roles.list_roles().await?;
    Ok(Json(json!({ "roles": roles })))
}

#[derive(Debug, Deserialize)]
struct DefineRoleRequest {
    name: String,
    tier: i64,
    permissions: ActionSet,
}

async fn define_role(
    State(ctx): State<AppContext>,
    auth: ModeratorContext,
    Json(req): Json<DefineRoleRequest>,
) -> ModResult<(StatusCode, Json<RoleSummary>)> {
    ctx.roles.require_top_tier(&auth.moderator).await?;
    let role = ctx
        .roles
        .define_role(&req.name, req.tier, req.permissions)
        .await?;

    Ok((StatusCode::CREATED, Json(role)))
}

async fn role_permissions(
    State(ctx): State<AppContext>,
    Path(name): Path<String>,
) -> ModResult<Json<Value>> {
    let permissions = ctx.roles.permitted_actions(&name).await?;
    Ok(Json(json!({
        "role": name,
        "permissions": permissions,
    })))
}

#[derive(Debug, Deserialize)]
struct AssignRoleRequest {
    user: String,
    role: String,
}

/// Grant a role, replacing any role the user held
async fn assign_role(
    State(ctx): State<AppContext>,
    auth: ModeratorContext,
    Json(req): Json<AssignRoleRequest>,
) -> ModResult<Json<RoleAssignment>> {
    ctx.roles.require_top_tier(&auth.moderator).await?;
    let assignment = ctx
        .roles
        .assign_role(&req.user, &req.role, Some(&auth.moderator))
        .await?;

    Ok(Json(assignment))
}

#[derive(Debug, Deserialize)]
struct RevokeRoleRequest {
    user: String,
}

async fn revoke_role(
    State(ctx): State<AppContext>,
    auth: ModeratorContext,
    Json(req): Json<RevokeRoleRequest>,
) -> ModResult<Json<Value>> {
    ctx.roles.require_top_tier(&auth.moderator).await?;
    ctx.roles.revoke_role(&req.user).await?;

    Ok(Json(json!({
        "success": true,
        "user": req.user.trim(),
    })))
}
