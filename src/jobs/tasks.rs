/// Background task implementations
use crate::{context::AppContext, error::ModResult, metrics};

/// Drop mutes whose expiry has passed
pub async fn cleanup_expired_mutes(ctx: &AppContext) -> ModResult<u64> {
    ctx.moderation.cleanup_expired_mutes().await
}

/// Recount the ledger and overwrite drifted counters.
/// Returns whether drift was found.
pub async fn audit_counters(ctx: &AppContext) -> ModResult<bool> {
    let audit = ctx.counters.repair().await?;
    let drifted = !audit.is_consistent();
    if drifted {
        metrics::record_counter_drift();
    }
    Ok(drifted)
}
