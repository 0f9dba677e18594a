/// Rate Limiting
///
/// Two direct limiters: one for moderator commands under `/api/v1`, a looser
/// one for message scanning which the bot calls for every chat message.
use crate::config::RateLimitSettings;
use crate::context::AppContext;
use crate::error::{ModError, ModResult};
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as GovernorLimiter,
};
use std::{num::NonZeroU32, sync::Arc, time::Duration};

type DirectLimiter = GovernorLimiter<NotKeyed, InMemoryState, DefaultClock>;

fn non_zero(value: u32) -> NonZeroU32 {
    NonZeroU32::new(value).unwrap_or(NonZeroU32::MIN)
}

/// Rate limiter manager
#[derive(Clone)]
pub struct RateLimiter {
    enabled: bool,
    admin: Arc<DirectLimiter>,
    scan: Arc<DirectLimiter>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitSettings) -> Self {
        let admin_quota =
            Quota::per_second(non_zero(config.admin_rps)).allow_burst(non_zero(config.burst_size));

        // Scanning sees every chat message; give it twice the burst headroom
        let scan_quota = Quota::per_second(non_zero(config.scan_rps))
            .allow_burst(non_zero(config.burst_size.saturating_mul(2)));

        Self {
            enabled: config.enabled,
            admin: Arc::new(GovernorLimiter::direct(admin_quota)),
            scan: Arc::new(GovernorLimiter::direct(scan_quota)),
        }
    }

    /// Check rate limit for moderator commands
    pub fn check_admin(&self) -> ModResult<()> {
        Self::check(self.enabled, &self.admin)
    }

    /// Check rate limit for message scans
    pub fn check_scan(&self) -> ModResult<()> {
        Self::check(self.enabled, &self.scan)
    }

    fn check(enabled: bool, limiter: &DirectLimiter) -> ModResult<()> {
        if !enabled {
            return Ok(());
        }
        limiter.check().map_err(|_| ModError::RateLimitExceeded {
            retry_after: Duration::from_secs(1),
        })
    }
}

/// Rate limiting middleware
pub async fn rate_limit_middleware(
    State(ctx): State<AppContext>,
    request: Request,
    next: Next,
) -> Result<Response, ModError> {
    let path = request.uri().path();

    if path.starts_with("/api/v1/scan") {
        ctx.rate_limiter.check_scan()?;
    } else if path.starts_with("/api/v1") {
        ctx.rate_limiter.check_admin()?;
    }

    Ok(next.run(request).await)
}
