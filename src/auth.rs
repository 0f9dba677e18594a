/// Moderator identity extractors
///
/// The dashboard and bot name the acting moderator in the `X-Moderator`
/// header. Authorization against roles happens in the admin core, not here.
use crate::{context::AppContext, error::ModError};
use axum::{async_trait, extract::FromRequestParts, http::request::Parts, http::HeaderMap};

pub const MODERATOR_HEADER: &str = "x-moderator";

/// Extract the moderator named by the request, if any
pub fn extract_moderator(headers: &HeaderMap) -> Option<String> {
    headers
        .get(MODERATOR_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Acting moderator for a mutating request
#[derive(Debug, Clone)]
pub struct ModeratorContext {
    pub moderator: String,
}

#[async_trait]
impl FromRequestParts<AppContext> for ModeratorContext {
    type Rejection = ModError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        let moderator = extract_moderator(&parts.headers).ok_or_else(|| {
            ModError::Authentication("Missing X-Moderator header".to_string())
        })?;

        Ok(ModeratorContext { moderator })
    }
}
