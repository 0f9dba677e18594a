/// Moderation core
///
/// Action ledger, aggregate counters, ban/mute registries, role registry
/// and the filter policy store.

pub mod bans;
pub mod counters;
pub mod filters;
pub mod ledger;
pub mod moderation;
pub mod roles;

pub use bans::{BanEntry, BanRegistry};
pub use counters::{AggregateCounters, CounterAudit, CounterSnapshot};
pub use filters::{FilterKey, FilterPolicy, FilterPolicyStore, FilterSettings};
pub use ledger::{ActionLedger, ModerationAction, NewAction};
pub use moderation::{ModerationManager, MuteEntry, WarnOutcome};
pub use roles::{RoleAssignment, RoleRegistry, RoleSummary};

use crate::error::{ModError, ModResult};
use bitflags::bitflags;
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Moderation action kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Ban,
    Mute,
    Warn,
}

impl ActionKind {
    pub const ALL: [ActionKind; 3] = [ActionKind::Ban, ActionKind::Mute, ActionKind::Warn];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Ban => "ban",
            ActionKind::Mute => "mute",
            ActionKind::Warn => "warn",
        }
    }

    pub fn from_str(s: &str) -> ModResult<Self> {
        match s.trim().to_lowercase().as_str() {
            "ban" => Ok(ActionKind::Ban),
            "mute" => Ok(ActionKind::Mute),
            "warn" => Ok(ActionKind::Warn),
            _ => Err(ModError::Validation(format!("Invalid moderation action: {}", s))),
        }
    }

    pub fn flag(&self) -> ActionSet {
        match self {
            ActionKind::Ban => ActionSet::BAN,
            ActionKind::Mute => ActionSet::MUTE,
            ActionKind::Warn => ActionSet::WARN,
        }
    }
}

bitflags! {
    /// Set of action kinds a role may perform
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ActionSet: i64 {
        const BAN  = 1 << 0;
        const MUTE = 1 << 1;
        const WARN = 1 << 2;
    }
}

impl ActionSet {
    pub fn allows(&self, kind: ActionKind) -> bool {
        self.contains(kind.flag())
    }

    pub fn kinds(&self) -> Vec<ActionKind> {
        ActionKind::ALL
            .into_iter()
            .filter(|k| self.allows(*k))
            .collect()
    }
}

impl FromIterator<ActionKind> for ActionSet {
    fn from_iter<I: IntoIterator<Item = ActionKind>>(iter: I) -> Self {
        iter.into_iter()
            .fold(ActionSet::empty(), |set, kind| set | kind.flag())
    }
}

// Serialized as a list of kinds, e.g. ["ban", "warn"]
impl Serialize for ActionSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.kinds().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ActionSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let kinds = Vec::<ActionKind>::deserialize(deserializer)?;
        Ok(kinds.into_iter().collect())
    }
}

/// Current time at the precision timestamps are stored with
pub(crate) fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Canonical timestamp encoding; fixed width so text comparison orders correctly
pub(crate) fn encode_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn decode_timestamp(s: &str) -> ModResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ModError::Internal(format!("Invalid timestamp: {}", e)))
}

/// Trim a user identity, rejecting empty ones
pub(crate) fn normalize_identity(field: &str, value: &str) -> ModResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ModError::Validation(format!("{} must not be empty", field)));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_from_str() {
        assert_eq!(ActionKind::from_str("ban").unwrap(), ActionKind::Ban);
        assert_eq!(ActionKind::from_str("MUTE").unwrap(), ActionKind::Mute);
        assert_eq!(ActionKind::from_str(" warn ").unwrap(), ActionKind::Warn);
        assert!(ActionKind::from_str("kick").is_err());
    }

    #[test]
    fn test_action_set_serde() {
        let set: ActionSet = [ActionKind::Mute, ActionKind::Warn].into_iter().collect();
        assert_eq!(set.bits(), 6);
        assert!(!set.allows(ActionKind::Ban));

        let json = serde_json::to_string(&set).unwrap();
        assert_eq!(json, r#"["mute","warn"]"#);

        let back: ActionSet = serde_json::from_str(r#"["ban","warn"]"#).unwrap();
        assert_eq!(back, ActionSet::BAN | ActionSet::WARN);
    }

    #[test]
    fn test_timestamp_roundtrip_is_fixed_width() {
        let now = Utc::now();
        let encoded = encode_timestamp(now);
        assert!(encoded.ends_with('Z'));
        assert_eq!(encoded.len(), "2024-01-01T00:00:00.000000Z".len());
        let decoded = decode_timestamp(&encoded).unwrap();
        assert_eq!(decoded.timestamp_micros(), now.timestamp_micros());
    }

    #[test]
    fn test_normalize_identity() {
        assert_eq!(normalize_identity("user", "  @u1 ").unwrap(), "@u1");
        assert!(normalize_identity("user", "   ").is_err());
    }
}
