/// Message Scanner
///
/// Checks chat messages against the active filter policy:
/// - links: http(s) URLs
/// - invites: Telegram invite links and @handle mentions
/// - spam: long runs of a single repeated character
/// - caps: mostly-uppercase messages above a minimum length
/// - keywords: denylisted words, always active when the list is non-empty
use crate::admin::{AggregateCounters, FilterPolicy, FilterPolicyStore};
use crate::config::FilterConfig;
use crate::error::ModResult;
use crate::metrics;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

lazy_static! {
    static ref URL_PATTERN: Regex = Regex::new(r"(?i)https?://\S+").unwrap();
    static ref INVITE_PATTERN: Regex =
        Regex::new(r"(?i)(t\.me/|telegram\.me/|joinchat/|@\w+)").unwrap();
}

/// A filter a message tripped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Violation {
    Links,
    Invites,
    Spam,
    Caps,
    Keyword,
}

impl Violation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Violation::Links => "links",
            Violation::Invites => "invites",
            Violation::Spam => "spam",
            Violation::Caps => "caps",
            Violation::Keyword => "keyword",
        }
    }
}

/// Result of scanning one message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanReport {
    pub blocked: bool,
    pub violations: Vec<Violation>,
    /// First denylisted keyword found, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_keyword: Option<String>,
}

/// Stateless scanner holding the configured thresholds
#[derive(Debug, Clone)]
pub struct MessageScanner {
    max_char_repetition: usize,
    caps_ratio: f64,
    caps_min_length: usize,
}

impl MessageScanner {
    pub fn new(config: &FilterConfig) -> Self {
        Self {
            max_char_repetition: config.spam_max_char_repetition.max(2),
            caps_ratio: config.caps_ratio,
            caps_min_length: config.caps_min_length,
        }
    }

    /// Run every enabled check against `text`
    pub fn scan(&self, policy: &FilterPolicy, text: &str) -> ScanReport {
        let settings = policy.settings;
        let mut violations = Vec::new();

        if settings.links && URL_PATTERN.is_match(text) {
            violations.push(Violation::Links);
        }

        if settings.invites && INVITE_PATTERN.is_match(text) {
            violations.push(Violation::Invites);
        }

        if settings.spam {
            if let Some(ch) = self.repeated_char(text) {
                debug!(repeated = %ch, "character repetition detected");
                violations.push(Violation::Spam);
            }
        }

        if settings.caps && self.is_shouting(text) {
            violations.push(Violation::Caps);
        }

        let matched_keyword = if policy.keywords.is_empty() {
            None
        } else {
            let lowered = text.to_lowercase();
            policy
                .keywords
                .iter()
                .find(|word| lowered.contains(word.as_str()))
                .cloned()
        };
        if matched_keyword.is_some() {
            violations.push(Violation::Keyword);
        }

        ScanReport {
            blocked: !violations.is_empty(),
            violations,
            matched_keyword,
        }
    }

    /// Scan against the current policy and count the message if blocked
    pub async fn check_message(
        &self,
        filters: &FilterPolicyStore,
        counters: &AggregateCounters,
        text: &str,
    ) -> ModResult<ScanReport> {
        let report = self.scan(&filters.policy(), text);

        metrics::record_filter_check(report.blocked);
        if report.blocked {
            counters.record_blocked(1).await?;
            for violation in &report.violations {
                metrics::record_blocked_message(violation.as_str());
            }
        }

        Ok(report)
    }

    /// First character repeated `max_char_repetition` or more times in a row
    fn repeated_char(&self, text: &str) -> Option<char> {
        let mut chars = text.chars();
        let mut current = chars.next()?;
        let mut run = 1;

        for ch in chars {
            if ch == current {
                run += 1;
                if run >= self.max_char_repetition {
                    return Some(current);
                }
            } else {
                current = ch;
                run = 1;
            }
        }

        None
    }

    /// Ratio is taken over letters only; punctuation and URLs would dilute it
    fn is_shouting(&self, text: &str) -> bool {
        if text.chars().count() <= self.caps_min_length {
            return false;
        }
        let letters = text.chars().filter(|c| c.is_alphabetic()).count();
        if letters == 0 {
            return false;
        }
        let upper = text.chars().filter(|c| c.is_uppercase()).count();
        upper as f64 / letters as f64 > self.caps_ratio
    }
}

impl Default for MessageScanner {
    fn default() -> Self {
        Self::new(&FilterConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin::FilterSettings;
    use crate::db::Database;

    fn policy(settings: FilterSettings, keywords: &[&str]) -> FilterPolicy {
        FilterPolicy {
            settings,
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
        }
    }

    fn all_on() -> FilterSettings {
        FilterSettings {
            links: true,
            invites: true,
            spam: true,
            caps: true,
        }
    }

    #[test]
    fn test_clean_message() {
        let scanner = MessageScanner::default();
        let report = scanner.scan(
            &policy(all_on(), &["casino"]),
            "Hello everyone, nice to meet you",
        );
        assert!(!report.blocked);
        assert!(report.violations.is_empty());
    }

    #[test]
    fn test_links_and_caps() {
        let scanner = MessageScanner::default();
        let report = scanner.scan(&policy(all_on(), &[]), "JOIN NOW AT HTTPS://X.Y");
        assert!(report.blocked);
        assert!(report.violations.contains(&Violation::Links));
        assert!(report.violations.contains(&Violation::Caps));
    }

    #[test]
    fn test_invites() {
        let scanner = MessageScanner::default();
        let p = policy(all_on(), &[]);
        for text in ["join t.me/somechat", "ask @admin_bot", "telegram.me/x", "joinchat/abc"] {
            assert_eq!(scanner.scan(&p, text).violations, vec![Violation::Invites], "{}", text);
        }
    }

    #[test]
    fn test_disabled_checks_are_skipped() {
        let scanner = MessageScanner::default();
        let p = policy(FilterSettings::default(), &[]);
        // caps is off by default
        let report = scanner.scan(&p, "THIS IS VERY LOUD INDEED");
        assert!(!report.blocked);

        let p = policy(
            FilterSettings {
                links: false,
                ..FilterSettings::default()
            },
            &[],
        );
        assert!(!scanner.scan(&p, "see https://example.com").blocked);
    }

    #[test]
    fn test_character_repetition() {
        let scanner = MessageScanner::default();
        let p = policy(all_on(), &[]);
        assert!(!scanner.scan(&p, "soooooo good").blocked);
        assert_eq!(
            scanner.scan(&p, "noooooooooooo").violations,
            vec![Violation::Spam]
        );
    }

    #[test]
    fn test_short_caps_allowed() {
        let scanner = MessageScanner::default();
        let p = policy(all_on(), &[]);
        assert!(!scanner.scan(&p, "OK THANKS").blocked);
    }

    #[test]
    fn test_keyword_case_insensitive() {
        let scanner = MessageScanner::default();
        let p = policy(FilterSettings::default(), &["казино"]);
        let report = scanner.scan(&p, "Лучшее КАЗИНО тут");
        assert_eq!(report.violations, vec![Violation::Keyword]);
        assert_eq!(report.matched_keyword.as_deref(), Some("казино"));
    }

    #[tokio::test]
    async fn test_blocked_message_counted_once() {
        let db = Database::in_memory().await.unwrap();
        let filters = FilterPolicyStore::load(db.clone()).await.unwrap();
        let counters = AggregateCounters::new(db);
        filters
            .set(crate::admin::FilterKey::Caps, true)
            .await
            .unwrap();

        let scanner = MessageScanner::default();
        let report = scanner
            .check_message(&filters, &counters, "JOIN NOW AT HTTPS://X.Y")
            .await
            .unwrap();
        assert_eq!(report.violations.len(), 2);

        scanner
            .check_message(&filters, &counters, "hello there")
            .await
            .unwrap();

        assert_eq!(counters.snapshot().await.unwrap().blocked_messages, 1);
    }
}
