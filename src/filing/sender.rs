use std::fmt;
use std::str::FromStr;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::models::SenderRule;

/// Longest regex source accepted for a sender rule.
pub const MAX_REGEX_PATTERN_LEN: usize = 256;
/// Upper bound on the compiled program size of a sender regex.
const REGEX_SIZE_LIMIT: usize = 64 * 1024;

const NEWSLETTER_MARKERS: &[&str] = &[
    "unsubscribe",
    "newsletter",
    "view in browser",
    "view this email in your browser",
    "weekly digest",
    "manage your preferences",
    "email preferences",
];

const AUTOMATED_LOCAL_PREFIXES: &[&str] = &[
    "noreply",
    "no-reply",
    "no_reply",
    "donotreply",
    "do-not-reply",
    "mailer-daemon",
    "postmaster",
    "notifications",
    "notification",
    "bounce",
];

const AUTOMATED_SUBJECT_MARKERS: &[&str] = &[
    "automatic reply",
    "auto-reply",
    "autoreply",
    "out of office",
    "delivery status notification",
    "undeliverable",
    "mail delivery failed",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListKind {
    Blocked,
    Trusted,
}

impl ListKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Blocked => "blocked",
            Self::Trusted => "trusted",
        }
    }
}

impl FromStr for ListKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "blocked" => Ok(Self::Blocked),
            "trusted" => Ok(Self::Trusted),
            other => Err(format!("unknown sender list `{other}`")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    Exact,
    Domain,
    Regex,
}

impl PatternType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Domain => "domain",
            Self::Regex => "regex",
        }
    }
}

impl FromStr for PatternType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "exact" => Ok(Self::Exact),
            "domain" => Ok(Self::Domain),
            "regex" => Ok(Self::Regex),
            other => Err(format!("unknown pattern type `{other}`")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    Spam,
    Solicitation,
    Phishing,
}

impl BlockReason {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Spam => "spam",
            Self::Solicitation => "solicitation",
            Self::Phishing => "phishing",
        }
    }
}

impl FromStr for BlockReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "spam" => Ok(Self::Spam),
            "solicitation" => Ok(Self::Solicitation),
            "phishing" => Ok(Self::Phishing),
            other => Err(format!("unknown block reason `{other}`")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderClassification {
    Legitimate,
    Spam,
    Solicitation,
    Phishing,
    Newsletter,
    Automated,
    Unknown,
}

impl SenderClassification {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Legitimate => "legitimate",
            Self::Spam => "spam",
            Self::Solicitation => "solicitation",
            Self::Phishing => "phishing",
            Self::Newsletter => "newsletter",
            Self::Automated => "automated",
            Self::Unknown => "unknown",
        }
    }

    pub const fn is_blocked(&self) -> bool {
        matches!(self, Self::Spam | Self::Solicitation | Self::Phishing)
    }
}

impl From<BlockReason> for SenderClassification {
    fn from(reason: BlockReason) -> Self {
        match reason {
            BlockReason::Spam => Self::Spam,
            BlockReason::Solicitation => Self::Solicitation,
            BlockReason::Phishing => Self::Phishing,
        }
    }
}

impl fmt::Display for SenderClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The parts of a message the classifier looks at.
#[derive(Debug, Clone, Copy)]
pub struct SenderMessage<'a> {
    pub address: &'a str,
    pub subject: &'a str,
    pub body: &'a str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SenderVerdict {
    pub classification: SenderClassification,
    pub matched_rule_id: Option<Uuid>,
}

#[derive(Debug)]
enum Matcher {
    Exact(String),
    Domain(String),
    Regex(Regex),
}

impl Matcher {
    fn matches(&self, address: &str, domain: &str) -> bool {
        match self {
            Matcher::Exact(expected) => address == expected,
            Matcher::Domain(pattern) => domain_matches(domain, pattern),
            Matcher::Regex(regex) => regex.is_match(address),
        }
    }
}

#[derive(Debug)]
struct CompiledRule {
    id: Uuid,
    matcher: Matcher,
    reason: BlockReason,
}

/// Sender block/allow lists compiled once and reused for every message in a run.
#[derive(Debug, Default)]
pub struct SenderRuleSet {
    blocked: Vec<CompiledRule>,
    trusted: Vec<CompiledRule>,
}

impl SenderRuleSet {
    pub fn compile(rules: &[SenderRule]) -> Self {
        let mut set = SenderRuleSet::default();
        for rule in rules {
            let (kind, pattern_type) = match (
                rule.list_kind.parse::<ListKind>(),
                rule.pattern_type.parse::<PatternType>(),
            ) {
                (Ok(kind), Ok(pattern_type)) => (kind, pattern_type),
                (Err(err), _) | (_, Err(err)) => {
                    warn!(rule_id = %rule.id, error = %err, "skipping sender rule with invalid metadata");
                    continue;
                }
            };

            let matcher = match pattern_type {
                PatternType::Exact => Matcher::Exact(normalize_address(&rule.pattern)),
                PatternType::Domain => Matcher::Domain(normalize_domain(&rule.pattern)),
                PatternType::Regex => match compile_sender_regex(&rule.pattern) {
                    Ok(regex) => Matcher::Regex(regex),
                    Err(err) => {
                        warn!(
                            rule_id = %rule.id,
                            pattern = %rule.pattern,
                            error = %err,
                            "skipping sender rule with invalid regex"
                        );
                        continue;
                    }
                },
            };

            let reason = rule
                .reason
                .as_deref()
                .and_then(|value| value.parse::<BlockReason>().ok())
                .unwrap_or(BlockReason::Spam);

            let compiled = CompiledRule {
                id: rule.id,
                matcher,
                reason,
            };
            match kind {
                ListKind::Blocked => set.blocked.push(compiled),
                ListKind::Trusted => set.trusted.push(compiled),
            }
        }
        set
    }

    pub fn len(&self) -> usize {
        self.blocked.len() + self.trusted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Blocked list first, then trusted list, then content heuristics.
    pub fn classify(&self, message: &SenderMessage<'_>) -> SenderVerdict {
        let address = normalize_address(message.address);
        let domain = address_domain(&address);

        if let Some(rule) = self
            .blocked
            .iter()
            .find(|rule| rule.matcher.matches(&address, domain))
        {
            return SenderVerdict {
                classification: rule.reason.into(),
                matched_rule_id: Some(rule.id),
            };
        }

        if let Some(rule) = self
            .trusted
            .iter()
            .find(|rule| rule.matcher.matches(&address, domain))
        {
            return SenderVerdict {
                classification: SenderClassification::Legitimate,
                matched_rule_id: Some(rule.id),
            };
        }

        SenderVerdict {
            classification: classify_by_content(&address, message.subject, message.body),
            matched_rule_id: None,
        }
    }
}

fn classify_by_content(address: &str, subject: &str, body: &str) -> SenderClassification {
    let subject = subject.to_lowercase();
    let body = body.to_lowercase();
    let local = address.split('@').next().unwrap_or_default();

    if local.starts_with("newsletter")
        || NEWSLETTER_MARKERS
            .iter()
            .any(|marker| subject.contains(marker) || body.contains(marker))
    {
        return SenderClassification::Newsletter;
    }

    if AUTOMATED_LOCAL_PREFIXES
        .iter()
        .any(|prefix| local.starts_with(prefix))
        || AUTOMATED_SUBJECT_MARKERS
            .iter()
            .any(|marker| subject.contains(marker))
    {
        return SenderClassification::Automated;
    }

    SenderClassification::Unknown
}

/// Lowercases an address and strips a `Display Name <addr>` wrapper.
pub fn normalize_address(raw: &str) -> String {
    let trimmed = raw.trim();
    let inner = match (trimmed.rfind('<'), trimmed.rfind('>')) {
        (Some(start), Some(end)) if start < end => &trimmed[start + 1..end],
        _ => trimmed,
    };
    inner.trim().to_lowercase()
}

fn normalize_domain(raw: &str) -> String {
    raw.trim()
        .trim_start_matches("*.")
        .trim_start_matches('@')
        .trim_end_matches('.')
        .to_lowercase()
}

fn address_domain(address: &str) -> &str {
    address.rsplit_once('@').map(|(_, domain)| domain).unwrap_or("")
}

fn domain_matches(domain: &str, pattern: &str) -> bool {
    if pattern.is_empty() || domain.is_empty() {
        return false;
    }
    domain == pattern
        || domain
            .strip_suffix(pattern)
            .is_some_and(|prefix| prefix.ends_with('.'))
}

/// Compiles an operator-supplied pattern on the linear-time engine with bounded size.
pub fn compile_sender_regex(pattern: &str) -> Result<Regex, String> {
    if pattern.len() > MAX_REGEX_PATTERN_LEN {
        return Err(format!(
            "pattern exceeds {MAX_REGEX_PATTERN_LEN} characters"
        ));
    }
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .size_limit(REGEX_SIZE_LIMIT)
        .dfa_size_limit(REGEX_SIZE_LIMIT)
        .build()
        .map_err(|err| err.to_string())
}

/// Validates and normalizes a pattern before it is stored.
pub fn normalize_pattern(pattern_type: PatternType, raw: &str) -> Result<String, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err("pattern must not be empty".into());
    }
    match pattern_type {
        PatternType::Exact => {
            let address = normalize_address(trimmed);
            let valid = address
                .split_once('@')
                .is_some_and(|(local, domain)| !local.is_empty() && !domain.is_empty());
            if !valid {
                return Err("exact patterns must be a full email address".into());
            }
            Ok(address)
        }
        PatternType::Domain => {
            let domain = normalize_domain(trimmed);
            if domain.contains('@') || !domain.contains('.') {
                return Err("domain patterns must look like example.com".into());
            }
            Ok(domain)
        }
        PatternType::Regex => {
            compile_sender_regex(trimmed)?;
            Ok(trimmed.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn rule(kind: &str, pattern_type: &str, pattern: &str, reason: Option<&str>) -> SenderRule {
        let now = Utc::now().naive_utc();
        SenderRule {
            id: Uuid::new_v4(),
            list_kind: kind.into(),
            pattern: pattern.into(),
            pattern_type: pattern_type.into(),
            reason: reason.map(Into::into),
            notes: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn message<'a>(address: &'a str, subject: &'a str, body: &'a str) -> SenderMessage<'a> {
        SenderMessage {
            address,
            subject,
            body,
        }
    }

    #[test]
    fn blocked_domain_matches_any_local_part() {
        let set = SenderRuleSet::compile(&[rule("blocked", "domain", "spam-domain.com", None)]);
        let verdict = set.classify(&message("anything@spam-domain.com", "hi", ""));
        assert_eq!(verdict.classification, SenderClassification::Spam);
        assert!(verdict.matched_rule_id.is_some());
    }

    #[test]
    fn blocked_list_takes_precedence_over_trusted() {
        let blocked = rule("blocked", "exact", "sales@vendor.com", Some("solicitation"));
        let trusted = rule("trusted", "domain", "vendor.com", None);
        let blocked_id = blocked.id;
        let set = SenderRuleSet::compile(&[trusted, blocked]);

        let verdict = set.classify(&message("Sales <SALES@vendor.com>", "Offer", ""));
        assert_eq!(verdict.classification, SenderClassification::Solicitation);
        assert_eq!(verdict.matched_rule_id, Some(blocked_id));

        let verdict = set.classify(&message("billing@vendor.com", "Invoice", ""));
        assert_eq!(verdict.classification, SenderClassification::Legitimate);
    }

    #[test]
    fn domain_rule_matches_subdomains_but_not_lookalikes() {
        let set = SenderRuleSet::compile(&[rule("trusted", "domain", "@acme.com", None)]);
        assert_eq!(
            set.classify(&message("ap@mail.acme.com", "", "")).classification,
            SenderClassification::Legitimate
        );
        assert_eq!(
            set.classify(&message("ap@notacme.com", "", "")).classification,
            SenderClassification::Unknown
        );
    }

    #[test]
    fn invalid_regex_is_skipped_not_fatal() {
        let set = SenderRuleSet::compile(&[
            rule("blocked", "regex", "([a-z", Some("phishing")),
            rule("blocked", "regex", r"^.*@evil\.(com|net)$", Some("phishing")),
        ]);
        assert_eq!(set.len(), 1);
        assert_eq!(
            set.classify(&message("x@evil.net", "", "")).classification,
            SenderClassification::Phishing
        );
        assert_eq!(
            set.classify(&message("x@good.net", "", "")).classification,
            SenderClassification::Unknown
        );
    }

    #[test]
    fn trusted_sender_bypasses_heuristics() {
        let set = SenderRuleSet::compile(&[rule("trusted", "exact", "noreply@bank.com", None)]);
        let verdict = set.classify(&message("noreply@bank.com", "Statement", "unsubscribe"));
        assert_eq!(verdict.classification, SenderClassification::Legitimate);
    }

    #[test]
    fn heuristics_detect_newsletters_and_automation() {
        let set = SenderRuleSet::default();
        assert_eq!(
            set.classify(&message("news@shop.com", "Spring sale", "Click to unsubscribe"))
                .classification,
            SenderClassification::Newsletter
        );
        assert_eq!(
            set.classify(&message("no-reply@carrier.com", "Tracking update", ""))
                .classification,
            SenderClassification::Automated
        );
        assert_eq!(
            set.classify(&message("jane@partner.com", "Automatic reply: away", ""))
                .classification,
            SenderClassification::Automated
        );
        assert_eq!(
            set.classify(&message("jane@partner.com", "PO 1234", "see attached"))
                .classification,
            SenderClassification::Unknown
        );
    }

    #[test]
    fn missing_reason_defaults_to_spam() {
        let set = SenderRuleSet::compile(&[rule("blocked", "exact", "a@b.com", Some("bogus"))]);
        assert_eq!(
            set.classify(&message("a@b.com", "", "")).classification,
            SenderClassification::Spam
        );
    }

    #[test]
    fn normalizes_patterns_before_storage() {
        assert_eq!(
            normalize_pattern(PatternType::Domain, " @Spam-Domain.com "),
            Ok("spam-domain.com".to_string())
        );
        assert_eq!(
            normalize_pattern(PatternType::Exact, "Bob <BOB@Example.com>"),
            Ok("bob@example.com".to_string())
        );
        assert!(normalize_pattern(PatternType::Exact, "example.com").is_err());
        assert!(normalize_pattern(PatternType::Domain, "localhost").is_err());
        assert!(normalize_pattern(PatternType::Regex, "(unclosed").is_err());
        assert!(normalize_pattern(PatternType::Regex, &"a".repeat(300)).is_err());
    }
}
