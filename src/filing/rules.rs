use chrono::NaiveDate;
use serde::Serialize;
use uuid::Uuid;

use super::{DestinationType, DocumentCategory};
use crate::config::DefaultDestination;
use crate::models::FilingRule;

pub const TEMPLATE_TOKENS: &[&str] = &[
    "vendor",
    "date",
    "year",
    "month",
    "document_number",
    "category",
];

const UNKNOWN_VENDOR: &str = "Unknown Vendor";
const UNNUMBERED: &str = "unnumbered";

/// A classified attachment as seen by the rule engine.
#[derive(Debug, Clone)]
pub struct FilingCandidate {
    pub category: DocumentCategory,
    pub vendor_name: Option<String>,
    pub amount: Option<f64>,
    pub document_number: Option<String>,
    pub received_on: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleMatch {
    pub rule_id: Option<Uuid>,
    pub destination_type: DestinationType,
    pub destination_path: String,
}

/// Picks the first enabled rule, by ascending priority, whose conditions all hold.
pub fn select_rule<'a>(rules: &'a [FilingRule], candidate: &FilingCandidate) -> Option<&'a FilingRule> {
    let mut ordered: Vec<&FilingRule> = rules.iter().filter(|rule| rule.is_enabled).collect();
    ordered.sort_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then_with(|| a.name.cmp(&b.name))
            .then_with(|| a.id.cmp(&b.id))
    });
    ordered
        .into_iter()
        .find(|rule| rule_matches(rule, candidate))
}

fn rule_matches(rule: &FilingRule, candidate: &FilingCandidate) -> bool {
    if let Some(category) = rule.document_category.as_deref() {
        if category != candidate.category.as_str() {
            return false;
        }
    }

    if let Some(pattern) = rule
        .vendor_pattern
        .as_deref()
        .map(str::trim)
        .filter(|pattern| !pattern.is_empty())
    {
        let Some(vendor) = candidate.vendor_name.as_deref() else {
            return false;
        };
        if !vendor.to_lowercase().contains(&pattern.to_lowercase()) {
            return false;
        }
    }

    if rule.min_amount.is_some() || rule.max_amount.is_some() {
        let Some(amount) = candidate.amount else {
            return false;
        };
        if rule.min_amount.is_some_and(|min| amount < min) {
            return false;
        }
        if rule.max_amount.is_some_and(|max| amount > max) {
            return false;
        }
    }

    true
}

/// Resolves the destination for a candidate: first matching rule, else the configured default.
pub fn route(
    rules: &[FilingRule],
    default_destination: Option<&DefaultDestination>,
    candidate: &FilingCandidate,
) -> Result<Option<RuleMatch>, String> {
    if let Some(rule) = select_rule(rules, candidate) {
        let destination_type = rule.destination_type.parse::<DestinationType>()?;
        return Ok(Some(RuleMatch {
            rule_id: Some(rule.id),
            destination_type,
            destination_path: render_path(&rule.path_template, candidate)?,
        }));
    }

    match default_destination {
        Some(default) => Ok(Some(RuleMatch {
            rule_id: None,
            destination_type: default.destination_type,
            destination_path: render_path(&default.path_template, candidate)?,
        })),
        None => Ok(None),
    }
}

/// Checks that a template only uses known `{token}` placeholders.
pub fn validate_template(template: &str) -> Result<(), String> {
    if template.trim().is_empty() {
        return Err("path template must not be empty".into());
    }
    for token in template_tokens(template)? {
        if !TEMPLATE_TOKENS.contains(&token) {
            return Err(format!("unknown template token `{{{token}}}`"));
        }
    }
    Ok(())
}

fn template_tokens(template: &str) -> Result<Vec<&str>, String> {
    let mut tokens = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        let after = &rest[start + 1..];
        let end = after
            .find('}')
            .ok_or_else(|| "unterminated `{` in path template".to_string())?;
        tokens.push(&after[..end]);
        rest = &after[end + 1..];
    }
    if rest.contains('}') {
        return Err("unmatched `}` in path template".into());
    }
    Ok(tokens)
}

pub fn render_path(template: &str, candidate: &FilingCandidate) -> Result<String, String> {
    validate_template(template)?;

    let vendor = candidate
        .vendor_name
        .as_deref()
        .map(sanitize_segment)
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| UNKNOWN_VENDOR.to_string());
    let document_number = candidate
        .document_number
        .as_deref()
        .map(sanitize_segment)
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| UNNUMBERED.to_string());
    let date = candidate.received_on;

    let rendered = substitute_tokens(template, |token| match token {
        "vendor" => Some(vendor.clone()),
        "date" => Some(date.format("%Y-%m-%d").to_string()),
        "year" => Some(date.format("%Y").to_string()),
        "month" => Some(date.format("%m").to_string()),
        "document_number" => Some(document_number.clone()),
        "category" => Some(candidate.category.as_str().to_string()),
        _ => None,
    });

    let path = rendered
        .split('/')
        .map(str::trim)
        .filter(|segment| !segment.is_empty() && *segment != "." && *segment != "..")
        .collect::<Vec<_>>()
        .join("/");

    if path.is_empty() {
        return Err("path template resolved to an empty path".into());
    }
    Ok(path)
}

/// Expands `{token}` placeholders in one left-to-right pass; substituted text is never rescanned.
fn substitute_tokens(template: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut rendered = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        rendered.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}').and_then(|close| Some((close, lookup(&after[..close])?))) {
            Some((close, value)) => {
                rendered.push_str(&value);
                rest = &after[close + 1..];
            }
            None => {
                rendered.push('{');
                rest = after;
            }
        }
    }
    rendered.push_str(rest);
    rendered
}

fn sanitize_segment(value: &str) -> String {
    value
        .trim()
        .chars()
        .map(|ch| match ch {
            '/' | '\\' => '-',
            ch if ch.is_control() => ' ',
            ch => ch,
        })
        .collect::<String>()
        .trim_matches('.')
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn rule(name: &str, priority: i32, enabled: bool) -> FilingRule {
        let now = Utc::now().naive_utc();
        FilingRule {
            id: Uuid::new_v4(),
            name: name.into(),
            priority,
            is_enabled: enabled,
            document_category: None,
            vendor_pattern: None,
            min_amount: None,
            max_amount: None,
            destination_type: "vendor_folder".into(),
            path_template: "Vendors/{vendor}/{year}".into(),
            times_matched: 0,
            last_matched_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn candidate() -> FilingCandidate {
        FilingCandidate {
            category: DocumentCategory::Invoice,
            vendor_name: Some("Acme Supplies".into()),
            amount: Some(2500.0),
            document_number: Some("INV/2024/7".into()),
            received_on: NaiveDate::from_ymd_opt(2024, 3, 9).unwrap(),
        }
    }

    #[test]
    fn lowest_priority_enabled_rule_wins() {
        let mut disabled = rule("disabled", 1, false);
        disabled.destination_type = "data_room".into();
        let second = rule("second", 20, true);
        let first = rule("first", 10, true);
        let first_id = first.id;

        let rules = vec![disabled, second, first];
        let selected = select_rule(&rules, &candidate()).unwrap();
        assert_eq!(selected.id, first_id);
    }

    #[test]
    fn disabled_rules_are_never_selected() {
        let rules = vec![rule("only", 1, false)];
        assert!(select_rule(&rules, &candidate()).is_none());
    }

    #[test]
    fn conditions_must_all_hold() {
        let mut by_category = rule("customs", 1, true);
        by_category.document_category = Some("customs".into());
        let mut by_vendor = rule("globex", 2, true);
        by_vendor.vendor_pattern = Some("globex".into());
        let mut by_amount = rule("large", 3, true);
        by_amount.min_amount = Some(1000.0);
        by_amount.max_amount = Some(5000.0);
        let large_id = by_amount.id;

        let rules = vec![by_category, by_vendor, by_amount];
        assert_eq!(select_rule(&rules, &candidate()).unwrap().id, large_id);

        let mut without_amount = candidate();
        without_amount.amount = None;
        assert!(select_rule(&rules, &without_amount).is_none());
    }

    #[test]
    fn amount_bounds_are_inclusive() {
        let mut bounded = rule("bounded", 1, true);
        bounded.min_amount = Some(2500.0);
        bounded.max_amount = Some(2500.0);
        assert!(select_rule(&[bounded], &candidate()).is_some());
    }

    #[test]
    fn vendor_pattern_is_case_insensitive() {
        let mut by_vendor = rule("acme", 1, true);
        by_vendor.vendor_pattern = Some("ACME".into());
        assert!(select_rule(&[by_vendor], &candidate()).is_some());
    }

    #[test]
    fn renders_tokens_and_sanitizes_segments() {
        let path = render_path(
            "/Finance//{category}/{vendor}/{date}/{document_number}/",
            &candidate(),
        )
        .unwrap();
        assert_eq!(path, "Finance/invoice/Acme Supplies/2024-03-09/INV-2024-7");
    }

    #[test]
    fn missing_values_use_placeholders() {
        let mut bare = candidate();
        bare.vendor_name = None;
        bare.document_number = None;
        let path = render_path("{vendor}/{year}-{month}/{document_number}", &bare).unwrap();
        assert_eq!(path, "Unknown Vendor/2024-03/unnumbered");
    }

    #[test]
    fn substituted_values_are_not_expanded_again() {
        let mut braces = candidate();
        braces.vendor_name = Some("Acme {date}".into());
        braces.document_number = Some("{year}".into());
        let path = render_path("{vendor}/{document_number}", &braces).unwrap();
        assert_eq!(path, "Acme {date}/{year}");
    }

    #[test]
    fn rejects_unknown_or_malformed_tokens() {
        assert!(validate_template("Vendors/{vendor}").is_ok());
        assert!(validate_template("Vendors/{customer}").is_err());
        assert!(validate_template("Vendors/{vendor").is_err());
        assert!(validate_template("Vendors/vendor}").is_err());
        assert!(validate_template("  ").is_err());
    }

    #[test]
    fn routing_falls_back_to_default_destination() {
        let default = DefaultDestination {
            destination_type: DestinationType::GoogleDrive,
            path_template: "Inbox/{date}".into(),
        };
        let routed = route(&[], Some(&default), &candidate()).unwrap().unwrap();
        assert_eq!(routed.rule_id, None);
        assert_eq!(routed.destination_type, DestinationType::GoogleDrive);
        assert_eq!(routed.destination_path, "Inbox/2024-03-09");

        assert_eq!(route(&[], None, &candidate()).unwrap(), None);
    }

    #[test]
    fn routing_is_repeatable() {
        let rules = vec![rule("a", 5, true), rule("b", 5, true)];
        let first = route(&rules, None, &candidate()).unwrap();
        let second = route(&rules, None, &candidate()).unwrap();
        assert_eq!(first, second);
    }
}
