use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::{Regex, RegexBuilder};
use serde::Serialize;

use super::DocumentCategory;

/// Bytes of a text attachment inspected by the keyword classifier.
const MAX_TEXT_SCAN_BYTES: usize = 64 * 1024;
const MAX_DOCUMENT_NUMBER_LEN: usize = 64;

const PERSONAL_MAIL_DOMAINS: &[&str] = &[
    "gmail.com",
    "googlemail.com",
    "outlook.com",
    "hotmail.com",
    "live.com",
    "yahoo.com",
    "icloud.com",
    "me.com",
    "aol.com",
    "proton.me",
    "protonmail.com",
];

/// Second-level labels that sit under a country code, as in `co.uk` or `com.au`.
const SECOND_LEVEL_LABELS: &[&str] = &["co", "com", "org", "net", "ac", "gov", "edu", "ltd", "plc"];

/// What the classifier is given for one attachment.
#[derive(Debug, Clone, Copy)]
pub struct DocumentInput<'a> {
    pub filename: &'a str,
    pub content_type: Option<&'a str>,
    pub subject: &'a str,
    pub body: &'a str,
    pub sender_address: &'a str,
    pub sender_name: Option<&'a str>,
    pub bytes: &'a [u8],
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentFacts {
    pub category: DocumentCategory,
    pub document_number: Option<String>,
    pub vendor_name: Option<String>,
    pub amount: Option<f64>,
    pub currency: Option<String>,
}

/// Seam for richer (for example LLM-backed) extraction.
#[async_trait]
pub trait DocumentClassifier: Send + Sync + 'static {
    async fn classify(&self, input: &DocumentInput<'_>) -> Result<DocumentFacts>;
}

/// Deterministic keyword and pattern extraction over filename, subject, body and text payloads.
pub struct KeywordClassifier {
    categories: Vec<(DocumentCategory, Regex)>,
    document_number: Regex,
    amount: Regex,
}

impl KeywordClassifier {
    pub fn new() -> Result<Self> {
        // Table order breaks ties when two categories match at the same offset.
        let table: &[(DocumentCategory, &str)] = &[
            (
                DocumentCategory::Customs,
                r"customs|bill of lading|packing list|certificate of origin|commercial invoice|\bhs code|air ?waybill",
            ),
            (
                DocumentCategory::PurchaseOrder,
                r"purchase[\s_-]*order|\bp\.?o\.?(?:\s*#|\s*no\b|\s*number|[\s_-]*\d)",
            ),
            (
                DocumentCategory::Quote,
                r"\bquot(?:e|ation)s?\b|\bestimate\b|\bproposal\b",
            ),
            (
                DocumentCategory::Receipt,
                r"\breceipt\b|payment confirmation",
            ),
            (
                DocumentCategory::Statement,
                r"\bstatement\b|account summary",
            ),
            (
                DocumentCategory::Contract,
                r"\bcontract\b|\bagreement\b|\bnda\b|\bmsa\b",
            ),
            (
                DocumentCategory::Invoice,
                r"\binvoice\b|\binv[\s_#-]*\d|\bbill\b",
            ),
        ];

        let categories = table
            .iter()
            .map(|(category, pattern)| {
                case_insensitive(pattern)
                    .with_context(|| format!("invalid pattern for category {category}"))
                    .map(|regex| (*category, regex))
            })
            .collect::<Result<Vec<_>>>()?;

        let document_number = case_insensitive(
            r"\b(?:invoice|inv|purchase[\s_-]*order|po|quotation|quote|receipt|order)(?:[\s_-]*(?:no\.?|number|num))?[\s:#_-]*([a-z0-9][a-z0-9/-]*\d[a-z0-9/-]*)",
        )?;
        let amount = case_insensitive(
            r"\b(?:grand total|total due|amount due|balance due|total amount|total)\b[^0-9$€£]{0,20}?(usd|eur|gbp|cad|aud|\$|€|£)?\s*([0-9]{1,3}(?:,[0-9]{3})+(?:\.[0-9]{1,2})?|[0-9]+(?:\.[0-9]{1,2})?)(?:\s*(usd|eur|gbp|cad|aud)\b)?",
        )?;

        Ok(Self {
            categories,
            document_number,
            amount,
        })
    }

    fn category_of(&self, sources: &[&str]) -> DocumentCategory {
        for source in sources {
            let earliest = self
                .categories
                .iter()
                .filter_map(|(category, regex)| regex.find(source).map(|m| (m.start(), *category)))
                .min_by_key(|(start, _)| *start);
            if let Some((_, category)) = earliest {
                return category;
            }
        }
        DocumentCategory::Other
    }

    fn document_number_of(&self, sources: &[&str]) -> Option<String> {
        sources.iter().find_map(|source| {
            self.document_number.captures_iter(source).find_map(|caps| {
                let value = caps
                    .get(1)?
                    .as_str()
                    .trim_end_matches(['-', '/'])
                    .to_uppercase();
                (!value.is_empty() && value.len() <= MAX_DOCUMENT_NUMBER_LEN).then_some(value)
            })
        })
    }

    fn amount_of(&self, sources: &[&str]) -> (Option<f64>, Option<String>) {
        let mut best: Option<(f64, Option<String>)> = None;
        for source in sources {
            for caps in self.amount.captures_iter(source) {
                let Some(raw) = caps.get(2) else { continue };
                let Ok(value) = raw.as_str().replace(',', "").parse::<f64>() else {
                    continue;
                };
                let currency = caps
                    .get(1)
                    .or_else(|| caps.get(3))
                    .map(|m| currency_code(m.as_str()));
                if best.as_ref().map_or(true, |(current, _)| value > *current) {
                    best = Some((value, currency));
                }
            }
        }
        match best {
            Some((value, currency)) => (Some(value), currency),
            None => (None, None),
        }
    }
}

#[async_trait]
impl DocumentClassifier for KeywordClassifier {
    async fn classify(&self, input: &DocumentInput<'_>) -> Result<DocumentFacts> {
        let text = text_payload(input);
        let sources: Vec<&str> = [Some(input.filename), Some(input.subject), Some(input.body), text]
            .into_iter()
            .flatten()
            .filter(|source| !source.trim().is_empty())
            .collect();

        let category = self.category_of(&sources);
        let document_number = self.document_number_of(&sources);
        let (amount, currency) = self.amount_of(&sources);

        Ok(DocumentFacts {
            category,
            document_number,
            vendor_name: vendor_name_for(input.sender_address, input.sender_name),
            amount,
            currency,
        })
    }
}

fn case_insensitive(pattern: &str) -> Result<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .with_context(|| format!("failed to compile pattern {pattern}"))
}

fn text_payload<'a>(input: &DocumentInput<'a>) -> Option<&'a str> {
    let textual = input
        .content_type
        .map(|mime| mime.starts_with("text/") || mime == "application/json")
        .unwrap_or(false);
    if !textual {
        return None;
    }
    let window = &input.bytes[..input.bytes.len().min(MAX_TEXT_SCAN_BYTES)];
    match std::str::from_utf8(window) {
        Ok(text) => Some(text),
        Err(err) => std::str::from_utf8(&window[..err.valid_up_to()]).ok(),
    }
}

fn currency_code(raw: &str) -> String {
    match raw {
        "$" => "USD".to_string(),
        "€" => "EUR".to_string(),
        "£" => "GBP".to_string(),
        other => other.to_ascii_uppercase(),
    }
}

/// Display name when present, else the organisation label of a non-personal domain.
pub fn vendor_name_for(sender_address: &str, sender_name: Option<&str>) -> Option<String> {
    if let Some(name) = sender_name.map(str::trim).filter(|name| !name.is_empty()) {
        return Some(name.trim_matches('"').to_string());
    }

    let address = super::sender::normalize_address(sender_address);
    let domain = address.rsplit_once('@').map(|(_, domain)| domain)?;
    if PERSONAL_MAIL_DOMAINS.contains(&domain) {
        return None;
    }

    let labels: Vec<&str> = domain.split('.').collect();
    let label = match labels.as_slice() {
        [.., org, second, tld] if tld.len() == 2 && SECOND_LEVEL_LABELS.contains(second) => *org,
        [.., org, _] => *org,
        _ => return None,
    };
    let words: Vec<String> = label
        .split(['-', '_'])
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect();
    (!words.is_empty()).then(|| words.join(" "))
}
