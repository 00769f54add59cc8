//! Email attachment auto-filing: sender screening, document classification, rule routing and
//! the per-attachment filing state machine.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub mod documents;
pub mod mailbox;
pub mod orchestrator;
pub mod rules;
pub mod sender;

pub use documents::{DocumentClassifier, DocumentFacts, KeywordClassifier};
pub use mailbox::{MailMessage, MailProvider, MessageAttachment};
pub use orchestrator::{BatchReport, EmailFilingReport, FilingError};
pub use rules::{FilingCandidate, RuleMatch};
pub use sender::{SenderClassification, SenderRuleSet};

/// Lifecycle of a single attachment filing record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilingStatus {
    Pending,
    Processing,
    Filed,
    Failed,
    Skipped,
}

impl FilingStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Filed => "filed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Filed | Self::Failed | Self::Skipped)
    }

    /// Allowed edges: `pending -> processing -> {filed, failed, skipped}`.
    pub const fn can_transition_to(&self, next: FilingStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing)
                | (Self::Processing, Self::Filed)
                | (Self::Processing, Self::Failed)
                | (Self::Processing, Self::Skipped)
        )
    }
}

impl FromStr for FilingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "filed" => Ok(Self::Filed),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            other => Err(format!("unknown filing status `{other}`")),
        }
    }
}

impl fmt::Display for FilingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationType {
    DataRoom,
    GoogleDrive,
    VendorFolder,
    Customs,
    Pending,
}

impl DestinationType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::DataRoom => "data_room",
            Self::GoogleDrive => "google_drive",
            Self::VendorFolder => "vendor_folder",
            Self::Customs => "customs",
            Self::Pending => "pending",
        }
    }
}

impl FromStr for DestinationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "data_room" => Ok(Self::DataRoom),
            "google_drive" => Ok(Self::GoogleDrive),
            "vendor_folder" => Ok(Self::VendorFolder),
            "customs" => Ok(Self::Customs),
            "pending" => Ok(Self::Pending),
            other => Err(format!("unknown destination type `{other}`")),
        }
    }
}

impl fmt::Display for DestinationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentCategory {
    Invoice,
    PurchaseOrder,
    Quote,
    Receipt,
    Contract,
    Customs,
    Statement,
    Other,
}

impl DocumentCategory {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Invoice => "invoice",
            Self::PurchaseOrder => "purchase_order",
            Self::Quote => "quote",
            Self::Receipt => "receipt",
            Self::Contract => "contract",
            Self::Customs => "customs",
            Self::Statement => "statement",
            Self::Other => "other",
        }
    }
}

impl FromStr for DocumentCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "invoice" => Ok(Self::Invoice),
            "purchase_order" => Ok(Self::PurchaseOrder),
            "quote" => Ok(Self::Quote),
            "receipt" => Ok(Self::Receipt),
            "contract" => Ok(Self::Contract),
            "customs" => Ok(Self::Customs),
            "statement" => Ok(Self::Statement),
            "other" => Ok(Self::Other),
            other => Err(format!("unknown document category `{other}`")),
        }
    }
}

impl fmt::Display for DocumentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Processing state of an ingested email as a whole.
pub const EMAIL_UNPROCESSED: &str = "unprocessed";
pub const EMAIL_PROCESSED: &str = "processed";
pub const EMAIL_FAILED: &str = "failed";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_have_no_outgoing_edges() {
        let all = [
            FilingStatus::Pending,
            FilingStatus::Processing,
            FilingStatus::Filed,
            FilingStatus::Failed,
            FilingStatus::Skipped,
        ];
        for from in all.iter().filter(|status| status.is_terminal()) {
            for to in all {
                assert!(!from.can_transition_to(to), "{from} -> {to} must be rejected");
            }
        }
    }

    #[test]
    fn pending_only_moves_to_processing() {
        assert!(FilingStatus::Pending.can_transition_to(FilingStatus::Processing));
        assert!(!FilingStatus::Pending.can_transition_to(FilingStatus::Filed));
        assert!(!FilingStatus::Processing.can_transition_to(FilingStatus::Pending));
    }

    #[test]
    fn parses_destination_types() {
        assert_eq!(
            "vendor_folder".parse::<DestinationType>(),
            Ok(DestinationType::VendorFolder)
        );
        assert!("drive".parse::<DestinationType>().is_err());
    }
}
