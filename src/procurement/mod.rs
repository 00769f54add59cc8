//! Vendor RFQ workflow: quote ranking, awarding and vendor notifications.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub mod award;
pub mod notify;
pub mod ranking;

pub use award::{award_quote, rerank_rfq, AwardError, AwardOutcome};
pub use notify::{ChatWebhookNotifier, LogNotifier, Notifier, VendorNotice};
pub use ranking::{rank_quotes, QuoteRanking, RankInput};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteStatus {
    Pending,
    Received,
    Accepted,
    Rejected,
}

impl QuoteStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Received => "received",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
        }
    }
}

impl FromStr for QuoteStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "received" => Ok(Self::Received),
            "accepted" => Ok(Self::Accepted),
            "rejected" => Ok(Self::Rejected),
            other => Err(format!("unknown quote status `{other}`")),
        }
    }
}

impl fmt::Display for QuoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RfqStatus {
    Open,
    Awarded,
    Cancelled,
}

impl RfqStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Awarded => "awarded",
            Self::Cancelled => "cancelled",
        }
    }
}

impl FromStr for RfqStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(Self::Open),
            "awarded" => Ok(Self::Awarded),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown rfq status `{other}`")),
        }
    }
}

impl fmt::Display for RfqStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
