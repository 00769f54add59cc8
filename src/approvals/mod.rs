//! Approval gate for operator-facing decisions.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub mod gate;

pub use gate::{
    bulk_approvable, decide, escalate_overdue, initial_status, should_auto_approve, Decision,
    DecisionError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskAssessment {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskAssessment {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl FromStr for RiskAssessment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(format!("unknown risk assessment `{other}`")),
        }
    }
}

impl fmt::Display for RiskAssessment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Escalated,
    Approved,
    Rejected,
    AutoApproved,
}

impl ApprovalStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Escalated => "escalated",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::AutoApproved => "auto_approved",
        }
    }

    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected | Self::AutoApproved)
    }
}

impl FromStr for ApprovalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "escalated" => Ok(Self::Escalated),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "auto_approved" => Ok(Self::AutoApproved),
            other => Err(format!("unknown approval status `{other}`")),
        }
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
