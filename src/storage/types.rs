//! Storage record types for SQLite persistence.

use serde::Serialize;

/// Lifecycle of a journaled submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubmissionStatus {
    /// Accepted by the node, outcome not yet known
    Pending,
    /// Committed successfully
    Success,
    /// Rejected or failed on ledger
    Failed,
    /// Polling gave up before a terminal status
    Timeout,
    /// Reported successful after the fixed delay, never confirmed
    Assumed,
}

impl SubmissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStatus::Pending => "PENDING",
            SubmissionStatus::Success => "SUCCESS",
            SubmissionStatus::Failed => "FAILED",
            SubmissionStatus::Timeout => "TIMEOUT",
            SubmissionStatus::Assumed => "ASSUMED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(SubmissionStatus::Pending),
            "SUCCESS" => Some(SubmissionStatus::Success),
            "FAILED" => Some(SubmissionStatus::Failed),
            "TIMEOUT" => Some(SubmissionStatus::Timeout),
            "ASSUMED" => Some(SubmissionStatus::Assumed),
            _ => None,
        }
    }

    /// Whether the ledger outcome is still unknown
    pub fn is_unsettled(&self) -> bool {
        matches!(
            self,
            SubmissionStatus::Pending | SubmissionStatus::Timeout | SubmissionStatus::Assumed
        )
    }
}

impl std::fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record of one transaction sent to the ledger
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmissionRecord {
    pub timestamp_secs: i64,
    /// Initiating address
    pub address: String,
    /// Flow name: "checkin", "purchase_full", "purchase_discount"
    pub flow: String,
    /// Step within the flow: "mint", "approve", "payment", ...
    pub step: String,
    pub tx_hash: Option<String>,
    pub status: SubmissionStatus,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_names_and_settlement() {
        for status in [
            SubmissionStatus::Pending,
            SubmissionStatus::Success,
            SubmissionStatus::Failed,
            SubmissionStatus::Timeout,
            SubmissionStatus::Assumed,
        ] {
            assert_eq!(SubmissionStatus::parse(status.as_str()), Some(status));
        }
        assert!(SubmissionStatus::Assumed.is_unsettled());
        assert!(!SubmissionStatus::Failed.is_unsettled());
        assert_eq!(SubmissionStatus::parse("bogus"), None);
    }
}
