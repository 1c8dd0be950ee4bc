//! Poll entity and its derived tally summary.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Poll lifecycle. `Open -> Closed` is the only transition; `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PollStatus {
    Open,
    Closed,
}

impl PollStatus {
    pub fn accepts_votes(&self) -> bool {
        matches!(self, Self::Open)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }
}

impl FromStr for PollStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(Self::Open),
            "closed" => Ok(Self::Closed),
            other => Err(format!("unknown poll status '{other}'")),
        }
    }
}

/// A poll with a fixed set of options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Poll {
    pub id: i64,
    pub question: String,
    pub options: Vec<String>,
    pub status: PollStatus,
    pub created_at: DateTime<Utc>,
}

impl Poll {
    pub fn new(
        id: i64,
        question: impl Into<String>,
        options: Vec<String>,
        status: PollStatus,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            question: question.into(),
            options,
            status,
            created_at,
        }
    }

    pub fn has_option(&self, choice: &str) -> bool {
        self.options.iter().any(|o| o == choice)
    }
}

/// Vote counts per choice for one poll.
///
/// Choices with no votes are absent rather than zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteSummary {
    pub poll_id: i64,
    pub counts: BTreeMap<String, i64>,
}

impl VoteSummary {
    pub fn new(poll_id: i64, counts: BTreeMap<String, i64>) -> Self {
        Self { poll_id, counts }
    }

    pub fn empty(poll_id: i64) -> Self {
        Self {
            poll_id,
            counts: BTreeMap::new(),
        }
    }

    pub fn total(&self) -> i64 {
        self.counts.values().sum()
    }

    pub fn count(&self, choice: &str) -> i64 {
        self.counts.get(choice).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        assert!(PollStatus::Open.accepts_votes());
        assert!(!PollStatus::Closed.accepts_votes());
        assert_eq!("closed".parse::<PollStatus>(), Ok(PollStatus::Closed));
        assert!("archived".parse::<PollStatus>().is_err());
    }

    #[test]
    fn test_summary_totals() {
        let summary = VoteSummary::new(
            7,
            BTreeMap::from([("yes".to_string(), 3), ("no".to_string(), 1)]),
        );
        assert_eq!(summary.total(), 4);
        assert_eq!(summary.count("yes"), 3);
        assert_eq!(summary.count("maybe"), 0);
    }
}
