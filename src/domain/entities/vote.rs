//! Vote rows and voter identity.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use chrono::{DateTime, Utc};

/// Who cast a vote: an authenticated user, or the client's network address
/// when the voter is anonymous.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VoterKey {
    User(i64),
    Address(IpAddr),
}

impl fmt::Display for VoterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(id) => write!(f, "user:{id}"),
            Self::Address(ip) => write!(f, "ip:{ip}"),
        }
    }
}

impl FromStr for VoterKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(id) = s.strip_prefix("user:") {
            return id
                .parse()
                .map(Self::User)
                .map_err(|_| format!("invalid user id in voter key '{s}'"));
        }
        if let Some(ip) = s.strip_prefix("ip:") {
            return ip
                .parse()
                .map(Self::Address)
                .map_err(|_| format!("invalid address in voter key '{s}'"));
        }
        Err(format!("unrecognized voter key '{s}'"))
    }
}

/// A vote persisted in the authoritative store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vote {
    pub id: i64,
    pub poll_id: i64,
    pub voter: VoterKey,
    pub choice: String,
    pub created_at: DateTime<Utc>,
}

/// Input data for persisting a vote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewVote {
    pub poll_id: i64,
    pub voter: VoterKey,
    pub choice: String,
}

/// One aggregated row of `(poll, choice) -> count`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChoiceCount {
    pub poll_id: i64,
    pub choice: String,
    pub count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_voter_key_round_trip() {
        let user = VoterKey::User(42);
        assert_eq!(user.to_string(), "user:42");
        assert_eq!("user:42".parse::<VoterKey>(), Ok(user));

        let addr: VoterKey = "ip:10.0.0.1".parse().unwrap();
        assert_eq!(addr, VoterKey::Address("10.0.0.1".parse().unwrap()));
        assert_eq!(addr.to_string(), "ip:10.0.0.1");

        let v6: VoterKey = "ip:::1".parse().unwrap();
        assert_eq!(v6.to_string(), "ip:::1");
    }

    #[test]
    fn test_voter_key_rejects_garbage() {
        assert!("user:abc".parse::<VoterKey>().is_err());
        assert!("ip:not-an-ip".parse::<VoterKey>().is_err());
        assert!("42".parse::<VoterKey>().is_err());
    }
}
