//! Collection membership entities.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::keys::{CacheKey, EntityKind, Subresource};

/// Membership state of one member within a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MembershipStatus {
    Active,
    Pending,
    Removed,
}

impl MembershipStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Pending => "pending",
            Self::Removed => "removed",
        }
    }
}

impl FromStr for MembershipStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "pending" => Ok(Self::Pending),
            "removed" => Ok(Self::Removed),
            other => Err(format!("unknown membership status '{other}'")),
        }
    }
}

/// The families of named collections kept as cached hashes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectionKind {
    /// Active members of a channel.
    ChannelMembers,
    /// Active members of a topic (a sub-group of a channel).
    TopicMembers,
    /// Pending join requests for an event.
    EventRequests,
}

impl CollectionKind {
    /// The status a member must have to belong to the collection.
    pub fn tracked_status(&self) -> MembershipStatus {
        match self {
            Self::ChannelMembers | Self::TopicMembers => MembershipStatus::Active,
            Self::EventRequests => MembershipStatus::Pending,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ChannelMembers => "channel_members",
            Self::TopicMembers => "topic_members",
            Self::EventRequests => "event_requests",
        }
    }
}

/// Identifies one named collection, e.g. "members of channel 7".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CollectionId {
    pub kind: CollectionKind,
    pub owner_id: i64,
}

impl CollectionId {
    pub fn channel_members(channel_id: i64) -> Self {
        Self {
            kind: CollectionKind::ChannelMembers,
            owner_id: channel_id,
        }
    }

    pub fn topic_members(topic_id: i64) -> Self {
        Self {
            kind: CollectionKind::TopicMembers,
            owner_id: topic_id,
        }
    }

    pub fn event_requests(event_id: i64) -> Self {
        Self {
            kind: CollectionKind::EventRequests,
            owner_id: event_id,
        }
    }

    /// The single hash key holding this collection.
    pub fn cache_key(&self) -> CacheKey {
        match self.kind {
            CollectionKind::ChannelMembers => {
                CacheKey::new(EntityKind::Channel, self.owner_id).with(Subresource::Members)
            }
            CollectionKind::TopicMembers => {
                CacheKey::new(EntityKind::Topic, self.owner_id).with(Subresource::Members)
            }
            CollectionKind::EventRequests => {
                CacheKey::new(EntityKind::Event, self.owner_id).with(Subresource::Requests)
            }
        }
    }

    pub fn tracked_status(&self) -> MembershipStatus {
        self.kind.tracked_status()
    }
}

impl fmt::Display for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.cache_key())
    }
}

/// A member of a collection as cached in the collection hash.
///
/// Stored under field `member_id` of the collection's hash key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberRecord {
    pub member_id: i64,
    pub status: MembershipStatus,
    pub role: String,
    pub joined_at: DateTime<Utc>,
}

impl MemberRecord {
    pub fn new(
        member_id: i64,
        status: MembershipStatus,
        role: impl Into<String>,
        joined_at: DateTime<Utc>,
    ) -> Self {
        Self {
            member_id,
            status,
            role: role.into(),
            joined_at,
        }
    }

    pub fn field(&self) -> String {
        self.member_id.to_string()
    }
}
