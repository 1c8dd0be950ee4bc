//! Typed cache key builder.
//!
//! Every key in the shared cache follows the hierarchical convention
//! `<entity>:<id>[:<subresource>]`. Building keys through [`CacheKey`] instead of
//! string concatenation keeps writers and readers agreeing on the exact shape.
//!
//! ```text
//! user:42
//! channel:7:members
//! poll:3:tally
//! topic:*          (pattern: every topic key)
//! ```

use std::fmt;
use std::str::FromStr;

/// Top-level entity families stored in the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    User,
    Channel,
    Topic,
    Event,
    Poll,
    Curation,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Channel => "channel",
            Self::Topic => "topic",
            Self::Event => "event",
            Self::Poll => "poll",
            Self::Curation => "curation",
        }
    }
}

impl FromStr for EntityKind {
    type Err = KeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "channel" => Ok(Self::Channel),
            "topic" => Ok(Self::Topic),
            "event" => Ok(Self::Event),
            "poll" => Ok(Self::Poll),
            "curation" => Ok(Self::Curation),
            other => Err(KeyParseError::UnknownKind(other.to_string())),
        }
    }
}

/// Optional trailing segment narrowing a key to one facet of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subresource {
    Members,
    Requests,
    Tally,
    Voters,
    Profile,
}

impl Subresource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Members => "members",
            Self::Requests => "requests",
            Self::Tally => "tally",
            Self::Voters => "voters",
            Self::Profile => "profile",
        }
    }
}

impl FromStr for Subresource {
    type Err = KeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "members" => Ok(Self::Members),
            "requests" => Ok(Self::Requests),
            "tally" => Ok(Self::Tally),
            "voters" => Ok(Self::Voters),
            "profile" => Ok(Self::Profile),
            other => Err(KeyParseError::UnknownSubresource(other.to_string())),
        }
    }
}

/// Errors produced when parsing a rendered key back into a [`CacheKey`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyParseError {
    #[error("unknown entity kind '{0}'")]
    UnknownKind(String),
    #[error("unknown subresource '{0}'")]
    UnknownSubresource(String),
    #[error("invalid entity id '{0}'")]
    InvalidId(String),
    #[error("malformed key '{0}'")]
    Malformed(String),
}

/// A fully-qualified cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub kind: EntityKind,
    pub id: i64,
    pub sub: Option<Subresource>,
}

impl CacheKey {
    pub fn new(kind: EntityKind, id: i64) -> Self {
        Self {
            kind,
            id,
            sub: None,
        }
    }

    /// Narrows the key to a subresource of the same entity.
    pub fn with(mut self, sub: Subresource) -> Self {
        self.sub = Some(sub);
        self
    }

    pub fn user(id: i64) -> Self {
        Self::new(EntityKind::User, id)
    }

    pub fn poll_tally(poll_id: i64) -> Self {
        Self::new(EntityKind::Poll, poll_id).with(Subresource::Tally)
    }

    pub fn poll_voters(poll_id: i64) -> Self {
        Self::new(EntityKind::Poll, poll_id).with(Subresource::Voters)
    }

    /// Pattern matching every subresource key under this entity. The bare
    /// entity key itself is not covered.
    pub fn entity_pattern(&self) -> KeyPattern {
        KeyPattern(format!("{}:{}:", self.kind.as_str(), self.id))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.sub {
            Some(sub) => write!(f, "{}:{}:{}", self.kind.as_str(), self.id, sub.as_str()),
            None => write!(f, "{}:{}", self.kind.as_str(), self.id),
        }
    }
}

impl FromStr for CacheKey {
    type Err = KeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(':');
        let (Some(kind), Some(id)) = (parts.next(), parts.next()) else {
            return Err(KeyParseError::Malformed(s.to_string()));
        };
        let sub = parts.next().map(str::parse).transpose()?;
        if parts.next().is_some() {
            return Err(KeyParseError::Malformed(s.to_string()));
        }

        Ok(Self {
            kind: kind.parse()?,
            id: id
                .parse()
                .map_err(|_| KeyParseError::InvalidId(id.to_string()))?,
            sub,
        })
    }
}

/// A key prefix rendered with a trailing `*`, meaning "every key under this prefix".
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyPattern(String);

impl KeyPattern {
    /// Every key of one entity family, e.g. `topic:*`.
    pub fn kind(kind: EntityKind) -> Self {
        Self(format!("{}:", kind.as_str()))
    }

    /// An arbitrary literal prefix. The prefix must be non-empty.
    pub fn prefix(prefix: impl Into<String>) -> Option<Self> {
        let prefix = prefix.into();
        (!prefix.is_empty()).then_some(Self(prefix))
    }

    /// The literal prefix without the trailing wildcard.
    pub fn as_prefix(&self) -> &str {
        &self.0
    }

    pub fn matches(&self, key: &str) -> bool {
        key.starts_with(&self.0)
    }
}

impl fmt::Display for KeyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}*", self.0)
    }
}
