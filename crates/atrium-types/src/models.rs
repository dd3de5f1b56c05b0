use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Message bodies longer than this are truncated on send.
pub const MAX_MESSAGE_BODY_CHARS: usize = 4000;

/// Maximum number of attachments carried by a single message.
pub const MAX_ATTACHMENTS: usize = 1;

/// Notifications expire this many days after creation, read or not.
pub const NOTIFICATION_RETENTION_DAYS: i64 = 6;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind}: {value:?}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReactionType {
    Like,
    Love,
    Laugh,
    Wow,
    Sad,
    Angry,
    /// Free-form reaction; the glyph travels in the reaction's `emoji` field.
    Emoji,
}

impl ReactionType {
    pub const ALL: [ReactionType; 7] = [
        Self::Like,
        Self::Love,
        Self::Laugh,
        Self::Wow,
        Self::Sad,
        Self::Angry,
        Self::Emoji,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Like => "like",
            Self::Love => "love",
            Self::Laugh => "laugh",
            Self::Wow => "wow",
            Self::Sad => "sad",
            Self::Angry => "angry",
            Self::Emoji => "emoji",
        }
    }
}

impl FromStr for ReactionType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownVariant {
                kind: "reaction type",
                value: s.to_string(),
            })
    }
}

impl fmt::Display for ReactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationType {
    Follow,
    Like,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Follow => "follow",
            Self::Like => "like",
        }
    }
}

impl FromStr for NotificationType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "follow" => Ok(Self::Follow),
            "like" => Ok(Self::Like),
            other => Err(UnknownVariant {
                kind: "notification type",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// File metadata attached to a message. The upload itself is handled
/// elsewhere; only the resulting location is stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub url: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub mime: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
}
