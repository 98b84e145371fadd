//! Conversation addressing.
//!
//! A two-party conversation has no stored entity of its own. It is addressed
//! everywhere (storage queries, participant index, fan-out groups) by the key
//! derived here, so every caller must go through [`ChatId::resolve`] or
//! [`Participants::chat_id`].

use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Joins the two sorted participant ids.
pub const SEPARATOR: char = '_';

/// Canonical, order-independent conversation key (`"alice_bob"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(String);

impl ChatId {
    /// Derive the key for the conversation between `a` and `b`.
    pub fn resolve(a: &str, b: &str) -> Result<Self, AppError> {
        Participants::new(a, b).map(|p| p.chat_id())
    }

    /// Canonicalize a key received from a client (mark-read, joinChat).
    ///
    /// Participant ids never contain [`SEPARATOR`], so a key splits back into
    /// exactly two ids and is re-resolved: `"u2_u1"` addresses `"u1_u2"`.
    pub fn from_raw(raw: &str) -> Result<Self, AppError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(AppError::BadRequest("chatId is required".into()));
        }
        match raw.split(SEPARATOR).collect::<Vec<_>>().as_slice() {
            [a, b] if !a.trim().is_empty() && !b.trim().is_empty() => Self::resolve(a, b),
            _ => Err(AppError::BadRequest(format!(
                "chatId '{raw}' must be two participant ids joined by '{SEPARATOR}'"
            ))),
        }
    }

    /// Rebuild a key read back from storage.
    pub(crate) fn from_stored(raw: String) -> Self {
        Self(raw)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The two participants of a conversation, stored in sorted order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participants {
    low: String,
    high: String,
}

impl Participants {
    pub fn new(a: &str, b: &str) -> Result<Self, AppError> {
        let a = validate_participant(a)?;
        let b = validate_participant(b)?;
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        Ok(Self {
            low: low.to_string(),
            high: high.to_string(),
        })
    }

    pub fn chat_id(&self) -> ChatId {
        ChatId(format!("{}{}{}", self.low, SEPARATOR, self.high))
    }

    /// Both participant ids, lexicographically ordered.
    pub fn ids(&self) -> [&str; 2] {
        [&self.low, &self.high]
    }
}

fn validate_participant(id: &str) -> Result<&str, AppError> {
    let id = id.trim();
    if id.is_empty() {
        return Err(AppError::BadRequest(
            "participant identifiers must not be empty".into(),
        ));
    }
    // "a_b"+"c" and "a"+"b_c" would otherwise share the key "a_b_c"
    if id.contains(SEPARATOR) {
        return Err(AppError::BadRequest(format!(
            "participant identifier '{id}' must not contain '{SEPARATOR}'"
        )));
    }
    Ok(id)
}
