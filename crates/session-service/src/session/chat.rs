//! Bounded chat history.
//!
//! Appends go to the back; once the history holds more than `max_length`
//! entries the oldest are evicted from the front. A `max_length` of zero
//! disables the bound.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use thiserror::Error;

/// Maximum chat content length, in characters.
pub const MAX_CHAT_CONTENT_CHARS: usize = 1000;

/// Default window returned by [`ChatHistory::recent`] callers.
pub const DEFAULT_RECENT_CHATS_LIMIT: usize = 50;

/// One chat message as stored and as sent on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatEntry {
    #[serde(rename = "clientId")]
    pub sender_id: String,
    #[serde(rename = "displayName")]
    pub sender_display_name: String,
    #[serde(default)]
    pub chat_id: String,
    /// Unix seconds.
    #[serde(default)]
    pub timestamp: i64,
    pub chat_content: String,
}

/// Reasons a chat entry is rejected before it reaches the history.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChatValidationError {
    #[error("chat content is empty")]
    EmptyContent,

    #[error("chat content is {0} characters, limit is {MAX_CHAT_CONTENT_CHARS}")]
    ContentTooLong(usize),

    #[error("sender id is empty")]
    MissingSenderId,

    #[error("sender display name is empty")]
    MissingDisplayName,
}

impl ChatEntry {
    /// Check sender fields and content length.
    pub fn validate(&self) -> Result<(), ChatValidationError> {
        if self.sender_id.is_empty() {
            return Err(ChatValidationError::MissingSenderId);
        }
        if self.sender_display_name.is_empty() {
            return Err(ChatValidationError::MissingDisplayName);
        }
        let chars = self.chat_content.chars().count();
        if chars == 0 {
            return Err(ChatValidationError::EmptyContent);
        }
        if chars > MAX_CHAT_CONTENT_CHARS {
            return Err(ChatValidationError::ContentTooLong(chars));
        }
        Ok(())
    }
}

/// Bounded, ordered log of chat entries (oldest first).
#[derive(Debug, Default)]
pub struct ChatHistory {
    entries: VecDeque<ChatEntry>,
    max_length: usize,
}

impl ChatHistory {
    /// Create an empty history holding at most `max_length` entries (0 = unbounded).
    #[must_use]
    pub fn new(max_length: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            max_length,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn max_length(&self) -> usize {
        self.max_length
    }

    /// Append an entry, evicting from the front while over the bound.
    ///
    /// Returns the number of evicted entries.
    pub fn append(&mut self, entry: ChatEntry) -> usize {
        self.entries.push_back(entry);
        let mut evicted = 0;
        if self.max_length > 0 {
            while self.entries.len() > self.max_length {
                self.entries.pop_front();
                evicted += 1;
            }
        }
        evicted
    }

    /// Remove the first entry with `chat_id`. No-op if absent.
    pub fn delete_by_id(&mut self, chat_id: &str) -> Option<ChatEntry> {
        let position = self.entries.iter().position(|e| e.chat_id == chat_id)?;
        self.entries.remove(position)
    }

    /// Up to the last `limit` entries, oldest of the window first.
    #[must_use]
    pub fn recent(&self, limit: usize) -> Vec<ChatEntry> {
        let skip = self.entries.len().saturating_sub(limit);
        self.entries.iter().skip(skip).cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChatEntry> {
        self.entries.iter()
    }
}
