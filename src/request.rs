//! Outbound message requests as they appear in the queue file and on the intake API.

use crate::error::{RelayError, Result};
use serde::{Deserialize, Serialize};

/// Receiver values meaning "every member of the group"
pub const BROADCAST_TOKENS: [&str; 2] = ["所有人", "all"];

/// Annotation prepended to broadcast messages
pub const BROADCAST_MENTION: &str = "@所有人";

/// Whether a receiver name is the broadcast token
pub fn is_broadcast_token(name: &str) -> bool {
    BROADCAST_TOKENS.contains(&name)
}

/// One outbound message with its selectors.
///
/// Serialized with the queue-file field names (`receiver_name`, `group_name`);
/// the plural spellings are accepted on input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRequest {
    /// Contacts, or members within `group_names` when groups are set
    #[serde(default, rename = "receiver_name", alias = "receiver_names")]
    pub receiver_names: Vec<String>,

    /// Text, or an http(s) URL pointing at an attachment
    pub message: String,

    /// Chatrooms to deliver into
    #[serde(default, rename = "group_name", alias = "group_names")]
    pub group_names: Vec<String>,
}

impl MessageRequest {
    pub fn new(
        receiver_names: Vec<String>,
        message: impl Into<String>,
        group_names: Vec<String>,
    ) -> Self {
        Self {
            receiver_names,
            message: message.into(),
            group_names,
        }
    }

    /// Direct message to contacts
    pub fn direct<S: Into<String>>(
        receivers: impl IntoIterator<Item = S>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(
            receivers.into_iter().map(Into::into).collect(),
            message,
            Vec::new(),
        )
    }

    /// Message to whole groups, no mentions
    pub fn to_groups<S: Into<String>>(
        groups: impl IntoIterator<Item = S>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(
            Vec::new(),
            message,
            groups.into_iter().map(Into::into).collect(),
        )
    }

    /// Check the selector invariants shared by every delivery path
    pub fn validate(&self) -> Result<()> {
        if self.message.trim().is_empty() {
            return Err(RelayError::invalid("message is empty"));
        }
        if self.receiver_names.is_empty() && self.group_names.is_empty() {
            return Err(RelayError::invalid(
                "receiver list and group list are both empty",
            ));
        }
        Ok(())
    }

    pub fn has_broadcast(&self) -> bool {
        self.receiver_names.iter().any(|n| is_broadcast_token(n))
    }
}
