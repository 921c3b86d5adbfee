//! Error taxonomy for message relaying.

/// Errors surfaced while validating, resolving or delivering a message.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Malformed request or contradictory selector combination
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A receiver name did not resolve to a contact or group member
    #[error("recipient not found: {name}{}", group_suffix(.group))]
    RecipientNotFound { name: String, group: Option<String> },

    /// A group name did not resolve to a chatroom
    #[error("group not found: {0}")]
    GroupNotFound(String),

    /// Attachment fetch failed
    #[error("failed to download {url}: {reason}")]
    DownloadFailed { url: String, reason: String },

    /// The backend rejected or failed a send
    #[error("transmission failed: {0}")]
    TransmissionFailed(String),

    /// Unrecognized backend selection or otherwise unusable settings
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl RelayError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    pub fn recipient(name: impl Into<String>, group: Option<&str>) -> Self {
        Self::RecipientNotFound {
            name: name.into(),
            group: group.map(str::to_string),
        }
    }

    /// Whether the error was caused by the caller rather than the backend.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidRequest(_) | Self::RecipientNotFound { .. } | Self::GroupNotFound(_)
        )
    }
}

fn group_suffix(group: &Option<String>) -> String {
    group
        .as_deref()
        .map(|g| format!(" (group {g})"))
        .unwrap_or_default()
}

pub type Result<T> = std::result::Result<T, RelayError>;
