//! Delivery backends for the two chat-client integrations.
//!
//! Each backend talks to a local bridge process that fronts a chat client
//! library. The router only sees the [`DeliveryBackend`] capability:
//!
//! ```text
//!                 ┌──────────────────────┐
//!   MessageRouter │ dyn DeliveryBackend  │
//!   ─────────────►│  ├─ WxBackend  (A)   │──► wx bridge      (abort on first miss)
//!                 │  └─ NtchatBackend(B) │──► ntchat bridge  (skip misses, warn)
//!                 └──────────────────────┘
//! ```

pub mod bridge;
pub mod ntchat;
pub mod wx;

use crate::config::{ChannelType, RelayConfig};
use crate::error::Result;
use crate::media::MediaKind;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

pub use ntchat::NtchatBackend;
pub use wx::WxBackend;

/// A contact, group or group member resolved by name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    /// Backend-specific opaque id (UserName / wxid)
    pub id: String,
    /// Display name used for @-annotations
    pub name: String,
}

impl Identity {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// What to do when a group or recipient name does not resolve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Fail the whole request on the first miss
    Abort,
    /// Log a warning and deliver to whatever did resolve
    SkipAndWarn,
}

/// Capability surface the router delivers through
#[async_trait::async_trait]
pub trait DeliveryBackend: Send + Sync {
    /// Backend name ("wx", "ntchat")
    fn name(&self) -> &str;

    /// Partial-failure policy applied by the router
    fn failure_policy(&self) -> FailurePolicy;

    /// Whether one `send_mentions` call can notify several members at once.
    /// When false the router sends once per resolved member.
    fn batches_mentions(&self) -> bool;

    /// Look up a contact by alias, then display name
    async fn find_contact(&self, name: &str) -> Result<Option<Identity>>;

    /// Look up a group by name
    async fn find_group(&self, name: &str) -> Result<Option<Identity>>;

    /// Look up a member of `group`, falling back to a contact-wide search
    async fn find_group_member(&self, group: &Identity, name: &str) -> Result<Option<Identity>>;

    /// Send plain text to a contact or group
    async fn send_text(&self, target: &Identity, text: &str) -> Result<()>;

    /// Send text that already carries the @-everyone annotation
    async fn send_broadcast_annotated(&self, group: &Identity, text: &str) -> Result<()>;

    /// Send text to a group, mentioning the given members
    async fn send_mentions(&self, group: &Identity, members: &[Identity], text: &str)
        -> Result<()>;

    /// Send a local file as an image, video or file attachment
    async fn send_media(&self, target: &Identity, path: &Path, kind: MediaKind) -> Result<()>;
}

/// Build the backend selected by `channel_type`
pub fn build_backend(config: &RelayConfig) -> Result<Arc<dyn DeliveryBackend>> {
    let bridge = config.bridge()?;
    let backend: Arc<dyn DeliveryBackend> = match config.channel()? {
        ChannelType::Wx => Arc::new(WxBackend::new(bridge)?),
        ChannelType::Ntchat => Arc::new(NtchatBackend::new(bridge)?),
    };
    tracing::info!(
        backend = backend.name(),
        policy = ?backend.failure_policy(),
        "delivery backend ready"
    );
    Ok(backend)
}

/// Prefix `text` with one `@name` per member
pub fn mention_text(members: &[Identity], text: &str) -> String {
    let mut out = members
        .iter()
        .map(|m| format!("@{}", m.name))
        .collect::<Vec<_>>()
        .join(" ");
    if !text.is_empty() {
        out.push(' ');
        out.push_str(text);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RelayError;

    #[test]
    fn test_mention_text() {
        let members = vec![Identity::new("u1", "Alice"), Identity::new("u2", "Bob")];
        assert_eq!(mention_text(&members, "hi"), "@Alice @Bob hi");
        assert_eq!(mention_text(&members, ""), "@Alice @Bob");
    }

    #[test]
    fn test_build_backend_by_channel_type() {
        let mut config = RelayConfig::default();
        assert_eq!(build_backend(&config).unwrap().name(), "wx");

        config.channel_type = "ntchat".to_string();
        let backend = build_backend(&config).unwrap();
        assert_eq!(backend.name(), "ntchat");
        assert_eq!(backend.failure_policy(), FailurePolicy::SkipAndWarn);

        config.channel_type = "itchat".to_string();
        assert!(matches!(
            build_backend(&config),
            Err(RelayError::Configuration(_))
        ));
    }

    #[test]
    fn test_policy_override() {
        let mut config = RelayConfig::default();
        config.wx.failure_policy = Some(FailurePolicy::SkipAndWarn);
        let backend = build_backend(&config).unwrap();
        assert_eq!(backend.failure_policy(), FailurePolicy::SkipAndWarn);
    }
}
