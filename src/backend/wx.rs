//! Variant A: web-protocol chat client bridge.
//!
//! Contact and chatroom lists are fetched fresh on every lookup. Records use
//! the client's PascalCase field names.

use super::bridge::BridgeClient;
use super::{mention_text, DeliveryBackend, FailurePolicy, Identity};
use crate::config::BridgeConfig;
use crate::error::Result;
use crate::media::MediaKind;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Filler some clients insert into nicknames with rare glyphs
const NAME_FILLER: &str = "\x7f\x7f";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WxFriend {
    user_name: String,
    #[serde(default)]
    nick_name: String,
    #[serde(default)]
    remark_name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WxChatroom {
    user_name: String,
    #[serde(default)]
    nick_name: String,
    #[serde(default)]
    member_list: Vec<WxMember>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WxMember {
    user_name: String,
    #[serde(default)]
    nick_name: String,
    #[serde(default)]
    display_name: String,
}

#[derive(Debug, Serialize)]
struct SendText<'a> {
    to_user_name: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct SendFile<'a> {
    to_user_name: &'a str,
    path: &'a str,
}

/// Web-protocol client backend
pub struct WxBackend {
    client: BridgeClient,
    policy: FailurePolicy,
}

impl WxBackend {
    pub fn new(config: &BridgeConfig) -> Result<Self> {
        Ok(Self {
            client: BridgeClient::new(config)?,
            policy: config.failure_policy.unwrap_or(FailurePolicy::Abort),
        })
    }

    async fn friends(&self) -> Result<Vec<WxFriend>> {
        self.client.get("friends").await
    }

    async fn chatrooms(&self) -> Result<Vec<WxChatroom>> {
        self.client.get("chatrooms").await
    }
}

fn clean_name(name: &str) -> String {
    name.replace(NAME_FILLER, "")
}

#[async_trait::async_trait]
impl DeliveryBackend for WxBackend {
    fn name(&self) -> &str {
        "wx"
    }

    fn failure_policy(&self) -> FailurePolicy {
        self.policy
    }

    fn batches_mentions(&self) -> bool {
        false
    }

    async fn find_contact(&self, name: &str) -> Result<Option<Identity>> {
        let friends = self.friends().await?;
        let found = friends
            .iter()
            .find(|f| f.remark_name == name)
            .or_else(|| friends.iter().find(|f| f.nick_name == name));
        Ok(found.map(|f| Identity::new(&f.user_name, &f.nick_name)))
    }

    async fn find_group(&self, name: &str) -> Result<Option<Identity>> {
        let rooms = self.chatrooms().await?;
        Ok(rooms
            .into_iter()
            .find(|r| r.nick_name == name)
            .map(|r| Identity::new(r.user_name, r.nick_name)))
    }

    async fn find_group_member(&self, group: &Identity, name: &str) -> Result<Option<Identity>> {
        let rooms = self.chatrooms().await?;
        let member = rooms
            .iter()
            .find(|r| r.user_name == group.id)
            .and_then(|room| {
                room.member_list.iter().find(|m| {
                    clean_name(&m.nick_name) == name || clean_name(&m.display_name) == name
                })
            });

        if let Some(m) = member {
            return Ok(Some(Identity::new(&m.user_name, clean_name(&m.nick_name))));
        }

        tracing::debug!(group = %group.name, name = %name, "not a member, searching contacts");
        self.find_contact(name).await
    }

    async fn send_text(&self, target: &Identity, text: &str) -> Result<()> {
        self.client
            .post(
                "send/text",
                &SendText {
                    to_user_name: &target.id,
                    content: text,
                },
            )
            .await
    }

    async fn send_broadcast_annotated(&self, group: &Identity, text: &str) -> Result<()> {
        // No native @-everyone; the annotation travels as plain text
        self.send_text(group, text).await
    }

    async fn send_mentions(
        &self,
        group: &Identity,
        members: &[Identity],
        text: &str,
    ) -> Result<()> {
        self.send_text(group, &mention_text(members, text)).await
    }

    async fn send_media(&self, target: &Identity, path: &Path, kind: MediaKind) -> Result<()> {
        let path = path.to_string_lossy();
        self.client
            .post(
                &format!("send/{}", kind.as_str()),
                &SendFile {
                    to_user_name: &target.id,
                    path: &path,
                },
            )
            .await
    }
}
