//! Variant B: PC-hook chat client bridge.
//!
//! Unresolved groups and members are skipped with a warning instead of
//! failing the request. Mentions use the client's room-at primitive so the
//! mentioned members are actually notified.

use super::bridge::BridgeClient;
use super::{mention_text, DeliveryBackend, FailurePolicy, Identity};
use crate::config::BridgeConfig;
use crate::error::Result;
use crate::media::MediaKind;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
struct NtContact {
    wxid: String,
    #[serde(default)]
    nickname: String,
    #[serde(default)]
    remark: String,
}

#[derive(Debug, Clone, Deserialize)]
struct NtRoom {
    wxid: String,
    #[serde(default)]
    nickname: String,
}

#[derive(Debug, Clone, Deserialize)]
struct NtRoomMembers {
    #[serde(default)]
    member_list: Vec<NtMember>,
}

#[derive(Debug, Clone, Deserialize)]
struct NtMember {
    wxid: String,
    #[serde(default)]
    nickname: String,
}

#[derive(Debug, Serialize)]
struct SendText<'a> {
    to_wxid: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct SendRoomAt<'a> {
    to_wxid: &'a str,
    content: &'a str,
    at_list: Vec<&'a str>,
}

#[derive(Debug, Serialize)]
struct SendFile<'a> {
    to_wxid: &'a str,
    file_path: &'a str,
}

/// PC-hook client backend
pub struct NtchatBackend {
    client: BridgeClient,
    policy: FailurePolicy,
}

impl NtchatBackend {
    pub fn new(config: &BridgeConfig) -> Result<Self> {
        Ok(Self {
            client: BridgeClient::new(config)?,
            policy: config.failure_policy.unwrap_or(FailurePolicy::SkipAndWarn),
        })
    }

    async fn room_members(&self, room_wxid: &str) -> Result<Vec<NtMember>> {
        let path = format!("rooms/{}/members", urlencoding::encode(room_wxid));
        let members: NtRoomMembers = self.client.get(&path).await?;
        Ok(members.member_list)
    }

    async fn send_room_at(&self, group: &Identity, content: &str, at: &[Identity]) -> Result<()> {
        self.client
            .post(
                "send/room_at",
                &SendRoomAt {
                    to_wxid: &group.id,
                    content,
                    at_list: at.iter().map(|m| m.id.as_str()).collect(),
                },
            )
            .await
    }
}

#[async_trait::async_trait]
impl DeliveryBackend for NtchatBackend {
    fn name(&self) -> &str {
        "ntchat"
    }

    fn failure_policy(&self) -> FailurePolicy {
        self.policy
    }

    fn batches_mentions(&self) -> bool {
        true
    }

    async fn find_contact(&self, name: &str) -> Result<Option<Identity>> {
        let contacts: Vec<NtContact> = self.client.get("contacts").await?;
        let found = contacts
            .iter()
            .find(|c| c.remark == name)
            .or_else(|| contacts.iter().find(|c| c.nickname == name));
        Ok(found.map(|c| Identity::new(&c.wxid, &c.nickname)))
    }

    async fn find_group(&self, name: &str) -> Result<Option<Identity>> {
        let rooms: Vec<NtRoom> = self.client.get("rooms").await?;
        Ok(rooms
            .into_iter()
            .find(|r| r.nickname == name)
            .map(|r| Identity::new(r.wxid, r.nickname)))
    }

    async fn find_group_member(&self, group: &Identity, name: &str) -> Result<Option<Identity>> {
        let members = self.room_members(&group.id).await?;
        if let Some(m) = members.into_iter().find(|m| m.nickname == name) {
            return Ok(Some(Identity::new(m.wxid, m.nickname)));
        }
        self.find_contact(name).await
    }

    async fn send_text(&self, target: &Identity, text: &str) -> Result<()> {
        self.client
            .post(
                "send/text",
                &SendText {
                    to_wxid: &target.id,
                    content: text,
                },
            )
            .await
    }

    async fn send_broadcast_annotated(&self, group: &Identity, text: &str) -> Result<()> {
        self.send_room_at(group, text, &[]).await
    }

    async fn send_mentions(
        &self,
        group: &Identity,
        members: &[Identity],
        text: &str,
    ) -> Result<()> {
        self.send_room_at(group, &mention_text(members, text), members)
            .await
    }

    async fn send_media(&self, target: &Identity, path: &Path, kind: MediaKind) -> Result<()> {
        let path = path.to_string_lossy();
        self.client
            .post(
                &format!("send/{}", kind.as_str()),
                &SendFile {
                    to_wxid: &target.id,
                    file_path: &path,
                },
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::FakeBridge;
    use serde_json::json;

    fn fake_bridge() -> FakeBridge {
        FakeBridge::new()
            .with_get(
                "/contacts",
                json!([
                    {"wxid": "wxid_a", "nickname": "Alice", "remark": ""},
                    {"wxid": "wxid_b", "nickname": "Bob", "remark": "bobby"}
                ]),
            )
            .with_get("/rooms", json!([{"wxid": "r1@chatroom", "nickname": "Team"}]))
            .with_get(
                "/rooms/r1%40chatroom/members",
                json!({"member_list": [{"wxid": "wxid_c", "nickname": "Carol"}]}),
            )
    }

    async fn backend(bridge: &FakeBridge) -> NtchatBackend {
        let url = bridge.serve().await;
        NtchatBackend::new(&BridgeConfig::with_base_url(url)).unwrap()
    }

    #[tokio::test]
    async fn test_lookups() {
        let bridge = fake_bridge();
        let nt = backend(&bridge).await;

        assert_eq!(nt.find_contact("bobby").await.unwrap().unwrap().id, "wxid_b");
        assert_eq!(nt.find_contact("Alice").await.unwrap().unwrap().id, "wxid_a");

        let team = nt.find_group("Team").await.unwrap().unwrap();
        assert_eq!(team.id, "r1@chatroom");
        assert!(nt.find_group("Nope").await.unwrap().is_none());

        let carol = nt.find_group_member(&team, "Carol").await.unwrap().unwrap();
        assert_eq!(carol.id, "wxid_c");
        let alice = nt.find_group_member(&team, "Alice").await.unwrap().unwrap();
        assert_eq!(alice.id, "wxid_a");
        assert!(nt.find_group_member(&team, "Zed").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_room_at_payloads() {
        let bridge = fake_bridge();
        let nt = backend(&bridge).await;
        let team = Identity::new("r1@chatroom", "Team");
        let carol = Identity::new("wxid_c", "Carol");

        nt.send_broadcast_annotated(&team, "@所有人 hi").await.unwrap();
        nt.send_mentions(&team, &[carol], "ping").await.unwrap();
        nt.send_media(&team, Path::new("/tmp/v.mp4"), MediaKind::Video)
            .await
            .unwrap();

        let posts = bridge.posts();
        assert_eq!(posts[0].0, "/send/room_at");
        assert_eq!(posts[0].1["content"], "@所有人 hi");
        assert_eq!(posts[0].1["at_list"], json!([]));
        assert_eq!(posts[1].1["content"], "@Carol ping");
        assert_eq!(posts[1].1["at_list"], json!(["wxid_c"]));
        assert_eq!(posts[2].0, "/send/video");
        assert_eq!(posts[2].1["file_path"], "/tmp/v.mp4");
        assert!(nt.batches_mentions());
    }

    #[tokio::test]
    async fn test_bridge_error_status_surfaces() {
        let bridge = FakeBridge::new();
        let nt = backend(&bridge).await;
        let err = nt.find_group("Team").await.unwrap_err();
        assert!(matches!(err, crate::error::RelayError::TransmissionFailed(_)));
    }
}
