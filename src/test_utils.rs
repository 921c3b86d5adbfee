use crate::backend::{DeliveryBackend, FailurePolicy, Identity};
use crate::error::{RelayError, Result};
use crate::media::{DownloadedFile, Fetcher, MediaKind};
use axum::{
    body::Bytes,
    extract::State,
    http::{Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json, Router,
};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// A capability call recorded by [`MockBackend`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    FindContact(String),
    FindGroup(String),
    FindMember {
        group: String,
        name: String,
    },
    SendText {
        target: String,
        text: String,
    },
    Broadcast {
        group: String,
        text: String,
    },
    Mentions {
        group: String,
        members: Vec<String>,
        text: String,
    },
    SendMedia {
        target: String,
        path: PathBuf,
        kind: MediaKind,
        existed: bool,
    },
}

impl Call {
    pub fn is_send(&self) -> bool {
        matches!(
            self,
            Call::SendText { .. }
                | Call::Broadcast { .. }
                | Call::Mentions { .. }
                | Call::SendMedia { .. }
        )
    }
}

#[derive(Debug, Clone)]
struct MockContact {
    identity: Identity,
    alias: String,
}

#[derive(Debug, Clone)]
struct MockGroup {
    identity: Identity,
    members: Vec<Identity>,
}

/// In-memory backend that records every capability call
#[derive(Debug, Clone)]
pub struct MockBackend {
    policy: FailurePolicy,
    contacts: Vec<MockContact>,
    groups: Vec<MockGroup>,
    fail_sends: bool,
    per_member_mentions: bool,
    send_gate: Option<Arc<Notify>>,
    calls: Arc<Mutex<Vec<Call>>>,
}

impl MockBackend {
    pub fn new(policy: FailurePolicy) -> Self {
        Self {
            policy,
            contacts: Vec::new(),
            groups: Vec::new(),
            fail_sends: false,
            per_member_mentions: false,
            send_gate: None,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_contact(mut self, id: &str, name: &str, alias: &str) -> Self {
        self.contacts.push(MockContact {
            identity: Identity::new(id, name),
            alias: alias.to_string(),
        });
        self
    }

    pub fn with_group(mut self, id: &str, name: &str, members: &[(&str, &str)]) -> Self {
        self.groups.push(MockGroup {
            identity: Identity::new(id, name),
            members: members
                .iter()
                .map(|(id, name)| Identity::new(*id, *name))
                .collect(),
        });
        self
    }

    /// Make every send fail with `TransmissionFailed`
    pub fn failing_sends(mut self) -> Self {
        self.fail_sends = true;
        self
    }

    /// Mention one member per send, like the web-protocol client
    pub fn per_member_mentions(mut self) -> Self {
        self.per_member_mentions = true;
        self
    }

    /// Record each send, then hold it until `gate` is notified
    pub fn gated_sends(mut self, gate: Arc<Notify>) -> Self {
        self.send_gate = Some(gate);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn take_calls(&self) -> Vec<Call> {
        std::mem::take(&mut *self.calls.lock().expect("calls lock"))
    }

    pub fn sends(&self) -> Vec<Call> {
        self.calls().into_iter().filter(Call::is_send).collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().expect("calls lock").push(call);
    }

    async fn send(&self, call: Call) -> Result<()> {
        self.record(call);
        if let Some(gate) = &self.send_gate {
            gate.notified().await;
        }
        if self.fail_sends {
            return Err(RelayError::TransmissionFailed("mock send failure".into()));
        }
        Ok(())
    }

    fn lookup_contact(&self, name: &str) -> Option<Identity> {
        self.contacts
            .iter()
            .find(|c| c.alias == name)
            .or_else(|| self.contacts.iter().find(|c| c.identity.name == name))
            .map(|c| c.identity.clone())
    }
}

#[async_trait::async_trait]
impl DeliveryBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    fn failure_policy(&self) -> FailurePolicy {
        self.policy
    }

    fn batches_mentions(&self) -> bool {
        !self.per_member_mentions
    }

    async fn find_contact(&self, name: &str) -> Result<Option<Identity>> {
        self.record(Call::FindContact(name.to_string()));
        Ok(self.lookup_contact(name))
    }

    async fn find_group(&self, name: &str) -> Result<Option<Identity>> {
        self.record(Call::FindGroup(name.to_string()));
        Ok(self
            .groups
            .iter()
            .find(|g| g.identity.name == name)
            .map(|g| g.identity.clone()))
    }

    async fn find_group_member(&self, group: &Identity, name: &str) -> Result<Option<Identity>> {
        self.record(Call::FindMember {
            group: group.id.clone(),
            name: name.to_string(),
        });
        let member = self
            .groups
            .iter()
            .find(|g| g.identity.id == group.id)
            .and_then(|g| g.members.iter().find(|m| m.name == name).cloned());
        Ok(member.or_else(|| self.lookup_contact(name)))
    }

    async fn send_text(&self, target: &Identity, text: &str) -> Result<()> {
        self.send(Call::SendText {
            target: target.id.clone(),
            text: text.to_string(),
        })
        .await
    }

    async fn send_broadcast_annotated(&self, group: &Identity, text: &str) -> Result<()> {
        self.send(Call::Broadcast {
            group: group.id.clone(),
            text: text.to_string(),
        })
        .await
    }

    async fn send_mentions(
        &self,
        group: &Identity,
        members: &[Identity],
        text: &str,
    ) -> Result<()> {
        self.send(Call::Mentions {
            group: group.id.clone(),
            members: members.iter().map(|m| m.id.clone()).collect(),
            text: text.to_string(),
        })
        .await
    }

    async fn send_media(&self, target: &Identity, path: &Path, kind: MediaKind) -> Result<()> {
        self.send(Call::SendMedia {
            target: target.id.clone(),
            path: path.to_path_buf(),
            kind,
            existed: path.exists(),
        })
        .await
    }
}

/// Fetcher that writes placeholder files into a scratch directory
#[derive(Clone)]
pub struct StubFetcher {
    dir: Arc<tempfile::TempDir>,
    fail: bool,
    paths: Arc<Mutex<Vec<PathBuf>>>,
}

impl StubFetcher {
    pub fn new() -> Self {
        Self {
            dir: Arc::new(tempfile::tempdir().expect("tempdir")),
            fail: false,
            paths: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    /// Every local path handed out so far
    pub fn paths(&self) -> Vec<PathBuf> {
        self.paths.lock().expect("paths lock").clone()
    }

    pub fn fetch_count(&self) -> usize {
        self.paths.lock().expect("paths lock").len()
    }
}

#[async_trait::async_trait]
impl Fetcher for StubFetcher {
    async fn fetch(&self, url: &str) -> Result<DownloadedFile> {
        if self.fail {
            return Err(RelayError::DownloadFailed {
                url: url.to_string(),
                reason: "stub failure".into(),
            });
        }
        let mut paths = self.paths.lock().expect("paths lock");
        let path = self.dir.path().join(format!("download-{}", paths.len()));
        std::fs::write(&path, url.as_bytes())?;
        paths.push(path.clone());
        Ok(DownloadedFile::new(path))
    }
}

/// Loopback HTTP server standing in for a chat-client bridge.
///
/// GETs are answered from canned JSON keyed by path; POST bodies are recorded.
#[derive(Clone, Default)]
pub struct FakeBridge {
    gets: Arc<Mutex<HashMap<String, Value>>>,
    posts: Arc<Mutex<Vec<(String, Value)>>>,
}

impl FakeBridge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_get(self, path: &str, body: Value) -> Self {
        self.gets
            .lock()
            .expect("gets lock")
            .insert(path.to_string(), body);
        self
    }

    pub fn posts(&self) -> Vec<(String, Value)> {
        self.posts.lock().expect("posts lock").clone()
    }

    /// Start serving on an ephemeral port and return the base URL
    pub async fn serve(&self) -> String {
        let app = Router::new().fallback(fake_bridge_handler).with_state(self.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake bridge");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });
        format!("http://{}", addr)
    }
}

async fn fake_bridge_handler(
    State(bridge): State<FakeBridge>,
    method: Method,
    uri: Uri,
    body: Bytes,
) -> Response {
    let path = uri.path().to_string();
    if method == Method::GET {
        return match bridge.gets.lock().expect("gets lock").get(&path) {
            Some(value) => Json(value.clone()).into_response(),
            None => (StatusCode::NOT_FOUND, "no such fixture").into_response(),
        };
    }

    let value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    bridge.posts.lock().expect("posts lock").push((path, value));
    Json(serde_json::json!({"ok": true})).into_response()
}
