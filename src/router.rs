//! Message routing: turns a request into backend deliveries.

use crate::backend::{DeliveryBackend, FailurePolicy, Identity};
use crate::error::{RelayError, Result};
use crate::media::{ContentKind, Fetcher, MediaKind};
use crate::request::{is_broadcast_token, MessageRequest, BROADCAST_MENTION};
use std::sync::Arc;
use tracing::{info, warn};

/// One completed delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Direct message to a contact
    Contact { name: String },
    /// Plain message into a group
    Group { group: String },
    /// @-everyone message into a group
    Broadcast { group: String },
    /// Message into a group mentioning resolved members
    Mentions { group: String, members: Vec<String> },
}

/// Outcome of routing one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub content: ContentKind,
    pub deliveries: Vec<Delivery>,
    /// Names skipped under the skip-and-warn policy
    pub skipped: Vec<String>,
}

impl DeliveryReport {
    fn new(content: ContentKind) -> Self {
        Self {
            content,
            deliveries: Vec::new(),
            skipped: Vec::new(),
        }
    }

    /// The request was dropped because its content cannot be sent
    pub fn is_dropped(&self) -> bool {
        self.content == ContentKind::Unsupported
    }
}

/// Counts for a drained batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub succeeded: usize,
    pub failed: usize,
}

/// Resolves names and dispatches messages through one backend
pub struct MessageRouter {
    backend: Arc<dyn DeliveryBackend>,
    fetcher: Arc<dyn Fetcher>,
}

impl MessageRouter {
    pub fn new(backend: Arc<dyn DeliveryBackend>, fetcher: Arc<dyn Fetcher>) -> Self {
        Self { backend, fetcher }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Route a single request
    pub async fn route(&self, request: &MessageRequest) -> Result<DeliveryReport> {
        request.validate()?;

        let content = ContentKind::classify(&request.message);
        let mut report = DeliveryReport::new(content);
        if content == ContentKind::Unsupported {
            warn!(message = %request.message, "unsupported attachment type, dropping message");
            return Ok(report);
        }

        if request.group_names.is_empty() {
            self.route_direct(request, content, &mut report).await?;
        } else {
            self.route_groups(request, content, &mut report).await?;
        }
        Ok(report)
    }

    /// Route every request in a batch; one failure never stops the rest
    pub async fn route_batch(&self, requests: &[MessageRequest]) -> BatchSummary {
        let mut summary = BatchSummary::default();
        for (index, request) in requests.iter().enumerate() {
            match self.route(request).await {
                Ok(report) => {
                    summary.succeeded += 1;
                    if !report.skipped.is_empty() {
                        warn!(index, skipped = ?report.skipped, "delivered with skipped names");
                    }
                }
                Err(e) => {
                    summary.failed += 1;
                    warn!(index, error = %e, "failed to deliver queued message");
                }
            }
        }
        summary
    }

    fn policy(&self) -> FailurePolicy {
        self.backend.failure_policy()
    }

    async fn route_direct(
        &self,
        request: &MessageRequest,
        content: ContentKind,
        report: &mut DeliveryReport,
    ) -> Result<()> {
        if request.has_broadcast() {
            return Err(RelayError::invalid(
                "cannot @所有人 in a direct message",
            ));
        }

        for name in &request.receiver_names {
            let Some(contact) = self.backend.find_contact(name).await? else {
                self.miss(RelayError::recipient(name, None), report)?;
                continue;
            };

            self.transmit(&contact, &request.message, content).await?;
            info!(to = %contact.name, "sent direct message");
            report.deliveries.push(Delivery::Contact { name: name.clone() });
        }
        Ok(())
    }

    async fn route_groups(
        &self,
        request: &MessageRequest,
        content: ContentKind,
        report: &mut DeliveryReport,
    ) -> Result<()> {
        for group_name in &request.group_names {
            let Some(group) = self.backend.find_group(group_name).await? else {
                self.miss(RelayError::GroupNotFound(group_name.clone()), report)?;
                continue;
            };

            if request.has_broadcast() {
                self.broadcast(&group, &request.message, content).await?;
                info!(group = %group.name, "sent @所有人 message");
                report.deliveries.push(Delivery::Broadcast {
                    group: group_name.clone(),
                });
            } else if !request.receiver_names.is_empty() {
                let members = self
                    .resolve_members(&group, &request.receiver_names, report)
                    .await?;
                if members.is_empty() {
                    warn!(group = %group.name, "no receivers resolved in group, nothing sent");
                    continue;
                }
                self.mention(&group, &members, &request.message, content)
                    .await?;
                info!(group = %group.name, count = members.len(), "sent message with mentions");
                report.deliveries.push(Delivery::Mentions {
                    group: group_name.clone(),
                    members: members.into_iter().map(|m| m.name).collect(),
                });
            } else {
                self.transmit(&group, &request.message, content).await?;
                info!(group = %group.name, "sent group message");
                report.deliveries.push(Delivery::Group {
                    group: group_name.clone(),
                });
            }
        }
        Ok(())
    }

    /// Resolve every receiver inside a group before anything is sent to it
    async fn resolve_members(
        &self,
        group: &Identity,
        names: &[String],
        report: &mut DeliveryReport,
    ) -> Result<Vec<Identity>> {
        let mut members = Vec::with_capacity(names.len());
        for name in names {
            match self.backend.find_group_member(group, name).await? {
                Some(member) => members.push(member),
                None => self.miss(RelayError::recipient(name, Some(&group.name)), report)?,
            }
        }
        Ok(members)
    }

    /// Apply the backend's partial-failure policy to a lookup miss
    fn miss(&self, err: RelayError, report: &mut DeliveryReport) -> Result<()> {
        match self.policy() {
            FailurePolicy::Abort => Err(err),
            FailurePolicy::SkipAndWarn => {
                warn!(backend = self.backend.name(), "{}", err);
                report.skipped.push(err.to_string());
                Ok(())
            }
        }
    }

    async fn broadcast(&self, group: &Identity, message: &str, content: ContentKind) -> Result<()> {
        match content.media() {
            None => {
                let text = format!("{} {}", BROADCAST_MENTION, message);
                self.backend.send_broadcast_annotated(group, &text).await
            }
            Some(kind) => {
                self.backend
                    .send_broadcast_annotated(group, BROADCAST_MENTION)
                    .await?;
                self.send_attachment(group, message, kind).await
            }
        }
    }

    async fn mention(
        &self,
        group: &Identity,
        members: &[Identity],
        message: &str,
        content: ContentKind,
    ) -> Result<()> {
        if !self.backend.batches_mentions() && members.len() > 1 {
            for member in members {
                self.mention_batch(group, std::slice::from_ref(member), message, content)
                    .await?;
            }
            return Ok(());
        }
        self.mention_batch(group, members, message, content).await
    }

    async fn mention_batch(
        &self,
        group: &Identity,
        members: &[Identity],
        message: &str,
        content: ContentKind,
    ) -> Result<()> {
        match content.media() {
            None => self.backend.send_mentions(group, members, message).await,
            Some(kind) => {
                self.backend.send_mentions(group, members, "").await?;
                self.send_attachment(group, message, kind).await
            }
        }
    }

    async fn transmit(&self, target: &Identity, message: &str, content: ContentKind) -> Result<()> {
        match content.media() {
            None => self.backend.send_text(target, message).await,
            Some(kind) => self.send_attachment(target, message, kind).await,
        }
    }

    /// Download, send, then remove the local copy whatever the send outcome
    async fn send_attachment(&self, target: &Identity, url: &str, kind: MediaKind) -> Result<()> {
        let file = self.fetcher.fetch(url.trim()).await?;
        let result = self.backend.send_media(target, file.path(), kind).await;
        drop(file);
        result
    }
}
