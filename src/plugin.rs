//! Host plugin surface: metadata, replies and chat command dispatch.

use crate::command::{is_send_msg, parse_send_msg};
use crate::error::RelayError;
use crate::service::{RelayService, WatchState};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Registration metadata reported to the host
#[derive(Debug, Clone, Serialize)]
pub struct PluginInfo {
    pub name: &'static str,
    /// Higher runs earlier in the host's handler chain
    pub desire_priority: i32,
    /// Hidden from the host's plugin listing
    pub hidden: bool,
    pub desc: &'static str,
    pub version: &'static str,
    pub author: &'static str,
}

/// Reply severity shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyKind {
    Info,
    Error,
}

/// Reply sent back through the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reply {
    pub kind: ReplyKind,
    pub content: String,
}

impl Reply {
    pub fn info(content: impl Into<String>) -> Self {
        Self {
            kind: ReplyKind::Info,
            content: content.into(),
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            kind: ReplyKind::Error,
            content: content.into(),
        }
    }
}

/// What the host should do after this plugin has seen an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventAction {
    /// Not ours, let other plugins see it
    Continue,
    /// Handled; reply and stop the chain
    BreakPass,
}

/// Result of handling one text context
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HandleOutcome {
    pub action: EventAction,
    pub reply: Option<Reply>,
}

impl HandleOutcome {
    fn pass() -> Self {
        Self {
            action: EventAction::Continue,
            reply: None,
        }
    }

    fn reply(reply: Reply) -> Self {
        Self {
            action: EventAction::BreakPass,
            reply: Some(reply),
        }
    }
}

/// Trait for plugins hosted by the chat-bot framework
#[async_trait::async_trait]
pub trait HostPlugin: Send + Sync {
    fn info(&self) -> &PluginInfo;

    /// Handle an incoming text message
    async fn on_handle_context(&self, content: &str) -> HandleOutcome;

    fn help_text(&self) -> String;
}

const START_WATCH: &str = "$start watchdog";
const STOP_WATCH: &str = "$stop watchdog";
const CHECK_WATCH: &str = "$check watchdog";

static SEND_MSG_INFO: PluginInfo = PluginInfo {
    name: "send_msg",
    desire_priority: 180,
    hidden: true,
    desc: "Watchdog 监听文件变化发送消息 & 微信命令发送消息",
    version: "0.0.1",
    author: "xdeek",
};

/// Watchdog control and `$send_msg` commands
pub struct SendMsgPlugin {
    service: Arc<RelayService>,
}

impl SendMsgPlugin {
    pub fn new(service: Arc<RelayService>) -> Self {
        Self { service }
    }

    async fn start_watch(&self) -> HandleOutcome {
        if let Err(e) = self.service.start_watch().await {
            error!(error = %e, "failed to start watchdog");
            return HandleOutcome::reply(Reply::error(format!("Watchdog 启动失败: {}", e)));
        }

        // Anything queued while stopped goes out now
        if let Err(e) = self.service.drain_queue().await {
            error!(error = %e, "failed to drain queue after start");
        }
        HandleOutcome::reply(Reply::info("Watchdog 已启动。"))
    }

    async fn check_watch(&self) -> HandleOutcome {
        let status = match self.service.watch_state().await {
            WatchState::Running => "Watchdog 正在运行。如需停止，请使用命令 $stop watchdog。",
            WatchState::Stopped => "Watchdog 未在运行。如需启动，请使用命令 $start watchdog。",
        };
        HandleOutcome::reply(Reply::info(status))
    }

    async fn send_msg(&self, content: &str) -> HandleOutcome {
        let result = match parse_send_msg(content) {
            Ok(request) => self.service.route(&request).await,
            Err(e) => Err(e),
        };

        let reply = match result {
            Ok(report) if report.skipped.is_empty() => Reply::info("消息发送成功。"),
            Ok(report) => Reply::info(format!(
                "消息发送成功。未送达: {}",
                report.skipped.join("; ")
            )),
            Err(e) => {
                if e.is_client_error() {
                    warn!(error = %e, "send_msg command rejected");
                } else {
                    error!(error = %e, "send_msg command failed");
                }
                Reply::error(format!("消息发送失败: {}", describe(&e)))
            }
        };
        HandleOutcome::reply(reply)
    }
}

/// User-facing wording for command failures
fn describe(e: &RelayError) -> String {
    match e {
        RelayError::RecipientNotFound {
            name,
            group: Some(group),
        } => format!("在群聊 {} 中未找到成员: {}", group, name),
        RelayError::RecipientNotFound { name, group: None } => format!("未找到好友: {}", name),
        RelayError::GroupNotFound(group) => format!("未找到群聊: {}", group),
        other => other.to_string(),
    }
}

#[async_trait::async_trait]
impl HostPlugin for SendMsgPlugin {
    fn info(&self) -> &PluginInfo {
        &SEND_MSG_INFO
    }

    async fn on_handle_context(&self, content: &str) -> HandleOutcome {
        let content = content.trim();
        match content {
            START_WATCH => self.start_watch().await,
            STOP_WATCH => {
                self.service.stop_watch().await;
                HandleOutcome::reply(Reply::info("Watchdog 已停止。"))
            }
            CHECK_WATCH => self.check_watch().await,
            _ if is_send_msg(content) => {
                info!(command = %content, "handling send_msg command");
                self.send_msg(content).await
            }
            _ => HandleOutcome::pass(),
        }
    }

    fn help_text(&self) -> String {
        [
            "1. Watchdog 文件变化监听插件:",
            "   - 监听队列文件变化并发送微信通知。（默认启动）",
            "   - 启动监听: $start watchdog",
            "   - 停止监听: $stop watchdog",
            "   - 查看状态: $check watchdog",
            "",
            "2. 微信命令发送消息:",
            "   - $send_msg [微信备注名1, 微信备注名2] 消息内容",
            "   - $send_msg [微信备注名1, 微信备注名2] 消息内容 group[群聊1, 群聊2]",
            "   - $send_msg [所有人] 消息内容 group[群聊1, 群聊2]",
        ]
        .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::FailurePolicy;
    use crate::request::MessageRequest;
    use crate::service::tests::service_with;
    use crate::test_utils::{Call, MockBackend};

    fn backend(policy: FailurePolicy) -> MockBackend {
        MockBackend::new(policy)
            .with_contact("wxid_bob", "Bob", "")
            .with_group("room_team", "Team", &[("wxid_carol", "Carol")])
    }

    #[tokio::test]
    async fn test_plugin_info() {
        let (service, _dir) = service_with(&backend(FailurePolicy::Abort));
        let plugin = SendMsgPlugin::new(service);
        assert_eq!(plugin.info().name, "send_msg");
        assert_eq!(plugin.info().desire_priority, 180);
        assert!(plugin.info().hidden);
        assert_eq!(plugin.info().version, "0.0.1");
        assert_eq!(plugin.info().author, "xdeek");
        assert!(plugin.help_text().contains("$send_msg [所有人]"));
    }

    #[tokio::test]
    async fn test_send_msg_command_success() {
        let backend = backend(FailurePolicy::Abort);
        let (service, _dir) = service_with(&backend);
        let plugin = SendMsgPlugin::new(service);

        let outcome = plugin
            .on_handle_context("$send_msg [所有人] 开会 group[Team]")
            .await;
        assert_eq!(outcome.action, EventAction::BreakPass);
        assert_eq!(outcome.reply, Some(Reply::info("消息发送成功。")));
        assert_eq!(
            backend.sends(),
            vec![Call::Broadcast {
                group: "room_team".into(),
                text: "@所有人 开会".into()
            }]
        );
    }

    #[tokio::test]
    async fn test_send_msg_command_missing_member() {
        let abort = backend(FailurePolicy::Abort);
        let (service, _dir) = service_with(&abort);
        let outcome = SendMsgPlugin::new(service)
            .on_handle_context("$send_msg [Alice] hello group[Team]")
            .await;
        let reply = outcome.reply.unwrap();
        assert_eq!(reply.kind, ReplyKind::Error);
        assert_eq!(reply.content, "消息发送失败: 在群聊 Team 中未找到成员: Alice");
        assert!(abort.sends().is_empty());

        let skip = backend(FailurePolicy::SkipAndWarn);
        let (service, _dir) = service_with(&skip);
        let outcome = SendMsgPlugin::new(service)
            .on_handle_context("$send_msg [Alice] hello group[Team]")
            .await;
        let reply = outcome.reply.unwrap();
        assert_eq!(reply.kind, ReplyKind::Info);
        assert!(reply.content.starts_with("消息发送成功。"));
        assert!(skip.sends().is_empty());
    }

    #[tokio::test]
    async fn test_send_msg_command_errors() {
        let (service, _dir) = service_with(&backend(FailurePolicy::Abort));
        let plugin = SendMsgPlugin::new(service);

        let reply = plugin
            .on_handle_context("$send_msg [所有人] hi")
            .await
            .reply
            .unwrap();
        assert_eq!(reply.kind, ReplyKind::Error);

        let reply = plugin
            .on_handle_context("$send_msg [Bob hi")
            .await
            .reply
            .unwrap();
        assert_eq!(reply.kind, ReplyKind::Error);
    }

    #[tokio::test]
    async fn test_send_msg_command_backend_failure() {
        let (service, _dir) = service_with(&backend(FailurePolicy::Abort).failing_sends());
        let reply = SendMsgPlugin::new(service)
            .on_handle_context("$send_msg [Bob] hi")
            .await
            .reply
            .unwrap();
        assert_eq!(reply.kind, ReplyKind::Error);
        assert!(reply.content.starts_with("消息发送失败: transmission failed"));
    }

    #[tokio::test]
    async fn test_watchdog_commands() {
        let backend = backend(FailurePolicy::Abort);
        let (service, _dir) = service_with(&backend);
        let plugin = SendMsgPlugin::new(service.clone());

        let check = plugin.on_handle_context("$check watchdog").await;
        assert!(check.reply.unwrap().content.starts_with("Watchdog 未在运行"));

        // Pending work is drained as soon as the watch starts
        service
            .queue()
            .write_batch(vec![MessageRequest::to_groups(["Team"], "queued")])
            .await
            .unwrap();
        let start = plugin.on_handle_context("$start watchdog").await;
        assert_eq!(start.reply, Some(Reply::info("Watchdog 已启动。")));
        assert_eq!(backend.sends().len(), 1);

        let check = plugin.on_handle_context("  $check watchdog ").await;
        assert!(check.reply.unwrap().content.starts_with("Watchdog 正在运行"));

        let stop = plugin.on_handle_context("$stop watchdog").await;
        assert_eq!(stop.reply, Some(Reply::info("Watchdog 已停止。")));
        assert_eq!(service.watch_state().await, WatchState::Stopped);
    }

    #[tokio::test]
    async fn test_other_text_passes_through() {
        let (service, _dir) = service_with(&backend(FailurePolicy::Abort));
        let outcome = SendMsgPlugin::new(service)
            .on_handle_context("hello bot")
            .await;
        assert_eq!(outcome.action, EventAction::Continue);
        assert!(outcome.reply.is_none());
    }
}
