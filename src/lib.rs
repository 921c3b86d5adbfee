//! msgrelay - Outbound message relay for WeChat chat-bots
//!
//! Accepts batches of messages over HTTP, spools them into a queue file and
//! delivers them through a WeChat client bridge when the file changes. The
//! same routing is reachable from chat via `$send_msg` commands.

pub mod backend;
pub mod command;
pub mod config;
pub mod error;
pub mod intake;
pub mod media;
pub mod plugin;
pub mod queue;
pub mod request;
pub mod router;
pub mod service;
pub mod watcher;

#[cfg(test)]
pub(crate) mod test_utils;

pub use config::RelayConfig;
pub use error::RelayError;
pub use request::MessageRequest;
pub use service::RelayService;
