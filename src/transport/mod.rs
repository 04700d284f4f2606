//! Mail Transport (C2, spec §4.2): provider-agnostic fetch/send/flag/move,
//! expressed as a capability trait with two concrete implementations
//! (native-API, IMAP/SMTP) selected per account by the account's provider
//! tag — polymorphism over providers instead of inheritance (spec §9).

pub mod imap;
pub mod native;
pub mod smtp;
pub mod threading;

use crate::error::EngineResult;
use crate::events::EventBus;
use crate::types::{Flag, Message, OutgoingMessage};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

pub use smtp::SmtpSender;

/// A lightweight message header, returned by `fetch_headers` before the
/// full body is pulled down by `fetch_full`.
#[derive(Debug, Clone)]
pub struct MessageHeader {
    pub uid: u32,
    pub message_id: String,
    pub thread_id: Option<String>,
    pub in_reply_to: Option<String>,
    pub references: Vec<String>,
    pub subject: String,
    pub from_name: String,
    pub from_address: String,
    pub to: Vec<String>,
    pub date: chrono::DateTime<chrono::Utc>,
    pub is_read: bool,
    pub is_starred: bool,
    pub has_attachments: bool,
}

/// The provider-agnostic capability set every mail transport implements.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn list_folders(&self) -> EngineResult<Vec<String>>;

    /// Headers (+ enough metadata to build a `Message`) fetched since
    /// `since_uid` (exclusive), or from the start of the folder if `None`.
    async fn fetch_headers(
        &self,
        folder: &str,
        since_uid: Option<u32>,
    ) -> EngineResult<Vec<MessageHeader>>;

    /// Full body for a single message, by composite id.
    async fn fetch_full(&self, folder: &str, uid: u32) -> EngineResult<Message>;

    async fn set_flags(&self, folder: &str, uid: u32, add: Vec<Flag>, remove: Vec<Flag>) -> EngineResult<()>;

    async fn move_message(&self, folder: &str, uid: u32, to_folder: &str) -> EngineResult<()>;

    async fn send(&self, message: &OutgoingMessage) -> EngineResult<()>;

    /// Long-lived push-notification loop for this account's primary folder.
    /// Terminates when `cancel` fires. The default implementation is a
    /// no-op for transports with no native push mechanism; `ImapTransport`
    /// overrides this with a real IMAP IDLE loop.
    async fn idle_loop(
        &self,
        _folder: &str,
        _events: EventBus,
        _cancel: CancellationToken,
    ) -> EngineResult<()> {
        Ok(())
    }
}
