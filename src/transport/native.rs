//! Native-API transport (spec §4.2): a JSON/HTTPS mailbox API reached
//! through `reqwest`, with a polling-based `idle_loop` since true
//! server push is a webhook concern outside this engine's process.

use crate::error::{EngineError, EngineResult};
use crate::events::{Event, EventBus};
use crate::transport::{MailTransport, MessageHeader};
use crate::types::{Flag, Message, OutgoingMessage};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const POLL_INTERVAL: Duration = Duration::from_secs(30);

pub struct NativeTransport {
    client: reqwest::Client,
    base_url: String,
    account_id: uuid::Uuid,
    access_token: String,
}

impl NativeTransport {
    pub fn new(base_url: impl Into<String>, account_id: uuid::Uuid, access_token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            account_id,
            access_token: access_token.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, path: &str) -> EngineResult<T> {
        let resp = self
            .client
            .get(self.url(path))
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        if resp.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(EngineError::auth_required(self.account_id.to_string()));
        }
        if !resp.status().is_success() {
            return Err(EngineError::transient(format!(
                "native api returned {}",
                resp.status()
            )));
        }
        Ok(resp.json::<T>().await?)
    }
}

#[derive(Deserialize)]
struct FolderListResponse {
    folders: Vec<String>,
}

#[derive(Deserialize)]
struct HeaderListResponse {
    messages: Vec<NativeHeader>,
}

#[derive(Deserialize)]
struct NativeHeader {
    uid: u32,
    message_id: String,
    thread_id: Option<String>,
    in_reply_to: Option<String>,
    #[serde(default)]
    references: Vec<String>,
    subject: String,
    from_name: String,
    from_address: String,
    #[serde(default)]
    to: Vec<String>,
    date: chrono::DateTime<chrono::Utc>,
    is_read: bool,
    is_starred: bool,
    has_attachments: bool,
}

#[derive(Deserialize)]
struct FullMessageResponse {
    body_html: Option<String>,
    body_plain: Option<String>,
    snippet: String,
    labels: Vec<String>,
}

#[async_trait]
impl MailTransport for NativeTransport {
    async fn list_folders(&self) -> EngineResult<Vec<String>> {
        let resp: FolderListResponse = self.get_json("/folders").await?;
        Ok(resp.folders)
    }

    async fn fetch_headers(
        &self,
        folder: &str,
        since_uid: Option<u32>,
    ) -> EngineResult<Vec<MessageHeader>> {
        let path = match since_uid {
            Some(uid) => format!("/folders/{folder}/messages?since_uid={uid}"),
            None => format!("/folders/{folder}/messages"),
        };
        let resp: HeaderListResponse = self.get_json(&path).await?;
        Ok(resp
            .messages
            .into_iter()
            .map(|h| MessageHeader {
                uid: h.uid,
                message_id: h.message_id,
                thread_id: h.thread_id,
                in_reply_to: h.in_reply_to,
                references: h.references,
                subject: h.subject,
                from_name: h.from_name,
                from_address: h.from_address,
                to: h.to,
                date: h.date,
                is_read: h.is_read,
                is_starred: h.is_starred,
                has_attachments: h.has_attachments,
            })
            .collect())
    }

    async fn fetch_full(&self, folder: &str, uid: u32) -> EngineResult<Message> {
        let headers = self.fetch_headers(folder, uid.checked_sub(1)).await?;
        let header = headers
            .into_iter()
            .find(|h| h.uid == uid)
            .ok_or_else(|| EngineError::not_found("message", uid.to_string()))?;

        let full: FullMessageResponse = self
            .get_json(&format!("/folders/{folder}/messages/{uid}/full"))
            .await?;

        let thread_id = header
            .thread_id
            .clone()
            .unwrap_or_else(|| header.message_id.clone());
        let now = chrono::Utc::now();

        Ok(Message {
            id: crate::types::compose_message_id(self.account_id, folder, uid),
            account_id: self.account_id,
            folder: folder.to_string(),
            uid,
            message_id: header.message_id,
            thread_id,
            subject: header.subject,
            from_name: header.from_name,
            from_address: header.from_address,
            to: header.to,
            date: header.date,
            snippet: full.snippet,
            body_html: full.body_html,
            body_plain: full.body_plain,
            is_read: header.is_read,
            is_starred: header.is_starred,
            has_attachments: header.has_attachments,
            labels: full.labels,
            created_at: now,
            updated_at: now,
        })
    }

    async fn set_flags(&self, folder: &str, uid: u32, add: Vec<Flag>, remove: Vec<Flag>) -> EngineResult<()> {
        let body = serde_json::json!({
            "add": add.iter().map(|f| f.imap_name()).collect::<Vec<_>>(),
            "remove": remove.iter().map(|f| f.imap_name()).collect::<Vec<_>>(),
        });
        let resp = self
            .client
            .post(self.url(&format!("/folders/{folder}/messages/{uid}/flags")))
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(EngineError::transient(format!(
                "set_flags failed with {}",
                resp.status()
            )));
        }
        Ok(())
    }

    async fn move_message(&self, folder: &str, uid: u32, to_folder: &str) -> EngineResult<()> {
        let resp = self
            .client
            .post(self.url(&format!("/folders/{folder}/messages/{uid}/move")))
            .bearer_auth(&self.access_token)
            .json(&serde_json::json!({ "to": to_folder }))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(EngineError::transient(format!(
                "move failed with {}",
                resp.status()
            )));
        }
        Ok(())
    }

    async fn send(&self, message: &OutgoingMessage) -> EngineResult<()> {
        let resp = self
            .client
            .post(self.url("/messages/send"))
            .bearer_auth(&self.access_token)
            .json(message)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(EngineError::transient(format!(
                "send failed with {}",
                resp.status()
            )));
        }
        Ok(())
    }

    async fn idle_loop(&self, folder: &str, events: EventBus, cancel: CancellationToken) -> EngineResult<()> {
        let mut last_seen_uid: Option<u32> = None;
        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }
            match self.fetch_headers(folder, last_seen_uid).await {
                Ok(headers) => {
                    if let Some(max_uid) = headers.iter().map(|h| h.uid).max() {
                        last_seen_uid = Some(max_uid);
                    }
                    if !headers.is_empty() {
                        events.publish(Event::MailNew {
                            account_id: self.account_id,
                            folder: folder.to_string(),
                        });
                    }
                }
                Err(e) if e.is_retryable() => {
                    tracing::warn!(error = %e, "native poll failed, will retry");
                }
                Err(e) => return Err(e),
            }

            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_joins_base_and_path_without_double_slash() {
        let t = NativeTransport::new("https://api.example.com/", uuid::Uuid::new_v4(), "tok");
        assert_eq!(t.url("/folders"), "https://api.example.com/folders");
    }
}
