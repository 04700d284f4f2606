//! IMAP transport (spec §4.2): `LOGIN`/`AUTHENTICATE XOAUTH2` over TLS, with
//! an RFC 2177 IDLE push loop. A fresh session is opened per call for the
//! request/response operations; `idle_loop` keeps one session alive for the
//! duration of the long-running push task.

use crate::error::{EngineError, EngineResult};
use crate::events::{Event, EventBus};
use crate::transport::{MailTransport, MessageHeader};
use crate::types::{compose_message_id, Flag, Message, OutgoingMessage};
use async_imap::types::Fetch;
use async_native_tls::TlsStream;
use async_trait::async_trait;
use futures::StreamExt;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

/// Re-enter IDLE unconditionally after this long (RFC 2177 recommends ≤ 30 min).
const IDLE_RENEWAL: Duration = Duration::from_secs(29 * 60);
/// Delay before reconnecting after an I/O error in the IDLE loop.
const RECONNECT_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub enum ImapAuth {
    Password(String),
    OAuthBearer(String),
}

type ImapSession = async_imap::Session<TlsStream<TcpStream>>;

pub struct ImapTransport {
    host: String,
    port: u16,
    username: String,
    auth: ImapAuth,
    account_id: uuid::Uuid,
}

impl ImapTransport {
    pub fn new(host: impl Into<String>, port: u16, username: impl Into<String>, auth: ImapAuth, account_id: uuid::Uuid) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            auth,
            account_id,
        }
    }

    async fn connect(&self) -> EngineResult<ImapSession> {
        let tcp = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(|e| EngineError::transient(format!("tcp connect failed: {e}")))?;
        let tls = async_native_tls::TlsConnector::new();
        let tls_stream = tls
            .connect(self.host.as_str(), tcp)
            .await
            .map_err(|e| EngineError::transient(format!("tls handshake failed: {e}")))?;
        let client = async_imap::Client::new(tls_stream);

        match &self.auth {
            ImapAuth::Password(password) => client
                .login(&self.username, password)
                .await
                .map_err(|(e, _)| EngineError::from(e)),
            ImapAuth::OAuthBearer(token) => {
                let authenticator = XOAuth2 {
                    user: self.username.clone(),
                    access_token: token.clone(),
                };
                client
                    .authenticate("XOAUTH2", authenticator)
                    .await
                    .map_err(|(e, _)| EngineError::from(e))
            }
        }
    }

    fn parse_header(uid: u32, fetch: &Fetch) -> EngineResult<MessageHeader> {
        let envelope = fetch
            .envelope()
            .ok_or_else(|| EngineError::parse("missing envelope in fetch response"))?;

        let subject = envelope
            .subject
            .as_ref()
            .map(|s| String::from_utf8_lossy(s).to_string())
            .unwrap_or_default();

        let (from_name, from_address) = envelope
            .from
            .as_ref()
            .and_then(|addrs| addrs.first())
            .map(|addr| {
                let name = addr
                    .name
                    .as_ref()
                    .map(|n| String::from_utf8_lossy(n).to_string())
                    .unwrap_or_default();
                let mailbox = addr
                    .mailbox
                    .as_ref()
                    .map(|m| String::from_utf8_lossy(m).to_string())
                    .unwrap_or_default();
                let host = addr
                    .host
                    .as_ref()
                    .map(|h| String::from_utf8_lossy(h).to_string())
                    .unwrap_or_default();
                (name, format!("{mailbox}@{host}"))
            })
            .unwrap_or_default();

        let to = envelope
            .to
            .as_ref()
            .map(|addrs| {
                addrs
                    .iter()
                    .map(|addr| {
                        let mailbox = addr
                            .mailbox
                            .as_ref()
                            .map(|m| String::from_utf8_lossy(m).to_string())
                            .unwrap_or_default();
                        let host = addr
                            .host
                            .as_ref()
                            .map(|h| String::from_utf8_lossy(h).to_string())
                            .unwrap_or_default();
                        format!("{mailbox}@{host}")
                    })
                    .collect()
            })
            .unwrap_or_default();

        let message_id = envelope
            .message_id
            .as_ref()
            .map(|m| String::from_utf8_lossy(m).to_string())
            .unwrap_or_else(|| format!("<generated-{uid}@no-message-id>"));

        let in_reply_to = envelope
            .in_reply_to
            .as_ref()
            .map(|m| String::from_utf8_lossy(m).to_string());

        let date = envelope
            .date
            .as_ref()
            .and_then(|d| {
                chrono::DateTime::parse_from_rfc2822(&String::from_utf8_lossy(d)).ok()
            })
            .map(|d| d.with_timezone(&chrono::Utc))
            .unwrap_or_else(chrono::Utc::now);

        let flags: Vec<String> = fetch.flags().map(|f| format!("{f:?}")).collect();
        let is_read = flags.iter().any(|f| f.contains("Seen"));
        let is_starred = flags.iter().any(|f| f.contains("Flagged"));

        Ok(MessageHeader {
            uid,
            message_id,
            thread_id: None,
            in_reply_to,
            references: Vec::new(),
            subject,
            from_name,
            from_address,
            to,
            date,
            is_read,
            is_starred,
            has_attachments: false,
        })
    }
}

#[async_trait]
impl MailTransport for ImapTransport {
    async fn list_folders(&self) -> EngineResult<Vec<String>> {
        let mut session = self.connect().await?;
        let names = {
            let mut stream = session
                .list(Some(""), Some("*"))
                .await
                .map_err(EngineError::from)?;
            let mut names = Vec::new();
            while let Some(item) = stream.next().await {
                let name = item.map_err(EngineError::from)?;
                names.push(name.name().to_string());
            }
            names
        };
        let _ = session.logout().await;
        Ok(names)
    }

    async fn fetch_headers(
        &self,
        folder: &str,
        since_uid: Option<u32>,
    ) -> EngineResult<Vec<MessageHeader>> {
        let mut session = self.connect().await?;
        session.select(folder).await.map_err(EngineError::from)?;

        let sequence = match since_uid {
            Some(uid) => format!("{}:*", uid + 1),
            None => "1:*".to_string(),
        };

        let headers = {
            let mut stream = session
                .uid_fetch(&sequence, "(ENVELOPE FLAGS)")
                .await
                .map_err(EngineError::from)?;
            let mut headers = Vec::new();
            while let Some(item) = stream.next().await {
                let fetch = item.map_err(EngineError::from)?;
                if let Some(uid) = fetch.uid {
                    headers.push(Self::parse_header(uid, &fetch)?);
                }
            }
            headers
        };
        let _ = session.logout().await;
        Ok(headers)
    }

    async fn fetch_full(&self, folder: &str, uid: u32) -> EngineResult<Message> {
        let mut session = self.connect().await?;
        session.select(folder).await.map_err(EngineError::from)?;

        let sequence = uid.to_string();
        let raw = {
            let mut stream = session
                .uid_fetch(&sequence, "(ENVELOPE FLAGS RFC822)")
                .await
                .map_err(EngineError::from)?;
            let item = stream
                .next()
                .await
                .ok_or_else(|| EngineError::not_found("message", uid.to_string()))?
                .map_err(EngineError::from)?;
            let header = Self::parse_header(uid, &item)?;
            let body = item
                .body()
                .ok_or_else(|| EngineError::parse("missing body in fetch response"))?
                .to_vec();
            (header, body)
        };
        let _ = session.logout().await;
        let (header, body) = raw;

        let parsed = mailparse::parse_mail(&body)?;
        let (body_plain, body_html) = extract_bodies(&parsed);
        let snippet: String = body_plain
            .as_deref()
            .unwrap_or_default()
            .chars()
            .take(200)
            .collect();

        let thread_id = header
            .thread_id
            .clone()
            .unwrap_or_else(|| header.message_id.clone());
        let now = chrono::Utc::now();

        Ok(Message {
            id: compose_message_id(self.account_id, folder, uid),
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
            snippet,
            body_html,
            body_plain,
            is_read: header.is_read,
            is_starred: header.is_starred,
            has_attachments: header.has_attachments,
            labels: Vec::new(),
            created_at: now,
            updated_at: now,
        })
    }

    async fn set_flags(&self, folder: &str, uid: u32, add: Vec<Flag>, remove: Vec<Flag>) -> EngineResult<()> {
        let mut session = self.connect().await?;
        session.select(folder).await.map_err(EngineError::from)?;

        if !add.is_empty() {
            let flags = add.iter().map(|f| f.imap_name()).collect::<Vec<_>>().join(" ");
            let query = format!("+FLAGS ({flags})");
            let mut stream = session
                .uid_store(uid.to_string(), query)
                .await
                .map_err(EngineError::from)?;
            while stream.next().await.is_some() {}
        }
        if !remove.is_empty() {
            let flags = remove.iter().map(|f| f.imap_name()).collect::<Vec<_>>().join(" ");
            let query = format!("-FLAGS ({flags})");
            let mut stream = session
                .uid_store(uid.to_string(), query)
                .await
                .map_err(EngineError::from)?;
            while stream.next().await.is_some() {}
        }
        let _ = session.logout().await;
        Ok(())
    }

    async fn move_message(&self, folder: &str, uid: u32, to_folder: &str) -> EngineResult<()> {
        let mut session = self.connect().await?;
        session.select(folder).await.map_err(EngineError::from)?;
        session
            .uid_mv(uid.to_string(), to_folder)
            .await
            .map_err(EngineError::from)?;
        let _ = session.logout().await;
        Ok(())
    }

    async fn send(&self, message: &OutgoingMessage) -> EngineResult<()> {
        let (host, port) = smtp_endpoint_for(&self.host);
        let sender = match &self.auth {
            ImapAuth::Password(password) => {
                crate::transport::SmtpSender::with_password(&host, port, &self.username, password)?
            }
            ImapAuth::OAuthBearer(token) => {
                crate::transport::SmtpSender::with_oauth_bearer(&host, port, &self.username, token)?
            }
        };
        sender.send(message).await
    }

    /// RFC 2177 IDLE loop: re-enter IDLE unconditionally every 29 minutes,
    /// emit `mail:new` on any EXISTS/EXPUNGE notification, and reconnect
    /// after a 30s delay on I/O error (spec §4.2).
    async fn idle_loop(&self, folder: &str, events: EventBus, cancel: CancellationToken) -> EngineResult<()> {
        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }

            match self.run_idle_cycle(folder, &events, &cancel).await {
                Ok(()) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "imap idle cycle failed, reconnecting");
                    tokio::select! {
                        _ = cancel.cancelled() => return Ok(()),
                        _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                    }
                }
            }
        }
    }
}

impl ImapTransport {
    async fn run_idle_cycle(
        &self,
        folder: &str,
        events: &EventBus,
        cancel: &CancellationToken,
    ) -> EngineResult<()> {
        let mut session = self.connect().await?;
        session.select(folder).await.map_err(EngineError::from)?;

        loop {
            if cancel.is_cancelled() {
                let _ = session.logout().await;
                return Ok(());
            }

            let mut idle = session.idle();
            idle.init().await.map_err(EngineError::from)?;
            let (idle_wait, _interrupt) = idle.wait_with_timeout(IDLE_RENEWAL);

            tokio::select! {
                _ = cancel.cancelled() => {
                    drop(idle_wait);
                    return Ok(());
                }
                result = idle_wait => {
                    match result {
                        Ok(async_imap::extensions::idle::IdleResponse::NewData(_)) => {
                            events.publish(Event::MailNew {
                                account_id: self.account_id,
                                folder: folder.to_string(),
                            });
                        }
                        Ok(_) => {
                            // Timeout or manual stop: loop around and re-issue IDLE.
                        }
                        Err(e) => {
                            return Err(EngineError::transient(format!("idle error: {e}")));
                        }
                    }
                }
            }
        }
    }
}

/// `XOAUTH2` SASL mechanism: `user=<user>\x01auth=Bearer <token>\x01\x01`.
struct XOAuth2 {
    user: String,
    access_token: String,
}

impl async_imap::Authenticator for XOAuth2 {
    type Response = String;

    fn process(&mut self, _challenge: &[u8]) -> Self::Response {
        format!(
            "user={}\x01auth=Bearer {}\x01\x01",
            self.user, self.access_token
        )
    }
}

fn extract_bodies(parsed: &mailparse::ParsedMail) -> (Option<String>, Option<String>) {
    if parsed.subparts.is_empty() {
        let body = parsed.get_body().ok();
        return match parsed.ctype.mimetype.as_str() {
            "text/html" => (None, body),
            _ => (body, None),
        };
    }

    let mut plain = None;
    let mut html = None;
    for part in &parsed.subparts {
        match part.ctype.mimetype.as_str() {
            "text/plain" if plain.is_none() => plain = part.get_body().ok(),
            "text/html" if html.is_none() => html = part.get_body().ok(),
            _ => {
                if part.subparts.iter().any(|p| !p.subparts.is_empty()) || !part.subparts.is_empty() {
                    let (nested_plain, nested_html) = extract_bodies(part);
                    plain = plain.or(nested_plain);
                    html = html.or(nested_html);
                }
            }
        }
    }
    (plain, html)
}

/// Most IMAP providers share their mail domain's SMTP submission host on
/// port 587; callers with a nonstandard split should use `NativeTransport`
/// or a `Custom` account instead.
fn smtp_endpoint_for(imap_host: &str) -> (String, u16) {
    let smtp_host = imap_host.replacen("imap", "smtp", 1);
    (smtp_host, 587)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smtp_endpoint_swaps_imap_for_smtp() {
        let (host, port) = smtp_endpoint_for("imap.example.com");
        assert_eq!(host, "smtp.example.com");
        assert_eq!(port, 587);
    }

    #[test]
    fn xoauth2_response_has_expected_shape() {
        let mut auth = XOAuth2 {
            user: "a@example.com".to_string(),
            access_token: "tok123".to_string(),
        };
        let resp = auth.process(b"");
        assert_eq!(resp, "user=a@example.com\x01auth=Bearer tok123\x01\x01");
    }
}
