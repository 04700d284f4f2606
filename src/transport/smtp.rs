//! SMTP sending, shared by both transport implementations (spec §4.2:
//! "SMTP sends multipart HTML+plain bodies").

use crate::error::{EngineError, EngineResult};
use crate::types::OutgoingMessage;
use lettre::message::{header::ContentType, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

pub struct SmtpSender {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpSender {
    pub fn with_password(host: &str, port: u16, username: &str, password: &str) -> EngineResult<Self> {
        let creds = Credentials::new(username.to_string(), password.to_string());
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(host)
            .map_err(|e| EngineError::other(format!("smtp relay error: {e}")))?
            .port(port)
            .credentials(creds)
            .build();
        Ok(Self { transport })
    }

    pub fn with_oauth_bearer(host: &str, port: u16, username: &str, access_token: &str) -> EngineResult<Self> {
        let creds = Credentials::new(username.to_string(), access_token.to_string());
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(host)
            .map_err(|e| EngineError::other(format!("smtp relay error: {e}")))?
            .port(port)
            .credentials(creds)
            .build();
        Ok(Self { transport })
    }

    /// Build and send a multipart HTML+plain message.
    pub async fn send(&self, message: &OutgoingMessage) -> EngineResult<()> {
        let mut builder = Message::builder()
            .from(message.from.parse::<Mailbox>().map_err(|e| EngineError::parse(e.to_string()))?)
            .subject(derive_subject(message));

        for to in &message.to {
            builder = builder.to(to.parse::<Mailbox>().map_err(|e| EngineError::parse(e.to_string()))?);
        }
        if let Some(in_reply_to) = &message.in_reply_to {
            builder = builder.in_reply_to(in_reply_to.clone());
        }

        let email = if let Some(html) = &message.body_html {
            builder
                .multipart(
                    MultiPart::alternative()
                        .singlepart(
                            SinglePart::builder()
                                .header(ContentType::TEXT_PLAIN)
                                .body(message.body_plain.clone()),
                        )
                        .singlepart(
                            SinglePart::builder()
                                .header(ContentType::TEXT_HTML)
                                .body(html.clone()),
                        ),
                )
                .map_err(|e| EngineError::other(e.to_string()))?
        } else {
            builder
                .header(ContentType::TEXT_PLAIN)
                .body(message.body_plain.clone())
                .map_err(|e| EngineError::other(e.to_string()))?
        };

        self.transport
            .send(email)
            .await
            .map_err(EngineError::Smtp)?;
        Ok(())
    }
}

fn derive_subject(message: &OutgoingMessage) -> String {
    if message.subject.is_empty() {
        "(no subject)".to_string()
    } else {
        message.subject.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_placeholder_subject_when_empty() {
        let message = OutgoingMessage {
            from: "a@example.com".to_string(),
            to: vec!["b@example.com".to_string()],
            subject: String::new(),
            body_html: None,
            body_plain: "hi".to_string(),
            in_reply_to: None,
        };
        assert_eq!(derive_subject(&message), "(no subject)");
    }
}
