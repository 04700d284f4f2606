//! Core entity types (spec §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Mail provider tag on an `Account`. Names are deliberately generic: one
/// native-API provider, two IMAP-based presets, and a fully custom IMAP/SMTP
/// configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Native,
    ImapA,
    ImapB,
    Custom,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Native => "native",
            Self::ImapA => "imap_a",
            Self::ImapB => "imap_b",
            Self::Custom => "custom",
        }
    }

    /// Whether this provider talks the native HTTPS API instead of IMAP/SMTP.
    pub fn is_native(&self) -> bool {
        matches!(self, Self::Native)
    }
}

impl std::str::FromStr for Provider {
    type Err = crate::error::EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "native" => Ok(Self::Native),
            "imap_a" => Ok(Self::ImapA),
            "imap_b" => Ok(Self::ImapB),
            "custom" => Ok(Self::Custom),
            other => Err(crate::error::EngineError::other(format!(
                "unknown provider: {other}"
            ))),
        }
    }
}

/// Authentication mechanism used by an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthKind {
    Oauth,
    AppPassword,
}

/// A configured mailbox identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub address: String,
    pub display_name: String,
    pub provider: Provider,
    pub imap_host: Option<String>,
    pub imap_port: Option<u16>,
    pub smtp_host: Option<String>,
    pub smtp_port: Option<u16>,
    pub auth_kind: AuthKind,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub last_synced_at: Option<DateTime<Utc>>,
}

/// Kind of secret stored in the credential store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    OauthAccess,
    OauthRefresh,
    AppPassword,
}

impl CredentialKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OauthAccess => "oauth_access",
            Self::OauthRefresh => "oauth_refresh",
            Self::AppPassword => "app_password",
        }
    }
}

/// IMAP flags relevant to `set_flags`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Flag {
    Seen,
    Flagged,
    Deleted,
    Answered,
}

impl Flag {
    pub fn imap_name(&self) -> &'static str {
        match self {
            Self::Seen => "\\Seen",
            Self::Flagged => "\\Flagged",
            Self::Deleted => "\\Deleted",
            Self::Answered => "\\Answered",
        }
    }
}

/// The disambiguating composite identifier for a message: `{account_id}:{folder}:{uid}`.
pub fn compose_message_id(account_id: Uuid, folder: &str, uid: u32) -> String {
    format!("{account_id}:{folder}:{uid}")
}

/// Split a composite message id back into its parts. Folder names containing
/// `:` are preserved by splitting only on the first and last colon.
pub fn split_message_id(id: &str) -> Option<(Uuid, String, u32)> {
    let first = id.find(':')?;
    let last = id.rfind(':')?;
    if first == last {
        return None;
    }
    let account_id = Uuid::parse_str(&id[..first]).ok()?;
    let folder = id[first + 1..last].to_string();
    let uid: u32 = id[last + 1..].parse().ok()?;
    Some((account_id, folder, uid))
}

/// A stored email message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// `{account_id}:{folder}:{uid}`
    pub id: String,
    pub account_id: Uuid,
    pub folder: String,
    pub uid: u32,
    pub message_id: String,
    pub thread_id: String,
    pub subject: String,
    pub from_name: String,
    pub from_address: String,
    pub to: Vec<String>,
    pub date: DateTime<Utc>,
    pub snippet: String,
    pub body_html: Option<String>,
    pub body_plain: Option<String>,
    pub is_read: bool,
    pub is_starred: bool,
    pub has_attachments: bool,
    pub labels: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Priority bucket. Total and monotone over `priority_score` (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    /// Bucket a clamped `[0,1]` score. `HIGH ⇔ score ≥ 0.7`,
    /// `MEDIUM ⇔ 0.4 ≤ score < 0.7`, `LOW ⇔ score < 0.4`.
    pub fn from_score(score: f32) -> Self {
        if score >= 0.7 {
            Priority::High
        } else if score >= 0.4 {
            Priority::Medium
        } else {
            Priority::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "HIGH",
            Priority::Medium => "MEDIUM",
            Priority::Low => "LOW",
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = crate::error::EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HIGH" => Ok(Priority::High),
            "MEDIUM" => Ok(Priority::Medium),
            "LOW" => Ok(Priority::Low),
            other => Err(crate::error::EngineError::other(format!(
                "unknown priority: {other}"
            ))),
        }
    }
}

/// The engine's derived per-message annotation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Insight {
    pub message_id: String,
    pub summary: Option<String>,
    pub priority: Priority,
    pub priority_score: f32,
    pub category: Option<String>,
    pub insights_blob: Option<String>,
    pub action_items: Vec<String>,
    pub has_deadline: bool,
    pub has_meeting: bool,
    pub has_financial: bool,
    pub sentiment: Option<String>,
    pub indexed_at: DateTime<Utc>,
}

/// A fixed-dimension dense vector for a message, independent of `Insight`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub message_id: String,
    pub vector: Vec<f32>,
    pub model_id: String,
    pub created_at: DateTime<Utc>,
}

/// Singleton indexing-run state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexingState {
    pub is_running: bool,
    pub total: i64,
    pub processed: i64,
    pub last_run_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// Singleton embedding-run state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmbeddingState {
    pub is_running: bool,
    pub total: i64,
    pub embedded: i64,
    pub current_model: Option<String>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// A fully-composed outgoing message (send path).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub body_html: Option<String>,
    pub body_plain: String,
    pub in_reply_to: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_id_roundtrips() {
        let account_id = Uuid::new_v4();
        let id = compose_message_id(account_id, "INBOX", 42);
        let (a, folder, uid) = split_message_id(&id).unwrap();
        assert_eq!(a, account_id);
        assert_eq!(folder, "INBOX");
        assert_eq!(uid, 42);
    }

    #[test]
    fn message_id_preserves_folder_with_colon() {
        let account_id = Uuid::new_v4();
        let id = compose_message_id(account_id, "Archive:2024", 7);
        let (_, folder, uid) = split_message_id(&id).unwrap();
        assert_eq!(folder, "Archive:2024");
        assert_eq!(uid, 7);
    }

    #[test]
    fn priority_totality_and_monotonicity() {
        let samples = [0.0_f32, 0.1, 0.39, 0.4, 0.5, 0.69, 0.7, 0.9, 1.0];
        let mut last_rank = 0;
        for s in samples {
            let p = Priority::from_score(s);
            let rank = match p {
                Priority::Low => 0,
                Priority::Medium => 1,
                Priority::High => 2,
            };
            assert!(rank >= last_rank);
            last_rank = rank;
        }
    }

    #[test]
    fn priority_thresholds_are_exact() {
        assert_eq!(Priority::from_score(0.7), Priority::High);
        assert!(matches!(Priority::from_score(0.6999), Priority::Medium));
        assert_eq!(Priority::from_score(0.4), Priority::Medium);
        assert!(matches!(Priority::from_score(0.3999), Priority::Low));
    }
}
