//! Process entry point (spec.md §2, SPEC_FULL.md §4 C10): boots the engine
//! and exposes its command surface as line-delimited JSON on stdin/stdout.
//! Scaffolding for running and testing the engine standalone; the GUI shell
//! itself is out of scope.

use anyhow::Context;
use mail_intel_engine::engine::{AccountCredential, NewAccount};
use mail_intel_engine::{init_logging, AppPaths, Engine};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

#[derive(Debug, Deserialize)]
struct Request {
    id: Value,
    cmd: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Serialize)]
struct Response {
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let paths = AppPaths::resolve().context("resolving application data directory")?;
    let engine = Engine::new(paths).await.context("starting engine")?;

    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => handle(Arc::clone(&engine), request).await,
            Err(e) => Response {
                id: Value::Null,
                result: None,
                error: Some(format!("malformed request: {e}")),
            },
        };
        let mut payload = serde_json::to_vec(&response)?;
        payload.push(b'\n');
        stdout.write_all(&payload).await?;
        stdout.flush().await?;
    }
    Ok(())
}

async fn handle(engine: Arc<Engine>, request: Request) -> Response {
    let id = request.id.clone();
    match dispatch(engine, request).await {
        Ok(result) => Response {
            id,
            result: Some(result),
            error: None,
        },
        Err(e) => Response {
            id,
            result: None,
            error: Some(e.to_string()),
        },
    }
}

async fn dispatch(engine: Arc<Engine>, request: Request) -> anyhow::Result<Value> {
    let args = request.args;
    Ok(match request.cmd.as_str() {
        "list_accounts" => serde_json::to_value(engine.list_accounts().await?)?,
        "add_account" | "sign_in" => {
            let new_account: NewAccountWire = serde_json::from_value(args)?;
            let account = if request.cmd == "sign_in" {
                engine.sign_in(new_account.into()).await?
            } else {
                engine.add_account(new_account.into()).await?
            };
            serde_json::to_value(account)?
        }
        "sign_out" | "remove_account" => {
            let account_id: uuid::Uuid = serde_json::from_value(args["account_id"].clone())?;
            engine.remove_account(account_id).await?;
            Value::Null
        }
        "set_active_account" => {
            let account_id: uuid::Uuid = serde_json::from_value(args["account_id"].clone())?;
            engine.set_active_account(account_id).await?;
            Value::Null
        }
        "oauth_register_client" => {
            let provider: mail_intel_engine::types::Provider = serde_json::from_value(args["provider"].clone())?;
            let client_id = args["client_id"].as_str().context("client_id is required")?.to_string();
            let redirect_uri = args["redirect_uri"].as_str().context("redirect_uri is required")?.to_string();
            engine.oauth_register_client(provider, client_id, redirect_uri).await?;
            Value::Null
        }
        "oauth_authorize_url" => {
            let provider: mail_intel_engine::types::Provider = serde_json::from_value(args["provider"].clone())?;
            let (url, csrf_state) = engine.oauth_authorize_url(provider).await?;
            serde_json::json!({ "url": url, "csrf_state": csrf_state })
        }
        "oauth_exchange_code" => {
            let provider: mail_intel_engine::types::Provider = serde_json::from_value(args["provider"].clone())?;
            let code = args["code"].as_str().context("code is required")?.to_string();
            let csrf_state = args["csrf_state"].as_str().context("csrf_state is required")?;
            let token = engine.oauth_exchange_code(provider, code, csrf_state).await?;
            serde_json::json!({
                "access_token": token.access_token,
                "refresh_token": token.refresh_token,
                "expires_at": token.expires_at,
            })
        }
        "init_database" => {
            engine.init_database().await?;
            Value::Null
        }
        "get_email" => {
            let message_id = args["message_id"].as_str().context("message_id is required")?;
            serde_json::to_value(engine.get_email(message_id).await?)?
        }
        "mark_read" => {
            let message_id = args["message_id"].as_str().context("message_id is required")?;
            let read = args["read"].as_bool().unwrap_or(true);
            engine.mark_read(message_id, read).await?;
            Value::Null
        }
        "star" => {
            let message_id = args["message_id"].as_str().context("message_id is required")?;
            let starred = args["starred"].as_bool().unwrap_or(true);
            engine.star(message_id, starred).await?;
            Value::Null
        }
        "archive" => {
            let message_id = args["message_id"].as_str().context("message_id is required")?;
            engine.archive(message_id).await?;
            Value::Null
        }
        "trash" => {
            let message_id = args["message_id"].as_str().context("message_id is required")?;
            engine.trash(message_id).await?;
            Value::Null
        }
        "fetch_emails" | "start_email_indexing" => {
            let account_id: uuid::Uuid = serde_json::from_value(args["account_id"].clone())?;
            let folder = args["folder"].as_str().unwrap_or("INBOX");
            let max_messages = args["max_messages"].as_u64().unwrap_or(200) as usize;
            engine.start_email_indexing(account_id, folder, max_messages).await?;
            Value::Null
        }
        "get_indexing_status" => serde_json::to_value(engine.get_indexing_status().await?)?,
        "reset_indexing_status" => {
            engine.reset_indexing_status().await?;
            Value::Null
        }
        "get_smart_inbox" => {
            let limit = args["limit"].as_i64().unwrap_or(50);
            let offset = args["offset"].as_i64().unwrap_or(0);
            serde_json::to_value(engine.get_smart_inbox(limit, offset).await?)?
        }
        "get_emails_by_category" => {
            let category = args["category"].as_str().context("category is required")?;
            let limit = args["limit"].as_i64().unwrap_or(50);
            serde_json::to_value(engine.get_emails_by_category(category, limit).await?)?
        }
        "search_smart_emails" => {
            let query = args["query"].as_str().context("query is required")?;
            let limit = args["limit"].as_i64().unwrap_or(50);
            serde_json::to_value(engine.search_smart_emails(query, limit).await?)?
        }
        "init_rag" => {
            engine.init_rag().await?;
            Value::Null
        }
        "is_rag_ready" => Value::Bool(engine.is_rag_ready()),
        "get_embedding_status" => serde_json::to_value(engine.get_embedding_status().await?)?,
        "embed_all_emails" => {
            engine.embed_all_emails().await?;
            Value::Null
        }
        "clear_embeddings" => {
            engine.clear_embeddings().await?;
            Value::Null
        }
        "search_emails_semantic" => {
            let query = args["query"].as_str().context("query is required")?;
            let k = args["k"].as_u64().unwrap_or(10) as usize;
            serde_json::to_value(hits_to_value(engine.search_emails_semantic(query, k).await?))?
        }
        "find_similar_emails" => {
            let message_id = args["message_id"].as_str().context("message_id is required")?;
            let k = args["k"].as_u64().unwrap_or(10) as usize;
            serde_json::to_value(hits_to_value(engine.find_similar_emails(message_id, k).await?))?
        }
        "chat_query" => {
            let query = args["query"].as_str().context("query is required")?;
            Value::String(engine.chat_query(query).await?)
        }
        "chat_with_context" => {
            let query = args["query"].as_str().context("query is required")?;
            let k = args["k"].as_u64().unwrap_or(5) as usize;
            Value::String(engine.chat_with_context(query, k).await?)
        }
        "get_available_ai_models" => serde_json::to_value(engine.get_available_ai_models())?,
        "get_downloaded_models" => serde_json::to_value(engine.get_downloaded_models().await?)?,
        "check_model_status" => {
            let model_id = args["model_id"].as_str().context("model_id is required")?;
            Value::Bool(engine.check_model_status(model_id).await?)
        }
        "download_model" => {
            let model_id = args["model_id"].as_str().context("model_id is required")?;
            engine.download_model(model_id).await?;
            Value::Null
        }
        "activate_model" => {
            let model_id = args["model_id"].as_str().context("model_id is required")?;
            engine.activate_model(model_id).await?;
            Value::Null
        }
        "delete_model" => {
            let model_id = args["model_id"].as_str().context("model_id is required")?;
            engine.delete_model(model_id).await?;
            Value::Null
        }
        other => anyhow::bail!("unknown command: {other}"),
    })
}

fn hits_to_value(hits: Vec<mail_intel_engine::retrieval::SearchHit>) -> Value {
    serde_json::to_value(
        hits.into_iter()
            .map(|h| serde_json::json!({ "message": h.message, "similarity": h.similarity }))
            .collect::<Vec<_>>(),
    )
    .unwrap_or(Value::Null)
}

/// Wire shape for `add_account`/`sign_in` request bodies.
#[derive(Debug, Deserialize)]
struct NewAccountWire {
    address: String,
    display_name: String,
    provider: mail_intel_engine::types::Provider,
    imap_host: Option<String>,
    imap_port: Option<u16>,
    smtp_host: Option<String>,
    smtp_port: Option<u16>,
    auth_kind: mail_intel_engine::types::AuthKind,
    credential: CredentialWire,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum CredentialWire {
    Password {
        secret: String,
    },
    Oauth {
        access_token: String,
        refresh_token: Option<String>,
        expires_at: chrono::DateTime<chrono::Utc>,
    },
}

impl From<NewAccountWire> for NewAccount {
    fn from(wire: NewAccountWire) -> Self {
        let credential = match wire.credential {
            CredentialWire::Password { secret } => AccountCredential::Password(secret),
            CredentialWire::Oauth {
                access_token,
                refresh_token,
                expires_at,
            } => AccountCredential::OAuth {
                access_token,
                refresh_token,
                expires_at,
            },
        };
        NewAccount {
            address: wire.address,
            display_name: wire.display_name,
            provider: wire.provider,
            imap_host: wire.imap_host,
            imap_port: wire.imap_port,
            smtp_host: wire.smtp_host,
            smtp_port: wire.smtp_port,
            auth_kind: wire.auth_kind,
            credential,
        }
    }
}
