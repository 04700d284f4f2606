//! Command Surface (C10, spec §4.10/§6): the facade that multiplexes every
//! shell-facing operation into C2/C3/C4/C5/C6/C7/C8, matching the reference
//! engine's single-facade-struct pattern.

use crate::config::{AppPaths, Settings};
use crate::credentials::CredentialStore;
use crate::db::MetadataDb;
use crate::embedder::Embedder;
use crate::error::{EngineError, EngineResult};
use crate::events::EventBus;
use crate::llm::{LlmRuntime, ModelDescriptor};
use crate::oauth::{OAuthManager, RefreshedToken};
use crate::pipeline::EnrichmentPipeline;
use crate::retrieval::{RetrievalLayer, SearchHit};
use crate::transport::imap::{ImapAuth, ImapTransport};
use crate::transport::native::NativeTransport;
use crate::transport::MailTransport;
use crate::types::{
    Account, AuthKind, CredentialKind, EmbeddingState, Flag, IndexingState, Insight, Message,
    OutgoingMessage, Provider,
};
use crate::vectordb::VectorDb;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Placeholder endpoint for the one native-API provider (spec §6, "Native
/// mail API over HTTPS with bearer tokens"); a real deployment would read
/// this from configuration per tenant.
const NATIVE_API_BASE_URL: &str = "https://api.native-provider.example/v1";
const DEFAULT_RAG_K: usize = 5;

/// Credential material supplied when an account is added, before it's
/// persisted into the credential store.
#[derive(Debug, Clone)]
pub enum AccountCredential {
    Password(String),
    OAuth {
        access_token: String,
        refresh_token: Option<String>,
        expires_at: chrono::DateTime<Utc>,
    },
}

/// Everything needed to provision a new account (spec §6, `add_account`).
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub address: String,
    pub display_name: String,
    pub provider: Provider,
    pub imap_host: Option<String>,
    pub imap_port: Option<u16>,
    pub smtp_host: Option<String>,
    pub smtp_port: Option<u16>,
    pub auth_kind: AuthKind,
    pub credential: AccountCredential,
}

/// The engine facade. Owns every subsystem and exposes one method per
/// command-surface name in spec.md §6.
pub struct Engine {
    paths: AppPaths,
    settings: RwLock<Settings>,
    metadata: Arc<MetadataDb>,
    vectors: Arc<VectorDb>,
    credentials: Arc<CredentialStore>,
    oauth: Arc<OAuthManager>,
    llm: Arc<LlmRuntime>,
    embedder: Arc<Embedder>,
    pipeline: Arc<EnrichmentPipeline>,
    retrieval: RetrievalLayer,
    events: EventBus,
    background: RwLock<HashMap<Uuid, CancellationToken>>,
}

impl Engine {
    /// Open every persisted component at the shared application-data path
    /// (spec §8, "Path Agreement") and wire the pipeline/retrieval layers.
    pub async fn new(paths: AppPaths) -> EngineResult<Arc<Self>> {
        paths.ensure_dirs().await?;
        let events = EventBus::new();
        let settings = Settings::load_or_default(&paths.settings_file()).await?;

        let metadata = Arc::new(MetadataDb::open(&paths.metadata_db_path()).await?);
        let vectors = Arc::new(VectorDb::open(&paths.vector_db_path()).await?);
        let oauth = Arc::new(OAuthManager::new());
        let credentials = Arc::new(CredentialStore::open(&paths, Arc::clone(&oauth)).await?);
        let llm = Arc::new(LlmRuntime::new(paths.models_dir(), events.clone()));
        let embedder = Arc::new(Embedder::new(paths.models_dir()));

        let pipeline = Arc::new(EnrichmentPipeline::new(
            Arc::clone(&metadata),
            Arc::clone(&vectors),
            Arc::clone(&llm),
            Arc::clone(&embedder),
            events.clone(),
        ));
        let retrieval = RetrievalLayer::new(
            Arc::clone(&metadata),
            Arc::clone(&vectors),
            Arc::clone(&embedder),
            Arc::clone(&llm),
        );

        Ok(Arc::new(Self {
            paths,
            settings: RwLock::new(settings),
            metadata,
            vectors,
            credentials,
            oauth,
            llm,
            embedder,
            pipeline,
            retrieval,
            events,
            background: RwLock::new(HashMap::new()),
        }))
    }

    pub fn events(&self) -> EventBus {
        self.events.clone()
    }

    // ---- Credential-backed transport resolution ------------------------

    async fn transport_for(&self, account: &Account) -> EngineResult<Box<dyn MailTransport>> {
        match account.provider {
            Provider::Native => {
                let token = self
                    .credentials
                    .get(account.id, CredentialKind::OauthAccess)
                    .await?
                    .ok_or_else(|| EngineError::auth_required(account.id.to_string()))?;
                Ok(Box::new(NativeTransport::new(NATIVE_API_BASE_URL, account.id, token)))
            }
            Provider::ImapA | Provider::ImapB | Provider::Custom => {
                let host = account
                    .imap_host
                    .clone()
                    .ok_or_else(|| EngineError::other("account is missing an imap_host"))?;
                let port = account.imap_port.unwrap_or(993);

                let auth = match account.auth_kind {
                    AuthKind::AppPassword => {
                        let password = self
                            .credentials
                            .get(account.id, CredentialKind::AppPassword)
                            .await?
                            .ok_or_else(|| EngineError::auth_required(account.id.to_string()))?;
                        ImapAuth::Password(password)
                    }
                    AuthKind::Oauth => {
                        let token = self
                            .credentials
                            .get(account.id, CredentialKind::OauthAccess)
                            .await?
                            .ok_or_else(|| EngineError::auth_required(account.id.to_string()))?;
                        ImapAuth::OAuthBearer(token)
                    }
                };
                Ok(Box::new(ImapTransport::new(host, port, account.address.clone(), auth, account.id)))
            }
        }
    }

    async fn get_account(&self, account_id: Uuid) -> EngineResult<Account> {
        self.metadata
            .list_accounts()
            .await?
            .into_iter()
            .find(|a| a.id == account_id)
            .ok_or_else(|| EngineError::not_found("account", account_id.to_string()))
    }

    // ---- Account lifecycle ----------------------------------------------

    /// Store the account + its credential, and start its IMAP IDLE /
    /// native-poll push task (spec §4.2).
    pub async fn add_account(&self, new_account: NewAccount) -> EngineResult<Account> {
        let account = Account {
            id: Uuid::new_v4(),
            address: new_account.address,
            display_name: new_account.display_name,
            provider: new_account.provider,
            imap_host: new_account.imap_host,
            imap_port: new_account.imap_port,
            smtp_host: new_account.smtp_host,
            smtp_port: new_account.smtp_port,
            auth_kind: new_account.auth_kind,
            is_active: false,
            created_at: Utc::now(),
            last_synced_at: None,
        };
        self.metadata.store_account(&account).await?;
        self.store_credential(account.id, new_account.credential).await?;
        self.spawn_account_tasks(&account).await?;
        Ok(account)
    }

    async fn store_credential(&self, account_id: Uuid, credential: AccountCredential) -> EngineResult<()> {
        match credential {
            AccountCredential::Password(secret) => {
                self.credentials
                    .put(
                        account_id,
                        CredentialKind::AppPassword,
                        crate::credentials::StoredSecret {
                            secret,
                            expires_at: None,
                        },
                    )
                    .await
            }
            AccountCredential::OAuth {
                access_token,
                refresh_token,
                expires_at,
            } => {
                self.credentials
                    .put(
                        account_id,
                        CredentialKind::OauthAccess,
                        crate::credentials::StoredSecret {
                            secret: access_token,
                            expires_at: Some(expires_at),
                        },
                    )
                    .await?;
                if let Some(refresh_token) = refresh_token {
                    self.credentials
                        .put(
                            account_id,
                            CredentialKind::OauthRefresh,
                            crate::credentials::StoredSecret {
                                secret: refresh_token,
                                expires_at: None,
                            },
                        )
                        .await?;
                }
                Ok(())
            }
        }
    }

    async fn spawn_account_tasks(&self, account: &Account) -> EngineResult<()> {
        let transport: Arc<dyn MailTransport> = Arc::from(self.transport_for(account).await?);
        let cancel = CancellationToken::new();
        let folder = "INBOX".to_string();

        let idle_transport = Arc::clone(&transport);
        let idle_events = self.events.clone();
        let idle_cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = idle_transport.idle_loop(&folder, idle_events, idle_cancel).await {
                tracing::warn!(error = %e, "account push loop ended");
            }
        });

        let reactor_pipeline = Arc::clone(&self.pipeline);
        let reactor_cancel = cancel.clone();
        let reactor_account_id = account.id;
        tokio::spawn(reactor_pipeline.react_to_new_mail(
            transport,
            reactor_account_id,
            "INBOX".to_string(),
            reactor_cancel,
        ));

        self.background.write().await.insert(account.id, cancel);
        Ok(())
    }

    /// Alias matching spec.md's `sign_in` name: add the account and make it
    /// the active one.
    pub async fn sign_in(&self, new_account: NewAccount) -> EngineResult<Account> {
        let account = self.add_account(new_account).await?;
        self.metadata.set_active_account(account.id).await?;
        Ok(self.get_account(account.id).await?)
    }

    /// Destroy the account: cancel its background tasks, wipe its
    /// credentials, and cascade-delete its messages (spec §3, "destroyed on
    /// sign-out").
    pub async fn sign_out(&self, account_id: Uuid) -> EngineResult<()> {
        self.remove_account(account_id).await
    }

    pub async fn remove_account(&self, account_id: Uuid) -> EngineResult<()> {
        if let Some(cancel) = self.background.write().await.remove(&account_id) {
            cancel.cancel();
        }
        let _ = self.credentials.delete(account_id, CredentialKind::AppPassword).await;
        let _ = self.credentials.delete(account_id, CredentialKind::OauthAccess).await;
        let _ = self.credentials.delete(account_id, CredentialKind::OauthRefresh).await;
        self.metadata.remove_account(account_id).await
    }

    pub async fn list_accounts(&self) -> EngineResult<Vec<Account>> {
        self.metadata.list_accounts().await
    }

    pub async fn set_active_account(&self, account_id: Uuid) -> EngineResult<()> {
        self.metadata.set_active_account(account_id).await
    }

    // ---- Interactive OAuth sign-in (consumed by the shell before `sign_in`) ---

    /// Register the shell's OAuth client for a provider; required once per
    /// provider before `oauth_authorize_url` can be called for it.
    pub async fn oauth_register_client(
        &self,
        provider: Provider,
        client_id: String,
        redirect_uri: String,
    ) -> EngineResult<()> {
        self.oauth.register_client(provider, client_id, redirect_uri).await
    }

    /// Build the PKCE authorization URL the shell should open in a browser
    /// or webview; the interactive consent screen itself is out of scope.
    pub async fn oauth_authorize_url(&self, provider: Provider) -> EngineResult<(String, String)> {
        self.oauth.authorize_url(provider).await
    }

    /// Exchange the code from the OAuth redirect for tokens, ready to be
    /// passed into `add_account`/`sign_in` as an `AccountCredential::OAuth`.
    pub async fn oauth_exchange_code(
        &self,
        provider: Provider,
        code: String,
        csrf_state: &str,
    ) -> EngineResult<RefreshedToken> {
        self.oauth.exchange_code(provider, code, csrf_state).await
    }

    // ---- Mail operations --------------------------------------------------

    /// Run a bounded indexing pass against live server state (spec §6,
    /// `fetch_emails`): the shell-facing "refresh" action.
    pub async fn fetch_emails(&self, account_id: Uuid, folder: &str, max_messages: usize) -> EngineResult<()> {
        self.start_email_indexing(account_id, folder, max_messages).await
    }

    pub async fn get_email(&self, message_id: &str) -> EngineResult<Option<Message>> {
        self.metadata.get_message(message_id).await
    }

    pub async fn send_email(&self, account_id: Uuid, message: OutgoingMessage) -> EngineResult<()> {
        let account = self.get_account(account_id).await?;
        let transport = self.transport_for(&account).await?;
        transport.send(&message).await
    }

    async fn set_message_flags(
        &self,
        message_id: &str,
        add: Vec<Flag>,
        remove: Vec<Flag>,
    ) -> EngineResult<()> {
        let (account_id, folder, uid) = crate::types::split_message_id(message_id)
            .ok_or_else(|| EngineError::parse("malformed message id"))?;
        let account = self.get_account(account_id).await?;
        let transport = self.transport_for(&account).await?;
        transport.set_flags(&folder, uid, add.clone(), remove.clone()).await?;

        if let Some(mut message) = self.metadata.get_message(message_id).await? {
            if add.contains(&Flag::Seen) {
                message.is_read = true;
            }
            if remove.contains(&Flag::Seen) {
                message.is_read = false;
            }
            if add.contains(&Flag::Flagged) {
                message.is_starred = true;
            }
            if remove.contains(&Flag::Flagged) {
                message.is_starred = false;
            }
            message.updated_at = Utc::now();
            self.metadata.store_message(&message).await?;
        }
        Ok(())
    }

    pub async fn mark_read(&self, message_id: &str, read: bool) -> EngineResult<()> {
        if read {
            self.set_message_flags(message_id, vec![Flag::Seen], vec![]).await
        } else {
            self.set_message_flags(message_id, vec![], vec![Flag::Seen]).await
        }
    }

    pub async fn star(&self, message_id: &str, starred: bool) -> EngineResult<()> {
        if starred {
            self.set_message_flags(message_id, vec![Flag::Flagged], vec![]).await
        } else {
            self.set_message_flags(message_id, vec![], vec![Flag::Flagged]).await
        }
    }

    async fn move_to_folder(&self, message_id: &str, target_folder: &str) -> EngineResult<()> {
        let (account_id, folder, uid) = crate::types::split_message_id(message_id)
            .ok_or_else(|| EngineError::parse("malformed message id"))?;
        let account = self.get_account(account_id).await?;
        let transport = self.transport_for(&account).await?;
        transport.move_message(&folder, uid, target_folder).await
    }

    pub async fn archive(&self, message_id: &str) -> EngineResult<()> {
        self.move_to_folder(message_id, "Archive").await
    }

    pub async fn trash(&self, message_id: &str) -> EngineResult<()> {
        self.move_to_folder(message_id, "Trash").await
    }

    // ---- Database / settings ----------------------------------------------

    /// Metadata/vector DBs are opened (and migrated) eagerly in `Engine::new`;
    /// this command is therefore a readiness confirmation rather than a
    /// separate initialization step.
    pub async fn init_database(&self) -> EngineResult<()> {
        Ok(())
    }

    pub async fn settings(&self) -> Settings {
        self.settings.read().await.clone()
    }

    pub async fn update_settings(&self, settings: Settings) -> EngineResult<()> {
        settings.save(&self.paths.settings_file()).await?;
        *self.settings.write().await = settings;
        Ok(())
    }

    // ---- Retrieval ----------------------------------------------------------

    pub async fn get_smart_inbox(&self, limit: i64, offset: i64) -> EngineResult<Vec<(Message, Insight)>> {
        self.retrieval.smart_inbox(limit, offset).await
    }

    pub async fn get_emails_by_category(&self, category: &str, limit: i64) -> EngineResult<Vec<(Message, Insight)>> {
        self.retrieval.by_category(category, limit).await
    }

    pub async fn search_smart_emails(&self, query: &str, limit: i64) -> EngineResult<Vec<Message>> {
        self.retrieval.keyword_search(query, limit, 0).await
    }

    // ---- Indexing pipeline ---------------------------------------------------

    pub async fn get_indexing_status(&self) -> EngineResult<IndexingState> {
        self.metadata.get_indexing_state().await
    }

    pub async fn reset_indexing_status(&self) -> EngineResult<()> {
        self.metadata.reset_indexing_state().await
    }

    pub async fn start_email_indexing(&self, account_id: Uuid, folder: &str, max_messages: usize) -> EngineResult<()> {
        let account = self.get_account(account_id).await?;
        let transport = self.transport_for(&account).await?;
        let cancel = CancellationToken::new();
        self.pipeline
            .start_indexing(transport.as_ref(), account_id, folder, max_messages, &cancel)
            .await
    }

    // ---- RAG / embeddings -----------------------------------------------------

    /// Readiness check for the RAG surface: the embedder must have its
    /// weights downloaded.
    pub async fn init_rag(&self) -> EngineResult<()> {
        if self.embedder.is_ready() {
            Ok(())
        } else {
            Err(EngineError::model_unavailable("embedder weights are not downloaded"))
        }
    }

    pub fn is_rag_ready(&self) -> bool {
        self.embedder.is_ready()
    }

    pub async fn get_embedding_status(&self) -> EngineResult<EmbeddingState> {
        self.vectors.get_embedding_state().await
    }

    pub async fn embed_all_emails(&self) -> EngineResult<()> {
        self.pipeline.embed_all().await
    }

    pub async fn search_emails_semantic(&self, query: &str, k: usize) -> EngineResult<Vec<SearchHit>> {
        self.retrieval.semantic_search(query, k).await
    }

    pub async fn find_similar_emails(&self, message_id: &str, k: usize) -> EngineResult<Vec<SearchHit>> {
        self.retrieval.neighbors(message_id, k).await
    }

    pub async fn chat_query(&self, query: &str) -> EngineResult<String> {
        self.retrieval.chat(query, DEFAULT_RAG_K).await
    }

    pub async fn chat_with_context(&self, query: &str, k: usize) -> EngineResult<String> {
        self.retrieval.chat(query, k).await
    }

    pub async fn clear_embeddings(&self) -> EngineResult<()> {
        self.vectors.clear().await
    }

    // ---- Model management -------------------------------------------------------

    pub async fn check_model_status(&self, model_id: &str) -> EngineResult<bool> {
        Ok(self
            .llm
            .list_downloaded()
            .await?
            .iter()
            .any(|m| m.id == model_id))
    }

    pub async fn download_model(&self, model_id: &str) -> EngineResult<()> {
        self.llm.download(model_id).await
    }

    pub async fn activate_model(&self, model_id: &str) -> EngineResult<()> {
        self.llm.activate(model_id).await
    }

    pub async fn delete_model(&self, model_id: &str) -> EngineResult<()> {
        self.llm.delete(model_id).await
    }

    pub fn get_available_ai_models(&self) -> Vec<ModelDescriptor> {
        self.llm.list_available()
    }

    pub async fn get_downloaded_models(&self) -> EngineResult<Vec<ModelDescriptor>> {
        self.llm.list_downloaded().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fresh_engine_has_no_accounts() {
        let dir = tempfile::tempdir().unwrap();
        let paths = AppPaths::at(dir.path());
        let engine = Engine::new(paths).await.unwrap();
        assert!(engine.list_accounts().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn init_database_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let paths = AppPaths::at(dir.path());
        let engine = Engine::new(paths).await.unwrap();
        engine.init_database().await.unwrap();
        engine.init_database().await.unwrap();
    }

    #[tokio::test]
    async fn rag_not_ready_without_downloaded_embedder() {
        let dir = tempfile::tempdir().unwrap();
        let paths = AppPaths::at(dir.path());
        let engine = Engine::new(paths).await.unwrap();
        assert!(!engine.is_rag_ready());
        let err = engine.init_rag().await.unwrap_err();
        assert!(matches!(err, EngineError::ModelUnavailable { .. }));
    }
}
