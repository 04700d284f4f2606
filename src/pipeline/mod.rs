//! Enrichment Pipeline (C7, spec §4.7): fetch → store → summarize → score →
//! categorize → embed, with progress events and per-item fault tolerance.
//! The pipeline never wedges on a missing LLM — every step has a
//! deterministic fallback (spec §5, "Liveness").

pub mod rules;

use crate::db::MetadataDb;
use crate::embedder::Embedder;
use crate::error::{EngineError, EngineResult};
use crate::events::{Event, EventBus};
use crate::llm::{GenerateParams, LlmRuntime};
use crate::transport::MailTransport;
use crate::types::{Insight, IndexingState, EmbeddingState, Priority};
use crate::vectordb::VectorDb;
use chrono::Utc;
use futures::StreamExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Incremental indexing passes triggered by `mail:new` are capped at this
/// many messages so a burst of push notifications can't balloon into a full
/// re-index (spec §4.7, "New-mail reaction").
const NEW_MAIL_REACTION_MAX: usize = 50;

pub struct EnrichmentPipeline {
    metadata: Arc<MetadataDb>,
    vectors: Arc<VectorDb>,
    llm: Arc<LlmRuntime>,
    embedder: Arc<Embedder>,
    events: EventBus,
    indexing_lock: tokio::sync::Mutex<()>,
    embedding_lock: tokio::sync::Mutex<()>,
}

impl EnrichmentPipeline {
    pub fn new(
        metadata: Arc<MetadataDb>,
        vectors: Arc<VectorDb>,
        llm: Arc<LlmRuntime>,
        embedder: Arc<Embedder>,
        events: EventBus,
    ) -> Self {
        Self {
            metadata,
            vectors,
            llm,
            embedder,
            events,
            indexing_lock: tokio::sync::Mutex::new(()),
            embedding_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Drive a full indexing pass for one account+folder, up to
    /// `max_messages` headers. Rejects with `Busy` if a pass is already
    /// running (spec §4.7, §8 "Singleton guard").
    pub async fn start_indexing(
        &self,
        transport: &dyn MailTransport,
        account_id: Uuid,
        folder: &str,
        max_messages: usize,
        cancel: &CancellationToken,
    ) -> EngineResult<()> {
        let _permit = self
            .indexing_lock
            .try_lock()
            .map_err(|_| EngineError::busy("indexing is already running"))?;

        self.metadata
            .set_indexing_state(&IndexingState {
                is_running: true,
                total: 0,
                processed: 0,
                last_run_at: None,
                error: None,
            })
            .await?;
        self.events.publish(Event::IndexingStarted);

        let result = self
            .run_indexing(transport, account_id, folder, max_messages, cancel)
            .await;

        match &result {
            Ok(()) => {
                self.metadata
                    .set_indexing_state(&IndexingState {
                        is_running: false,
                        total: 0,
                        processed: 0,
                        last_run_at: Some(Utc::now()),
                        error: None,
                    })
                    .await?;
                self.events.publish(Event::IndexingComplete);

                if self.embedder.is_ready() {
                    if let Err(e) = self.embed_all().await {
                        tracing::warn!(error = %e, "auto-embed after indexing failed");
                    }
                }
            }
            Err(e) => {
                self.metadata
                    .set_indexing_state(&IndexingState {
                        is_running: false,
                        total: 0,
                        processed: 0,
                        last_run_at: Some(Utc::now()),
                        error: Some(e.to_string()),
                    })
                    .await?;
                self.events.publish(Event::IndexingError {
                    message: e.to_string(),
                });
            }
        }

        result
    }

    async fn run_indexing(
        &self,
        transport: &dyn MailTransport,
        account_id: Uuid,
        folder: &str,
        max_messages: usize,
        cancel: &CancellationToken,
    ) -> EngineResult<()> {
        let headers = transport.fetch_headers(folder, None).await?;
        let headers: Vec<_> = headers.into_iter().take(max_messages).collect();
        let total = headers.len() as i64;

        self.metadata
            .set_indexing_state(&IndexingState {
                is_running: true,
                total,
                processed: 0,
                last_run_at: None,
                error: None,
            })
            .await?;

        for (index, header) in headers.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }

            if let Err(e) = self.index_one(transport, account_id, folder, header).await {
                tracing::warn!(uid = header.uid, error = %e, "skipping message after enrichment failure");
            }

            let processed = (index + 1) as i64;
            self.metadata
                .set_indexing_state(&IndexingState {
                    is_running: true,
                    total,
                    processed,
                    last_run_at: None,
                    error: None,
                })
                .await?;
            let percent = if total == 0 {
                100
            } else {
                ((processed as f64 / total as f64) * 100.0).min(100.0) as u8
            };
            self.events.publish(Event::IndexingProgress { percent });
        }

        Ok(())
    }

    async fn index_one(
        &self,
        transport: &dyn MailTransport,
        _account_id: Uuid,
        folder: &str,
        header: &crate::transport::MessageHeader,
    ) -> EngineResult<()> {
        let mut message = transport.fetch_full(folder, header.uid).await?;
        message.thread_id = self.resolve_thread_id(header).await?;
        let body = message.body_plain.clone().unwrap_or_default();

        let score = rules::priority_score(&message.subject, &body, message.is_starred);
        let category = rules::categorize(
            &message.subject,
            &body,
            &message.from_address,
            header.in_reply_to.is_some(),
        );
        let flags = rules::insight_flags(&message.subject, &body);
        let summary = self.summarize(&message.subject, &message.from_address, &body).await;

        let insight = Insight {
            message_id: message.id.clone(),
            summary,
            priority: Priority::from_score(score),
            priority_score: score,
            category: Some(category.to_string()),
            insights_blob: None,
            action_items: Vec::new(),
            has_deadline: flags.has_deadline,
            has_meeting: flags.has_meeting,
            has_financial: flags.has_financial,
            sentiment: None,
            indexed_at: Utc::now(),
        };

        self.metadata.store_message_and_insight(&message, &insight).await
    }

    /// Thread-id derivation (spec §4.2): server-supplied id first, then the
    /// earliest known ancestor via `In-Reply-To`/`References`, falling back
    /// to the message's own id. `derive_thread_id` is a pure function of its
    /// arguments, so the async ancestor lookup is pre-fetched into a map here
    /// and handed in as a synchronous closure.
    async fn resolve_thread_id(&self, header: &crate::transport::MessageHeader) -> EngineResult<String> {
        let ancestors = crate::transport::threading::candidate_ancestors(
            header.in_reply_to.as_deref(),
            &header.references,
        );

        let mut known = std::collections::HashMap::new();
        for ancestor in &ancestors {
            if let Some(thread_id) = self.metadata.thread_id_for_message_id(ancestor).await? {
                known.insert(*ancestor, thread_id);
            }
        }

        Ok(crate::transport::threading::derive_thread_id(
            header.thread_id.as_deref(),
            &header.message_id,
            header.in_reply_to.as_deref(),
            &header.references,
            |id| known.get(id).cloned(),
        ))
    }

    /// LLM summary when a model is active, keyword fallback otherwise
    /// (spec §4.5 fallback path; §4.7 step e).
    async fn summarize(&self, subject: &str, from: &str, body: &str) -> Option<String> {
        if !self.llm.is_active().await {
            return Some(rules::fallback_summary(body));
        }

        let word_count = body.split_whitespace().count();
        let max_tokens = rules::summary_max_tokens(word_count);
        let family = self.llm.active_family().await.unwrap_or(crate::llm::ModelFamily::Generic);
        let prompt = family.format(
            "Summarize the following email in one or two sentences.",
            &format!("Subject: {subject}\nFrom: {from}\n\n{body}"),
        );

        let params = GenerateParams {
            max_tokens,
            ..GenerateParams::default()
        };

        match self.llm.generate(prompt, params).await {
            Ok(mut stream) => {
                let mut out = String::new();
                while let Some(token) = stream.next().await {
                    out.push_str(&token);
                }
                Some(out)
            }
            Err(e) => {
                tracing::warn!(error = %e, "llm summarization failed, using fallback");
                Some(rules::fallback_summary(body))
            }
        }
    }

    /// Embed every message missing a vector for the active embedder model
    /// (spec §4.7).
    pub async fn embed_all(&self) -> EngineResult<()> {
        let _permit = self
            .embedding_lock
            .try_lock()
            .map_err(|_| EngineError::busy("embedding is already running"))?;

        let model_id = self.embedder.model_id().to_string();
        let all_ids = self.metadata.all_message_ids().await?;
        let embedded = self.vectors.embedded_ids(&model_id).await?;
        let missing: Vec<String> = all_ids.into_iter().filter(|id| !embedded.contains(id)).collect();
        let total = missing.len();

        self.vectors
            .set_embedding_state(&EmbeddingState {
                is_running: true,
                total: total as i64,
                embedded: 0,
                current_model: Some(model_id.clone()),
                last_run_at: None,
                error: None,
            })
            .await?;
        self.events.publish(Event::EmbeddingStarted { total });

        let mut done = 0usize;
        for id in missing {
            match self.embed_one(&id, &model_id).await {
                Ok(()) => {
                    done += 1;
                    self.events.publish(Event::EmbeddingProgress {
                        total,
                        done,
                        id: id.clone(),
                    });
                }
                Err(e) => {
                    tracing::warn!(message_id = %id, error = %e, "skipping message after embedding failure");
                }
            }
            self.vectors
                .set_embedding_state(&EmbeddingState {
                    is_running: true,
                    total: total as i64,
                    embedded: done as i64,
                    current_model: Some(model_id.clone()),
                    last_run_at: None,
                    error: None,
                })
                .await?;
        }

        self.vectors
            .set_embedding_state(&EmbeddingState {
                is_running: false,
                total: total as i64,
                embedded: done as i64,
                current_model: Some(model_id),
                last_run_at: Some(Utc::now()),
                error: None,
            })
            .await?;
        self.events.publish(Event::EmbeddingComplete { count: done });
        Ok(())
    }

    async fn embed_one(&self, message_id: &str, model_id: &str) -> EngineResult<()> {
        let message = self
            .metadata
            .get_message(message_id)
            .await?
            .ok_or_else(|| EngineError::not_found("message", message_id))?;

        let text = format!(
            "{}\n{}\n{}",
            message.subject,
            message.from_address,
            message.body_plain.as_deref().unwrap_or("").chars().take(2000).collect::<String>()
        );
        let vector = self.embedder.encode(&text).await?;
        self.vectors.upsert(message_id, &vector, model_id).await
    }

    /// Subscribe to `mail:new` for one account+folder and trigger a bounded
    /// incremental indexing pass whenever it fires (spec §4.7, "New-mail
    /// reaction"). Runs until `cancel` fires.
    pub async fn react_to_new_mail(
        self: Arc<Self>,
        transport: Arc<dyn MailTransport>,
        account_id: Uuid,
        folder: String,
        cancel: CancellationToken,
    ) {
        let mut receiver = self.events.subscribe();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                event = receiver.recv() => {
                    match event {
                        Ok(Event::MailNew { account_id: evt_account, folder: evt_folder })
                            if evt_account == account_id && evt_folder == folder =>
                        {
                            if let Err(e) = self
                                .start_indexing(transport.as_ref(), account_id, &folder, NEW_MAIL_REACTION_MAX, &cancel)
                                .await
                            {
                                if !matches!(e, EngineError::Busy { .. }) {
                                    tracing::warn!(error = %e, "new-mail reaction indexing failed");
                                }
                            }
                        }
                        Ok(_) => {}
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OutgoingMessage, Flag, Message};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FakeTransport {
        messages: Vec<(u32, String, String, bool)>, // uid, subject, body, starred
    }

    #[async_trait]
    impl MailTransport for FakeTransport {
        async fn list_folders(&self) -> EngineResult<Vec<String>> {
            Ok(vec!["INBOX".to_string()])
        }

        async fn fetch_headers(
            &self,
            _folder: &str,
            _since_uid: Option<u32>,
        ) -> EngineResult<Vec<crate::transport::MessageHeader>> {
            Ok(self
                .messages
                .iter()
                .map(|(uid, subject, _, starred)| crate::transport::MessageHeader {
                    uid: *uid,
                    message_id: format!("<{uid}@test>"),
                    thread_id: None,
                    in_reply_to: None,
                    references: vec![],
                    subject: subject.clone(),
                    from_name: "Sender".to_string(),
                    from_address: "sender@example.com".to_string(),
                    to: vec!["me@example.com".to_string()],
                    date: Utc::now(),
                    is_read: false,
                    is_starred: *starred,
                    has_attachments: false,
                })
                .collect())
        }

        async fn fetch_full(&self, folder: &str, uid: u32) -> EngineResult<Message> {
            let (_, subject, body, starred) = self
                .messages
                .iter()
                .find(|(u, _, _, _)| *u == uid)
                .expect("uid present");
            let account_id = Uuid::nil();
            let now = Utc::now();
            Ok(Message {
                id: crate::types::compose_message_id(account_id, folder, uid),
                account_id,
                folder: folder.to_string(),
                uid,
                message_id: format!("<{uid}@test>"),
                thread_id: format!("<{uid}@test>"),
                subject: subject.clone(),
                from_name: "Sender".to_string(),
                from_address: "sender@example.com".to_string(),
                to: vec!["me@example.com".to_string()],
                date: now,
                snippet: body.chars().take(50).collect(),
                body_html: None,
                body_plain: Some(body.clone()),
                is_read: false,
                is_starred: *starred,
                has_attachments: false,
                labels: vec![],
                created_at: now,
                updated_at: now,
            })
        }

        async fn set_flags(&self, _folder: &str, _uid: u32, _add: Vec<Flag>, _remove: Vec<Flag>) -> EngineResult<()> {
            Ok(())
        }

        async fn move_message(&self, _folder: &str, _uid: u32, _to_folder: &str) -> EngineResult<()> {
            Ok(())
        }

        async fn send(&self, _message: &OutgoingMessage) -> EngineResult<()> {
            Ok(())
        }
    }

    async fn pipeline_with_temp_stores() -> (EnrichmentPipeline, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let metadata = Arc::new(MetadataDb::open_in_memory().await.unwrap());
        let vectors = Arc::new(VectorDb::open_in_memory().await.unwrap());
        let events = EventBus::new();
        let llm = Arc::new(LlmRuntime::new(dir.path().join("models"), events.clone()));
        let embedder = Arc::new(Embedder::new(dir.path().join("models")));
        let pipeline = EnrichmentPipeline::new(metadata, vectors, llm, embedder, events);
        (pipeline, dir)
    }

    #[tokio::test]
    async fn pipeline_liveness_without_llm() {
        let (pipeline, _dir) = pipeline_with_temp_stores().await;
        let account_id = Uuid::nil();
        let transport = FakeTransport {
            messages: (0..5)
                .map(|i| (i, format!("Subject {i}"), format!("body {i}"), false))
                .collect(),
        };

        let cancel = CancellationToken::new();
        pipeline
            .start_indexing(&transport, account_id, "INBOX", 10, &cancel)
            .await
            .unwrap();

        for i in 0..5u32 {
            let id = crate::types::compose_message_id(account_id, "INBOX", i);
            assert!(pipeline.metadata.get_message(&id).await.unwrap().is_some());
            assert!(pipeline.metadata.get_insight(&id).await.unwrap().is_some());
        }
    }

    #[tokio::test]
    async fn concurrent_start_indexing_second_caller_gets_busy() {
        let (pipeline, _dir) = pipeline_with_temp_stores().await;
        let pipeline = Arc::new(pipeline);
        let account_id = Uuid::nil();

        let _guard = pipeline.indexing_lock.try_lock().unwrap();
        let transport = FakeTransport { messages: vec![] };
        let cancel = CancellationToken::new();
        let err = pipeline
            .start_indexing(&transport, account_id, "INBOX", 10, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Busy { .. }));
    }

    #[tokio::test]
    async fn high_priority_scenario_end_to_end() {
        let (pipeline, _dir) = pipeline_with_temp_stores().await;
        let account_id = Uuid::nil();
        let transport = FakeTransport {
            messages: vec![(1, "URGENT: review deck ASAP".to_string(), "please review".to_string(), true)],
        };
        let cancel = CancellationToken::new();
        pipeline
            .start_indexing(&transport, account_id, "INBOX", 10, &cancel)
            .await
            .unwrap();

        let id = crate::types::compose_message_id(account_id, "INBOX", 1);
        let insight = pipeline.metadata.get_insight(&id).await.unwrap().unwrap();
        assert_eq!(insight.priority, Priority::High);
        assert!((insight.priority_score - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn progress_monotonic_and_reaches_complete() {
        let (pipeline, _dir) = pipeline_with_temp_stores().await;
        let account_id = Uuid::nil();
        let transport = FakeTransport {
            messages: (0..3)
                .map(|i| (i, format!("Subject {i}"), "body".to_string(), false))
                .collect(),
        };
        let mut receiver = pipeline.events.subscribe();
        let cancel = CancellationToken::new();

        let pipeline = Arc::new(pipeline);
        let p2 = Arc::clone(&pipeline);
        let handle = tokio::spawn(async move {
            p2.start_indexing(&transport, account_id, "INBOX", 10, &cancel).await
        });

        let mut last_pct: Option<u8> = None;
        let mut saw_complete = false;
        let last = AtomicU32::new(0);
        while let Ok(event) = receiver.recv().await {
            match event {
                Event::IndexingProgress { percent } => {
                    if let Some(last) = last_pct {
                        assert!(percent >= last);
                    }
                    last_pct = Some(percent);
                    last.store(percent as u32, Ordering::SeqCst);
                }
                Event::IndexingComplete => {
                    saw_complete = true;
                    break;
                }
                _ => {}
            }
        }
        handle.await.unwrap().unwrap();
        assert!(saw_complete);
        assert_eq!(last_pct, Some(100));
    }
}
