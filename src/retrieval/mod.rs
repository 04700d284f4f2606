//! Retrieval Layer (C8, spec §4.8): priority inbox, category filter,
//! keyword search, semantic search, and RAG chat.

use crate::db::MetadataDb;
use crate::embedder::Embedder;
use crate::error::EngineResult;
use crate::llm::{GenerateParams, LlmRuntime};
use crate::types::{Insight, Message, Priority};
use crate::vectordb::VectorDb;
use chrono::Utc;
use futures::StreamExt;
use std::sync::Arc;

/// A semantic or keyword hit, enriched with enough metadata to display
/// without a follow-up lookup.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub message: Message,
    pub similarity: Option<f32>,
}

pub struct RetrievalLayer {
    metadata: Arc<MetadataDb>,
    vectors: Arc<VectorDb>,
    embedder: Arc<Embedder>,
    llm: Arc<LlmRuntime>,
}

impl RetrievalLayer {
    pub fn new(
        metadata: Arc<MetadataDb>,
        vectors: Arc<VectorDb>,
        embedder: Arc<Embedder>,
        llm: Arc<LlmRuntime>,
    ) -> Self {
        Self {
            metadata,
            vectors,
            embedder,
            llm,
        }
    }

    pub async fn smart_inbox(&self, limit: i64, offset: i64) -> EngineResult<Vec<(Message, Insight)>> {
        self.metadata.smart_inbox(limit, offset).await
    }

    pub async fn by_category(&self, category: &str, limit: i64) -> EngineResult<Vec<(Message, Insight)>> {
        self.metadata.by_category(category, limit).await
    }

    pub async fn keyword_search(&self, query: &str, limit: i64, offset: i64) -> EngineResult<Vec<Message>> {
        self.metadata.keyword_search(query, limit, offset).await
    }

    pub async fn semantic_search(&self, query: &str, k: usize) -> EngineResult<Vec<SearchHit>> {
        let vector = self.embedder.encode(query).await?;
        let hits = self.vectors.top_k(&vector, k, self.embedder.model_id()).await?;
        self.enrich(hits).await
    }

    pub async fn neighbors(&self, message_id: &str, k: usize) -> EngineResult<Vec<SearchHit>> {
        let hits = self.vectors.neighbors(message_id, k, self.embedder.model_id()).await?;
        self.enrich(hits).await
    }

    async fn enrich(&self, hits: Vec<(String, f32)>) -> EngineResult<Vec<SearchHit>> {
        let mut enriched = Vec::with_capacity(hits.len());
        for (id, similarity) in hits {
            if let Some(message) = self.metadata.get_message(&id).await? {
                enriched.push(SearchHit {
                    message,
                    similarity: Some(similarity),
                });
            }
        }
        Ok(enriched)
    }

    /// Retrieval-augmented chat (spec §4.8): semantic search for context,
    /// compose a grounded prompt, call the LLM, or fall back to a
    /// deterministic templated summary when no model is active.
    pub async fn chat(&self, query: &str, k: usize) -> EngineResult<String> {
        let hits = self.query_with_intent_shortcuts(query, k).await?;

        if !self.llm.is_active().await {
            return Ok(fallback_chat_response(&hits));
        }

        let prompt = compose_chat_prompt(query, &hits);
        let params = GenerateParams {
            max_tokens: 300,
            ..GenerateParams::default()
        };

        let mut stream = self.llm.generate(prompt, params).await?;
        let mut answer = String::new();
        while let Some(token) = stream.next().await {
            answer.push_str(&token);
        }
        Ok(answer)
    }

    /// Apply `today`/`important` intent shortcuts before falling through to
    /// the keyword+semantic blend (spec §4.8).
    async fn query_with_intent_shortcuts(&self, query: &str, k: usize) -> EngineResult<Vec<SearchHit>> {
        let lower = query.to_lowercase();

        if lower.contains("today") {
            let midnight = Utc::now()
                .date_naive()
                .and_hms_opt(0, 0, 0)
                .expect("midnight is always a valid time")
                .and_utc();
            let messages = self.metadata.messages_with_date_since(midnight).await?;
            return Ok(messages
                .into_iter()
                .take(k)
                .map(|message| SearchHit {
                    message,
                    similarity: None,
                })
                .collect());
        }

        if lower.contains("important") {
            let pairs = self.metadata.messages_by_priority(Priority::High).await?;
            return Ok(pairs
                .into_iter()
                .take(k)
                .map(|(message, _insight)| SearchHit {
                    message,
                    similarity: None,
                })
                .collect());
        }

        let keyword_hits = self.metadata.keyword_search(query, k as i64, 0).await?;
        let semantic_hits = match self.semantic_search(query, k).await {
            Ok(hits) => hits,
            Err(e) => {
                tracing::debug!(error = %e, "semantic search unavailable, blending keyword-only");
                vec![]
            }
        };
        Ok(blend_hits(semantic_hits, keyword_hits, k))
    }
}

/// Merge semantic hits (ranked, carry a similarity score) with keyword
/// hits (unranked), preferring the semantic copy of a message when both
/// surfaced it, capped at `k` (spec §4.8, "keyword+semantic blend").
fn blend_hits(semantic: Vec<SearchHit>, keyword: Vec<Message>, k: usize) -> Vec<SearchHit> {
    let mut seen = std::collections::HashSet::new();
    let mut blended = Vec::with_capacity(k);

    for hit in semantic {
        if seen.insert(hit.message.id.clone()) {
            blended.push(hit);
        }
    }
    for message in keyword {
        if blended.len() >= k {
            break;
        }
        if seen.insert(message.id.clone()) {
            blended.push(SearchHit {
                message,
                similarity: None,
            });
        }
    }
    blended.truncate(k);
    blended
}

/// Pure function of the retrieved hits and question, independently
/// testable without a live model.
fn compose_chat_prompt(query: &str, hits: &[SearchHit]) -> String {
    let mut context = String::new();
    for hit in hits {
        context.push_str(&format!(
            "- {} (from {}): {}\n",
            hit.message.subject, hit.message.from_address, hit.message.snippet
        ));
    }
    format!(
        "You are an email assistant. Use only the context below to answer the question.\n\n\
         Context:\n{context}\nQuestion: {query}\nAnswer:"
    )
}

/// Deterministic templated summary used when no model is active (spec
/// §4.8 step 5).
fn fallback_chat_response(hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return "No matching emails found.".to_string();
    }
    let mut lines = vec![format!("Found {} relevant email(s):", hits.len())];
    for hit in hits {
        lines.push(format!("- {} (from {})", hit.message.subject, hit.message.from_address));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::compose_message_id;
    use uuid::Uuid;

    fn sample_message(subject: &str, snippet: &str) -> Message {
        sample_message_with_uid(1, subject, snippet)
    }

    fn sample_message_with_uid(uid: u32, subject: &str, snippet: &str) -> Message {
        let now = Utc::now();
        let account_id = Uuid::nil();
        Message {
            id: compose_message_id(account_id, "INBOX", uid),
            account_id,
            folder: "INBOX".to_string(),
            uid,
            message_id: format!("<m{uid}@test>"),
            thread_id: format!("<m{uid}@test>"),
            subject: subject.to_string(),
            from_name: "Billing".to_string(),
            from_address: "billing@example.com".to_string(),
            to: vec!["me@example.com".to_string()],
            date: now,
            snippet: snippet.to_string(),
            body_html: None,
            body_plain: Some(snippet.to_string()),
            is_read: false,
            is_starred: false,
            has_attachments: false,
            labels: vec![],
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn fallback_response_lists_subjects() {
        let hits = vec![SearchHit {
            message: sample_message("Invoice #42", "your invoice is ready"),
            similarity: Some(0.9),
        }];
        let response = fallback_chat_response(&hits);
        assert!(response.contains("Invoice #42"));
    }

    #[test]
    fn fallback_response_handles_empty_hits() {
        assert_eq!(fallback_chat_response(&[]), "No matching emails found.");
    }

    #[test]
    fn blend_prefers_semantic_copy_and_dedups() {
        let shared = sample_message_with_uid(1, "Invoice #42", "your invoice is ready");
        let keyword_only = sample_message_with_uid(2, "Invoice follow-up", "reminder");

        let semantic = vec![SearchHit {
            message: shared.clone(),
            similarity: Some(0.8),
        }];
        let keyword = vec![shared, keyword_only];

        let blended = blend_hits(semantic, keyword, 5);

        assert_eq!(blended.len(), 2);
        assert_eq!(blended[0].similarity, Some(0.8));
        assert!(blended.iter().any(|h| h.message.subject == "Invoice follow-up"));
    }

    #[test]
    fn blend_truncates_to_k() {
        let keyword = (1..=5)
            .map(|uid| sample_message_with_uid(uid, &format!("Subject {uid}"), "body"))
            .collect();
        let blended = blend_hits(vec![], keyword, 3);
        assert_eq!(blended.len(), 3);
    }

    #[test]
    fn chat_prompt_includes_question_and_context() {
        let hits = vec![SearchHit {
            message: sample_message("Invoice #42", "your invoice is ready"),
            similarity: Some(0.9),
        }];
        let prompt = compose_chat_prompt("what do I owe?", &hits);
        assert!(prompt.contains("what do I owe?"));
        assert!(prompt.contains("Invoice #42"));
    }
}
