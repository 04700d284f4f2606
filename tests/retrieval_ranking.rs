//! Cross-module retrieval scenarios (spec.md §8): semantic ranking against
//! the vector store, and the `today`/`important` chat intent shortcuts
//! against the metadata store. Neither needs the LLM or embedder weights
//! downloaded, so both run without network access.

use chrono::Utc;
use mail_intel_engine::db::MetadataDb;
use ndarray::array;
use mail_intel_engine::embedder::Embedder;
use mail_intel_engine::events::EventBus;
use mail_intel_engine::llm::LlmRuntime;
use mail_intel_engine::retrieval::RetrievalLayer;
use mail_intel_engine::types::{compose_message_id, Insight, Message, Priority};
use mail_intel_engine::vectordb::VectorDb;
use std::sync::Arc;
use uuid::Uuid;

fn sample_message(id: &str, subject: &str, snippet: &str, date: chrono::DateTime<Utc>) -> Message {
    let now = Utc::now();
    Message {
        id: id.to_string(),
        account_id: Uuid::nil(),
        folder: "INBOX".to_string(),
        uid: 1,
        message_id: format!("<{id}@test>"),
        thread_id: format!("<{id}@test>"),
        subject: subject.to_string(),
        from_name: "Sender".to_string(),
        from_address: "sender@example.com".to_string(),
        to: vec!["me@example.com".to_string()],
        date,
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

fn sample_insight(message_id: &str, priority: Priority, score: f32) -> Insight {
    Insight {
        message_id: message_id.to_string(),
        summary: None,
        priority,
        priority_score: score,
        category: Some("general".to_string()),
        insights_blob: None,
        action_items: vec![],
        has_deadline: false,
        has_meeting: false,
        has_financial: false,
        sentiment: None,
        indexed_at: Utc::now(),
    }
}

/// Scenario: stored messages "Invoice #42" (billing), "Team lunch" (social)
/// and "Server outage" (ops); a query vector closest to the billing message
/// should rank it first, matching the hand-written embeddings below.
#[tokio::test]
async fn semantic_search_ranks_nearest_vector_first() {
    let metadata = Arc::new(MetadataDb::open_in_memory().await.unwrap());
    let vectors = Arc::new(VectorDb::open_in_memory().await.unwrap());

    let account_id = Uuid::nil();
    let invoice_id = compose_message_id(account_id, "INBOX", 1);
    let lunch_id = compose_message_id(account_id, "INBOX", 2);
    let outage_id = compose_message_id(account_id, "INBOX", 3);

    metadata
        .store_message(&sample_message(&invoice_id, "Invoice #42", "your invoice is ready", Utc::now()))
        .await
        .unwrap();
    metadata
        .store_message(&sample_message(&lunch_id, "Team lunch", "let's grab lunch Friday", Utc::now()))
        .await
        .unwrap();
    metadata
        .store_message(&sample_message(&outage_id, "Server outage", "prod is down", Utc::now()))
        .await
        .unwrap();

    let model_id = "test-model";
    vectors.upsert(&invoice_id, &array![1.0, 0.0, 0.0], model_id).await.unwrap();
    vectors.upsert(&lunch_id, &array![0.0, 1.0, 0.0], model_id).await.unwrap();
    vectors.upsert(&outage_id, &array![0.0, 0.0, 1.0], model_id).await.unwrap();

    // A "billing document" query vector, closest to the invoice axis.
    let query = array![0.9, 0.1, 0.05];
    let hits = vectors.top_k(&query, 3, model_id).await.unwrap();

    assert_eq!(hits[0].0, invoice_id, "billing-like query should rank the invoice first");
    for message_id in [&lunch_id, &outage_id] {
        assert!(hits.iter().any(|(id, _)| id == message_id));
    }
}

fn retrieval_layer(metadata: Arc<MetadataDb>, vectors: Arc<VectorDb>) -> RetrievalLayer {
    let events = EventBus::new();
    let embedder = Arc::new(Embedder::new(std::env::temp_dir()));
    let llm = Arc::new(LlmRuntime::new(std::env::temp_dir(), events));
    RetrievalLayer::new(metadata, vectors, embedder, llm)
}

/// Scenario: `chat_query("show me important emails")` should take the
/// `important` intent shortcut and surface the HIGH-priority message
/// without ever calling the embedder.
#[tokio::test]
async fn chat_important_shortcut_bypasses_semantic_search() {
    let metadata = Arc::new(MetadataDb::open_in_memory().await.unwrap());
    let vectors = Arc::new(VectorDb::open_in_memory().await.unwrap());

    let account_id = Uuid::nil();
    let urgent_id = compose_message_id(account_id, "INBOX", 1);
    let routine_id = compose_message_id(account_id, "INBOX", 2);

    metadata
        .store_message_and_insight(
            &sample_message(&urgent_id, "URGENT: contract review", "please review asap", Utc::now()),
            &sample_insight(&urgent_id, Priority::High, 0.9),
        )
        .await
        .unwrap();
    metadata
        .store_message_and_insight(
            &sample_message(&routine_id, "Weekly digest", "here's your digest", Utc::now()),
            &sample_insight(&routine_id, Priority::Low, 0.2),
        )
        .await
        .unwrap();

    let retrieval = retrieval_layer(Arc::clone(&metadata), Arc::clone(&vectors));
    let response = retrieval.chat("show me important emails", 5).await.unwrap();

    assert!(response.contains("URGENT: contract review"));
    assert!(!response.contains("Weekly digest"));
}

/// Scenario: the `today` intent shortcut surfaces only messages dated since
/// local midnight, regardless of priority.
#[tokio::test]
async fn chat_today_shortcut_filters_by_date() {
    let metadata = Arc::new(MetadataDb::open_in_memory().await.unwrap());
    let vectors = Arc::new(VectorDb::open_in_memory().await.unwrap());

    let account_id = Uuid::nil();
    let today_id = compose_message_id(account_id, "INBOX", 1);
    let yesterday_id = compose_message_id(account_id, "INBOX", 2);

    let yesterday = Utc::now() - chrono::Duration::days(1);

    metadata
        .store_message(&sample_message(&today_id, "Today's standup notes", "notes", Utc::now()))
        .await
        .unwrap();
    metadata
        .store_message(&sample_message(&yesterday_id, "Old thread", "old", yesterday))
        .await
        .unwrap();

    let retrieval = retrieval_layer(metadata, vectors);
    let response = retrieval.chat("what came in today?", 5).await.unwrap();

    assert!(response.contains("Today's standup notes"));
    assert!(!response.contains("Old thread"));
}
