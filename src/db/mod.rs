//! Metadata DB (C3, spec §4.3): relational store for accounts, messages,
//! insights and indexing status. Exclusively owns the relational file —
//! never creates tables belonging to the vector DB.

mod migrations;

use crate::error::{EngineError, EngineResult};
use crate::types::*;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;
use tokio::sync::Mutex;
use uuid::Uuid;

/// The metadata store. Holds a single process-wide connection (pool capped
/// at one connection) behind an additional mutex so that multi-statement
/// steps — e.g. "store message, then store insight" — run as one
/// uninterrupted critical section (spec §5).
pub struct MetadataDb {
    pool: SqlitePool,
    write_lock: Mutex<()>,
}

impl MetadataDb {
    pub async fn open(path: &Path) -> EngineResult<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        migrations::run(&pool).await?;
        Ok(Self {
            pool,
            write_lock: Mutex::new(()),
        })
    }

    #[cfg(test)]
    pub async fn open_in_memory() -> EngineResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        migrations::run(&pool).await?;
        Ok(Self {
            pool,
            write_lock: Mutex::new(()),
        })
    }

    // ---- Accounts ----------------------------------------------------

    pub async fn store_account(&self, account: &Account) -> EngineResult<()> {
        let _guard = self.write_lock.lock().await;
        if account.is_active {
            sqlx::query("UPDATE accounts SET is_active = 0")
                .execute(&self.pool)
                .await?;
        }
        sqlx::query(
            r#"
            INSERT INTO accounts (id, address, display_name, provider, imap_host, imap_port,
                smtp_host, smtp_port, auth_kind, is_active, created_at, last_synced_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                address = excluded.address,
                display_name = excluded.display_name,
                is_active = excluded.is_active,
                last_synced_at = excluded.last_synced_at
            "#,
        )
        .bind(account.id.to_string())
        .bind(&account.address)
        .bind(&account.display_name)
        .bind(account.provider.as_str())
        .bind(&account.imap_host)
        .bind(account.imap_port.map(|p| p as i64))
        .bind(&account.smtp_host)
        .bind(account.smtp_port.map(|p| p as i64))
        .bind(format!("{:?}", account.auth_kind))
        .bind(account.is_active)
        .bind(account.created_at.to_rfc3339())
        .bind(account.last_synced_at.map(|d| d.to_rfc3339()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_accounts(&self) -> EngineResult<Vec<Account>> {
        let rows = sqlx::query("SELECT * FROM accounts ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_account).collect()
    }

    pub async fn set_active_account(&self, account_id: Uuid) -> EngineResult<()> {
        let _guard = self.write_lock.lock().await;
        let exists = sqlx::query("SELECT 1 FROM accounts WHERE id = ?")
            .bind(account_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        if exists.is_none() {
            return Err(EngineError::not_found("account", account_id.to_string()));
        }
        sqlx::query("UPDATE accounts SET is_active = 0")
            .execute(&self.pool)
            .await?;
        sqlx::query("UPDATE accounts SET is_active = 1 WHERE id = ?")
            .bind(account_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn remove_account(&self, account_id: Uuid) -> EngineResult<()> {
        let _guard = self.write_lock.lock().await;
        sqlx::query("DELETE FROM accounts WHERE id = ?")
            .bind(account_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ---- Messages + Insights ------------------------------------------

    /// Idempotent on `m.id`: a second call updates mutable fields but
    /// preserves `created_at` (spec §4.3, Testable Properties §8).
    pub async fn store_message(&self, message: &Message) -> EngineResult<()> {
        let _guard = self.write_lock.lock().await;
        self.store_message_locked(message).await
    }

    async fn store_message_locked(&self, message: &Message) -> EngineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO messages (id, account_id, folder, uid, message_id, thread_id, subject,
                from_name, from_address, to_addresses, date, snippet, body_html, body_plain,
                is_read, is_starred, has_attachments, labels, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                is_read = excluded.is_read,
                is_starred = excluded.is_starred,
                has_attachments = excluded.has_attachments,
                labels = excluded.labels,
                body_html = excluded.body_html,
                body_plain = excluded.body_plain,
                snippet = excluded.snippet,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&message.id)
        .bind(message.account_id.to_string())
        .bind(&message.folder)
        .bind(message.uid as i64)
        .bind(&message.message_id)
        .bind(&message.thread_id)
        .bind(&message.subject)
        .bind(&message.from_name)
        .bind(&message.from_address)
        .bind(serde_json::to_string(&message.to)?)
        .bind(message.date.to_rfc3339())
        .bind(&message.snippet)
        .bind(&message.body_html)
        .bind(&message.body_plain)
        .bind(message.is_read)
        .bind(message.is_starred)
        .bind(message.has_attachments)
        .bind(serde_json::to_string(&message.labels)?)
        .bind(message.created_at.to_rfc3339())
        .bind(message.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_message(&self, id: &str) -> EngineResult<Option<Message>> {
        let row = sqlx::query("SELECT * FROM messages WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_message(&r)).transpose()
    }

    /// Store the message, then its insight, as a single critical section —
    /// the happens-before ordering required by spec §5.
    pub async fn store_message_and_insight(
        &self,
        message: &Message,
        insight: &Insight,
    ) -> EngineResult<()> {
        let _guard = self.write_lock.lock().await;
        self.store_message_locked(message).await?;
        self.store_insight_locked(insight).await
    }

    pub async fn store_insight(&self, insight: &Insight) -> EngineResult<()> {
        let _guard = self.write_lock.lock().await;
        self.store_insight_locked(insight).await
    }

    async fn store_insight_locked(&self, insight: &Insight) -> EngineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO insights (message_id, summary, priority, priority_score, category,
                insights_blob, action_items, has_deadline, has_meeting, has_financial,
                sentiment, indexed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(message_id) DO UPDATE SET
                summary = excluded.summary,
                priority = excluded.priority,
                priority_score = excluded.priority_score,
                category = excluded.category,
                insights_blob = excluded.insights_blob,
                action_items = excluded.action_items,
                has_deadline = excluded.has_deadline,
                has_meeting = excluded.has_meeting,
                has_financial = excluded.has_financial,
                sentiment = excluded.sentiment,
                indexed_at = excluded.indexed_at
            "#,
        )
        .bind(&insight.message_id)
        .bind(&insight.summary)
        .bind(insight.priority.as_str())
        .bind(insight.priority_score)
        .bind(&insight.category)
        .bind(&insight.insights_blob)
        .bind(serde_json::to_string(&insight.action_items)?)
        .bind(insight.has_deadline)
        .bind(insight.has_meeting)
        .bind(insight.has_financial)
        .bind(&insight.sentiment)
        .bind(insight.indexed_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_insight(&self, message_id: &str) -> EngineResult<Option<Insight>> {
        let row = sqlx::query("SELECT * FROM insights WHERE message_id = ?")
            .bind(message_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_insight(&r)).transpose()
    }

    // ---- Retrieval primitives (consumed by C8) -------------------------

    pub async fn smart_inbox(&self, limit: i64, offset: i64) -> EngineResult<Vec<(Message, Insight)>> {
        let rows = sqlx::query(
            r#"
            SELECT m.*, i.* FROM messages m
            JOIN insights i ON i.message_id = m.id
            ORDER BY i.priority_score DESC, m.date DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| Ok((row_to_message(r)?, row_to_insight(r)?)))
            .collect()
    }

    pub async fn by_category(&self, category: &str, limit: i64) -> EngineResult<Vec<(Message, Insight)>> {
        let rows = sqlx::query(
            r#"
            SELECT m.*, i.* FROM messages m
            JOIN insights i ON i.message_id = m.id
            WHERE i.category = ?
            ORDER BY i.priority_score DESC, m.date DESC
            LIMIT ?
            "#,
        )
        .bind(category)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| Ok((row_to_message(r)?, row_to_insight(r)?)))
            .collect()
    }

    /// Case-insensitive substring match over subject, from, and body.
    pub async fn keyword_search(
        &self,
        query: &str,
        limit: i64,
        offset: i64,
    ) -> EngineResult<Vec<Message>> {
        let pattern = format!("%{}%", query.to_lowercase());
        let rows = sqlx::query(
            r#"
            SELECT * FROM messages
            WHERE lower(subject) LIKE ?
               OR lower(from_address) LIKE ?
               OR lower(from_name) LIKE ?
               OR lower(coalesce(body_plain, '')) LIKE ?
               OR lower(coalesce(body_html, '')) LIKE ?
            ORDER BY date DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(&pattern)
        .bind(&pattern)
        .bind(&pattern)
        .bind(&pattern)
        .bind(&pattern)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_message).collect()
    }

    /// Resolve a raw `Message-ID` header value to the thread id already
    /// recorded for that message, if it has been stored before. Used by the
    /// enrichment pipeline's ancestor walk (spec §4.2 thread-id derivation).
    pub async fn thread_id_for_message_id(&self, message_id: &str) -> EngineResult<Option<String>> {
        let row = sqlx::query("SELECT thread_id FROM messages WHERE message_id = ? LIMIT 1")
            .bind(message_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<String, _>("thread_id")))
    }

    /// All stored message ids, consumed by `embed_all` to compute the set of
    /// messages still missing a vector for the active embedder model.
    pub async fn all_message_ids(&self) -> EngineResult<Vec<String>> {
        let rows = sqlx::query("SELECT id FROM messages")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|r| r.get::<String, _>("id")).collect())
    }

    pub async fn messages_with_date_since(&self, since: DateTime<Utc>) -> EngineResult<Vec<Message>> {
        let rows = sqlx::query("SELECT * FROM messages WHERE date >= ? ORDER BY date DESC")
            .bind(since.to_rfc3339())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_message).collect()
    }

    pub async fn messages_by_priority(&self, priority: Priority) -> EngineResult<Vec<(Message, Insight)>> {
        let rows = sqlx::query(
            r#"
            SELECT m.*, i.* FROM messages m
            JOIN insights i ON i.message_id = m.id
            WHERE i.priority = ?
            ORDER BY m.date DESC
            "#,
        )
        .bind(priority.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| Ok((row_to_message(r)?, row_to_insight(r)?)))
            .collect()
    }

    // ---- Indexing state (singleton) ------------------------------------

    pub async fn get_indexing_state(&self) -> EngineResult<IndexingState> {
        let row = sqlx::query("SELECT * FROM indexing_state WHERE singleton = 0")
            .fetch_one(&self.pool)
            .await?;
        Ok(IndexingState {
            is_running: row.try_get::<i64, _>("is_running")? != 0,
            total: row.try_get("total")?,
            processed: row.try_get("processed")?,
            last_run_at: parse_opt_datetime(row.try_get("last_run_at")?)?,
            error: row.try_get("error")?,
        })
    }

    pub async fn set_indexing_state(&self, state: &IndexingState) -> EngineResult<()> {
        sqlx::query(
            r#"
            UPDATE indexing_state SET is_running = ?, total = ?, processed = ?,
                last_run_at = ?, error = ? WHERE singleton = 0
            "#,
        )
        .bind(state.is_running)
        .bind(state.total)
        .bind(state.processed)
        .bind(state.last_run_at.map(|d| d.to_rfc3339()))
        .bind(&state.error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Recover a stuck `is_running = true` flag (spec §7).
    pub async fn reset_indexing_state(&self) -> EngineResult<()> {
        sqlx::query(
            "UPDATE indexing_state SET is_running = 0, error = NULL WHERE singleton = 0",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ---- Settings -------------------------------------------------------

    pub async fn get_setting(&self, key: &str) -> EngineResult<Option<String>> {
        let row = sqlx::query("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<String, _>("value")))
    }

    pub async fn set_setting(&self, key: &str, value: &str) -> EngineResult<()> {
        sqlx::query(
            "INSERT INTO settings (key, value) VALUES (?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn parse_opt_datetime(value: Option<String>) -> EngineResult<Option<DateTime<Utc>>> {
    value
        .map(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|d| d.with_timezone(&Utc))
                .map_err(|e| EngineError::parse(e.to_string()))
        })
        .transpose()
}

fn row_to_account(row: &sqlx::sqlite::SqliteRow) -> EngineResult<Account> {
    Ok(Account {
        id: Uuid::parse_str(&row.try_get::<String, _>("id")?)
            .map_err(|e| EngineError::parse(e.to_string()))?,
        address: row.try_get("address")?,
        display_name: row.try_get("display_name")?,
        provider: Provider::from_str(&row.try_get::<String, _>("provider")?)?,
        imap_host: row.try_get("imap_host")?,
        imap_port: row.try_get::<Option<i64>, _>("imap_port")?.map(|p| p as u16),
        smtp_host: row.try_get("smtp_host")?,
        smtp_port: row.try_get::<Option<i64>, _>("smtp_port")?.map(|p| p as u16),
        auth_kind: if row.try_get::<String, _>("auth_kind")? == "Oauth" {
            AuthKind::Oauth
        } else {
            AuthKind::AppPassword
        },
        is_active: row.try_get::<i64, _>("is_active")? != 0,
        created_at: DateTime::parse_from_rfc3339(&row.try_get::<String, _>("created_at")?)
            .map_err(|e| EngineError::parse(e.to_string()))?
            .with_timezone(&Utc),
        last_synced_at: parse_opt_datetime(row.try_get("last_synced_at")?)?,
    })
}

fn row_to_message(row: &sqlx::sqlite::SqliteRow) -> EngineResult<Message> {
    Ok(Message {
        id: row.try_get("id")?,
        account_id: Uuid::parse_str(&row.try_get::<String, _>("account_id")?)
            .map_err(|e| EngineError::parse(e.to_string()))?,
        folder: row.try_get("folder")?,
        uid: row.try_get::<i64, _>("uid")? as u32,
        message_id: row.try_get("message_id")?,
        thread_id: row.try_get("thread_id")?,
        subject: row.try_get("subject")?,
        from_name: row.try_get("from_name")?,
        from_address: row.try_get("from_address")?,
        to: serde_json::from_str(&row.try_get::<String, _>("to_addresses")?)?,
        date: DateTime::parse_from_rfc3339(&row.try_get::<String, _>("date")?)
            .map_err(|e| EngineError::parse(e.to_string()))?
            .with_timezone(&Utc),
        snippet: row.try_get("snippet")?,
        body_html: row.try_get("body_html")?,
        body_plain: row.try_get("body_plain")?,
        is_read: row.try_get::<i64, _>("is_read")? != 0,
        is_starred: row.try_get::<i64, _>("is_starred")? != 0,
        has_attachments: row.try_get::<i64, _>("has_attachments")? != 0,
        labels: serde_json::from_str(&row.try_get::<String, _>("labels")?)?,
        created_at: DateTime::parse_from_rfc3339(&row.try_get::<String, _>("created_at")?)
            .map_err(|e| EngineError::parse(e.to_string()))?
            .with_timezone(&Utc),
        updated_at: DateTime::parse_from_rfc3339(&row.try_get::<String, _>("updated_at")?)
            .map_err(|e| EngineError::parse(e.to_string()))?
            .with_timezone(&Utc),
    })
}

fn row_to_insight(row: &sqlx::sqlite::SqliteRow) -> EngineResult<Insight> {
    Ok(Insight {
        message_id: row.try_get("message_id")?,
        summary: row.try_get("summary")?,
        priority: Priority::from_str(&row.try_get::<String, _>("priority")?)?,
        priority_score: row.try_get("priority_score")?,
        category: row.try_get("category")?,
        insights_blob: row.try_get("insights_blob")?,
        action_items: serde_json::from_str(&row.try_get::<String, _>("action_items")?)?,
        has_deadline: row.try_get::<i64, _>("has_deadline")? != 0,
        has_meeting: row.try_get::<i64, _>("has_meeting")? != 0,
        has_financial: row.try_get::<i64, _>("has_financial")? != 0,
        sentiment: row.try_get("sentiment")?,
        indexed_at: DateTime::parse_from_rfc3339(&row.try_get::<String, _>("indexed_at")?)
            .map_err(|e| EngineError::parse(e.to_string()))?
            .with_timezone(&Utc),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_message(account_id: Uuid) -> Message {
        let now = Utc::now();
        Message {
            id: compose_message_id(account_id, "INBOX", 1),
            account_id,
            folder: "INBOX".to_string(),
            uid: 1,
            message_id: "<abc@example.com>".to_string(),
            thread_id: "<abc@example.com>".to_string(),
            subject: "Hello".to_string(),
            from_name: "Alice".to_string(),
            from_address: "alice@example.com".to_string(),
            to: vec!["bob@example.com".to_string()],
            date: now,
            snippet: "hi".to_string(),
            body_html: None,
            body_plain: Some("hi there".to_string()),
            is_read: false,
            is_starred: false,
            has_attachments: false,
            labels: vec![],
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn store_message_is_idempotent_and_preserves_created_at() {
        let db = MetadataDb::open_in_memory().await.unwrap();
        let account_id = Uuid::new_v4();
        let mut m = sample_message(account_id);
        db.store_message(&m).await.unwrap();

        let original_created_at = m.created_at;
        m.is_read = true;
        m.created_at = Utc::now() + chrono::Duration::days(1); // attacker-controlled field, must be ignored
        db.store_message(&m).await.unwrap();

        let stored = db.get_message(&m.id).await.unwrap().unwrap();
        assert!(stored.is_read);
        assert_eq!(stored.created_at.timestamp(), original_created_at.timestamp());

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages")
            .fetch_one(&db.pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn cascade_deletes_insight_with_message() {
        let db = MetadataDb::open_in_memory().await.unwrap();
        let account_id = Uuid::new_v4();
        let account = Account {
            id: account_id,
            address: "a@example.com".into(),
            display_name: "A".into(),
            provider: Provider::Custom,
            imap_host: None,
            imap_port: None,
            smtp_host: None,
            smtp_port: None,
            auth_kind: AuthKind::AppPassword,
            is_active: true,
            created_at: Utc::now(),
            last_synced_at: None,
        };
        db.store_account(&account).await.unwrap();
        let m = sample_message(account_id);
        let insight = Insight {
            message_id: m.id.clone(),
            summary: Some("s".into()),
            priority: Priority::Low,
            priority_score: 0.1,
            category: Some("general".into()),
            insights_blob: None,
            action_items: vec![],
            has_deadline: false,
            has_meeting: false,
            has_financial: false,
            sentiment: None,
            indexed_at: Utc::now(),
        };
        db.store_message_and_insight(&m, &insight).await.unwrap();
        assert!(db.get_insight(&m.id).await.unwrap().is_some());

        db.remove_account(account_id).await.unwrap();
        assert!(db.get_message(&m.id).await.unwrap().is_none());
        assert!(db.get_insight(&m.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn smart_inbox_orders_by_priority_then_date() {
        let db = MetadataDb::open_in_memory().await.unwrap();
        let account_id = Uuid::new_v4();
        for (i, score) in [(1u32, 0.2f32), (2, 0.9), (3, 0.5)] {
            let mut m = sample_message(account_id);
            m.uid = i;
            m.id = compose_message_id(account_id, "INBOX", i);
            db.store_message(&m).await.unwrap();
            let insight = Insight {
                message_id: m.id.clone(),
                summary: None,
                priority: Priority::from_score(score),
                priority_score: score,
                category: None,
                insights_blob: None,
                action_items: vec![],
                has_deadline: false,
                has_meeting: false,
                has_financial: false,
                sentiment: None,
                indexed_at: Utc::now(),
            };
            db.store_insight(&insight).await.unwrap();
        }
        let inbox = db.smart_inbox(10, 0).await.unwrap();
        assert_eq!(inbox[0].1.priority_score, 0.9);
        assert_eq!(inbox.last().unwrap().1.priority_score, 0.2);
    }

    #[tokio::test]
    async fn keyword_search_is_case_insensitive() {
        let db = MetadataDb::open_in_memory().await.unwrap();
        let account_id = Uuid::new_v4();
        let mut m = sample_message(account_id);
        m.subject = "Invoice #42".to_string();
        db.store_message(&m).await.unwrap();
        let hits = db.keyword_search("invoice", 10, 0).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn only_one_account_is_active() {
        let db = MetadataDb::open_in_memory().await.unwrap();
        let a1 = Account {
            id: Uuid::new_v4(),
            address: "a@example.com".into(),
            display_name: "A".into(),
            provider: Provider::Custom,
            imap_host: None,
            imap_port: None,
            smtp_host: None,
            smtp_port: None,
            auth_kind: AuthKind::AppPassword,
            is_active: true,
            created_at: Utc::now(),
            last_synced_at: None,
        };
        let mut a2 = a1.clone();
        a2.id = Uuid::new_v4();
        a2.address = "b@example.com".into();
        db.store_account(&a1).await.unwrap();
        db.store_account(&a2).await.unwrap();
        let active: Vec<_> = db
            .list_accounts()
            .await
            .unwrap()
            .into_iter()
            .filter(|a| a.is_active)
            .collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, a2.id);
    }
}
