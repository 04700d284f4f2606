//! Schema for the metadata database (C3, spec §4.3). Applied once at
//! start-up; idempotent via `CREATE TABLE IF NOT EXISTS`.

use crate::error::EngineResult;
use sqlx::SqlitePool;

pub async fn run(pool: &SqlitePool) -> EngineResult<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS accounts (
            id TEXT PRIMARY KEY,
            address TEXT NOT NULL,
            display_name TEXT NOT NULL,
            provider TEXT NOT NULL,
            imap_host TEXT,
            imap_port INTEGER,
            smtp_host TEXT,
            smtp_port INTEGER,
            auth_kind TEXT NOT NULL,
            is_active INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            last_synced_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS messages (
            id TEXT PRIMARY KEY,
            account_id TEXT NOT NULL,
            folder TEXT NOT NULL,
            uid INTEGER NOT NULL,
            message_id TEXT NOT NULL,
            thread_id TEXT NOT NULL,
            subject TEXT NOT NULL,
            from_name TEXT NOT NULL,
            from_address TEXT NOT NULL,
            to_addresses TEXT NOT NULL,
            date TEXT NOT NULL,
            snippet TEXT NOT NULL,
            body_html TEXT,
            body_plain TEXT,
            is_read INTEGER NOT NULL,
            is_starred INTEGER NOT NULL,
            has_attachments INTEGER NOT NULL,
            labels TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY (account_id) REFERENCES accounts (id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_date ON messages (date DESC)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_thread ON messages (thread_id)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS insights (
            message_id TEXT PRIMARY KEY,
            summary TEXT,
            priority TEXT NOT NULL,
            priority_score REAL NOT NULL,
            category TEXT,
            insights_blob TEXT,
            action_items TEXT NOT NULL,
            has_deadline INTEGER NOT NULL,
            has_meeting INTEGER NOT NULL,
            has_financial INTEGER NOT NULL,
            sentiment TEXT,
            indexed_at TEXT NOT NULL,
            FOREIGN KEY (message_id) REFERENCES messages (id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_insights_priority ON insights (priority_score DESC)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_insights_category ON insights (category)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS indexing_state (
            singleton INTEGER PRIMARY KEY CHECK (singleton = 0),
            is_running INTEGER NOT NULL,
            total INTEGER NOT NULL,
            processed INTEGER NOT NULL,
            last_run_at TEXT,
            error TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "INSERT OR IGNORE INTO indexing_state (singleton, is_running, total, processed, last_run_at, error) \
         VALUES (0, 0, 0, 0, NULL, NULL)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
