use rusqlite::Connection;

/// Current schema version. Bump and append a migration branch in
/// `run_migrations` when the shape changes; there is exactly one version so
/// far so migration is just `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA_VERSION: i64 = 1;

pub fn initialize(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.busy_timeout(std::time::Duration::from_millis(5_000))?;

    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);

        CREATE TABLE IF NOT EXISTS sources (
            id                   INTEGER PRIMARY KEY AUTOINCREMENT,
            municipality         TEXT NOT NULL,
            platform             TEXT NOT NULL,
            base_url             TEXT NOT NULL,
            enabled              INTEGER NOT NULL DEFAULT 1,
            config_json          TEXT NOT NULL,
            last_success_at      TEXT,
            last_attempt_at      TEXT,
            last_error           TEXT,
            consecutive_failures INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS documents (
            id             INTEGER PRIMARY KEY AUTOINCREMENT,
            source_id      INTEGER NOT NULL REFERENCES sources(id),
            external_id    TEXT NOT NULL,
            doc_type       TEXT NOT NULL,
            title          TEXT NOT NULL,
            body           TEXT NOT NULL,
            meeting_date   TEXT,
            published_at   TEXT,
            source_url     TEXT NOT NULL,
            file_urls_json TEXT NOT NULL DEFAULT '[]',
            discovered_at  TEXT NOT NULL,
            content_hash   TEXT,
            status         TEXT NOT NULL,
            retry_count    INTEGER NOT NULL DEFAULT 0,
            claimed_at     TEXT,
            UNIQUE(source_id, external_id)
        );

        CREATE INDEX IF NOT EXISTS idx_documents_status ON documents(status);

        CREATE TABLE IF NOT EXISTS files (
            id             INTEGER PRIMARY KEY AUTOINCREMENT,
            document_id    INTEGER NOT NULL REFERENCES documents(id),
            url            TEXT NOT NULL,
            mime           TEXT,
            byte_len       INTEGER NOT NULL,
            storage_path   TEXT NOT NULL,
            text_status    TEXT NOT NULL DEFAULT 'pending',
            text_content   TEXT NOT NULL DEFAULT ''
        );

        CREATE INDEX IF NOT EXISTS idx_files_document ON files(document_id);

        CREATE TABLE IF NOT EXISTS cases (
            id                INTEGER PRIMARY KEY AUTOINCREMENT,
            primary_category  TEXT NOT NULL,
            headline          TEXT NOT NULL,
            summary           TEXT NOT NULL,
            status            TEXT NOT NULL,
            confidence        TEXT NOT NULL,
            confidence_reason TEXT NOT NULL,
            municipalities    TEXT NOT NULL,
            entities          TEXT NOT NULL,
            locations         TEXT NOT NULL,
            first_seen_at     TEXT NOT NULL,
            updated_at        TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS case_events (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            case_id     INTEGER NOT NULL REFERENCES cases(id),
            event_type  TEXT NOT NULL,
            event_time  TEXT NOT NULL,
            payload     TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS evidence (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            case_id      INTEGER NOT NULL REFERENCES cases(id),
            file_id      INTEGER NOT NULL REFERENCES files(id),
            document_id  INTEGER NOT NULL REFERENCES documents(id),
            page         INTEGER,
            snippet      TEXT NOT NULL,
            source_url   TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS llm_usage (
            id                 INTEGER PRIMARY KEY AUTOINCREMENT,
            tokens_in          INTEGER NOT NULL,
            tokens_out         INTEGER NOT NULL,
            estimated_cost_eur TEXT NOT NULL,
            model              TEXT NOT NULL,
            stage              TEXT NOT NULL,
            document_id        INTEGER NOT NULL REFERENCES documents(id),
            at                 TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_llm_usage_at ON llm_usage(at);

        CREATE TABLE IF NOT EXISTS diagnostics (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            document_id   INTEGER NOT NULL REFERENCES documents(id),
            stage         TEXT NOT NULL,
            kind          TEXT NOT NULL,
            message       TEXT NOT NULL,
            occurred_at   TEXT NOT NULL
        );
        "#,
    )?;

    let version: Option<i64> =
        conn.query_row("SELECT version FROM schema_version LIMIT 1", [], |r| r.get(0)).ok();
    if version.is_none() {
        conn.execute("INSERT INTO schema_version(version) VALUES (?1)", [SCHEMA_VERSION])?;
    }
    Ok(())
}
