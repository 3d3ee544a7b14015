use crate::schema;
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeSet;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use watchdog_core::{
    Case, CaseEventType, CaseStatus, Category, Confidence, DocType, Document, DocumentRef, DocumentStatus, Error,
    File, MergeCandidate, NewCase, NewEvidence, NewFile, Platform, Result, Source, SourceConfig, Stage, Store,
    TextStatus, UpsertOutcome,
};

/// SQLite-backed `Store`. One writer connection behind a mutex (spec's
/// single-writer discipline); every call hops to a blocking thread since
/// `rusqlite::Connection` is not `Send`-friendly across `.await` points.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| Error::Store(e.to_string()))?;
        schema::initialize(&conn).map_err(|e| Error::Store(e.to_string()))?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| Error::Store(e.to_string()))?;
        schema::initialize(&conn).map_err(|e| Error::Store(e.to_string()))?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().unwrap_or_else(|p| p.into_inner());
            f(&guard)
        })
        .await
        .map_err(|e| Error::Store(format!("blocking task panicked: {e}")))?
        .map_err(|e| Error::Store(e.to_string()))
    }
}

fn stage_source_status(stage: Stage) -> DocumentStatus {
    match stage {
        Stage::Fetch => DocumentStatus::New,
        Stage::Extract => DocumentStatus::Fetched,
        Stage::Triage | Stage::CaseBuild => DocumentStatus::Extracted,
    }
}

fn status_str(s: DocumentStatus) -> &'static str {
    match s {
        DocumentStatus::New => "new",
        DocumentStatus::Fetched => "fetched",
        DocumentStatus::Extracted => "extracted",
        DocumentStatus::Processed => "processed",
        DocumentStatus::Error => "error",
    }
}

fn status_from_str(s: &str) -> rusqlite::Result<DocumentStatus> {
    Ok(match s {
        "new" => DocumentStatus::New,
        "fetched" => DocumentStatus::Fetched,
        "extracted" => DocumentStatus::Extracted,
        "processed" => DocumentStatus::Processed,
        "error" => DocumentStatus::Error,
        other => {
            return Err(rusqlite::Error::InvalidColumnType(
                0,
                format!("unknown document status {other}"),
                rusqlite::types::Type::Text,
            ))
        }
    })
}

fn doc_type_str(t: DocType) -> &'static str {
    match t {
        DocType::Agenda => "agenda",
        DocType::Minutes => "minutes",
        DocType::Decision => "decision",
        DocType::Announcement => "announcement",
    }
}

fn doc_type_from_str(s: &str) -> DocType {
    match s {
        "agenda" => DocType::Agenda,
        "decision" => DocType::Decision,
        "announcement" => DocType::Announcement,
        _ => DocType::Minutes,
    }
}

fn platform_str(p: Platform) -> &'static str {
    match p {
        Platform::CloudNc => "cloud_nc",
        Platform::Dynasty => "dynasty",
        Platform::TWeb => "t_web",
        Platform::MunicipalWebsite => "municipal_website",
    }
}

fn platform_from_str(s: &str) -> Platform {
    match s {
        "dynasty" => Platform::Dynasty,
        "t_web" => Platform::TWeb,
        "municipal_website" => Platform::MunicipalWebsite,
        _ => Platform::CloudNc,
    }
}

fn category_str(c: Category) -> &'static str {
    match c {
        Category::Zoning => "zoning",
        Category::PermitsExtraction => "permits_extraction",
        Category::WaterWetlands => "water_wetlands",
        Category::IndustryInfrastructure => "industry_infrastructure",
    }
}

fn category_from_str(s: &str) -> Category {
    match s {
        "permits_extraction" => Category::PermitsExtraction,
        "water_wetlands" => Category::WaterWetlands,
        "industry_infrastructure" => Category::IndustryInfrastructure,
        _ => Category::Zoning,
    }
}

fn case_status_str(s: CaseStatus) -> &'static str {
    match s {
        CaseStatus::Proposed => "proposed",
        CaseStatus::Approved => "approved",
        CaseStatus::Unknown => "unknown",
    }
}

fn case_status_from_str(s: &str) -> CaseStatus {
    match s {
        "approved" => CaseStatus::Approved,
        "proposed" => CaseStatus::Proposed,
        _ => CaseStatus::Unknown,
    }
}

fn confidence_str(c: Confidence) -> &'static str {
    match c {
        Confidence::High => "high",
        Confidence::Medium => "medium",
        Confidence::Low => "low",
    }
}

fn confidence_from_str(s: &str) -> Confidence {
    match s {
        "high" => Confidence::High,
        "low" => Confidence::Low,
        _ => Confidence::Medium,
    }
}

fn text_status_str(s: TextStatus) -> &'static str {
    match s {
        TextStatus::Pending => "pending",
        TextStatus::Extracted => "extracted",
        TextStatus::OcrQueued => "ocr_queued",
        TextStatus::OcrDone => "ocr_done",
        TextStatus::Failed => "failed",
    }
}

fn text_status_from_str(s: &str) -> TextStatus {
    match s {
        "extracted" => TextStatus::Extracted,
        "ocr_queued" => TextStatus::OcrQueued,
        "ocr_done" => TextStatus::OcrDone,
        "failed" => TextStatus::Failed,
        _ => TextStatus::Pending,
    }
}

fn join_set(set: &BTreeSet<String>) -> String {
    serde_json::to_string(set).unwrap_or_else(|_| "[]".to_string())
}

fn parse_set(raw: &str) -> BTreeSet<String> {
    serde_json::from_str(raw).unwrap_or_default()
}

fn row_to_document(row: &rusqlite::Row) -> rusqlite::Result<Document> {
    let status_raw: String = row.get("status")?;
    let doc_type_raw: String = row.get("doc_type")?;
    Ok(Document {
        id: row.get("id")?,
        source_id: row.get("source_id")?,
        external_id: row.get("external_id")?,
        doc_type: doc_type_from_str(&doc_type_raw),
        title: row.get("title")?,
        body: row.get("body")?,
        meeting_date: row
            .get::<_, Option<String>>("meeting_date")?
            .and_then(|s| chrono::NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok()),
        published_at: row.get::<_, Option<String>>("published_at")?.and_then(|s| parse_dt(&s)),
        source_url: row.get("source_url")?,
        file_urls: serde_json::from_str(&row.get::<_, String>("file_urls_json")?).unwrap_or_default(),
        discovered_at: parse_dt(&row.get::<_, String>("discovered_at")?).unwrap_or_else(chrono::Utc::now),
        content_hash: row.get("content_hash")?,
        status: status_from_str(&status_raw)?,
        retry_count: row.get::<_, i64>("retry_count")? as u32,
    })
}

fn parse_dt(s: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(s).ok().map(|d| d.with_timezone(&chrono::Utc))
}

fn row_to_source(row: &rusqlite::Row) -> rusqlite::Result<Source> {
    let config_json: String = row.get("config_json")?;
    let config: SourceConfig = serde_json::from_str(&config_json).unwrap_or_default();
    Ok(Source {
        id: row.get("id")?,
        municipality: row.get("municipality")?,
        platform: platform_from_str(&row.get::<_, String>("platform")?),
        base_url: row.get("base_url")?,
        enabled: row.get::<_, i64>("enabled")? != 0,
        config,
        last_success_at: row.get::<_, Option<String>>("last_success_at")?.and_then(|s| parse_dt(&s)),
        last_attempt_at: row.get::<_, Option<String>>("last_attempt_at")?.and_then(|s| parse_dt(&s)),
        last_error: row.get("last_error")?,
        consecutive_failures: row.get::<_, i64>("consecutive_failures")? as u32,
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn upsert_document(&self, source_id: i64, doc_ref: &DocumentRef) -> Result<UpsertOutcome> {
        let doc_ref = doc_ref.clone();
        self.with_conn(move |conn| {
            let existing_id: Option<i64> = conn
                .query_row(
                    "SELECT id FROM documents WHERE source_id = ?1 AND external_id = ?2",
                    params![source_id, doc_ref.external_id],
                    |r| r.get(0),
                )
                .optional()?;

            let now = chrono::Utc::now().to_rfc3339();
            let meeting_date = doc_ref.meeting_date.map(|d| d.format("%Y-%m-%d").to_string());
            let published_at = doc_ref.published_at.map(|d| d.to_rfc3339());
            let file_urls_json = serde_json::to_string(&doc_ref.file_urls).unwrap_or_else(|_| "[]".to_string());

            match existing_id {
                None => {
                    conn.execute(
                        "INSERT INTO documents
                            (source_id, external_id, doc_type, title, body, meeting_date,
                             published_at, source_url, file_urls_json, discovered_at, status, retry_count)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 'new', 0)",
                        params![
                            source_id,
                            doc_ref.external_id,
                            doc_type_str(doc_ref.doc_type),
                            doc_ref.title,
                            doc_ref.body,
                            meeting_date,
                            published_at,
                            doc_ref.source_url,
                            file_urls_json,
                            now,
                        ],
                    )?;
                    let id = conn.last_insert_rowid();
                    Ok(UpsertOutcome { document_id: id, is_new: true, content_changed: false })
                }
                Some(id) => {
                    let prior_file_urls_json: String =
                        conn.query_row("SELECT file_urls_json FROM documents WHERE id = ?1", params![id], |r| r.get(0))?;
                    let content_changed = prior_file_urls_json != file_urls_json;

                    conn.execute(
                        "UPDATE documents SET title = ?1, body = ?2, doc_type = ?3, meeting_date = ?4,
                            published_at = ?5, source_url = ?6, file_urls_json = ?7,
                            status = CASE WHEN ?9 AND status IN ('fetched', 'extracted', 'processed')
                                          THEN 'new' ELSE status END,
                            claimed_at = CASE WHEN ?9 THEN NULL ELSE claimed_at END,
                            retry_count = CASE WHEN ?9 THEN 0 ELSE retry_count END
                         WHERE id = ?8",
                        params![
                            doc_ref.title,
                            doc_ref.body,
                            doc_type_str(doc_ref.doc_type),
                            meeting_date,
                            published_at,
                            doc_ref.source_url,
                            file_urls_json,
                            id,
                            content_changed,
                        ],
                    )?;
                    Ok(UpsertOutcome { document_id: id, is_new: false, content_changed })
                }
            }
        })
        .await
    }

    async fn transition_document(&self, document_id: i64, from: DocumentStatus, to: DocumentStatus) -> Result<bool> {
        if !from.can_transition_to(to) {
            return Ok(false);
        }
        self.with_conn(move |conn| {
            // Clearing `claimed_at` releases this row back to the pool for
            // the next stage's `claim_next`; resetting `retry_count` keeps
            // it scoped to the stage that's retrying, not the document's
            // whole lifetime (a document that needed 3 Fetch retries must
            // not start Triage already 3 retries into its LLM-call budget).
            let changed = conn.execute(
                "UPDATE documents SET status = ?1, claimed_at = NULL, retry_count = 0 WHERE id = ?2 AND status = ?3",
                params![status_str(to), document_id, status_str(from)],
            )?;
            Ok(changed == 1)
        })
        .await
    }

    async fn claim_next(&self, stage: Stage) -> Result<Option<Document>> {
        let eligible = status_str(stage_source_status(stage));
        self.with_conn(move |conn| {
            // One UPDATE ... RETURNING so the claim is a single atomic
            // statement: a row already claimed by another worker (non-NULL
            // `claimed_at`) is excluded from the subquery, so two workers
            // can never be handed the same document.
            conn.query_row(
                "UPDATE documents SET claimed_at = ?1
                 WHERE claimed_at IS NULL AND status = ?2
                   AND id = (SELECT id FROM documents WHERE status = ?2 AND claimed_at IS NULL ORDER BY id LIMIT 1)
                 RETURNING *",
                params![chrono::Utc::now().to_rfc3339(), eligible],
                row_to_document,
            )
            .optional()
        })
        .await
    }

    async fn record_llm_usage(
        &self,
        document_id: i64,
        stage: Stage,
        model: &str,
        tokens_in: u32,
        tokens_out: u32,
        estimated_cost_eur: BigDecimal,
    ) -> Result<()> {
        let model = model.to_string();
        let stage_name = match stage {
            Stage::Fetch => "fetch",
            Stage::Extract => "extract",
            Stage::Triage => "triage",
            Stage::CaseBuild => "case_build",
        };
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO llm_usage (tokens_in, tokens_out, estimated_cost_eur, model, stage, document_id, at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    tokens_in,
                    tokens_out,
                    estimated_cost_eur.to_string(),
                    model,
                    stage_name,
                    document_id,
                    chrono::Utc::now().to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn month_to_date_cost(&self) -> Result<BigDecimal> {
        self.with_conn(|conn| {
            let month_prefix = chrono::Utc::now().format("%Y-%m").to_string();
            let mut stmt = conn.prepare("SELECT estimated_cost_eur FROM llm_usage WHERE at LIKE ?1")?;
            let rows = stmt.query_map(params![format!("{month_prefix}%")], |r| r.get::<_, String>(0))?;
            let mut total = BigDecimal::from(0);
            for row in rows {
                let raw = row?;
                if let Ok(v) = BigDecimal::from_str(&raw) {
                    total += v;
                }
            }
            Ok(total)
        })
        .await
    }

    async fn find_merge_candidates(
        &self,
        entities: &[String],
        locations: &[String],
        candidate_headline: &str,
        municipality: &str,
        category: Category,
    ) -> Result<Vec<MergeCandidate>> {
        let entities: BTreeSet<String> = entities.iter().cloned().collect();
        let locations: BTreeSet<String> = locations.iter().cloned().collect();
        let candidate_headline = candidate_headline.to_string();
        let municipality = municipality.to_string();

        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, headline, municipalities, entities, locations FROM cases WHERE primary_category = ?1",
            )?;
            let rows = stmt.query_map(params![category_str(category)], |r| {
                Ok((
                    r.get::<_, i64>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, String>(4)?,
                ))
            })?;

            let mut out = Vec::new();
            for row in rows {
                let (case_id, headline, municipalities_raw, entities_raw, locations_raw) = row?;
                let case_municipalities = parse_set(&municipalities_raw);
                if !case_municipalities.contains(&municipality) {
                    continue;
                }
                let case_entities = parse_set(&entities_raw);
                let case_locations = parse_set(&locations_raw);

                let mut score = 0.0_f64;
                if !entities.is_disjoint(&case_entities) {
                    score += 0.6;
                }
                if !locations.is_disjoint(&case_locations) {
                    score += 0.2;
                }
                score += 0.1; // category already matched by the WHERE clause.
                if strsim::normalized_levenshtein(&candidate_headline, &headline) >= 0.7 {
                    score += 0.1;
                }
                if score > 0.0 {
                    out.push(MergeCandidate { case_id, score });
                }
            }
            out.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
            Ok(out)
        })
        .await
    }

    async fn get_document(&self, document_id: i64) -> Result<Option<Document>> {
        self.with_conn(move |conn| {
            conn.query_row("SELECT * FROM documents WHERE id = ?1", params![document_id], row_to_document).optional()
        })
        .await
    }

    async fn get_case(&self, case_id: i64) -> Result<Option<Case>> {
        self.with_conn(move |conn| {
            conn.query_row("SELECT * FROM cases WHERE id = ?1", params![case_id], |row| {
                Ok(Case {
                    id: row.get("id")?,
                    primary_category: category_from_str(&row.get::<_, String>("primary_category")?),
                    headline: row.get("headline")?,
                    summary: row.get("summary")?,
                    status: case_status_from_str(&row.get::<_, String>("status")?),
                    confidence: confidence_from_str(&row.get::<_, String>("confidence")?),
                    confidence_reason: row.get("confidence_reason")?,
                    municipalities: parse_set(&row.get::<_, String>("municipalities")?),
                    entities: parse_set(&row.get::<_, String>("entities")?),
                    locations: parse_set(&row.get::<_, String>("locations")?),
                    first_seen_at: parse_dt(&row.get::<_, String>("first_seen_at")?).unwrap_or_else(chrono::Utc::now),
                    updated_at: parse_dt(&row.get::<_, String>("updated_at")?).unwrap_or_else(chrono::Utc::now),
                })
            })
            .optional()
        })
        .await
    }

    async fn enabled_sources(&self) -> Result<Vec<Source>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT * FROM sources WHERE enabled = 1")?;
            let rows = stmt.query_map([], row_to_source)?;
            rows.collect()
        })
        .await
    }

    async fn get_source(&self, source_id: i64) -> Result<Option<Source>> {
        self.with_conn(move |conn| {
            conn.query_row("SELECT * FROM sources WHERE id = ?1", params![source_id], row_to_source).optional()
        })
        .await
    }

    async fn record_source_success(&self, source_id: i64) -> Result<()> {
        self.with_conn(move |conn| {
            let now = chrono::Utc::now().to_rfc3339();
            conn.execute(
                "UPDATE sources SET last_success_at = ?1, last_attempt_at = ?1, consecutive_failures = 0 WHERE id = ?2",
                params![now, source_id],
            )?;
            Ok(())
        })
        .await
    }

    async fn record_source_failure(&self, source_id: i64, message: &str) -> Result<()> {
        let message = message.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE sources SET last_error = ?1, last_attempt_at = ?2, consecutive_failures = consecutive_failures + 1 WHERE id = ?3",
                params![message, chrono::Utc::now().to_rfc3339(), source_id],
            )?;
            Ok(())
        })
        .await
    }

    async fn replace_document_files(&self, document_id: i64, content_hash: &str, files: &[NewFile]) -> Result<bool> {
        let content_hash = content_hash.to_string();
        let files = files.to_vec();
        self.with_conn(move |conn| {
            let prior: Option<String> =
                conn.query_row("SELECT content_hash FROM documents WHERE id = ?1", params![document_id], |r| r.get(0))
                    .optional()?;
            if prior.as_deref() == Some(content_hash.as_str()) {
                return Ok(false);
            }
            conn.execute("DELETE FROM files WHERE document_id = ?1", params![document_id])?;
            for file in &files {
                conn.execute(
                    "INSERT INTO files (document_id, url, mime, byte_len, storage_path, text_status, text_content)
                     VALUES (?1, ?2, ?3, ?4, ?5, 'pending', '')",
                    params![document_id, file.url, file.mime, file.byte_len as i64, file.storage_path],
                )?;
            }
            conn.execute("UPDATE documents SET content_hash = ?1 WHERE id = ?2", params![content_hash, document_id])?;
            Ok(true)
        })
        .await
    }

    async fn list_files(&self, document_id: i64) -> Result<Vec<File>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare("SELECT * FROM files WHERE document_id = ?1")?;
            let rows = stmt.query_map(params![document_id], |row| {
                Ok(File {
                    id: row.get("id")?,
                    document_id: row.get("document_id")?,
                    url: row.get("url")?,
                    mime: row.get("mime")?,
                    byte_len: row.get::<_, i64>("byte_len")? as u64,
                    storage_path: row.get("storage_path")?,
                    text_status: text_status_from_str(&row.get::<_, String>("text_status")?),
                    text_content: row.get("text_content")?,
                })
            })?;
            rows.collect()
        })
        .await
    }

    async fn update_file_text(&self, file_id: i64, status: TextStatus, text: &str) -> Result<()> {
        let text = text.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE files SET text_status = ?1, text_content = ?2 WHERE id = ?3",
                params![text_status_str(status), text, file_id],
            )?;
            Ok(())
        })
        .await
    }

    async fn increment_retry_count(&self, document_id: i64) -> Result<u32> {
        self.with_conn(move |conn| {
            // Clears `claimed_at` too: a transient failure gives the claim
            // back to the pool so a later worker can retry this document.
            conn.execute(
                "UPDATE documents SET retry_count = retry_count + 1, claimed_at = NULL WHERE id = ?1",
                params![document_id],
            )?;
            conn.query_row("SELECT retry_count FROM documents WHERE id = ?1", params![document_id], |r| {
                r.get::<_, i64>(0)
            })
            .map(|n| n as u32)
        })
        .await
    }

    async fn write_diagnostic(&self, document_id: i64, stage: &str, kind: &str, message: &str) -> Result<()> {
        let (stage, kind, message) = (stage.to_string(), kind.to_string(), message.to_string());
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO diagnostics (document_id, stage, kind, message, occurred_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![document_id, stage, kind, message, chrono::Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })
        .await
    }

    async fn create_case(&self, draft: &NewCase, evidence: &[NewEvidence]) -> Result<i64> {
        let draft = draft.clone();
        let evidence = evidence.to_vec();
        self.with_conn(move |conn| {
            let now = chrono::Utc::now().to_rfc3339();
            let mut municipalities = BTreeSet::new();
            municipalities.insert(draft.municipality.clone());
            let entities: BTreeSet<String> = draft.entities.iter().cloned().collect();
            let locations: BTreeSet<String> = draft.locations.iter().cloned().collect();

            conn.execute(
                "INSERT INTO cases (primary_category, headline, summary, status, confidence, confidence_reason,
                    municipalities, entities, locations, first_seen_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
                params![
                    category_str(draft.primary_category),
                    draft.headline,
                    draft.summary,
                    case_status_str(draft.status),
                    confidence_str(draft.confidence),
                    draft.confidence_reason,
                    join_set(&municipalities),
                    join_set(&entities),
                    join_set(&locations),
                    now,
                ],
            )?;
            let case_id = conn.last_insert_rowid();
            for ev in &evidence {
                conn.execute(
                    "INSERT INTO evidence (case_id, file_id, document_id, page, snippet, source_url)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![case_id, ev.file_id, ev.document_id, ev.page, ev.snippet, ev.source_url],
                )?;
            }
            Ok(case_id)
        })
        .await
    }

    async fn merge_into_case(&self, case_id: i64, draft: &NewCase, evidence: &[NewEvidence]) -> Result<()> {
        let draft = draft.clone();
        let evidence = evidence.to_vec();
        self.with_conn(move |conn| {
            let (municipalities_raw, entities_raw, locations_raw): (String, String, String) = conn.query_row(
                "SELECT municipalities, entities, locations FROM cases WHERE id = ?1",
                params![case_id],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )?;
            let mut municipalities = parse_set(&municipalities_raw);
            let mut entities = parse_set(&entities_raw);
            let mut locations = parse_set(&locations_raw);
            municipalities.insert(draft.municipality.clone());
            entities.extend(draft.entities.iter().cloned());
            locations.extend(draft.locations.iter().cloned());

            conn.execute(
                "UPDATE cases SET municipalities = ?1, entities = ?2, locations = ?3, status = ?4,
                    confidence = ?5, confidence_reason = ?6, updated_at = ?7 WHERE id = ?8",
                params![
                    join_set(&municipalities),
                    join_set(&entities),
                    join_set(&locations),
                    case_status_str(draft.status),
                    confidence_str(draft.confidence),
                    draft.confidence_reason,
                    chrono::Utc::now().to_rfc3339(),
                    case_id,
                ],
            )?;
            for ev in &evidence {
                conn.execute(
                    "INSERT INTO evidence (case_id, file_id, document_id, page, snippet, source_url)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![case_id, ev.file_id, ev.document_id, ev.page, ev.snippet, ev.source_url],
                )?;
            }
            conn.execute(
                "INSERT INTO case_events (case_id, event_type, event_time, payload) VALUES (?1, 'evidence_added', ?2, '{}')",
                params![case_id, chrono::Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })
        .await
    }

    async fn append_case_event(&self, case_id: i64, event_type: CaseEventType, payload: serde_json::Value) -> Result<()> {
        let event_type_str = match event_type {
            CaseEventType::Approved => "approved",
            CaseEventType::PublishedNotice => "published_notice",
            CaseEventType::ComplaintWindow => "complaint_window",
            CaseEventType::NextHandling => "next_handling",
            CaseEventType::EvidenceAdded => "evidence_added",
        };
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO case_events (case_id, event_type, event_time, payload) VALUES (?1, ?2, ?3, ?4)",
                params![case_id, event_type_str, chrono::Utc::now().to_rfc3339(), payload.to_string()],
            )?;
            conn.execute("UPDATE cases SET updated_at = ?1 WHERE id = ?2", params![chrono::Utc::now().to_rfc3339(), case_id])?;
            Ok(())
        })
        .await
    }
}
