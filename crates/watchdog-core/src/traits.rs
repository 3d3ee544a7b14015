use crate::error::Result;
use crate::model::{
    Case, CaseEventType, CaseStatus, Category, Confidence, DocType, Document, DocumentRef, File, Source, TextStatus,
};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub final_url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub bytes: Vec<u8>,
    pub truncated: bool,
}

/// SSRF-safe, rate-limited, retrying HTTP fetcher (spec §4.A).
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchResponse>;

    /// Like `fetch`, but validates the response content-type/magic bytes
    /// against `expected_mime` before returning, per spec §4.A point 6.
    async fn download(&self, url: &str, expected_mime: Option<&str>) -> Result<FetchResponse>;
}

/// Platform-specific document discovery, returning a uniform `DocumentRef`
/// sequence (spec §4.B). Implementors must not raise on a single item's
/// partial parse failure; only a whole-page failure should propagate.
#[async_trait]
pub trait Connector: Send + Sync {
    fn platform(&self) -> crate::model::Platform;
    async fn discover(&self) -> Result<Vec<DocumentRef>>;
}

/// Outcome of `upsert_document` (spec §4.C).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub document_id: i64,
    pub is_new: bool,
    pub content_changed: bool,
}

/// A scored candidate for Case-Build merging (spec §4.D).
#[derive(Debug, Clone)]
pub struct MergeCandidate {
    pub case_id: i64,
    pub score: f64,
}

/// Transactional store exposing the typed upserts/transitions/claims
/// described in spec §4.C. One implementation (`watchdog-store`, SQLite);
/// kept as a trait so stage runners can be tested against an in-memory
/// fake.
#[async_trait]
pub trait Store: Send + Sync {
    async fn upsert_document(&self, source_id: i64, doc_ref: &DocumentRef) -> Result<UpsertOutcome>;

    async fn transition_document(
        &self,
        document_id: i64,
        from: crate::model::DocumentStatus,
        to: crate::model::DocumentStatus,
    ) -> Result<bool>;

    /// Atomically claims one `Document` eligible for `stage` (i.e. in the
    /// status that precedes it) and marks it claimed so no other worker
    /// picks it up concurrently.
    async fn claim_next(&self, stage: Stage) -> Result<Option<Document>>;

    async fn record_llm_usage(
        &self,
        document_id: i64,
        stage: Stage,
        model: &str,
        tokens_in: u32,
        tokens_out: u32,
        estimated_cost_eur: BigDecimal,
    ) -> Result<()>;

    async fn month_to_date_cost(&self) -> Result<BigDecimal>;

    async fn find_merge_candidates(
        &self,
        entities: &[String],
        locations: &[String],
        candidate_headline: &str,
        municipality: &str,
        category: Category,
    ) -> Result<Vec<MergeCandidate>>;

    async fn get_document(&self, document_id: i64) -> Result<Option<Document>>;
    async fn get_case(&self, case_id: i64) -> Result<Option<Case>>;
    async fn get_source(&self, source_id: i64) -> Result<Option<Source>>;
    async fn enabled_sources(&self) -> Result<Vec<Source>>;

    async fn record_source_success(&self, source_id: i64) -> Result<()>;
    async fn record_source_failure(&self, source_id: i64, message: &str) -> Result<()>;

    /// Persists the files downloaded for `document_id` in URL order,
    /// replacing any prior version, and updates `content_hash`. Returns
    /// `false` (no-op beyond the hash compare) when `content_hash` is
    /// unchanged from the stored value (spec §4.D Fetch).
    async fn replace_document_files(
        &self,
        document_id: i64,
        content_hash: &str,
        files: &[NewFile],
    ) -> Result<bool>;

    async fn list_files(&self, document_id: i64) -> Result<Vec<File>>;

    async fn update_file_text(&self, file_id: i64, status: TextStatus, text: &str) -> Result<()>;

    /// Increments `retry_count` for a Fetch/Extract/Triage retryable
    /// failure; the stage runner transitions to `error` once the caller's
    /// configured ceiling is exceeded.
    async fn increment_retry_count(&self, document_id: i64) -> Result<u32>;

    async fn write_diagnostic(&self, document_id: i64, stage: &str, kind: &str, message: &str) -> Result<()>;

    /// Inserts a new Case with its first Evidence, returning its id.
    async fn create_case(&self, draft: &NewCase, evidence: &[NewEvidence]) -> Result<i64>;

    /// Merges new evidence/entities/locations into an existing Case and
    /// appends an `evidence_added` event (spec §4.D Case Build merge path).
    async fn merge_into_case(&self, case_id: i64, draft: &NewCase, evidence: &[NewEvidence]) -> Result<()>;

    async fn append_case_event(&self, case_id: i64, event_type: CaseEventType, payload: serde_json::Value) -> Result<()>;
}

/// File bytes staged by the Fetch stage, keyed by their source URL.
#[derive(Debug, Clone)]
pub struct NewFile {
    pub url: String,
    pub mime: Option<String>,
    pub byte_len: u64,
    pub storage_path: String,
}

/// Case fields proposed by Case Build, prior to a merge-or-create decision.
#[derive(Debug, Clone)]
pub struct NewCase {
    pub primary_category: Category,
    pub headline: String,
    pub summary: String,
    pub status: CaseStatus,
    pub confidence: Confidence,
    pub confidence_reason: String,
    pub municipality: String,
    pub entities: Vec<String>,
    pub locations: Vec<String>,
}

/// Evidence staged alongside a `NewCase`.
#[derive(Debug, Clone)]
pub struct NewEvidence {
    pub file_id: i64,
    pub document_id: i64,
    pub page: Option<u32>,
    pub snippet: String,
    pub source_url: String,
}

/// The stage a `claim_next` call is claiming work for. Each stage only
/// claims documents in the status that immediately precedes it (spec
/// §4.C's transition diagram).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetch,
    Extract,
    Triage,
    CaseBuild,
}

/// Triage (LLM pass 1) response contract (spec §6).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TriageResponse {
    pub categories: Vec<Category>,
    pub relevance_score: f64,
    pub candidate_reason: String,
}

/// Case Build (LLM pass 2) response contract (spec §6).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CaseBuildResponse {
    pub headline: String,
    pub summary: String,
    pub status: crate::model::CaseStatus,
    pub timeline: Vec<TimelineEntry>,
    pub evidence: Vec<EvidenceDraft>,
    pub entities: Vec<String>,
    pub locations: Vec<String>,
    pub confidence: Confidence,
    pub confidence_reason: String,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TimelineEntry {
    pub event_type: crate::model::CaseEventType,
    pub event_time: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct EvidenceDraft {
    pub page: Option<u32>,
    pub snippet: String,
    pub source_url: String,
}

/// LLM provider contract. Prompt/response shape is fixed by spec §6; the
/// provider behind it is out of scope (spec §1 Non-goals).
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Returns `(response, tokens_in, tokens_out, estimated_cost_eur)`.
    async fn triage(
        &self,
        prompt: &str,
    ) -> Result<(TriageResponse, u32, u32, BigDecimal)>;

    async fn case_build(
        &self,
        prompt: &str,
    ) -> Result<(CaseBuildResponse, u32, u32, BigDecimal)>;
}

/// Distinguishes the keyword gate outcome from an actual LLM call, so the
/// Triage stage can short-circuit without touching the budget (spec §4.D).
pub fn doc_type_participates_in_case_build(doc_type: DocType) -> bool {
    // All doc types — including `announcement` — are eligible for Case
    // Build; announcements participate in merge matching as supporting
    // evidence rather than being excluded outright (SPEC_FULL.md §9).
    matches!(
        doc_type,
        DocType::Agenda | DocType::Minutes | DocType::Decision | DocType::Announcement
    )
}
