use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Platform a `Source` is published on. Determines which `Connector`
/// variant discovers its documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    CloudNc,
    Dynasty,
    TWeb,
    MunicipalWebsite,
}

/// Per-platform listing configuration. Unknown keys are ignored (spec §6);
/// required keys vary per connector variant and are validated at the
/// connector boundary, not here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default)]
    pub listing_paths: Vec<String>,
    #[serde(default)]
    pub paths: SourcePaths,
    pub municipality: String,
    #[serde(default)]
    pub body_patterns: Option<std::collections::BTreeMap<String, String>>,
    #[serde(default)]
    pub pdf_pattern: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourcePaths {
    #[serde(default)]
    pub meetings: Option<String>,
    #[serde(default)]
    pub agendas: Option<String>,
    #[serde(default)]
    pub officer_decisions: Option<String>,
    #[serde(default)]
    pub announcements: Option<String>,
}

/// A monitored endpoint. Created by admin input; mutated only by the
/// Scheduler after each Discover run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: i64,
    pub municipality: String,
    pub platform: Platform,
    pub base_url: String,
    pub enabled: bool,
    pub config: SourceConfig,
    pub last_success_at: Option<DateTime<Utc>>,
    /// Set on every Discover attempt, success or failure; cooldown
    /// scheduling (spec §4.E) is computed from this, not `last_success_at`.
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocType {
    Agenda,
    Minutes,
    Decision,
    Announcement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    New,
    Fetched,
    Extracted,
    Processed,
    Error,
}

impl DocumentStatus {
    /// Whether `to` is a legal transition from `self`, per the diagram in
    /// spec §4.C. `Error` is reachable from any non-terminal status except
    /// `Processed`; no status transitions out of `Error` except via manual
    /// re-queue (not modeled as a `DocumentStatus` transition).
    pub fn can_transition_to(self, to: DocumentStatus) -> bool {
        use DocumentStatus::*;
        matches!(
            (self, to),
            (New, Fetched)
                | (Fetched, Extracted)
                | (Extracted, Processed)
                | (New, Error)
                | (Fetched, Error)
                | (Extracted, Error)
                // Re-observation with changed `file_urls` makes an
                // already-progressed Document fetchable again (spec §3,
                // §4.C): the row is pushed back to `new` so it re-enters
                // Fetch and is re-downloaded rather than skipping straight
                // to a later stage on stale bytes.
                | (Fetched, New)
                | (Extracted, New)
                | (Processed, New)
        )
    }
}

/// One discovered item on an upstream platform, keyed by `(source_id,
/// external_id)` across runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: i64,
    pub source_id: i64,
    pub external_id: String,
    pub doc_type: DocType,
    pub title: String,
    pub body: String,
    pub meeting_date: Option<chrono::NaiveDate>,
    pub published_at: Option<DateTime<Utc>>,
    pub source_url: String,
    pub file_urls: Vec<String>,
    pub discovered_at: DateTime<Utc>,
    pub content_hash: Option<String>,
    pub status: DocumentStatus,
    pub retry_count: u32,
}

/// Uniform output of every `Connector::discover`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRef {
    pub municipality: String,
    pub platform: Platform,
    pub body: String,
    pub meeting_date: Option<chrono::NaiveDate>,
    pub published_at: Option<DateTime<Utc>>,
    pub doc_type: DocType,
    pub title: String,
    pub source_url: String,
    pub file_urls: Vec<String>,
    pub external_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextStatus {
    Pending,
    Extracted,
    OcrQueued,
    OcrDone,
    Failed,
}

/// A binary artifact attached to a `Document`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct File {
    pub id: i64,
    pub document_id: i64,
    pub url: String,
    pub mime: Option<String>,
    pub byte_len: u64,
    pub storage_path: String,
    pub text_status: TextStatus,
    pub text_content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Zoning,
    PermitsExtraction,
    WaterWetlands,
    IndustryInfrastructure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Proposed,
    Approved,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

/// An aggregated environmental matter, spanning one or more `Document`s over
/// time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Case {
    pub id: i64,
    pub primary_category: Category,
    pub headline: String,
    pub summary: String,
    pub status: CaseStatus,
    pub confidence: Confidence,
    pub confidence_reason: String,
    pub municipalities: BTreeSet<String>,
    pub entities: BTreeSet<String>,
    pub locations: BTreeSet<String>,
    pub first_seen_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseEventType {
    Approved,
    PublishedNotice,
    ComplaintWindow,
    NextHandling,
    EvidenceAdded,
}

/// Append-only event on a `Case`, ordered by `event_time` then insertion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseEvent {
    pub id: i64,
    pub case_id: i64,
    pub event_type: CaseEventType,
    pub event_time: DateTime<Utc>,
    pub payload: serde_json::Value,
}

/// A text snippet with page and source URL cited by a `Case`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    pub id: i64,
    pub case_id: i64,
    pub file_id: i64,
    pub document_id: i64,
    pub page: Option<u32>,
    pub snippet: String,
    pub source_url: String,
}

/// Per-call LLM usage record, used for budget enforcement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmUsage {
    pub id: i64,
    pub tokens_in: u32,
    pub tokens_out: u32,
    pub estimated_cost_eur: bigdecimal::BigDecimal,
    pub model: String,
    pub stage: String,
    pub document_id: i64,
    pub at: DateTime<Utc>,
}

/// Diagnostic written on a permanent per-document/per-stage failure
/// (spec §4.C / §7), queryable by the `health` CLI surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    pub id: i64,
    pub document_id: i64,
    pub stage: String,
    pub kind: String,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

/// Stable ids are plain `i64` row ids in the store; `Uuid` is reserved for
/// values that must stay stable outside the store (e.g. log correlation).
pub type CorrelationId = Uuid;
