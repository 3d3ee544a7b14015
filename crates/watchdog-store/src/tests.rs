use crate::SqliteStore;
use bigdecimal::BigDecimal;
use std::str::FromStr;
use watchdog_core::{
    Category, Confidence, DocType, DocumentRef, DocumentStatus, NewCase, NewEvidence, NewFile, Platform, Stage, Store,
};

fn sample_ref(external_id: &str) -> DocumentRef {
    DocumentRef {
        municipality: "Salla".to_string(),
        platform: Platform::TWeb,
        body: "Tekninen lautakunta".to_string(),
        meeting_date: chrono::NaiveDate::from_ymd_opt(2025, 3, 12),
        published_at: None,
        doc_type: DocType::Minutes,
        title: "Tekninen lautakunta 12.3.2025".to_string(),
        source_url: "http://salla.tweb.fi/pk_tek_tweb.htm".to_string(),
        file_urls: vec!["http://salla.tweb.fi/fileshow?doctype=pk&docid=42".to_string()],
        external_id: external_id.to_string(),
    }
}

#[tokio::test]
async fn upsert_is_new_once_then_updates_in_place() {
    let store = SqliteStore::open_in_memory().unwrap();
    let first = store.upsert_document(1, &sample_ref("42")).await.unwrap();
    assert!(first.is_new);

    let mut changed_ref = sample_ref("42");
    changed_ref.title = "Tekninen lautakunta 12.3.2025 (korjattu)".to_string();
    let second = store.upsert_document(1, &changed_ref).await.unwrap();
    assert!(!second.is_new);
    assert_eq!(second.document_id, first.document_id);

    let doc = store.get_document(first.document_id).await.unwrap().unwrap();
    assert_eq!(doc.title, "Tekninen lautakunta 12.3.2025 (korjattu)");
}

// Invariant #2 (spec §8): one Document row per (source_id, external_id).
#[tokio::test]
async fn distinct_external_ids_produce_distinct_documents() {
    let store = SqliteStore::open_in_memory().unwrap();
    let a = store.upsert_document(1, &sample_ref("1")).await.unwrap();
    let b = store.upsert_document(1, &sample_ref("2")).await.unwrap();
    assert_ne!(a.document_id, b.document_id);
}

#[tokio::test]
async fn transition_document_is_cas_and_rejects_illegal_moves() {
    let store = SqliteStore::open_in_memory().unwrap();
    let outcome = store.upsert_document(1, &sample_ref("42")).await.unwrap();

    assert!(store
        .transition_document(outcome.document_id, DocumentStatus::New, DocumentStatus::Fetched)
        .await
        .unwrap());
    // Stale `from` no longer matches current status.
    assert!(!store
        .transition_document(outcome.document_id, DocumentStatus::New, DocumentStatus::Fetched)
        .await
        .unwrap());
    // Illegal transition, rejected before even touching the row.
    assert!(!store
        .transition_document(outcome.document_id, DocumentStatus::Fetched, DocumentStatus::Processed)
        .await
        .unwrap());
}

#[tokio::test]
async fn claim_next_only_returns_documents_in_the_stage_eligible_status() {
    let store = SqliteStore::open_in_memory().unwrap();
    let outcome = store.upsert_document(1, &sample_ref("42")).await.unwrap();

    let claimed = store.claim_next(Stage::Fetch).await.unwrap().unwrap();
    assert_eq!(claimed.id, outcome.document_id);
    assert!(store.claim_next(Stage::Extract).await.unwrap().is_none());

    store.transition_document(outcome.document_id, DocumentStatus::New, DocumentStatus::Fetched).await.unwrap();
    assert!(store.claim_next(Stage::Fetch).await.unwrap().is_none());
    assert!(store.claim_next(Stage::Extract).await.unwrap().is_some());
}

#[tokio::test]
async fn claim_next_does_not_hand_out_the_same_document_twice() {
    let store = SqliteStore::open_in_memory().unwrap();
    store.upsert_document(1, &sample_ref("42")).await.unwrap();

    let first = store.claim_next(Stage::Fetch).await.unwrap();
    assert!(first.is_some());
    // The row is now claimed (`claimed_at` set); a second claim must see an
    // empty pool rather than handing out the same row to a concurrent worker.
    let second = store.claim_next(Stage::Fetch).await.unwrap();
    assert!(second.is_none());
}

#[tokio::test]
async fn upsert_document_resets_to_new_and_reports_content_changed_on_changed_file_urls() {
    let store = SqliteStore::open_in_memory().unwrap();
    let outcome = store.upsert_document(1, &sample_ref("42")).await.unwrap();
    store.transition_document(outcome.document_id, DocumentStatus::New, DocumentStatus::Fetched).await.unwrap();
    store.transition_document(outcome.document_id, DocumentStatus::Fetched, DocumentStatus::Extracted).await.unwrap();

    // Re-observed with the same file_urls: no reset, no content_changed.
    let same = store.upsert_document(1, &sample_ref("42")).await.unwrap();
    assert!(!same.content_changed);
    let doc = store.get_document(outcome.document_id).await.unwrap().unwrap();
    assert_eq!(doc.status, DocumentStatus::Extracted);

    // Re-observed with a different file_urls: reset to `new`, content_changed.
    let mut changed_ref = sample_ref("42");
    changed_ref.file_urls = vec!["http://salla.tweb.fi/fileshow?doctype=pk&docid=99".to_string()];
    let changed = store.upsert_document(1, &changed_ref).await.unwrap();
    assert!(changed.content_changed);
    let doc = store.get_document(outcome.document_id).await.unwrap().unwrap();
    assert_eq!(doc.status, DocumentStatus::New);
}

#[tokio::test]
async fn replace_document_files_is_a_noop_when_hash_is_unchanged() {
    let store = SqliteStore::open_in_memory().unwrap();
    let outcome = store.upsert_document(1, &sample_ref("42")).await.unwrap();
    let files = vec![NewFile {
        url: "http://salla.tweb.fi/fileshow?doctype=pk&docid=42".to_string(),
        mime: Some("application/pdf".to_string()),
        byte_len: 1024,
        storage_path: "./data/files/1/42.pdf".to_string(),
    }];

    let first = store.replace_document_files(outcome.document_id, "abc123", &files).await.unwrap();
    assert!(first);
    let second = store.replace_document_files(outcome.document_id, "abc123", &files).await.unwrap();
    assert!(!second);
    let third = store.replace_document_files(outcome.document_id, "def456", &files).await.unwrap();
    assert!(third);

    let stored_files = store.list_files(outcome.document_id).await.unwrap();
    assert_eq!(stored_files.len(), 1);
}

#[tokio::test]
async fn month_to_date_cost_sums_recorded_usage() {
    let store = SqliteStore::open_in_memory().unwrap();
    let outcome = store.upsert_document(1, &sample_ref("42")).await.unwrap();
    store
        .record_llm_usage(outcome.document_id, Stage::Triage, "test-model", 100, 50, BigDecimal::from_str("0.02").unwrap())
        .await
        .unwrap();
    store
        .record_llm_usage(outcome.document_id, Stage::CaseBuild, "test-model", 400, 200, BigDecimal::from_str("0.08").unwrap())
        .await
        .unwrap();
    let total = store.month_to_date_cost().await.unwrap();
    assert_eq!(total, BigDecimal::from_str("0.10").unwrap());
}

#[tokio::test]
async fn find_merge_candidates_scores_entity_location_and_title_overlap() {
    let store = SqliteStore::open_in_memory().unwrap();
    let draft = NewCase {
        primary_category: Category::Zoning,
        headline: "Asemakaavan muutos Keskustan alueella".to_string(),
        summary: "Kaavamuutos".to_string(),
        status: watchdog_core::CaseStatus::Proposed,
        confidence: Confidence::Medium,
        confidence_reason: "single document".to_string(),
        municipality: "Salla".to_string(),
        entities: vec!["Salla Oy".to_string()],
        locations: vec!["Keskusta".to_string()],
    };
    store.create_case(&draft, &[]).await.unwrap();

    let candidates = store
        .find_merge_candidates(
            &["Salla Oy".to_string()],
            &["Keskusta".to_string()],
            "Asemakaavan muutos Keskustan alueella 2",
            "Salla",
            Category::Zoning,
        )
        .await
        .unwrap();
    assert_eq!(candidates.len(), 1);
    // entity (0.6) + location (0.2) + category (0.1) + title similarity (0.1) = 1.0
    assert!((candidates[0].score - 1.0).abs() < 1e-9);
}

#[tokio::test]
async fn merge_into_case_unions_entities_and_appends_evidence_added_event() {
    let store = SqliteStore::open_in_memory().unwrap();
    let draft = NewCase {
        primary_category: Category::Zoning,
        headline: "Asemakaavan muutos".to_string(),
        summary: "s".to_string(),
        status: watchdog_core::CaseStatus::Proposed,
        confidence: Confidence::Medium,
        confidence_reason: "r".to_string(),
        municipality: "Salla".to_string(),
        entities: vec!["Salla Oy".to_string()],
        locations: vec![],
    };
    let case_id = store.create_case(&draft, &[]).await.unwrap();

    let outcome = store.upsert_document(1, &sample_ref("42")).await.unwrap();
    let files = vec![NewFile {
        url: "http://x/y.pdf".to_string(),
        mime: Some("application/pdf".to_string()),
        byte_len: 10,
        storage_path: "p".to_string(),
    }];
    store.replace_document_files(outcome.document_id, "hash1", &files).await.unwrap();
    let file = &store.list_files(outcome.document_id).await.unwrap()[0];

    let mut follow_up = draft.clone();
    follow_up.entities.push("Toinen Oy".to_string());
    store
        .merge_into_case(
            case_id,
            &follow_up,
            &[NewEvidence {
                file_id: file.id,
                document_id: outcome.document_id,
                page: Some(1),
                snippet: "snippet".to_string(),
                source_url: "http://x/y.pdf".to_string(),
            }],
        )
        .await
        .unwrap();

    let case = store.get_case(case_id).await.unwrap().unwrap();
    assert!(case.entities.contains("Salla Oy"));
    assert!(case.entities.contains("Toinen Oy"));
}
