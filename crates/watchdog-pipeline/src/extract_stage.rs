//! Extract stage runner (spec.md §4.D "Extract"): text-first PDF parsing
//! with an OCR fallback, per File.

use crate::extract::{estimate_page_count, needs_ocr, pdf_to_text, tesseract_ocr};
use std::time::Duration;
use tracing::warn;
use watchdog_core::{DocumentStatus, Result, Stage, Store, TextStatus};

/// OCR timeout per file (spec.md §5: 300s).
const OCR_TIMEOUT: Duration = Duration::from_secs(300);
const OCR_MAX_CHARS: usize = 50_000;

pub enum ExtractOutcome {
    NoWork,
    Extracted { document_id: i64 },
    FailedPermanently { document_id: i64 },
}

/// Claims one Document in `fetched`, extracts (and OCRs where needed) every
/// attached File, and transitions to `extracted` once each File has settled
/// into `extracted | ocr_done | failed`.
pub async fn run_extract_one(store: &dyn Store) -> Result<ExtractOutcome> {
    let Some(doc) = store.claim_next(Stage::Extract).await? else {
        return Ok(ExtractOutcome::NoWork);
    };

    let files = store.list_files(doc.id).await?;
    let mut any_text = false;
    for file in files {
        let bytes = match tokio::fs::read(&file.storage_path).await {
            Ok(b) => b,
            Err(e) => {
                warn!(document_id = doc.id, file_id = file.id, error = %e, "could not read stored file");
                store.update_file_text(file.id, TextStatus::Failed, "").await?;
                continue;
            }
        };

        let pages = estimate_page_count(&bytes);
        let direct_text = pdf_to_text(&bytes).unwrap_or_default();
        let needs_fallback = direct_text.trim().is_empty() || needs_ocr(pages, direct_text.chars().count());

        if !needs_fallback {
            store.update_file_text(file.id, TextStatus::Extracted, &direct_text).await?;
            any_text = true;
            continue;
        }

        store.update_file_text(file.id, TextStatus::OcrQueued, "").await?;
        match tesseract_ocr(&bytes, OCR_TIMEOUT, OCR_MAX_CHARS) {
            Ok(ocr_text) => {
                store.update_file_text(file.id, TextStatus::OcrDone, &ocr_text).await?;
                any_text = true;
            }
            Err(reason) => {
                warn!(document_id = doc.id, file_id = file.id, reason, "ocr fallback failed");
                store.update_file_text(file.id, TextStatus::Failed, "").await?;
            }
        }
    }

    // spec.md §4.D: Document only advances to `extracted` once every File
    // has settled *and* at least one of them has text; a Document whose
    // every File failed extraction and OCR is a permanent, document-scoped
    // failure, not silently-empty input for Triage.
    if any_text {
        store.transition_document(doc.id, doc.status, DocumentStatus::Extracted).await?;
        Ok(ExtractOutcome::Extracted { document_id: doc.id })
    } else {
        store.transition_document(doc.id, doc.status, DocumentStatus::Error).await?;
        store.write_diagnostic(doc.id, "extract", "no_text_extracted", "every file failed extraction and OCR").await?;
        Ok(ExtractOutcome::FailedPermanently { document_id: doc.id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use watchdog_core::{DocType, DocumentRef, NewFile, Platform};
    use watchdog_store::SqliteStore;

    fn sample_ref() -> DocumentRef {
        DocumentRef {
            municipality: "Salla".to_string(),
            platform: Platform::TWeb,
            body: "Tekninen lautakunta".to_string(),
            meeting_date: None,
            published_at: None,
            doc_type: DocType::Minutes,
            title: "t".to_string(),
            source_url: "http://x".to_string(),
            file_urls: vec!["http://x/a.pdf".to_string()],
            external_id: "1".to_string(),
        }
    }

    #[tokio::test]
    async fn every_file_failing_extraction_errors_the_document_instead_of_masking_it() {
        let store = SqliteStore::open_in_memory().unwrap();
        let outcome = store.upsert_document(1, &sample_ref()).await.unwrap();
        store.transition_document(outcome.document_id, DocumentStatus::New, DocumentStatus::Fetched).await.unwrap();
        store
            .replace_document_files(
                outcome.document_id,
                "hash1",
                &[NewFile {
                    url: "http://x/a.pdf".to_string(),
                    mime: Some("application/pdf".to_string()),
                    byte_len: 3,
                    storage_path: "/nonexistent/watchdog-test-fixture.pdf".to_string(),
                }],
            )
            .await
            .unwrap();

        let result = run_extract_one(&store).await.unwrap();
        assert!(matches!(result, ExtractOutcome::FailedPermanently { document_id } if document_id == outcome.document_id));

        let doc = store.get_document(outcome.document_id).await.unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Error);
    }
}
