//! Discover stage runner (spec.md §4.D "Discover").

use tracing::{info, warn};
use watchdog_core::{Connector, Result, Source, Store};

#[derive(Debug, Clone, Copy, Default)]
pub struct DiscoverOutcome {
    pub new_documents: usize,
    pub seen_documents: usize,
    /// Previously-seen documents whose `file_urls` changed since the last
    /// observation; `upsert_document` already pushed these back to `new` so
    /// Fetch re-downloads them (spec.md §3's re-observation invariant).
    pub reobserved_documents: usize,
}

/// Runs one Discover pass for `source`. Never propagates a connector
/// failure to the caller as a hard error; a single source's upstream
/// hiccup must not interrupt the other N-1 sources being discovered
/// concurrently (spec.md §5).
pub async fn run_discover(store: &dyn Store, source: &Source, connector: &dyn Connector) -> DiscoverOutcome {
    let refs = match connector.discover().await {
        Ok(refs) => refs,
        Err(e) => {
            warn!(source_id = source.id, municipality = %source.municipality, error = %e, "discover failed");
            if let Err(store_err) = store.record_source_failure(source.id, &e.to_string()).await {
                warn!(source_id = source.id, error = %store_err, "failed to record source failure");
            }
            return DiscoverOutcome::default();
        }
    };

    let mut outcome = DiscoverOutcome::default();
    for doc_ref in &refs {
        match store.upsert_document(source.id, doc_ref).await {
            Ok(result) => {
                outcome.seen_documents += 1;
                if result.is_new {
                    outcome.new_documents += 1;
                } else if result.content_changed {
                    outcome.reobserved_documents += 1;
                    info!(source_id = source.id, document_id = result.document_id, "document re-observed with changed content, queued for re-fetch");
                }
            }
            Err(e) => {
                warn!(source_id = source.id, external_id = %doc_ref.external_id, error = %e, "upsert_document failed");
            }
        }
    }

    if let Err(e) = store.record_source_success(source.id).await {
        warn!(source_id = source.id, error = %e, "failed to record source success");
    }
    info!(
        source_id = source.id,
        new = outcome.new_documents,
        seen = outcome.seen_documents,
        reobserved = outcome.reobserved_documents,
        "discover complete"
    );
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use watchdog_core::{DocType, DocumentRef, Platform, UpsertOutcome};

    struct FixtureConnector {
        refs: Vec<DocumentRef>,
        fail: bool,
    }

    #[async_trait]
    impl Connector for FixtureConnector {
        fn platform(&self) -> Platform {
            Platform::TWeb
        }

        async fn discover(&self) -> Result<Vec<DocumentRef>> {
            if self.fail {
                return Err(watchdog_core::Error::Connector("boom".to_string()));
            }
            Ok(self.refs.clone())
        }
    }

    struct CountingStore {
        upserts: AtomicUsize,
        successes: AtomicUsize,
        failures: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl Store for CountingStore {
        async fn upsert_document(&self, _source_id: i64, _doc_ref: &DocumentRef) -> Result<UpsertOutcome> {
            let n = self.upserts.fetch_add(1, Ordering::SeqCst) as i64;
            Ok(UpsertOutcome { document_id: n, is_new: true, content_changed: false })
        }
        async fn transition_document(&self, _: i64, _: watchdog_core::DocumentStatus, _: watchdog_core::DocumentStatus) -> Result<bool> {
            Ok(true)
        }
        async fn claim_next(&self, _: watchdog_core::Stage) -> Result<Option<watchdog_core::Document>> {
            Ok(None)
        }
        async fn record_llm_usage(&self, _: i64, _: watchdog_core::Stage, _: &str, _: u32, _: u32, _: bigdecimal::BigDecimal) -> Result<()> {
            Ok(())
        }
        async fn month_to_date_cost(&self) -> Result<bigdecimal::BigDecimal> {
            Ok(bigdecimal::BigDecimal::from(0))
        }
        async fn find_merge_candidates(&self, _: &[String], _: &[String], _: &str, _: &str, _: watchdog_core::Category) -> Result<Vec<watchdog_core::MergeCandidate>> {
            Ok(vec![])
        }
        async fn get_document(&self, _: i64) -> Result<Option<watchdog_core::Document>> {
            Ok(None)
        }
        async fn get_case(&self, _: i64) -> Result<Option<watchdog_core::Case>> {
            Ok(None)
        }
        async fn get_source(&self, _: i64) -> Result<Option<Source>> {
            Ok(None)
        }
        async fn enabled_sources(&self) -> Result<Vec<Source>> {
            Ok(vec![])
        }
        async fn record_source_success(&self, _: i64) -> Result<()> {
            self.successes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn record_source_failure(&self, _: i64, message: &str) -> Result<()> {
            self.failures.lock().unwrap().push(message.to_string());
            Ok(())
        }
        async fn replace_document_files(&self, _: i64, _: &str, _: &[watchdog_core::NewFile]) -> Result<bool> {
            Ok(true)
        }
        async fn list_files(&self, _: i64) -> Result<Vec<watchdog_core::File>> {
            Ok(vec![])
        }
        async fn update_file_text(&self, _: i64, _: watchdog_core::TextStatus, _: &str) -> Result<()> {
            Ok(())
        }
        async fn increment_retry_count(&self, _: i64) -> Result<u32> {
            Ok(1)
        }
        async fn write_diagnostic(&self, _: i64, _: &str, _: &str, _: &str) -> Result<()> {
            Ok(())
        }
        async fn create_case(&self, _: &watchdog_core::NewCase, _: &[watchdog_core::NewEvidence]) -> Result<i64> {
            Ok(1)
        }
        async fn merge_into_case(&self, _: i64, _: &watchdog_core::NewCase, _: &[watchdog_core::NewEvidence]) -> Result<()> {
            Ok(())
        }
        async fn append_case_event(&self, _: i64, _: watchdog_core::CaseEventType, _: serde_json::Value) -> Result<()> {
            Ok(())
        }
    }

    fn sample_source() -> Source {
        Source {
            id: 1,
            municipality: "Salla".to_string(),
            platform: Platform::TWeb,
            base_url: "http://salla.tweb.fi".to_string(),
            enabled: true,
            config: Default::default(),
            last_success_at: None,
            last_attempt_at: None,
            last_error: None,
            consecutive_failures: 0,
        }
    }

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
            file_urls: vec![],
            external_id: "1".to_string(),
        }
    }

    #[tokio::test]
    async fn successful_discover_upserts_every_ref_and_records_success() {
        let store = CountingStore { upserts: AtomicUsize::new(0), successes: AtomicUsize::new(0), failures: StdMutex::new(vec![]) };
        let connector = FixtureConnector { refs: vec![sample_ref(), sample_ref()], fail: false };
        let outcome = run_discover(&store, &sample_source(), &connector).await;
        assert_eq!(outcome.seen_documents, 2);
        assert_eq!(store.successes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn connector_failure_records_source_failure_without_panicking() {
        let store = CountingStore { upserts: AtomicUsize::new(0), successes: AtomicUsize::new(0), failures: StdMutex::new(vec![]) };
        let connector = FixtureConnector { refs: vec![], fail: true };
        let outcome = run_discover(&store, &sample_source(), &connector).await;
        assert_eq!(outcome.seen_documents, 0);
        assert_eq!(store.failures.lock().unwrap().len(), 1);
    }
}
