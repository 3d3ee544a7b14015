//! Fetch stage runner (spec.md §4.D "Fetch").

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::warn;
use watchdog_core::{DocumentStatus, Error, Gateway, NewFile, Result, Retryability, Store};

/// After this many retryable failures, a Document moves to `error`
/// (spec.md §4.D: "after 5 retries → error").
pub const MAX_FETCH_RETRIES: u32 = 5;

pub enum FetchOutcome {
    NoWork,
    Fetched { document_id: i64, content_changed: bool },
    RetryScheduled { document_id: i64, retry_count: u32 },
    FailedPermanently { document_id: i64 },
}

fn storage_path(storage_root: &Path, source_id: i64, document_id: i64, index: usize) -> PathBuf {
    storage_root.join(source_id.to_string()).join(format!("{document_id}-{index}.pdf"))
}

/// Claims one Document in `new`, downloads its files, and transitions it to
/// `fetched` (or retries/errors per spec.md §4.D and §7).
pub async fn run_fetch_one(store: &dyn Store, gateway: &dyn Gateway, storage_root: &Path) -> Result<FetchOutcome> {
    let Some(doc) = store.claim_next(watchdog_core::Stage::Fetch).await? else {
        return Ok(FetchOutcome::NoWork);
    };

    let mut bodies: Vec<Vec<u8>> = Vec::with_capacity(doc.file_urls.len());
    for url in &doc.file_urls {
        match gateway.download(url, Some("application/pdf")).await {
            Ok(resp) => bodies.push(resp.bytes),
            Err(e) => {
                return Ok(handle_fetch_failure(store, doc.id, e).await?);
            }
        }
    }

    let mut hasher = Sha256::new();
    for body in &bodies {
        hasher.update(body);
    }
    let content_hash = hex::encode(hasher.finalize());

    let mut new_files = Vec::with_capacity(bodies.len());
    for (idx, (url, body)) in doc.file_urls.iter().zip(bodies.iter()).enumerate() {
        let path = storage_path(storage_root, doc.source_id, doc.id, idx);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| Error::Store(format!("create storage dir: {e}")))?;
        }
        tokio::fs::write(&path, body).await.map_err(|e| Error::Store(format!("write file: {e}")))?;
        new_files.push(NewFile {
            url: url.clone(),
            mime: Some("application/pdf".to_string()),
            byte_len: body.len() as u64,
            storage_path: path.to_string_lossy().to_string(),
        });
    }

    let content_changed = store.replace_document_files(doc.id, &content_hash, &new_files).await?;
    let from = doc.status;
    store.transition_document(doc.id, from, DocumentStatus::Fetched).await?;
    Ok(FetchOutcome::Fetched { document_id: doc.id, content_changed })
}

/// Fetch's own retry policy (spec.md §4.D "Fetch"): only `blocked_url` and
/// `content_mismatch` are permanent; everything else — including a plain
/// 404/4xx or an oversize response — gets the 5-retry grace period instead
/// of the generic, stage-agnostic classification in `Error::retryability`.
fn fetch_retryability(err: &Error) -> Retryability {
    match err {
        Error::BlockedUrl(_) | Error::ContentMismatch { .. } => Retryability::Permanent,
        Error::Store(_) | Error::NotConfigured(_) | Error::NotSupported(_) => Retryability::Fatal,
        _ => Retryability::Transient,
    }
}

async fn handle_fetch_failure(store: &dyn Store, document_id: i64, err: Error) -> Result<FetchOutcome> {
    match fetch_retryability(&err) {
        Retryability::Permanent => {
            store.transition_document(document_id, DocumentStatus::New, DocumentStatus::Error).await?;
            store.write_diagnostic(document_id, "fetch", "permanent", &err.to_string()).await?;
            Ok(FetchOutcome::FailedPermanently { document_id })
        }
        Retryability::Transient => {
            let retry_count = store.increment_retry_count(document_id).await?;
            if retry_count >= MAX_FETCH_RETRIES {
                store.transition_document(document_id, DocumentStatus::New, DocumentStatus::Error).await?;
                store.write_diagnostic(document_id, "fetch", "retries_exhausted", &err.to_string()).await?;
                Ok(FetchOutcome::FailedPermanently { document_id })
            } else {
                warn!(document_id, retry_count, error = %err, "fetch transient failure, will retry");
                Ok(FetchOutcome::RetryScheduled { document_id, retry_count })
            }
        }
        Retryability::Fatal => Err(err),
    }
}
