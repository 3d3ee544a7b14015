//! Triage (LLM pass 1) and Case Build (LLM pass 2) stage runner
//! (spec.md §4.D). Both claim from the same `extracted` status, so one
//! worker runs them back to back for a candidate document, the way the
//! spec describes Case Build following directly from a Triage hit.

use crate::budget::call_is_within_budget;
use crate::keyword_gate::passes_keyword_gate;
use crate::prompt::{build_case_build_prompt, build_triage_prompt, CaseBuildInput, TriageInput};
use bigdecimal::BigDecimal;
use std::str::FromStr;
use watchdog_core::{
    doc_type_participates_in_case_build, Category, DocumentStatus, LlmClient, MergeCandidate, NewCase, NewEvidence, Result, Stage, Store,
};

/// `relevance_score` at or above this proceeds to Case Build (spec.md §8
/// boundary behavior #11: 0.49 does not qualify, 0.50 does).
const RELEVANCE_THRESHOLD: f64 = 0.5;

/// A Case Build merge candidate scoring above this is updated in place
/// rather than spawning a new Case (spec.md §4.D).
const MERGE_THRESHOLD: f64 = 0.8;

/// spec.md §6 LLM contract: "parse failure counts as a retryable error
/// (≤2 attempts) then error" — applied uniformly to any `LlmClient` failure,
/// transport or malformed response, not just JSON parse errors.
const MAX_LLM_RETRIES: u32 = 2;

pub enum TriageOutcome {
    NoWork,
    ShortCircuited { document_id: i64 },
    NotRelevant { document_id: i64 },
    BudgetExhausted { document_id: i64 },
    RetryScheduled { document_id: i64 },
    FailedPermanently { document_id: i64 },
    CaseBuilt { document_id: i64, case_id: i64, merged: bool },
}

async fn handle_llm_failure(store: &dyn Store, document_id: i64, stage_name: &str, err: watchdog_core::Error) -> Result<TriageOutcome> {
    let retry_count = store.increment_retry_count(document_id).await?;
    if retry_count >= MAX_LLM_RETRIES {
        store.transition_document(document_id, DocumentStatus::Extracted, DocumentStatus::Error).await?;
        store.write_diagnostic(document_id, stage_name, "parse_failure", &err.to_string()).await?;
        tracing::warn!(document_id, stage = stage_name, error = %err, "llm call failed after retries, document errored");
        Ok(TriageOutcome::FailedPermanently { document_id })
    } else {
        tracing::warn!(document_id, retry_count, stage = stage_name, error = %err, "llm call failed, will retry");
        Ok(TriageOutcome::RetryScheduled { document_id })
    }
}

fn default_monthly_budget() -> BigDecimal {
    BigDecimal::from_str("10").unwrap()
}

async fn concatenated_text(store: &dyn Store, document_id: i64) -> Result<String> {
    let files = store.list_files(document_id).await?;
    Ok(files.into_iter().map(|f| f.text_content).collect::<Vec<_>>().join("\n\n"))
}

pub async fn run_triage_and_case_build_one(store: &dyn Store, llm: &dyn LlmClient, monthly_budget_eur: Option<BigDecimal>) -> Result<TriageOutcome> {
    let monthly_budget = monthly_budget_eur.unwrap_or_else(default_monthly_budget);

    let Some(doc) = store.claim_next(Stage::Triage).await? else {
        return Ok(TriageOutcome::NoWork);
    };

    let source = store.get_source(doc.source_id).await?;
    let municipality = source.as_ref().map(|s| s.municipality.clone()).unwrap_or_default();
    let text = concatenated_text(store, doc.id).await?;
    let text_head: String = text.chars().take(2000).collect();

    if !passes_keyword_gate(&doc.title, &doc.body, &text_head) {
        store.transition_document(doc.id, doc.status, DocumentStatus::Processed).await?;
        return Ok(TriageOutcome::ShortCircuited { document_id: doc.id });
    }

    let spent = store.month_to_date_cost().await?;
    // A Triage call's projected cost is small and unknown until after the
    // call; use a conservative flat estimate for the pre-call budget check,
    // matching spec.md §4.D's "projected cost" phrasing.
    let projected_triage_cost = BigDecimal::from_str("0.01").unwrap();
    if !call_is_within_budget(&spent, &projected_triage_cost, &monthly_budget) {
        return Ok(TriageOutcome::BudgetExhausted { document_id: doc.id });
    }

    let (triage_prompt, _truncated) = build_triage_prompt(&TriageInput {
        municipality: &municipality,
        body: &doc.body,
        title: &doc.title,
        meeting_date: doc.meeting_date,
        headings: &[],
        text: &text,
    });

    let (triage_response, tokens_in, tokens_out, cost) = match llm.triage(&triage_prompt).await {
        Ok(v) => v,
        Err(e) => return handle_llm_failure(store, doc.id, "triage", e).await,
    };
    store.record_llm_usage(doc.id, Stage::Triage, "triage", tokens_in, tokens_out, cost).await?;

    if triage_response.relevance_score < RELEVANCE_THRESHOLD || triage_response.categories.is_empty() || !doc_type_participates_in_case_build(doc.doc_type) {
        store.transition_document(doc.id, doc.status, DocumentStatus::Processed).await?;
        return Ok(TriageOutcome::NotRelevant { document_id: doc.id });
    }

    let spent = store.month_to_date_cost().await?;
    let projected_case_build_cost = BigDecimal::from_str("0.05").unwrap();
    if !call_is_within_budget(&spent, &projected_case_build_cost, &monthly_budget) {
        return Ok(TriageOutcome::BudgetExhausted { document_id: doc.id });
    }

    let (case_build_prompt, _truncated) = build_case_build_prompt(&CaseBuildInput {
        municipality: &municipality,
        body: &doc.body,
        title: &doc.title,
        meeting_date: doc.meeting_date,
        source_url: &doc.source_url,
        text: &text,
    });

    let (case_build, tokens_in, tokens_out, cost) = match llm.case_build(&case_build_prompt).await {
        Ok(v) => v,
        Err(e) => return handle_llm_failure(store, doc.id, "case_build", e).await,
    };
    store.record_llm_usage(doc.id, Stage::CaseBuild, "case_build", tokens_in, tokens_out, cost).await?;

    let category = triage_response.categories.first().copied().unwrap_or(Category::Zoning);
    let files = store.list_files(doc.id).await?;
    // Each evidence snippet cites the File it was drawn from by `source_url`
    // (the only identifying field the LLM response carries, per spec.md §6);
    // fall back to the Document's first File only if nothing matches, so a
    // single-file Document with a slightly mismatched URL still gets a real
    // `file_id` rather than a dangling `0`.
    let evidence: Vec<NewEvidence> = case_build
        .evidence
        .iter()
        .map(|e| NewEvidence {
            file_id: files
                .iter()
                .find(|f| f.url == e.source_url)
                .or_else(|| files.first())
                .map(|f| f.id)
                .unwrap_or(0),
            document_id: doc.id,
            page: e.page,
            snippet: e.snippet.clone(),
            source_url: e.source_url.clone(),
        })
        .collect();

    let draft = NewCase {
        primary_category: category,
        headline: case_build.headline.clone(),
        summary: case_build.summary.clone(),
        status: case_build.status,
        confidence: case_build.confidence,
        confidence_reason: case_build.confidence_reason.clone(),
        municipality: municipality.clone(),
        entities: case_build.entities.clone(),
        locations: case_build.locations.clone(),
    };

    let candidates: Vec<MergeCandidate> = store
        .find_merge_candidates(&case_build.entities, &case_build.locations, &case_build.headline, &municipality, category)
        .await?;
    let best = candidates.into_iter().filter(|c| c.score > MERGE_THRESHOLD).max_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(std::cmp::Ordering::Equal));

    let (case_id, merged) = match best {
        Some(candidate) => {
            store.merge_into_case(candidate.case_id, &draft, &evidence).await?;
            (candidate.case_id, true)
        }
        None => {
            let case_id = store.create_case(&draft, &evidence).await?;
            (case_id, false)
        }
    };

    store.transition_document(doc.id, doc.status, DocumentStatus::Processed).await?;
    Ok(TriageOutcome::CaseBuilt { document_id: doc.id, case_id, merged })
}
