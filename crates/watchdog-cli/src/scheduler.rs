use bigdecimal::BigDecimal;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;
use watchdog_core::{Gateway, LlmClient, Source, Store};
use watchdog_pipeline::{run_discover, run_extract_one, run_fetch_one, run_triage_and_case_build_one, ExtractOutcome, FetchOutcome, TriageOutcome};

/// Up to N sources Discovered in parallel (spec.md §5).
pub const DISCOVER_CONCURRENCY: usize = 8;
pub const FETCH_WORKERS: usize = 4;
pub const EXTRACT_WORKERS: usize = 2;
pub const TRIAGE_WORKERS: usize = 2;

/// Per-tick time budget for draining Fetch → Extract → Triage/CaseBuild
/// (spec.md §4.E).
pub const PER_TICK_BUDGET: Duration = Duration::from_secs(600);

pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(60);

const COOLDOWN_FAILURE_THRESHOLD: u32 = 10;
const COOLDOWN_MAX_EXPONENT: u32 = 12;
const STALE_SUCCESS_HOURS: i64 = 72;

/// Whether `source` is held back from Discover under exponential cooldown
/// (spec.md §4.E): `consecutive_failures >= 10` delays the next attempt to
/// `last_attempt_at + 2^min(failures-10, 12)` minutes.
pub fn in_cooldown(source: &Source, now: chrono::DateTime<Utc>) -> bool {
    if source.consecutive_failures < COOLDOWN_FAILURE_THRESHOLD {
        return false;
    }
    let Some(last_attempt) = source.last_attempt_at else {
        return false;
    };
    let exponent = (source.consecutive_failures - COOLDOWN_FAILURE_THRESHOLD).min(COOLDOWN_MAX_EXPONENT);
    let cooldown_minutes = 2i64.pow(exponent);
    now < last_attempt + chrono::Duration::minutes(cooldown_minutes)
}

/// Whether `source` should be flagged for admin attention: no successful
/// Discover in the last 72 hours (spec.md §4.E).
pub fn is_stale(source: &Source, now: chrono::DateTime<Utc>) -> bool {
    match source.last_success_at {
        Some(t) => now - t > chrono::Duration::hours(STALE_SUCCESS_HOURS),
        None => true,
    }
}

/// Owns the library handles a tick needs; explicit value passed around by
/// the process entry point rather than a global (spec.md §9 "Design
/// Notes" — no global scheduler singleton).
pub struct Scheduler {
    store: Arc<dyn Store>,
    gateway: Arc<dyn Gateway>,
    llm: Arc<dyn LlmClient>,
    storage_root: PathBuf,
    monthly_budget_eur: BigDecimal,
}

impl Scheduler {
    pub fn new(store: Arc<dyn Store>, gateway: Arc<dyn Gateway>, llm: Arc<dyn LlmClient>, storage_root: PathBuf, monthly_budget_eur: BigDecimal) -> Self {
        Self { store, gateway, llm, storage_root, monthly_budget_eur }
    }

    /// Enqueues a Discover run for every enabled, non-cooldown Source, up
    /// to `DISCOVER_CONCURRENCY` at a time.
    pub async fn run_discover_all(&self) -> anyhow::Result<()> {
        let now = Utc::now();
        let sources = self.store.enabled_sources().await?;
        let due: Vec<Source> = sources.into_iter().filter(|s| !in_cooldown(s, now)).collect();

        let mut join_set = tokio::task::JoinSet::new();
        let mut iter = due.into_iter();
        let mut in_flight = 0usize;

        loop {
            while in_flight < DISCOVER_CONCURRENCY {
                let Some(source) = iter.next() else { break };
                let store = self.store.clone();
                let gateway = self.gateway.clone();
                join_set.spawn(async move {
                    let connector = watchdog_connectors::connector_for(source.clone(), gateway);
                    run_discover(store.as_ref(), &source, connector.as_ref()).await
                });
                in_flight += 1;
            }
            let Some(res) = join_set.join_next().await else { break };
            in_flight = in_flight.saturating_sub(1);
            if let Err(e) = res {
                warn!(error = %e, "discover task panicked");
            }
        }
        Ok(())
    }

    /// Drains Fetch → Extract → Triage/CaseBuild until no work remains on
    /// any stage or the per-tick time budget expires.
    pub async fn drain_pipeline(&self) -> anyhow::Result<()> {
        let deadline = Instant::now() + PER_TICK_BUDGET;
        self.drain_fetch(deadline).await;
        self.drain_extract(deadline).await;
        self.drain_triage(deadline).await;
        Ok(())
    }

    async fn drain_fetch(&self, deadline: Instant) {
        let mut set = tokio::task::JoinSet::new();
        for _ in 0..FETCH_WORKERS {
            let store = self.store.clone();
            let gateway = self.gateway.clone();
            let root = self.storage_root.clone();
            set.spawn(async move {
                loop {
                    if Instant::now() >= deadline {
                        return;
                    }
                    match run_fetch_one(store.as_ref(), gateway.as_ref(), &root).await {
                        Ok(FetchOutcome::NoWork) => return,
                        Ok(_) => continue,
                        Err(e) => {
                            warn!(error = %e, "fetch worker error");
                            return;
                        }
                    }
                }
            });
        }
        while set.join_next().await.is_some() {}
    }

    async fn drain_extract(&self, deadline: Instant) {
        let mut set = tokio::task::JoinSet::new();
        for _ in 0..EXTRACT_WORKERS {
            let store = self.store.clone();
            set.spawn(async move {
                loop {
                    if Instant::now() >= deadline {
                        return;
                    }
                    match run_extract_one(store.as_ref()).await {
                        Ok(ExtractOutcome::NoWork) => return,
                        Ok(_) => continue,
                        Err(e) => {
                            warn!(error = %e, "extract worker error");
                            return;
                        }
                    }
                }
            });
        }
        while set.join_next().await.is_some() {}
    }

    /// Triage and Case Build share one claimed-document lifecycle (both
    /// claim from `extracted`), so they're drained by the same worker pool
    /// — bounding Triage/CaseBuild concurrency together bounds LLM
    /// concurrency, which is the resource §5 actually cares about.
    async fn drain_triage(&self, deadline: Instant) {
        let mut set = tokio::task::JoinSet::new();
        for _ in 0..TRIAGE_WORKERS {
            let store = self.store.clone();
            let llm = self.llm.clone();
            let budget = self.monthly_budget_eur.clone();
            set.spawn(async move {
                loop {
                    if Instant::now() >= deadline {
                        return;
                    }
                    match run_triage_and_case_build_one(store.as_ref(), llm.as_ref(), Some(budget.clone())).await {
                        Ok(TriageOutcome::NoWork) => return,
                        Ok(TriageOutcome::BudgetExhausted { .. }) => return,
                        Ok(_) => continue,
                        Err(e) => {
                            warn!(error = %e, "triage worker error");
                            return;
                        }
                    }
                }
            });
        }
        while set.join_next().await.is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use watchdog_core::Platform;

    fn sample_source(consecutive_failures: u32, last_attempt_at: Option<chrono::DateTime<Utc>>) -> Source {
        Source {
            id: 1,
            municipality: "Salla".to_string(),
            platform: Platform::TWeb,
            base_url: "http://salla.tweb.fi".to_string(),
            enabled: true,
            config: Default::default(),
            last_success_at: None,
            last_attempt_at,
            last_error: None,
            consecutive_failures,
        }
    }

    #[test]
    fn under_the_failure_threshold_is_never_in_cooldown() {
        let now = Utc::now();
        let source = sample_source(9, Some(now));
        assert!(!in_cooldown(&source, now));
    }

    #[test]
    fn at_the_threshold_cooldown_expires_after_one_minute() {
        let now = Utc::now();
        let last_attempt = now - chrono::Duration::minutes(2);
        let source = sample_source(10, Some(last_attempt));
        assert!(!in_cooldown(&source, now));
    }

    #[test]
    fn at_the_threshold_cooldown_is_active_immediately_after() {
        let now = Utc::now();
        let source = sample_source(10, Some(now));
        assert!(in_cooldown(&source, now));
    }

    #[test]
    fn cooldown_exponent_is_capped_at_twelve() {
        let now = Utc::now();
        // 22 failures over threshold would be 2^12 minutes either way; a
        // failure count far past the cap must not overflow or panic.
        let last_attempt = now - chrono::Duration::minutes(1);
        let source = sample_source(10 + 40, Some(last_attempt));
        assert!(in_cooldown(&source, now));
    }

    #[test]
    fn never_succeeded_is_stale() {
        let source = sample_source(0, None);
        assert!(is_stale(&source, Utc::now()));
    }
}
