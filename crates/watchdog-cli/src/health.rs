use crate::scheduler::{in_cooldown, is_stale};
use bigdecimal::BigDecimal;
use chrono::Utc;
use watchdog_core::{Source, Store};

/// Outcome of a `health` run: exit code 0 if every source is healthy, 1 if
/// any source has an error/cooldown/staleness condition surfaced (spec.md
/// §6 — exit codes 0/1/2).
pub struct HealthReport {
    pub sources: Vec<SourceHealth>,
    pub month_to_date_cost_eur: BigDecimal,
    pub monthly_budget_eur: BigDecimal,
}

pub struct SourceHealth {
    pub municipality: String,
    pub platform: String,
    pub last_success_at: Option<chrono::DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub in_cooldown: bool,
    pub stale: bool,
}

impl HealthReport {
    /// Any source with a recorded error, an active cooldown, or a stale
    /// `last_success_at`, or a month_to_date spend at/over budget.
    pub fn has_problems(&self) -> bool {
        self.month_to_date_cost_eur >= self.monthly_budget_eur
            || self.sources.iter().any(|s| s.last_error.is_some() || s.in_cooldown || s.stale)
    }
}

pub async fn build_health_report(store: &dyn Store, monthly_budget_eur: BigDecimal) -> watchdog_core::Result<HealthReport> {
    let now = Utc::now();
    let sources: Vec<Source> = store.enabled_sources().await?;
    let month_to_date_cost_eur = store.month_to_date_cost().await?;

    let sources = sources
        .into_iter()
        .map(|s| SourceHealth {
            municipality: s.municipality.clone(),
            platform: format!("{:?}", s.platform),
            last_success_at: s.last_success_at,
            consecutive_failures: s.consecutive_failures,
            last_error: s.last_error.clone(),
            in_cooldown: in_cooldown(&s, now),
            stale: is_stale(&s, now),
        })
        .collect();

    Ok(HealthReport { sources, month_to_date_cost_eur, monthly_budget_eur })
}

pub fn print_report(report: &HealthReport) {
    println!("monthly spend: {} / {} EUR{}", report.month_to_date_cost_eur, report.monthly_budget_eur, if report.month_to_date_cost_eur >= report.monthly_budget_eur { " (budget exhausted)" } else { "" });
    for s in &report.sources {
        let last_success = s.last_success_at.map(|t| t.to_rfc3339()).unwrap_or_else(|| "never".to_string());
        println!(
            "{} ({}): last_success={} consecutive_failures={} cooldown={} stale={}{}",
            s.municipality,
            s.platform,
            last_success,
            s.consecutive_failures,
            s.in_cooldown,
            s.stale,
            s.last_error.as_ref().map(|e| format!(" last_error={e:?}")).unwrap_or_default(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn report(spend: &str, budget: &str) -> HealthReport {
        HealthReport {
            sources: vec![],
            month_to_date_cost_eur: BigDecimal::from_str(spend).unwrap(),
            monthly_budget_eur: BigDecimal::from_str(budget).unwrap(),
        }
    }

    #[test]
    fn budget_at_the_ceiling_counts_as_a_problem() {
        assert!(report("10", "10").has_problems());
    }

    #[test]
    fn budget_under_the_ceiling_with_no_sources_has_no_problems() {
        assert!(!report("9.98", "10").has_problems());
    }
}
