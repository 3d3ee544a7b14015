//! Monthly LLM budget enforcement (spec.md §4.D "Budget enforcement").

use bigdecimal::BigDecimal;

/// Whether an LLM call projected to cost `projected_cost_eur` should be
/// allowed to proceed, given `spent_so_far` this calendar month and the
/// configured `monthly_budget_eur`.
pub fn call_is_within_budget(spent_so_far: &BigDecimal, projected_cost_eur: &BigDecimal, monthly_budget_eur: &BigDecimal) -> bool {
    &(spent_so_far + projected_cost_eur) <= monthly_budget_eur
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    // Scenario S5 (spec.md §8): €9.98 spent, €0.05 projected, €10 budget.
    #[test]
    fn s5_projected_call_over_budget_is_rejected() {
        let spent = BigDecimal::from_str("9.98").unwrap();
        let projected = BigDecimal::from_str("0.05").unwrap();
        let budget = BigDecimal::from_str("10").unwrap();
        assert!(!call_is_within_budget(&spent, &projected, &budget));
    }

    #[test]
    fn call_exactly_at_budget_is_allowed() {
        let spent = BigDecimal::from_str("9.95").unwrap();
        let projected = BigDecimal::from_str("0.05").unwrap();
        let budget = BigDecimal::from_str("10").unwrap();
        assert!(call_is_within_budget(&spent, &projected, &budget));
    }
}
