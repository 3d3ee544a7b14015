use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use watchdog_core::{Error, Result};

/// Process configuration, read once at startup (spec.md §6). Kept as an
/// explicit struct rather than `clap(env)` fields directly on the CLI args
/// so the library crates this binary wires together never depend on
/// `clap` themselves.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: PathBuf,
    pub storage_root: PathBuf,
    pub llm_base_url: String,
    pub llm_api_key: String,
    pub llm_model: String,
    pub monthly_budget_eur: bigdecimal::BigDecimal,
    pub tick_interval: Duration,
    pub per_host_rate_limit: Duration,
    pub contact_email: String,
}

fn required(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| Error::NotConfigured(format!("missing required env var {key}")))
}

fn optional_with_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let database_path = PathBuf::from(optional_with_default("DATABASE_URL", "./data/watchdog.db"));
        let storage_root = PathBuf::from(optional_with_default("STORAGE_ROOT", "./data/files"));
        let contact_email = required("CONTACT_EMAIL")?;
        let llm_base_url = required("LLM_BASE_URL")?;
        let llm_api_key = required("LLM_API_KEY")?;
        let llm_model = optional_with_default("LLM_MODEL", "gpt-4o-mini");

        let monthly_budget_eur = bigdecimal::BigDecimal::from_str(&optional_with_default("MONTHLY_BUDGET_EUR", "10"))
            .map_err(|e| Error::NotConfigured(format!("MONTHLY_BUDGET_EUR: {e}")))?;

        let tick_interval_seconds: u64 = optional_with_default("TICK_INTERVAL_SECONDS", "900")
            .parse()
            .map_err(|e| Error::NotConfigured(format!("TICK_INTERVAL_SECONDS: {e}")))?;

        let per_host_rate_limit_ms: u64 = optional_with_default("PER_HOST_RATE_LIMIT_MS", "1000")
            .parse()
            .map_err(|e| Error::NotConfigured(format!("PER_HOST_RATE_LIMIT_MS: {e}")))?;

        Ok(Self {
            database_path,
            storage_root,
            llm_base_url,
            llm_api_key,
            llm_model,
            monthly_budget_eur,
            tick_interval: Duration::from_secs(tick_interval_seconds),
            per_host_rate_limit: Duration::from_millis(per_host_rate_limit_ms),
            contact_email,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optional_with_default_falls_back_when_env_var_is_absent() {
        std::env::remove_var("WATCHDOG_CLI_TEST_UNSET_KEY");
        assert_eq!(optional_with_default("WATCHDOG_CLI_TEST_UNSET_KEY", "fallback"), "fallback");
    }
}
