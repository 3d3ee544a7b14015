mod config;
mod health;
mod scheduler;

use anyhow::Context;
use clap::{Parser, Subcommand};
use config::Config;
use scheduler::Scheduler;
use std::process::ExitCode;
use std::sync::Arc;
use watchdog_core::Store as _;
use watchdog_gateway::Gateway as HttpGateway;
use watchdog_pipeline::HttpLlmClient;
use watchdog_store::SqliteStore;

#[derive(Parser, Debug)]
#[command(name = "watchdog")]
#[command(about = "Municipal decision-document watchdog scheduler", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one Discover pass, optionally scoped to a single Source.
    RunDiscover {
        #[arg(long)]
        source: Option<i64>,
    },
    /// Drain Discover + Fetch + Extract + Triage/CaseBuild once, or loop
    /// on the configured tick interval.
    RunPipeline {
        /// Run a single tick and exit, instead of looping forever (for
        /// operators who schedule this under system cron).
        #[arg(long)]
        once: bool,
    },
    /// Print each Source's last success, error count, cooldown status, and
    /// monthly spend.
    Health,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

fn build_scheduler(config: &Config) -> anyhow::Result<(Scheduler, Arc<SqliteStore>)> {
    let store = Arc::new(SqliteStore::open(&config.database_path).context("opening store")?);
    let gateway: Arc<dyn watchdog_core::Gateway> = Arc::new(HttpGateway::with_rate_limit(&config.contact_email, config.per_host_rate_limit));
    let llm: Arc<dyn watchdog_core::LlmClient> = Arc::new(
        HttpLlmClient::new(reqwest::Client::new(), config.llm_base_url.clone(), Some(config.llm_api_key.clone()), config.llm_model.clone())
            .context("constructing LLM client")?,
    );
    let store_dyn: Arc<dyn watchdog_core::Store> = store.clone();
    let scheduler = Scheduler::new(store_dyn, gateway, llm, config.storage_root.clone(), config.monthly_budget_eur.clone());
    Ok((scheduler, store))
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::from(2);
        }
    };

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::RunDiscover { source } => run_discover_cmd(&config, source).await,
        Commands::RunPipeline { once } => run_pipeline_cmd(&config, once).await,
        Commands::Health => run_health_cmd(&config).await,
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            tracing::error!(error = %e, "fatal error");
            ExitCode::from(2)
        }
    }
}

async fn run_discover_cmd(config: &Config, source_id: Option<i64>) -> anyhow::Result<bool> {
    let (scheduler, store) = build_scheduler(config)?;
    if let Some(id) = source_id {
        let source = store.get_source(id).await?.context("source not found")?;
        let gateway: Arc<dyn watchdog_core::Gateway> = Arc::new(HttpGateway::with_rate_limit(&config.contact_email, config.per_host_rate_limit));
        let connector = watchdog_connectors::connector_for(source.clone(), gateway);
        let outcome = watchdog_pipeline::run_discover(store.as_ref() as &dyn watchdog_core::Store, &source, connector.as_ref()).await;
        tracing::info!(
            new = outcome.new_documents,
            seen = outcome.seen_documents,
            reobserved = outcome.reobserved_documents,
            "discover complete"
        );
    } else {
        scheduler.run_discover_all().await?;
    }
    Ok(true)
}

async fn run_pipeline_cmd(config: &Config, once: bool) -> anyhow::Result<bool> {
    let (scheduler, _store) = build_scheduler(config)?;

    if once {
        scheduler.run_discover_all().await?;
        scheduler.drain_pipeline().await?;
        return Ok(true);
    }

    let mut interval = tokio::time::interval(config.tick_interval);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                scheduler.run_discover_all().await?;
                scheduler.drain_pipeline().await?;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown signal received, draining in-flight work");
                tokio::time::timeout(scheduler::SHUTDOWN_GRACE, scheduler.drain_pipeline()).await.ok();
                return Ok(true);
            }
        }
    }
}

async fn run_health_cmd(config: &Config) -> anyhow::Result<bool> {
    let (_scheduler, store) = build_scheduler(config)?;
    let report = health::build_health_report(store.as_ref() as &dyn watchdog_core::Store, config.monthly_budget_eur.clone()).await?;
    health::print_report(&report);
    Ok(!report.has_problems())
}
