//! Career Frontier main entry point
//!
//! Command-line interface for the career page frontier engine.

use anyhow::{bail, Context};
use career_frontier::classify::{build_classifier, ClassificationGate};
use career_frontier::config::{load_config_with_hash, Config};
use career_frontier::crawler::{
    CrawlOrchestrator, HttpPageFetcher, PoliteFetcher, PolitenessGate, RetryPolicy,
    RevalidationScheduler, SharedStore,
};
use career_frontier::probe::ProbeStrategyChain;
use career_frontier::storage::{open_storage, FrontierStore, SqliteStorage};
use career_frontier::FrontierState;
use chrono::Utc;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Career Frontier: finds and maintains the job-listing pages of company websites
///
/// Without a mode flag, runs one crawl cycle over every crawl-enabled company.
#[derive(Parser, Debug)]
#[command(name = "career-frontier")]
#[command(version)]
#[command(about = "Discovers and revalidates company career pages", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate the configuration and exit
    #[arg(long, group = "mode")]
    dry_run: bool,

    /// Run a revalidation pass over stale targets
    #[arg(long, group = "mode")]
    revalidate: bool,

    /// Print the targets of every company and exit
    #[arg(long, group = "mode")]
    targets: bool,

    /// Re-arm the root probe of a company
    #[arg(long, value_name = "COMPANY_ID", group = "mode")]
    retrigger: Option<i64>,

    /// Re-arm roots without a career page that are older than the probe cool-down
    #[arg(long, group = "mode")]
    retrigger_stale_probes: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load configuration {}", cli.config.display()))?;
    tracing::info!(hash = %hash, "configuration loaded");

    if cli.dry_run {
        print_dry_run(&config);
        return Ok(());
    }

    let mut storage = open_storage(Path::new(&config.storage.database_path))
        .with_context(|| format!("failed to open database {}", config.storage.database_path))?;
    sync_companies(&mut storage, &config)?;

    if cli.targets {
        return print_targets(&storage);
    }
    if let Some(company_id) = cli.retrigger {
        return retrigger_company(&mut storage, company_id);
    }
    if cli.retrigger_stale_probes {
        return retrigger_stale_probes(&mut storage, &config);
    }

    let store = SharedStore::new(storage);
    let fetcher = build_fetcher(&config)?;
    let classifier = build_classifier(
        &config.classifier,
        &config.probe,
        Duration::from_secs(config.crawler.classify_timeout),
    )
    .context("failed to build classifier")?;
    let gate = Arc::new(ClassificationGate::from_config(
        classifier,
        &config.policy,
        &config.crawler,
    ));

    if cli.revalidate {
        let scheduler =
            RevalidationScheduler::new(store.clone(), fetcher, gate, &config.policy, &config.crawler);
        cancel_on_ctrl_c(scheduler.cancellation_token());
        scheduler.run_pass().await.context("revalidation pass failed")?;
    } else {
        let orchestrator = CrawlOrchestrator::new(
            store.clone(),
            fetcher,
            ProbeStrategyChain::new(config.probe.clone()),
            gate,
            &config.crawler,
        );
        cancel_on_ctrl_c(orchestrator.cancellation_token());
        orchestrator.run_cycle().await.context("crawl cycle failed")?;
    }

    log_state_counts(&store)?;
    Ok(())
}

/// Sets up the tracing subscriber based on verbosity
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("career_frontier=info,warn"),
            1 => EnvFilter::new("career_frontier=debug,info"),
            _ => EnvFilter::new("career_frontier=trace,debug"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, stopping after the current work items");
            token.cancel();
        }
    });
}

fn build_fetcher(config: &Config) -> anyhow::Result<Arc<PoliteFetcher>> {
    let http = HttpPageFetcher::new(
        &config.user_agent,
        Duration::from_secs(config.crawler.fetch_timeout),
    )
    .context("failed to build HTTP client")?;

    Ok(Arc::new(PoliteFetcher::new(
        Arc::new(http),
        PolitenessGate::from_config(&config.crawler),
        RetryPolicy::from_config(&config.crawler),
    )))
}

/// Mirrors the configured companies into the store, by root URL
fn sync_companies(storage: &mut SqliteStorage, config: &Config) -> anyhow::Result<()> {
    for company in &config.companies {
        let company_id = storage
            .upsert_company_root(&company.name, &company.url, company.enabled)
            .with_context(|| format!("failed to register company {}", company.name))?;
        tracing::debug!(company_id, company = %company.name, enabled = company.enabled, "company registered");
    }
    Ok(())
}

fn print_dry_run(config: &Config) {
    println!("=== Career Frontier Dry Run ===\n");

    println!("Crawler:");
    println!("  Workers: {}", config.crawler.workers);
    println!("  Crawl budget per company: {}", config.crawler.crawl_budget);
    println!("  Max depth: {}", config.crawler.max_depth);
    println!(
        "  Minimum request interval: {}ms",
        config.crawler.minimum_request_interval
    );
    println!(
        "  Attempts: {} (backoff {}ms..{}ms)",
        config.crawler.max_attempts, config.crawler.backoff_base, config.crawler.backoff_max
    );

    println!("\nPolicy:");
    println!("  Acceptance confidence: {}", config.policy.acceptance_confidence);
    println!("  Staleness window: {}h", config.policy.staleness_window);
    println!(
        "  Provisional staleness window: {}h",
        config.policy.provisional_staleness_window
    );

    println!("\nUser agent: {}", config.user_agent.header_value());
    println!("Database: {}", config.storage.database_path);

    println!("\nCompanies ({}):", config.companies.len());
    for company in &config.companies {
        let flag = if company.enabled { "" } else { " (disabled)" };
        println!("  - {} <{}>{}", company.name, company.url, flag);
    }

    println!("\nConfiguration is valid");
}

fn print_targets(storage: &SqliteStorage) -> anyhow::Result<()> {
    for company in storage.list_company_roots(false)? {
        let targets = storage.list_targets(company.company_id)?;
        println!("{} [{}] {} target(s)", company.name, company.company_id, targets.len());
        for target in targets {
            let marker = match target.state {
                FrontierState::TargetConfirmed => "confirmed",
                _ => "provisional",
            };
            println!(
                "  {:<11} {:>3}  {}",
                marker,
                target.confidence.unwrap_or(0),
                target.url
            );
        }
    }
    Ok(())
}

fn retrigger_company(storage: &mut SqliteStorage, company_id: i64) -> anyhow::Result<()> {
    let company = storage
        .get_company_root(company_id)
        .with_context(|| format!("unknown company {}", company_id))?;
    let Some(root) = storage.root_entry(company_id)? else {
        println!("{} has no root entry yet; the next crawl cycle creates it", company.name);
        return Ok(());
    };

    if !root.state.can_retrigger(root.depth) {
        println!("{}: root probe is {}, nothing to re-arm", company.name, root.state);
        return Ok(());
    }

    storage.retrigger(root.entry_id, root.state)?;
    println!("{}: root probe re-armed (was {})", company.name, root.state);
    Ok(())
}

fn retrigger_stale_probes(storage: &mut SqliteStorage, config: &Config) -> anyhow::Result<()> {
    let Some(cooldown) = config.crawler.probe_cooldown_window() else {
        bail!("crawler.probe-cooldown is not configured");
    };

    let before = Utc::now() - cooldown;
    let stale = storage.list_stale_probes(before)?;
    for entry in &stale {
        storage.retrigger(entry.entry_id, entry.state)?;
        tracing::info!(company_id = entry.company_id, url = %entry.url, "root probe re-armed");
    }
    println!("Re-armed {} root probe(s)", stale.len());
    Ok(())
}

fn log_state_counts(store: &SharedStore<SqliteStorage>) -> anyhow::Result<()> {
    let counts = store.lock()?.count_by_state(None)?;
    for state in FrontierState::all_states() {
        if let Some(count) = counts.get(&state) {
            tracing::info!(state = %state, count, "frontier entries");
        }
    }
    Ok(())
}
