//! task-router CLI - Route AI tasks across providers with quotas and fallbacks

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use task_router::{
    api::{Action, DispatchRequest, OpenAiCompatInvoker},
    cache::MemoryCacheStore,
    config::Config,
    orchestrator::Orchestrator,
    routing::Priority,
    usage::JsonFileUsageStore,
};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "task-router")]
#[command(about = "Route AI tasks across providers with daily quotas and fallback chains")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbosity level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Config file (default: ~/.config/task-router/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Usage ledger file (default: usage.ledger_path, else the user data dir)
    #[arg(long, global = true)]
    ledger: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Dispatch JSON requests, one per line, printing one JSON response per line
    Dispatch {
        /// Input file (default: stdin)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Seed for the vision estimator
        #[arg(long)]
        seed: Option<u64>,

        /// Print metrics and cache summaries to stderr when done
        #[arg(long)]
        summary: bool,
    },

    /// Show which provider a task would be routed to
    Select {
        /// Task type (e.g. urgent_diagnosis)
        #[arg(short, long)]
        task: String,

        /// free_only, low_cost, balanced or premium
        #[arg(short, long)]
        priority: Option<String>,
    },

    /// Check availability of every provider
    Health,

    /// Show usage statistics
    Usage,

    /// Manage configuration
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Initialize configuration file with defaults
    Init {
        /// Overwrite existing config
        #[arg(long)]
        force: bool,
    },

    /// Show current configuration
    Show {
        /// Show only specific section (providers, routes, cache, usage, vision)
        #[arg(short, long)]
        section: Option<String>,
    },

    /// Show configuration file path
    Path,

    /// Validate configuration
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // Responses go to stdout, so logs go to stderr
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config_path = cli.config.unwrap_or_else(Config::default_path);
    let ledger = cli.ledger;

    match cli.command {
        Commands::Dispatch {
            input,
            seed,
            summary,
        } => {
            run_dispatch(&config_path, ledger.as_deref(), input, seed, summary).await?;
        }
        Commands::Select { task, priority } => {
            run_select(&config_path, ledger.as_deref(), &task, priority.as_deref()).await?;
        }
        Commands::Health => {
            run_single(&config_path, ledger.as_deref(), Action::HealthCheck).await?;
        }
        Commands::Usage => {
            run_single(&config_path, ledger.as_deref(), Action::GetUsageStats).await?;
        }
        Commands::Config(cmd) => {
            run_config_command(&config_path, cmd).await?;
        }
    }

    Ok(())
}

/// Quotas and usage stats read from the on-disk ledger, so they carry
/// across invocations.
async fn build_orchestrator(config_path: &Path, ledger: Option<&Path>) -> Result<Orchestrator> {
    let config = Config::load_from(config_path.to_path_buf())
        .with_context(|| format!("loading {}", config_path.display()))?;

    let ledger_path = ledger
        .map(Path::to_path_buf)
        .unwrap_or_else(|| config.usage.ledger_path());
    let usage_store = JsonFileUsageStore::open(&ledger_path)
        .await
        .with_context(|| format!("opening usage ledger {}", ledger_path.display()))?;
    info!("Usage ledger: {}", ledger_path.display());

    let invoker = Arc::new(OpenAiCompatInvoker::new());
    Ok(Orchestrator::from_config(
        &config,
        invoker,
        Arc::new(usage_store),
        Arc::new(MemoryCacheStore::new(config.cache.max_entries)),
    )?)
}

async fn run_dispatch(
    config_path: &Path,
    ledger: Option<&Path>,
    input: Option<PathBuf>,
    seed: Option<u64>,
    summary: bool,
) -> Result<()> {
    let mut orchestrator = build_orchestrator(config_path, ledger).await?;
    if let Some(seed) = seed {
        orchestrator = orchestrator.with_vision_seed(seed);
    }

    let reader: Box<dyn AsyncBufRead + Unpin + Send> = match &input {
        Some(path) => {
            info!("Reading requests from {}", path.display());
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("opening {}", path.display()))?;
            Box::new(BufReader::new(file))
        }
        None => Box::new(BufReader::new(tokio::io::stdin())),
    };

    let mut lines = reader.lines();
    let mut handled = 0usize;
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let response = orchestrator.dispatch_json(line).await;
        println!("{}", serde_json::to_string(&response)?);
        handled += 1;
    }

    info!("Dispatched {} requests", handled);

    if summary {
        eprintln!("{}", orchestrator.metrics_summary());
        eprintln!("{}", orchestrator.cache_summary());
    }

    Ok(())
}

async fn run_select(
    config_path: &Path,
    ledger: Option<&Path>,
    task: &str,
    priority: Option<&str>,
) -> Result<()> {
    let orchestrator = build_orchestrator(config_path, ledger).await?;
    let priority = Priority::parse(priority);

    match orchestrator.selector().select_model(task, priority).await {
        Ok(provider_id) => {
            let route = orchestrator.selector().route(task)?;
            println!("{}", provider_id);
            println!(
                "  chain: {}",
                route.chain().collect::<Vec<_>>().join(" -> ")
            );
            println!("  timeout: {}ms", route.timeout_ms);
        }
        Err(e) => println!("{}", e),
    }

    Ok(())
}

async fn run_single(config_path: &Path, ledger: Option<&Path>, action: Action) -> Result<()> {
    let orchestrator = build_orchestrator(config_path, ledger).await?;
    let response = orchestrator.dispatch(DispatchRequest::new(action)).await;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

async fn run_config_command(config_path: &Path, cmd: ConfigCommands) -> Result<()> {
    match cmd {
        ConfigCommands::Init { force } => {
            config_init(config_path, force)?;
        }
        ConfigCommands::Show { section } => {
            config_show(config_path, section)?;
        }
        ConfigCommands::Path => {
            config_path_info(config_path);
        }
        ConfigCommands::Validate => {
            config_validate(config_path)?;
        }
    }
    Ok(())
}

fn config_init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        println!("Configuration file already exists at: {}", path.display());
        println!("Use --force to overwrite");
        return Ok(());
    }

    let config = Config::default();
    config.save_to(path.to_path_buf())?;

    println!("Configuration file created at: {}", path.display());
    println!();
    println!("Next steps:");
    println!("  Set the API key variable named by each provider's api_key_env, e.g.:");
    for provider in config.providers.iter() {
        if let Some(var) = &provider.api_key_env {
            println!("     export {}=...   # {}", var, provider.id);
        }
    }

    Ok(())
}

fn section<T: Serialize>(name: &str, value: &T) -> Result<String> {
    Ok(toml::to_string_pretty(&BTreeMap::from([(name, value)]))?)
}

fn config_show(path: &Path, section_name: Option<String>) -> Result<()> {
    let config = Config::load_from(path.to_path_buf())?;

    let display = if let Some(sec) = section_name {
        match sec.to_lowercase().as_str() {
            "providers" => section("providers", &config.providers)?,
            "routes" => section("routes", &config.routes)?,
            "cache" => section("cache", &config.cache)?,
            "usage" => section("usage", &config.usage)?,
            "vision" => section("vision", &config.vision)?,
            _ => {
                println!("Unknown section: {}", sec);
                println!("Available: providers, routes, cache, usage, vision");
                return Ok(());
            }
        }
    } else {
        toml::to_string_pretty(&config)?
    };

    println!("{}", display);

    // Show environment variable status
    println!("\n--- Environment Variables ---");
    for provider in config.providers.iter() {
        if let Some(var) = &provider.api_key_env {
            let status = if std::env::var(var).is_ok() { "set" } else { "not set" };
            println!("{} ({}): {}", var, provider.id, status);
        }
    }
    println!(
        "TASK_ROUTER_CACHE_TTL: {}",
        std::env::var("TASK_ROUTER_CACHE_TTL").unwrap_or_else(|_| "not set".to_string())
    );
    println!(
        "TASK_ROUTER_CACHE_ENABLED: {}",
        std::env::var("TASK_ROUTER_CACHE_ENABLED").unwrap_or_else(|_| "not set".to_string())
    );

    Ok(())
}

fn config_path_info(path: &Path) {
    println!("{}", path.display());

    if path.exists() {
        println!("(file exists)");
    } else {
        println!("(file does not exist - run 'config init' to create)");
    }
}

fn config_validate(path: &Path) -> Result<()> {
    let config = Config::load_from(path.to_path_buf())?;

    match config.validate() {
        Ok(()) => {
            println!("Configuration is valid");
            println!("  providers: {}", config.providers.len());
            println!("  routes: {}", config.routes.len());
            println!(
                "  cache: {} (ttl {}s)",
                if config.cache.enabled { "enabled" } else { "disabled" },
                config.cache.ttl_secs
            );

            let missing: Vec<_> = config
                .providers
                .iter()
                .filter_map(|p| p.api_key_env.as_ref().map(|var| (p, var)))
                .filter(|(_, var)| std::env::var(var).is_err())
                .collect();
            for (provider, var) in missing {
                println!("  warning: {} not set, '{}' calls will fail", var, provider.id);
            }
        }
        Err(e) => {
            println!("Configuration error: {}", e);
        }
    }

    Ok(())
}
