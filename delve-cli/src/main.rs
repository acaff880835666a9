//! Delve CLI: run a deep-research job from the terminal.
//!
//! Streams status events as the run progresses and prints the final report.

mod commands;
mod render;

use clap::Parser;
use delve_core::{DelveConfig, ResearchOrchestrator, StatusKind};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Query used by `--demo`.
pub(crate) const DEMO_QUERY: &str = "Latest updates of the IRS 2024 tax code changes";

/// Delve: plan, search, evaluate, and write a research report
#[derive(Parser, Debug)]
#[command(name = "delve", version, about, long_about = None)]
struct Cli {
    /// Research query
    query: Option<String>,

    /// Run the built-in demo query
    #[arg(long, conflicts_with = "query")]
    demo: bool,

    /// Maximum plan/search/evaluate rounds
    #[arg(long)]
    max_rounds: Option<usize>,

    /// Skip email delivery even when configured
    #[arg(long)]
    no_email: bool,

    /// LLM model to use
    #[arg(short, long)]
    model: Option<String>,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Workspace directory
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    /// Print status events as JSON lines
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand, Debug)]
pub(crate) enum Commands {
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
pub(crate) enum ConfigAction {
    /// Create a default workspace configuration file
    Init,
    /// Show the effective configuration
    Show,
    /// Report configuration warnings
    Validate,
}

impl Cli {
    fn resolved_query(&self) -> Option<String> {
        if self.demo {
            return Some(DEMO_QUERY.to_string());
        }
        self.query
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .map(str::to_string)
    }

    fn apply_overrides(&self, config: &mut DelveConfig) {
        if let Some(model) = &self.model {
            config.llm.model = model.clone();
        }
        if let Some(max_rounds) = self.max_rounds {
            config.research.max_rounds = max_rounds;
        }
        if self.no_email {
            config.email.enabled = false;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn,delve=info,delve_core=info",
        1 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    let log_dir = directories::ProjectDirs::from("dev", "delve", "delve")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "delve.log");
    let (non_blocking, log_guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    if let Some(command) = cli.command {
        return commands::handle_command(command, &workspace, cli.config.as_deref()).await;
    }

    let Some(query) = cli.resolved_query() else {
        anyhow::bail!("A research query is required (or pass --demo)");
    };

    let mut config = delve_core::config::load_config(Some(&workspace), cli.config.as_deref(), None)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    cli.apply_overrides(&mut config);
    for warning in config.validate() {
        tracing::warn!("{}", warning);
    }

    let llm = delve_core::providers::create_provider(&config.llm)
        .map_err(|e| anyhow::anyhow!("LLM provider error: {}", e))?;
    let search = delve_tools::create_search_provider(
        &config.search,
        Duration::from_secs(config.research.search_timeout_secs),
    )
    .map_err(|e| anyhow::anyhow!("Search provider error: {}", e))?;
    let orchestrator = ResearchOrchestrator::from_config(&config, llm, search)
        .map_err(|e| anyhow::anyhow!("Email setup error: {}", e))?;
    let orchestrator = Arc::new(orchestrator);

    let mut run = orchestrator.start(query);
    let mut renderer = render::Renderer::new(cli.json, cli.quiet);
    let mut failed = false;
    let mut interrupted = false;

    loop {
        tokio::select! {
            event = run.next_event() => {
                let Some(event) = event else { break };
                if matches!(event.kind, StatusKind::Error(_)) {
                    failed = true;
                }
                renderer.print(&event)?;
            }
            _ = tokio::signal::ctrl_c() => {
                interrupted = true;
                break;
            }
        }
    }

    if interrupted {
        eprintln!("\nInterrupted, cancelling research run...");
        run.cancel();
        failed = true;
    }

    if failed {
        drop(log_guard);
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demo_query() {
        let cli = Cli::parse_from(["delve", "--demo"]);
        assert_eq!(cli.resolved_query().as_deref(), Some(DEMO_QUERY));
    }

    #[test]
    fn test_blank_query_is_rejected() {
        let cli = Cli::parse_from(["delve", "   "]);
        assert!(cli.resolved_query().is_none());
    }

    #[test]
    fn test_demo_conflicts_with_query() {
        assert!(Cli::try_parse_from(["delve", "--demo", "rust async"]).is_err());
    }

    #[test]
    fn test_overrides_applied() {
        let cli = Cli::parse_from([
            "delve",
            "--max-rounds",
            "5",
            "--no-email",
            "--model",
            "gpt-4o-mini",
            "best hikes near Atlanta",
        ]);
        let mut config = DelveConfig::default();
        config.email.enabled = true;
        cli.apply_overrides(&mut config);
        assert_eq!(config.research.max_rounds, 5);
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert!(!config.email.enabled);
    }

    #[test]
    fn test_config_subcommand_parses() {
        let cli = Cli::parse_from(["delve", "config", "validate"]);
        assert!(matches!(
            cli.command,
            Some(Commands::Config {
                action: ConfigAction::Validate
            })
        ));
    }
}
