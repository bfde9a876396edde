use std::path::PathBuf;

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};

mod cmd_backtest;
mod cmd_eval;
mod cmd_run;
mod cmd_test;
mod setup;

#[derive(Parser)]
#[command(name = "aectl", about = "Alert rule evaluation against recorded series")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every subcommand.
#[derive(Args, Clone)]
struct CommonArgs {
    /// Path to alerting.toml
    #[arg(short, long)]
    config: PathBuf,

    /// JSON file of recorded series the queries are answered from
    #[arg(short, long)]
    fixture: PathBuf,

    /// Organization the request is made for
    #[arg(long, default_value_t = 1)]
    org_id: i64,

    /// Freeze "now" at this RFC 3339 instant instead of the wall clock
    #[arg(long)]
    now: Option<DateTime<Utc>>,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a rule once and print the alerts it would send
    Test {
        #[command(flatten)]
        common: CommonArgs,

        /// Rule definition (JSON)
        rule: PathBuf,

        /// Folder title injected as the grafana_folder label
        #[arg(long, default_value = "General")]
        folder: String,
    },

    /// Execute a query graph and print every node's frames
    Eval {
        #[command(flatten)]
        common: CommonArgs,

        /// Request with `condition`, `data` and optional `now` (JSON)
        request: PathBuf,
    },

    /// Replay a rule over a time range and print the state history
    Backtest {
        #[command(flatten)]
        common: CommonArgs,

        /// Request with `from`, `to`, `interval` and the rule definition (JSON)
        request: PathBuf,
    },

    /// Evaluate a rule periodically, printing alerts as JSON lines
    Run {
        #[command(flatten)]
        common: CommonArgs,

        /// Rule definition (JSON)
        rule: PathBuf,

        /// Folder title injected as the grafana_folder label
        #[arg(long)]
        folder: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Test {
            common,
            rule,
            folder,
        } => {
            cmd_test::run(common, rule, folder).await?;
        }

        Commands::Eval { common, request } => {
            cmd_eval::run(common, request).await?;
        }

        Commands::Backtest { common, request } => {
            cmd_backtest::run(common, request).await?;
        }

        Commands::Run {
            common,
            rule,
            folder,
        } => {
            cmd_run::run(common, rule, folder).await?;
        }
    }

    Ok(())
}
