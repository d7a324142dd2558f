// =============================================================================
// QuantDesk — Main Entry Point
// =============================================================================
//
// Two entry points, `paper` and `live`. Live trading additionally requires
// --i-know-what-im-doing; without it the process exits with code 2 before
// any component is built.
//
// Exit codes: 0 clean stop, 1 safety halt / runtime failure,
// 2 argument or configuration error.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod broker;
mod clock;
mod config;
mod container;
mod data;
mod events;
mod execution;
mod gates;
mod journal;
mod orders;
mod protections;
mod reconcile;
mod recovery;
mod risk;
mod runtime;
mod state;
mod strategy;
#[cfg(test)]
mod testing;
mod types;
mod universe;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::loader::credential_env_status;
use crate::runtime::app::{run, RunOptions};
use crate::types::TradeMode;

#[derive(Parser)]
#[command(name = "quantdesk", version, about = "Algorithmic trading runtime for US equities")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct CommonArgs {
    /// Path to the YAML configuration file (must be a file, not a directory).
    #[arg(long)]
    config: PathBuf,

    /// Seconds between cycles while the market is open. Ignored with --once.
    #[arg(long, default_value_t = 60)]
    interval: u64,

    /// Run a single cycle and exit (smoke test).
    #[arg(long)]
    once: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Trade against the paper endpoint.
    Paper {
        #[command(flatten)]
        args: CommonArgs,

        /// Print which credential environment variables are set (never the
        /// values) and exit.
        #[arg(long)]
        env_check: bool,
    },

    /// Trade against real funds.
    Live {
        #[command(flatten)]
        args: CommonArgs,

        /// Required acknowledgment that this session uses real money.
        #[arg(long = "i-know-what-im-doing")]
        i_know_what_im_doing: bool,
    },
}

#[tokio::main]
async fn main() {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let code = match cli.command {
        Command::Paper { args, env_check } => {
            if env_check {
                for (name, set) in credential_env_status() {
                    println!("{name}: {}", if set { "set" } else { "NOT set" });
                }
                0
            } else {
                info!("QuantDesk starting (paper)");
                run(options(TradeMode::Paper, args)).await
            }
        }
        Command::Live { args, i_know_what_im_doing } => {
            if !i_know_what_im_doing {
                error!("live trading requires --i-know-what-im-doing");
                2
            } else {
                warn!("QuantDesk starting (LIVE — real funds)");
                run(options(TradeMode::Live, args)).await
            }
        }
    };

    std::process::exit(code);
}

fn options(mode: TradeMode, args: CommonArgs) -> RunOptions {
    RunOptions {
        mode,
        config_path: args.config,
        run_interval_s: args.interval,
        run_once: args.once,
    }
}
