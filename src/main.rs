//! Capability test runner for Wayland compositors
//!
//! Runs executable accessibility capability tests against the compositor
//! of the current session, injecting input through the compositor's own
//! protocols or through the VM monitor.

use std::path::PathBuf;

use captest::common::{config::Config, logging};
use captest::{cli, commands::Commands};
use clap::Parser;

#[derive(Parser)]
#[command(name = "captest", about = "Compositor accessibility capability tests")]
#[command(version, long_about = None)]
struct Cli {
    /// Configuration file (default: the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Test definitions file, overriding the configured one
    #[arg(long, global = true)]
    registry: Option<PathBuf>,

    /// Compositor socket, overriding $XDG_RUNTIME_DIR/$WAYLAND_DISPLAY
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    /// VM monitor endpoint as host:port
    #[arg(long, global = true)]
    monitor: Option<String>,

    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let guard = match &cli.log_file {
        Some(path) => match logging::init_with_file(path) {
            Ok(guard) => Some(guard),
            Err(e) => {
                eprintln!("Error: cannot open log file {}: {e}", path.display());
                std::process::exit(1);
            }
        },
        None => {
            logging::init_cli();
            None
        }
    };

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            1
        }
    };
    // Flush the log file before exiting
    drop(guard);
    std::process::exit(code);
}

async fn run(cli: Cli) -> captest::Result<i32> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    cli::apply_overrides(
        &mut config,
        cli.registry,
        cli.socket,
        cli.monitor.as_deref(),
    )?;
    cli::dispatch(cli.command, config).await
}
