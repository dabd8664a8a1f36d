//! nyaastream - stream torrent releases to a local media player
//!
//! # Usage
//!
//! ```bash
//! # Play a release in VLC while it downloads
//! nyaastream stream "magnet:?xt=urn:btih:..."
//!
//! # Serve a local descriptor until Ctrl-C
//! nyaastream serve ./release.torrent --port 8080
//!
//! # List files as JSON
//! nyaastream files ./release.torrent --json
//! ```

use clap::Parser;
use tracing_subscriber::EnvFilter;

use nyaastream::cli::{Cli, Command, ExitCode, Output};
use nyaastream::commands;
use nyaastream::config::Config;

#[tokio::main]
async fn main() -> std::process::ExitCode {
    init_tracing();

    let cli = Cli::parse();
    run_cli(cli).await.into()
}

/// Logs go to stderr so they never interleave with the monitor on stdout
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Run CLI command and return exit code
async fn run_cli(cli: Cli) -> ExitCode {
    let output = Output::new(&cli);
    let config = match &cli.config {
        Some(path) => Config::load_from(path).with_env(),
        None => Config::load(),
    };

    match cli.command {
        Command::Stream(cmd) => commands::stream_cmd(cmd, &config, &output).await,
        Command::Serve(cmd) => commands::serve_cmd(cmd, &config, &output).await,
        Command::Files(cmd) => commands::files_cmd(cmd, &config, &output).await,
        Command::Save(cmd) => commands::save_cmd(cmd, &config, &output).await,
    }
}
