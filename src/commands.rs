//! CLI Command Handlers
//!
//! Each handler takes CLI args, the loaded config and Output, and returns an
//! ExitCode. Sessions are always torn down before a handler returns.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use tempfile::TempDir;
use tracing::{debug, warn};

use crate::api::{save_descriptor, FetchError, HttpFetcher};
use crate::cli::{
    ExitCode, FilesCmd, Output, PlaybackResponse, SaveCmd, SaveResponse, ServeCmd, StreamCmd,
};
use crate::config::Config;
use crate::models::{Descriptor, SessionSummary};
use crate::stream::{
    GatewayError, LocalEngine, LocalPlayer, Playback, PlaybackOptions, PlayerOptions,
    ProtocolEngine, RqbitEngine, Session, SessionError, SessionManager,
};

// =============================================================================
// Session Helpers
// =============================================================================

/// Storage root for one run: user supplied, or a temp dir removed on exit
enum DataDir {
    Fixed(PathBuf),
    Temp(TempDir),
}

impl DataDir {
    fn resolve(flag: Option<&Path>, config: &Config) -> anyhow::Result<Self> {
        match flag.map(Path::to_path_buf).or_else(|| config.data_dir.clone()) {
            Some(dir) => Ok(DataDir::Fixed(dir)),
            None => tempfile::Builder::new()
                .prefix("nyaastream")
                .tempdir()
                .map(DataDir::Temp)
                .context("creating temporary data directory"),
        }
    }

    fn path(&self) -> &Path {
        match self {
            DataDir::Fixed(dir) => dir,
            DataDir::Temp(dir) => dir.path(),
        }
    }
}

/// Engine for this run: librqbit, or on-disk replay when `offline`
async fn session_manager(
    data_dir: &DataDir,
    offline: bool,
    output: &Output,
) -> Result<SessionManager, ExitCode> {
    let engine: Arc<dyn ProtocolEngine> = if offline {
        Arc::new(LocalEngine::new())
    } else {
        let started = match tokio::fs::create_dir_all(data_dir.path()).await {
            Ok(()) => RqbitEngine::new(data_dir.path()).await,
            Err(e) => Err(e.into()),
        };
        match started {
            Ok(engine) => Arc::new(engine),
            Err(e) => {
                return Err(output.error(
                    format!("Failed to start torrent engine: {}", e),
                    ExitCode::Error,
                ))
            }
        }
    };
    Ok(SessionManager::new(engine, Arc::new(HttpFetcher::new())))
}

fn session_exit_code(e: &SessionError) -> ExitCode {
    match e {
        SessionError::DescriptorFetch(FetchError::Io(_)) => ExitCode::Error,
        SessionError::DescriptorFetch(_) => ExitCode::NetworkError,
        SessionError::DescriptorInvalid(_) => ExitCode::DescriptorInvalid,
        SessionError::IndexOutOfRange { .. } => ExitCode::InvalidArgs,
        _ => ExitCode::Error,
    }
}

/// Start a session or report why it could not start
async fn start_session(
    manager: &SessionManager,
    descriptor: &str,
    data_dir: &DataDir,
    output: &Output,
) -> Result<Arc<Session>, ExitCode> {
    let descriptor = Descriptor::parse(descriptor);
    output.info(format!("Adding {}...", descriptor));

    manager
        .start(descriptor, data_dir.path())
        .await
        .map_err(|e| output.error(format!("Failed to start session: {}", e), session_exit_code(&e)))
}

fn monitor_target(output: &Output) -> Option<Box<dyn Write + Send>> {
    output
        .interactive()
        .then(|| Box::new(std::io::stdout()) as Box<dyn Write + Send>)
}

/// Stop playback and report the gateway's final state
async fn finish(playback: Playback, output: &Output) -> Result<(), ExitCode> {
    playback.stop().await.map_err(|e| gateway_error(e, output))
}

fn gateway_error(e: GatewayError, output: &Output) -> ExitCode {
    output.error(format!("Gateway failed: {}", e), ExitCode::GatewayFailed)
}

// =============================================================================
// Stream Command
// =============================================================================

pub async fn stream_cmd(cmd: StreamCmd, config: &Config, output: &Output) -> ExitCode {
    let player_type = cmd.player.unwrap_or_else(|| config.player());
    let options = PlayerOptions {
        fullscreen: cmd.fullscreen || config.player_options().fullscreen,
        ..config.player_options()
    };
    let player = LocalPlayer::new(player_type, options);

    if !player.is_available().await {
        return output.error(
            format!("{} not found. Install it first.", player_type.display_name()),
            ExitCode::Error,
        );
    }

    let data_dir = match DataDir::resolve(cmd.dir.as_deref(), config) {
        Ok(dir) => dir,
        Err(e) => return output.error(format!("{:#}", e), ExitCode::Error),
    };

    let manager = match session_manager(&data_dir, cmd.offline, output).await {
        Ok(manager) => manager,
        Err(code) => return code,
    };
    let session = match start_session(&manager, &cmd.descriptor, &data_dir, output).await {
        Ok(session) => session,
        Err(code) => return code,
    };

    let title = match session.name_of(cmd.index) {
        Ok(title) => title.to_string(),
        Err(e) => {
            manager.stop().await;
            return output.error(e.to_string(), ExitCode::InvalidArgs);
        }
    };

    let playback_options = PlaybackOptions {
        port: cmd.port.unwrap_or_else(|| config.port()),
        index: cmd.index,
        ..Default::default()
    };
    let playback =
        match Playback::start(Arc::clone(&session), playback_options, monitor_target(output)).await
        {
            Ok(playback) => playback,
            Err(e) => {
                manager.stop().await;
                return gateway_error(e, output);
            }
        };
    let url = playback.url().to_string();

    output.info(format!("Opening {} in {}...", url, player_type.display_name()));

    let played = tokio::select! {
        played = player.play_and_wait(&url, &title) => played,
        _ = tokio::signal::ctrl_c() => {
            debug!("Interrupted, closing player");
            Ok(())
        }
    };

    let finished = finish(playback, output).await;
    manager.stop().await;

    if let Err(e) = played {
        return output.error(e.to_string(), ExitCode::Error);
    }
    if let Err(code) = finished {
        return code;
    }

    let response = PlaybackResponse {
        status: "finished".to_string(),
        name: title,
        url,
        player: Some(player_type.display_name().to_string()),
    };
    if !output.quiet {
        if let Err(e) = output.print(&response) {
            return output.error(format!("Failed to serialize: {}", e), ExitCode::Error);
        }
    }
    ExitCode::Success
}

// =============================================================================
// Serve Command
// =============================================================================

pub async fn serve_cmd(cmd: ServeCmd, config: &Config, output: &Output) -> ExitCode {
    let data_dir = match DataDir::resolve(cmd.dir.as_deref(), config) {
        Ok(dir) => dir,
        Err(e) => return output.error(format!("{:#}", e), ExitCode::Error),
    };

    let manager = match session_manager(&data_dir, cmd.offline, output).await {
        Ok(manager) => manager,
        Err(code) => return code,
    };
    let session = match start_session(&manager, &cmd.descriptor, &data_dir, output).await {
        Ok(session) => session,
        Err(code) => return code,
    };

    let name = match session.name_of(cmd.index) {
        Ok(name) => name.to_string(),
        Err(e) => {
            manager.stop().await;
            return output.error(e.to_string(), ExitCode::InvalidArgs);
        }
    };

    let monitor = if cmd.no_monitor {
        None
    } else {
        monitor_target(output)
    };
    let playback_options = PlaybackOptions {
        port: cmd.port.unwrap_or_else(|| config.port()),
        index: cmd.index,
        ..Default::default()
    };
    let playback = match Playback::start(Arc::clone(&session), playback_options, monitor).await {
        Ok(playback) => playback,
        Err(e) => {
            manager.stop().await;
            return gateway_error(e, output);
        }
    };
    let url = playback.url().to_string();

    output.info(format!("Serving {} on {} (Ctrl-C to stop)", name, url));
    output.info(format!(
        "Playlist: http://localhost:{}/.m3u",
        playback.local_addr().port()
    ));

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
    }

    let finished = finish(playback, output).await;
    manager.stop().await;
    if let Err(code) = finished {
        return code;
    }

    let response = PlaybackResponse {
        status: "stopped".to_string(),
        name,
        url,
        player: None,
    };
    if !output.quiet {
        if let Err(e) = output.print(&response) {
            return output.error(format!("Failed to serialize: {}", e), ExitCode::Error);
        }
    }
    ExitCode::Success
}

// =============================================================================
// Files Command
// =============================================================================

pub async fn files_cmd(cmd: FilesCmd, config: &Config, output: &Output) -> ExitCode {
    let data_dir = match DataDir::resolve(cmd.dir.as_deref(), config) {
        Ok(dir) => dir,
        Err(e) => return output.error(format!("{:#}", e), ExitCode::Error),
    };

    let manager = match session_manager(&data_dir, cmd.offline, output).await {
        Ok(manager) => manager,
        Err(code) => return code,
    };
    let session = match start_session(&manager, &cmd.descriptor, &data_dir, output).await {
        Ok(session) => session,
        Err(code) => return code,
    };

    let summary = SessionSummary {
        name: session.name().to_string(),
        length: session.length(),
        files: session.files().to_vec(),
    };
    manager.stop().await;

    if output.json {
        if let Err(e) = output.print(&summary) {
            return output.error(format!("Failed to serialize: {}", e), ExitCode::Error);
        }
    } else {
        println!("{}", summary.name);
        for file in &summary.files {
            println!("  {}", file);
        }
    }
    ExitCode::Success
}

// =============================================================================
// Save Command
// =============================================================================

pub async fn save_cmd(cmd: SaveCmd, config: &Config, output: &Output) -> ExitCode {
    if !Descriptor::parse(&cmd.url).is_remote() {
        return output.error(
            "Expected an http(s):// descriptor URL",
            ExitCode::InvalidArgs,
        );
    }

    let name = cmd.effective_name();
    let output_dir = cmd.output.clone().unwrap_or_else(|| config.output_dir());
    output.info(format!("Saving {} to {}...", name, output_dir.display()));

    match save_descriptor(&HttpFetcher::new(), &cmd.url, &output_dir, &name).await {
        Ok(path) => {
            let response = SaveResponse {
                status: "saved".to_string(),
                path,
            };
            if let Err(e) = output.print(&response) {
                return output.error(format!("Failed to serialize: {}", e), ExitCode::Error);
            }
            ExitCode::Success
        }
        Err(e @ FetchError::Io(_)) => output.error(format!("Save failed: {}", e), ExitCode::Error),
        Err(e) => output.error(format!("Save failed: {}", e), ExitCode::NetworkError),
    }
}
