use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use tracing::{debug, info, warn};

use idelink::cli::{Cli, Command};
use idelink::config::Config;
use idelink::endpoint::server::SOCKET_FILE_NAME;
use idelink::{ConnectionCoordinator, EditorLauncher, ExternalEditorId, MessagingServerFactory, StaticHost};

/// Upper bound on waiting for the editor to answer before the process exits
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level).map(|s| s.to_uppercase()) {
        Some(s) => match s.as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    debug!(?level, "Logging initialized");
    Ok(())
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    Ok(cwd.join(path))
}

fn build_coordinator(config: &Config, project: Option<&PathBuf>) -> Result<ConnectionCoordinator> {
    let executable = std::env::current_exe().context("Failed to locate own executable")?;
    let project = match project {
        Some(project) => absolute(project)?,
        None => std::env::current_dir().context("Failed to read current directory")?,
    };
    debug!(project = %project.display(), "build_coordinator: called");

    let host = StaticHost::new(executable, &config.metadata_dir, project);
    Ok(ConnectionCoordinator::new(
        Arc::new(host),
        Arc::new(MessagingServerFactory),
        Arc::new(EditorLauncher::with_overrides(config.executables.clone())),
        config.coordinator_options(),
    ))
}

async fn cmd_open(
    config: &Config,
    file: &Path,
    line: Option<u32>,
    column: Option<u32>,
    editor: Option<&str>,
    project: Option<&PathBuf>,
    timeout_ms: Option<u64>,
) -> Result<()> {
    let kind = match editor {
        Some(name) => name.parse::<ExternalEditorId>()?,
        None => config.external_editor,
    };
    let timeout = timeout_ms.map(Duration::from_millis).unwrap_or_else(|| config.connect_timeout());
    let file = absolute(file)?;
    let file = file.to_string_lossy();

    let coordinator = build_coordinator(config, project)?;
    info!(%kind, file = %file, "Opening file in external editor");

    let Some(pick) = coordinator.request_editor_ready_within(kind, timeout).await? else {
        coordinator.shutdown().await;
        return Err(eyre::eyre!("{} did not connect within {:?}", kind, timeout));
    };

    match (line, column) {
        (Some(line), Some(column)) => pick.send_open_file_at_column(&file, line, column),
        (Some(line), None) => pick.send_open_file_at(&file, line),
        _ => pick.send_open_file(&file),
    }
    if !coordinator.flush(FLUSH_TIMEOUT).await {
        warn!(identity = pick.identity(), timeout = ?FLUSH_TIMEOUT, "Editor did not acknowledge the request");
    }

    println!("{} Sent {} to {}", "✓".green(), file.to_string().cyan(), pick.identity());
    coordinator.shutdown().await;
    Ok(())
}

async fn cmd_serve(config: &Config, project: Option<&PathBuf>) -> Result<()> {
    let coordinator = build_coordinator(config, project)?;
    coordinator.on_ready().await;

    println!(
        "{} Listening on {}",
        "✓".green(),
        config.metadata_dir.join(SOCKET_FILE_NAME).display().to_string().cyan()
    );

    tokio::signal::ctrl_c().await.context("Failed to wait for Ctrl-C")?;
    info!("Shutting down");
    coordinator.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Open {
            file,
            line,
            column,
            editor,
            project,
            timeout_ms,
        } => {
            cmd_open(
                &config,
                &file,
                line,
                column,
                editor.as_deref(),
                project.as_ref(),
                timeout_ms,
            )
            .await
        }
        Command::Serve { project } => cmd_serve(&config, project.as_ref()).await,
    }
}
