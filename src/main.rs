//! claude-proxy - Claude CLI streaming bridge
//!
//! Runs the Claude CLI against an Anthropic-compatible proxy and streams its
//! output to WebSocket clients or to stdout as NDJSON.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use claude_proxy::{
    agent::{AgentState, ClaudeProxy, ProcessRegistry, ProxyEvent, ProxyStatus, ProxyWriter, RunOptions},
    api::build_app,
    config::ProxyConfig,
    Error,
};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "claude-proxy")]
#[command(version)]
#[command(about = "Stream Claude CLI sessions through an Anthropic-compatible proxy")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "CLAUDE_PROXY_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP/WebSocket server
    Serve {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides config)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Show proxy configuration and CLI availability
    Status,

    /// Run a single prompt and print events as NDJSON
    Run {
        /// Prompt text
        message: String,

        /// Resume an existing Claude session
        #[arg(short, long)]
        session_id: Option<String>,

        /// Model for a new session
        #[arg(short, long)]
        model: Option<String>,

        /// Working directory for the CLI
        #[arg(long)]
        cwd: Option<String>,

        /// Project path, used when no working directory is given
        #[arg(long)]
        project_path: Option<String>,

        /// Pass --dangerously-skip-permissions to the CLI
        #[arg(long)]
        skip_permissions: bool,
    },

    /// Show configuration
    Config {
        /// Show default configuration
        #[arg(long)]
        default: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging (stderr, so `run` output stays clean NDJSON)
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("claude_proxy={},tower_http=debug", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = ProxyConfig::load_or_default(cli.config.as_deref())
        .context("Failed to load configuration")?;

    match cli.command {
        Commands::Serve { host, port } => {
            serve(config, host, port).await?;
        }
        Commands::Status => {
            show_status(&config).await?;
        }
        Commands::Run {
            message,
            session_id,
            model,
            cwd,
            project_path,
            skip_permissions,
        } => {
            let options = RunOptions {
                session_id,
                project_path,
                cwd,
                model,
                skip_permissions,
                ..Default::default()
            };
            if let Err(e) = run_once(&config, &message, &options).await {
                tracing::error!("{}", e);
                std::process::exit(exit_status(&e));
            }
        }
        Commands::Config { default } => {
            show_config(if default { None } else { Some(&config) })?;
        }
    }

    Ok(())
}

fn build_proxy(config: &ProxyConfig) -> Arc<ClaudeProxy> {
    Arc::new(ClaudeProxy::new(Arc::new(ProcessRegistry::new()), &config.cli))
}

async fn serve(config: ProxyConfig, host: Option<String>, port: Option<u16>) -> Result<()> {
    let host = host.unwrap_or(config.gateway.host.clone());
    let port = port.unwrap_or(config.gateway.port);

    let proxy = build_proxy(&config);
    let status = proxy.config_status();
    if !status.configured {
        tracing::warn!("ANTHROPIC_BASE_URL / ANTHROPIC_API_KEY not set; commands will be rejected");
    }

    let state = AgentState {
        proxy,
        probe_timeout: config.cli.probe_timeout(),
    };
    let app = build_app(state, &config.gateway.cors_origins);

    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!("claude-proxy listening on http://{}. Press Ctrl+C to stop.", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down...");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
}

async fn show_status(config: &ProxyConfig) -> Result<()> {
    let proxy = build_proxy(config);
    let status = ProxyStatus::collect(&proxy, config.cli.probe_timeout()).await;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

/// Writes each event as one JSON line on stdout
struct StdoutWriter;

impl ProxyWriter for StdoutWriter {
    fn send(&self, event: ProxyEvent) {
        match serde_json::to_string(&event) {
            Ok(line) => {
                let mut stdout = std::io::stdout().lock();
                if let Err(e) = writeln!(stdout, "{}", line).and_then(|_| stdout.flush()) {
                    tracing::debug!("Failed to write event to stdout: {}", e);
                }
            }
            Err(e) => tracing::warn!("Failed to serialize event: {}", e),
        }
    }

    fn set_session_id(&self, session_id: &str) {
        tracing::info!(session_id = %session_id, "Claude session started");
    }
}

async fn run_once(config: &ProxyConfig, message: &str, options: &RunOptions) -> claude_proxy::Result<()> {
    let proxy = build_proxy(config);
    proxy.run(message, options, &StdoutWriter).await
}

/// Process exit status for a failed run
fn exit_status(error: &Error) -> i32 {
    match error {
        Error::ProcessExit { code: Some(code) } if *code != 0 => *code,
        _ => 1,
    }
}

fn show_config(config: Option<&ProxyConfig>) -> Result<()> {
    let config = config.cloned().unwrap_or_default();
    let toml = toml::to_string_pretty(&config)?;
    println!("{}", toml);
    Ok(())
}
