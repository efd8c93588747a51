//! Mesh application binary.
//!
//! Attaches a configured element/model composition to the mesh host and
//! publishes operator commands given on the command line or read from stdin.

use anyhow::Context;
use clap::Parser;
use mesh_session::{LoopbackHost, MeshHost, Session, SessionEnd, SessionReport, USAGE};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

mod config;
mod logging;

use config::AppConfig;

/// Mesh application publishing model commands through the mesh host
#[derive(Parser, Debug)]
#[command(
    name = "mesh-app",
    version,
    about = "Mesh application publishing model commands",
    after_help = USAGE
)]
struct Args {
    /// Configuration file path
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Application object path
    #[arg(long)]
    app_path: Option<String>,

    /// Application token, decimal or 0x-prefixed
    #[arg(long)]
    token: Option<String>,

    /// Handler invocations per command
    #[arg(long)]
    attempts: Option<u32>,

    /// Pause between invocations, e.g. 200ms
    #[arg(long)]
    backoff: Option<humantime::Duration>,

    /// Stop repeating a command once a send was acknowledged
    #[arg(long)]
    stop_on_ack: bool,

    /// Pause after attach before the first command, e.g. 1s
    #[arg(long)]
    settle_delay: Option<humantime::Duration>,

    /// Read command lines from stdin
    #[arg(long)]
    stdin: bool,

    /// Keep serving host events after the commands are done
    #[arg(long)]
    stay: bool,

    /// Command tokens
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

impl Args {
    /// Command line flags override file and environment values
    fn apply_to(&self, config: &mut AppConfig) -> anyhow::Result<()> {
        if let Some(path) = &self.app_path {
            config.app_path = path.clone();
        }
        if let Some(token) = &self.token {
            config.token = mesh_registry::parse_int(token)
                .with_context(|| format!("invalid --token {:?}", token))?;
        }
        if let Some(attempts) = self.attempts {
            config.publish_attempts = attempts;
        }
        if let Some(backoff) = self.backoff {
            config.publish_backoff = backoff.into();
        }
        if self.stop_on_ack {
            config.stop_on_ack = true;
        }
        if let Some(delay) = self.settle_delay {
            config.settle_delay = delay.into();
        }
        Ok(())
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logging::init(&args.log_level);

    info!("Starting mesh application v{}", env!("CARGO_PKG_VERSION"));

    let mut app_config = AppConfig::load_from_file(&args.config)?;
    args.apply_to(&mut app_config)?;

    let app = app_config.build_application()?;
    for element in app.elements() {
        component_info!(
            "registry",
            "Element {} at {}: models {:?}, vendor models {:?}",
            element.index(),
            element.path(),
            element.model_ids(),
            element.vendor_model_ids()
        );
    }

    let (tx, rx) = mpsc::unbounded_channel();
    if !args.command.is_empty() {
        tx.send(args.command.join(" "))?;
    }
    if args.stdin {
        tokio::spawn(read_stdin(tx));
    } else {
        drop(tx);
        if args.command.is_empty() {
            warn!("No command given. Usage: {}", USAGE);
        }
    }

    let host: Arc<dyn MeshHost> = Arc::new(LoopbackHost::new());
    let session = Session::new(app_config.session_config(!args.stay), host, app);

    let report = tokio::select! {
        result = session.run(rx) => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
            return Ok(());
        }
    };

    log_report(&report);
    Ok(())
}

async fn read_stdin(tx: mpsc::UnboundedSender<String>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => continue,
            Ok(Some(line)) => {
                if tx.send(line).is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                component_error!("cli", "Failed to read stdin: {}", e);
                break;
            }
        }
    }
}

fn log_report(report: &SessionReport) {
    match report.end {
        SessionEnd::ServiceRemoved => info!("Mesh node {} was removed", report.node_path),
        SessionEnd::CommandsComplete => info!("All commands done"),
        SessionEnd::HostClosed => component_warn!("cli", "Host went away"),
    }

    if !report.protocol_violations.is_empty() {
        error!(
            "Host configured unknown elements {:?}",
            report.protocol_violations
        );
    }

    if let Some(commands) = &report.commands {
        info!(
            "{} commands, {} rejected, {} sends ok, {} sends failed",
            commands.outcomes.len(),
            commands.rejected(),
            report.sends_ok,
            report.sends_failed
        );
    }
}
