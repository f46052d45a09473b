//! # racewire
//!
//! Broadcaster binary: loads settings, picks a telemetry source and runs the
//! WebSocket server until SIGINT/SIGTERM.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use racewire_core::{Clock, SystemClock};
use racewire_logging::LoggingConfig;
use racewire_server::{RacewireServer, ServerConfig};
use racewire_settings::{LogFormat, LogLevel, RacewireSettings, SourceKind, SourceSettings};
use racewire_source::{IrsdkProvider, SimulatedProvider, SourceAdapter, TelemetrySource};
use tracing::{error, info, warn};

/// Live sim-racing telemetry over WebSocket.
#[derive(Parser, Debug)]
#[command(name = "racewire", version, about = "Live sim-racing telemetry broadcaster")]
struct Cli {
    /// Settings file (default `~/.racewire/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind.
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,

    /// Broadcast synthetic laps instead of reading the sim.
    #[arg(long, conflicts_with = "dump")]
    simulate: bool,

    /// Read a captured shared-memory image instead of the live sim.
    #[arg(long)]
    dump: Option<PathBuf>,

    /// Log output: `pretty` or `json`.
    #[arg(long)]
    log_format: Option<LogFormat>,

    /// Default log level.
    #[arg(long)]
    log_level: Option<LogLevel>,

    /// Do not install the Prometheus recorder.
    #[arg(long)]
    no_metrics: bool,
}

impl Cli {
    /// Flags win over the file and the environment.
    fn apply(&self, settings: &mut RacewireSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if self.simulate {
            settings.source.kind = SourceKind::Simulated;
        }
        if let Some(path) = &self.dump {
            settings.source.kind = SourceKind::Dump;
            settings.source.dump_path = Some(path.to_string_lossy().into_owned());
        }
        if let Some(format) = self.log_format {
            settings.logging.format = format;
        }
        if let Some(level) = self.log_level {
            settings.logging.level = level;
        }
    }
}

fn build_source(settings: &SourceSettings, clock: Arc<dyn Clock>) -> Result<Arc<dyn TelemetrySource>> {
    let factor = settings.speed_factor;
    let source: Arc<dyn TelemetrySource> = match settings.kind {
        SourceKind::Irsdk => {
            if cfg!(not(windows)) {
                warn!("live iRacing memory is only available on Windows, the source will stay disconnected");
            }
            Arc::new(SourceAdapter::new(IrsdkProvider::live(), clock).with_speed_factor(factor))
        }
        SourceKind::Dump => {
            let path = settings
                .dump_path
                .as_deref()
                .context("the dump source needs a dumpPath")?;
            Arc::new(SourceAdapter::new(IrsdkProvider::from_file(path), clock).with_speed_factor(factor))
        }
        SourceKind::Simulated => Arc::new(
            SourceAdapter::new(SimulatedProvider::new(settings.simulated_lap_secs), clock)
                .with_speed_factor(factor),
        ),
    };
    Ok(source)
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                let _ = signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = match &cli.config {
        Some(path) => racewire_settings::load_settings_from_path(path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?,
        None => racewire_settings::load_settings().context("failed to load settings")?,
    };
    cli.apply(&mut settings);
    settings.validate().context("invalid settings")?;

    racewire_logging::init_logging(&LoggingConfig::from_settings(&settings.logging));
    info!(
        version = env!("CARGO_PKG_VERSION"),
        source = %settings.source.kind,
        "starting racewire"
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let source = build_source(&settings.source, clock.clone())?;
    let config = ServerConfig::from_settings(&settings);
    let grace = config.shutdown_grace;

    let mut server = RacewireServer::new(config, source, clock);
    if !cli.no_metrics {
        match racewire_server::metrics::install_recorder() {
            Ok(handle) => server = server.with_metrics(handle),
            Err(e) => warn!(error = %e, "metrics disabled"),
        }
    }

    let mut running = server.start().await.context("failed to start server")?;
    info!("racewire listening on ws://{}", running.addr);

    let failure = tokio::select! {
        () = shutdown_signal() => {
            info!("shutting down");
            None
        }
        (task, result) = running.first_exit() => {
            match &result {
                Ok(()) => error!(task, "task exited unexpectedly"),
                Err(e) => error!(task, error = %e, "task failed"),
            }
            Some(task)
        }
    };

    let clean = server
        .shutdown()
        .graceful_shutdown(running.into_handles(), Some(grace))
        .await;
    if !clean {
        warn!("shutdown did not complete cleanly");
    }
    info!("shutdown complete");

    match failure {
        Some(task) => Err(anyhow!("{task} terminated unexpectedly")),
        None => Ok(()),
    }
}
