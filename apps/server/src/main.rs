use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use storm_tape_kernel::config::load_and_validate;
use storm_tape_logger::{LevelFilter, Logger, LoggerBuilder, NoFile, WithName};
use storm_tape_server::Server;
use storm_tape_storage::{LocalStorage, Probe};

/// Site-local HTTP mediator for tape-backed bulk recall.
#[derive(Debug, Parser)]
#[command(name = "storm-tape", version, about)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "storm-tape.conf")]
    config: PathBuf,
}

/// Crow-style 0..4 level, matching the configuration's own documented
/// mapping (0 Debug, 1 Info, 2 Warning, 3 Error, 4 Critical). `tracing` has
/// no `CRITICAL` variant, so level 4 collapses onto `ERROR`.
fn level_filter(log_level: u8) -> LevelFilter {
    match log_level {
        0 => LevelFilter::DEBUG,
        1 => LevelFilter::INFO,
        2 => LevelFilter::WARN,
        _ => LevelFilter::ERROR,
    }
}

#[storm_tape_runtime::main(high_performance)]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let probe: Arc<dyn Probe> = Arc::new(LocalStorage::new());
    let config = load_and_validate(&cli.config, probe.as_ref())
        .context("Critical: configuration is malformed")?;

    let endpoint = config.telemetry.as_ref().and_then(|t| t.tracing_endpoint.as_deref());
    let service_name = config.telemetry.as_ref().map_or(env!("CARGO_PKG_NAME"), |t| t.service_name.as_str());
    let _log = init_logger(level_filter(config.log_level), endpoint, service_name)?;

    Server::builder()
        .config_path(cli.config)
        .config(config)
        .build()
        .await
        .context("Critical: server failed to start")?
        .run()
        .await
}

/// Builds the base `LoggerBuilder`, then dispatches on the telemetry
/// endpoint's scheme: a `file:` endpoint rolls logs to that directory
/// instead of stdout, while `http`/`https` installs an OTLP tracing layer
/// alongside the console output.
fn init_logger(
    level: LevelFilter,
    endpoint: Option<&str>,
    service_name: &str,
) -> Result<Logger, storm_tape_logger::LoggerError> {
    let builder = Logger::builder().name(env!("CARGO_PKG_NAME")).level(level);

    match endpoint {
        Some(endpoint) if endpoint.starts_with("file:") => {
            let path = endpoint.trim_start_matches("file://").trim_start_matches("file:");
            builder.path(path).init()
        }
        Some(endpoint) => install_otlp(builder, endpoint, service_name).init(),
        None => builder.init(),
    }
}

#[cfg(feature = "otlp")]
fn install_otlp(
    builder: LoggerBuilder<WithName, NoFile>,
    endpoint: &str,
    service_name: &str,
) -> LoggerBuilder<WithName, NoFile> {
    match storm_tape_logger::init_otlp_tracer(service_name, Some(endpoint)) {
        Ok(guard) => {
            // Leaked: the guard must outlive the logger, which doesn't exist yet.
            std::mem::forget(guard);
            builder.opentelemetry(true)
        }
        Err(err) => {
            eprintln!("warning: failed to initialize OTLP tracer: {err}");
            builder
        }
    }
}

#[cfg(not(feature = "otlp"))]
fn install_otlp(
    builder: LoggerBuilder<WithName, NoFile>,
    endpoint: &str,
    _service_name: &str,
) -> LoggerBuilder<WithName, NoFile> {
    eprintln!(
        "warning: 'telemetry.tracing-endpoint' ({endpoint}) is configured but this binary was \
         built without the 'otlp' feature; tracing export is disabled"
    );
    builder
}
