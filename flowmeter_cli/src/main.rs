mod cli;
mod error_fmt;
mod record;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::Parser;
use eyre::WrapErr;
use flowmeter_core::{ChannelBox, FlowError, SessionConfig, SessionController, SessionEvent};
use flowmeter_hardware::SimulatedScale;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

use crate::cli::{Cli, Commands, DEFAULT_CONFIG_PATH, FILE_GUARD, JSON_MODE};
use crate::error_fmt::{exit_code_for_error, format_error_json, humanize};
use crate::record::{RecordArgs, run_record};

fn main() {
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);
    if !cli.json {
        let _ = color_eyre::install();
    }

    if let Err(e) = run(cli) {
        tracing::error!(error = %format!("{e:#}"), "command failed");
        if JSON_MODE.get().copied().unwrap_or(false) {
            eprintln!("{}", format_error_json(&e));
        } else {
            eprintln!("{}", humanize(&e));
        }
        std::process::exit(exit_code_for_error(&e));
    }
}

fn run(cli: Cli) -> eyre::Result<()> {
    let cfg = load_config(cli.config.as_deref())?;
    init_tracing(cli.json, &cli.log_level, &cfg.logging)?;

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let flag = shutdown.clone();
        ctrlc::set_handler(move || {
            flag.store(true, Ordering::Relaxed);
        })
        .wrap_err("install Ctrl-C handler")?;
    }

    match cli.cmd {
        Commands::Ports => list_ports(cli.json),
        Commands::Record {
            port,
            baud,
            duration_s,
            csv,
            sim,
            sim_period_ms,
        } => {
            let args = RecordArgs {
                port,
                baud,
                duration_s,
                csv,
                sim,
                sim_period_ms,
            };
            run_record(&cfg, &args, cli.json, &shutdown)
        }
        Commands::SelfCheck => self_check(&cfg),
    }
}

/// Explicit path must exist; the default path is optional.
fn load_config(path: Option<&Path>) -> eyre::Result<flowmeter_config::Config> {
    match path {
        Some(p) => flowmeter_config::load_file(p),
        None => {
            let p = Path::new(DEFAULT_CONFIG_PATH);
            if p.exists() {
                flowmeter_config::load_file(p)
            } else {
                Ok(flowmeter_config::Config::default())
            }
        }
    }
}

fn init_tracing(json: bool, level: &str, logging: &flowmeter_config::Logging) -> eyre::Result<()> {
    let console_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .wrap_err_with(|| format!("invalid log level {level:?}"))?;

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    // Console goes to stderr; stdout carries samples and the summary
    if json {
        layers.push(
            fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_filter(console_filter)
                .boxed(),
        );
    } else {
        layers.push(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_filter(console_filter)
                .boxed(),
        );
    }

    if let Some(file) = &logging.file {
        let path = Path::new(file);
        let dir = path
            .parent()
            .filter(|d| !d.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let name = path
            .file_name()
            .ok_or_else(|| eyre::eyre!("logging.file has no file name: {file}"))?;
        let rotation = logging.rotation.as_deref().map(str::to_ascii_lowercase);
        let appender = match rotation.as_deref() {
            Some("daily") => tracing_appender::rolling::daily(dir, name),
            Some("hourly") => tracing_appender::rolling::hourly(dir, name),
            _ => tracing_appender::rolling::never(dir, name),
        };
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let _ = FILE_GUARD.set(guard);
        let file_level = logging.level.as_deref().unwrap_or("info");
        layers.push(
            fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(EnvFilter::new(file_level))
                .boxed(),
        );
    }

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .wrap_err("install tracing subscriber")
}

fn list_ports(json: bool) -> eyre::Result<()> {
    let ports = flowmeter_hardware::available_ports().wrap_err("enumerate serial ports")?;
    if json {
        println!("{}", serde_json::json!({ "ports": ports }));
    } else if ports.is_empty() {
        println!("No serial ports found");
    } else {
        for p in &ports {
            println!("{p}");
        }
    }
    Ok(())
}

/// Config already validated on load; exercise a handshake against the simulator.
fn self_check(cfg: &flowmeter_config::Config) -> eyre::Result<()> {
    let session_cfg =
        SessionConfig::from_config(cfg, Some(flowmeter_hardware::SIM_PORT_NAME), None);
    let mut ctrl = SessionController::builder(session_cfg)
        .with_connector(|_: &SessionConfig| -> Result<ChannelBox, FlowError> {
            Ok(Box::new(
                SimulatedScale::new().with_period(Duration::from_millis(20)),
            ))
        })
        .build()?;
    let rx = ctrl.subscribe();
    ctrl.connect()?;
    ctrl.start()?;
    let confirmed = loop {
        match rx.recv_timeout(Duration::from_secs(2)) {
            Ok(SessionEvent::Connected { .. }) => break true,
            Ok(_) => {}
            Err(_) => break false,
        }
    };
    ctrl.stop()?;
    if !confirmed {
        eyre::bail!("self-check: simulated device did not answer the probe");
    }
    println!("self-check ok");
    Ok(())
}
