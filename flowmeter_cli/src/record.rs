//! Acquisition run: session assembly, live output and the stop summary.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use eyre::WrapErr;
use flowmeter_core::util::{ms_to_secs, round_to};
use flowmeter_core::{
    ChannelBox, ErrorKind, FlowError, Sample, SessionConfig, SessionController, SessionEvent,
    Summary, write_csv_file,
};
use flowmeter_hardware::{SIM_PORT_NAME, SimulatedScale};
use serde_json::json;

/// How often the output loop wakes to check for Ctrl-C and the deadline.
const POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct RecordArgs {
    pub port: Option<String>,
    pub baud: Option<u32>,
    pub duration_s: Option<f64>,
    pub csv: Option<PathBuf>,
    pub sim: bool,
    pub sim_period_ms: u64,
}

/// Resolve the port, open a session and stream until stopped.
pub fn run_record(
    cfg: &flowmeter_config::Config,
    args: &RecordArgs,
    json: bool,
    shutdown: &Arc<AtomicBool>,
) -> eyre::Result<()> {
    let port = if args.sim {
        args.port.clone().unwrap_or_else(|| SIM_PORT_NAME.to_string())
    } else {
        resolve_port(
            args.port.as_deref(),
            cfg.serial.port.as_deref(),
            flowmeter_hardware::available_ports,
        )?
    };
    let session_cfg = SessionConfig::from_config(cfg, Some(&port), args.baud);

    let mut ctrl = if args.sim {
        let period = Duration::from_millis(args.sim_period_ms.max(1));
        SessionController::builder(session_cfg)
            .with_connector(move |_: &SessionConfig| -> Result<ChannelBox, FlowError> {
                Ok(Box::new(SimulatedScale::new().with_period(period)))
            })
            .build()?
    } else {
        SessionController::builder(session_cfg)
            .with_connector(open_serial)
            .build()?
    };

    let rx = ctrl.subscribe();
    ctrl.connect()?;
    ctrl.start()?;
    tracing::info!(port = %port, sim = args.sim, "recording");

    let deadline = args
        .duration_s
        .filter(|s| s.is_finite() && *s > 0.0)
        .map(|s| Instant::now() + Duration::from_secs_f64(s));
    let mut watch = RunWatch::new(ctrl.config().handshake.max_probes);

    while !shutdown.load(Ordering::Relaxed) && deadline.is_none_or(|d| Instant::now() < d) {
        let Ok(event) = rx.recv_timeout(POLL) else {
            continue;
        };
        let fatal = watch.observe(&event);
        match event {
            SessionEvent::Sample(s) => print_sample(&s, json),
            SessionEvent::Connected {
                port_name,
                baud_rate,
            } => {
                if json {
                    println!(
                        "{}",
                        json!({ "event": "connected", "port": port_name, "baud_rate": baud_rate })
                    );
                } else {
                    println!("Connected on {port_name} Baud rate: {baud_rate}");
                }
            }
            SessionEvent::Error { kind, message } => {
                tracing::warn!(kind = %kind, "{message}");
            }
        }
        if fatal {
            break;
        }
    }

    let summary = ctrl.stop()?;
    print_summary(&summary, ctrl.offset(), json);

    if let Some(path) = &args.csv {
        let history = ctrl.history();
        let guard = history
            .read()
            .map_err(|_| eyre::eyre!("sample history lock poisoned"))?;
        write_csv_file(path, guard.iter())?;
        tracing::info!(path = %path.display(), rows = guard.len(), "exported");
    }

    match watch.into_failure() {
        Some(e) => Err(e).wrap_err("recording ended early"),
        None => Ok(()),
    }
}

/// Port precedence: flag, then config, then the only port the OS reports.
fn resolve_port<F, E>(flag: Option<&str>, configured: Option<&str>, list: F) -> eyre::Result<String>
where
    F: FnOnce() -> Result<Vec<String>, E>,
    E: std::error::Error + Send + Sync + 'static,
{
    if let Some(p) = flag.or(configured) {
        return Ok(p.to_string());
    }
    let ports = list().wrap_err("enumerate serial ports")?;
    match ports.as_slice() {
        [only] => {
            tracing::info!(port = %only, "using the only available serial port");
            Ok(only.clone())
        }
        [] => eyre::bail!("no serial port given and none found; pass --port or set serial.port"),
        many => eyre::bail!(
            "no serial port given and {} found ({}); pass --port or set serial.port",
            many.len(),
            many.join(", ")
        ),
    }
}

/// Decides when the event stream means the recording cannot go on.
#[derive(Debug)]
struct RunWatch {
    max_probes: u32,
    samples: usize,
    failure: Option<FlowError>,
}

impl RunWatch {
    fn new(max_probes: u32) -> Self {
        Self {
            max_probes,
            samples: 0,
            failure: None,
        }
    }

    /// True when recording should end now.
    fn observe(&mut self, event: &SessionEvent) -> bool {
        match event {
            SessionEvent::Sample(_) => self.samples += 1,
            SessionEvent::Error {
                kind: ErrorKind::Closed,
                ..
            } => self.failure = Some(FlowError::Closed),
            // A device that streams readings without answering is still usable
            SessionEvent::Error {
                kind: ErrorKind::HandshakeTimeout,
                ..
            } if self.samples == 0 => {
                self.failure = Some(FlowError::HandshakeTimeout {
                    probes: self.max_probes,
                });
            }
            _ => {}
        }
        self.failure.is_some()
    }

    fn into_failure(self) -> Option<FlowError> {
        self.failure
    }
}

#[cfg(feature = "hardware")]
fn open_serial(cfg: &SessionConfig) -> Result<ChannelBox, FlowError> {
    flowmeter_hardware::SerialLineChannel::open(
        &cfg.port_name,
        cfg.baud_rate,
        cfg.timeouts.write(),
    )
    .map(|ch| Box::new(ch) as ChannelBox)
    .map_err(|e| flowmeter_core::channel_error::map_channel_error(&e))
}

#[cfg(not(feature = "hardware"))]
fn open_serial(cfg: &SessionConfig) -> Result<ChannelBox, FlowError> {
    Err(FlowError::OpenFailed(format!(
        "{}: built without serial support; rebuild with --features hardware or use --sim",
        cfg.port_name
    )))
}

fn print_sample(s: &Sample, json: bool) {
    if json {
        // Sample derives Serialize; field names are stable
        match serde_json::to_value(s) {
            Ok(mut v) => {
                v["event"] = json!("sample");
                println!("{v}");
            }
            Err(e) => tracing::warn!(error = %e, "sample not serializable"),
        }
    } else {
        println!(
            "t={:>8.2}s mass={:>8.2} flow={:>8.2} median={:>8.2} avg={:>8.2}",
            ms_to_secs(s.time),
            s.mass,
            s.flow_per_second,
            s.flow_median_filtered,
            s.flow_average
        );
    }
}

fn print_summary(summary: &Summary, offset_ms: Option<u64>, json: bool) {
    if json {
        let max_flow = round_to(summary.max_flow_average, 1);
        let volume = round_to(summary.last_mass, 1);
        println!(
            "{}",
            json!({
                "event": "summary",
                "samples": summary.samples,
                "max_flow": max_flow,
                "volume": volume,
                "offset_ms": offset_ms,
            })
        );
    } else {
        for line in legend(summary, offset_ms) {
            println!("{line}");
        }
    }
}

/// Stop legend; flow and volume rounded to one decimal.
fn legend(summary: &Summary, offset_ms: Option<u64>) -> Vec<String> {
    let mut lines = vec![
        format!("Max flow = {:.1} [ml/s]", round_to(summary.max_flow_average, 1)),
        format!("Volume = {:.1} [ml]", round_to(summary.last_mass, 1)),
        format!("Samples = {}", summary.samples),
    ];
    if let Some(ms) = offset_ms {
        lines.push(format!("Flow start (chart offset) = {:.1} s", ms_to_secs(ms)));
    }
    lines
}
