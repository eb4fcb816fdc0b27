//! gputop: top-like view of per-process GPU engine utilisation

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use gpu_clients::present::{ConsoleSize, Dashboard, StructuredWriter};
use gpu_clients::{Config, EngineView, OutputMode, Snapshot, SortKey};

#[derive(Parser)]
#[command(name = "gputop")]
#[command(about = "Display per-process GPU engine utilisation", long_about = None)]
#[command(version)]
struct Cli {
    /// Sampling period in milliseconds [default: 2000]
    #[arg(short = 's', long, value_name = "MS")]
    period: Option<u64>,

    /// Write samples to a file instead of stdout
    #[arg(short, long, value_name = "PATH")]
    output: Option<PathBuf>,

    /// Output mode: interactive, text, csv or json
    #[arg(short, long)]
    mode: Option<OutputMode>,

    /// Only show clients of this driver, PCI address or device node
    #[arg(short, long)]
    device: Option<String>,

    /// Report physical engine utilisation instead of per-class averages
    #[arg(short, long)]
    physical: bool,

    /// List DRM devices and exit
    #[arg(short = 'L', long)]
    list_devices: bool,

    /// Sort key within each device: runtime, total, pid or id
    #[arg(long)]
    sort: Option<SortKey>,

    /// Combine all clients of a process into one row
    #[arg(long)]
    aggregate_pid: bool,

    /// Also show clients which never used an engine
    #[arg(long)]
    show_idle: bool,

    /// Print percentages inside the bars
    #[arg(long)]
    numbers: bool,

    /// Exit after this many samples
    #[arg(short = 'n', long)]
    iterations: Option<u64>,

    /// TOML configuration file
    #[arg(short, long, env = "GPUTOP_CONFIG")]
    config: Option<PathBuf>,

    /// Fixed engine list, in display order
    #[arg(short, long, value_delimiter = ',')]
    engines: Option<Vec<String>>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    /// Configuration file values, overridden by command line flags
    fn config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => Config::default(),
        };

        if let Some(period) = self.period {
            config.period_ms = period;
        }
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        if let Some(sort) = self.sort {
            config.sort = sort;
        }
        if let Some(device) = &self.device {
            config.device = Some(device.clone());
        }
        if let Some(engines) = &self.engines {
            config.engines = Some(engines.clone());
        }
        if self.physical {
            config.view = EngineView::Physical;
        }
        config.show_idle |= self.show_idle;
        config.numbers |= self.numbers;
        config.aggregate_pid |= self.aggregate_pid;

        config.validate()?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if cli.list_devices {
        return list_devices();
    }

    let config = cli.config()?;
    run(&cli, &config)
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(io::stderr),
        )
        .init();
}

/// Where snapshots end up
enum Sink {
    Dashboard {
        out: Box<dyn Write>,
        dashboard: Dashboard,
        to_terminal: bool,
    },
    Structured(StructuredWriter<Box<dyn Write>>),
}

impl Sink {
    fn new(output: Option<&PathBuf>, config: &Config) -> Result<Self> {
        let to_terminal = output.is_none();
        let out: Box<dyn Write> = match output {
            Some(path) => Box::new(BufWriter::new(
                File::create(path)
                    .with_context(|| format!("failed to create {}", path.display()))?,
            )),
            None => Box::new(io::stdout()),
        };

        Ok(match config.mode.structured() {
            Some(format) => Sink::Structured(StructuredWriter::new(out, format, config.view)),
            None => Sink::Dashboard {
                out,
                dashboard: Dashboard {
                    size: ConsoleSize::FALLBACK,
                    view: config.view,
                    show_idle: config.show_idle,
                    numbers: config.numbers,
                },
                to_terminal,
            },
        })
    }

    fn emit(&mut self, snapshot: &Snapshot) -> io::Result<()> {
        match self {
            Sink::Dashboard {
                out,
                dashboard,
                to_terminal,
            } => {
                if *to_terminal {
                    dashboard.size = ConsoleSize::from_query(term::size());
                    out.write_all(b"\x1b[H\x1b[J")?;
                }
                out.write_all(dashboard.render(snapshot).as_bytes())?;
                out.flush()
            }
            Sink::Structured(writer) => writer.write(snapshot),
        }
    }
}

#[cfg(target_os = "linux")]
fn list_devices() -> Result<()> {
    let devices = gpu_clients::linux::discover_devices()?;

    println!(
        "{:<12} {:>7} {:<10} {:<14} {:<9} DEVNODE",
        "NODE", "DEV", "DRIVER", "PCI", "ID"
    );
    for d in devices {
        let id = match (d.vendor_id, d.device_id) {
            (Some(v), Some(p)) => format!("{v:04x}:{p:04x}"),
            _ => "-".to_string(),
        };
        println!(
            "{:<12} {:>7} {:<10} {:<14} {:<9} {}",
            d.name,
            format!("226:{}", d.minor),
            d.driver.as_deref().unwrap_or("-"),
            d.pci_address.as_deref().unwrap_or("-"),
            id,
            d.devnode
        );
    }
    Ok(())
}

#[cfg(target_os = "linux")]
fn run(cli: &Cli, config: &Config) -> Result<()> {
    use gpu_clients::Monitor;

    let mut monitor = Monitor::new(config)?;
    let mut sink = Sink::new(cli.output.as_ref(), config)?;

    signals::install();

    // First scan only records baselines
    monitor.sample();

    let mut emitted = 0;
    while !signals::stopped() {
        if !signals::sleep(config.period()) {
            break;
        }

        let snapshot = monitor.sample();
        match sink.emit(&snapshot) {
            Ok(()) => {}
            // Reader went away, e.g. `gputop -m json | head`
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => break,
            Err(e) => return Err(e).context("failed to write output"),
        }

        emitted += 1;
        if cli.iterations.is_some_and(|n| emitted >= n) {
            break;
        }
    }

    tracing::debug!(emitted, "exiting");
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn list_devices() -> Result<()> {
    Err(gpu_clients::Error::PlatformNotSupported.into())
}

#[cfg(not(target_os = "linux"))]
fn run(_cli: &Cli, _config: &Config) -> Result<()> {
    Err(gpu_clients::Error::PlatformNotSupported.into())
}

/// Stop flag raised by SIGINT and SIGTERM
#[cfg(target_os = "linux")]
mod signals {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::{Duration, Instant};

    static STOP: AtomicBool = AtomicBool::new(false);

    const SLEEP_STEP: Duration = Duration::from_millis(50);

    extern "C" fn on_signal(_sig: libc::c_int) {
        STOP.store(true, Ordering::SeqCst);
    }

    pub fn install() {
        let handler = on_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
        unsafe {
            libc::signal(libc::SIGINT, handler);
            libc::signal(libc::SIGTERM, handler);
        }
    }

    pub fn stopped() -> bool {
        STOP.load(Ordering::SeqCst)
    }

    /// Sleep for `period`, returning false if interrupted by a signal
    pub fn sleep(period: Duration) -> bool {
        let deadline = Instant::now() + period;
        loop {
            if stopped() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep(SLEEP_STEP.min(deadline - now));
        }
    }
}

mod term {
    /// Terminal size as (columns, rows), if stdout is a terminal
    #[cfg(unix)]
    pub fn size() -> Option<(usize, usize)> {
        let mut ws: libc::winsize = unsafe { std::mem::zeroed() };
        let ok = unsafe { libc::ioctl(libc::STDOUT_FILENO, libc::TIOCGWINSZ, &mut ws) } == 0;
        (ok && ws.ws_col > 0 && ws.ws_row > 0).then(|| (ws.ws_col as usize, ws.ws_row as usize))
    }

    #[cfg(not(unix))]
    pub fn size() -> Option<(usize, usize)> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_defaults() {
        let cli = Cli::parse_from([
            "gputop", "-s", "500", "-m", "csv", "--sort", "pid", "-p", "-e", "render,copy",
        ]);
        let config = cli.config().unwrap();

        assert_eq!(config.period_ms, 500);
        assert_eq!(config.mode, OutputMode::Csv);
        assert_eq!(config.sort, SortKey::Pid);
        assert_eq!(config.view, EngineView::Physical);
        assert_eq!(config.engines, Some(vec!["render".to_string(), "copy".to_string()]));
    }

    #[test]
    fn test_cli_rejects_zero_period() {
        let cli = Cli::parse_from(["gputop", "-s", "0"]);
        assert!(cli.config().is_err());
    }

    #[test]
    fn test_cli_rejects_unknown_mode() {
        assert!(Cli::try_parse_from(["gputop", "-m", "xml"]).is_err());
    }
}
