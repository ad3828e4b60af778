//! iperfwatch - iperf3 throughput monitor.
//!
//! Runs iperf3 against a server and alerts whenever a reported interval
//! falls below 85% of the target rate. With `--duration 0` the test runs
//! until Ctrl-C, restarting iperf3 whenever it exits.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;
#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::io;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing::{Level, info, warn};
use tracing_subscriber::EnvFilter;

use iperfwatch::config::{Config, DEFAULT_ALERT_LOG, DEFAULT_PORT, DEFAULT_PROGRAM, Mode};
use iperfwatch::monitor::Monitor;
use iperfwatch::rate::parse_rate;
use iperfwatch::session::PtySpawner;

/// Test direction as accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ModeArg {
    /// Client sends to server.
    #[value(alias = "client")]
    Forward,
    /// Server sends to client.
    Reverse,
    /// Both directions at once.
    #[value(alias = "bidir")]
    Bidirectional,
}

impl From<ModeArg> for Mode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Forward => Mode::Forward,
            ModeArg::Reverse => Mode::Reverse,
            ModeArg::Bidirectional => Mode::Bidirectional,
        }
    }
}

/// iperf3 throughput monitor.
#[derive(Parser)]
#[command(name = "iperfwatch", about = "iperf3 throughput monitor", version)]
struct Args {
    /// Target speed (e.g. 10G, 1G, 500M). Alerts fire below 85% of it.
    #[arg(short, long, value_parser = parse_target)]
    target: String,

    /// iperf3 server address.
    #[arg(short = 'c', long)]
    server: String,

    /// iperf3 server port.
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Duration in seconds (0 = run until Ctrl-C, restarting iperf3).
    #[arg(short, long, default_value = "10")]
    duration: u64,

    /// Test mode.
    #[arg(short, long, value_enum, default_value_t = ModeArg::Forward)]
    mode: ModeArg,

    /// iperf3 executable.
    #[arg(long, default_value = DEFAULT_PROGRAM)]
    iperf_bin: String,

    /// File that alert lines are appended to.
    #[arg(long, default_value = DEFAULT_ALERT_LOG)]
    alert_log: String,

    /// Seconds to wait before restarting iperf3 in continuous mode.
    #[arg(long, default_value = "1")]
    restart_delay: u64,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

/// Validates the target rate while keeping the text for the banner.
fn parse_target(s: &str) -> Result<String, String> {
    match parse_rate(s) {
        Ok(bps) if bps > 0.0 => Ok(s.trim().to_string()),
        Ok(_) => Err("target rate must be positive".to_string()),
        Err(e) => Err(e.to_string()),
    }
}

/// Initializes the tracing subscriber on stderr; stdout carries samples.
/// Default level is INFO. Use -q for quiet mode (errors only).
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let mut filter = EnvFilter::from_default_env();
    if let Ok(directive) = format!("iperfwatch={}", level).parse() {
        filter = filter.add_directive(directive);
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn build_config(args: &Args) -> Result<Config, String> {
    let config = Config::from_target_str(args.server.as_str(), &args.target)
        .map_err(|e| e.to_string())?
        .with_port(args.port)
        .with_duration(args.duration)
        .with_mode(args.mode.into())
        .with_program(args.iperf_bin.as_str())
        .with_alert_log(args.alert_log.as_str())
        .with_restart_delay(Duration::from_secs(args.restart_delay));
    Ok(config)
}

fn main() -> ExitCode {
    let args = Args::parse();

    init_logging(args.verbose, args.quiet);

    let config = match build_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::from(2);
        }
    };

    info!("iperfwatch {} starting", env!("CARGO_PKG_VERSION"));
    info!(
        "Config: server={}:{}, threshold={:.0} bps, alert_log={}",
        config.server(),
        config.port(),
        config.threshold_bps(),
        config.alert_log().display()
    );

    // Setup graceful shutdown
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();

    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        r.store(false, Ordering::SeqCst);
    }) {
        warn!("Failed to set Ctrl-C handler: {}", e);
    }

    let mut monitor = Monitor::new(config, PtySpawner::new(), io::stdout(), running);
    monitor.announce(&args.target);
    let summary = monitor.run();

    if summary.reason.is_clean() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_target() {
        assert_eq!(parse_target(" 10G ").unwrap(), "10G");
        assert!(parse_target("0").is_err());
        assert!(parse_target("fast").is_err());
    }

    #[test]
    fn test_args_defaults() {
        let args = Args::try_parse_from(["iperfwatch", "--target", "10G", "--server", "srv"]).unwrap();
        assert_eq!(args.port, 5201);
        assert_eq!(args.duration, 10);
        assert_eq!(args.mode, ModeArg::Forward);
        assert_eq!(args.alert_log, "iperf_alert.log");

        let config = build_config(&args).unwrap();
        assert_eq!(config.target_bps(), 10e9);
        assert!(!config.is_continuous());
    }

    #[test]
    fn test_args_mode_aliases() {
        let args = Args::try_parse_from([
            "iperfwatch", "-t", "1G", "-c", "srv", "-m", "bidir", "-d", "0",
        ])
        .unwrap();
        assert_eq!(args.mode, ModeArg::Bidirectional);
        assert_eq!(Mode::from(args.mode), Mode::Bidirectional);

        let args =
            Args::try_parse_from(["iperfwatch", "-t", "1G", "-c", "srv", "-m", "client"]).unwrap();
        assert_eq!(args.mode, ModeArg::Forward);
    }

    #[test]
    fn test_args_reject_bad_target() {
        assert!(Args::try_parse_from(["iperfwatch", "-t", "ten", "-c", "srv"]).is_err());
    }
}
