//! Monitor configuration and the derived command line for the wrapped tool.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::rate::{RateParseError, parse_rate};

/// Fraction of the target rate below which a sample raises an alert.
pub const ALERT_RATIO: f64 = 0.85;

/// Default iperf3 server port.
pub const DEFAULT_PORT: u16 = 5201;

/// Default executable name of the bandwidth tool.
pub const DEFAULT_PROGRAM: &str = "iperf3";

/// Default alert log path, relative to the working directory.
pub const DEFAULT_ALERT_LOG: &str = "iperf_alert.log";

/// Bound for a single wait on the pty.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Pause between sessions in continuous mode.
const DEFAULT_RESTART_DELAY: Duration = Duration::from_secs(1);

/// Traffic direction requested from the tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Client sends to server.
    #[default]
    Forward,
    /// Server sends to client (`--reverse`).
    Reverse,
    /// Both directions at once (`--bidir`).
    Bidirectional,
}

impl Mode {
    /// Extra tool flag for this mode, if any.
    pub fn flag(&self) -> Option<&'static str> {
        match self {
            Mode::Forward => None,
            Mode::Reverse => Some("--reverse"),
            Mode::Bidirectional => Some("--bidir"),
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Mode::Forward => "forward",
            Mode::Reverse => "reverse",
            Mode::Bidirectional => "bidirectional",
        };
        f.write_str(name)
    }
}

/// Error type for invalid configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Target rate string could not be parsed.
    InvalidTarget(RateParseError),
    /// Target rate is zero or negative.
    NonPositiveTarget(f64),
    /// Server address is empty.
    EmptyServer,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidTarget(e) => write!(f, "target: {}", e),
            ConfigError::NonPositiveTarget(v) => {
                write!(f, "target rate must be positive, got {}", v)
            }
            ConfigError::EmptyServer => write!(f, "server address must not be empty"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<RateParseError> for ConfigError {
    fn from(e: RateParseError) -> Self {
        ConfigError::InvalidTarget(e)
    }
}

/// Immutable monitor settings.
///
/// Required values go through [`Config::new`]; the remaining knobs use
/// consuming `with_*` builders.
#[derive(Debug, Clone)]
pub struct Config {
    server: String,
    port: u16,
    target_bps: f64,
    duration_secs: u64,
    mode: Mode,
    program: String,
    alert_log: PathBuf,
    poll_interval: Duration,
    restart_delay: Duration,
}

impl Config {
    /// Creates a config for `server` with a target rate in bits per second.
    pub fn new(server: impl Into<String>, target_bps: f64) -> Result<Self, ConfigError> {
        let server = server.into();
        if server.trim().is_empty() {
            return Err(ConfigError::EmptyServer);
        }
        if !target_bps.is_finite() || target_bps <= 0.0 {
            return Err(ConfigError::NonPositiveTarget(target_bps));
        }

        Ok(Self {
            server,
            port: DEFAULT_PORT,
            target_bps,
            duration_secs: 0,
            mode: Mode::default(),
            program: DEFAULT_PROGRAM.to_string(),
            alert_log: PathBuf::from(DEFAULT_ALERT_LOG),
            poll_interval: DEFAULT_POLL_INTERVAL,
            restart_delay: DEFAULT_RESTART_DELAY,
        })
    }

    /// Same as [`Config::new`] with the target given as text ("10G").
    pub fn from_target_str(server: impl Into<String>, target: &str) -> Result<Self, ConfigError> {
        Self::new(server, parse_rate(target)?)
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Test length in seconds; 0 runs the tool continuously with restarts.
    pub fn with_duration(mut self, secs: u64) -> Self {
        self.duration_secs = secs;
        self
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// Executable to launch instead of `iperf3`.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_alert_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.alert_log = path.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_restart_delay(mut self, delay: Duration) -> Self {
        self.restart_delay = delay;
        self
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn target_bps(&self) -> f64 {
        self.target_bps
    }

    pub fn duration_secs(&self) -> u64 {
        self.duration_secs
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn alert_log(&self) -> &Path {
        &self.alert_log
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn restart_delay(&self) -> Duration {
        self.restart_delay
    }

    /// True when the tool is restarted after every session (duration 0).
    pub fn is_continuous(&self) -> bool {
        self.duration_secs == 0
    }

    /// Alert boundary: 85% of the target.
    pub fn threshold_bps(&self) -> f64 {
        self.target_bps * ALERT_RATIO
    }

    /// Argument vector for the tool, without the program name.
    pub fn command_args(&self) -> Vec<String> {
        let mut args = vec![
            "-c".to_string(),
            self.server.clone(),
            "-p".to_string(),
            self.port.to_string(),
            "-i".to_string(),
            "1".to_string(),
            "-t".to_string(),
            self.duration_secs.to_string(),
        ];
        if let Some(flag) = self.mode.flag() {
            args.push(flag.to_string());
        }
        args
    }
}
