//! Threshold checks and the append-only alert log.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

use crate::config::Config;
use crate::rate::format_mbps;
use crate::sample::{Direction, Sample};

/// Timestamp format of alert lines.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A sample that fell below the threshold.
#[derive(Debug, Clone)]
pub struct AlertEvent {
    pub timestamp: DateTime<Local>,
    pub direction: Direction,
    pub observed_bps: f64,
    pub target_bps: f64,
    pub threshold_bps: f64,
    pub message: String,
}

impl AlertEvent {
    /// `[YYYY-MM-DD HH:MM:SS] <message>`, as written to the log.
    pub fn log_line(&self) -> String {
        format!("[{}] {}", self.timestamp.format(TIMESTAMP_FORMAT), self.message)
    }
}

/// Append-only alert file.
///
/// The file is opened, appended and closed for every event, so external
/// readers can tail or rotate it at any time.
#[derive(Debug, Clone)]
pub struct AlertLog {
    path: PathBuf,
}

impl AlertLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one line for `event`, creating the file if needed.
    pub fn append(&self, event: &AlertEvent) -> io::Result<()> {
        let mut line = event.log_line();
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())
    }
}

/// Outcome of evaluating one sample.
#[derive(Debug)]
pub enum Observation {
    /// At or above the threshold.
    Ok(Sample),
    /// Below the threshold. `logged` holds the result of the log append.
    Alert {
        event: AlertEvent,
        logged: io::Result<()>,
    },
}

impl Observation {
    /// Line printed to the console for this observation.
    pub fn console_line(&self) -> String {
        match self {
            Observation::Ok(sample) => match sample.direction.tag() {
                Some(tag) => format!("OK [{}]: {} Mbps", tag, format_mbps(sample.value_bps)),
                None => format!("OK: {} Mbps", format_mbps(sample.value_bps)),
            },
            Observation::Alert { event, .. } => event.log_line(),
        }
    }

    pub fn is_alert(&self) -> bool {
        matches!(self, Observation::Alert { .. })
    }
}

/// Compares samples against the threshold and records alerts.
#[derive(Debug, Clone)]
pub struct AlertEvaluator {
    target_bps: f64,
    threshold_bps: f64,
    log: AlertLog,
}

impl AlertEvaluator {
    pub fn new(target_bps: f64, threshold_bps: f64, log: AlertLog) -> Self {
        Self {
            target_bps,
            threshold_bps,
            log,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.target_bps(),
            config.threshold_bps(),
            AlertLog::new(config.alert_log()),
        )
    }

    pub fn threshold_bps(&self) -> f64 {
        self.threshold_bps
    }

    pub fn log(&self) -> &AlertLog {
        &self.log
    }

    /// Builds an alert if `sample` is strictly below the threshold.
    /// Does not touch the log.
    pub fn check(&self, sample: &Sample) -> Option<AlertEvent> {
        if sample.value_bps >= self.threshold_bps {
            return None;
        }

        let tag = sample
            .direction
            .tag()
            .map(|t| format!(" [{}]", t))
            .unwrap_or_default();
        let percent = if self.target_bps > 0.0 {
            self.threshold_bps / self.target_bps * 100.0
        } else {
            0.0
        };
        let message = format!(
            "Low throughput{}: {} Mbps (< {:.0}% of target, threshold {} Mbps) target was {} Mbps",
            tag,
            format_mbps(sample.value_bps),
            percent,
            format_mbps(self.threshold_bps),
            format_mbps(self.target_bps),
        );

        Some(AlertEvent {
            timestamp: Local::now(),
            direction: sample.direction,
            observed_bps: sample.value_bps,
            target_bps: self.target_bps,
            threshold_bps: self.threshold_bps,
            message,
        })
    }

    /// Checks `sample` and appends any resulting alert to the log.
    ///
    /// A failed append is reported in the returned observation and never
    /// suppresses the alert itself.
    pub fn evaluate(&self, sample: Sample) -> Observation {
        match self.check(&sample) {
            Some(event) => {
                let logged = self.log.append(&event);
                Observation::Alert { event, logged }
            }
            None => Observation::Ok(sample),
        }
    }
}
