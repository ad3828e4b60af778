//! Supervision loop: spawn the tool, stream its output through the
//! parser and evaluator, restart or stop when it exits.
//!
//! ```text
//!  Starting ──► Running ──► Restarting ──► Starting ...   (duration = 0)
//!     │            │
//!     └────────────┴──────► Stopping ──► Stopped
//! ```
//!
//! Cancellation is a shared `running` flag cleared by the Ctrl-C handler.
//! It is checked before every spawn, between bounded reads and during the
//! restart pause, so an interrupt never waits on a blocking call.

use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info, trace, warn};

use crate::alert::{AlertEvaluator, Observation};
use crate::config::Config;
use crate::lines::LineAssembler;
use crate::rate::format_mbps;
use crate::sample::parse_line;
use crate::session::{ReadOutcome, Session, SessionError, SessionSpawner};

/// Step of the cancellable restart pause.
const PAUSE_STEP: Duration = Duration::from_millis(100);

/// Monitor lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Starting,
    Running,
    Restarting,
    Stopping,
    Stopped,
}

/// Why the monitor stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// Fixed-duration test finished.
    Completed,
    /// Operator interrupt.
    Cancelled,
    /// The tool could not be launched.
    SpawnFailed(String),
    /// Terminal I/O failed during a fixed-duration test.
    SessionFailed(String),
}

impl StopReason {
    /// True for stops that are not errors.
    pub fn is_clean(&self) -> bool {
        matches!(self, StopReason::Completed | StopReason::Cancelled)
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::Completed => write!(f, "test completed"),
            StopReason::Cancelled => write!(f, "cancelled"),
            StopReason::SpawnFailed(msg) => write!(f, "spawn failed: {}", msg),
            StopReason::SessionFailed(msg) => write!(f, "session failed: {}", msg),
        }
    }
}

/// Counters for one [`Monitor::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub sessions: u64,
    pub samples: u64,
    pub alerts: u64,
    /// Alerts that could not be appended to the log.
    pub log_failures: u64,
    pub reason: StopReason,
}

/// How a single session ended.
#[derive(Debug)]
enum SessionEnd {
    Finished,
    Cancelled,
    Failed(SessionError),
}

/// Runs the tool under a [`SessionSpawner`] and reports to `console`.
pub struct Monitor<S: SessionSpawner, W: Write> {
    config: Config,
    spawner: S,
    evaluator: AlertEvaluator,
    console: W,
    running: Arc<AtomicBool>,
    state: MonitorState,
    /// Reset at the start of every session.
    assembler: LineAssembler,
    sessions: u64,
    samples: u64,
    alerts: u64,
    log_failures: u64,
}

impl<S: SessionSpawner, W: Write> Monitor<S, W> {
    /// `running` is cleared externally to cancel the run.
    pub fn new(config: Config, spawner: S, console: W, running: Arc<AtomicBool>) -> Self {
        let evaluator = AlertEvaluator::from_config(&config);
        Self {
            config,
            spawner,
            evaluator,
            console,
            running,
            state: MonitorState::Stopped,
            assembler: LineAssembler::new(),
            sessions: 0,
            samples: 0,
            alerts: 0,
            log_failures: 0,
        }
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn spawner(&self) -> &S {
        &self.spawner
    }

    pub fn console(&self) -> &W {
        &self.console
    }

    /// Prints the startup banner. `target_label` is the target as the
    /// operator typed it.
    pub fn announce(&mut self, target_label: &str) {
        let target = format!(
            "Target speed: {} ({} Mbps)",
            target_label,
            format_mbps(self.config.target_bps())
        );
        let duration = if self.config.is_continuous() {
            "Running indefinitely (press Ctrl+C to stop)".to_string()
        } else {
            format!("Running for {} seconds", self.config.duration_secs())
        };
        let mode = format!("Test mode: {}", self.config.mode());

        self.say(&target);
        self.say(&duration);
        self.say(&mode);
    }

    /// Runs until the test completes, a fatal error occurs or `running`
    /// is cleared. Every session is closed before the next one starts.
    pub fn run(&mut self) -> RunSummary {
        let args = self.config.command_args();
        let continuous = self.config.is_continuous();

        let reason = loop {
            self.transition(MonitorState::Starting);
            if !self.is_running() {
                break StopReason::Cancelled;
            }

            let mut session = match self.spawner.spawn(self.config.program(), &args) {
                Ok(session) => session,
                Err(e) => {
                    error!("{}", e);
                    self.say(&format!("Error: {}", e));
                    break StopReason::SpawnFailed(e.to_string());
                }
            };
            self.sessions += 1;
            info!("Session #{} started (pid {})", self.sessions, session.pid());

            self.transition(MonitorState::Running);
            let mut end = self.pump(&mut session);
            close_session(&mut session);
            drop(session);

            if !self.is_running() {
                end = SessionEnd::Cancelled;
            }

            match end {
                SessionEnd::Cancelled => break StopReason::Cancelled,
                SessionEnd::Failed(e) if e.is_fatal() || !continuous => {
                    self.say(&format!("Error: {}", e));
                    break StopReason::SessionFailed(e.to_string());
                }
                SessionEnd::Finished if !continuous => break StopReason::Completed,
                SessionEnd::Failed(_) | SessionEnd::Finished => {}
            }

            self.transition(MonitorState::Restarting);
            info!("Restarting {}", self.config.program());
            if !self.pause(self.config.restart_delay()) {
                break StopReason::Cancelled;
            }
        };

        self.transition(MonitorState::Stopping);
        if reason == StopReason::Cancelled {
            self.say("Stopping test.");
        }

        let summary = RunSummary {
            sessions: self.sessions,
            samples: self.samples,
            alerts: self.alerts,
            log_failures: self.log_failures,
            reason,
        };
        info!(
            "Stopped ({}): {} sessions, {} samples, {} alerts",
            summary.reason, summary.sessions, summary.samples, summary.alerts
        );
        self.transition(MonitorState::Stopped);

        summary
    }

    /// Reads from `session` until EOF, failure or cancellation.
    fn pump(&mut self, session: &mut S::Session) -> SessionEnd {
        let poll_interval = self.config.poll_interval();
        if !self.assembler.pending().is_empty() {
            debug!(
                "Dropping {} bytes left over from the previous session",
                self.assembler.pending().len()
            );
        }
        self.assembler.reset();

        loop {
            if !self.is_running() {
                return SessionEnd::Cancelled;
            }

            match session.read_available(poll_interval) {
                Ok(ReadOutcome::Data(bytes)) => self.feed(&bytes),
                Ok(ReadOutcome::Timeout) => {
                    if !session.is_alive() {
                        debug!("pid {} exited, draining terminal", session.pid());
                        return self.drain(session);
                    }
                }
                Ok(ReadOutcome::Eof) => return SessionEnd::Finished,
                Err(e) => {
                    warn!("Session pid {}: {}", session.pid(), e);
                    return SessionEnd::Failed(e);
                }
            }
        }
    }

    /// Consumes output still buffered after the child exited. A leftover
    /// grandchild may keep writing, so cancellation is still honoured.
    fn drain(&mut self, session: &mut S::Session) -> SessionEnd {
        loop {
            if !self.is_running() {
                return SessionEnd::Cancelled;
            }

            match session.read_available(Duration::ZERO) {
                Ok(ReadOutcome::Data(bytes)) => self.feed(&bytes),
                Ok(ReadOutcome::Timeout | ReadOutcome::Eof) => return SessionEnd::Finished,
                Err(e) => return SessionEnd::Failed(e),
            }
        }
    }

    fn feed(&mut self, bytes: &[u8]) {
        for line in self.assembler.feed(bytes) {
            self.handle_line(&line);
        }
    }

    fn handle_line(&mut self, line: &str) {
        let Some(sample) = parse_line(line) else {
            trace!("skip: {}", line);
            return;
        };
        self.samples += 1;

        let observation = self.evaluator.evaluate(sample);
        self.say(&observation.console_line());

        if let Observation::Alert { logged, .. } = &observation {
            self.alerts += 1;
            if let Err(e) = logged {
                self.log_failures += 1;
                let path = self.evaluator.log().path().display().to_string();
                warn!("Failed to append to {}: {}", path, e);
                self.say(&format!("Warning: could not write alert log {}: {}", path, e));
            }
        }
    }

    /// Sleeps up to `delay` in short steps; false if cancelled meanwhile.
    fn pause(&self, delay: Duration) -> bool {
        let mut remaining = delay;
        while remaining > Duration::ZERO && self.is_running() {
            let step = remaining.min(PAUSE_STEP);
            thread::sleep(step);
            remaining = remaining.saturating_sub(step);
        }
        self.is_running()
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn transition(&mut self, next: MonitorState) {
        debug!("{:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn say(&mut self, line: &str) {
        if let Err(e) = writeln!(self.console, "{}", line) {
            debug!("Console write failed: {}", e);
        }
    }
}

/// Closes a session, logging instead of failing.
fn close_session<T: Session>(session: &mut T) {
    let pid = session.pid();
    match session.close() {
        Ok(Some(status)) => info!("Session pid {} ended: {}", pid, status),
        Ok(None) => info!("Session pid {} ended", pid),
        Err(e) => warn!("Failed to close session pid {}: {}", pid, e),
    }
}
