//! Scripted sessions for exercising the monitor without a real tool.
//!
//! A [`Script`] lists what successive reads return. [`ScriptedSpawner`]
//! hands out one script per spawn and records every launch and close.

use std::cell::Cell;
use std::collections::VecDeque;
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use super::{ReadOutcome, Session, SessionError, SessionSpawner};

/// One scripted read result.
#[derive(Debug, Clone)]
pub enum Step {
    Output(Vec<u8>),
    Timeout,
    Eof,
    /// Read fails with an I/O error of this kind.
    Fail(io::ErrorKind),
    /// Clears the running flag (operator interrupt), then reads as a timeout.
    Interrupt(Arc<AtomicBool>),
    /// The child exits; later steps stay readable, as output left in the
    /// terminal or written by a grandchild would.
    Exit,
}

/// Sequence of read results for one session.
#[derive(Debug, Clone, Default)]
pub struct Script {
    steps: VecDeque<Step>,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    /// Output of one terminal line (`\r\n` terminated, as a pty emits it).
    pub fn line(self, text: &str) -> Self {
        self.output(format!("{}\r\n", text).as_bytes())
    }

    pub fn output(mut self, bytes: &[u8]) -> Self {
        self.steps.push_back(Step::Output(bytes.to_vec()));
        self
    }

    pub fn timeout(mut self) -> Self {
        self.steps.push_back(Step::Timeout);
        self
    }

    pub fn eof(mut self) -> Self {
        self.steps.push_back(Step::Eof);
        self
    }

    pub fn fail(mut self, kind: io::ErrorKind) -> Self {
        self.steps.push_back(Step::Fail(kind));
        self
    }

    pub fn interrupt(mut self, running: &Arc<AtomicBool>) -> Self {
        self.steps.push_back(Step::Interrupt(Arc::clone(running)));
        self
    }

    pub fn exit(mut self) -> Self {
        self.steps.push_back(Step::Exit);
        self
    }
}

/// Session replaying a [`Script`]. Alive until the script is exhausted
/// or an [`Step::Exit`] is read.
#[derive(Debug)]
pub struct ScriptedSession {
    pid: u32,
    steps: VecDeque<Step>,
    exited: bool,
    closed: bool,
    close_count: Rc<Cell<usize>>,
}

impl Session for ScriptedSession {
    fn read_available(&mut self, _timeout: Duration) -> Result<ReadOutcome, SessionError> {
        if self.closed {
            return Ok(ReadOutcome::Eof);
        }
        loop {
            return match self.steps.pop_front() {
                Some(Step::Output(bytes)) => Ok(ReadOutcome::Data(bytes)),
                Some(Step::Timeout) => Ok(ReadOutcome::Timeout),
                Some(Step::Eof) | None => Ok(ReadOutcome::Eof),
                Some(Step::Fail(kind)) => Err(SessionError::Io(io::Error::from(kind))),
                Some(Step::Interrupt(running)) => {
                    running.store(false, Ordering::SeqCst);
                    Ok(ReadOutcome::Timeout)
                }
                Some(Step::Exit) => {
                    self.exited = true;
                    continue;
                }
            };
        }
    }

    fn is_alive(&mut self) -> bool {
        !self.closed && !self.exited && !self.steps.is_empty()
    }

    fn close(&mut self) -> Result<Option<ExitStatus>, SessionError> {
        if !self.closed {
            self.closed = true;
            self.close_count.set(self.close_count.get() + 1);
        }
        Ok(Some(ExitStatus::from_raw(0)))
    }

    fn pid(&self) -> u32 {
        self.pid
    }
}

impl Drop for ScriptedSession {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Spawner returning scripted sessions in order.
///
/// Once the scripts run out, further spawns fail as if the program
/// did not exist.
#[derive(Debug, Default)]
pub struct ScriptedSpawner {
    scripts: VecDeque<Script>,
    launches: Vec<(String, Vec<String>)>,
    close_count: Rc<Cell<usize>>,
    peak_open: usize,
}

impl ScriptedSpawner {
    pub fn new(scripts: impl IntoIterator<Item = Script>) -> Self {
        Self {
            scripts: scripts.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Program and arguments of every successful spawn, in order.
    pub fn launches(&self) -> &[(String, Vec<String>)] {
        &self.launches
    }

    /// Number of sessions closed so far.
    pub fn closed(&self) -> usize {
        self.close_count.get()
    }

    /// Highest number of sessions open at the same time.
    pub fn peak_open(&self) -> usize {
        self.peak_open
    }
}

impl SessionSpawner for ScriptedSpawner {
    type Session = ScriptedSession;

    fn spawn(&mut self, program: &str, args: &[String]) -> Result<ScriptedSession, SessionError> {
        let Some(script) = self.scripts.pop_front() else {
            return Err(SessionError::Spawn {
                program: program.to_string(),
                source: io::Error::from(io::ErrorKind::NotFound),
            });
        };

        self.launches.push((program.to_string(), args.to_vec()));
        let open = self.launches.len() - self.close_count.get();
        self.peak_open = self.peak_open.max(open);

        Ok(ScriptedSession {
            pid: 1000 + self.launches.len() as u32,
            steps: script.steps,
            exited: false,
            closed: false,
            close_count: Rc::clone(&self.close_count),
        })
    }
}
