//! Real sessions: the tool runs on the slave side of a fresh pty.
//!
//! iperf3 only emits its per-interval lines promptly when stdout is a
//! terminal, so a pipe is not enough. The child gets its own session with
//! the slave as controlling terminal; the master stays here, non-blocking,
//! and is read after a bounded `poll`.

use std::fs::File;
use std::io::{self, Read};
use std::os::fd::{AsFd, AsRawFd, OwnedFd};
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::fcntl::{FcntlArg, FdFlag, OFlag, fcntl};
use nix::libc;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use nix::pty::{Winsize, openpty};
use nix::sys::signal::{Signal, killpg};
use nix::unistd::{Pid, setsid};
use tracing::{debug, info, trace, warn};

use super::{ReadOutcome, Session, SessionError, SessionSpawner};

/// Bytes read per `read_available` call.
const READ_BUFFER_SIZE: usize = 4096;

/// Time the child gets to exit after SIGTERM before SIGKILL.
const TERMINATE_GRACE: Duration = Duration::from_millis(500);

/// Step between liveness checks during the grace period.
const TERMINATE_POLL_STEP: Duration = Duration::from_millis(20);

/// Terminal size reported to the child. Wide enough that no tool line wraps.
const PTY_COLS: u16 = 200;
const PTY_ROWS: u16 = 50;

/// Spawns [`PtySession`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct PtySpawner;

impl PtySpawner {
    pub fn new() -> Self {
        Self
    }
}

impl SessionSpawner for PtySpawner {
    type Session = PtySession;

    fn spawn(&mut self, program: &str, args: &[String]) -> Result<PtySession, SessionError> {
        PtySession::open(program, args)
    }
}

/// A child process attached to a pseudo-terminal.
///
/// The master descriptor and the child are released together in
/// [`Session::close`]; dropping an open session closes it.
#[derive(Debug)]
pub struct PtySession {
    child: Child,
    master: Option<File>,
    exit: Option<ExitStatus>,
    closed: bool,
}

impl PtySession {
    /// Allocates a pty and launches `program` with stdio on the slave side.
    pub fn open(program: &str, args: &[String]) -> Result<Self, SessionError> {
        let winsize = Winsize {
            ws_row: PTY_ROWS,
            ws_col: PTY_COLS,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };
        let pty = openpty(Some(&winsize), None).map_err(|e| SessionError::Pty(e.into()))?;

        set_cloexec(&pty.master).map_err(SessionError::Pty)?;
        set_cloexec(&pty.slave).map_err(SessionError::Pty)?;
        set_nonblocking(&pty.master).map_err(SessionError::Pty)?;

        // The command holds the parent's copies of the slave; it must be
        // dropped right after spawn so EOF shows up once the child exits.
        let child = {
            let stdin = pty.slave.try_clone().map_err(SessionError::Pty)?;
            let stdout = pty.slave.try_clone().map_err(SessionError::Pty)?;

            let mut cmd = Command::new(program);
            cmd.args(args)
                .stdin(Stdio::from(stdin))
                .stdout(Stdio::from(stdout))
                .stderr(Stdio::from(pty.slave));
            // SAFETY: the hook only calls setsid(2) and ioctl(2), both
            // async-signal-safe, and allocates nothing.
            unsafe {
                cmd.pre_exec(attach_controlling_terminal);
            }

            cmd.spawn().map_err(|source| SessionError::Spawn {
                program: program.to_string(),
                source,
            })?
        };

        info!("Spawned {} (pid {})", program, child.id());
        debug!("Arguments: {:?}", args);

        Ok(Self {
            child,
            master: Some(File::from(pty.master)),
            exit: None,
            closed: false,
        })
    }

    /// Waits for the child, escalating SIGTERM to SIGKILL after a grace
    /// period. Signals go to the child's process group.
    fn terminate(&mut self) -> io::Result<ExitStatus> {
        let pgid = Pid::from_raw(self.child.id() as i32);
        if let Some(status) = self.child.try_wait()? {
            // The leader is gone but background members of its group may
            // still hold the slave.
            if let Err(e) = killpg(pgid, Signal::SIGTERM) {
                trace!("SIGTERM to process group {} failed: {}", pgid, e);
            }
            return Ok(status);
        }

        if let Err(e) = killpg(pgid, Signal::SIGTERM) {
            debug!("SIGTERM to process group {} failed: {}", pgid, e);
        }

        let deadline = Instant::now() + TERMINATE_GRACE;
        while Instant::now() < deadline {
            if let Some(status) = self.child.try_wait()? {
                return Ok(status);
            }
            thread::sleep(TERMINATE_POLL_STEP);
        }

        warn!("pid {} ignored SIGTERM, sending SIGKILL", pgid);
        if let Err(e) = killpg(pgid, Signal::SIGKILL) {
            debug!("SIGKILL to process group {} failed: {}", pgid, e);
            self.child.kill()?;
        }
        self.child.wait()
    }
}

impl Session for PtySession {
    fn read_available(&mut self, timeout: Duration) -> Result<ReadOutcome, SessionError> {
        let Some(master) = self.master.as_mut() else {
            return Ok(ReadOutcome::Eof);
        };

        let millis = u16::try_from(timeout.as_millis()).unwrap_or(u16::MAX);
        let revents = {
            let mut fds = [PollFd::new(master.as_fd(), PollFlags::POLLIN)];
            match poll(&mut fds, PollTimeout::from(millis)) {
                Ok(0) => return Ok(ReadOutcome::Timeout),
                Ok(_) => {}
                Err(Errno::EINTR) => return Ok(ReadOutcome::Timeout),
                Err(e) => return Err(SessionError::Io(e.into())),
            }
            fds[0].revents()
        };

        if revents.is_some_and(|r| r.contains(PollFlags::POLLNVAL)) {
            return Err(SessionError::Io(Errno::EBADF.into()));
        }

        let mut buf = [0u8; READ_BUFFER_SIZE];
        loop {
            match master.read(&mut buf) {
                Ok(0) => return Ok(ReadOutcome::Eof),
                Ok(n) => return Ok(ReadOutcome::Data(buf[..n].to_vec())),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(ReadOutcome::Timeout);
                }
                // Linux reports a closed slave as EIO on the master.
                Err(e) if e.raw_os_error() == Some(libc::EIO) => return Ok(ReadOutcome::Eof),
                Err(e) => return Err(SessionError::Io(e)),
            }
        }
    }

    fn is_alive(&mut self) -> bool {
        if self.exit.is_some() {
            return false;
        }
        match self.child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                self.exit = Some(status);
                false
            }
            Err(e) => {
                warn!("Failed to query pid {}: {}", self.child.id(), e);
                false
            }
        }
    }

    fn close(&mut self) -> Result<Option<ExitStatus>, SessionError> {
        if self.closed {
            return Ok(self.exit);
        }
        self.closed = true;

        let result = self.terminate();
        self.master = None;

        match result {
            Ok(status) => {
                debug!("pid {} reaped: {}", self.child.id(), status);
                self.exit = Some(status);
                Ok(Some(status))
            }
            Err(e) => Err(SessionError::Io(e)),
        }
    }

    fn pid(&self) -> u32 {
        self.child.id()
    }
}

impl Drop for PtySession {
    fn drop(&mut self) {
        if !self.closed
            && let Err(e) = self.close()
        {
            warn!("Failed to close session for pid {}: {}", self.child.id(), e);
        }
    }
}

/// Runs in the child between fork and exec: new session, slave (already
/// on fd 0) becomes the controlling terminal.
fn attach_controlling_terminal() -> io::Result<()> {
    setsid()?;
    // SAFETY: plain ioctl on fd 0 with an integer argument.
    if unsafe { libc::ioctl(libc::STDIN_FILENO, libc::TIOCSCTTY as _, 0) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn set_nonblocking(fd: &OwnedFd) -> io::Result<()> {
    let flags = fcntl(fd.as_raw_fd(), FcntlArg::F_GETFL)?;
    let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
    fcntl(fd.as_raw_fd(), FcntlArg::F_SETFL(flags))?;
    Ok(())
}

fn set_cloexec(fd: &OwnedFd) -> io::Result<()> {
    fcntl(fd.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))?;
    Ok(())
}
