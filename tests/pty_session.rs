//! Real pseudo-terminal sessions against /bin/sh.

use std::thread;
use std::time::{Duration, Instant};

use iperfwatch::lines::LineAssembler;
use iperfwatch::sample::parse_line;
use iperfwatch::session::{PtySpawner, ReadOutcome, Session, SessionError, SessionSpawner};

/// Reads until EOF or the deadline, returning complete lines.
fn collect_lines(session: &mut impl Session, limit: Duration) -> Vec<String> {
    let deadline = Instant::now() + limit;
    let mut assembler = LineAssembler::new();
    let mut lines = Vec::new();

    while Instant::now() < deadline {
        match session.read_available(Duration::from_millis(50)).unwrap() {
            ReadOutcome::Data(bytes) => lines.extend(assembler.feed(&bytes)),
            ReadOutcome::Timeout => {}
            ReadOutcome::Eof => break,
        }
    }
    lines
}

fn sh(script: &str) -> Vec<String> {
    vec!["-c".to_string(), script.to_string()]
}

#[test]
fn test_pty_session_reads_output_until_eof() {
    let mut spawner = PtySpawner::new();
    let mut session = spawner
        .spawn("/bin/sh", &sh("echo '[SUM] 0.0-1.0 sec 1.20 GBytes 9.5 Gbits/sec'; echo done"))
        .unwrap();

    let lines = collect_lines(&mut session, Duration::from_secs(5));
    assert!(lines.contains(&"done".to_string()));

    let sample = lines.iter().find_map(|l| parse_line(l)).unwrap();
    assert_eq!(sample.value_bps, 9.5e9);

    let status = session.close().unwrap().unwrap();
    assert!(status.success());
    assert!(!session.is_alive());
}

#[test]
fn test_pty_session_child_sees_terminal() {
    let mut spawner = PtySpawner::new();
    let mut session = spawner
        .spawn("/bin/sh", &sh("if [ -t 1 ]; then echo tty; else echo pipe; fi"))
        .unwrap();

    let lines = collect_lines(&mut session, Duration::from_secs(5));
    assert_eq!(lines, vec!["tty"]);
    session.close().unwrap();
}

#[test]
fn test_pty_session_times_out_while_silent() {
    let mut spawner = PtySpawner::new();
    let mut session = spawner.spawn("/bin/sh", &sh("sleep 5")).unwrap();

    let outcome = session.read_available(Duration::from_millis(50)).unwrap();
    assert_eq!(outcome, ReadOutcome::Timeout);
    assert!(session.is_alive());

    let started = Instant::now();
    let status = session.close().unwrap().unwrap();
    assert!(!status.success());
    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(!session.is_alive());
}

#[test]
fn test_pty_session_close_is_idempotent() {
    let mut spawner = PtySpawner::new();
    let mut session = spawner.spawn("/bin/sh", &sh("exit 3")).unwrap();

    collect_lines(&mut session, Duration::from_secs(5));
    let first = session.close().unwrap();
    let second = session.close().unwrap();
    assert_eq!(first, second);
    assert_eq!(first.unwrap().code(), Some(3));
    assert_eq!(
        session.read_available(Duration::ZERO).unwrap(),
        ReadOutcome::Eof
    );
}

/// True once `pid` is gone or a zombie.
fn process_gone(pid: u32) -> bool {
    match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        Ok(stat) => stat
            .rsplit_once(')')
            .is_some_and(|(_, rest)| rest.trim_start().starts_with('Z')),
        Err(_) => true,
    }
}

#[test]
fn test_pty_close_signals_leftover_group_members() {
    let mut spawner = PtySpawner::new();
    let mut session = spawner
        .spawn("/bin/sh", &sh("trap '' HUP; sleep 30 & echo $!; exit 0"))
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    let mut assembler = LineAssembler::new();
    let mut pid = None;
    while pid.is_none() && Instant::now() < deadline {
        let outcome = session.read_available(Duration::from_millis(50)).unwrap();
        if let ReadOutcome::Data(bytes) = outcome {
            pid = assembler
                .feed(&bytes)
                .iter()
                .find_map(|l| l.trim().parse::<u32>().ok());
        }
    }
    let pid = pid.unwrap();

    while session.is_alive() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    assert!(!session.is_alive());
    assert!(!process_gone(pid));

    let status = session.close().unwrap().unwrap();
    assert!(status.success());

    let deadline = Instant::now() + Duration::from_secs(2);
    while !process_gone(pid) && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(20));
    }
    assert!(process_gone(pid));
}

#[test]
fn test_pty_spawn_missing_program() {
    let mut spawner = PtySpawner::new();
    let err = spawner
        .spawn("/nonexistent/iperf3-missing", &[])
        .unwrap_err();
    assert!(matches!(err, SessionError::Spawn { .. }));
    assert!(err.is_fatal());
}
