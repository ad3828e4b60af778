//! iperfwatch - live throughput monitor for iperf3.
//!
//! Runs the bandwidth tool on a pseudo-terminal, parses its per-interval
//! output as it arrives and raises alerts when throughput drops below 85%
//! of a target rate.
//!
//! - `rate` - rate strings to bits per second
//! - `sample` - throughput extraction from tool output lines
//! - `lines` - line reassembly from raw terminal reads
//! - `session` - pty-backed child sessions (plus scripted mocks)
//! - `alert` - threshold evaluation and the alert log
//! - `config` - monitor settings and tool arguments
//! - `monitor` - the supervision loop

pub mod alert;
pub mod config;
pub mod lines;
pub mod monitor;
pub mod rate;
pub mod sample;
pub mod session;
