//! Throughput sample extraction from the bandwidth tool's text output.
//!
//! The tool is not a versioned protocol, so parsing is fail-open: a line
//! either yields a [`Sample`] or is skipped. Nothing here returns an error.
//!
//! Instead of a regex, the parser locates each `bits/sec` marker and walks
//! backwards over an optional unit letter, optional whitespace and a plain
//! decimal number. A number glued to other characters (`1e9`, `x9.5`,
//! `-3`) does not count.

use chrono::{DateTime, Local};

use crate::rate::{is_plain_decimal, unit_multiplier};

/// Marker that follows every rate value in the tool's interval lines.
const RATE_MARKER: &str = "bits/sec";

/// Logical stream a sample belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// `[SUM]` line aggregating parallel streams.
    Sum,
    /// `[TX-S]` / `[TX-C]` in bidirectional output.
    Transmit,
    /// `[RX-S]` / `[RX-C]` in bidirectional output.
    Receive,
    /// No recognised tag (single-stream client output).
    Unspecified,
}

impl Direction {
    /// Classifies a line by its bracketed tags.
    ///
    /// Transmit/receive tags take precedence over `[SUM]`, so the
    /// bidirectional summary lines (`[SUM][TX-C]`) keep their direction.
    /// Unknown tags, including numeric stream ids, are ignored.
    pub fn classify(line: &str) -> Direction {
        let mut sum = false;
        let mut rest = line;

        while let Some(open) = rest.find('[') {
            let after = &rest[open + 1..];
            let Some(close) = after.find(']') else {
                break;
            };
            match after[..close].trim() {
                "TX-S" | "TX-C" => return Direction::Transmit,
                "RX-S" | "RX-C" => return Direction::Receive,
                "SUM" => sum = true,
                _ => {}
            }
            rest = &after[close + 1..];
        }

        if sum {
            Direction::Sum
        } else {
            Direction::Unspecified
        }
    }

    /// Short tag used in console and alert lines, `None` when unspecified.
    pub fn tag(&self) -> Option<&'static str> {
        match self {
            Direction::Sum => Some("SUM"),
            Direction::Transmit => Some("TX"),
            Direction::Receive => Some("RX"),
            Direction::Unspecified => None,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Direction::Sum => "sum",
            Direction::Transmit => "transmit",
            Direction::Receive => "receive",
            Direction::Unspecified => "unspecified",
        };
        f.write_str(name)
    }
}

/// One parsed throughput measurement.
#[derive(Debug, Clone)]
pub struct Sample {
    /// Rate in bits per second, never negative.
    pub value_bps: f64,
    pub direction: Direction,
    pub observed_at: DateTime<Local>,
}

/// Removes SGR sequences (`ESC [ <params> m`) from a line.
///
/// Other escape sequences are left untouched.
pub fn strip_ansi(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut rest = line;

    while let Some(pos) = rest.find('\x1b') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        match sgr_len(tail) {
            Some(len) => rest = &tail[len..],
            None => {
                out.push('\x1b');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);

    out
}

/// Length in bytes of the SGR sequence at the start of `s`, if any.
fn sgr_len(s: &str) -> Option<usize> {
    let body = s.strip_prefix("\x1b[")?;
    let end = body.find(|c: char| !(c.is_ascii_digit() || c == ';' || c == ':'))?;
    (body.as_bytes()[end] == b'm').then_some(2 + end + 1)
}

/// Extracts a sample from one line of tool output.
///
/// Returns `None` for lines without a rate (headers, connection banners,
/// blank lines) and for garbled numbers.
pub fn parse_line(raw_line: &str) -> Option<Sample> {
    let line = strip_ansi(raw_line);
    let value_bps = find_rate(&line)?;

    Some(Sample {
        value_bps,
        direction: Direction::classify(&line),
        observed_at: Local::now(),
    })
}

/// First `<number><unit>?bits/sec` occurrence in the line, in bits/sec.
fn find_rate(line: &str) -> Option<f64> {
    line.match_indices(RATE_MARKER)
        .find_map(|(pos, _)| rate_before(&line[..pos]))
}

/// Parses the number (and unit letter) immediately preceding a marker.
fn rate_before(prefix: &str) -> Option<f64> {
    let mut head = prefix;
    let mut multiplier = 1.0;

    if let Some(c) = head.chars().last()
        && c.is_ascii_alphabetic()
    {
        multiplier = unit_multiplier(c)?;
        head = &head[..head.len() - 1];
    }

    let head = head.trim_end();
    let start = match head.rfind(|c: char| !(c.is_ascii_digit() || c == '.')) {
        Some(i) => {
            let boundary = head[i..].chars().next()?;
            if !is_number_boundary(boundary) {
                return None;
            }
            i + boundary.len_utf8()
        }
        None => 0,
    };

    let number = &head[start..];
    if !is_plain_decimal(number) {
        return None;
    }
    number
        .parse::<f64>()
        .ok()
        .map(|n| n * multiplier)
        .filter(|v| v.is_finite())
}

/// Characters allowed directly before a rate value.
fn is_number_boundary(c: char) -> bool {
    c.is_whitespace() || matches!(c, ']' | '(' | ',' | ':' | '=')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sum_line() {
        let sample = parse_line("[SUM] 0.0-1.0 sec 1.20 GBytes 9.5 Gbits/sec").unwrap();
        assert_eq!(sample.value_bps, 9.5e9);
        assert_eq!(sample.direction, Direction::Sum);
    }

    #[test]
    fn test_parse_single_stream_line() {
        let line = "[  5]   0.00-1.00   sec  1.10 GBytes  9.42 Gbits/sec    0   1.52 MBytes";
        let sample = parse_line(line).unwrap();
        assert!((sample.value_bps - 9.42e9).abs() < 1.0);
        assert_eq!(sample.direction, Direction::Unspecified);
    }

    #[test]
    fn test_parse_units() {
        let m = parse_line("[  5] 0.00-1.00 sec 59.6 MBytes 500 Mbits/sec").unwrap();
        assert_eq!(m.value_bps, 500e6);
        let k = parse_line("[  5] 0.00-1.00 sec 30.5 KBytes 250 Kbits/sec").unwrap();
        assert_eq!(k.value_bps, 250e3);
        let plain = parse_line("[  5] 0.00-1.00 sec 0.00 Bytes 0.00 bits/sec").unwrap();
        assert_eq!(plain.value_bps, 0.0);
    }

    #[test]
    fn test_parse_without_space_before_unit() {
        let sample = parse_line("rate 9.5Gbits/sec").unwrap();
        assert_eq!(sample.value_bps, 9.5e9);
    }

    #[test]
    fn test_colorized_matches_plain() {
        let plain = parse_line("[SUM] 0.0-1.0 sec 1.20 GBytes 9.5 Gbits/sec").unwrap();
        let colored =
            parse_line("\x1b[1;32m[SUM]\x1b[0m 0.0-1.0 sec 1.20 GBytes \x1b[33m9.5 Gbits/sec\x1b[0m")
                .unwrap();
        assert_eq!(colored.value_bps, plain.value_bps);
        assert_eq!(colored.direction, plain.direction);
    }

    #[test]
    fn test_header_line_no_sample() {
        assert!(parse_line("[ ID] Interval           Transfer     Bitrate").is_none());
        assert!(parse_line("Interval Transfer Bandwidth bits/sec").is_none());
        assert!(parse_line("bits/sec").is_none());
    }

    #[test]
    fn test_garbled_numbers_fail_closed() {
        assert!(parse_line("1e9 bits/sec").is_none());
        assert!(parse_line("rate 1.2.3 Gbits/sec").is_none());
        assert!(parse_line("rate x9.5 Gbits/sec").is_none());
        assert!(parse_line("rate -3 Mbits/sec").is_none());
        assert!(parse_line("rate 9.5 Tbits/sec").is_none());
    }

    #[test]
    fn test_overflowing_number_fails_closed() {
        let line = format!("[SUM] 0.00-1.00 sec 1 GBytes {} Gbits/sec", "9".repeat(400));
        assert!(parse_line(&line).is_none());
        let line = format!("rate {} Gbits/sec", "9".repeat(305));
        assert!(parse_line(&line).is_none());
    }

    #[test]
    fn test_irrelevant_lines() {
        assert!(parse_line("").is_none());
        assert!(parse_line("Connecting to host 10.0.0.1, port 5201").is_none());
        assert!(parse_line("- - - - - - - - - - - - - - - - - - - - - - - - -").is_none());
    }

    #[test]
    fn test_direction_tags() {
        let tx = parse_line("[  5][TX-C]   0.00-1.00   sec  1.09 GBytes  9.38 Gbits/sec").unwrap();
        assert_eq!(tx.direction, Direction::Transmit);
        let rx = parse_line("[  7][RX-S]   0.00-1.00   sec  1.08 GBytes  9.27 Gbits/sec").unwrap();
        assert_eq!(rx.direction, Direction::Receive);
        assert_eq!(Direction::classify("[TX-S] x"), Direction::Transmit);
        assert_eq!(Direction::classify("[RX-C] x"), Direction::Receive);
    }

    #[test]
    fn test_sum_with_direction_prefers_direction() {
        assert_eq!(Direction::classify("[SUM][TX-C] 0.00-1.00 sec"), Direction::Transmit);
        assert_eq!(Direction::classify("[SUM][RX-C] 0.00-1.00 sec"), Direction::Receive);
    }

    #[test]
    fn test_unknown_tags_unspecified() {
        assert_eq!(Direction::classify("[XY-Z] 1 Gbits/sec"), Direction::Unspecified);
        assert_eq!(Direction::classify("[unterminated 1 Gbits/sec"), Direction::Unspecified);
        assert_eq!(Direction::classify("no tags"), Direction::Unspecified);
    }

    #[test]
    fn test_strip_ansi() {
        assert_eq!(strip_ansi("\x1b[0mplain\x1b[1;31m red"), "plain red");
        assert_eq!(strip_ansi("no escapes"), "no escapes");
        // Cursor movement is not SGR and stays.
        assert_eq!(strip_ansi("a\x1b[2Kb"), "a\x1b[2Kb");
        assert_eq!(strip_ansi("dangling \x1b"), "dangling \x1b");
    }

    #[test]
    fn test_direction_tag_labels() {
        assert_eq!(Direction::Sum.tag(), Some("SUM"));
        assert_eq!(Direction::Unspecified.tag(), None);
        assert_eq!(Direction::Receive.to_string(), "receive");
    }
}
