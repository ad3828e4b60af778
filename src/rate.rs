//! Human-readable bit rates ("10G", "500M", "250K") to bits per second.

/// Error returned when a rate string cannot be interpreted.
#[derive(Debug, Clone, PartialEq)]
pub enum RateParseError {
    /// The numeric portion is missing or not a plain decimal number.
    InvalidRateFormat(String),
}

impl std::fmt::Display for RateParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RateParseError::InvalidRateFormat(input) => {
                write!(f, "invalid rate '{}': expected <number>[K|M|G]", input)
            }
        }
    }
}

impl std::error::Error for RateParseError {}

/// Returns the multiplier for a unit suffix (case-insensitive).
pub fn unit_multiplier(unit: char) -> Option<f64> {
    match unit.to_ascii_uppercase() {
        'K' => Some(1e3),
        'M' => Some(1e6),
        'G' => Some(1e9),
        _ => None,
    }
}

/// Checks that `s` is a plain decimal: digits with at most one dot.
///
/// `f64::from_str` also accepts exponents, `inf` and `NaN`; tool output
/// containing those is treated as garbled.
pub(crate) fn is_plain_decimal(s: &str) -> bool {
    let mut digits = 0;
    let mut dots = 0;
    for c in s.chars() {
        match c {
            '0'..='9' => digits += 1,
            '.' => dots += 1,
            _ => return false,
        }
    }
    digits > 0 && dots <= 1
}

/// Parses `<number><unit>?` into bits per second.
///
/// Units are `K`, `M`, `G` (powers of 1000, case-insensitive); no unit
/// means bits per second.
pub fn parse_rate(text: &str) -> Result<f64, RateParseError> {
    let s = text.trim();
    let invalid = || RateParseError::InvalidRateFormat(text.to_string());

    let (num_str, multiplier) = match s.chars().last() {
        Some(c) if c.is_ascii_alphabetic() => {
            let multiplier = unit_multiplier(c).ok_or_else(invalid)?;
            (s[..s.len() - 1].trim_end(), multiplier)
        }
        Some(_) => (s, 1.0),
        None => return Err(invalid()),
    };

    if !is_plain_decimal(num_str) {
        return Err(invalid());
    }

    num_str
        .parse::<f64>()
        .map(|n| n * multiplier)
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(invalid)
}

/// Formats bits per second as megabits with two decimals, e.g. `"9500.00"`.
pub fn format_mbps(bps: f64) -> String {
    format!("{:.2}", bps / 1e6)
}
