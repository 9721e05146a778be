use std::time::Duration;

use clap::Parser;

use crate::discovery::{SelectionPolicy, DEFAULT_DISCOVERY_TIMEOUT};
use crate::error::SessionError;

/// Name tokens of the strap this tool was written for; `--name` overrides.
pub const DEFAULT_NAME_TOKENS: &[&str] = &["HR50", "IGPSPORT"];

#[derive(Debug, Parser)]
#[command(name = "hrlog", about = "Record a heart-rate session from a BLE chest strap")]
pub struct Args {
    /// Recording duration in seconds (e.g. 300 or 90s) or minutes (e.g. 5m).
    /// Prompted for interactively when omitted.
    #[arg(short, long)]
    pub duration: Option<String>,

    /// Connect to this exact device address instead of matching by name.
    #[arg(short, long)]
    pub address: Option<String>,

    /// Name substring to match during discovery, case-insensitive.
    /// May be given multiple times.
    #[arg(short, long = "name", value_name = "TOKEN")]
    pub names: Vec<String>,

    /// Discovery timeout in seconds.
    #[arg(long, default_value_t = DEFAULT_DISCOVERY_TIMEOUT.as_secs())]
    pub scan_timeout: u64,

    /// Run against a simulated strap instead of real hardware.
    #[arg(long)]
    pub fake: bool,
}

impl Args {
    pub fn policy(&self) -> SelectionPolicy {
        match &self.address {
            Some(address) => SelectionPolicy::ByAddress(address.clone()),
            None if self.names.is_empty() => SelectionPolicy::ByName(
                DEFAULT_NAME_TOKENS.iter().map(|t| t.to_string()).collect(),
            ),
            None => SelectionPolicy::ByName(self.names.clone()),
        }
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_secs(self.scan_timeout)
    }
}

/// Parses a duration given as seconds (`300`, `90s`, fractions allowed) or
/// minutes (`5m`, `0.5m`). Anything non-numeric or non-positive is rejected.
pub fn parse_duration(input: &str) -> Result<Duration, SessionError> {
    let trimmed = input.trim();
    let (value, factor) = if let Some(stripped) = trimmed.strip_suffix(['m', 'M']) {
        (stripped, 60.0)
    } else if let Some(stripped) = trimmed.strip_suffix(['s', 'S']) {
        (stripped, 1.0)
    } else {
        (trimmed, 1.0)
    };

    let seconds: f64 = value
        .trim()
        .parse()
        .map_err(|_| SessionError::InvalidDuration(input.to_string()))?;
    let seconds = seconds * factor;
    if !seconds.is_finite() || seconds <= 0.0 {
        return Err(SessionError::InvalidDuration(input.to_string()));
    }
    Ok(Duration::from_secs_f64(seconds))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_numbers_are_seconds() {
        assert_eq!(parse_duration("300").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration(" 90s ").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("1.5").unwrap(), Duration::from_millis(1500));
    }

    #[test]
    fn minutes_use_the_fixed_60x_factor() {
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("0.5M").unwrap(), Duration::from_secs(30));
    }

    #[test]
    fn non_numeric_input_is_invalid() {
        for input in ["", "abc", "5x", "--", "NaN"] {
            assert!(matches!(
                parse_duration(input),
                Err(SessionError::InvalidDuration(_))
            ));
        }
    }

    #[test]
    fn non_positive_durations_are_invalid() {
        for input in ["0", "-3", "0m"] {
            assert!(matches!(
                parse_duration(input),
                Err(SessionError::InvalidDuration(_))
            ));
        }
    }

    #[test]
    fn address_takes_precedence_over_name_tokens() {
        let args = Args::parse_from(["hrlog", "--address", "AA:BB", "--name", "HR50"]);
        assert!(matches!(args.policy(), SelectionPolicy::ByAddress(a) if a == "AA:BB"));
    }

    #[test]
    fn default_name_tokens_apply_when_nothing_is_given() {
        let args = Args::parse_from(["hrlog"]);
        let SelectionPolicy::ByName(tokens) = args.policy() else {
            panic!("expected name policy");
        };
        assert_eq!(tokens, vec!["HR50", "IGPSPORT"]);
    }
}
