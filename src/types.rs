// src/types.rs

use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

/// How the diagnostic log of a subprocess attempt is assembled.
///
/// - `Interleaved`: stdout and stderr chunks in the order they were written
///   (default).
/// - `Grouped`: all of stdout, then all of stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLayout {
    #[default]
    Interleaved,
    Grouped,
}

impl FromStr for LogLayout {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "interleaved" => Ok(LogLayout::Interleaved),
            "grouped" => Ok(LogLayout::Grouped),
            other => Err(format!(
                "invalid log_layout: {other} (expected \"interleaved\" or \"grouped\")"
            )),
        }
    }
}

/// Signal used when terminating a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Default)]
pub enum KillSignal {
    /// Polite request to exit (`SIGTERM`).
    #[default]
    #[serde(rename = "SIGTERM")]
    Term,
    /// Forceful termination (`SIGKILL`).
    #[serde(rename = "SIGKILL")]
    Kill,
}

impl KillSignal {
    pub fn as_str(self) -> &'static str {
        match self {
            KillSignal::Term => "SIGTERM",
            KillSignal::Kill => "SIGKILL",
        }
    }
}

impl std::fmt::Display for KillSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KillSignal {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "SIGTERM" | "TERM" | "15" => Ok(KillSignal::Term),
            "SIGKILL" | "KILL" | "9" => Ok(KillSignal::Kill),
            other => Err(format!(
                "unsupported signal '{other}'; expected SIGTERM or SIGKILL"
            )),
        }
    }
}

/// Duration units accepted in workflow files, with their length in
/// milliseconds.
const DURATION_UNITS: [(&str, u64); 4] = [("ms", 1), ("s", 1_000), ("m", 60_000), ("h", 3_600_000)];

/// Parse `<integer><unit>`, e.g. `250ms`, `3s`, `1m` or `2h`.
pub fn parse_duration(text: &str) -> Result<Duration, String> {
    let text = text.trim();
    let split = text
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| match text {
            "" => "empty duration string".to_string(),
            _ => format!("duration '{text}' is missing a unit suffix"),
        })?;

    let (digits, unit) = text.split_at(split);
    let amount: u64 = digits
        .parse()
        .map_err(|_| format!("duration '{text}' must start with a whole number"))?;

    let unit = unit.trim().to_ascii_lowercase();
    let per_unit = DURATION_UNITS
        .iter()
        .find_map(|(name, millis)| (*name == unit).then_some(*millis))
        .ok_or_else(|| format!("unknown duration unit '{unit}' in '{text}' (use ms, s, m or h)"))?;

    amount
        .checked_mul(per_unit)
        .map(Duration::from_millis)
        .ok_or_else(|| format!("duration '{text}' is too large"))
}
