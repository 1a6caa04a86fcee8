use chrono::{Datelike, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

const DAY_NAMES: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

/// How a group takes part in scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupKind {
    /// Follows a day/time-of-day window and feeds the base queue.
    Main,
    /// Spliced into the running queue every `interval_minutes`.
    Interval,
}

impl fmt::Display for GroupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupKind::Main => write!(f, "main"),
            GroupKind::Interval => write!(f, "interval"),
        }
    }
}

/// Eligibility window of a group.
///
/// A schedule missing its start, its end, or any weekday is treated as
/// always active. Malformed fields in a stored state file load as missing,
/// so a broken schedule fails open instead of silencing the group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    /// Window start (time of day).
    #[serde(default, deserialize_with = "lenient_time")]
    pub start: Option<NaiveTime>,
    /// Window end (time of day). `end < start` means the window spans midnight.
    #[serde(default, deserialize_with = "lenient_time")]
    pub end: Option<NaiveTime>,
    /// Weekdays the window applies to (0=Mon..6=Sun).
    #[serde(default, deserialize_with = "lenient_days")]
    pub days: Vec<u8>,
    /// Minutes between two runs of an interval group.
    #[serde(default, deserialize_with = "lenient_interval")]
    pub interval_minutes: Option<u32>,
    /// Whether the group runs by interval instead of feeding the main queue.
    #[serde(default)]
    pub interval_group: bool,
}

impl Schedule {
    /// A day/time window for a main group.
    pub fn window(start: NaiveTime, end: NaiveTime, days: Vec<u8>) -> Self {
        Schedule {
            start: Some(start),
            end: Some(end),
            days,
            interval_minutes: None,
            interval_group: false,
        }
    }

    /// An interval group gated by a day/time window.
    pub fn interval(minutes: u32, start: NaiveTime, end: NaiveTime, days: Vec<u8>) -> Self {
        Schedule {
            start: Some(start),
            end: Some(end),
            days,
            interval_minutes: (minutes > 0).then_some(minutes),
            interval_group: true,
        }
    }

    pub fn kind(&self) -> GroupKind {
        if self.interval_group {
            GroupKind::Interval
        } else {
            GroupKind::Main
        }
    }

    /// The run interval in minutes, only for interval groups that have one.
    pub fn run_interval(&self) -> Option<u32> {
        if self.interval_group {
            self.interval_minutes.filter(|m| *m > 0)
        } else {
            None
        }
    }

    /// Whether the schedule admits the given instant.
    pub fn is_active_at(&self, now: NaiveDateTime) -> bool {
        let (start, end) = match (self.start, self.end) {
            (Some(s), Some(e)) if !self.days.is_empty() => (s, e),
            _ => return true,
        };

        let weekday = now.weekday().num_days_from_monday() as u8;
        if !self.days.contains(&weekday) {
            return false;
        }

        // Sub-second precision is not part of the contract.
        let time = now.time().with_nanosecond(0).unwrap_or(now.time());
        if start <= end {
            start <= time && time <= end
        } else {
            time >= start || time <= end
        }
    }

    /// Format the window as "HH:MM-HH:MM".
    pub fn window_display(&self) -> String {
        match (self.start, self.end) {
            (Some(s), Some(e)) => format!("{}-{}", s.format("%H:%M"), e.format("%H:%M")),
            _ => "any time".to_string(),
        }
    }

    /// Format the days field for display.
    pub fn days_display(&self) -> String {
        if self.days.is_empty() {
            return "every day".to_string();
        }
        self.days
            .iter()
            .filter_map(|&d| DAY_NAMES.get(d as usize))
            .copied()
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Parse a time string in HH:MM or HH:MM:SS format.
pub fn parse_time(s: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .map_err(|_| format!("Invalid time '{}'. Expected HH:MM or HH:MM:SS", s))
}

/// Parse a weekday list: names ("mon,fri"), indices ("0,4"),
/// or one of "weekdays", "weekend", "daily".
pub fn parse_days(s: &str) -> Result<Vec<u8>, String> {
    let s = s.trim().to_lowercase();
    match s.as_str() {
        "daily" | "all" => return Ok((0..7).collect()),
        "weekdays" => return Ok((0..5).collect()),
        "weekend" => return Ok(vec![5, 6]),
        _ => {}
    }

    let mut days = Vec::new();
    for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let day = match part.parse::<u8>() {
            Ok(d) if d < 7 => d,
            Ok(d) => return Err(format!("Day index {} out of range (0-6)", d)),
            Err(_) => DAY_NAMES
                .iter()
                .position(|n| part.starts_with(&n.to_lowercase()))
                .map(|i| i as u8)
                .ok_or_else(|| format!("Unknown day '{}'", part))?,
        };
        if !days.contains(&day) {
            days.push(day);
        }
    }
    days.sort_unstable();
    Ok(days)
}

fn lenient_time<'de, D: Deserializer<'de>>(d: D) -> Result<Option<NaiveTime>, D::Error> {
    let raw = Option::<String>::deserialize(d)?;
    Ok(raw.and_then(|s| match parse_time(&s) {
        Ok(t) => Some(t),
        Err(e) => {
            tracing::warn!("{}; treating the schedule window as open", e);
            None
        }
    }))
}

fn lenient_days<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
    let raw = Option::<Vec<i64>>::deserialize(d)?.unwrap_or_default();
    let mut days: Vec<u8> = Vec::with_capacity(raw.len());
    for day in raw {
        match u8::try_from(day) {
            Ok(v) if v < 7 => {
                if !days.contains(&v) {
                    days.push(v);
                }
            }
            _ => tracing::warn!("Ignoring out-of-range weekday {} in schedule", day),
        }
    }
    Ok(days)
}

fn lenient_interval<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u32>, D::Error> {
    let raw = Option::<i64>::deserialize(d)?;
    Ok(raw.and_then(|m| u32::try_from(m).ok()).filter(|m| *m > 0))
}
