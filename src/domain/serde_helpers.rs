//! Wire conversions the ingestion schema needs beyond plain serde derives.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serializer};
use std::time::Duration;

const SECONDS_PER_DAY: u64 = 86_400;
const MAX_DAYS: u64 = 1000;
const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

/// Renders a duration as `[D.]HH:MM:SS.ffffff`; days only appear when non-zero.
pub fn format_duration(duration: Duration) -> Option<String> {
    let total_secs = duration.as_secs();
    let days = total_secs / SECONDS_PER_DAY;
    if days >= MAX_DAYS {
        return None;
    }

    let hours = (total_secs % SECONDS_PER_DAY) / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    let micros = duration.subsec_micros();

    let clock = format!("{hours:02}:{minutes:02}:{seconds:02}.{micros:06}");
    if days > 0 {
        Some(format!("{days}.{clock}"))
    } else {
        Some(clock)
    }
}

pub fn parse_duration(value: &str) -> Option<Duration> {
    let mut parts = value.split(':');
    let (head, minutes, seconds) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }

    let (days, hours) = match head.split_once('.') {
        Some((days, hours)) => (days.parse::<u64>().ok()?, hours.parse::<u64>().ok()?),
        None => (0, head.parse::<u64>().ok()?),
    };
    let minutes = minutes.parse::<u64>().ok()?;

    let (whole, fraction) = seconds.split_once('.').unwrap_or((seconds, "0"));
    let whole = whole.parse::<u64>().ok()?;
    if hours >= 24 || minutes >= 60 || whole >= 60 || fraction.len() > 9 {
        return None;
    }
    let nanos = format!("{fraction:0<9}").parse::<u32>().ok()?;

    let secs = days * SECONDS_PER_DAY + hours * 3600 + minutes * 60 + whole;
    Some(Duration::new(secs, nanos))
}

pub mod duration {
    use super::*;
    use serde::de::Error as _;
    use serde::ser::Error as _;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let text = format_duration(*duration).ok_or_else(|| {
            S::Error::custom(format!("duration {duration:?} exceeds the 999 day wire limit"))
        })?;
        serializer.serialize_str(&text)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        parse_duration(&text).ok_or_else(|| D::Error::custom(format!("invalid duration '{text}'")))
    }
}

pub mod timestamp {
    use super::*;
    use serde::de::Error as _;

    pub fn serialize<S>(time: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&time.format(TIME_FORMAT).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        if let Ok(parsed) = DateTime::parse_from_rfc3339(&text) {
            return Ok(parsed.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(&text, TIME_FORMAT)
            .map(|naive| naive.and_utc())
            .map_err(|e| D::Error::custom(format!("invalid timestamp '{text}': {e}")))
    }
}

pub mod finite {
    use super::*;
    use serde::ser::Error as _;

    pub fn serialize<S>(value: &f64, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        check::<S>(*value)?;
        serializer.serialize_f64(*value)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<f64, D::Error>
    where
        D: Deserializer<'de>,
    {
        f64::deserialize(deserializer)
    }

    pub(crate) fn check<S: Serializer>(value: f64) -> Result<(), S::Error> {
        if value.is_finite() {
            Ok(())
        } else {
            Err(S::Error::custom(format!("non-finite number {value} cannot be encoded")))
        }
    }
}

pub mod finite_opt {
    use super::*;

    pub fn serialize<S>(value: &Option<f64>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(v) => super::finite::serialize(v, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<f64>::deserialize(deserializer)
    }
}

pub(crate) fn default_schema_version() -> u32 {
    2
}
