//! Telemetry value objects carried inside envelopes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Aggregate scanner counters.
///
/// Fields decode leniently: fractional numbers are rounded, numeric strings
/// are parsed and `null` or anything else falls back to zero, so one odd
/// field never costs the whole snapshot.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsData {
    #[serde(deserialize_with = "lenient::int")]
    pub goods: i64,
    #[serde(deserialize_with = "lenient::int")]
    pub bads: i64,
    #[serde(deserialize_with = "lenient::int")]
    pub errors: i64,
    #[serde(deserialize_with = "lenient::int")]
    pub offline: i64,
    #[serde(deserialize_with = "lenient::int")]
    pub ipblock: i64,
    #[serde(deserialize_with = "lenient::int")]
    pub processed: i64,
    #[serde(deserialize_with = "lenient::int")]
    pub rps: i64,
    #[serde(deserialize_with = "lenient::int")]
    pub avg_rps: i64,
    #[serde(deserialize_with = "lenient::int")]
    pub peak_rps: i64,
    #[serde(deserialize_with = "lenient::int")]
    pub threads: i64,
    #[serde(deserialize_with = "lenient::int")]
    pub uptime: i64,
    #[serde(deserialize_with = "lenient::float")]
    pub success_rate: f64,
}

/// State of one worker server. Decodes leniently, like [`StatsData`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerInfo {
    #[serde(deserialize_with = "lenient::text")]
    pub ip: String,
    #[serde(deserialize_with = "lenient::text")]
    pub status: String,
    #[serde(deserialize_with = "lenient::text")]
    pub uptime: String,
    #[serde(deserialize_with = "lenient::int")]
    pub cpu: i64,
    #[serde(deserialize_with = "lenient::int")]
    pub memory: i64,
    #[serde(deserialize_with = "lenient::int")]
    pub disk: i64,
    /// Human readable rate, e.g. `"250/s"`.
    #[serde(deserialize_with = "lenient::text")]
    pub speed: String,
    #[serde(deserialize_with = "lenient::int")]
    pub processed: i64,
    #[serde(deserialize_with = "lenient::int")]
    pub goods: i64,
    #[serde(deserialize_with = "lenient::int")]
    pub bads: i64,
    #[serde(deserialize_with = "lenient::int")]
    pub errors: i64,
    #[serde(deserialize_with = "lenient::int")]
    pub progress: i64,
    #[serde(alias = "task", deserialize_with = "lenient::text")]
    pub current_task: String,
}

impl ServerInfo {
    /// Requests per second parsed from `speed`, 0.0 when unparsable.
    pub fn throughput(&self) -> f64 {
        let digits = self.speed.trim().trim_end_matches("/s").trim();
        digits.parse().unwrap_or(0.0)
    }
}

/// A structured log entry.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LogRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub level: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, alias = "source", skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
}

/// A log line: either plain text or a structured record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LogLine {
    Text(String),
    Record(LogRecord),
}

impl fmt::Display for LogLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLine::Text(text) => f.write_str(text),
            LogLine::Record(r) => {
                write!(f, "{} [{}]", r.timestamp, r.level)?;
                if let Some(component) = &r.component {
                    write!(f, " {component}:")?;
                }
                write!(f, " {}", r.message)
            }
        }
    }
}

mod lenient {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    fn number(value: &Value) -> Option<f64> {
        match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
            _ => None,
        }
    }

    pub fn int<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
        let value = Value::deserialize(d)?;
        if let Some(n) = value.as_i64() {
            return Ok(n);
        }
        Ok(number(&value).map(|f| f.round() as i64).unwrap_or(0))
    }

    pub fn float<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
        Ok(number(&Value::deserialize(d)?).unwrap_or(0.0))
    }

    pub fn text<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::String(s) => s,
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            _ => String::new(),
        })
    }
}
