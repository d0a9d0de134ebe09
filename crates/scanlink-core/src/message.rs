//! Protocol messages.
//!
//! Every frame is an [`Envelope`] of the form `{type, data, timestamp}`. The
//! `type` tag is decoded into a closed enum per direction so handlers match
//! exhaustively. Server tags this crate does not know decode into
//! [`ServerMessage::Unrecognized`] rather than failing.

use crate::{LogLine, ServerInfo, StatsData};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// The JSON frame exchanged in both directions.
///
/// `timestamp` is informational only; frames are processed in arrival order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub timestamp: i64,
}

impl Envelope {
    /// Create an envelope stamped with the current time.
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
            timestamp: now_millis(),
        }
    }

    pub fn parse(text: &str) -> Result<Self, DecodeError> {
        serde_json::from_str(text).map_err(DecodeError::Json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Error decoding a frame.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid frame: {0}")]
    Json(#[source] serde_json::Error),
    #[error("bad payload for '{kind}': {source}")]
    Payload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("unknown message type: {0}")]
    UnknownType(String),
}

fn payload<T: serde::de::DeserializeOwned>(kind: &str, data: Value) -> Result<T, DecodeError> {
    serde_json::from_value(data).map_err(|source| DecodeError::Payload {
        kind: kind.to_string(),
        source,
    })
}

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    StartScanner { vpn_type: String },
    StopScanner { vpn_type: String },
    GetLogs { limit: u32 },
}

/// Scanner commands accept either `{vpn_type}` or a bare string.
#[derive(Deserialize)]
#[serde(untagged)]
enum ScannerTarget {
    Bare(String),
    Object { vpn_type: String },
}

impl From<ScannerTarget> for String {
    fn from(target: ScannerTarget) -> Self {
        match target {
            ScannerTarget::Bare(v) | ScannerTarget::Object { vpn_type: v } => v,
        }
    }
}

#[derive(Deserialize)]
struct LogsRequest {
    #[serde(default)]
    limit: Option<u32>,
}

/// Log limit used when a `get_logs` request does not carry one.
pub const DEFAULT_LOG_LIMIT: u32 = 100;

impl ClientMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::StartScanner { .. } => "start_scanner",
            ClientMessage::StopScanner { .. } => "stop_scanner",
            ClientMessage::GetLogs { .. } => "get_logs",
        }
    }

    pub fn to_envelope(&self) -> Envelope {
        let data = match self {
            ClientMessage::StartScanner { vpn_type } | ClientMessage::StopScanner { vpn_type } => {
                json!({ "vpn_type": vpn_type })
            }
            ClientMessage::GetLogs { limit } => json!({ "limit": limit }),
        };
        Envelope::new(self.kind(), data)
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        self.to_envelope().to_json()
    }

    pub fn from_envelope(env: Envelope) -> Result<Self, DecodeError> {
        let Envelope { kind, data, .. } = env;
        match kind.as_str() {
            "start_scanner" => Ok(ClientMessage::StartScanner {
                vpn_type: payload::<ScannerTarget>(&kind, data)?.into(),
            }),
            "stop_scanner" => Ok(ClientMessage::StopScanner {
                vpn_type: payload::<ScannerTarget>(&kind, data)?.into(),
            }),
            "get_logs" => {
                // `{}` and a missing data field both mean "use the default"
                let limit = if data.is_null() {
                    None
                } else {
                    payload::<LogsRequest>(&kind, data)?.limit
                };
                Ok(ClientMessage::GetLogs {
                    limit: limit.filter(|l| *l > 0).unwrap_or(DEFAULT_LOG_LIMIT),
                })
            }
            _ => Err(DecodeError::UnknownType(kind)),
        }
    }

    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        Self::from_envelope(Envelope::parse(text)?)
    }
}

/// Acknowledgement of a scanner start/stop.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScannerAck {
    #[serde(default)]
    pub status: String,
    #[serde(default, alias = "vpn_type")]
    pub scanner: String,
}

/// Broadcast of a start/stop issued by another client.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScannerCommand {
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub vpn_type: String,
    #[serde(default)]
    pub status: String,
}

#[derive(Serialize, Deserialize)]
struct ErrorPayload {
    #[serde(default)]
    message: String,
}

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    InitialStats(StatsData),
    StatsUpdate(StatsData),
    ServerInfo(Vec<ServerInfo>),
    LogsData(Vec<LogLine>),
    /// A single appended log line.
    Log(LogLine),
    ScannerStarted(ScannerAck),
    ScannerStopped(ScannerAck),
    ScannerCommand(ScannerCommand),
    ConfigUpdate(Value),
    Error { message: String },
    AuthRequired(Value),
    AuthSuccess(Value),
    AuthFailure(Value),
    /// Any tag not listed above.
    Unrecognized { kind: String, data: Value },
}

impl ServerMessage {
    pub fn kind(&self) -> &str {
        match self {
            ServerMessage::InitialStats(_) => "initial_stats",
            ServerMessage::StatsUpdate(_) => "stats_update",
            ServerMessage::ServerInfo(_) => "server_info",
            ServerMessage::LogsData(_) => "logs_data",
            ServerMessage::Log(_) => "log",
            ServerMessage::ScannerStarted(_) => "scanner_started",
            ServerMessage::ScannerStopped(_) => "scanner_stopped",
            ServerMessage::ScannerCommand(_) => "scanner_command",
            ServerMessage::ConfigUpdate(_) => "config_update",
            ServerMessage::Error { .. } => "error",
            ServerMessage::AuthRequired(_) => "auth_required",
            ServerMessage::AuthSuccess(_) => "auth_success",
            ServerMessage::AuthFailure(_) => "auth_failure",
            ServerMessage::Unrecognized { kind, .. } => kind,
        }
    }

    pub fn to_envelope(&self) -> Result<Envelope, serde_json::Error> {
        let data = match self {
            ServerMessage::InitialStats(s) | ServerMessage::StatsUpdate(s) => {
                serde_json::to_value(s)?
            }
            ServerMessage::ServerInfo(servers) => serde_json::to_value(servers)?,
            ServerMessage::LogsData(lines) => serde_json::to_value(lines)?,
            ServerMessage::Log(line) => serde_json::to_value(line)?,
            ServerMessage::ScannerStarted(ack) | ServerMessage::ScannerStopped(ack) => {
                serde_json::to_value(ack)?
            }
            ServerMessage::ScannerCommand(cmd) => serde_json::to_value(cmd)?,
            ServerMessage::Error { message } => serde_json::to_value(ErrorPayload {
                message: message.clone(),
            })?,
            ServerMessage::ConfigUpdate(v)
            | ServerMessage::AuthRequired(v)
            | ServerMessage::AuthSuccess(v)
            | ServerMessage::AuthFailure(v)
            | ServerMessage::Unrecognized { data: v, .. } => v.clone(),
        };
        Ok(Envelope::new(self.kind(), data))
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        self.to_envelope()?.to_json()
    }

    pub fn from_envelope(env: Envelope) -> Result<Self, DecodeError> {
        let Envelope { kind, data, .. } = env;
        let msg = match kind.as_str() {
            "initial_stats" => ServerMessage::InitialStats(payload(&kind, data)?),
            "stats_update" => ServerMessage::StatsUpdate(payload(&kind, data)?),
            "server_info" => {
                // The server sends null when it has no servers to report
                let servers: Option<Vec<ServerInfo>> = payload(&kind, data)?;
                ServerMessage::ServerInfo(servers.unwrap_or_default())
            }
            "logs_data" => {
                let lines: Option<Vec<LogLine>> = payload(&kind, data)?;
                ServerMessage::LogsData(lines.unwrap_or_default())
            }
            "log" => ServerMessage::Log(payload(&kind, data)?),
            "scanner_started" => ServerMessage::ScannerStarted(payload(&kind, data)?),
            "scanner_stopped" => ServerMessage::ScannerStopped(payload(&kind, data)?),
            "scanner_command" => ServerMessage::ScannerCommand(payload(&kind, data)?),
            "config_update" => ServerMessage::ConfigUpdate(data),
            "error" => {
                let ErrorPayload { message } = payload(&kind, data)?;
                ServerMessage::Error { message }
            }
            "auth_required" => ServerMessage::AuthRequired(data),
            "auth_success" => ServerMessage::AuthSuccess(data),
            "auth_failure" => ServerMessage::AuthFailure(data),
            _ => ServerMessage::Unrecognized { kind, data },
        };
        Ok(msg)
    }

    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        Self::from_envelope(Envelope::parse(text)?)
    }
}
