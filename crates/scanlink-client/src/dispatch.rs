//! Inbound frame dispatch.
//!
//! Each text frame produces at most one state transition or one notification.
//! Malformed frames and unknown types are logged and dropped; nothing here
//! panics or returns an error to the caller.

use crate::store::{DashboardState, Level};
use scanlink_core::{ScannerAck, ServerMessage};
use serde_json::Value;

/// What a frame did to the state. Mostly useful for tests and tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatched {
    Stats,
    Servers { sampled: usize },
    Logs,
    Config,
    Notified,
    /// Informational frame, no state change.
    Ignored,
    /// Invalid JSON, bad payload, or unrecognized type.
    Dropped,
}

/// Apply one raw frame received at `now_ms` to `state`.
pub fn dispatch(state: &mut DashboardState, text: &str, now_ms: i64) -> Dispatched {
    let msg = match ServerMessage::decode(text) {
        Ok(msg) => msg,
        Err(e) => {
            tracing::warn!("Dropping frame: {}", e);
            return Dispatched::Dropped;
        }
    };
    apply(state, msg, now_ms)
}

/// Apply an already decoded message.
pub fn apply(state: &mut DashboardState, msg: ServerMessage, now_ms: i64) -> Dispatched {
    match msg {
        ServerMessage::InitialStats(stats) | ServerMessage::StatsUpdate(stats) => {
            state.stats = Some(stats);
            Dispatched::Stats
        }
        ServerMessage::ServerInfo(servers) => {
            let sampled = state.history.record(&servers, now_ms);
            state.servers = servers;
            Dispatched::Servers { sampled }
        }
        ServerMessage::LogsData(lines) => {
            state.replace_logs(lines);
            Dispatched::Logs
        }
        ServerMessage::Log(line) => {
            state.push_log(line);
            Dispatched::Logs
        }
        ServerMessage::ScannerStarted(ack) => {
            notify_ack(state, &ack, "started");
            Dispatched::Notified
        }
        ServerMessage::ScannerStopped(ack) => {
            notify_ack(state, &ack, "stopped");
            Dispatched::Notified
        }
        ServerMessage::ScannerCommand(cmd) => {
            tracing::debug!(
                "Scanner command from another client: {} {} ({})",
                cmd.action,
                cmd.vpn_type,
                cmd.status
            );
            Dispatched::Ignored
        }
        ServerMessage::ConfigUpdate(config) => {
            tracing::debug!("Configuration updated by server");
            state.config = Some(config);
            Dispatched::Config
        }
        ServerMessage::Error { message } => {
            state.notify(Level::Error, message);
            Dispatched::Notified
        }
        ServerMessage::AuthRequired(_) => {
            state.notify(Level::Warning, "Authentication required");
            Dispatched::Notified
        }
        ServerMessage::AuthSuccess(_) => {
            state.notify(Level::Success, "Authenticated");
            Dispatched::Notified
        }
        ServerMessage::AuthFailure(data) => {
            let text = match reason(&data) {
                Some(reason) => format!("Authentication failed: {reason}"),
                None => "Authentication failed".to_string(),
            };
            state.notify(Level::Error, text);
            Dispatched::Notified
        }
        ServerMessage::Unrecognized { kind, .. } => {
            tracing::warn!("Unknown message type: {}", kind);
            Dispatched::Dropped
        }
    }
}

fn notify_ack(state: &mut DashboardState, ack: &ScannerAck, verb: &str) {
    let name = if ack.scanner.is_empty() {
        "unknown"
    } else {
        ack.scanner.as_str()
    };
    if ack.status.is_empty() || ack.status == "success" {
        state.notify(Level::Success, format!("Scanner {name} {verb}"));
    } else {
        state.notify(
            Level::Warning,
            format!("Scanner {name} not {verb}: {}", ack.status),
        );
    }
}

fn reason(data: &Value) -> Option<&str> {
    data.get("message")
        .or_else(|| data.get("reason"))
        .and_then(Value::as_str)
        .or_else(|| data.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Notification;
    use scanlink_core::LogLine;

    fn frame(kind: &str, data: Value) -> String {
        serde_json::json!({ "type": kind, "data": data, "timestamp": 1 }).to_string()
    }

    fn snapshot(state: &DashboardState) -> String {
        format!(
            "{:?}|{:?}|{:?}|{:?}|{:?}|{:?}",
            state.connection,
            state.stats,
            state.servers,
            state.logs,
            state.config,
            state.notifications().collect::<Vec<_>>()
        )
    }

    #[test]
    fn unknown_type_leaves_state_untouched() {
        let mut state = DashboardState::default();
        dispatch(
            &mut state,
            &frame("initial_stats", serde_json::json!({"goods": 1})),
            0,
        );
        let before = snapshot(&state);
        for kind in ["telemetry", "", "STATS_UPDATE", "worker_added"] {
            let out = dispatch(&mut state, &frame(kind, serde_json::json!({"x": 1})), 0);
            assert_eq!(out, Dispatched::Dropped);
        }
        assert_eq!(snapshot(&state), before);
    }

    #[test]
    fn malformed_frames_are_dropped() {
        let mut state = DashboardState::default();
        let before = snapshot(&state);
        for raw in [
            "",
            "not json",
            "{\"type\":",
            "[1,2,3]",
            "null",
            r#"{"type":"stats_update","data":"oops"}"#,
        ] {
            assert_eq!(dispatch(&mut state, raw, 0), Dispatched::Dropped);
        }
        assert_eq!(snapshot(&state), before);
    }

    #[test]
    fn stats_are_replaced_not_merged() {
        let mut state = DashboardState::default();
        dispatch(
            &mut state,
            &frame("initial_stats", serde_json::json!({"goods": 45, "bads": 1205})),
            0,
        );
        dispatch(
            &mut state,
            &frame("stats_update", serde_json::json!({"goods": 46})),
            0,
        );
        let stats = state.stats.as_ref().unwrap();
        assert_eq!(stats.goods, 46);
        assert_eq!(stats.bads, 0);
    }

    #[test]
    fn server_info_replaces_and_samples() {
        let mut state = DashboardState::default();
        let servers = serde_json::json!([
            {"ip": "194.0.234.203", "cpu": 45, "memory": 32, "speed": "250/s"},
            {"ip": "77.90.185.26", "cpu": 38, "memory": 28, "speed": "220/s"}
        ]);
        let out = dispatch(&mut state, &frame("server_info", servers), 1_000);
        assert_eq!(out, Dispatched::Servers { sampled: 2 });
        assert_eq!(state.servers.len(), 2);

        let one = serde_json::json!([{"ip": "194.0.234.203", "cpu": 50}]);
        let out = dispatch(&mut state, &frame("server_info", one), 3_000);
        assert_eq!(out, Dispatched::Servers { sampled: 0 });
        assert_eq!(state.servers.len(), 1);
        assert_eq!(state.servers[0].cpu, 50);
    }

    #[test]
    fn logs_data_replaces_and_log_appends() {
        let mut state = DashboardState::default();
        dispatch(
            &mut state,
            &frame("logs_data", serde_json::json!(["a", "b"])),
            0,
        );
        dispatch(&mut state, &frame("logs_data", serde_json::json!(["c"])), 0);
        assert_eq!(state.logs.len(), 1);
        dispatch(
            &mut state,
            r#"{"type":"log","data":{"level":"info","message":"Event","component":"scanner"}}"#,
            0,
        );
        assert_eq!(state.logs.len(), 2);
        assert!(matches!(state.logs.back(), Some(LogLine::Record(_))));
    }

    #[test]
    fn acks_and_errors_notify() {
        let mut state = DashboardState::default();
        dispatch(
            &mut state,
            &frame(
                "scanner_started",
                serde_json::json!({"status": "success", "scanner": "fortinet"}),
            ),
            0,
        );
        dispatch(
            &mut state,
            &frame("error", serde_json::json!({"message": "database unavailable"})),
            0,
        );
        let notes = state.take_notifications();
        assert_eq!(
            notes,
            vec![
                Notification {
                    level: Level::Success,
                    message: "Scanner fortinet started".into()
                },
                Notification {
                    level: Level::Error,
                    message: "database unavailable".into()
                },
            ]
        );
        assert_eq!(state.connection, Default::default());
    }

    #[test]
    fn command_echo_is_informational() {
        let mut state = DashboardState::default();
        let out = dispatch(
            &mut state,
            &frame(
                "scanner_command",
                serde_json::json!({"action": "start", "vpn_type": "cisco", "status": "starting"}),
            ),
            0,
        );
        assert_eq!(out, Dispatched::Ignored);
        assert_eq!(state.notifications().count(), 0);
    }

    #[test]
    fn auth_frames_notify() {
        let mut state = DashboardState::default();
        dispatch(&mut state, &frame("auth_required", Value::Null), 0);
        dispatch(&mut state, &frame("auth_success", Value::Null), 0);
        dispatch(
            &mut state,
            &frame("auth_failure", serde_json::json!({"reason": "expired"})),
            0,
        );
        let notes = state.take_notifications();
        assert_eq!(notes.len(), 3);
        assert_eq!(notes[2].level, Level::Error);
        assert_eq!(notes[2].message, "Authentication failed: expired");
    }

    #[test]
    fn fractional_and_null_fields_keep_the_snapshot() {
        let mut state = DashboardState::default();
        let servers = serde_json::json!([
            {"ip": "10.0.0.1", "cpu": 45.5, "memory": 32, "disk": null, "speed": "250/s"}
        ]);
        let out = dispatch(&mut state, &frame("server_info", servers), 0);
        assert_eq!(out, Dispatched::Servers { sampled: 1 });
        assert_eq!(state.servers.len(), 1);
        assert_eq!(state.servers[0].cpu, 46);
        assert_eq!(state.servers[0].disk, 0);

        let out = dispatch(
            &mut state,
            &frame("stats_update", serde_json::json!({"goods": 3, "success_rate": null})),
            0,
        );
        assert_eq!(out, Dispatched::Stats);
        assert_eq!(state.stats.as_ref().unwrap().success_rate, 0.0);

        let out = dispatch(
            &mut state,
            &frame("stats_update", serde_json::json!({"goods": 4, "rps": 212.7})),
            0,
        );
        assert_eq!(out, Dispatched::Stats);
        let stats = state.stats.as_ref().unwrap();
        assert_eq!(stats.goods, 4);
        assert_eq!(stats.rps, 213);
    }
}
