//! Fabricated telemetry.

use rand::Rng;
use scanlink_core::{LogLine, LogRecord, ServerInfo, ServerMessage, StatsData};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

pub const MAX_LOGS: usize = 1000;

/// A credential hit reported by a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResult {
    pub id: u64,
    pub ip: String,
    pub username: String,
    pub password: String,
    pub vpn_type: String,
    pub timestamp: String,
}

pub struct Telemetry {
    pub stats: StatsData,
    pub servers: Vec<ServerInfo>,
    pub logs: Vec<LogRecord>,
    pub results: Vec<ScanResult>,
    next_log_id: u64,
}

/// Seconds since epoch formatted as `<secs>Z`; the dashboard treats it as text.
pub fn timestamp() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!("{secs}Z")
}

fn server(ip: &str, cpu: i64, memory: i64, disk: i64, speed: &str, task: &str) -> ServerInfo {
    ServerInfo {
        ip: ip.to_string(),
        status: "online".to_string(),
        uptime: "1h 00m".to_string(),
        cpu,
        memory,
        disk,
        speed: speed.to_string(),
        processed: 400,
        goods: 12,
        bads: 380,
        errors: 15,
        progress: 50,
        current_task: task.to_string(),
    }
}

impl Telemetry {
    pub fn new() -> Self {
        let mut telemetry = Self {
            stats: StatsData {
                goods: 45,
                bads: 1205,
                errors: 32,
                offline: 18,
                ipblock: 5,
                processed: 1305,
                rps: 250,
                avg_rps: 220,
                peak_rps: 300,
                threads: 150,
                uptime: 3600,
                success_rate: 3.45,
            },
            servers: vec![
                server("194.0.234.203", 45, 32, 58, "250/s", "Scanning Fortinet VPNs"),
                server("77.90.185.26", 38, 28, 42, "220/s", "Scanning GlobalProtect VPNs"),
                server("185.93.89.206", 52, 45, 63, "280/s", "Scanning SonicWall VPNs"),
                server("185.93.89.35", 48, 36, 51, "240/s", "Scanning Cisco VPNs"),
            ],
            logs: Vec::new(),
            results: Vec::new(),
            next_log_id: 1,
        };
        telemetry.log("info", "Mock server started", "api");
        telemetry.log("warning", "High memory usage detected", "system");
        telemetry
    }

    pub fn log(&mut self, level: &str, message: &str, component: &str) -> LogRecord {
        let record = LogRecord {
            id: Some(self.next_log_id),
            timestamp: timestamp(),
            level: level.to_string(),
            message: message.to_string(),
            component: Some(component.to_string()),
        };
        self.next_log_id += 1;
        self.logs.push(record.clone());
        if self.logs.len() > MAX_LOGS {
            let excess = self.logs.len() - MAX_LOGS;
            self.logs.drain(..excess);
        }
        record
    }

    /// The newest `limit` log lines, oldest first.
    pub fn recent_logs(&self, limit: usize) -> Vec<LogLine> {
        let skip = self.logs.len().saturating_sub(limit);
        self.logs[skip..]
            .iter()
            .cloned()
            .map(LogLine::Record)
            .collect()
    }

    pub fn add_result(&mut self, mut result: ScanResult) -> ScanResult {
        result.id = self.results.len() as u64 + 1;
        result.timestamp = timestamp();
        self.results.push(result.clone());
        self.stats.goods += 1;
        self.stats.processed += 1;
        result
    }

    /// Advance the simulation one step and return the frames to broadcast.
    pub fn tick(&mut self, rng: &mut impl Rng) -> Vec<ServerMessage> {
        let s = &mut self.stats;
        s.processed += rng.gen_range(0..5);
        s.goods += rng.gen_range(0..2);
        s.bads += rng.gen_range(0..3);
        s.rps = 200 + rng.gen_range(0..100);
        s.peak_rps = s.peak_rps.max(s.rps);
        s.uptime += 1;
        s.success_rate = if s.processed > 0 {
            s.goods as f64 / s.processed as f64 * 100.0
        } else {
            0.0
        };

        for server in &mut self.servers {
            server.cpu = (server.cpu + drift(rng, 5)).clamp(0, 95);
            server.memory = (server.memory + drift(rng, 3)).clamp(0, 95);
            server.processed += rng.gen_range(0..10);
            server.goods += rng.gen_range(0..2);
            server.progress = (server.progress + rng.gen_range(0..2)).min(100);
        }

        let mut frames = vec![
            ServerMessage::StatsUpdate(self.stats.clone()),
            ServerMessage::ServerInfo(self.servers.clone()),
        ];
        if rng.gen_bool(0.3) {
            let level = ["info", "warning", "success"][rng.gen_range(0..3)];
            let message = format!("Event {}", scanlink_core::now_millis());
            let record = self.log(level, &message, "scanner");
            frames.push(ServerMessage::Log(LogLine::Record(record)));
        }
        frames
    }
}

fn drift(rng: &mut impl Rng, max: i64) -> i64 {
    let step = rng.gen_range(0..max);
    if rng.gen_bool(0.5) {
        step
    } else {
        -step
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn tick_keeps_values_in_range() {
        let mut telemetry = Telemetry::new();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..500 {
            let frames = telemetry.tick(&mut rng);
            assert!(matches!(frames[0], ServerMessage::StatsUpdate(_)));
            assert!(matches!(frames[1], ServerMessage::ServerInfo(ref s) if s.len() == 4));
        }
        for server in &telemetry.servers {
            assert!((0..=95).contains(&server.cpu));
            assert!((0..=95).contains(&server.memory));
            assert!(server.progress <= 100);
        }
        let s = &telemetry.stats;
        assert!((200..300).contains(&s.rps));
        let expected = s.goods as f64 / s.processed as f64 * 100.0;
        assert!((s.success_rate - expected).abs() < 1e-9);
    }

    #[test]
    fn logs_are_capped() {
        let mut telemetry = Telemetry::new();
        for i in 0..(MAX_LOGS + 20) {
            telemetry.log("info", &format!("line {i}"), "test");
        }
        assert_eq!(telemetry.logs.len(), MAX_LOGS);
        let recent = telemetry.recent_logs(2);
        assert_eq!(recent.len(), 2);
        assert!(matches!(&recent[1], LogLine::Record(r) if r.message == format!("line {}", MAX_LOGS + 19)));
    }

    #[test]
    fn results_bump_goods() {
        let mut telemetry = Telemetry::new();
        let goods = telemetry.stats.goods;
        let stored = telemetry.add_result(ScanResult {
            id: 0,
            ip: "200.113.15.26:4443".into(),
            username: "guest".into(),
            password: "guest".into(),
            vpn_type: "fortinet".into(),
            timestamp: String::new(),
        });
        assert_eq!(stored.id, 1);
        assert_eq!(telemetry.stats.goods, goods + 1);
    }
}
