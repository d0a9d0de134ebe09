//! Application state shared between the channel and the UI.

use crate::history::ServerHistory;
use scanlink_core::{LogLine, Phase, ServerInfo, StatsData};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};
use tokio::sync::watch;

pub const MAX_LOG_LINES: usize = 1000;
pub const MAX_NOTIFICATIONS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Success,
    Warning,
    Error,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Level::Info => "info",
            Level::Success => "ok",
            Level::Warning => "warn",
            Level::Error => "error",
        })
    }
}

/// A transient, user-visible message (a toast).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub level: Level,
    pub message: String,
}

/// What the connection indicator shows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub phase: Phase,
    pub connected: bool,
    pub reconnect_attempts: u32,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DashboardState {
    pub connection: ConnectionStatus,
    pub stats: Option<StatsData>,
    pub servers: Vec<ServerInfo>,
    pub history: ServerHistory,
    pub logs: VecDeque<LogLine>,
    /// Last configuration broadcast by the server.
    pub config: Option<serde_json::Value>,
    notifications: VecDeque<Notification>,
}

impl DashboardState {
    pub fn new(history: ServerHistory) -> Self {
        Self {
            history,
            ..Default::default()
        }
    }

    pub fn notify(&mut self, level: Level, message: impl Into<String>) {
        self.notifications.push_back(Notification {
            level,
            message: message.into(),
        });
        while self.notifications.len() > MAX_NOTIFICATIONS {
            self.notifications.pop_front();
        }
    }

    pub fn notifications(&self) -> impl Iterator<Item = &Notification> {
        self.notifications.iter()
    }

    /// Drain pending notifications, oldest first.
    pub fn take_notifications(&mut self) -> Vec<Notification> {
        self.notifications.drain(..).collect()
    }

    pub fn replace_logs(&mut self, lines: Vec<LogLine>) {
        let skip = lines.len().saturating_sub(MAX_LOG_LINES);
        self.logs = lines.into_iter().skip(skip).collect();
    }

    pub fn push_log(&mut self, line: LogLine) {
        self.logs.push_back(line);
        while self.logs.len() > MAX_LOG_LINES {
            self.logs.pop_front();
        }
    }
}

struct Shared {
    state: RwLock<DashboardState>,
    revision: watch::Sender<u64>,
}

/// Cloneable handle to the dashboard state.
///
/// Every [`Store::update`] bumps a revision counter that UI code can await
/// through [`Store::subscribe`].
#[derive(Clone)]
pub struct Store {
    shared: Arc<Shared>,
}

impl Store {
    pub fn new(state: DashboardState) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            shared: Arc::new(Shared {
                state: RwLock::new(state),
                revision,
            }),
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, DashboardState> {
        self.shared
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut DashboardState) -> R) -> R {
        let result = {
            let mut state = self
                .shared
                .state
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            f(&mut state)
        };
        self.shared.revision.send_modify(|rev| *rev += 1);
        result
    }

    pub fn phase(&self) -> Phase {
        self.read().connection.phase
    }

    pub fn revision(&self) -> u64 {
        *self.shared.revision.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.shared.revision.subscribe()
    }

    /// Resolve once `pred` holds for the current state.
    pub async fn wait_until(&self, pred: impl Fn(&DashboardState) -> bool) {
        let mut changes = self.subscribe();
        loop {
            let done = {
                let state = self.read();
                pred(&state)
            };
            if done || changes.changed().await.is_err() {
                return;
            }
        }
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("revision", &self.revision())
            .finish_non_exhaustive()
    }
}
