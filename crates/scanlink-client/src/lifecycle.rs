//! Connection lifecycle and reconnect policy.
//!
//! [`Lifecycle`] is the pure half of the connection manager: it owns the
//! phase, the in-flight guard, the attempt counter and the backoff, and
//! answers "what next?" for every transport event. It performs no I/O and
//! reads no clock, so the driver task decides *when* and this type decides
//! *what*.

use rand::Rng;
use scanlink_core::{Phase, NORMAL_CLOSURE};
use std::ops::RangeInclusive;
use std::time::Duration;

pub const INITIAL_BACKOFF_MS: u64 = 1000;
pub const MAX_BACKOFF_MS: u64 = 30_000;
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;
pub const JITTER: RangeInclusive<f64> = 0.85..=1.15;

/// Draw a multiplicative jitter factor from [`JITTER`].
pub fn draw_jitter() -> f64 {
    rand::thread_rng().gen_range(JITTER)
}

/// `min(backoff × jitter, MAX_BACKOFF_MS)`.
pub fn backoff_delay(backoff_ms: u64, jitter: f64) -> Duration {
    let ms = (backoff_ms as f64 * jitter).min(MAX_BACKOFF_MS as f64);
    Duration::from_secs_f64(ms.max(0.0) / 1000.0)
}

/// What the driver should do after the transport closed.
#[derive(Debug, Clone, PartialEq)]
pub enum CloseAction {
    /// Sleep for `delay`, then connect again.
    Reconnect { delay: Duration, attempt: u32 },
    /// Retry budget exhausted.
    Fail { message: String },
    /// Intentional close; nothing more to do.
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Opened {
    /// The open followed at least one failed attempt.
    pub reconnected: bool,
}

#[derive(Debug, Clone)]
pub struct Lifecycle {
    phase: Phase,
    is_connecting: bool,
    reconnect_attempts: u32,
    reconnect_backoff_ms: u64,
    max_reconnect_attempts: u32,
    ever_opened: bool,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new(MAX_RECONNECT_ATTEMPTS)
    }
}

impl Lifecycle {
    pub fn new(max_reconnect_attempts: u32) -> Self {
        Self {
            phase: Phase::Idle,
            is_connecting: false,
            reconnect_attempts: 0,
            reconnect_backoff_ms: INITIAL_BACKOFF_MS,
            max_reconnect_attempts,
            ever_opened: false,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    pub fn reconnect_backoff_ms(&self) -> u64 {
        self.reconnect_backoff_ms
    }

    pub fn is_connecting(&self) -> bool {
        self.is_connecting
    }

    /// Enter `Connecting`. Returns false (and changes nothing) when an attempt
    /// is already in flight, the channel is open, or the phase is terminal.
    pub fn begin_connect(&mut self) -> bool {
        if self.is_connecting || !matches!(self.phase, Phase::Idle | Phase::ReconnectScheduled) {
            return false;
        }
        self.is_connecting = true;
        self.phase = Phase::Connecting;
        true
    }

    pub fn on_open(&mut self) -> Opened {
        let reconnected = self.reconnect_attempts > 0;
        self.reconnect_attempts = 0;
        self.reconnect_backoff_ms = INITIAL_BACKOFF_MS;
        self.is_connecting = false;
        self.ever_opened = true;
        self.phase = Phase::Open;
        Opened { reconnected }
    }

    /// True until the very first attempt has either opened or been retried.
    pub fn is_first_attempt(&self) -> bool {
        !self.ever_opened && self.reconnect_attempts == 0
    }

    /// User-facing text for a transport error.
    pub fn error_message(&self, detail: &str) -> String {
        if self.is_first_attempt() {
            "Server not available".to_string()
        } else {
            format!("Connection error: {detail}")
        }
    }

    /// Handle a close (or a failed open). `code` is the close code if the
    /// peer sent one; `jitter` is drawn by the caller from [`JITTER`].
    pub fn on_close(&mut self, code: Option<u16>, jitter: f64) -> CloseAction {
        self.is_connecting = false;
        if self.phase.is_terminal() {
            return CloseAction::Stop;
        }
        if code == Some(NORMAL_CLOSURE) {
            self.phase = Phase::Closed;
            return CloseAction::Stop;
        }
        if self.reconnect_attempts >= self.max_reconnect_attempts {
            self.phase = Phase::Failed;
            return CloseAction::Fail {
                message: format!(
                    "Server unreachable after {} attempts",
                    self.reconnect_attempts
                ),
            };
        }

        let delay = backoff_delay(self.reconnect_backoff_ms, jitter);
        self.reconnect_attempts += 1;
        self.reconnect_backoff_ms = (self.reconnect_backoff_ms * 2).min(MAX_BACKOFF_MS);
        self.phase = Phase::ReconnectScheduled;
        CloseAction::Reconnect {
            delay,
            attempt: self.reconnect_attempts,
        }
    }

    /// Unmount: no reconnect may follow.
    pub fn shutdown(&mut self) {
        self.is_connecting = false;
        if self.phase != Phase::Failed {
            self.phase = Phase::Closed;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ABNORMAL: Option<u16> = Some(1006);

    fn ms(d: Duration) -> f64 {
        d.as_secs_f64() * 1000.0
    }

    #[test]
    fn guard_blocks_second_connect() {
        let mut lc = Lifecycle::default();
        assert!(lc.begin_connect());
        assert!(lc.is_connecting());
        assert!(!lc.begin_connect());
        lc.on_open();
        assert!(!lc.begin_connect());
        assert_eq!(lc.phase(), Phase::Open);
    }

    #[test]
    fn abnormal_close_schedules_jittered_retry() {
        let mut lc = Lifecycle::default();
        lc.begin_connect();
        lc.on_open();

        for _ in 0..50 {
            let mut trial = lc.clone();
            let backoff = trial.reconnect_backoff_ms() as f64;
            match trial.on_close(ABNORMAL, draw_jitter()) {
                CloseAction::Reconnect { delay, attempt } => {
                    assert!(ms(delay) >= backoff * 0.85 - 1e-6);
                    assert!(ms(delay) <= backoff * 1.15 + 1e-6);
                    assert_eq!(attempt, 1);
                    assert_eq!(trial.reconnect_attempts(), 1);
                    assert_eq!(trial.phase(), Phase::ReconnectScheduled);
                }
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let mut lc = Lifecycle::new(20);
        let mut seen = Vec::new();
        for _ in 0..8 {
            lc.begin_connect();
            seen.push(lc.reconnect_backoff_ms());
            lc.on_close(None, 1.0);
        }
        assert_eq!(
            seen,
            vec![1000, 2000, 4000, 8000, 16000, 30000, 30000, 30000]
        );
        assert_eq!(backoff_delay(30_000, 1.15), Duration::from_secs(30));
    }

    #[test]
    fn budget_exhaustion_is_terminal() {
        let mut lc = Lifecycle::default();
        let mut scheduled = 0;
        loop {
            if !lc.begin_connect() {
                break;
            }
            match lc.on_close(None, 1.0) {
                CloseAction::Reconnect { attempt, .. } => {
                    scheduled += 1;
                    assert_eq!(attempt, scheduled);
                }
                CloseAction::Fail { message } => {
                    assert_eq!(message, "Server unreachable after 5 attempts");
                    break;
                }
                CloseAction::Stop => panic!("unexpected stop"),
            }
        }
        assert_eq!(scheduled, 5);
        assert_eq!(lc.phase(), Phase::Failed);
        assert!(!lc.begin_connect());
        assert_eq!(lc.on_close(None, 1.0), CloseAction::Stop);
    }

    #[test]
    fn open_after_failures_resets() {
        let mut lc = Lifecycle::default();
        lc.begin_connect();
        lc.on_close(None, 1.0);
        lc.begin_connect();
        lc.on_close(ABNORMAL, 1.0);
        assert_eq!(lc.reconnect_attempts(), 2);
        assert_eq!(lc.reconnect_backoff_ms(), 4000);

        lc.begin_connect();
        let opened = lc.on_open();
        assert!(opened.reconnected);
        assert_eq!(lc.reconnect_attempts(), 0);
        assert_eq!(lc.reconnect_backoff_ms(), INITIAL_BACKOFF_MS);
    }

    #[test]
    fn first_open_is_not_a_reconnect() {
        let mut lc = Lifecycle::default();
        lc.begin_connect();
        assert!(!lc.on_open().reconnected);
    }

    #[test]
    fn normal_closure_does_not_reconnect() {
        let mut lc = Lifecycle::default();
        lc.begin_connect();
        lc.on_open();
        assert_eq!(lc.on_close(Some(NORMAL_CLOSURE), 1.0), CloseAction::Stop);
        assert_eq!(lc.phase(), Phase::Closed);
        assert!(!lc.begin_connect());
    }

    #[test]
    fn first_attempt_error_is_softened() {
        let mut lc = Lifecycle::default();
        lc.begin_connect();
        assert_eq!(lc.error_message("refused"), "Server not available");
        lc.on_close(None, 1.0);
        assert_eq!(lc.error_message("refused"), "Connection error: refused");
    }

    #[test]
    fn shutdown_while_scheduled() {
        let mut lc = Lifecycle::default();
        lc.begin_connect();
        lc.on_close(None, 1.0);
        lc.shutdown();
        assert_eq!(lc.phase(), Phase::Closed);
        assert!(!lc.begin_connect());
    }
}
