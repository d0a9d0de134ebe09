//! Connection manager.
//!
//! [`Connection::open`] mounts a channel: it spawns one driver task that owns
//! the transport and runs every socket event and timer on a single loop, so
//! the state it publishes is never written concurrently. [`Connection::close`]
//! unmounts it: pending timers are cancelled and the socket is closed with a
//! normal closure.

use crate::dispatch;
use crate::endpoint;
use crate::history::ServerHistory;
use crate::lifecycle::{draw_jitter, CloseAction, Lifecycle};
use crate::store::{DashboardState, Level, Store};
use crate::transport::{Connector, Frame, Link};
use crate::{ClientConfig, ClientError};
use futures_util::{SinkExt, StreamExt};
use scanlink_core::{now_millis, Phase, NORMAL_CLOSURE};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub(crate) enum Command {
    Send(String),
    Shutdown,
}

/// Handle to a mounted channel.
pub struct Connection {
    store: Store,
    url: String,
    commands: mpsc::UnboundedSender<Command>,
    task: Option<JoinHandle<()>>,
}

impl Connection {
    /// Mount a channel. The first connect happens after
    /// `config.initial_delay_ms`. Must be called inside a tokio runtime.
    pub fn open<C: Connector>(config: ClientConfig, connector: C) -> Result<Self, ClientError> {
        let url = endpoint::resolve(&config)?.to_string();
        let history = ServerHistory::new(config.history_interval(), config.history_capacity);
        let store = Store::new(DashboardState::new(history));
        let (commands, rx) = mpsc::unbounded_channel();

        let driver = Driver {
            url: url.clone(),
            connector,
            store: store.clone(),
            lifecycle: Lifecycle::new(config.max_reconnect_attempts),
            commands: rx,
        };
        let task = tokio::spawn(driver.run(config.initial_delay()));

        Ok(Self {
            store,
            url,
            commands,
            task: Some(task),
        })
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn phase(&self) -> Phase {
        self.store.phase()
    }

    pub fn is_connected(&self) -> bool {
        self.phase().is_open()
    }

    pub(crate) fn enqueue(&self, text: String) -> bool {
        self.commands.send(Command::Send(text)).is_ok()
    }

    /// Unmount and wait for the driver to finish.
    pub async fn close(mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!("Channel task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if self.task.is_some() {
            let _ = self.commands.send(Command::Shutdown);
        }
    }
}

enum SessionEnd {
    Closed(Option<u16>),
    Shutdown,
}

struct Driver<C> {
    url: String,
    connector: C,
    store: Store,
    lifecycle: Lifecycle,
    commands: mpsc::UnboundedReceiver<Command>,
}

/// Resolves on shutdown or when every handle is gone. Frames queued while the
/// channel is not open are dropped, never replayed.
async fn shutdown_requested(commands: &mut mpsc::UnboundedReceiver<Command>) {
    loop {
        match commands.recv().await {
            Some(Command::Send(_)) => tracing::warn!("Dropping outbound frame, channel not open"),
            Some(Command::Shutdown) | None => return,
        }
    }
}

impl<C: Connector> Driver<C> {
    async fn run(mut self, initial_delay: Duration) {
        if !self.sleep(initial_delay).await {
            return self.teardown();
        }

        loop {
            if !self.lifecycle.begin_connect() {
                return;
            }
            self.publish();
            tracing::debug!("Connecting to {}", self.url);

            let connected = tokio::select! {
                res = self.connector.connect(&self.url) => res,
                _ = shutdown_requested(&mut self.commands) => return self.teardown(),
            };

            let code = match connected {
                Ok(link) => {
                    self.opened();
                    match self.session(link).await {
                        SessionEnd::Closed(code) => code,
                        SessionEnd::Shutdown => return self.teardown(),
                    }
                }
                Err(e) => {
                    self.report_error(&e);
                    None
                }
            };

            match self.lifecycle.on_close(code, draw_jitter()) {
                CloseAction::Reconnect { delay, attempt } => {
                    tracing::warn!(
                        "Connection lost (code {:?}), reconnect {} in {:?}",
                        code,
                        attempt,
                        delay
                    );
                    self.publish();
                    if !self.sleep(delay).await {
                        return self.teardown();
                    }
                }
                CloseAction::Fail { message } => {
                    tracing::error!("{}", message);
                    self.publish_with(|s| {
                        s.connection.last_error = Some(message.clone());
                        s.notify(Level::Error, message);
                    });
                    return;
                }
                CloseAction::Stop => {
                    tracing::info!("Server closed the channel");
                    self.publish();
                    return;
                }
            }
        }
    }

    /// Wait for `delay` unless unmounted first. Returns false on unmount.
    async fn sleep(&mut self, delay: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = shutdown_requested(&mut self.commands) => false,
        }
    }

    fn opened(&mut self) {
        let opened = self.lifecycle.on_open();
        if opened.reconnected {
            tracing::info!("Reconnected to {}", self.url);
        } else {
            tracing::info!("Connected to {}", self.url);
        }
        self.publish_with(|s| {
            s.connection.last_error = None;
            if opened.reconnected {
                s.notify(Level::Success, "Reconnected to server");
            }
        });
    }

    async fn session(&mut self, link: Link) -> SessionEnd {
        let Link {
            mut sink,
            mut stream,
        } = link;

        loop {
            tokio::select! {
                frame = stream.next() => match frame {
                    Some(Ok(Frame::Text(text))) => {
                        let now = now_millis();
                        self.store.update(|s| dispatch::dispatch(s, &text, now));
                    }
                    Some(Ok(Frame::Close(code))) => {
                        // tungstenite queues the close reply; closing the sink flushes it.
                        if let Err(e) = sink.close().await {
                            tracing::debug!("Close reply not delivered: {}", e);
                        }
                        return SessionEnd::Closed(code);
                    }
                    Some(Err(e)) => {
                        self.report_error(&e);
                        return SessionEnd::Closed(None);
                    }
                    None => return SessionEnd::Closed(None),
                },
                cmd = self.commands.recv() => match cmd {
                    Some(Command::Send(text)) => {
                        if let Err(e) = sink.send(Frame::Text(text)).await {
                            tracing::warn!("Send failed: {}", e);
                        }
                    }
                    Some(Command::Shutdown) | None => {
                        if let Err(e) = sink.send(Frame::Close(Some(NORMAL_CLOSURE))).await {
                            tracing::debug!("Close frame not delivered: {}", e);
                        }
                        return SessionEnd::Shutdown;
                    }
                },
            }
        }
    }

    fn report_error(&mut self, err: &ClientError) {
        let message = self.lifecycle.error_message(&err.to_string());
        let level = if self.lifecycle.is_first_attempt() {
            Level::Warning
        } else {
            Level::Error
        };
        tracing::warn!("{} ({})", message, err);
        self.publish_with(|s| {
            s.connection.connected = false;
            s.connection.last_error = Some(message.clone());
            s.notify(level, message);
        });
    }

    fn teardown(&mut self) {
        self.lifecycle.shutdown();
        self.publish();
        tracing::debug!("Channel to {} torn down", self.url);
    }

    fn publish(&self) {
        self.publish_with(|_| {});
    }

    /// Mirror the lifecycle into the store, then apply `f`.
    fn publish_with(&self, f: impl FnOnce(&mut DashboardState)) {
        let phase = self.lifecycle.phase();
        let attempts = self.lifecycle.reconnect_attempts();
        self.store.update(|s| {
            s.connection.phase = phase;
            s.connection.connected = phase.is_open();
            s.connection.reconnect_attempts = attempts;
            f(s);
        });
    }
}
