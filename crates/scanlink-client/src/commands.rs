//! Command emitters.
//!
//! Commands are delivered only while the channel is open. Otherwise they fail
//! fast with `false` and a notification; nothing is queued for later.

use crate::store::Level;
use crate::Connection;
use scanlink_core::ClientMessage;

impl Connection {
    pub fn start_scanner(&self, vpn_type: &str) -> bool {
        self.emit(ClientMessage::StartScanner {
            vpn_type: vpn_type.to_string(),
        })
    }

    pub fn stop_scanner(&self, vpn_type: &str) -> bool {
        self.emit(ClientMessage::StopScanner {
            vpn_type: vpn_type.to_string(),
        })
    }

    pub fn get_logs(&self, limit: u32) -> bool {
        self.emit(ClientMessage::GetLogs { limit })
    }

    /// Stamp `msg` with the current time and hand it to the driver.
    pub fn emit(&self, msg: ClientMessage) -> bool {
        if !self.is_connected() {
            tracing::warn!("Cannot send {}: not connected", msg.kind());
            self.store()
                .update(|s| s.notify(Level::Warning, "Not connected to server"));
            return false;
        }

        let text = match msg.encode() {
            Ok(text) => text,
            Err(e) => {
                tracing::error!("Failed to encode {}: {}", msg.kind(), e);
                self.store().update(|s| {
                    s.notify(Level::Error, format!("Failed to send {}: {}", msg.kind(), e))
                });
                return false;
            }
        };

        if !self.enqueue(text) {
            self.store()
                .update(|s| s.notify(Level::Warning, "Not connected to server"));
            return false;
        }
        tracing::debug!("Sent {}", msg.kind());
        true
    }
}
