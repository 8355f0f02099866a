// Copyright (c) 2026 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use codec::{Packet, PingRequestPacket};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::commands::ConnectionEvent;

/// State shared between the keep-alive task, the writer and the
/// dispatcher.
#[derive(Debug)]
pub struct KeepAliveState {
    /// When the writer last put bytes on the wire.
    last_write: Mutex<Instant>,

    /// When the outstanding PINGREQ was sent, if any.
    pending_ping: Mutex<Option<Instant>>,
}

impl KeepAliveState {
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_write: Mutex::new(Instant::now()),
            pending_ping: Mutex::new(None),
        }
    }

    /// Called by the writer after every successful write.
    ///
    /// # Panics
    ///
    /// Panics if the inner mutex is poisoned.
    pub fn touch(&self) {
        *self.last_write.lock().unwrap() = Instant::now();
    }

    /// Called by the dispatcher when PINGRESP arrives.
    ///
    /// # Panics
    ///
    /// Panics if the inner mutex is poisoned.
    pub fn on_ping_response(&self) {
        *self.pending_ping.lock().unwrap() = None;
    }

    fn last_write(&self) -> Instant {
        *self.last_write.lock().unwrap()
    }

    fn pending_since(&self) -> Option<Instant> {
        *self.pending_ping.lock().unwrap()
    }

    fn mark_ping_sent(&self) {
        *self.pending_ping.lock().unwrap() = Some(Instant::now());
    }
}

impl Default for KeepAliveState {
    fn default() -> Self {
        Self::new()
    }
}

/// Drive the keep-alive heartbeat for one connection.
///
/// A PINGREQ goes out once the writer has been idle for `keep_alive`
/// seconds; a second one is never sent while the first is outstanding.
/// Missing PINGRESP past the grace window (1.5x keep-alive) reports a
/// ping timeout and ends the task. A zero interval disables the
/// mechanism entirely [MQTT-3.1.2-10].
pub async fn keep_alive_loop(
    keep_alive: Duration,
    state: Arc<KeepAliveState>,
    writer_tx: mpsc::Sender<Packet>,
    event_tx: mpsc::Sender<ConnectionEvent>,
) {
    if keep_alive.is_zero() {
        return;
    }
    let grace = keep_alive + keep_alive / 2;

    loop {
        let deadline = match state.pending_since() {
            Some(sent_at) => sent_at + grace,
            None => state.last_write() + keep_alive,
        };
        tokio::time::sleep_until(deadline).await;

        if let Some(sent_at) = state.pending_since() {
            if sent_at.elapsed() >= grace {
                log::warn!("keep_alive: no PINGRESP within {grace:?}");
                let _ = event_tx.send(ConnectionEvent::PingTimeout).await;
                return;
            }
            continue;
        }

        if state.last_write().elapsed() >= keep_alive {
            log::debug!("keep_alive: idle, sending ping");
            // Mark before enqueueing so a slow writer cannot let a
            // second PINGREQ through.
            state.mark_ping_sent();
            if writer_tx
                .send(Packet::PingRequest(PingRequestPacket::new()))
                .await
                .is_err()
            {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_ping_after_idle_interval() {
        let state = Arc::new(KeepAliveState::new());
        let (writer_tx, mut writer_rx) = mpsc::channel(4);
        let (event_tx, _event_rx) = mpsc::channel(4);

        tokio::spawn(keep_alive_loop(
            Duration::from_secs(2),
            Arc::clone(&state),
            writer_tx,
            event_tx,
        ));

        tokio::time::advance(Duration::from_millis(2100)).await;
        let packet = writer_rx.recv().await.unwrap();
        assert!(matches!(packet, Packet::PingRequest(_)));

        // No second ping while the first is outstanding.
        tokio::time::advance(Duration::from_millis(2100)).await;
        assert!(writer_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_grace_window_timeout() {
        let state = Arc::new(KeepAliveState::new());
        let (writer_tx, mut _writer_rx) = mpsc::channel(4);
        let (event_tx, mut event_rx) = mpsc::channel(4);

        tokio::spawn(keep_alive_loop(
            Duration::from_secs(2),
            Arc::clone(&state),
            writer_tx,
            event_tx,
        ));

        // Idle interval elapses, ping goes out, then the grace window
        // passes without a response.
        tokio::time::advance(Duration::from_millis(2100)).await;
        tokio::time::advance(Duration::from_millis(3100)).await;
        let event = event_rx.recv().await.unwrap();
        assert!(matches!(event, ConnectionEvent::PingTimeout));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_disables() {
        let state = Arc::new(KeepAliveState::new());
        let (writer_tx, mut writer_rx) = mpsc::channel(4);
        let (event_tx, _event_rx) = mpsc::channel(4);

        tokio::spawn(keep_alive_loop(
            Duration::ZERO,
            Arc::clone(&state),
            writer_tx,
            event_tx,
        ));

        tokio::time::advance(Duration::from_secs(600)).await;
        // Channel closes because the loop returned without sending.
        assert!(writer_rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ping_response_resets() {
        let state = Arc::new(KeepAliveState::new());
        let (writer_tx, mut writer_rx) = mpsc::channel(4);
        let (event_tx, mut event_rx) = mpsc::channel(4);

        tokio::spawn(keep_alive_loop(
            Duration::from_secs(2),
            Arc::clone(&state),
            writer_tx,
            event_tx,
        ));

        tokio::time::advance(Duration::from_millis(2100)).await;
        assert!(writer_rx.recv().await.is_some());
        state.on_ping_response();
        state.touch();

        // Next idle interval produces the next ping, not a timeout.
        tokio::time::advance(Duration::from_millis(2100)).await;
        assert!(writer_rx.recv().await.is_some());
        assert!(event_rx.try_recv().is_err());
    }
}
