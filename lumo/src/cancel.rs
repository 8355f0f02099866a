// Copyright (c) 2026 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::future;
use tokio::sync::watch;

/// Signal half of a cancellation pair.
#[derive(Debug)]
pub struct Canceller {
    tx: watch::Sender<bool>,
}

impl Canceller {
    /// Fire the signal; every clone of the paired token observes it.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Cancellation signal accepted by every public client operation.
///
/// Cancelling fails the local future with `Cancelled`; a packet that was
/// already written is not recalled, and its inflight record is settled by
/// the next matching inbound packet or by connection teardown.
#[derive(Clone, Debug)]
pub struct CancelToken {
    rx: Option<watch::Receiver<bool>>,
}

impl CancelToken {
    /// Create a connected (canceller, token) pair.
    #[must_use]
    pub fn new() -> (Canceller, Self) {
        let (tx, rx) = watch::channel(false);
        (Canceller { tx }, Self { rx: Some(rx) })
    }

    /// A token that never fires.
    #[must_use]
    pub const fn never() -> Self {
        Self { rx: None }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.rx.as_ref().map_or(false, |rx| *rx.borrow())
    }

    /// Resolve when the paired canceller fires; never resolves for a
    /// [`CancelToken::never`] token or when the canceller is dropped
    /// without firing.
    pub async fn cancelled(&self) {
        let Some(rx) = &self.rx else {
            return future::pending().await;
        };
        let mut rx = rx.clone();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                return future::pending().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancel_fires() {
        let (canceller, token) = CancelToken::new();
        assert!(!token.is_cancelled());
        canceller.cancel();
        assert!(token.is_cancelled());
        token.cancelled().await;
    }

    #[tokio::test]
    async fn test_never_token_pends() {
        let token = CancelToken::never();
        let waited = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            token.cancelled(),
        )
        .await;
        assert!(waited.is_err());
    }
}
