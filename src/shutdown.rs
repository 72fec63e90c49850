//! Shutdown coordination: `Running → Draining → Stopped`.
//!
//! The current state lives in a `watch` channel. Ingestion reads it before
//! every enqueue and the HTTP listener's graceful shutdown waits on it, so a
//! single [`ShutdownCoordinator::begin_drain`] call stops new work everywhere.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info};

use crate::model::PipelineState;

/// Owns the lifecycle state. Clones share it.
#[derive(Debug, Clone)]
pub struct ShutdownCoordinator {
    state: Arc<watch::Sender<PipelineState>>,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(PipelineState::Running);
        Self {
            state: Arc::new(tx),
        }
    }

    pub fn state(&self) -> PipelineState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<PipelineState> {
        self.state.subscribe()
    }

    /// Move to `Draining`. Returns `false` if shutdown had already begun.
    pub fn begin_drain(&self) -> bool {
        self.advance(PipelineState::Draining)
    }

    /// Move to `Stopped`. Returns `false` if already stopped.
    pub fn mark_stopped(&self) -> bool {
        self.advance(PipelineState::Stopped)
    }

    fn advance(&self, to: PipelineState) -> bool {
        let moved = self.state.send_if_modified(|current| {
            if *current < to {
                *current = to;
                true
            } else {
                false
            }
        });
        if moved {
            info!(state = %to, "pipeline state changed");
        }
        moved
    }

    /// Resolves once shutdown has begun.
    pub async fn drain_started(&self) {
        let mut rx = self.subscribe();
        // Err only if the sender is gone, which cannot happen while `self` lives.
        let _ = rx.wait_for(|s| *s >= PipelineState::Draining).await;
    }
}

/// Waits for Ctrl+C (SIGINT) or SIGTERM.
pub async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received Ctrl+C, shutting down"),
        () = terminate => info!("received SIGTERM, shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn transitions_only_move_forward() {
        let coordinator = ShutdownCoordinator::new();
        assert_eq!(coordinator.state(), PipelineState::Running);

        assert!(coordinator.begin_drain());
        assert!(!coordinator.begin_drain());
        assert_eq!(coordinator.state(), PipelineState::Draining);

        assert!(coordinator.mark_stopped());
        assert!(!coordinator.begin_drain());
        assert_eq!(coordinator.state(), PipelineState::Stopped);
    }

    #[tokio::test]
    async fn drain_started_wakes_waiters() {
        let coordinator = ShutdownCoordinator::new();
        let waiter = {
            let c = coordinator.clone();
            tokio::spawn(async move { c.drain_started().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        coordinator.begin_drain();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }

    #[tokio::test]
    async fn drain_started_returns_immediately_when_already_draining() {
        let coordinator = ShutdownCoordinator::new();
        coordinator.mark_stopped();
        tokio::time::timeout(Duration::from_millis(100), coordinator.drain_started())
            .await
            .expect("already past running");
    }
}
