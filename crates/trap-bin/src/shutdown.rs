// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Graceful shutdown coordination.
//!
//! Long-running commands stop on an OS signal (SIGTERM, SIGINT), on a
//! shutdown request sent by the server, or when a command decides it is
//! done. All three end up in [`ShutdownCoordinator::initiate_shutdown`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{info, warn};

// =============================================================================
// ShutdownCoordinator
// =============================================================================

/// Coordinates shutdown across the tasks of a command.
///
/// # Example
///
/// ```ignore
/// use trap_bin::shutdown::ShutdownCoordinator;
///
/// let coordinator = ShutdownCoordinator::new();
/// coordinator.listen_for_signals();
///
/// let mut signal = coordinator.shutdown_signal();
/// signal.wait().await;
/// println!("stopping: {:?}", coordinator.reason());
/// ```
#[derive(Clone)]
pub struct ShutdownCoordinator {
    sender: broadcast::Sender<()>,
    shutdown_initiated: Arc<AtomicBool>,
    reason: Arc<Mutex<Option<String>>>,
}

impl ShutdownCoordinator {
    /// Creates a new shutdown coordinator.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1);
        Self {
            sender,
            shutdown_initiated: Arc::new(AtomicBool::new(false)),
            reason: Arc::new(Mutex::new(None)),
        }
    }

    /// Subscribes to shutdown notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.sender.subscribe()
    }

    /// Creates a handle that resolves once shutdown is initiated.
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            receiver: self.sender.subscribe(),
            shutdown_initiated: Arc::clone(&self.shutdown_initiated),
        }
    }

    /// Initiates shutdown; only the first call takes effect.
    pub fn initiate_shutdown(&self, reason: impl Into<String>) {
        if self
            .shutdown_initiated
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let reason = reason.into();
            info!(reason = %reason, "Shutdown initiated");
            *self.reason.lock() = Some(reason);
            let _ = self.sender.send(());
        }
    }

    /// Returns true if shutdown has been initiated.
    pub fn is_shutdown_initiated(&self) -> bool {
        self.shutdown_initiated.load(Ordering::SeqCst)
    }

    /// Returns the reason given by the first [`initiate_shutdown`](Self::initiate_shutdown).
    pub fn reason(&self) -> Option<String> {
        self.reason.lock().clone()
    }

    /// Initiates shutdown on the first OS termination signal.
    pub fn listen_for_signals(&self) -> JoinHandle<()> {
        let coordinator = self.clone();
        let mut signal = self.shutdown_signal();
        tokio::spawn(async move {
            tokio::select! {
                name = wait_for_os_signal() => coordinator.initiate_shutdown(name),
                _ = signal.wait() => {}
            }
        })
    }

    /// Initiates shutdown when the server asks its clients to disconnect.
    pub fn forward_server_shutdown(&self, mut requests: mpsc::Receiver<String>) -> JoinHandle<()> {
        let coordinator = self.clone();
        let mut signal = self.shutdown_signal();
        tokio::spawn(async move {
            tokio::select! {
                Some(reason) = requests.recv() => {
                    warn!(reason = %reason, "Server requested shutdown");
                    coordinator.initiate_shutdown(format!("server shutdown: {}", reason));
                }
                _ = signal.wait() => {}
            }
        })
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
async fn wait_for_os_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut sigterm, mut sigint) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
        (Err(e), _) | (_, Err(e)) => {
            warn!(error = %e, "Failed to register signal handlers, falling back to Ctrl+C");
            return wait_for_ctrl_c().await;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    }
}

#[cfg(not(unix))]
async fn wait_for_os_signal() -> &'static str {
    wait_for_ctrl_c().await
}

async fn wait_for_ctrl_c() -> &'static str {
    match tokio::signal::ctrl_c().await {
        Ok(()) => "Ctrl+C",
        Err(e) => {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending().await
        }
    }
}

// =============================================================================
// ShutdownSignal
// =============================================================================

/// Resolves when shutdown is initiated.
pub struct ShutdownSignal {
    receiver: broadcast::Receiver<()>,
    shutdown_initiated: Arc<AtomicBool>,
}

impl ShutdownSignal {
    /// Waits for shutdown. Returns at once if it already happened.
    pub async fn wait(&mut self) {
        if self.shutdown_initiated.load(Ordering::SeqCst) {
            return;
        }
        let _ = self.receiver.recv().await;
    }
}

// =============================================================================
// Tests
// =============================================================================
