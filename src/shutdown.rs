//! Cooperative shutdown signal shared by every adapter and the
//! orchestrator, substituting for the teacher's internal tripwire
//! signal with the ecosystem's cancellation primitive.

use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct ShutdownHandle {
    token: CancellationToken,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        Self { token: CancellationToken::new() }
    }

    pub fn child(&self) -> CancellationToken {
        self.token.child_token()
    }

    pub fn trigger(&self) {
        self.token.cancel();
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Waits for either Ctrl-C or SIGTERM, whichever arrives first.
pub async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = sigterm.recv() => {},
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
