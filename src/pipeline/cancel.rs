//! Cooperative cancellation shared by the orchestrator and its workers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Cheap-to-clone stop signal with an optional deadline.
///
/// Clones share the flag. Once the deadline passes the token reports
/// cancelled even if nobody called [`CancellationToken::cancel`].
/// A child token observes its parent but never writes to it.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
    parent: Option<Arc<CancellationToken>>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that trips `after` from now.
    pub fn with_deadline(after: Duration) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            deadline: Instant::now().checked_add(after),
            parent: None,
        }
    }

    /// A token with its own flag that trips `after` from now or when this
    /// token is cancelled, whichever comes first.
    pub fn child_with_deadline(&self, after: Duration) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            deadline: Instant::now().checked_add(after),
            parent: Some(Arc::new(self.clone())),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        if self.flag.load(Ordering::Relaxed) {
            return true;
        }
        if self.parent.as_ref().is_some_and(|p| p.is_cancelled()) {
            return true;
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                self.cancel();
                true
            }
            _ => false,
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Stop signal
// ═══════════════════════════════════════════════════════════

/// Cancel `token` on the first Ctrl-C so in-flight units finish and partial
/// results are still written. A second Ctrl-C exits immediately.
pub fn cancel_on_ctrl_c(token: &CancellationToken) -> std::io::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let token = token.clone();

    std::thread::Builder::new()
        .name("stop-signal".into())
        .spawn(move || {
            runtime.block_on(async move {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::warn!(error = %e, "Stop signal listener unavailable");
                    return;
                }
                tracing::warn!("Stop requested: finishing in-flight units, then writing partial results");
                token.cancel();

                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::error!("Second stop request, exiting without output");
                    std::process::exit(130);
                }
            });
        })?;
    Ok(())
}
