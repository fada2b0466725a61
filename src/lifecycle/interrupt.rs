//! Escalating cancellation for running builds
//!
//! The first interrupt asks the running phase container to stop within a
//! grace period, the second kills it, and the third abandons cleanup so
//! the process can exit immediately.
//!
//! Work outside a phase container (pulls, downloads, pushes) runs through
//! [`Interrupt::cancellable`] and is dropped on the first interrupt.

use crate::error::{PackError, PackResult};
use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Grace period given to a phase container before it is killed
pub const DEFAULT_GRACE: Duration = Duration::from_secs(10);

/// Exit status after the third interrupt (128 + SIGINT)
const ABANDON_EXIT_CODE: i32 = 130;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum InterruptLevel {
    None,
    Stop,
    Kill,
    Abandon,
}

impl InterruptLevel {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::None,
            1 => Self::Stop,
            2 => Self::Kill,
            _ => Self::Abandon,
        }
    }
}

/// Shared cancellation handle; clones observe the same level
#[derive(Clone)]
pub struct Interrupt {
    level: Arc<AtomicU8>,
    stop: CancellationToken,
    kill: CancellationToken,
    abandon: CancellationToken,
    grace: Duration,
}

impl Default for Interrupt {
    fn default() -> Self {
        Self::new()
    }
}

impl Interrupt {
    pub fn new() -> Self {
        Self::with_grace(DEFAULT_GRACE)
    }

    pub fn with_grace(grace: Duration) -> Self {
        Self {
            level: Arc::new(AtomicU8::new(0)),
            stop: CancellationToken::new(),
            kill: CancellationToken::new(),
            abandon: CancellationToken::new(),
            grace,
        }
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    pub fn level(&self) -> InterruptLevel {
        InterruptLevel::from_u8(self.level.load(Ordering::SeqCst))
    }

    pub fn is_cancelled(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Raise the level by one and return the new level
    pub fn escalate(&self) -> InterruptLevel {
        let previous = self
            .level
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |l| Some((l + 1).min(3)))
            .unwrap_or(3);
        let level = InterruptLevel::from_u8((previous + 1).min(3));
        match level {
            InterruptLevel::Stop => self.stop.cancel(),
            InterruptLevel::Kill => {
                self.stop.cancel();
                self.kill.cancel();
            }
            InterruptLevel::Abandon => {
                self.stop.cancel();
                self.kill.cancel();
                self.abandon.cancel();
            }
            InterruptLevel::None => {}
        }
        debug!("Interrupt level now {:?}", level);
        level
    }

    /// Resolves on the first interrupt
    pub async fn stopped(&self) {
        self.stop.cancelled().await
    }

    /// Resolves on the second interrupt
    pub async fn killed(&self) {
        self.kill.cancelled().await
    }

    /// Resolves on the third interrupt
    pub async fn abandoned(&self) {
        self.abandon.cancelled().await
    }

    /// Run `work` unless interrupted first; an interrupt drops it mid-flight
    pub async fn cancellable<T>(
        &self,
        stage: &str,
        work: impl Future<Output = PackResult<T>>,
    ) -> PackResult<T> {
        tokio::select! {
            biased;
            _ = self.stopped() => {
                debug!("Cancelled during {}", stage);
                Err(PackError::Cancelled {
                    phase: stage.to_string(),
                })
            }
            result = work => result,
        }
    }

    /// Escalate on every SIGINT/SIGTERM; the third one exits the process
    ///
    /// Runs as a background task for the lifetime of the process.
    pub fn listen_for_signals(&self) -> tokio::task::JoinHandle<()> {
        let interrupt = self.clone();
        tokio::spawn(async move {
            loop {
                if wait_for_signal().await.is_err() {
                    return;
                }
                match interrupt.escalate() {
                    InterruptLevel::Stop => warn!(
                        "Interrupted; stopping the running phase (grace {}s, press Ctrl-C again to kill)",
                        interrupt.grace.as_secs()
                    ),
                    InterruptLevel::Kill => warn!("Killing the running phase (press Ctrl-C again to skip cleanup)"),
                    _ => {
                        warn!("Skipping cleanup");
                        std::process::exit(ABANDON_EXIT_CODE);
                    }
                }
            }
        })
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut term = signal(SignalKind::terminate())?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res,
        _ = term.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escalation_is_capped() {
        let interrupt = Interrupt::new();
        assert_eq!(interrupt.level(), InterruptLevel::None);
        assert!(!interrupt.is_cancelled());

        assert_eq!(interrupt.escalate(), InterruptLevel::Stop);
        assert!(interrupt.is_cancelled());
        assert_eq!(interrupt.escalate(), InterruptLevel::Kill);
        assert_eq!(interrupt.escalate(), InterruptLevel::Abandon);
        assert_eq!(interrupt.escalate(), InterruptLevel::Abandon);
    }

    #[tokio::test]
    async fn cancellable_drops_pending_work() {
        let interrupt = Interrupt::new();
        let trigger = interrupt.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.escalate();
        });

        let result = tokio::time::timeout(
            Duration::from_secs(1),
            interrupt.cancellable("pull", std::future::pending::<PackResult<()>>()),
        )
        .await
        .unwrap();
        assert!(matches!(result, Err(PackError::Cancelled { ref phase }) if phase == "pull"));

        // finished work passes through untouched before an interrupt
        let fresh = Interrupt::new();
        assert_eq!(fresh.cancellable("pull", async { Ok::<_, PackError>(7) }).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn clones_share_tokens() {
        let interrupt = Interrupt::with_grace(Duration::from_millis(5));
        let clone = interrupt.clone();
        let waiter = tokio::spawn(async move { clone.killed().await });

        interrupt.escalate();
        interrupt.escalate();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(interrupt.grace(), Duration::from_millis(5));
    }
}
