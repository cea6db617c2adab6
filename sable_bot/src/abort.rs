//! The process-wide abort flag.
//!
//! The flag is only ever polled. Every suspension point in the bot sleeps in
//! slices of at most [`SLEEP_SLICE`] and checks the flag between them, so an
//! abort is honoured within one slice.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::time::{sleep, Instant};

/// Upper bound on any single uninterruptible sleep
pub const SLEEP_SLICE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Default)]
pub struct AbortFlag(Arc<AtomicBool>);

impl AbortFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Sleep for `duration`, waking every [`SLEEP_SLICE`] to check the flag.
    ///
    /// Returns `true` if the full duration elapsed, `false` if the flag was set.
    pub async fn interruptible_sleep(&self, duration: Duration) -> bool {
        // Too far away to represent means never
        let deadline = Instant::now().checked_add(duration);

        loop {
            if self.is_set() {
                return false;
            }

            let remaining = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return true;
                    }
                    deadline - now
                }
                None => SLEEP_SLICE,
            };

            sleep(SLEEP_SLICE.min(remaining)).await;
        }
    }

    /// Resolve once the flag is set, checking it every [`SLEEP_SLICE`].
    ///
    /// Meant to be raced against an operation with no abort checks of its own.
    pub async fn raised(&self) {
        while !self.is_set() {
            sleep(SLEEP_SLICE).await;
        }
    }

    /// Spawn a task that sets the flag when the process receives a termination signal
    pub fn install_signal_handler(&self) -> tokio::task::JoinHandle<()> {
        let flag = self.clone();
        tokio::spawn(async move {
            match wait_for_shutdown_signal().await {
                Ok(()) => {
                    tracing::warn!("Received termination signal; aborting");
                    flag.set();
                }
                Err(e) => tracing::error!(?e, "Could not install signal handlers"),
            }
        })
    }
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    tokio::select! {
        _ = sigint.recv()  => {},
        _ = sigterm.recv() => {},
        _ = sigquit.recv() => {},
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn sleep_runs_to_completion() {
        let flag = AbortFlag::new();
        let start = Instant::now();

        assert!(flag.interruptible_sleep(Duration::from_secs(2)).await);
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_is_interrupted_within_a_slice() {
        let flag = AbortFlag::new();
        let setter = flag.clone();
        let start = Instant::now();

        tokio::spawn(async move {
            sleep(Duration::from_millis(250)).await;
            setter.set();
        });

        assert!(!flag.interruptible_sleep(Duration::from_secs(60)).await);
        assert!(start.elapsed() <= Duration::from_millis(250) + SLEEP_SLICE);
    }

    #[tokio::test(start_paused = true)]
    async fn raised_interrupts_a_stalled_operation() {
        let flag = AbortFlag::new();
        let setter = flag.clone();
        let start = Instant::now();

        tokio::spawn(async move {
            sleep(Duration::from_millis(250)).await;
            setter.set();
        });

        let finished = tokio::select! {
            _ = std::future::pending::<()>() => true,
            _ = flag.raised() => false,
        };
        assert!(!finished);
        assert!(start.elapsed() <= Duration::from_millis(250) + SLEEP_SLICE);
    }

    #[tokio::test]
    async fn zero_duration_returns_immediately() {
        assert!(AbortFlag::new().interruptible_sleep(Duration::ZERO).await);
    }
}
