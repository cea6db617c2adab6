//! The per-connection event loop.
//!
//! Each pass waits a bounded time for one line, runs timer housekeeping, feeds
//! any parsed event to the plugins, and finally drains the control mailbox.
//! That order is fixed: control messages enqueued in reaction to an event are
//! handled in the same pass.
//!
//! Throttled lines wait in the connection's own queue, never in the mailbox.
//! The read wait doubles as the throttle wait: it is cut short whenever the
//! bucket will next permit a queued line, and the queue is flushed between
//! slices.

use crate::{
    abort::SLEEP_SLICE, config::ConfigStore, utils::now, utils::OrLog, AbortFlag, Connection,
    ControlMessage, MailboxReceiver, OutputLevel, Parser, PluginCollection, ReadOutcome,
    Transport, TransportError,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct LoopSettings {
    /// Longest wait for input in a single pass
    pub receive_timeout_ms: u64,
    /// Timers are checked at least once in this many passes
    pub timer_check_passes: u32,
    /// Most control messages handled in one pass
    pub message_cap: usize,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            receive_timeout_ms: 1000,
            timer_check_passes: 5,
            message_cap: 5,
        }
    }
}

impl LoopSettings {
    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms.max(1))
    }
}

/// Why [`MainLoop::run`] returned
#[derive(Debug)]
pub enum TerminationReason {
    /// The transport failed or the peer closed the connection
    Disconnected(TransportError),
    Quit,
    Reconnect,
    Aborted,
}

/// Result of one mailbox drain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    Continue,
    Quit,
    Reconnect,
}

/// Drives one live connection until it ends
pub struct MainLoop<'a> {
    settings: LoopSettings,
    abort: AbortFlag,
    mailbox: &'a mut MailboxReceiver,
    store: Option<&'a dyn ConfigStore>,
    quit_message: String,
    timer_countdown: u32,
}

impl<'a> MainLoop<'a> {
    pub fn new(settings: LoopSettings, abort: AbortFlag, mailbox: &'a mut MailboxReceiver) -> Self {
        Self {
            settings,
            abort,
            mailbox,
            store: None,
            quit_message: "Shutting down".to_string(),
            timer_countdown: 0,
        }
    }

    pub fn with_config_store(mut self, store: &'a dyn ConfigStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Reason sent with QUIT when none was supplied
    pub fn with_quit_message(mut self, message: impl Into<String>) -> Self {
        self.quit_message = message.into();
        self
    }

    #[tracing::instrument(skip_all)]
    pub async fn run<T: Transport + ?Sized>(
        &mut self,
        connection: &mut Connection<'_, T>,
        plugins: &mut PluginCollection,
        parser: &mut dyn Parser,
    ) -> TerminationReason {
        loop {
            if self.abort.is_set() {
                let quit = format!("QUIT :{}", self.quit_message);
                connection.send_immediate(&quit).await.or_warn("sending QUIT on abort");
                return TerminationReason::Aborted;
            }

            let line = match self.read(connection).await {
                ReadOutcome::Line(line) => Some(line),
                ReadOutcome::Empty => None,
                ReadOutcome::Closed(e) => {
                    tracing::warn!("Connection lost: {}", e);
                    return TerminationReason::Disconnected(e);
                }
            };

            self.housekeeping(plugins);

            if let Some(line) = line {
                tracing::trace!("<-- {}", line);
                match parser.to_event(&line) {
                    Ok(event) => plugins.dispatch(&event),
                    Err(e) => tracing::warn!(line = %e.line, "Could not parse line: {}", e.message),
                }
            }

            match self.drain(connection, plugins).await {
                Ok(DrainOutcome::Continue) => {}
                Ok(DrainOutcome::Quit) => return TerminationReason::Quit,
                Ok(DrainOutcome::Reconnect) => return TerminationReason::Reconnect,
                Err(e) => {
                    tracing::warn!("Send failed: {}", e);
                    return TerminationReason::Disconnected(e);
                }
            }
        }
    }

    /// Wait up to the receive timeout for a line, in slices so that an abort
    /// is noticed promptly. Throttled lines are sent as the bucket permits.
    async fn read<T: Transport + ?Sized>(&self, connection: &mut Connection<'_, T>) -> ReadOutcome {
        let deadline = Instant::now().checked_add(self.settings.receive_timeout());

        loop {
            if let Err(e) = connection.flush_ready().await {
                return ReadOutcome::Closed(e);
            }

            let now = Instant::now();
            let mut slice = SLEEP_SLICE;
            if let Some(deadline) = deadline {
                if now >= deadline {
                    return ReadOutcome::Empty;
                }
                slice = slice.min(deadline - now);
            }
            if self.abort.is_set() {
                return ReadOutcome::Empty;
            }
            if let Some(wait) = connection.throttle_wait() {
                slice = slice.min(wait);
            }

            match connection.read_line(slice).await {
                ReadOutcome::Empty => continue,
                outcome => return outcome,
            }
        }
    }

    /// Run due timers every few passes, sooner if a deadline is close
    fn housekeeping(&mut self, plugins: &mut PluginCollection) {
        if self.timer_countdown > 0 {
            self.timer_countdown -= 1;
            return;
        }

        let now = now();
        let next = plugins.run_due_timers(now);
        self.timer_countdown = self.countdown_after_check(next, now);
        tracing::trace!(countdown = self.timer_countdown, "Checked timers");
    }

    /// Passes to skip before the next timer check, given the earliest pending deadline
    fn countdown_after_check(&self, next_deadline: Option<i64>, now: i64) -> u32 {
        let skip = self.settings.timer_check_passes.max(1) - 1;
        let Some(deadline) = next_deadline else {
            return skip;
        };

        let millis = u64::try_from(deadline.saturating_sub(now).max(0))
            .unwrap_or(u64::MAX)
            .saturating_mul(1000);
        let pass_millis = u64::try_from(self.settings.receive_timeout().as_millis()).unwrap_or(u64::MAX);
        let passes = u32::try_from(millis.div_ceil(pass_millis)).unwrap_or(u32::MAX);
        skip.min(passes.saturating_sub(1))
    }

    /// Handle queued control messages until the queue is empty, the loop must
    /// stop, or the per-pass cap is reached.
    pub async fn drain<T: Transport + ?Sized>(
        &mut self,
        connection: &mut Connection<'_, T>,
        plugins: &mut PluginCollection,
    ) -> Result<DrainOutcome, TransportError> {
        for _ in 0..self.settings.message_cap.max(1) {
            let Some(message) = self.mailbox.try_recv() else {
                break;
            };

            tracing::trace!(?message, "Handling control message");
            let outcome = self.handle_message(message, connection, plugins).await?;
            if outcome != DrainOutcome::Continue {
                return Ok(outcome);
            }
        }
        Ok(DrainOutcome::Continue)
    }

    async fn handle_message<T: Transport + ?Sized>(
        &mut self,
        message: ControlMessage,
        connection: &mut Connection<'_, T>,
        plugins: &mut PluginCollection,
    ) -> Result<DrainOutcome, TransportError> {
        match message {
            ControlMessage::SendLine(line) => {
                tracing::info!("--> {}", line);
                connection.send_throttled(line).await?;
            }
            ControlMessage::QuietLine(line) => {
                connection.send_throttled(line).await?;
            }
            ControlMessage::ImmediateLine(line) => {
                tracing::info!("--> {}", line);
                connection.send_immediate(&line).await?;
            }
            ControlMessage::Pong(token) => {
                let line = format!("PONG :{}", token);
                tracing::debug!("--> {}", line);
                connection.send_immediate(&line).await?;
            }
            ControlMessage::Quit(reason) => {
                let reason = reason.unwrap_or_else(|| self.quit_message.clone());
                tracing::info!("Quitting: {}", reason);
                connection
                    .send_immediate(&format!("QUIT :{}", reason))
                    .await
                    .or_warn("sending QUIT");
                return Ok(DrainOutcome::Quit);
            }
            ControlMessage::Reconnect(reason) => {
                let reason = reason.unwrap_or_else(|| "Reconnecting".to_string());
                tracing::info!("Reconnecting: {}", reason);
                connection
                    .send_immediate(&format!("QUIT :{}", reason))
                    .await
                    .or_warn("sending QUIT before reconnect");
                return Ok(DrainOutcome::Reconnect);
            }
            ControlMessage::Save => match self.store {
                Some(store) => store
                    .write_configuration(plugins)
                    .or_warn("saving configuration"),
                None => tracing::warn!("Save requested but no configuration store is set"),
            },
            ControlMessage::Reload(name) => plugins.reload(name.as_deref()),
            ControlMessage::PeekPlugins { requester } => plugins.deliver_snapshot(&requester),
            ControlMessage::BusMessage { header, payload } => {
                plugins.bus_message(&header, &payload)
            }
            ControlMessage::Output { level, line } => match level {
                OutputLevel::Trace => tracing::trace!(target: "output", "{}", line),
                OutputLevel::Debug => tracing::debug!(target: "output", "{}", line),
                OutputLevel::Info => tracing::info!(target: "output", "{}", line),
                OutputLevel::Warning => tracing::warn!(target: "output", "{}", line),
                OutputLevel::Error => tracing::error!(target: "output", "{}", line),
            },
        }
        Ok(DrainOutcome::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{mailbox, DeferredTasks, Event, Plugin, PluginResult, Resumption};
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    struct Timers(DeferredTasks);

    impl Plugin for Timers {
        fn name(&self) -> &str {
            "timers"
        }
        fn deferred(&self) -> &DeferredTasks {
            &self.0
        }
        fn deferred_mut(&mut self) -> &mut DeferredTasks {
            &mut self.0
        }
        fn on_event(&mut self, _event: &Event) -> PluginResult {
            Ok(())
        }
    }

    fn counting_timer(fired: &Arc<AtomicUsize>) -> PluginCollection {
        let fired = fired.clone();
        let mut tasks = DeferredTasks::new();
        tasks.schedule_at(0, move |_| {
            fired.fetch_add(1, Ordering::SeqCst);
            Ok(Resumption::Completed)
        });
        [Box::new(Timers(tasks)) as Box<dyn Plugin>].into_iter().collect()
    }

    #[test]
    fn timers_checked_once_every_few_passes() {
        let (_sender, mut receiver) = mailbox();
        let mut main_loop = MainLoop::new(LoopSettings::default(), AbortFlag::new(), &mut receiver);

        // The first pass checks timers and finds none
        main_loop.housekeeping(&mut PluginCollection::new());

        let fired = Arc::new(AtomicUsize::new(0));
        let mut plugins = counting_timer(&fired);

        for _ in 0..4 {
            main_loop.housekeeping(&mut plugins);
            assert_eq!(fired.load(Ordering::SeqCst), 0);
        }
        main_loop.housekeeping(&mut plugins);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn every_pass_checks_when_configured() {
        let settings = LoopSettings {
            timer_check_passes: 1,
            ..Default::default()
        };
        let (_sender, mut receiver) = mailbox();
        let mut main_loop = MainLoop::new(settings, AbortFlag::new(), &mut receiver);

        main_loop.housekeeping(&mut PluginCollection::new());

        let fired = Arc::new(AtomicUsize::new(0));
        let mut plugins = counting_timer(&fired);
        main_loop.housekeeping(&mut plugins);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn near_deadline_shortens_countdown() {
        let (_sender, mut receiver) = mailbox();
        let main_loop = MainLoop::new(LoopSettings::default(), AbortFlag::new(), &mut receiver);

        assert_eq!(main_loop.countdown_after_check(None, 1000), 4);
        assert_eq!(main_loop.countdown_after_check(Some(1001), 1000), 0);
        assert_eq!(main_loop.countdown_after_check(Some(1002), 1000), 1);
        assert_eq!(main_loop.countdown_after_check(Some(1003), 1000), 2);
        assert_eq!(main_loop.countdown_after_check(Some(1060), 1000), 4);
    }

    #[test]
    fn far_deadline_does_not_overflow() {
        let (_sender, mut receiver) = mailbox();
        let main_loop = MainLoop::new(LoopSettings::default(), AbortFlag::new(), &mut receiver);

        assert_eq!(main_loop.countdown_after_check(Some(i64::MAX), 1000), 4);
        assert_eq!(main_loop.countdown_after_check(Some(i64::MAX), -1000), 4);
        assert_eq!(main_loop.countdown_after_check(Some(100_000_000_000_000_000), 1000), 4);
    }

    #[test]
    fn short_pass_counts_more_passes() {
        let settings = LoopSettings {
            receive_timeout_ms: 250,
            timer_check_passes: 10,
            ..Default::default()
        };
        let (_sender, mut receiver) = mailbox();
        let main_loop = MainLoop::new(settings, AbortFlag::new(), &mut receiver);

        // Two seconds is eight passes of 250ms
        assert_eq!(main_loop.countdown_after_check(Some(1002), 1000), 7);
    }

    #[test]
    fn settings_defaults() {
        let settings = LoopSettings::default();
        assert_eq!(settings.receive_timeout(), Duration::from_secs(1));
        assert_eq!(settings.timer_check_passes, 5);
        assert_eq!(settings.message_cap, 5);
    }

    #[test]
    fn zero_timeout_is_clamped() {
        let settings = LoopSettings {
            receive_timeout_ms: 0,
            ..Default::default()
        };
        assert_eq!(settings.receive_timeout(), Duration::from_millis(1));
    }
}
