//! Per-plugin registry of suspended continuations.
//!
//! A continuation is filed either under a UNIX timestamp or under an
//! [`EventType`]. When its trigger arrives it is resumed, and what it returns
//! decides whether, and where, it is filed again.

use crate::{Event, EventType, PluginError};
use std::{
    collections::HashMap,
    panic::{catch_unwind, AssertUnwindSafe},
};

pub type TaskId = u64;

/// What woke a continuation
#[derive(Debug, Clone, Copy)]
pub enum Trigger<'a> {
    /// A time-scheduled task came due; carries the current time
    Time(i64),
    /// An event of the awaited type arrived
    Event(&'a Event),
}

/// The state a continuation is left in after being resumed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resumption {
    /// Finished; drop it
    Completed,
    /// Keep waiting for the same event type. Time-scheduled tasks never
    /// fire twice, so for those this is the same as `Completed`.
    Suspended,
    /// Wait for a (possibly different) event type
    AwaitEvent(EventType),
    /// Run again at the given timestamp
    RescheduleAt(i64),
}

/// A resumable piece of plugin logic
pub trait Continuation: Send {
    fn resume(&mut self, trigger: Trigger<'_>) -> Result<Resumption, PluginError>;
}

impl<F> Continuation for F
where
    F: FnMut(Trigger<'_>) -> Result<Resumption, PluginError> + Send,
{
    fn resume(&mut self, trigger: Trigger<'_>) -> Result<Resumption, PluginError> {
        self(trigger)
    }
}

struct TimedTask {
    id: TaskId,
    at: i64,
    continuation: Box<dyn Continuation>,
}

struct EventTask {
    id: TaskId,
    continuation: Box<dyn Continuation>,
}

/// Both registries belonging to one plugin
#[derive(Default)]
pub struct DeferredTasks {
    timed: Vec<TimedTask>,
    awaiting: HashMap<EventType, Vec<EventTask>>,
    next_id: TaskId,
}

/// Resume one continuation, turning an error or a panic into `None`
fn resume_guarded(
    owner: &str,
    id: TaskId,
    continuation: &mut dyn Continuation,
    trigger: Trigger<'_>,
) -> Option<Resumption> {
    match catch_unwind(AssertUnwindSafe(|| continuation.resume(trigger))) {
        Ok(Ok(resumption)) => Some(resumption),
        Ok(Err(e)) => {
            tracing::error!(plugin = owner, task = id, "Deferred task failed: {}", e);
            None
        }
        Err(_) => {
            tracing::error!(plugin = owner, task = id, "Deferred task panicked");
            None
        }
    }
}

impl DeferredTasks {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&mut self) -> TaskId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Schedule `f` to run once, at or after the UNIX timestamp `at`
    pub fn schedule_at<F>(&mut self, at: i64, f: F) -> TaskId
    where
        F: FnMut(Trigger<'_>) -> Result<Resumption, PluginError> + Send + 'static,
    {
        self.schedule_continuation_at(at, Box::new(f))
    }

    /// Schedule `f` to run when the next event of type `event_type` arrives
    pub fn schedule_on<F>(&mut self, event_type: EventType, f: F) -> TaskId
    where
        F: FnMut(Trigger<'_>) -> Result<Resumption, PluginError> + Send + 'static,
    {
        self.schedule_continuation_on(event_type, Box::new(f))
    }

    pub fn schedule_continuation_at(
        &mut self,
        at: i64,
        continuation: Box<dyn Continuation>,
    ) -> TaskId {
        let id = self.allocate_id();
        self.timed.push(TimedTask {
            id,
            at,
            continuation,
        });
        id
    }

    pub fn schedule_continuation_on(
        &mut self,
        event_type: EventType,
        continuation: Box<dyn Continuation>,
    ) -> TaskId {
        let id = self.allocate_id();
        self.awaiting
            .entry(event_type)
            .or_default()
            .push(EventTask { id, continuation });
        id
    }

    pub fn timed_len(&self) -> usize {
        self.timed.len()
    }

    /// Number of continuations waiting on `event_type`
    pub fn awaiting_len(&self, event_type: EventType) -> usize {
        self.awaiting.get(&event_type).map_or(0, Vec::len)
    }

    /// Event types with at least one waiting continuation, in a stable order
    pub fn awaited_events(&self) -> Vec<EventType> {
        let mut types: Vec<_> = self
            .awaiting
            .iter()
            .filter(|(_, tasks)| !tasks.is_empty())
            .map(|(t, _)| *t)
            .collect();
        types.sort();
        types
    }

    pub fn is_empty(&self) -> bool {
        self.timed.is_empty() && self.awaiting.values().all(Vec::is_empty)
    }

    /// The earliest pending trigger timestamp, if any task is time-scheduled
    pub fn next_deadline(&self) -> Option<i64> {
        self.timed.iter().map(|t| t.at).min()
    }

    fn refile(
        &mut self,
        id: TaskId,
        continuation: Box<dyn Continuation>,
        resumption: Resumption,
        current: Option<EventType>,
    ) {
        match resumption {
            Resumption::RescheduleAt(at) => self.timed.push(TimedTask {
                id,
                at,
                continuation,
            }),
            Resumption::AwaitEvent(event_type) => self
                .awaiting
                .entry(event_type)
                .or_default()
                .push(EventTask { id, continuation }),
            Resumption::Suspended => {
                if let Some(event_type) = current {
                    self.awaiting
                        .entry(event_type)
                        .or_default()
                        .push(EventTask { id, continuation });
                }
            }
            Resumption::Completed => {}
        }
    }

    /// Resume every time-scheduled task due at `now`, removing each one that fired.
    ///
    /// Returns the earliest deadline still pending afterwards.
    pub fn run_due(&mut self, owner: &str, now: i64) -> Option<i64> {
        let (due, pending): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.timed).into_iter().partition(|t| t.at <= now);
        self.timed = pending;

        for mut task in due {
            tracing::trace!(plugin = owner, task = task.id, "Running timed task");
            let trigger = Trigger::Time(now);
            if let Some(resumption) =
                resume_guarded(owner, task.id, task.continuation.as_mut(), trigger)
            {
                self.refile(task.id, task.continuation, resumption, None);
            }
        }

        self.next_deadline()
    }

    /// Resume every task waiting on the type of `event`.
    ///
    /// Tasks that suspend again stay filed; those that complete or fail are dropped.
    pub fn run_matching(&mut self, owner: &str, event: &Event) {
        let Some(tasks) = self.awaiting.remove(&event.event_type) else {
            return;
        };

        for mut task in tasks {
            tracing::trace!(
                plugin = owner,
                task = task.id,
                event = ?event.event_type,
                "Resuming awaiting task"
            );
            let trigger = Trigger::Event(event);
            if let Some(resumption) =
                resume_guarded(owner, task.id, task.continuation.as_mut(), trigger)
            {
                self.refile(task.id, task.continuation, resumption, Some(event.event_type));
            }
        }

        if self.awaiting.get(&event.event_type).is_some_and(Vec::is_empty) {
            self.awaiting.remove(&event.event_type);
        }
    }

    /// Drop every pending task
    pub fn clear(&mut self) {
        self.timed.clear();
        self.awaiting.clear();
    }
}

impl std::fmt::Debug for DeferredTasks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredTasks")
            .field("timed", &self.timed.len())
            .field("awaited_events", &self.awaited_events())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    fn counter() -> (Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let c = Arc::new(AtomicUsize::new(0));
        (c.clone(), c)
    }

    #[test]
    fn timer_fires_once_and_not_early() {
        let mut tasks = DeferredTasks::new();
        let (count, inner) = counter();

        tasks.schedule_at(100, move |_| {
            inner.fetch_add(1, Ordering::SeqCst);
            Ok(Resumption::Completed)
        });

        assert_eq!(tasks.run_due("test", 99), Some(100));
        assert_eq!(count.load(Ordering::SeqCst), 0);

        assert_eq!(tasks.run_due("test", 100), None);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(tasks.timed_len(), 0);

        tasks.run_due("test", 200);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn suspended_timer_is_still_removed() {
        let mut tasks = DeferredTasks::new();
        tasks.schedule_at(10, |_| Ok(Resumption::Suspended));

        tasks.run_due("test", 10);
        assert!(tasks.is_empty());
    }

    #[test]
    fn timer_can_reschedule_itself() {
        let mut tasks = DeferredTasks::new();
        let (count, inner) = counter();

        tasks.schedule_at(10, move |trigger| {
            inner.fetch_add(1, Ordering::SeqCst);
            match trigger {
                Trigger::Time(now) if now < 30 => Ok(Resumption::RescheduleAt(now + 10)),
                _ => Ok(Resumption::Completed),
            }
        });

        assert_eq!(tasks.run_due("test", 10), Some(20));
        assert_eq!(tasks.run_due("test", 20), Some(30));
        assert_eq!(tasks.run_due("test", 30), None);
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn failing_timer_is_removed_without_affecting_others() {
        let mut tasks = DeferredTasks::new();
        let (count, inner) = counter();

        tasks.schedule_at(5, |_| Err(PluginError::from("broken")));
        tasks.schedule_at(5, |_| panic!("worse"));
        tasks.schedule_at(5, move |_| {
            inner.fetch_add(1, Ordering::SeqCst);
            Ok(Resumption::Completed)
        });

        tasks.run_due("test", 5);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(tasks.is_empty());
    }

    #[test]
    fn event_task_suspends_and_completes() {
        let mut tasks = DeferredTasks::new();
        let (count, inner) = counter();

        tasks.schedule_on(EventType::Privmsg, move |trigger| {
            let Trigger::Event(event) = trigger else {
                return Err("expected an event".into());
            };
            inner.fetch_add(1, Ordering::SeqCst);
            if event.content == "done" {
                Ok(Resumption::Completed)
            } else {
                Ok(Resumption::Suspended)
            }
        });

        let ping = Event::new(EventType::Ping, "PING :x");
        tasks.run_matching("test", &ping);
        assert_eq!(count.load(Ordering::SeqCst), 0);

        let msg = Event::new(EventType::Privmsg, "").with_content("not yet");
        tasks.run_matching("test", &msg);
        tasks.run_matching("test", &msg);
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(tasks.awaiting_len(EventType::Privmsg), 1);

        let done = Event::new(EventType::Privmsg, "").with_content("done");
        tasks.run_matching("test", &done);
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert!(tasks.is_empty());
    }

    #[test]
    fn event_task_refiles_under_new_type() {
        let mut tasks = DeferredTasks::new();

        tasks.schedule_on(EventType::Welcome, |trigger| match trigger {
            Trigger::Event(e) if e.event_type == EventType::Welcome => {
                Ok(Resumption::AwaitEvent(EventType::Join))
            }
            _ => Ok(Resumption::Completed),
        });

        tasks.run_matching("test", &Event::new(EventType::Welcome, ""));
        assert_eq!(tasks.awaited_events(), vec![EventType::Join]);

        tasks.run_matching("test", &Event::new(EventType::Join, ""));
        assert!(tasks.is_empty());
    }

    #[test]
    fn resumed_task_is_not_run_twice_per_event() {
        let mut tasks = DeferredTasks::new();
        let (count, inner) = counter();

        tasks.schedule_on(EventType::Ping, move |_| {
            inner.fetch_add(1, Ordering::SeqCst);
            Ok(Resumption::AwaitEvent(EventType::Ping))
        });

        tasks.run_matching("test", &Event::new(EventType::Ping, ""));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(tasks.awaiting_len(EventType::Ping), 1);
    }

    #[test]
    fn event_task_can_become_timed() {
        let mut tasks = DeferredTasks::new();
        tasks.schedule_on(EventType::Join, |_| Ok(Resumption::RescheduleAt(50)));

        tasks.run_matching("test", &Event::new(EventType::Join, ""));
        assert_eq!(tasks.next_deadline(), Some(50));
        assert!(tasks.awaited_events().is_empty());
    }
}
