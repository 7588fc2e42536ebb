//! Single-shot timers delivered to the owning event loop.
//!
//! Timers never call back into fabric state directly. An expired timer
//! yields a [`TimerEvent`] that the loop owning the state hands to it, so
//! timer handling never runs concurrently with table mutation.

use std::collections::HashMap;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{Result, TimerError};

/// Timers fabric state arms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerEvent {
    /// The message counter sync response period ended.
    MsgCounterSyncTimeout,
}

/// Arms and cancels single-shot timers.
///
/// Arming an event that is already armed restarts it.
pub trait TimerService {
    fn start_timer(&mut self, after: Duration, event: TimerEvent) -> Result<()>;

    /// Disarm `event`; a no-op if it is not armed.
    fn cancel_timer(&mut self, event: TimerEvent);
}

/// Timer driven by hand, for deterministic tests and hosts with their own clock.
#[derive(Debug, Default)]
pub struct ManualTimer {
    armed: Vec<(TimerEvent, Duration)>,
}

impl ManualTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_armed(&self, event: TimerEvent) -> bool {
        self.armed.iter().any(|(e, _)| *e == event)
    }

    /// Duration `event` was last armed with.
    pub fn armed_duration(&self, event: TimerEvent) -> Option<Duration> {
        self.armed.iter().find(|(e, _)| *e == event).map(|(_, d)| *d)
    }

    /// Expire `event`. Returns false if it was not armed.
    pub fn fire(&mut self, event: TimerEvent) -> bool {
        let before = self.armed.len();
        self.armed.retain(|(e, _)| *e != event);
        self.armed.len() != before
    }
}

impl TimerService for ManualTimer {
    fn start_timer(&mut self, after: Duration, event: TimerEvent) -> Result<()> {
        self.cancel_timer(event);
        self.armed.push((event, after));
        Ok(())
    }

    fn cancel_timer(&mut self, event: TimerEvent) {
        self.armed.retain(|(e, _)| *e != event);
    }
}

/// Timer backed by tokio; expired events arrive on an unbounded channel.
pub struct TokioTimer {
    handle: Handle,
    events: mpsc::UnboundedSender<TimerEvent>,
    tasks: HashMap<TimerEvent, JoinHandle<()>>,
}

impl TokioTimer {
    /// Create a timer on the current runtime, with the receiver of its events.
    pub fn new() -> Result<(Self, mpsc::UnboundedReceiver<TimerEvent>)> {
        let handle = Handle::try_current().map_err(|_| TimerError::NoRuntime)?;
        let (events, rx) = mpsc::unbounded_channel();
        Ok((Self { handle, events, tasks: HashMap::new() }, rx))
    }

    pub fn is_armed(&self, event: TimerEvent) -> bool {
        self.tasks.get(&event).map_or(false, |t| !t.is_finished())
    }
}

impl TimerService for TokioTimer {
    fn start_timer(&mut self, after: Duration, event: TimerEvent) -> Result<()> {
        if self.events.is_closed() {
            return Err(TimerError::Closed);
        }
        self.cancel_timer(event);
        let events = self.events.clone();
        let task = self.handle.spawn(async move {
            tokio::time::sleep(after).await;
            // Fails only once the receiver is gone.
            let _ = events.send(event);
        });
        self.tasks.insert(event, task);
        Ok(())
    }

    fn cancel_timer(&mut self, event: TimerEvent) {
        if let Some(task) = self.tasks.remove(&event) {
            task.abort();
        }
    }
}

impl Drop for TokioTimer {
    fn drop(&mut self) {
        for (_, task) in self.tasks.drain() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for TokioTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokioTimer").field("armed", &self.tasks.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EVENT: TimerEvent = TimerEvent::MsgCounterSyncTimeout;

    #[test]
    fn test_manual_timer() {
        let mut timer = ManualTimer::new();
        assert!(!timer.fire(EVENT));

        timer.start_timer(Duration::from_millis(5), EVENT).unwrap();
        timer.start_timer(Duration::from_millis(7), EVENT).unwrap();
        assert_eq!(timer.armed_duration(EVENT), Some(Duration::from_millis(7)));

        assert!(timer.fire(EVENT));
        assert!(!timer.is_armed(EVENT));

        timer.start_timer(Duration::from_millis(5), EVENT).unwrap();
        timer.cancel_timer(EVENT);
        assert!(!timer.fire(EVENT));
    }

    #[test]
    fn test_tokio_timer_needs_runtime() {
        assert_eq!(TokioTimer::new().err(), Some(TimerError::NoRuntime));
    }

    #[tokio::test]
    async fn test_tokio_timer_delivers_event() {
        let (mut timer, mut rx) = TokioTimer::new().unwrap();
        timer.start_timer(Duration::from_millis(10), EVENT).unwrap();
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
        assert_eq!(event, Some(EVENT));
    }

    #[tokio::test]
    async fn test_tokio_timer_cancel() {
        let (mut timer, mut rx) = TokioTimer::new().unwrap();
        timer.start_timer(Duration::from_millis(20), EVENT).unwrap();
        assert!(timer.is_armed(EVENT));
        timer.cancel_timer(EVENT);
        let waited = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn test_tokio_timer_closed_receiver() {
        let (mut timer, rx) = TokioTimer::new().unwrap();
        drop(rx);
        assert_eq!(timer.start_timer(Duration::from_millis(1), EVENT), Err(TimerError::Closed));
    }
}
