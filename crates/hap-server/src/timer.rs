//! Clock and timer queue driven by the embedding event loop.
//!
//! The server never sleeps. It registers deadlines here and the event loop
//! calls [`crate::AccessoryServer::process_timers`] once the earliest one
//! has passed.

use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Monotonic time source.
pub trait Clock {
    fn now(&self) -> Instant;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Manually advanced clock for tests and simulations.
///
/// Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Rc<Cell<Instant>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Rc::new(Cell::new(Instant::now())),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.now.get()
    }
}

/// Handle of a registered timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

/// What to do when a timer fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    /// Deliver a coalesced state update to the delegate.
    HandleUpdatedState,
    /// Run a stop requested with [`crate::AccessoryServer::stop`].
    DeferredStop,
    /// Stop a server that stayed unpaired for too long.
    UnpairedState,
    HeartBeat,
    /// Replace the dynamic setup code.
    SetupInfoRefresh,
    /// Leave NFC pairing mode.
    NfcPairingMode,
}

#[derive(Debug)]
struct Entry {
    id: TimerId,
    deadline: Instant,
    event: TimerEvent,
}

/// Pending timers ordered by deadline, then registration.
#[derive(Debug, Default)]
pub struct TimerQueue {
    entries: Vec<Entry>,
    next_id: u64,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, deadline: Instant, event: TimerEvent) -> TimerId {
        self.next_id += 1;
        let id = TimerId(self.next_id);
        // Stable among equal deadlines.
        let pos = self.entries.partition_point(|e| e.deadline <= deadline);
        self.entries.insert(pos, Entry { id, deadline, event });
        id
    }

    /// Cancel a timer. Unknown or already fired timers are ignored.
    pub fn deregister(&mut self, id: TimerId) {
        self.entries.retain(|e| e.id != id);
    }

    pub fn is_registered(&self, id: TimerId) -> bool {
        self.entries.iter().any(|e| e.id == id)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.first().map(|e| e.deadline)
    }

    /// Remove and return the earliest timer due at `now`.
    pub fn pop_expired(&mut self, now: Instant) -> Option<(TimerId, TimerEvent)> {
        match self.entries.first() {
            Some(e) if e.deadline <= now => {
                let e = self.entries.remove(0);
                Some((e.id, e.event))
            }
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod timer_queue {
        use super::*;

        #[test]
        fn fires_in_deadline_order() {
            let clock = ManualClock::new();
            let start = clock.now();
            let mut queue = TimerQueue::new();

            queue.register(start + Duration::from_secs(5), TimerEvent::HeartBeat);
            queue.register(start + Duration::from_secs(1), TimerEvent::UnpairedState);
            assert_eq!(queue.next_deadline(), Some(start + Duration::from_secs(1)));

            assert!(queue.pop_expired(start).is_none());

            clock.advance(Duration::from_secs(10));
            let (_, first) = queue.pop_expired(clock.now()).unwrap();
            let (_, second) = queue.pop_expired(clock.now()).unwrap();
            assert_eq!(first, TimerEvent::UnpairedState);
            assert_eq!(second, TimerEvent::HeartBeat);
            assert!(queue.is_empty());
        }

        #[test]
        fn equal_deadlines_fire_in_registration_order() {
            let now = Instant::now();
            let mut queue = TimerQueue::new();
            queue.register(now, TimerEvent::DeferredStop);
            queue.register(now, TimerEvent::HandleUpdatedState);

            assert_eq!(queue.pop_expired(now).unwrap().1, TimerEvent::DeferredStop);
            assert_eq!(queue.pop_expired(now).unwrap().1, TimerEvent::HandleUpdatedState);
        }

        #[test]
        fn deregister_cancels() {
            let now = Instant::now();
            let mut queue = TimerQueue::new();
            let id = queue.register(now, TimerEvent::SetupInfoRefresh);
            assert!(queue.is_registered(id));

            queue.deregister(id);
            queue.deregister(id);
            assert!(!queue.is_registered(id));
            assert!(queue.pop_expired(now).is_none());
        }
    }

    mod manual_clock {
        use super::*;

        #[test]
        fn clones_share_time() {
            let clock = ManualClock::new();
            let observer = clock.clone();
            let before = observer.now();
            clock.advance(Duration::from_secs(30));
            assert_eq!(observer.now() - before, Duration::from_secs(30));
        }
    }
}
