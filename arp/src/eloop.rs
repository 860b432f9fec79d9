//! Timer and readiness seam, plus a simple single-threaded implementation

use std::time::Duration;

use tokio::time::Instant;

use crate::capture::CaptureHandle;
use crate::state::ProbeId;

/// A scheduled step of a probe state's sequence.
///
/// The event loop holds these and hands them back to
/// [`Arp::handle_timer`](crate::Arp::handle_timer) when they fall due.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArpTimer {
    /// Send the next probe
    Probe(ProbeId),
    /// Probing finished without conflict
    Probed(ProbeId),
    /// Send the next announcement
    Announce(ProbeId),
    /// Announcing finished
    Announced(ProbeId),
}

impl ArpTimer {
    pub fn id(&self) -> ProbeId {
        match *self {
            ArpTimer::Probe(id)
            | ArpTimer::Probed(id)
            | ArpTimer::Announce(id)
            | ArpTimer::Announced(id) => id,
        }
    }
}

/// Event loop facility used by the engine
pub trait EventLoop {
    /// Watch `handle` for readability on behalf of interface `ifname`.
    fn add_reader(&mut self, handle: CaptureHandle, ifname: &str);

    fn remove_reader(&mut self, handle: CaptureHandle);

    /// Fire `timer` once after `delay`.
    fn add_timeout(&mut self, delay: Duration, timer: ArpTimer);

    /// Drop every pending timer for `id`. Must be a no-op if there are none.
    fn cancel_timeouts(&mut self, id: ProbeId);
}

#[derive(Debug)]
struct Timeout {
    deadline: Instant,
    timer: ArpTimer,
}

/// Pending timers ordered by deadline, and the set of watched handles.
///
/// Uses tokio's clock so it can be driven with `sleep_until` and tested with
/// a paused runtime.
#[derive(Debug, Default)]
pub struct TimerQueue {
    timeouts: Vec<Timeout>,
    readers: Vec<(CaptureHandle, String)>,
    registrations: u64,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deadline of the earliest pending timer
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timeouts.first().map(|t| t.deadline)
    }

    /// Remove and return the earliest timer due at or before `now`.
    pub fn pop_expired(&mut self, now: Instant) -> Option<ArpTimer> {
        match self.timeouts.first() {
            Some(t) if t.deadline <= now => Some(self.timeouts.remove(0).timer),
            _ => None,
        }
    }

    pub fn pending(&self) -> usize {
        self.timeouts.len()
    }

    /// Watched handles and the interface each one belongs to
    pub fn readers(&self) -> impl Iterator<Item = (CaptureHandle, &str)> {
        self.readers.iter().map(|(h, name)| (*h, name.as_str()))
    }

    /// Number of `add_reader` calls so far.
    ///
    /// A reopened capture can come back with the same handle number, so
    /// callers watching the handles outside this queue compare this count to
    /// know when to register again.
    pub fn registrations(&self) -> u64 {
        self.registrations
    }
}

impl EventLoop for TimerQueue {
    fn add_reader(&mut self, handle: CaptureHandle, ifname: &str) {
        self.remove_reader(handle);
        self.readers.push((handle, ifname.to_string()));
        self.registrations += 1;
    }

    fn remove_reader(&mut self, handle: CaptureHandle) {
        self.readers.retain(|(h, _)| *h != handle);
    }

    fn add_timeout(&mut self, delay: Duration, timer: ArpTimer) {
        let deadline = Instant::now() + delay;
        let pos = self
            .timeouts
            .iter()
            .position(|t| t.deadline > deadline)
            .unwrap_or(self.timeouts.len());
        self.timeouts.insert(pos, Timeout { deadline, timer });
    }

    fn cancel_timeouts(&mut self, id: ProbeId) {
        self.timeouts.retain(|t| t.timer.id() != id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn fires_in_deadline_order() {
        let mut queue = TimerQueue::new();
        queue.add_timeout(Duration::from_secs(2), ArpTimer::Announce(ProbeId(1)));
        queue.add_timeout(Duration::from_secs(1), ArpTimer::Probe(ProbeId(2)));
        queue.add_timeout(Duration::from_secs(2), ArpTimer::Probed(ProbeId(3)));

        assert_eq!(queue.pop_expired(Instant::now()), None);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(queue.pop_expired(Instant::now()), Some(ArpTimer::Probe(ProbeId(2))));
        assert_eq!(queue.pop_expired(Instant::now()), None);

        tokio::time::advance(Duration::from_secs(1)).await;
        // Equal deadlines keep insertion order.
        assert_eq!(queue.pop_expired(Instant::now()), Some(ArpTimer::Announce(ProbeId(1))));
        assert_eq!(queue.pop_expired(Instant::now()), Some(ArpTimer::Probed(ProbeId(3))));
        assert_eq!(queue.next_deadline(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_is_idempotent() {
        let mut queue = TimerQueue::new();
        queue.add_timeout(Duration::from_secs(1), ArpTimer::Probe(ProbeId(7)));
        queue.add_timeout(Duration::from_secs(3), ArpTimer::Probed(ProbeId(7)));
        queue.add_timeout(Duration::from_secs(2), ArpTimer::Announce(ProbeId(8)));

        queue.cancel_timeouts(ProbeId(7));
        queue.cancel_timeouts(ProbeId(7));
        queue.cancel_timeouts(ProbeId(99));
        assert_eq!(queue.pending(), 1);
        assert_eq!(queue.next_deadline(), Some(Instant::now() + Duration::from_secs(2)));
    }

    #[test]
    fn readers_are_tracked_per_handle() {
        let mut queue = TimerQueue::new();
        queue.add_reader(CaptureHandle(5), "eth0");
        queue.add_reader(CaptureHandle(6), "wlan0");
        queue.add_reader(CaptureHandle(5), "eth0");
        assert_eq!(queue.readers().count(), 2);

        queue.remove_reader(CaptureHandle(5));
        let readers: Vec<_> = queue.readers().collect();
        assert_eq!(readers, vec![(CaptureHandle(6), "wlan0")]);
    }

    #[test]
    fn reused_handle_counts_as_new_registration() {
        let mut queue = TimerQueue::new();
        assert_eq!(queue.registrations(), 0);
        queue.add_reader(CaptureHandle(5), "eth0");
        let first = queue.registrations();

        queue.remove_reader(CaptureHandle(5));
        assert_eq!(queue.registrations(), first);
        queue.add_reader(CaptureHandle(5), "eth0");
        assert_eq!(queue.registrations(), first + 1);
        assert_eq!(queue.readers().collect::<Vec<_>>(), vec![(CaptureHandle(5), "eth0")]);
    }
}
