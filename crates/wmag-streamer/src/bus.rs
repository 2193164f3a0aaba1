// crates/wmag-streamer/src/bus.rs
// ============================================================================
// Module: Run Bus
// Description: The per-run live event buffer: a single producer (the
// pipeline, via `publish`) and many consumers (subscribers), each with its
// own bounded channel so a slow subscriber cannot block the pipeline.
// Grounded on: SPEC_FULL.md §4.7 — "one bounded per-run channel ... a
// Mutex<Vec<Sender<Event>>> of per-subscriber bounded mpsc channels to get
// per-subscriber backpressure/drop semantics rather than broadcast's
// lag-count semantics."
// ============================================================================

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use tokio::sync::mpsc;
use tracing::warn;
use wmag_core::identifiers::RunId;
use wmag_core::model::event::Event;

/// Opaque handle identifying one subscriber within a run's bus entry, used
/// to remove it on disconnect without scanning by channel identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

struct Subscriber {
    id: SubscriberId,
    sender: mpsc::Sender<Event>,
}

/// Registry of per-run live subscriber channels.
///
/// # Invariants
/// - `publish` never blocks: a subscriber whose channel is full (it has
///   fallen behind the watermark set by the channel's bounded capacity) is
///   dropped rather than backpressuring the pipeline.
pub struct RunBus {
    runs: Mutex<HashMap<RunId, Vec<Subscriber>>>,
    next_id: AtomicU64,
    capacity: usize,
}

impl RunBus {
    /// Creates a bus whose per-subscriber channels hold up to `capacity`
    /// buffered events before that subscriber is dropped.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self { runs: Mutex::new(HashMap::new()), next_id: AtomicU64::new(1), capacity }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<RunId, Vec<Subscriber>>> {
        self.runs.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Registers a new live subscriber for `run_id`, returning its id (for
    /// later [`RunBus::unsubscribe`]) and the receiving half of its channel.
    pub fn subscribe(&self, run_id: RunId) -> (SubscriberId, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(self.capacity);
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().entry(run_id).or_default().push(Subscriber { id, sender: tx });
        (id, rx)
    }

    /// Removes a subscriber, e.g. on client disconnect. A no-op if the
    /// subscriber is already gone.
    pub fn unsubscribe(&self, run_id: &RunId, id: SubscriberId) {
        if let Some(subs) = self.lock().get_mut(run_id) {
            subs.retain(|s| s.id != id);
        }
    }

    /// Publishes `event` to every live subscriber of its run. A subscriber
    /// whose channel is full is dropped rather than awaited.
    pub fn publish(&self, event: Event) {
        let run_id = event.run_id.clone();
        let mut runs = self.lock();
        let Some(subs) = runs.get_mut(&run_id) else { return };
        subs.retain(|sub| match sub.sender.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(run_id = %run_id, "subscriber fell behind watermark, dropping");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
        if subs.is_empty() {
            runs.remove(&run_id);
        }
    }
}

impl Default for RunBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]
mod tests {
    use wmag_core::hashing::hash_bytes;
    use wmag_core::identifiers::Kid;
    use wmag_core::identifiers::Seq;
    use wmag_core::model::event::EventPayload;
    use wmag_core::model::run::RunPhase;
    use wmag_core::time::Timestamp;

    use super::*;

    fn event(run_id: &str, seq: u64) -> Event {
        Event {
            run_id: RunId::new(run_id),
            seq: Seq::new(seq),
            recorded_at: Timestamp::from_millis(0),
            payload: EventPayload::StatusUpdate { phase: RunPhase::ExecuteSteps, detail: None },
            prev_hash: None,
            hash: hash_bytes(b"x"),
            signed_by: Kid::new("k1"),
        }
    }

    #[tokio::test]
    async fn publish_delivers_to_live_subscriber() {
        let bus = RunBus::new(4);
        let (_, mut rx) = bus.subscribe(RunId::new("r1"));
        bus.publish(event("r1", 1));
        let received = rx.recv().await.expect("event");
        assert_eq!(received.seq, Seq::new(1));
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let bus = RunBus::new(4);
        let (id, mut rx) = bus.subscribe(RunId::new("r1"));
        bus.unsubscribe(&RunId::new("r1"), id);
        bus.publish(event("r1", 1));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn full_channel_drops_the_slow_subscriber_instead_of_blocking() {
        let bus = RunBus::new(1);
        let (_, mut rx) = bus.subscribe(RunId::new("r1"));
        bus.publish(event("r1", 1));
        bus.publish(event("r1", 2)); // channel full, subscriber dropped
        bus.publish(event("r1", 3)); // no subscribers left, a no-op
        let first = rx.recv().await.expect("first event still buffered");
        assert_eq!(first.seq, Seq::new(1));
        assert!(rx.recv().await.is_none(), "dropped subscriber's channel closes");
    }
}
