//! Shared registry of live stream buffers.
//!
//! The table maps stream identities to their reassembly state. Lookups touch
//! only the DashMap shard for the key, so frames for different streams
//! proceed in parallel; admissions for one stream serialise on that entry's
//! mutex. Lock order is always shard first, then entry, and entry locks are
//! never held across calls back into the map.

use std::sync::{Arc, Mutex, MutexGuard};

use dashmap::DashMap;
use log::warn;
use tokio::time::Instant;

use crate::{
    buffer::StreamBuffer,
    config::ReassemblyConfig,
    delivery::{FailureReason, Outbox, StreamEvent, StreamOutcome, StreamResult, Subscriber},
    id::StreamId,
};


/// A stream's buffer plus the subscribers watching it.
#[derive(Debug)]
pub(crate) struct StreamEntry {
    pub(crate) buffer: StreamBuffer,
    pub(crate) subscribers: Vec<Subscriber>,
}

impl StreamEntry {
    fn new(id: StreamId, now: Instant) -> Self {
        Self {
            buffer: StreamBuffer::new(id, now),
            subscribers: Vec::new(),
        }
    }

    /// Drop subscribers whose receiving half has gone away.
    pub(crate) fn prune_subscribers(&mut self) {
        self.subscribers
            .retain(|subscriber| !subscriber.is_closed());
    }

    /// Broadcast the closing event and release the subscriber list.
    ///
    /// A closed stream sends nothing further, so holding senders past this
    /// point would only pin receiver queues alive.
    pub(crate) fn notify_closed(&mut self, outcome: StreamOutcome, outbox: &mut Outbox) {
        self.prune_subscribers();
        outbox.broadcast(&self.subscribers, &StreamEvent::Closed(outcome));
        self.subscribers.clear();
    }
}

/// Lock a stream entry, propagating poisoning as a panic.
pub(crate) fn lock(entry: &Mutex<StreamEntry>) -> MutexGuard<'_, StreamEntry> {
    entry.lock().expect("lock poisoned")
}

/// Outcome of one garbage-collection sweep.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Streams that idled past the inactivity timeout and were failed.
    pub expired: Vec<StreamId>,
    /// Terminal streams whose results sat uncollected and were dropped.
    pub reaped: Vec<StreamId>,
}

impl SweepReport {
    /// `true` when the sweep found nothing to do.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.expired.is_empty() && self.reaped.is_empty() }
}

/// Concurrent map from [`StreamId`] to in-progress reassembly state.
#[derive(Debug, Default)]
pub struct StreamTable {
    streams: DashMap<StreamId, Arc<Mutex<StreamEntry>>>,
}

impl StreamTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Number of streams currently tracked, terminal entries included.
    #[must_use]
    pub fn len(&self) -> usize { self.streams.len() }

    /// `true` when no streams are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.streams.is_empty() }

    /// Whether the table currently tracks `id`.
    #[must_use]
    pub fn contains(&self, id: &StreamId) -> bool { self.streams.contains_key(id) }

    /// Fetch the entry for `id`, creating a fresh buffer on first sight.
    ///
    /// The boolean is `true` when this call created the entry.
    pub(crate) fn lookup_or_create(
        &self,
        id: &StreamId,
        now: Instant,
    ) -> (Arc<Mutex<StreamEntry>>, bool) {
        let mut created = false;
        let entry = self.streams.entry(id.clone()).or_insert_with(|| {
            created = true;
            Arc::new(Mutex::new(StreamEntry::new(id.clone(), now)))
        });
        (Arc::clone(entry.value()), created)
    }

    pub(crate) fn get(&self, id: &StreamId) -> Option<Arc<Mutex<StreamEntry>>> {
        self.streams.get(id).map(|entry| Arc::clone(entry.value()))
    }

    pub(crate) fn remove(&self, id: &StreamId) -> Option<Arc<Mutex<StreamEntry>>> {
        self.streams.remove(id).map(|(_, entry)| entry)
    }

    /// Remove `id` and return its result, provided the stream is terminal.
    ///
    /// Open streams are left untouched and yield `None`.
    pub(crate) fn remove_terminal(&self, id: &StreamId) -> Option<StreamResult> {
        let (_, entry) = self
            .streams
            .remove_if(id, |_, entry| lock(entry).buffer.state().is_closed())?;
        lock(&entry).buffer.result()
    }

    /// Expire idle streams and reap terminal ones nobody collected.
    ///
    /// Expiry notifications are queued on `outbox`; the caller dispatches
    /// them once no locks are held.
    pub(crate) fn sweep_expired_at(
        &self,
        config: &ReassemblyConfig,
        now: Instant,
        outbox: &mut Outbox,
    ) -> SweepReport {
        let mut report = SweepReport::default();
        for id in self.snapshot_ids() {
            let Some(entry) = self.get(&id) else { continue };
            let mut guard = lock(&entry);
            if let Some(outcome) = guard.buffer.expire_if_idle(config.inactivity_timeout, now) {
                warn!("stream {id}: expired after {:?} idle", config.inactivity_timeout);
                guard.notify_closed(outcome, outbox);
                report.expired.push(id);
            } else if guard.buffer.lingering(config.inactivity_timeout, now) {
                drop(guard);
                if self.streams.remove(&id).is_some() {
                    report.reaped.push(id);
                }
            }
        }
        report
    }

    /// Force-close every open stream with `reason`.
    ///
    /// Entries stay in the table so results remain collectable; returns how
    /// many streams this call closed.
    pub(crate) fn close_all(
        &self,
        reason: FailureReason,
        now: Instant,
        outbox: &mut Outbox,
    ) -> usize {
        let mut closed = 0;
        for id in self.snapshot_ids() {
            let Some(entry) = self.get(&id) else { continue };
            let mut guard = lock(&entry);
            if let Some(outcome) = guard.buffer.force_close(reason, now) {
                guard.notify_closed(outcome, outbox);
                closed += 1;
            }
        }
        closed
    }

    fn snapshot_ids(&self) -> Vec<StreamId> {
        self.streams.iter().map(|entry| entry.key().clone()).collect()
    }
}
