use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::Serialize;
use tw_queue::AckNack;

/// Counters for one (queue, slot) consumer.
#[derive(Debug)]
pub struct SlotStats {
    queue: String,
    slot: usize,
    received: AtomicU64,
    acked: AtomicU64,
    requeued: AtomicU64,
    discarded: AtomicU64,
    active: AtomicBool,
}

impl SlotStats {
    pub fn new(queue: impl Into<String>, slot: usize) -> Self {
        Self {
            queue: queue.into(),
            slot,
            received: AtomicU64::new(0),
            acked: AtomicU64::new(0),
            requeued: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
            active: AtomicBool::new(false),
        }
    }

    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
        self.active.store(true, Ordering::Relaxed);
    }

    pub fn record_settled(&self, decision: AckNack) {
        let counter = match decision {
            AckNack::Ack => &self.acked,
            AckNack::Nack { requeue: true } => &self.requeued,
            AckNack::Nack { requeue: false } => &self.discarded,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.active.store(false, Ordering::Relaxed);
        metrics::counter!("tw_tasks_total", "queue" => self.queue.clone(), "outcome" => decision.as_str())
            .increment(1);
    }

    pub fn snapshot(&self) -> SlotSnapshot {
        SlotSnapshot {
            queue: self.queue.clone(),
            slot: self.slot,
            received: self.received.load(Ordering::Relaxed),
            acked: self.acked.load(Ordering::Relaxed),
            requeued: self.requeued.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            active: self.active.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotSnapshot {
    pub queue: String,
    pub slot: usize,
    pub received: u64,
    pub acked: u64,
    pub requeued: u64,
    pub discarded: u64,
    pub active: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub running: bool,
    pub received: u64,
    pub acked: u64,
    pub requeued: u64,
    pub discarded: u64,
    pub active: usize,
    pub slots: Vec<SlotSnapshot>,
}

impl PoolStats {
    pub fn from_slots(running: bool, slots: Vec<SlotSnapshot>) -> Self {
        let mut stats = PoolStats { running, ..Default::default() };
        for s in &slots {
            stats.received += s.received;
            stats.acked += s.acked;
            stats.requeued += s.requeued;
            stats.discarded += s.discarded;
            stats.active += usize::from(s.active);
        }
        stats.slots = slots;
        stats
    }
}
