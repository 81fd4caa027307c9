//! WorkerPool - per-queue consumer slots with ack/requeue/discard settlement
//!
//! - One slot per (queue, index), `concurrency` slots per queue
//! - Each slot owns its consumer channel; prefetch bounds it to one unsettled message
//! - A handler runs in its own task so a panic becomes a handler failure
//! - `stop()` cancels receiving and waits for every slot to settle its current message
//! - Each `start()` gets a fresh cancellation token and tracker, so a stopped pool can restart

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use tw_common::QueuedTask;
use tw_config::WorkerConfig;
use tw_queue::{AckNack, QueueBroker, QueueConsumer, ReceivedMessage};

use crate::error::HandlerError;
use crate::handler::TaskRouter;
use crate::stats::{PoolStats, SlotStats};

const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Settlement for a handled task.
///
/// Malformed tasks are discarded outright. Other failures are requeued while
/// `retry_count < max_retries`, then discarded to the broker's dead-letter handling.
pub fn settle_decision(result: &Result<(), HandlerError>, retry_count: u32, max_retries: u32) -> AckNack {
    match result {
        Ok(()) => AckNack::Ack,
        Err(e) if e.is_malformed() => AckNack::DISCARD,
        Err(_) if retry_count < max_retries => AckNack::REQUEUE,
        Err(_) => AckNack::DISCARD,
    }
}

/// Cancellation and slot tracking for one start/stop cycle.
#[derive(Clone)]
struct RunHandle {
    cancel: CancellationToken,
    slots: TaskTracker,
}

impl RunHandle {
    fn new() -> Self {
        Self { cancel: CancellationToken::new(), slots: TaskTracker::new() }
    }
}

pub struct WorkerPool {
    broker: Arc<dyn QueueBroker>,
    router: Arc<TaskRouter>,
    queues: Vec<String>,
    concurrency: usize,
    max_retries: u32,
    run: Mutex<RunHandle>,
    slot_stats: RwLock<Vec<Arc<SlotStats>>>,
    running: AtomicBool,
}

impl WorkerPool {
    pub fn new(broker: Arc<dyn QueueBroker>, router: TaskRouter, config: &WorkerConfig) -> Self {
        Self {
            broker,
            router: Arc::new(router),
            queues: config.queues.clone(),
            concurrency: config.concurrency,
            max_retries: config.max_task_retries,
            run: Mutex::new(RunHandle::new()),
            slot_stats: RwLock::new(Vec::new()),
            running: AtomicBool::new(false),
        }
    }

    /// Declare every queue, then spawn the consumer slots.
    pub async fn start(&self) -> tw_queue::Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        for queue in &self.queues {
            if let Err(e) = self.broker.declare_queue(queue).await {
                self.running.store(false, Ordering::SeqCst);
                return Err(e);
            }
        }

        let run = RunHandle::new();
        *self.run.lock() = run.clone();
        self.slot_stats.write().clear();

        for queue in &self.queues {
            for slot in 0..self.concurrency {
                let tag = format!("tw-worker-{}-{}", queue, slot);
                let consumer = match self.broker.consumer(queue, &tag).await {
                    Ok(c) => c,
                    Err(e) => {
                        run.cancel.cancel();
                        run.slots.close();
                        self.running.store(false, Ordering::SeqCst);
                        return Err(e);
                    }
                };
                let stats = Arc::new(SlotStats::new(queue.clone(), slot));
                self.slot_stats.write().push(stats.clone());

                run.slots.spawn(run_slot(
                    consumer,
                    self.router.clone(),
                    stats,
                    run.cancel.clone(),
                    self.max_retries,
                    slot,
                ));
            }
        }

        info!(
            queues = ?self.queues,
            concurrency = self.concurrency,
            max_retries = self.max_retries,
            "Worker pool started"
        );
        Ok(())
    }

    /// Stop receiving and drain in-flight messages. Returns false if `timeout` elapsed first.
    pub async fn stop(&self, timeout: Duration) -> bool {
        info!(in_flight = self.stats().active, "Stopping worker pool");
        let run = self.run.lock().clone();
        run.cancel.cancel();
        run.slots.close();
        let drained = tokio::time::timeout(timeout, run.slots.wait()).await.is_ok();
        self.running.store(false, Ordering::SeqCst);
        if drained {
            info!("Worker pool drained");
        } else {
            warn!(timeout_secs = timeout.as_secs(), "Worker pool drain timed out");
        }
        drained
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst) && !self.run.lock().cancel.is_cancelled()
    }

    pub fn stats(&self) -> PoolStats {
        let slots = self.slot_stats.read().iter().map(|s| s.snapshot()).collect();
        PoolStats::from_slots(self.is_running(), slots)
    }
}

async fn run_slot(
    mut consumer: Box<dyn QueueConsumer>,
    router: Arc<TaskRouter>,
    stats: Arc<SlotStats>,
    cancel: CancellationToken,
    max_retries: u32,
    slot: usize,
) {
    let queue = consumer.queue().to_string();
    debug!(queue = %queue, slot, "Worker slot started");

    loop {
        // Cancellation only interrupts the wait for a message, never a running handler.
        let received = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            r = consumer.receive() => r,
        };

        let message = match received {
            Ok(Some(m)) => m,
            Ok(None) => {
                info!(queue = %queue, slot, "Consumer stream closed");
                break;
            }
            Err(e) => {
                error!(queue = %queue, slot, error = %e, "Receive failed");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(RECEIVE_ERROR_BACKOFF) => continue,
                }
            }
        };

        stats.record_received();
        let decision = handle_message(&router, &message, max_retries, &queue, slot).await;
        if let Err(e) = consumer.settle(message.delivery_tag, decision).await {
            error!(
                queue = %queue,
                slot,
                delivery_tag = message.delivery_tag,
                error = %e,
                "Failed to settle message"
            );
        }
        stats.record_settled(decision);
    }

    debug!(queue = %queue, slot, "Worker slot stopped");
}

async fn handle_message(
    router: &Arc<TaskRouter>,
    message: &ReceivedMessage,
    max_retries: u32,
    queue: &str,
    slot: usize,
) -> AckNack {
    let task = match QueuedTask::decode(&message.body) {
        Ok(task) => task,
        Err(e) => {
            warn!(queue, slot, error = %e, "Discarding malformed task");
            return AckNack::DISCARD;
        }
    };

    let task_id = task.task_id.clone();
    let task_type = task.task_type;
    let retry_count = task.retry_count;

    let handler = {
        let router = router.clone();
        tokio::spawn(async move { router.route(task).await })
    };
    let result = match handler.await {
        Ok(result) => result,
        Err(e) => Err(HandlerError::Panicked(e.to_string())),
    };

    let decision = settle_decision(&result, retry_count, max_retries);
    match &result {
        Ok(()) => info!(queue, slot, task_id = %task_id, task_type = %task_type, "Task completed"),
        Err(e) => warn!(
            queue,
            slot,
            task_id = %task_id,
            task_type = %task_type,
            retry_count,
            error_kind = e.kind(),
            retryable = e.is_retryable(),
            error = %e,
            decision = decision.as_str(),
            "Task failed"
        ),
    }
    decision
}
