//! In-process broker
//!
//! Behaves like a single AMQP node with prefetch 1 per consumer: a message is in flight
//! until settled, requeued messages go back to the head of their queue flagged as
//! redelivered, and every settlement is recorded for inspection.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tw_common::QueuedTask;

use crate::error::{QueueError, Result};
use crate::{AckNack, QueueBroker, QueueConsumer, ReceivedMessage, TaskPublisher};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    pub queue: String,
    pub delivery_tag: u64,
    pub body: Vec<u8>,
    pub decision: AckNack,
}

#[derive(Debug)]
struct Pending {
    body: Vec<u8>,
    redelivered: bool,
}

#[derive(Default)]
struct Inner {
    queues: Mutex<HashMap<String, VecDeque<Pending>>>,
    in_flight: Mutex<HashMap<u64, (String, Vec<u8>)>>,
    settlements: Mutex<Vec<Settlement>>,
    next_tag: AtomicU64,
    notify: Notify,
    closed: AtomicBool,
    publish_fails: AtomicBool,
}

#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a raw body, bypassing task encoding.
    pub fn push_raw(&self, queue: &str, body: impl Into<Vec<u8>>) {
        self.inner
            .queues
            .lock()
            .entry(queue.to_string())
            .or_default()
            .push_back(Pending { body: body.into(), redelivered: false });
        self.inner.notify.notify_waiters();
    }

    /// Bodies waiting in `queue`, head first.
    pub fn queued(&self, queue: &str) -> Vec<Vec<u8>> {
        self.inner
            .queues
            .lock()
            .get(queue)
            .map(|q| q.iter().map(|p| p.body.clone()).collect())
            .unwrap_or_default()
    }

    pub fn queue_len(&self, queue: &str) -> usize {
        self.inner.queues.lock().get(queue).map_or(0, VecDeque::len)
    }

    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.lock().len()
    }

    pub fn settlements(&self) -> Vec<Settlement> {
        self.inner.settlements.lock().clone()
    }

    /// Make publishes fail as if the broker were unreachable.
    pub fn set_publish_failure(&self, fail: bool) {
        self.inner.publish_fails.store(fail, Ordering::SeqCst);
    }

    /// End every consumer stream once its queue is empty.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    fn pop(&self, queue: &str) -> Option<ReceivedMessage> {
        let pending = self.inner.queues.lock().get_mut(queue)?.pop_front()?;
        let tag = self.inner.next_tag.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner
            .in_flight
            .lock()
            .insert(tag, (queue.to_string(), pending.body.clone()));
        Some(ReceivedMessage {
            delivery_tag: tag,
            body: pending.body,
            redelivered: pending.redelivered,
        })
    }
}

#[async_trait]
impl QueueBroker for MemoryBroker {
    async fn declare_queue(&self, queue: &str) -> Result<()> {
        self.inner.queues.lock().entry(queue.to_string()).or_default();
        Ok(())
    }

    async fn consumer(&self, queue: &str, _consumer_tag: &str) -> Result<Box<dyn QueueConsumer>> {
        Ok(Box::new(MemoryConsumer {
            broker: self.clone(),
            queue: queue.to_string(),
        }))
    }
}

#[async_trait]
impl TaskPublisher for MemoryBroker {
    async fn publish(&self, queue: &str, task: &QueuedTask) -> Result<()> {
        if self.inner.publish_fails.load(Ordering::SeqCst) {
            return Err(QueueError::Connection("memory broker offline".into()));
        }
        let body = task.encode()?;
        self.push_raw(queue, body);
        Ok(())
    }
}

pub struct MemoryConsumer {
    broker: MemoryBroker,
    queue: String,
}

#[async_trait]
impl QueueConsumer for MemoryConsumer {
    fn queue(&self) -> &str {
        &self.queue
    }

    async fn receive(&mut self) -> Result<Option<ReceivedMessage>> {
        loop {
            let notified = self.broker.inner.notify.notified();
            if let Some(message) = self.broker.pop(&self.queue) {
                return Ok(Some(message));
            }
            if self.broker.inner.closed.load(Ordering::SeqCst) {
                return Ok(None);
            }
            notified.await;
        }
    }

    async fn settle(&mut self, delivery_tag: u64, decision: AckNack) -> Result<()> {
        let (queue, body) = self
            .broker
            .inner
            .in_flight
            .lock()
            .remove(&delivery_tag)
            .ok_or(QueueError::UnknownDeliveryTag(delivery_tag))?;

        if decision == AckNack::REQUEUE {
            self.broker
                .inner
                .queues
                .lock()
                .entry(queue.clone())
                .or_default()
                .push_front(Pending { body: body.clone(), redelivered: true });
            self.broker.inner.notify.notify_waiters();
        }
        self.broker.inner.settlements.lock().push(Settlement {
            queue,
            delivery_tag,
            body,
            decision,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_requeue_redelivers_at_head() {
        let broker = MemoryBroker::new();
        broker.push_raw("q", b"first".to_vec());
        broker.push_raw("q", b"second".to_vec());
        let mut consumer = broker.consumer("q", "c1").await.unwrap();

        let m = consumer.receive().await.unwrap().unwrap();
        assert_eq!(m.body, b"first");
        assert!(!m.redelivered);
        consumer.settle(m.delivery_tag, AckNack::REQUEUE).await.unwrap();

        let again = consumer.receive().await.unwrap().unwrap();
        assert_eq!(again.body, b"first");
        assert!(again.redelivered);
    }

    #[tokio::test]
    async fn test_discard_removes_message() {
        let broker = MemoryBroker::new();
        broker.push_raw("q", b"x".to_vec());
        let mut consumer = broker.consumer("q", "c1").await.unwrap();

        let m = consumer.receive().await.unwrap().unwrap();
        consumer.settle(m.delivery_tag, AckNack::DISCARD).await.unwrap();

        assert_eq!(broker.queue_len("q"), 0);
        assert_eq!(broker.in_flight(), 0);
        assert_eq!(broker.settlements()[0].decision, AckNack::DISCARD);
    }

    #[tokio::test]
    async fn test_double_settle_is_rejected() {
        let broker = MemoryBroker::new();
        broker.push_raw("q", b"x".to_vec());
        let mut consumer = broker.consumer("q", "c1").await.unwrap();
        let m = consumer.receive().await.unwrap().unwrap();
        consumer.settle(m.delivery_tag, AckNack::Ack).await.unwrap();

        assert!(matches!(
            consumer.settle(m.delivery_tag, AckNack::Ack).await,
            Err(QueueError::UnknownDeliveryTag(_))
        ));
    }

    #[tokio::test]
    async fn test_receive_wakes_on_publish() {
        let broker = MemoryBroker::new();
        let mut consumer = broker.consumer("q", "c1").await.unwrap();

        let publisher = broker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            publisher
                .publish("q", &QueuedTask::workflow("m1", "s1", false))
                .await
                .unwrap();
        });

        let m = tokio::time::timeout(std::time::Duration::from_secs(2), consumer.receive())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let task = QueuedTask::decode(&m.body).unwrap();
        assert_eq!(task.task_type, tw_common::TaskType::ChatWorkflow);
    }

    #[tokio::test]
    async fn test_close_ends_idle_consumer() {
        let broker = MemoryBroker::new();
        let mut consumer = broker.consumer("q", "c1").await.unwrap();
        broker.close();
        assert!(consumer.receive().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_publish_failure_toggle() {
        let broker = MemoryBroker::new();
        broker.set_publish_failure(true);
        let err = broker
            .publish("q", &QueuedTask::workflow("m1", "s1", false))
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::Connection(_)));
        assert_eq!(broker.queue_len("q"), 0);
    }

    #[test]
    fn test_idle_receive_is_woken_by_push() {
        use tokio_test::{assert_pending, assert_ready};

        let broker = MemoryBroker::new();
        let mut consumer = tokio_test::block_on(broker.consumer("q", "c1")).unwrap();
        let mut receive = tokio_test::task::spawn(consumer.receive());

        assert_pending!(receive.poll());
        broker.push_raw("q", b"late".to_vec());
        assert!(receive.is_woken());

        let m = assert_ready!(receive.poll()).unwrap().unwrap();
        assert_eq!(m.body, b"late");
    }
}
