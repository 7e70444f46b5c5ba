//! Bounded per-subscription delivery queues.
//!
//! Each queue is a bounded `tokio::sync::mpsc` channel. The writer side
//! offers items with `try_send` and never blocks; when the channel is full
//! the configured [`BackpressurePolicy`] decides which item is dropped. The
//! consumer side is a [`SubscriptionStream`], a `futures::Stream` that
//! unregisters its subscription when dropped.

use crate::config::BackpressurePolicy;
use futures::Stream;
use parking_lot::Mutex;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use tokio::sync::mpsc::{self, error::TrySendError};

/// Why a subscription stopped delivering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Every publisher the subscription depends on was unregistered
    AllPublishersGone(String),
    /// Initial sync failed
    InitialSyncFailed(String),
    /// Storage was shut down
    Shutdown,
}

/// Result of offering an item to a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    /// Item queued
    Queued,
    /// Item queued after evicting the oldest one
    DroppedOldest,
    /// Queue full, item dropped
    Rejected,
    /// Queue closed or consumer gone
    Closed,
}

/// Delivery statistics of one queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Items currently queued
    pub len: usize,
    /// Highest number of items ever queued at once
    pub high_watermark: usize,
    /// Items dropped by backpressure
    pub dropped: u64,
    /// Items handed to the consumer
    pub delivered: u64,
}

/// A bounded channel shared between the writer and one consumer.
///
/// The sender is dropped on [`close`](Self::close), so the consumer drains
/// the backlog and then sees the end of the stream. The receiver is shared
/// with the writer only so that `DropOldest` can evict from the front.
pub struct DeliveryQueue<T> {
    policy: BackpressurePolicy,
    sender: Mutex<Option<mpsc::Sender<T>>>,
    receiver: Mutex<mpsc::Receiver<T>>,
    closed: Mutex<Option<CloseReason>>,
    stats: Mutex<QueueStats>,
}

impl<T> DeliveryQueue<T> {
    /// Create an empty queue.
    #[must_use]
    pub fn new(capacity: usize, policy: BackpressurePolicy) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        Self {
            policy,
            sender: Mutex::new(Some(sender)),
            receiver: Mutex::new(receiver),
            closed: Mutex::new(None),
            stats: Mutex::new(QueueStats::default()),
        }
    }

    /// Offer an item. Never blocks.
    pub fn offer(&self, item: T) -> Offer {
        let sender = self.sender.lock();
        let Some(sender) = sender.as_ref() else {
            return Offer::Closed;
        };

        let (outcome, evicted) = match sender.try_send(item) {
            Ok(()) => (Offer::Queued, false),
            Err(TrySendError::Closed(_)) => return Offer::Closed,
            Err(TrySendError::Full(item)) => {
                self.stats.lock().dropped += 1;
                if self.policy == BackpressurePolicy::RejectNew {
                    return Offer::Rejected;
                }
                let evicted = self.receiver.lock().try_recv().is_ok();
                if sender.try_send(item).is_err() {
                    return Offer::Closed;
                }
                (Offer::DroppedOldest, evicted)
            }
        };

        let mut stats = self.stats.lock();
        if !evicted {
            stats.len += 1;
        }
        stats.high_watermark = stats.high_watermark.max(stats.len);
        outcome
    }

    /// Stop accepting items. Queued items are still delivered, after which
    /// the stream ends.
    pub fn close(&self, reason: CloseReason) {
        self.closed.lock().get_or_insert(reason);
        self.sender.lock().take();
    }

    /// Whether the consumer has dropped its stream.
    #[must_use]
    pub fn is_consumer_gone(&self) -> bool {
        self.sender.lock().as_ref().is_some_and(mpsc::Sender::is_closed)
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> QueueStats {
        *self.stats.lock()
    }

    fn received(&self, item: Option<T>) -> Option<T> {
        if item.is_some() {
            let mut stats = self.stats.lock();
            stats.len = stats.len.saturating_sub(1);
            stats.delivered += 1;
        }
        item
    }

    fn poll_item(&self, cx: &mut Context<'_>) -> Poll<Option<T>> {
        let polled = self.receiver.lock().poll_recv(cx);
        polled.map(|item| self.received(item))
    }

    pub(crate) fn try_pop(&self) -> Option<T> {
        let item = self.receiver.lock().try_recv().ok();
        self.received(item)
    }

    fn detach(&self) {
        let mut receiver = self.receiver.lock();
        receiver.close();
        while receiver.try_recv().is_ok() {}
        self.stats.lock().len = 0;
    }

    fn close_reason(&self) -> Option<CloseReason> {
        self.closed.lock().clone()
    }
}

/// Owner of subscriptions, notified when a stream is dropped.
pub trait Unsubscribe: Send + Sync {
    /// Remove the subscription with `id`.
    fn unsubscribe(&self, id: u64);
}

/// Consumer side of a subscription.
///
/// Yields items in commit order. Dropping the stream removes the
/// subscription from its storage.
pub struct SubscriptionStream<T> {
    id: u64,
    queue: Arc<DeliveryQueue<T>>,
    owner: Weak<dyn Unsubscribe>,
}

impl<T> SubscriptionStream<T> {
    pub(crate) fn new(id: u64, queue: Arc<DeliveryQueue<T>>, owner: Weak<dyn Unsubscribe>) -> Self {
        Self { id, queue, owner }
    }

    /// Subscription id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Take the next queued item without waiting.
    pub fn try_next_item(&mut self) -> Option<T> {
        self.queue.try_pop()
    }

    /// Drain every queued item without waiting.
    pub fn drain(&mut self) -> Vec<T> {
        std::iter::from_fn(|| self.queue.try_pop()).collect()
    }

    /// Delivery statistics.
    #[must_use]
    pub fn stats(&self) -> QueueStats {
        self.queue.stats()
    }

    /// Why the subscription was closed, if it was.
    #[must_use]
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.queue.close_reason()
    }
}

impl<T> Stream for SubscriptionStream<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.queue.poll_item(cx)
    }
}

impl<T> Drop for SubscriptionStream<T> {
    fn drop(&mut self) {
        self.queue.detach();
        if let Some(owner) = self.owner.upgrade() {
            owner.unsubscribe(self.id);
        }
    }
}

impl<T> std::fmt::Debug for SubscriptionStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionStream")
            .field("id", &self.id)
            .field("stats", &self.queue.stats())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tokio_test::{assert_pending, assert_ready_eq, task};

    #[derive(Default)]
    struct Recorder(AtomicU64);

    impl Unsubscribe for Recorder {
        fn unsubscribe(&self, id: u64) {
            self.0.store(id, Ordering::SeqCst);
        }
    }

    fn stream(
        capacity: usize,
        policy: BackpressurePolicy,
    ) -> (Arc<DeliveryQueue<u32>>, SubscriptionStream<u32>, Arc<Recorder>) {
        let queue = Arc::new(DeliveryQueue::new(capacity, policy));
        let recorder = Arc::new(Recorder::default());
        let owner: Weak<dyn Unsubscribe> = Arc::downgrade(&recorder) as Weak<Recorder>;
        let stream = SubscriptionStream::new(7, Arc::clone(&queue), owner);
        (queue, stream, recorder)
    }

    #[test]
    fn reject_new_keeps_oldest() {
        let (queue, mut stream, _) = stream(2, BackpressurePolicy::RejectNew);
        assert_eq!(queue.offer(1), Offer::Queued);
        assert_eq!(queue.offer(2), Offer::Queued);
        assert_eq!(queue.offer(3), Offer::Rejected);
        assert_eq!(stream.drain(), vec![1, 2]);

        let stats = stream.stats();
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.high_watermark, 2);
        assert_eq!(stats.delivered, 2);
    }

    #[test]
    fn drop_oldest_keeps_newest() {
        let (queue, mut stream, _) = stream(2, BackpressurePolicy::DropOldest);
        queue.offer(1);
        queue.offer(2);
        assert_eq!(queue.offer(3), Offer::DroppedOldest);
        assert_eq!(stream.drain(), vec![2, 3]);
        assert_eq!(stream.stats().dropped, 1);
    }

    #[test]
    fn backlog_length_follows_evictions_and_reads() {
        let (queue, mut stream, _) = stream(3, BackpressurePolicy::DropOldest);
        for item in 1..=4 {
            queue.offer(item);
        }
        assert_eq!(stream.stats().len, 3);
        assert_eq!(stream.try_next_item(), Some(2));
        assert_eq!(stream.stats().len, 2);
        assert_eq!(stream.stats().high_watermark, 3);

        queue.close(CloseReason::Shutdown);
        queue.close(CloseReason::AllPublishersGone("agent".into()));
        assert_eq!(stream.close_reason(), Some(CloseReason::Shutdown));
        assert_eq!(stream.drain(), vec![3, 4]);
    }

    #[test]
    fn offer_wakes_pending_consumer() {
        let (queue, stream, _) = stream(4, BackpressurePolicy::RejectNew);
        let mut next = task::spawn(stream);
        assert_pending!(next.poll_next());
        queue.offer(5);
        assert!(next.is_woken());
        assert_ready_eq!(next.poll_next(), Some(5));
    }

    #[test]
    fn close_ends_stream_after_backlog() {
        let (queue, mut stream, _) = stream(4, BackpressurePolicy::RejectNew);
        queue.offer(1);
        queue.close(CloseReason::AllPublishersGone("agent".into()));
        assert_eq!(queue.offer(2), Offer::Closed);

        let items: Vec<_> = tokio_test::block_on(async { (&mut stream).collect().await });
        assert_eq!(items, vec![1]);
        assert_eq!(
            stream.close_reason(),
            Some(CloseReason::AllPublishersGone("agent".into()))
        );
    }

    #[test]
    fn drop_unsubscribes() {
        let (queue, stream, recorder) = stream(4, BackpressurePolicy::RejectNew);
        drop(stream);
        assert_eq!(recorder.0.load(Ordering::SeqCst), 7);
        assert!(queue.is_consumer_gone());
        assert_eq!(queue.offer(1), Offer::Closed);
    }
}
