//! Per-post registry of subscriber queues.

use crate::types::{Comment, PostId};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::collections::HashMap;
use tracing::{debug, warn};

use super::types::{DropReason, HubEvent, SubscriptionId};

/// Default per-subscriber queue capacity.
pub const DEFAULT_BUFFER_SIZE: usize = 1000;

/// Internal subscriber state.
struct Subscriber {
    id: SubscriptionId,
    sender: Sender<HubEvent>,
    /// Comments at or below this feed sequence predate the subscription.
    watermark: u64,
}

impl Subscriber {
    /// Try to send a comment. Returns false if the buffer is full or the
    /// receiver is gone (subscriber will be dropped).
    ///
    /// The queue has one slot more than `buffer_size`; that slot is kept
    /// free for the terminal [`HubEvent::Closed`].
    fn try_send(&self, event: HubEvent, buffer_size: usize) -> bool {
        if self.sender.len() >= buffer_size {
            return false;
        }
        match self.sender.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => false,
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

/// Routes newly created comments to the subscribers of their post.
///
/// The hub holds no lock of its own; each backend guards it together with
/// the rest of its state. Publishing never blocks: every subscriber has a
/// bounded queue, and one that is full when a comment arrives is removed
/// from the hub. Its handle drains what was queued and then reports
/// [`StoreError::SubscriptionDropped`](crate::StoreError::SubscriptionDropped).
pub struct NotificationHub {
    /// Subscribers by post, in registration order.
    topics: HashMap<PostId, Vec<Subscriber>>,
    /// Counter for generating subscription IDs.
    next_id: u64,
    /// Queue capacity for new subscribers.
    buffer_size: usize,
}

impl NotificationHub {
    /// Create a hub whose subscriber queues hold `buffer_size` comments.
    pub fn new(buffer_size: usize) -> Self {
        Self {
            topics: HashMap::new(),
            next_id: 1,
            buffer_size: buffer_size.max(1),
        }
    }

    /// Register a new subscriber for `post_id`.
    pub fn subscribe(&mut self, post_id: &PostId) -> (SubscriptionId, Receiver<HubEvent>) {
        self.subscribe_after(post_id, 0)
    }

    /// Register a subscriber that skips sequenced comments numbered
    /// `watermark` or lower. See [`publish_sequenced`](Self::publish_sequenced).
    pub fn subscribe_after(
        &mut self,
        post_id: &PostId,
        watermark: u64,
    ) -> (SubscriptionId, Receiver<HubEvent>) {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;

        let (sender, receiver) = bounded(self.buffer_size.saturating_add(1));
        self.topics.entry(post_id.clone()).or_default().push(Subscriber {
            id,
            sender,
            watermark,
        });

        debug!(post_id = %post_id, subscription = %id, watermark, "subscribed to comments");
        (id, receiver)
    }

    /// Remove a subscriber. Returns false if it was already gone.
    pub fn unsubscribe(&mut self, post_id: &PostId, id: SubscriptionId) -> bool {
        let Some(subs) = self.topics.get_mut(post_id) else {
            return false;
        };
        let before = subs.len();
        subs.retain(|sub| sub.id != id);
        let removed = subs.len() != before;
        if subs.is_empty() {
            self.topics.remove(post_id);
        }

        if removed {
            debug!(post_id = %post_id, subscription = %id, "unsubscribed from comments");
        }
        removed
    }

    /// Deliver `comment` to every subscriber of its post, in registration
    /// order. Returns how many subscribers received it.
    pub fn publish(&mut self, comment: &Comment) -> usize {
        self.publish_sequenced(comment, u64::MAX)
    }

    /// Like [`publish`](Self::publish) for a comment numbered `seq` in an
    /// external change feed. Subscribers whose watermark is at or above `seq`
    /// registered after the comment was written and are skipped.
    pub fn publish_sequenced(&mut self, comment: &Comment, seq: u64) -> usize {
        let buffer_size = self.buffer_size;
        let Some(subs) = self.topics.get_mut(&comment.post_id) else {
            return 0;
        };

        let before = subs.len();
        let mut skipped = 0;
        subs.retain(|sub| {
            if sub.watermark >= seq {
                skipped += 1;
                return true;
            }
            let delivered = sub.try_send(
                HubEvent::Comment {
                    comment: comment.clone(),
                },
                buffer_size,
            );
            if !delivered {
                warn!(
                    post_id = %comment.post_id,
                    subscription = %sub.id,
                    "dropping subscriber that cannot keep up"
                );
            }
            delivered
        });
        let delivered = subs.len() - skipped;
        let kept = subs.len();

        if subs.is_empty() {
            self.topics.remove(&comment.post_id);
        }
        if kept < before {
            debug!(
                post_id = %comment.post_id,
                dropped = before - kept,
                "removed stalled subscribers"
            );
        }
        delivered
    }

    /// End every subscription with `reason` and clear the registry.
    ///
    /// Returns how many subscriptions were closed.
    pub fn close_all(&mut self, reason: DropReason) -> usize {
        let mut closed = 0;
        for (_, subs) in self.topics.drain() {
            for sub in subs {
                // The reserved slot is free unless the receiver is gone.
                let _ = sub.sender.try_send(HubEvent::Closed {
                    reason: reason.clone(),
                });
                closed += 1;
            }
        }
        closed
    }

    pub fn has_subscribers(&self, post_id: &PostId) -> bool {
        self.topics.contains_key(post_id)
    }

    /// Total subscriber count across all posts.
    pub fn subscriber_count(&self) -> usize {
        self.topics.values().map(Vec::len).sum()
    }

    /// Subscriber count for one post.
    pub fn subscribers_for(&self, post_id: &PostId) -> usize {
        self.topics.get(post_id).map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn make_comment(post: &str, content: &str) -> Comment {
        Comment::new(&PostId::from(post), None, content)
    }

    fn expect_comment(receiver: &Receiver<HubEvent>) -> Comment {
        match receiver.recv_timeout(Duration::from_millis(100)).unwrap() {
            HubEvent::Comment { comment } => comment,
            other => panic!("Expected Comment event, got {:?}", other),
        }
    }

    #[test]
    fn test_subscribe_unsubscribe() {
        let mut hub = NotificationHub::default();
        let post = PostId::from("p1");

        let (id, _receiver) = hub.subscribe(&post);
        assert_eq!(hub.subscriber_count(), 1);
        assert!(hub.has_subscribers(&post));

        assert!(hub.unsubscribe(&post, id));
        assert_eq!(hub.subscriber_count(), 0);
        assert!(hub.is_empty());

        // Second removal is a no-op
        assert!(!hub.unsubscribe(&post, id));
    }

    #[test]
    fn test_publish_reaches_all_subscribers_of_post() {
        let mut hub = NotificationHub::default();
        let post = PostId::from("p1");

        let (_, first) = hub.subscribe(&post);
        let (_, second) = hub.subscribe(&post);

        let comment = make_comment("p1", "hello");
        assert_eq!(hub.publish(&comment), 2);

        assert_eq!(expect_comment(&first).id, comment.id);
        assert_eq!(expect_comment(&second).id, comment.id);
    }

    #[test]
    fn test_publish_filters_other_posts() {
        let mut hub = NotificationHub::default();
        let (_, receiver) = hub.subscribe(&PostId::from("p1"));

        assert_eq!(hub.publish(&make_comment("p2", "elsewhere")), 0);
        assert!(receiver.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn test_publish_preserves_comment_order() {
        let mut hub = NotificationHub::default();
        let (_, receiver) = hub.subscribe(&PostId::from("p1"));

        for i in 0..5 {
            hub.publish(&make_comment("p1", &format!("c{}", i)));
        }
        for i in 0..5 {
            assert_eq!(expect_comment(&receiver).content, format!("c{}", i));
        }
    }

    #[test]
    fn test_drop_slow_subscriber() {
        // Small buffer
        let mut hub = NotificationHub::new(2);
        let post = PostId::from("p1");
        let (_, slow) = hub.subscribe(&post);

        // Flood with events
        for i in 0..10 {
            hub.publish(&make_comment("p1", &format!("c{}", i)));
        }

        // Subscriber should be dropped, after keeping what fit
        assert_eq!(hub.subscriber_count(), 0);
        assert_eq!(expect_comment(&slow).content, "c0");
        assert_eq!(expect_comment(&slow).content, "c1");
        assert!(slow.recv().is_err());
    }

    #[test]
    fn test_slow_subscriber_does_not_affect_others() {
        let mut hub = NotificationHub::new(1);
        let post = PostId::from("p1");
        let (_, slow) = hub.subscribe(&post);
        let (_, fast) = hub.subscribe(&post);

        hub.publish(&make_comment("p1", "first"));
        assert_eq!(expect_comment(&fast).content, "first");

        // `slow` is still full, `fast` has drained
        assert_eq!(hub.publish(&make_comment("p1", "second")), 1);
        assert_eq!(expect_comment(&fast).content, "second");
        assert_eq!(hub.subscribers_for(&post), 1);
        drop(slow);
    }

    #[test]
    fn test_disconnected_receiver_is_pruned() {
        let mut hub = NotificationHub::default();
        let (_, receiver) = hub.subscribe(&PostId::from("p1"));
        drop(receiver);

        assert_eq!(hub.publish(&make_comment("p1", "nobody home")), 0);
        assert!(hub.is_empty());
    }

    #[test]
    fn test_close_all() {
        let mut hub = NotificationHub::default();
        let (_, a) = hub.subscribe(&PostId::from("p1"));
        let (_, b) = hub.subscribe(&PostId::from("p2"));

        let reason = DropReason::Unavailable("listener lost".to_string());
        assert_eq!(hub.close_all(reason.clone()), 2);
        assert!(hub.is_empty());

        for receiver in [a, b] {
            match receiver.recv_timeout(Duration::from_millis(100)).unwrap() {
                HubEvent::Closed { reason: got } => assert_eq!(got, reason),
                other => panic!("Expected Closed event, got {:?}", other),
            }
            assert!(receiver.recv().is_err());
        }
    }

    #[test]
    fn test_watermark_skips_earlier_sequences() {
        let mut hub = NotificationHub::default();
        let post = PostId::from("p1");
        let (_, early) = hub.subscribe_after(&post, 0);
        let (_, late) = hub.subscribe_after(&post, 5);

        // Written before `late` subscribed
        assert_eq!(hub.publish_sequenced(&make_comment("p1", "old"), 5), 1);
        assert_eq!(hub.publish_sequenced(&make_comment("p1", "new"), 6), 2);

        assert_eq!(expect_comment(&early).content, "old");
        assert_eq!(expect_comment(&early).content, "new");
        assert_eq!(expect_comment(&late).content, "new");
        assert!(late.try_recv().is_err());
        assert_eq!(hub.subscribers_for(&post), 2);
    }

    #[test]
    fn test_close_all_reaches_full_queue() {
        let mut hub = NotificationHub::new(2);
        let (_, receiver) = hub.subscribe(&PostId::from("p1"));
        hub.publish(&make_comment("p1", "c0"));
        hub.publish(&make_comment("p1", "c1"));

        let reason = DropReason::Unavailable("listener lost".to_string());
        assert_eq!(hub.close_all(reason.clone()), 1);

        assert_eq!(expect_comment(&receiver).content, "c0");
        assert_eq!(expect_comment(&receiver).content, "c1");
        match receiver.recv_timeout(Duration::from_millis(100)).unwrap() {
            HubEvent::Closed { reason: got } => assert_eq!(got, reason),
            other => panic!("Expected Closed event, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_buffer_is_clamped() {
        let mut hub = NotificationHub::new(0);
        let (_, receiver) = hub.subscribe(&PostId::from("p1"));
        assert_eq!(hub.publish(&make_comment("p1", "fits")), 1);
        assert_eq!(expect_comment(&receiver).content, "fits");
    }
}
