//! Subscription types for live comment delivery.

use crate::context::Context;
use crate::error::{Result, StoreError};
use crate::types::{Comment, PostId};
use crossbeam_channel::{select, Receiver, RecvTimeoutError, TryRecvError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Weak;
use std::time::Duration;

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Events delivered to a subscriber queue.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubEvent {
    /// A comment was created on the subscribed post.
    Comment { comment: Comment },

    /// The subscription was ended by the hub. Always the last event.
    Closed { reason: DropReason },
}

/// Why a subscription was ended.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Send buffer overflowed (slow consumer).
    BufferOverflow,
    /// The change feed behind the backend is gone.
    Unavailable(String),
    /// Explicitly unsubscribed.
    Unsubscribed,
}

impl From<DropReason> for StoreError {
    fn from(reason: DropReason) -> Self {
        match reason {
            DropReason::Unavailable(msg) => StoreError::Unavailable(msg),
            DropReason::BufferOverflow | DropReason::Unsubscribed => {
                StoreError::SubscriptionDropped
            }
        }
    }
}

/// Something that can take a subscriber back out of its registry.
///
/// Implemented by each backend over whatever guards its hub.
pub trait SubscriberRegistry: Send + Sync {
    fn unsubscribe(&self, post_id: &PostId, id: SubscriptionId);
}

/// Receive-only handle to the comments created on one post.
///
/// Dropping the handle unsubscribes it.
pub struct CommentSubscription {
    id: SubscriptionId,
    post_id: PostId,
    receiver: Receiver<HubEvent>,
    registry: Weak<dyn SubscriberRegistry>,
}

impl CommentSubscription {
    pub(crate) fn new(
        id: SubscriptionId,
        post_id: PostId,
        receiver: Receiver<HubEvent>,
        registry: Weak<dyn SubscriberRegistry>,
    ) -> Self {
        Self {
            id,
            post_id,
            receiver,
            registry,
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn post_id(&self) -> &PostId {
        &self.post_id
    }

    /// Block until the next comment arrives or `ctx` ends.
    pub fn recv(&self, ctx: &Context) -> Result<Comment> {
        ctx.check()?;
        select! {
            recv(self.receiver) -> event => match event {
                Ok(event) => Self::unwrap_event(event),
                Err(_) => Err(StoreError::SubscriptionDropped),
            },
            recv(ctx.done()) -> _ => Err(StoreError::Cancelled),
            recv(ctx.deadline_signal()) -> _ => Err(StoreError::DeadlineExceeded),
        }
    }

    /// Take a pending comment without blocking.
    pub fn try_recv(&self) -> Result<Option<Comment>> {
        match self.receiver.try_recv() {
            Ok(event) => Self::unwrap_event(event).map(Some),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(StoreError::SubscriptionDropped),
        }
    }

    /// Wait up to `timeout` for the next comment.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<Comment>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(event) => Self::unwrap_event(event).map(Some),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(StoreError::SubscriptionDropped),
        }
    }

    /// Blocking iterator over incoming comments. Ends when `ctx` ends or the
    /// subscription is closed.
    pub fn iter<'a>(&'a self, ctx: &'a Context) -> impl Iterator<Item = Comment> + 'a {
        std::iter::from_fn(move || self.recv(ctx).ok())
    }

    /// Leave the hub now instead of at drop.
    pub fn unsubscribe(self) {}

    fn unwrap_event(event: HubEvent) -> Result<Comment> {
        match event {
            HubEvent::Comment { comment } => Ok(comment),
            HubEvent::Closed { reason } => Err(reason.into()),
        }
    }
}

impl Drop for CommentSubscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.unsubscribe(&self.post_id, self.id);
        }
    }
}

impl fmt::Debug for CommentSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommentSubscription")
            .field("id", &self.id)
            .field("post_id", &self.post_id)
            .field("pending", &self.receiver.len())
            .finish_non_exhaustive()
    }
}
