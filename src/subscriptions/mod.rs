//! Live comment subscriptions.
//!
//! Every backend owns a [`NotificationHub`]: a per-post registry of bounded
//! subscriber queues. Creating a comment publishes it to the queues of its
//! post; a [`CommentSubscription`] is the receive side of one queue.
//!
//! Queues are bounded and publishing never blocks. A subscriber that falls
//! a full buffer behind is dropped from the hub and sees
//! `SubscriptionDropped` once it has drained what was queued.
//!
//! # Example
//!
//! ```ignore
//! let subscription = store.subscribe_to_comments(&ctx, &post.id)?;
//!
//! for comment in subscription.iter(&ctx) {
//!     println!("{}: {}", comment.id, comment.content);
//! }
//! // Dropping the subscription removes it from the hub.
//! ```

mod hub;
mod types;

pub use hub::{NotificationHub, DEFAULT_BUFFER_SIZE};
pub use types::{
    CommentSubscription, DropReason, HubEvent, SubscriberRegistry, SubscriptionId,
};
