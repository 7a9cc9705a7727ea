//! Bridge from the SQLite change feed into the notification hub.
//!
//! One bridge thread runs per store while it has subscribers. It owns a
//! [`Listener`] on the `new_comment` channel; for each notification whose
//! post has subscribers it loads the comment and publishes it through the
//! store's hub. Subscribers whose watermark covers the notification's
//! sequence joined after the comment was written and do not receive it. A lost listener is re-attached with exponential backoff.
//! When the attempts run out every subscription is closed as unavailable
//! and the thread exits; the next subscription starts a new bridge.

use super::notify::{CommentNotification, Listener, NotificationChannel, NEW_COMMENT_CHANNEL};
use super::SqliteShared;
use crate::context::{CancelHandle, Context};
use crate::error::{Result, StoreError};
use crate::store::ReconnectConfig;
use crate::subscriptions::DropReason;
use crossbeam_channel::select;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

/// Owning handle to a running bridge thread.
pub(crate) struct BridgeHandle {
    cancel: CancelHandle,
    /// Cleared by the thread before it stops serving subscribers.
    alive: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl BridgeHandle {
    /// Attach a listener and start the bridge thread.
    ///
    /// The listener is attached before returning, so comments created after
    /// this call are never missed.
    pub(crate) fn start(
        shared: Weak<SqliteShared>,
        channel: NotificationChannel,
        reconnect: ReconnectConfig,
    ) -> Result<Self> {
        let listener = channel.listen(NEW_COMMENT_CHANNEL)?;
        let (ctx, cancel) = Context::with_cancel();
        let alive = Arc::new(AtomicBool::new(true));

        let bridge = Bridge {
            ctx,
            shared,
            channel,
            reconnect,
            alive: Arc::clone(&alive),
        };
        let thread = thread::Builder::new()
            .name("comment-bridge".to_string())
            .spawn(move || bridge.run(listener))
            .map_err(|e| StoreError::Unavailable(format!("failed to spawn bridge: {}", e)))?;

        Ok(Self {
            cancel,
            alive,
            thread: Some(thread),
        })
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }
}

impl Drop for BridgeHandle {
    fn drop(&mut self) {
        self.cancel.cancel();

        // The bridge may itself release the last reference to the store.
        if let Some(thread) = self.thread.take() {
            if thread.thread().id() != thread::current().id() {
                let _ = thread.join();
            }
        }
    }
}

enum Exit {
    Cancelled,
    StoreDropped,
    Unavailable(String),
}

struct Bridge {
    ctx: Context,
    shared: Weak<SqliteShared>,
    channel: NotificationChannel,
    reconnect: ReconnectConfig,
    alive: Arc<AtomicBool>,
}

impl Bridge {
    fn run(self, listener: Listener) {
        info!(channel = listener.channel(), "comment bridge started");

        let exit = self.serve(listener);
        match &exit {
            Exit::Unavailable(reason) => {
                error!(%reason, "comment bridge giving up; closing subscriptions");
                if let Some(shared) = self.shared.upgrade() {
                    let mut hub = shared.hub.lock();
                    self.alive.store(false, Ordering::Release);
                    hub.close_all(DropReason::Unavailable(reason.clone()));
                }
            }
            Exit::Cancelled | Exit::StoreDropped => {}
        }
        self.alive.store(false, Ordering::Release);

        let reason = match exit {
            Exit::Cancelled => "cancelled",
            Exit::StoreDropped => "store dropped",
            Exit::Unavailable(_) => "unavailable",
        };
        info!(reason, "comment bridge stopped");
    }

    fn serve(&self, mut listener: Listener) -> Exit {
        loop {
            let received = select! {
                recv(listener.receiver()) -> payload => Some(payload),
                recv(self.ctx.done()) -> _ => None,
            };

            match received {
                None => return Exit::Cancelled,
                Some(Ok(payload)) => {
                    if let Some(exit) = self.forward(&payload) {
                        return exit;
                    }
                }
                Some(Err(_)) => {
                    warn!("comment listener connection lost; reconnecting");
                    match self.reattach() {
                        Ok(next) => listener = next,
                        Err(exit) => return exit,
                    }
                }
            }
        }
    }

    /// Publish the comment named by one notification. Returns `Some` when the
    /// bridge should stop.
    fn forward(&self, payload: &str) -> Option<Exit> {
        let notification = match CommentNotification::parse(payload) {
            Ok(notification) => notification,
            Err(e) => {
                warn!(%payload, error = %e, "ignoring malformed comment notification");
                return None;
            }
        };

        let Some(shared) = self.shared.upgrade() else {
            return Some(Exit::StoreDropped);
        };
        if !shared.hub.lock().has_subscribers(&notification.post_id) {
            return None;
        }

        match shared.fetch_comment(&notification.comment_id) {
            Ok(Some(comment)) => {
                if self.ctx.is_cancelled() {
                    return Some(Exit::Cancelled);
                }
                let delivered = shared
                    .hub
                    .lock()
                    .publish_sequenced(&comment, notification.seq);
                debug!(
                    post_id = %comment.post_id,
                    comment_id = %comment.id,
                    seq = notification.seq,
                    delivered,
                    "bridged comment to subscribers"
                );
            }
            Ok(None) => {
                warn!(comment_id = %notification.comment_id, "notified comment not found");
            }
            Err(e) => {
                warn!(
                    comment_id = %notification.comment_id,
                    error = %e,
                    "failed to load notified comment"
                );
            }
        }
        None
    }

    /// Re-attach to the channel with exponential backoff.
    fn reattach(&self) -> std::result::Result<Listener, Exit> {
        let mut delay = self.reconnect.initial_backoff;
        let mut last_error = String::from("no reconnect attempts configured");

        for attempt in 1..=self.reconnect.max_attempts {
            if self.ctx.sleep(delay).is_err() {
                return Err(Exit::Cancelled);
            }
            match self.channel.listen(NEW_COMMENT_CHANNEL) {
                Ok(listener) => {
                    info!(attempt, "comment listener reconnected");
                    return Ok(listener);
                }
                Err(e) => {
                    warn!(
                        attempt,
                        max_attempts = self.reconnect.max_attempts,
                        backoff = ?delay,
                        error = %e,
                        "comment listener reconnect failed"
                    );
                    last_error = e.to_string();
                }
            }
            delay = self.reconnect.next_backoff(delay);
        }

        Err(Exit::Unavailable(last_error))
    }
}
