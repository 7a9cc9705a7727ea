//! LISTEN/NOTIFY-style change feed for the SQLite backend.
//!
//! The schema installs an `AFTER INSERT` trigger on `comments` that calls the
//! `notify_change(channel, payload)` SQL function. That function hands the
//! payload to every [`Listener`] currently attached to the channel. The
//! payload is a small JSON document decoded into [`CommentNotification`];
//! its `seq` is the comment's rowid.

use crate::error::{Result, StoreError};
use crate::types::{CommentId, PostId};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use rusqlite::functions::FunctionFlags;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Channel the comment trigger notifies on.
pub const NEW_COMMENT_CHANNEL: &str = "new_comment";

/// Name of the SQL function the trigger calls.
pub(crate) const NOTIFY_FUNCTION: &str = "notify_change";

/// Payload sent for every inserted comment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentNotification {
    pub comment_id: CommentId,
    pub post_id: PostId,
    /// Row sequence of the comment; increases with every insert.
    pub seq: u64,
}

impl CommentNotification {
    pub fn parse(payload: &str) -> Result<Self> {
        Ok(serde_json::from_str(payload)?)
    }
}

#[derive(Default)]
struct ChannelInner {
    /// Attached listeners by channel name.
    listeners: Mutex<HashMap<String, Vec<Sender<String>>>>,
    /// Refuse new listeners while set.
    closed: AtomicBool,
}

/// In-process notification bus shared by a connection and its listeners.
#[derive(Clone, Default)]
pub struct NotificationChannel {
    inner: Arc<ChannelInner>,
}

/// One attached listener. Owned by a single consumer.
pub struct Listener {
    channel: String,
    receiver: Receiver<String>,
}

impl Listener {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Payloads in notification order. Disconnects when the listener's
    /// connection to the channel is lost.
    pub fn receiver(&self) -> &Receiver<String> {
        &self.receiver
    }
}

impl NotificationChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a listener to `channel`.
    pub fn listen(&self, channel: &str) -> Result<Listener> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(StoreError::Unavailable(format!(
                "cannot listen on {}: notification channel is closed",
                channel
            )));
        }
        let (sender, receiver) = unbounded();
        self.inner
            .listeners
            .lock()
            .entry(channel.to_string())
            .or_default()
            .push(sender);
        Ok(Listener {
            channel: channel.to_string(),
            receiver,
        })
    }

    /// Send `payload` to every listener of `channel`, pruning listeners that
    /// went away. Returns the number of listeners reached.
    pub fn notify(&self, channel: &str, payload: &str) -> usize {
        let mut listeners = self.inner.listeners.lock();
        let Some(senders) = listeners.get_mut(channel) else {
            return 0;
        };
        senders.retain(|sender| sender.send(payload.to_string()).is_ok());
        let reached = senders.len();
        if senders.is_empty() {
            listeners.remove(channel);
        }
        trace!(channel, reached, "notified listeners");
        reached
    }

    /// Drop every attached listener, as if their connections were lost.
    pub fn disconnect_listeners(&self) {
        self.inner.listeners.lock().clear();
    }

    /// Disconnect all listeners and refuse new ones until [`reopen`](Self::reopen).
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.disconnect_listeners();
    }

    pub fn reopen(&self) {
        self.inner.closed.store(false, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub fn listener_count(&self, channel: &str) -> usize {
        self.inner.listeners.lock().get(channel).map_or(0, Vec::len)
    }

    /// Register `notify_change(channel, payload)` on `conn`.
    pub(crate) fn install(&self, conn: &Connection) -> rusqlite::Result<()> {
        let channel = AssertUnwindSafe(self.clone());
        conn.create_scalar_function(
            NOTIFY_FUNCTION,
            2,
            FunctionFlags::SQLITE_UTF8,
            move |ctx| {
                let name: String = ctx.get(0)?;
                let payload: String = ctx.get(1)?;
                Ok(channel.notify(&name, &payload) as i64)
            },
        )
    }
}
