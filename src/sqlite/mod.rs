//! Relational store on SQLite.
//!
//! Rows live in a `posts` and a `comments` table. Reply trees come from one
//! recursive query and go through the same tree builder as the in-memory
//! store. Live comments reach subscribers through a change feed: a trigger
//! notifies a channel on every insert and a bridge thread forwards those
//! notifications into the store's [`NotificationHub`].

mod bridge;
mod notify;
mod schema;

pub use notify::{CommentNotification, Listener, NotificationChannel, NEW_COMMENT_CHANNEL};

use crate::context::Context;
use crate::error::{Result, StoreError};
use crate::pagination::Page;
use crate::store::{CommentStore, ReconnectConfig, StoreConfig};
use crate::subscriptions::{
    CommentSubscription, NotificationHub, SubscriberRegistry, SubscriptionId,
};
use crate::tree::build_comment_tree;
use crate::types::{Comment, CommentId, Post, PostId};
use bridge::BridgeHandle;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info};

/// How long a statement waits on a locked database file.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// State shared between the store, its subscriptions and the bridge.
///
/// Lock order: `bridge` before `hub`. `conn` is never held together with
/// either of them.
pub(crate) struct SqliteShared {
    conn: Mutex<Connection>,
    pub(crate) hub: Mutex<NotificationHub>,
    bridge: Mutex<Option<BridgeHandle>>,
    channel: NotificationChannel,
    reconnect: ReconnectConfig,
}

impl SqliteShared {
    pub(crate) fn fetch_comment(&self, id: &CommentId) -> Result<Option<Comment>> {
        let conn = self.conn.lock();
        Ok(conn
            .query_row(schema::SELECT_COMMENT_BY_ID, params![id], schema::comment_from_row)
            .optional()?)
    }
}

impl SubscriberRegistry for SqliteShared {
    fn unsubscribe(&self, post_id: &PostId, id: SubscriptionId) {
        let stopped = {
            let mut bridge = self.bridge.lock();
            let mut hub = self.hub.lock();
            hub.unsubscribe(post_id, id);
            if hub.is_empty() {
                bridge.take()
            } else {
                None
            }
        };

        // Joined outside the locks; the bridge takes `hub` on its way out.
        if stopped.is_some() {
            debug!("last subscriber left; stopping comment bridge");
        }
        drop(stopped);
    }
}

/// Store backed by a SQLite database.
#[derive(Clone)]
pub struct SqliteStore {
    shared: Arc<SqliteShared>,
}

impl SqliteStore {
    /// Open (or create) a database file.
    pub fn open(path: impl AsRef<Path>, config: &StoreConfig) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        info!(path = %path.as_ref().display(), "opened sqlite comment store");
        Self::from_connection(conn, config)
    }

    /// Open a private in-memory database.
    pub fn in_memory(config: &StoreConfig) -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?, config)
    }

    fn from_connection(conn: Connection, config: &StoreConfig) -> Result<Self> {
        let channel = NotificationChannel::new();

        conn.pragma_update(None, "foreign_keys", true)?;
        // The insert trigger calls an application-defined function.
        conn.pragma_update(None, "trusted_schema", true)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        channel.install(&conn)?;
        conn.execute_batch(schema::SCHEMA)?;

        Ok(Self {
            shared: Arc::new(SqliteShared {
                conn: Mutex::new(conn),
                hub: Mutex::new(NotificationHub::new(config.subscriber_buffer)),
                bridge: Mutex::new(None),
                channel,
                reconnect: config.reconnect.clone(),
            }),
        })
    }

    /// The change feed the insert trigger notifies.
    pub fn notification_channel(&self) -> &NotificationChannel {
        &self.shared.channel
    }

    /// Number of live subscriptions across all posts.
    pub fn subscriber_count(&self) -> usize {
        self.shared.hub.lock().subscriber_count()
    }

    /// Whether a bridge thread is currently serving subscribers.
    pub fn bridge_running(&self) -> bool {
        self.shared
            .bridge
            .lock()
            .as_ref()
            .is_some_and(BridgeHandle::is_alive)
    }

    fn registry(&self) -> Weak<dyn SubscriberRegistry> {
        let registry: Arc<dyn SubscriberRegistry> = self.shared.clone();
        Arc::downgrade(&registry)
    }

    fn post_exists(conn: &Connection, id: &PostId) -> Result<bool> {
        Ok(conn
            .query_row(schema::POST_EXISTS, params![id], |_| Ok(()))
            .optional()?
            .is_some())
    }
}

impl CommentStore for SqliteStore {
    fn create_post(
        &self,
        ctx: &Context,
        title: &str,
        content: &str,
        comments_enabled: bool,
    ) -> Result<Post> {
        ctx.check()?;
        let post = Post::new(title, content, comments_enabled);

        self.shared.conn.lock().execute(
            schema::INSERT_POST,
            params![post.id, post.title, post.content, post.comments_enabled],
        )?;

        debug!(post_id = %post.id, "created post");
        Ok(post)
    }

    fn create_comment(
        &self,
        ctx: &Context,
        post_id: &PostId,
        parent_id: Option<&CommentId>,
        content: &str,
    ) -> Result<Comment> {
        ctx.check()?;
        let conn = self.shared.conn.lock();

        if !Self::post_exists(&conn, post_id)? {
            return Err(StoreError::PostNotFound(post_id.clone()));
        }
        if let Some(parent) = parent_id {
            let owner: Option<PostId> = conn
                .query_row(schema::SELECT_COMMENT_POST, params![parent], |row| row.get(0))
                .optional()?;
            if owner.as_ref() != Some(post_id) {
                return Err(StoreError::CommentNotFound(parent.clone()));
            }
        }

        let comment = Comment::new(post_id, parent_id, content);
        conn.execute(
            schema::INSERT_COMMENT,
            params![
                comment.id,
                comment.post_id,
                comment.parent_id,
                comment.content,
                comment.created_at
            ],
        )?;
        drop(conn);

        debug!(post_id = %post_id, comment_id = %comment.id, "created comment");
        Ok(comment)
    }

    fn get_posts(&self, ctx: &Context) -> Result<Vec<Post>> {
        ctx.check()?;
        let conn = self.shared.conn.lock();
        let mut stmt = conn.prepare_cached(schema::SELECT_POSTS)?;
        let posts = stmt
            .query_map([], schema::post_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(posts)
    }

    fn get_post_by_id(&self, ctx: &Context, id: &PostId) -> Result<Post> {
        ctx.check()?;
        let (mut post, comments) = {
            let conn = self.shared.conn.lock();
            let post = conn
                .query_row(schema::SELECT_POST_BY_ID, params![id], schema::post_from_row)
                .optional()?
                .ok_or_else(|| StoreError::PostNotFound(id.clone()))?;

            let mut stmt = conn.prepare_cached(schema::SELECT_COMMENT_TREE)?;
            let comments = stmt
                .query_map(params![id], schema::comment_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            (post, comments)
        };

        post.comments = build_comment_tree(comments);
        Ok(post)
    }

    fn get_comments_by_post_id(
        &self,
        ctx: &Context,
        post_id: &PostId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Comment>> {
        ctx.check()?;
        let (limit, offset) = Page::new(limit, offset)?.sql_bounds();

        let conn = self.shared.conn.lock();
        if !Self::post_exists(&conn, post_id)? {
            return Err(StoreError::PostNotFound(post_id.clone()));
        }
        let mut stmt = conn.prepare_cached(schema::SELECT_COMMENT_PAGE)?;
        let comments = stmt
            .query_map(params![post_id, limit, offset], schema::comment_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(comments)
    }

    fn subscribe_to_comments(
        &self,
        ctx: &Context,
        post_id: &PostId,
    ) -> Result<CommentSubscription> {
        ctx.check()?;
        // Everything written so far predates this subscription.
        let watermark: u64 = self.shared.conn.lock().query_row(
            schema::SELECT_LAST_COMMENT_SEQ,
            [],
            |row| row.get(0),
        )?;

        let mut bridge = self.shared.bridge.lock();
        let (id, receiver, needs_bridge) = {
            let mut hub = self.shared.hub.lock();
            let (id, receiver) = hub.subscribe_after(post_id, watermark);
            let needs_bridge = !bridge.as_ref().is_some_and(BridgeHandle::is_alive);
            (id, receiver, needs_bridge)
        };

        if needs_bridge {
            let shared = Arc::downgrade(&self.shared);
            match BridgeHandle::start(
                shared,
                self.shared.channel.clone(),
                self.shared.reconnect.clone(),
            ) {
                Ok(handle) => {
                    // Replacing a finished bridge joins it, which is quick.
                    *bridge = Some(handle);
                }
                Err(e) => {
                    self.shared.hub.lock().unsubscribe(post_id, id);
                    return Err(e);
                }
            }
        }
        drop(bridge);

        Ok(CommentSubscription::new(
            id,
            post_id.clone(),
            receiver,
            self.registry(),
        ))
    }
}
