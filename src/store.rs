//! The storage contract shared by every backend, and backend selection.

use crate::context::Context;
use crate::error::{Result, StoreError};
use crate::memory::MemoryStore;
use crate::sqlite::SqliteStore;
use crate::subscriptions::{CommentSubscription, DEFAULT_BUFFER_SIZE};
use crate::types::{Comment, CommentId, Post, PostId};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Operations every comment store backend provides.
///
/// Each call takes the caller's [`Context`] and fails with
/// [`StoreError::Cancelled`] or [`StoreError::DeadlineExceeded`] if it has
/// already ended.
pub trait CommentStore: Send + Sync {
    /// Create a post with a fresh ID and no comments.
    fn create_post(
        &self,
        ctx: &Context,
        title: &str,
        content: &str,
        comments_enabled: bool,
    ) -> Result<Post>;

    /// Create a comment on `post_id`, optionally replying to `parent_id`.
    ///
    /// Fails with `PostNotFound` for an unknown post and `CommentNotFound`
    /// when the parent is unknown or belongs to another post. On success the
    /// comment is published to the post's current subscribers.
    fn create_comment(
        &self,
        ctx: &Context,
        post_id: &PostId,
        parent_id: Option<&CommentId>,
        content: &str,
    ) -> Result<Comment>;

    /// Every post, in creation order. Comment views are left empty.
    fn get_posts(&self, ctx: &Context) -> Result<Vec<Post>>;

    /// One post with its full reply tree as of the call.
    fn get_post_by_id(&self, ctx: &Context, id: &PostId) -> Result<Post>;

    /// A window over the post's comments, flat and oldest first.
    ///
    /// Replies are included as separate entries; `replies` is always empty.
    /// Negative bounds fail with `InvalidArgument`.
    fn get_comments_by_post_id(
        &self,
        ctx: &Context,
        post_id: &PostId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Comment>>;

    /// Live feed of comments created on `post_id` from now on.
    fn subscribe_to_comments(&self, ctx: &Context, post_id: &PostId)
        -> Result<CommentSubscription>;
}

/// Which backend [`open_store`] builds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackendKind {
    /// Concurrent in-process maps.
    Memory,
    /// SQLite database; `None` keeps it in memory.
    Sqlite { path: Option<PathBuf> },
}

/// Reconnect policy for the relational change-feed listener.
#[derive(Clone, Debug)]
pub struct ReconnectConfig {
    /// Delay before the first reconnect attempt.
    pub initial_backoff: Duration,
    /// Upper bound for the delay between attempts.
    pub max_backoff: Duration,
    /// Growth factor applied to the delay after each failed attempt.
    pub backoff_multiplier: f64,
    /// Attempts before subscribers are told the backend is unavailable.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(2),
            backoff_multiplier: 2.0,
            max_attempts: 5,
        }
    }
}

impl ReconnectConfig {
    /// Delay to wait after `delay` failed.
    pub(crate) fn next_backoff(&self, delay: Duration) -> Duration {
        let next = delay.as_millis() as f64 * self.backoff_multiplier;
        Duration::from_millis(next.min(self.max_backoff.as_millis() as f64) as u64)
    }
}

/// Store configuration.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Backend to open.
    pub backend: BackendKind,

    /// Per-subscriber queue capacity.
    pub subscriber_buffer: usize,

    /// Listener reconnect policy (relational backend only).
    pub reconnect: ReconnectConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Memory,
            subscriber_buffer: DEFAULT_BUFFER_SIZE,
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Environment variables understood by [`StoreConfig::from_env`].
#[derive(Debug, Deserialize)]
struct EnvConfig {
    storage_type: Option<String>,
    database_url: Option<String>,
    subscriber_buffer: Option<usize>,
}

impl StoreConfig {
    /// Read `STORAGE_TYPE`, `DATABASE_URL` and `SUBSCRIBER_BUFFER`.
    pub fn from_env() -> Result<Self> {
        Self::from_env_config(envy::from_env::<EnvConfig>()?)
    }

    /// Same as [`from_env`](Self::from_env) over explicit key/value pairs.
    pub fn from_vars<I>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        Self::from_env_config(envy::from_iter::<_, EnvConfig>(vars)?)
    }

    fn from_env_config(env: EnvConfig) -> Result<Self> {
        let backend = match env.storage_type.as_deref().map(str::to_ascii_lowercase) {
            None => BackendKind::Memory,
            Some(kind) if kind == "memory" => BackendKind::Memory,
            Some(kind) if matches!(kind.as_str(), "sqlite" | "relational" | "postgres") => {
                BackendKind::Sqlite {
                    path: env
                        .database_url
                        .filter(|url| !url.is_empty() && url != ":memory:")
                        .map(PathBuf::from),
                }
            }
            Some(other) => {
                return Err(StoreError::Config(format!(
                    "unknown STORAGE_TYPE {:?} (expected memory, sqlite, relational or postgres)",
                    other
                )))
            }
        };

        Ok(Self {
            backend,
            subscriber_buffer: env.subscriber_buffer.unwrap_or(DEFAULT_BUFFER_SIZE),
            reconnect: ReconnectConfig::default(),
        })
    }
}

/// Open the backend named by `config`.
pub fn open_store(config: StoreConfig) -> Result<Arc<dyn CommentStore>> {
    let store: Arc<dyn CommentStore> = match &config.backend {
        BackendKind::Memory => Arc::new(MemoryStore::with_config(&config)),
        BackendKind::Sqlite { path: Some(path) } => Arc::new(SqliteStore::open(path, &config)?),
        BackendKind::Sqlite { path: None } => Arc::new(SqliteStore::in_memory(&config)?),
    };
    info!(backend = ?config.backend, "opened comment store");
    Ok(store)
}
