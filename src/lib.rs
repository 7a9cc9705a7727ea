//! # Threadline
//!
//! A store for posts and threaded comments with live comment subscriptions.
//!
//! ## Core Concepts
//!
//! - **Posts**: Top-level content items that may own a comment thread
//! - **Comments**: Replies scoped to one post, optionally nested under another comment
//! - **Backends**: Interchangeable implementations of [`CommentStore`]
//!   (concurrent in-memory maps, or SQLite)
//! - **Subscriptions**: Per-post live feeds of newly created comments
//!
//! ## Example
//!
//! ```ignore
//! use threadline::{open_store, Context, StoreConfig};
//!
//! let store = open_store(StoreConfig::from_env()?)?;
//! let ctx = Context::background();
//!
//! let post = store.create_post(&ctx, "Hello", "First post", true)?;
//! let subscription = store.subscribe_to_comments(&ctx, &post.id)?;
//!
//! let root = store.create_comment(&ctx, &post.id, None, "Nice post")?;
//! store.create_comment(&ctx, &post.id, Some(&root.id), "Thanks!")?;
//!
//! // Nested view
//! let post = store.get_post_by_id(&ctx, &post.id)?;
//! assert_eq!(post.comments[0].replies.len(), 1);
//!
//! // Live feed
//! let first = subscription.recv(&ctx)?;
//! assert_eq!(first.id, root.id);
//! ```

pub mod context;
pub mod error;
pub mod memory;
pub mod pagination;
pub mod sqlite;
pub mod store;
pub mod subscriptions;
pub mod tree;
pub mod types;

// Re-exports
pub use context::{CancelHandle, Context};
pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use pagination::{paginate, Page};
pub use sqlite::{CommentNotification, NotificationChannel, SqliteStore, NEW_COMMENT_CHANNEL};
pub use store::{open_store, BackendKind, CommentStore, ReconnectConfig, StoreConfig};
pub use subscriptions::{
    CommentSubscription, DropReason, HubEvent, NotificationHub, SubscriptionId,
    DEFAULT_BUFFER_SIZE,
};
pub use tree::{build_comment_tree, flatten_comment_tree};
pub use types::*;
