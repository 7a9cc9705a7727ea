//! Core types for the comment store.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a post.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PostId(pub String);

impl PostId {
    /// Fresh random identifier.
    pub fn generate() -> Self {
        PostId(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PostId({})", self.0)
    }
}

impl fmt::Display for PostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PostId {
    fn from(s: &str) -> Self {
        PostId(s.to_string())
    }
}

impl From<String> for PostId {
    fn from(s: String) -> Self {
        PostId(s)
    }
}

/// Unique identifier for a comment.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommentId(pub String);

impl CommentId {
    /// Fresh random identifier.
    pub fn generate() -> Self {
        CommentId(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for CommentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CommentId({})", self.0)
    }
}

impl fmt::Display for CommentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CommentId {
    fn from(s: &str) -> Self {
        CommentId(s.to_string())
    }
}

impl From<String> for CommentId {
    fn from(s: String) -> Self {
        CommentId(s)
    }
}

/// RFC 3339 creation time in UTC.
///
/// Always rendered with microsecond precision and a `Z` suffix, so the
/// textual form sorts the same way the instants do.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub String);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        Timestamp(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A top-level content item.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    /// Unique identifier (assigned by the store).
    pub id: PostId,
    pub title: String,
    pub content: String,
    pub comments_enabled: bool,
    /// Comment view attached at read time. Never persisted with the post.
    #[serde(default)]
    pub comments: Vec<Comment>,
}

impl Post {
    /// A new post with a fresh identifier and no comments.
    pub fn new(title: &str, content: &str, comments_enabled: bool) -> Self {
        Self {
            id: PostId::generate(),
            title: title.to_string(),
            content: content.to_string(),
            comments_enabled,
            comments: Vec::new(),
        }
    }
}

/// A comment on a post, optionally replying to another comment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    /// Unique identifier (assigned by the store).
    pub id: CommentId,
    pub post_id: PostId,
    /// Parent comment; `None` for a thread root.
    pub parent_id: Option<CommentId>,
    pub content: String,
    pub created_at: Timestamp,
    /// Nested replies, filled in by tree reconstruction only.
    #[serde(default)]
    pub replies: Vec<Comment>,
}

impl Comment {
    /// A new comment with a fresh identifier, stamped with the current time.
    pub fn new(post_id: &PostId, parent_id: Option<&CommentId>, content: &str) -> Self {
        Self {
            id: CommentId::generate(),
            post_id: post_id.clone(),
            parent_id: parent_id.cloned(),
            content: content.to_string(),
            created_at: Timestamp::now(),
            replies: Vec::new(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Number of comments in this subtree, including this one.
    pub fn thread_size(&self) -> usize {
        1 + self.replies.iter().map(Comment::thread_size).sum::<usize>()
    }
}
