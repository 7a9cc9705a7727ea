//! Tables, queries and row mapping for the SQLite backend.

use crate::types::{Comment, CommentId, Post, PostId, Timestamp};
use rusqlite::types::{FromSql, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::Row;

pub(crate) const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS posts (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        content TEXT NOT NULL,
        comments_enabled INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS comments (
        id TEXT PRIMARY KEY,
        post_id TEXT NOT NULL REFERENCES posts(id),
        parent_id TEXT REFERENCES comments(id),
        content TEXT NOT NULL,
        created_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_comments_post_created
        ON comments(post_id, created_at);

    CREATE INDEX IF NOT EXISTS idx_comments_parent
        ON comments(parent_id);

    DROP TRIGGER IF EXISTS comments_notify;
    CREATE TRIGGER comments_notify
    AFTER INSERT ON comments
    BEGIN
        SELECT notify_change(
            'new_comment',
            json_object('commentId', NEW.id, 'postId', NEW.post_id, 'seq', NEW.rowid)
        );
    END;
";

pub(crate) const INSERT_POST: &str =
    "INSERT INTO posts (id, title, content, comments_enabled) VALUES (?1, ?2, ?3, ?4)";

pub(crate) const INSERT_COMMENT: &str =
    "INSERT INTO comments (id, post_id, parent_id, content, created_at) VALUES (?1, ?2, ?3, ?4, ?5)";

pub(crate) const SELECT_POSTS: &str =
    "SELECT id, title, content, comments_enabled FROM posts ORDER BY rowid";

pub(crate) const SELECT_POST_BY_ID: &str =
    "SELECT id, title, content, comments_enabled FROM posts WHERE id = ?1";

pub(crate) const POST_EXISTS: &str = "SELECT 1 FROM posts WHERE id = ?1";

pub(crate) const SELECT_COMMENT_POST: &str = "SELECT post_id FROM comments WHERE id = ?1";

/// Highest comment rowid written so far; the change-feed watermark.
pub(crate) const SELECT_LAST_COMMENT_SEQ: &str = "SELECT COALESCE(MAX(rowid), 0) FROM comments";

pub(crate) const SELECT_COMMENT_BY_ID: &str =
    "SELECT id, post_id, parent_id, content, created_at FROM comments WHERE id = ?1";

/// Every comment reachable from the post's roots, in preorder.
///
/// `path` is the chain of zero-padded rowids from the root, so ordering by it
/// visits a parent before its replies and siblings in insertion order.
pub(crate) const SELECT_COMMENT_TREE: &str = "
    WITH RECURSIVE comment_tree(id, post_id, parent_id, content, created_at, path) AS (
        SELECT id, post_id, parent_id, content, created_at, printf('%020d', rowid)
        FROM comments
        WHERE post_id = ?1 AND parent_id IS NULL
        UNION ALL
        SELECT c.id, c.post_id, c.parent_id, c.content, c.created_at,
               ct.path || '/' || printf('%020d', c.rowid)
        FROM comments c
        INNER JOIN comment_tree ct ON ct.id = c.parent_id
    )
    SELECT id, post_id, parent_id, content, created_at FROM comment_tree ORDER BY path
";

pub(crate) const SELECT_COMMENT_PAGE: &str = "
    SELECT id, post_id, parent_id, content, created_at
    FROM comments
    WHERE post_id = ?1
    ORDER BY created_at, rowid
    LIMIT ?2 OFFSET ?3
";

pub(crate) fn post_from_row(row: &Row<'_>) -> rusqlite::Result<Post> {
    Ok(Post {
        id: row.get(0)?,
        title: row.get(1)?,
        content: row.get(2)?,
        comments_enabled: row.get(3)?,
        comments: Vec::new(),
    })
}

pub(crate) fn comment_from_row(row: &Row<'_>) -> rusqlite::Result<Comment> {
    Ok(Comment {
        id: row.get(0)?,
        post_id: row.get(1)?,
        parent_id: row.get(2)?,
        content: row.get(3)?,
        created_at: row.get(4)?,
        replies: Vec::new(),
    })
}

macro_rules! text_column {
    ($ty:ident) => {
        impl ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.0.as_str()))
            }
        }

        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                String::column_result(value).map($ty)
            }
        }
    };
}

text_column!(PostId);
text_column!(CommentId);
text_column!(Timestamp);
