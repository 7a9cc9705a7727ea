//! Concurrent in-process store.

use crate::context::Context;
use crate::error::{Result, StoreError};
use crate::pagination::{paginate, Page};
use crate::store::{CommentStore, StoreConfig};
use crate::subscriptions::{
    CommentSubscription, NotificationHub, SubscriberRegistry, SubscriptionId, DEFAULT_BUFFER_SIZE,
};
use crate::tree::build_comment_tree;
use crate::types::{Comment, CommentId, Post, PostId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::debug;

/// Everything the store knows, guarded as one unit.
struct MemoryState {
    /// Posts by ID, stored without comments.
    posts: HashMap<PostId, Post>,
    /// Post IDs in creation order.
    post_order: Vec<PostId>,
    /// Flat comments per post, in creation order.
    comments: HashMap<PostId, Vec<Comment>>,
    /// Owning post of every comment (parent validation).
    comment_posts: HashMap<CommentId, PostId>,
    /// Live subscribers.
    hub: NotificationHub,
}

struct MemoryShared {
    state: RwLock<MemoryState>,
}

impl SubscriberRegistry for MemoryShared {
    fn unsubscribe(&self, post_id: &PostId, id: SubscriptionId) {
        self.state.write().hub.unsubscribe(post_id, id);
    }
}

/// Store backed by in-process maps behind a single reader/writer lock.
///
/// Creates and subscribes take the lock exclusively, reads share it, so a
/// reader never sees a comment without its subscribers having been offered
/// it. New comments are published while the lock is held, which keeps
/// delivery order equal to creation order for each post.
#[derive(Clone)]
pub struct MemoryStore {
    shared: Arc<MemoryShared>,
}

impl MemoryStore {
    /// Create an empty store with default subscriber buffering.
    pub fn new() -> Self {
        Self::with_buffer_size(DEFAULT_BUFFER_SIZE)
    }

    /// Create an empty store from a [`StoreConfig`].
    pub fn with_config(config: &StoreConfig) -> Self {
        Self::with_buffer_size(config.subscriber_buffer)
    }

    /// Create an empty store whose subscriber queues hold `buffer_size` comments.
    pub fn with_buffer_size(buffer_size: usize) -> Self {
        let state = MemoryState {
            posts: HashMap::new(),
            post_order: Vec::new(),
            comments: HashMap::new(),
            comment_posts: HashMap::new(),
            hub: NotificationHub::new(buffer_size),
        };
        Self {
            shared: Arc::new(MemoryShared {
                state: RwLock::new(state),
            }),
        }
    }

    /// Number of live subscriptions across all posts.
    pub fn subscriber_count(&self) -> usize {
        self.shared.state.read().hub.subscriber_count()
    }

    pub fn post_count(&self) -> usize {
        self.shared.state.read().posts.len()
    }

    fn registry(&self) -> Weak<dyn SubscriberRegistry> {
        let registry: Arc<dyn SubscriberRegistry> = self.shared.clone();
        Arc::downgrade(&registry)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CommentStore for MemoryStore {
    fn create_post(
        &self,
        ctx: &Context,
        title: &str,
        content: &str,
        comments_enabled: bool,
    ) -> Result<Post> {
        ctx.check()?;
        let post = Post::new(title, content, comments_enabled);

        let mut state = self.shared.state.write();
        state.posts.insert(post.id.clone(), post.clone());
        state.post_order.push(post.id.clone());
        drop(state);

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
        let mut state = self.shared.state.write();

        if !state.posts.contains_key(post_id) {
            return Err(StoreError::PostNotFound(post_id.clone()));
        }
        if let Some(parent) = parent_id {
            if state.comment_posts.get(parent) != Some(post_id) {
                return Err(StoreError::CommentNotFound(parent.clone()));
            }
        }

        let comment = Comment::new(post_id, parent_id, content);
        state
            .comments
            .entry(post_id.clone())
            .or_default()
            .push(comment.clone());
        state
            .comment_posts
            .insert(comment.id.clone(), post_id.clone());
        let delivered = state.hub.publish(&comment);
        drop(state);

        debug!(
            post_id = %post_id,
            comment_id = %comment.id,
            delivered,
            "created comment"
        );
        Ok(comment)
    }

    fn get_posts(&self, ctx: &Context) -> Result<Vec<Post>> {
        ctx.check()?;
        let state = self.shared.state.read();
        Ok(state
            .post_order
            .iter()
            .filter_map(|id| state.posts.get(id))
            .cloned()
            .collect())
    }

    fn get_post_by_id(&self, ctx: &Context, id: &PostId) -> Result<Post> {
        ctx.check()?;
        let (mut post, comments) = {
            let state = self.shared.state.read();
            let post = state
                .posts
                .get(id)
                .cloned()
                .ok_or_else(|| StoreError::PostNotFound(id.clone()))?;
            let comments = state.comments.get(id).cloned().unwrap_or_default();
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
        let page = Page::new(limit, offset)?;

        let state = self.shared.state.read();
        if !state.posts.contains_key(post_id) {
            return Err(StoreError::PostNotFound(post_id.clone()));
        }
        let comments = state
            .comments
            .get(post_id)
            .map(Vec::as_slice)
            .unwrap_or_default();
        Ok(paginate(comments, page).to_vec())
    }

    fn subscribe_to_comments(
        &self,
        ctx: &Context,
        post_id: &PostId,
    ) -> Result<CommentSubscription> {
        ctx.check()?;
        let (id, receiver) = self.shared.state.write().hub.subscribe(post_id);
        Ok(CommentSubscription::new(
            id,
            post_id.clone(),
            receiver,
            self.registry(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn setup() -> (MemoryStore, Context) {
        (MemoryStore::new(), Context::background())
    }

    #[test]
    fn test_create_post() {
        let (store, ctx) = setup();

        let post = store
            .create_post(&ctx, "Test Title", "Test Content", true)
            .unwrap();

        assert_eq!(post.title, "Test Title");
        assert_eq!(post.content, "Test Content");
        assert!(post.comments_enabled);
        assert!(post.comments.is_empty());
        assert_eq!(store.post_count(), 1);
    }

    #[test]
    fn test_create_comment() {
        let (store, ctx) = setup();
        let post = store.create_post(&ctx, "T", "C", true).unwrap();

        let comment = store
            .create_comment(&ctx, &post.id, None, "Test Comment")
            .unwrap();

        assert_eq!(comment.post_id, post.id);
        assert!(comment.parent_id.is_none());
        assert_eq!(comment.content, "Test Comment");
    }

    #[test]
    fn test_create_comment_unknown_post() {
        let (store, ctx) = setup();
        let result = store.create_comment(&ctx, &PostId::from("missing"), None, "x");
        assert!(matches!(result, Err(StoreError::PostNotFound(_))));
    }

    #[test]
    fn test_parent_must_belong_to_same_post() {
        let (store, ctx) = setup();
        let first = store.create_post(&ctx, "1", "1", true).unwrap();
        let second = store.create_post(&ctx, "2", "2", true).unwrap();
        let root = store.create_comment(&ctx, &first.id, None, "root").unwrap();

        let result = store.create_comment(&ctx, &second.id, Some(&root.id), "reply");
        assert!(matches!(result, Err(StoreError::CommentNotFound(_))));

        let result =
            store.create_comment(&ctx, &first.id, Some(&CommentId::from("nope")), "reply");
        assert!(matches!(result, Err(StoreError::CommentNotFound(_))));
    }

    #[test]
    fn test_get_posts_in_creation_order() {
        let (store, ctx) = setup();
        let a = store.create_post(&ctx, "A", "a", true).unwrap();
        let b = store.create_post(&ctx, "B", "b", false).unwrap();
        store.create_comment(&ctx, &a.id, None, "hidden").unwrap();

        let posts = store.get_posts(&ctx).unwrap();
        let ids: Vec<_> = posts.iter().map(|p| p.id.clone()).collect();
        assert_eq!(ids, vec![a.id, b.id]);
        assert!(posts.iter().all(|p| p.comments.is_empty()));
    }

    #[test]
    fn test_get_post_by_id_builds_tree() {
        let (store, ctx) = setup();
        let post = store.create_post(&ctx, "T", "C", true).unwrap();
        let root = store.create_comment(&ctx, &post.id, None, "root").unwrap();
        let reply = store
            .create_comment(&ctx, &post.id, Some(&root.id), "reply")
            .unwrap();
        store.create_comment(&ctx, &post.id, None, "second root").unwrap();

        let fetched = store.get_post_by_id(&ctx, &post.id).unwrap();
        assert_eq!(fetched.comments.len(), 2);
        assert_eq!(fetched.comments[0].id, root.id);
        assert_eq!(fetched.comments[0].replies.len(), 1);
        assert_eq!(fetched.comments[0].replies[0].id, reply.id);
    }

    #[test]
    fn test_get_comments_window() {
        let (store, ctx) = setup();
        let post = store.create_post(&ctx, "T", "C", true).unwrap();
        for i in 0..3 {
            store
                .create_comment(&ctx, &post.id, None, &format!("c{}", i))
                .unwrap();
        }

        let page = store.get_comments_by_post_id(&ctx, &post.id, 2, 1).unwrap();
        let contents: Vec<_> = page.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(contents, vec!["c1", "c2"]);

        assert!(store
            .get_comments_by_post_id(&ctx, &post.id, 1, 5)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_get_comments_for_post_without_comments() {
        let (store, ctx) = setup();
        let post = store.create_post(&ctx, "T", "C", true).unwrap();
        assert!(store
            .get_comments_by_post_id(&ctx, &post.id, 10, 0)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_subscribe_to_comments() {
        let (store, ctx) = setup();
        let post = store.create_post(&ctx, "T", "C", true).unwrap();
        let subscription = store.subscribe_to_comments(&ctx, &post.id).unwrap();

        let writer = store.clone();
        let post_id = post.id.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            writer
                .create_comment(&Context::background(), &post_id, None, "Test Comment")
                .unwrap()
        });

        let received = subscription
            .recv(&ctx.with_timeout(Duration::from_secs(5)))
            .unwrap();
        let created = handle.join().unwrap();
        assert_eq!(received.content, "Test Comment");
        assert_eq!(received.id, created.id);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let (store, ctx) = setup();
        let post = store.create_post(&ctx, "T", "C", true).unwrap();

        let first = store.subscribe_to_comments(&ctx, &post.id).unwrap();
        let second = store.subscribe_to_comments(&ctx, &post.id).unwrap();
        assert_eq!(store.subscriber_count(), 2);

        drop(first);
        assert_eq!(store.subscriber_count(), 1);
        second.unsubscribe();
        assert_eq!(store.subscriber_count(), 0);
    }

    #[test]
    fn test_cancelled_context_rejects_operations() {
        let (store, _) = setup();
        let (ctx, cancel) = Context::with_cancel();
        cancel.cancel();

        assert!(matches!(
            store.create_post(&ctx, "T", "C", true),
            Err(StoreError::Cancelled)
        ));
        assert!(matches!(store.get_posts(&ctx), Err(StoreError::Cancelled)));
        assert_eq!(store.post_count(), 0);
    }
}
