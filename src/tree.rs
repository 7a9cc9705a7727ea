//! Comment tree reconstruction.
//!
//! Converts the flat, parent-referencing comment list of one post into
//! nested reply threads.

use crate::types::Comment;
use std::collections::HashMap;

/// Build the reply forest for a flat list of comments from one post.
///
/// Roots keep their input order, and so do the replies under each parent.
/// A comment whose parent is not in the input is dropped together with its
/// whole subtree. Comments that only reach each other through a parent
/// cycle are dropped as well, since no root leads to them.
///
/// Any `replies` already present on the inputs are replaced.
pub fn build_comment_tree(comments: Vec<Comment>) -> Vec<Comment> {
    let len = comments.len();

    // First occurrence wins if an ID is repeated.
    let mut index: HashMap<&str, usize> = HashMap::with_capacity(len);
    for (pos, comment) in comments.iter().enumerate() {
        index.entry(comment.id.as_str()).or_insert(pos);
    }

    let mut roots = Vec::new();
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); len];
    for (pos, comment) in comments.iter().enumerate() {
        match &comment.parent_id {
            None => roots.push(pos),
            Some(parent) => match index.get(parent.as_str()) {
                Some(&parent_pos) if parent_pos != pos => children[parent_pos].push(pos),
                _ => {}
            },
        }
    }
    drop(index);

    let mut slots: Vec<Option<Comment>> = comments.into_iter().map(Some).collect();
    let mut built: Vec<Option<Comment>> = (0..len).map(|_| None).collect();

    // Post-order assembly with an explicit stack so thread depth never
    // turns into call-stack depth.
    let mut stack: Vec<(usize, bool)> = Vec::new();
    for &root in &roots {
        stack.push((root, false));
        while let Some((pos, expanded)) = stack.pop() {
            if expanded {
                if let Some(mut comment) = slots[pos].take() {
                    comment.replies = children[pos]
                        .iter()
                        .filter_map(|&child| built[child].take())
                        .collect();
                    built[pos] = Some(comment);
                }
            } else {
                stack.push((pos, true));
                for &child in children[pos].iter().rev() {
                    stack.push((child, false));
                }
            }
        }
    }

    roots.into_iter().filter_map(|pos| built[pos].take()).collect()
}

/// Flatten a reply forest back into preorder.
pub fn flatten_comment_tree(roots: &[Comment]) -> Vec<&Comment> {
    let mut out = Vec::new();
    let mut stack: Vec<&Comment> = roots.iter().rev().collect();
    while let Some(comment) = stack.pop() {
        out.push(comment);
        stack.extend(comment.replies.iter().rev());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CommentId, PostId, Timestamp};
    use proptest::prelude::*;

    fn comment(id: &str, parent: Option<&str>) -> Comment {
        Comment {
            id: CommentId::from(id),
            post_id: PostId::from("post"),
            parent_id: parent.map(CommentId::from),
            content: format!("content of {}", id),
            created_at: Timestamp::now(),
            replies: Vec::new(),
        }
    }

    fn ids(comments: &[Comment]) -> Vec<&str> {
        comments.iter().map(|c| c.id.as_str()).collect()
    }

    #[test]
    fn test_empty() {
        assert!(build_comment_tree(Vec::new()).is_empty());
    }

    #[test]
    fn test_nesting_and_order() {
        let flat = vec![
            comment("a", None),
            comment("b", None),
            comment("a1", Some("a")),
            comment("a2", Some("a")),
            comment("a1x", Some("a1")),
            comment("b1", Some("b")),
        ];

        let tree = build_comment_tree(flat);
        assert_eq!(ids(&tree), vec!["a", "b"]);
        assert_eq!(ids(&tree[0].replies), vec!["a1", "a2"]);
        assert_eq!(ids(&tree[0].replies[0].replies), vec!["a1x"]);
        assert_eq!(ids(&tree[1].replies), vec!["b1"]);
        assert_eq!(tree[0].thread_size(), 4);
    }

    #[test]
    fn test_child_before_parent_in_input() {
        let flat = vec![comment("r1", Some("r")), comment("r", None)];
        let tree = build_comment_tree(flat);
        assert_eq!(ids(&tree), vec!["r"]);
        assert_eq!(ids(&tree[0].replies), vec!["r1"]);
    }

    #[test]
    fn test_dangling_parent_drops_subtree() {
        let flat = vec![
            comment("root", None),
            comment("orphan", Some("missing")),
            comment("orphan-child", Some("orphan")),
        ];

        let tree = build_comment_tree(flat);
        assert_eq!(ids(&tree), vec!["root"]);
        assert!(tree[0].replies.is_empty());
    }

    #[test]
    fn test_cycle_is_dropped() {
        let flat = vec![
            comment("root", None),
            comment("x", Some("y")),
            comment("y", Some("x")),
            comment("self", Some("self")),
        ];

        let tree = build_comment_tree(flat);
        assert_eq!(ids(&tree), vec!["root"]);
    }

    #[test]
    fn test_existing_replies_are_replaced() {
        let mut root = comment("root", None);
        root.replies.push(comment("stale", Some("root")));

        let tree = build_comment_tree(vec![root, comment("fresh", Some("root"))]);
        assert_eq!(ids(&tree[0].replies), vec!["fresh"]);
    }

    #[test]
    fn test_deep_chain_does_not_overflow() {
        let depth = 100_000;
        let mut flat = vec![comment("0", None)];
        for i in 1..depth {
            let parent = (i - 1).to_string();
            flat.push(comment(&i.to_string(), Some(parent.as_str())));
        }

        let tree = build_comment_tree(flat);
        assert_eq!(tree.len(), 1);
        assert_eq!(flatten_comment_tree(&tree).len(), depth);

        // Dismantle iteratively; the derived drop would recurse once per level.
        let mut next = tree;
        while let Some(mut node) = next.pop() {
            next.append(&mut node.replies);
        }
    }

    #[test]
    fn test_flatten_is_preorder() {
        let flat = vec![
            comment("a", None),
            comment("a1", Some("a")),
            comment("a1x", Some("a1")),
            comment("a2", Some("a")),
            comment("b", None),
        ];
        let tree = build_comment_tree(flat);
        let order: Vec<&str> = flatten_comment_tree(&tree)
            .into_iter()
            .map(|c| c.id.as_str())
            .collect();
        assert_eq!(order, vec!["a", "a1", "a1x", "a2", "b"]);
    }

    /// Random forests: entry `i` names an earlier entry as parent, or none.
    fn arb_flat() -> impl Strategy<Value = Vec<Comment>> {
        prop::collection::vec(prop::option::of(any::<prop::sample::Index>()), 0..60).prop_map(
            |parents| {
                parents
                    .iter()
                    .enumerate()
                    .map(|(i, parent)| {
                        let parent = match parent {
                            Some(idx) if i > 0 => Some(idx.index(i).to_string()),
                            _ => None,
                        };
                        comment(&i.to_string(), parent.as_deref())
                    })
                    .collect()
            },
        )
    }

    proptest! {
        #[test]
        fn prop_forest_keeps_every_comment_under_its_parent(flat in arb_flat()) {
            let expected_roots: Vec<String> = flat
                .iter()
                .filter(|c| c.parent_id.is_none())
                .map(|c| c.id.0.clone())
                .collect();
            let total = flat.len();

            let tree = build_comment_tree(flat);

            let roots: Vec<String> = tree.iter().map(|c| c.id.0.clone()).collect();
            prop_assert_eq!(roots, expected_roots);

            let all = flatten_comment_tree(&tree);
            prop_assert_eq!(all.len(), total);
            for node in all {
                for reply in &node.replies {
                    prop_assert_eq!(reply.parent_id.as_ref(), Some(&node.id));
                }
            }
        }
    }
}
