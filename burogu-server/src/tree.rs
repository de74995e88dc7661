use std::collections::HashMap;

use burogu_api::{
    CommentNode, CommentRecord, UserId, REDACTED_AUTHOR_NAME, REDACTED_CONTENT,
};

/// Assemble a flat batch of comment rows into an ordered reply tree,
/// applying privacy redaction for the given viewer.
///
/// The store queries in `(created_at, id)` order already, but the order
/// is re-established here rather than trusted. Comments whose parent is
/// not part of the batch are dropped: the store can serve a batch that
/// straddles a concurrent delete, and an orphaned reply is a data
/// quality problem upstream, not a reason to fail the read.
///
/// A private comment stays in place for viewers other than its author
/// and the post owner, but its author identity, content and like
/// metadata are replaced by placeholders. Its replies are not touched.
pub fn build_comment_tree(
    records: Vec<CommentRecord>,
    viewer: Option<UserId>,
    post_owner: UserId,
) -> Vec<CommentNode> {
    // Arena layout: one slot per record in input order, children kept as
    // index lists until the final materialization.
    let index_of: HashMap<_, _> = records
        .iter()
        .enumerate()
        .map(|(i, r)| (r.id, i))
        .collect();

    let mut children: Vec<Vec<usize>> = vec![Vec::new(); records.len()];
    let mut roots: Vec<usize> = Vec::new();
    for (i, r) in records.iter().enumerate() {
        match r.parent {
            None => roots.push(i),
            Some(parent) => match index_of.get(&parent) {
                Some(&p) => children[p].push(i),
                None => tracing::debug!(
                    comment = r.id.0,
                    parent = parent.0,
                    "dropping reply to a comment outside the batch"
                ),
            },
        }
    }

    let by_creation = |a: &usize, b: &usize| {
        let (ra, rb) = (&records[*a], &records[*b]);
        (ra.created_at, ra.id).cmp(&(rb.created_at, rb.id))
    };
    roots.sort_by(by_creation);
    for siblings in children.iter_mut() {
        siblings.sort_by(by_creation);
    }

    roots
        .iter()
        .map(|&i| materialize(i, &records, &children, viewer, post_owner))
        .collect()
}

fn materialize(
    i: usize,
    records: &[CommentRecord],
    children: &[Vec<usize>],
    viewer: Option<UserId>,
    post_owner: UserId,
) -> CommentNode {
    let r = &records[i];
    let kids = children[i]
        .iter()
        .map(|&c| materialize(c, records, children, viewer, post_owner))
        .collect();
    let visible = r.is_public || viewer == Some(r.author) || viewer == Some(post_owner);
    if visible {
        CommentNode {
            id: r.id,
            parent: r.parent,
            author: Some(r.author),
            author_name: r.author_name.clone(),
            content: r.content.clone(),
            like_count: r.like_count,
            liked_by_viewer: r.liked_by_viewer,
            created_at: r.created_at,
            updated_at: r.updated_at,
            children: kids,
        }
    } else {
        CommentNode {
            id: r.id,
            parent: r.parent,
            author: None,
            author_name: String::from(REDACTED_AUTHOR_NAME),
            content: String::from(REDACTED_CONTENT),
            like_count: 0,
            liked_by_viewer: false,
            created_at: r.created_at,
            updated_at: r.updated_at,
            children: kids,
        }
    }
}

#[cfg(test)]
mod tests {
    use burogu_api::{CommentId, Time};
    use chrono::TimeZone;

    use super::*;

    fn at(minute: u32) -> Time {
        chrono::Utc
            .with_ymd_and_hms(2023, 3, 14, 12, minute, 0)
            .unwrap()
    }

    fn record(id: i64, parent: Option<i64>, author: i64, minute: u32) -> CommentRecord {
        CommentRecord {
            id: CommentId(id),
            parent: parent.map(CommentId),
            author: UserId(author),
            author_name: format!("user-{author}"),
            content: format!("comment {id}"),
            like_count: id,
            is_public: true,
            liked_by_viewer: false,
            created_at: at(minute),
            updated_at: at(minute),
        }
    }

    fn private(mut r: CommentRecord) -> CommentRecord {
        r.is_public = false;
        r
    }

    fn count(nodes: &[CommentNode]) -> usize {
        nodes.iter().map(|n| 1 + count(&n.children)).sum()
    }

    #[test]
    fn nests_replies_under_their_parent() {
        let roots = build_comment_tree(
            vec![
                record(1, None, 5, 0),
                record(2, Some(1), 6, 1),
                record(3, Some(1), 7, 2),
                record(4, Some(2), 5, 3),
                record(5, None, 6, 4),
            ],
            None,
            UserId(5),
        );
        assert_eq!(roots.len(), 2);
        assert_eq!(count(&roots), 5);
        assert_eq!(roots[0].id, CommentId(1));
        assert_eq!(roots[0].children.len(), 2);
        assert_eq!(roots[0].children[0].id, CommentId(2));
        assert_eq!(roots[0].children[0].children[0].id, CommentId(4));
        assert_eq!(roots[1].id, CommentId(5));
    }

    #[test]
    fn sorts_siblings_by_creation_then_id() {
        // store order scrambled on purpose; 2 and 3 share a timestamp
        let roots = build_comment_tree(
            vec![
                record(3, Some(1), 7, 1),
                record(1, None, 5, 0),
                record(2, Some(1), 6, 1),
                record(4, Some(1), 8, 0),
            ],
            None,
            UserId(5),
        );
        let order: Vec<i64> = roots[0].children.iter().map(|c| c.id.0).collect();
        assert_eq!(order, vec![4, 2, 3]);
    }

    #[test]
    fn sorts_roots_too() {
        let roots = build_comment_tree(
            vec![record(2, None, 5, 1), record(3, None, 5, 0), record(1, None, 5, 0)],
            None,
            UserId(5),
        );
        let order: Vec<i64> = roots.iter().map(|r| r.id.0).collect();
        assert_eq!(order, vec![1, 3, 2]);
    }

    #[test]
    fn drops_replies_whose_parent_is_missing() {
        let roots = build_comment_tree(
            vec![
                record(1, None, 5, 0),
                record(2, Some(99), 6, 1),
                record(3, Some(2), 7, 2),
            ],
            None,
            UserId(5),
        );
        // 2 references a parent outside the batch; 3 survives attached to
        // 2's slot, but 2 is unreachable so neither is returned
        assert_eq!(roots.len(), 1);
        assert_eq!(count(&roots), 1);
        assert_eq!(roots[0].id, CommentId(1));
    }

    #[test]
    fn orphan_without_replies_costs_exactly_one_node() {
        let roots = build_comment_tree(
            vec![
                record(1, None, 5, 0),
                record(2, Some(1), 6, 1),
                record(3, Some(99), 7, 2),
            ],
            None,
            UserId(5),
        );
        assert_eq!(count(&roots), 2);
    }

    #[test]
    fn empty_batch_builds_empty_tree() {
        assert_eq!(build_comment_tree(Vec::new(), Some(UserId(1)), UserId(2)), Vec::new());
    }

    #[test]
    fn redacts_private_comment_for_unrelated_viewer() {
        let roots = build_comment_tree(
            vec![private(record(1, None, 5, 0)), record(2, Some(1), 6, 1)],
            Some(UserId(9)),
            UserId(3),
        );
        let root = &roots[0];
        assert_eq!(root.author, None);
        assert_eq!(root.author_name, REDACTED_AUTHOR_NAME);
        assert_eq!(root.content, REDACTED_CONTENT);
        assert_eq!(root.like_count, 0);
        assert!(!root.liked_by_viewer);
        // the reply stays attached and fully visible
        assert_eq!(root.children.len(), 1);
        assert_eq!(root.children[0].author, Some(UserId(6)));
        assert_eq!(root.children[0].content, "comment 2");
    }

    #[test]
    fn redacts_for_anonymous_viewer() {
        let roots = build_comment_tree(vec![private(record(1, None, 5, 0))], None, UserId(5));
        // anonymous is never the author, even of the post owner's comments
        assert_eq!(roots[0].author, None);
    }

    #[test]
    fn author_sees_own_private_comment() {
        let roots = build_comment_tree(
            vec![private(record(1, None, 5, 0))],
            Some(UserId(5)),
            UserId(3),
        );
        assert_eq!(roots[0].author, Some(UserId(5)));
        assert_eq!(roots[0].content, "comment 1");
        assert_eq!(roots[0].like_count, 1);
    }

    #[test]
    fn post_owner_sees_private_comments() {
        let roots = build_comment_tree(
            vec![private(record(1, None, 5, 0))],
            Some(UserId(3)),
            UserId(3),
        );
        assert_eq!(roots[0].author, Some(UserId(5)));
    }

    #[test]
    fn redaction_does_not_change_tree_shape() {
        let records = vec![
            private(record(1, None, 5, 0)),
            record(2, Some(1), 6, 1),
            private(record(3, Some(1), 7, 2)),
            record(4, Some(3), 8, 3),
        ];
        let unredacted = build_comment_tree(records.clone(), Some(UserId(3)), UserId(3));
        let redacted = build_comment_tree(records, Some(UserId(9)), UserId(3));
        fn shape(nodes: &[CommentNode]) -> Vec<(i64, Vec<i64>)> {
            nodes
                .iter()
                .flat_map(|n| {
                    std::iter::once((n.id.0, n.children.iter().map(|c| c.id.0).collect()))
                        .chain(shape(&n.children))
                })
                .collect()
        }
        assert_eq!(shape(&unredacted), shape(&redacted));
    }
}
