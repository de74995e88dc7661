use std::time::Duration;

use burogu_api::{BlogId, CommentId, PageSpec, PostId, UserId};

use crate::kv::KvStore;

/// Every cached entry lives under this namespace:
/// `blog:cache:<region>::<entityType>:<id>[:<subkey>]*`
const NAMESPACE: &str = "blog:cache";

/// Default expiry for all cache regions.
pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);

fn viewer_part(viewer: Option<UserId>) -> String {
    match viewer {
        Some(user) => user.0.to_string(),
        None => String::from("anonymous"),
    }
}

// Key builders, one per region. Read and invalidation paths both go
// through these functions so the two can never drift apart.

pub fn comments_key(post: PostId, viewer: Option<UserId>) -> String {
    format!("{NAMESPACE}:comments::post:{}:user:{}", post.0, viewer_part(viewer))
}

pub fn comments_pattern(post: PostId) -> String {
    format!("{NAMESPACE}:comments::post:{}:user:*", post.0)
}

pub fn post_details_key(post: PostId, viewer: Option<UserId>) -> String {
    format!("{NAMESPACE}:postDetails::post:{}:user:{}", post.0, viewer_part(viewer))
}

pub fn post_details_pattern(post: PostId) -> String {
    format!("{NAMESPACE}:postDetails::post:{}:user:*", post.0)
}

pub fn post_list_key(blog: BlogId, page: &PageSpec, viewer: Option<UserId>) -> String {
    format!(
        "{NAMESPACE}:postList::blog:{}:page:{}:size:{}:sort:{}:user:{}",
        blog.0,
        page.page,
        page.size,
        page.sort.as_str(),
        viewer_part(viewer),
    )
}

pub fn post_list_pattern(blog: BlogId) -> String {
    format!("{NAMESPACE}:postList::blog:{}:*", blog.0)
}

pub fn tag_list_key(blog: BlogId) -> String {
    format!("{NAMESPACE}:tagList::blog:{}", blog.0)
}

pub fn post_liked_key(post: PostId, user: UserId) -> String {
    format!("{NAMESPACE}:postLiked::post:{}:user:{}", post.0, user.0)
}

pub fn comment_liked_key(comment: CommentId, user: UserId) -> String {
    format!("{NAMESPACE}:commentLiked::comment:{}:user:{}", comment.0, user.0)
}

/// Maps domain mutations to the cache entries they make stale, and
/// deletes those entries.
///
/// Invalidation runs synchronously after the store write and before the
/// mutation reports success, so a reader racing the mutation either sees
/// the old cache entry before the delete or repopulates from the store
/// after it. Failures are logged and swallowed: the cache is
/// read-through, so a missed invalidation heals on entry expiry, whereas
/// failing the write would lose user data over a cache hiccup. Every
/// method is idempotent.
#[derive(Clone)]
pub struct CacheCoordinator<K> {
    kv: K,
}

impl<K: KvStore> CacheCoordinator<K> {
    pub fn new(kv: K) -> CacheCoordinator<K> {
        CacheCoordinator { kv }
    }

    /// A comment was created, edited or deleted. Comment counts surface
    /// in post lists, so those go too.
    pub async fn comment_changed(&self, blog: BlogId, post: PostId) {
        self.del_pattern(comments_pattern(post)).await;
        self.del_pattern(post_list_pattern(blog)).await;
    }

    pub async fn post_created(&self, blog: BlogId) {
        self.del_pattern(post_list_pattern(blog)).await;
        self.del(tag_list_key(blog)).await;
    }

    pub async fn post_updated(&self, blog: BlogId, post: PostId) {
        self.del_pattern(post_list_pattern(blog)).await;
        self.del(tag_list_key(blog)).await;
        self.del_pattern(post_details_pattern(post)).await;
    }

    pub async fn post_deleted(&self, blog: BlogId, post: PostId) {
        self.del_pattern(post_list_pattern(blog)).await;
        self.del(tag_list_key(blog)).await;
        self.del_pattern(post_details_pattern(post)).await;
        self.del_pattern(comments_pattern(post)).await;
    }

    pub async fn post_like_toggled(&self, blog: BlogId, post: PostId, user: UserId) {
        self.del_pattern(post_details_pattern(post)).await;
        self.del_pattern(post_list_pattern(blog)).await;
        self.del(post_liked_key(post, user)).await;
    }

    pub async fn comment_like_toggled(&self, post: PostId, comment: CommentId, user: UserId) {
        self.del_pattern(comments_pattern(post)).await;
        self.del(comment_liked_key(comment, user)).await;
    }

    /// A post's tag set was replaced. Tags also surface on the post's
    /// detail page, so its entries go too.
    pub async fn tags_changed(&self, blog: BlogId, post: PostId) {
        self.del(tag_list_key(blog)).await;
        self.del_pattern(post_details_pattern(post)).await;
    }

    async fn del(&self, key: String) {
        if let Err(err) = self.kv.del(&key).await {
            tracing::warn!(?err, %key, "cache invalidation failed, entry left to expire");
        }
    }

    async fn del_pattern(&self, pattern: String) {
        let keys = match self.kv.scan(&pattern).await {
            Ok(keys) => keys,
            Err(err) => {
                tracing::warn!(?err, %pattern, "cache scan failed, entries left to expire");
                return;
            }
        };
        if keys.is_empty() {
            return;
        }
        if let Err(err) = self.kv.del_batch(&keys).await {
            tracing::warn!(?err, %pattern, "cache invalidation failed, entries left to expire");
        }
    }
}
