use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

use burogu_api::{
    BlogId, CommentId, CommentNode, CommentPatch, CommentRecord, NewComment, NewPost, PageSpec,
    PostDetail, PostId, PostPatch, PostSummary, TagCount, UserId,
};

use crate::{
    cache::{self, CacheCoordinator},
    kv::KvStore,
    tree::build_comment_tree,
    views::ViewGate,
    Error,
};

/// The bits of a post the orchestration layer needs before touching
/// comments or caches: where it lives and who may see it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PostMeta {
    pub blog: BlogId,
    pub owner: UserId,
    pub is_public: bool,
}

/// Abstract data store consumed by [`ContentService`].
///
/// The Postgres implementation lives in `db.rs`; tests substitute an
/// in-memory one. Mutations enforce their own ownership rules and
/// return whatever ids the caller needs to invalidate the right cache
/// regions afterwards.
#[async_trait]
pub trait Store: Send {
    async fn fetch_post_detail(
        &mut self,
        post: PostId,
        viewer: Option<UserId>,
    ) -> Result<PostDetail, Error>;

    async fn fetch_post_page(
        &mut self,
        blog: BlogId,
        viewer: Option<UserId>,
        page: &PageSpec,
    ) -> Result<Vec<PostSummary>, Error>;

    async fn fetch_tag_list(&mut self, blog: BlogId) -> Result<Vec<TagCount>, Error>;

    async fn fetch_flat_comments(
        &mut self,
        post: PostId,
        viewer: Option<UserId>,
    ) -> Result<Vec<CommentRecord>, Error>;

    async fn post_meta(&mut self, post: PostId) -> Result<PostMeta, Error>;

    async fn bump_view_count(&mut self, post: PostId) -> Result<(), Error>;

    async fn create_post(&mut self, owner: UserId, new: &NewPost) -> Result<PostId, Error>;

    async fn update_post(
        &mut self,
        actor: UserId,
        post: PostId,
        patch: &PostPatch,
    ) -> Result<(), Error>;

    async fn delete_post(&mut self, actor: UserId, post: PostId) -> Result<(), Error>;

    async fn create_comment(
        &mut self,
        author: UserId,
        post: PostId,
        new: &NewComment,
    ) -> Result<CommentId, Error>;

    /// Returns the owning post.
    async fn update_comment(
        &mut self,
        actor: UserId,
        comment: CommentId,
        patch: &CommentPatch,
    ) -> Result<PostId, Error>;

    /// Returns the owning post.
    async fn delete_comment(&mut self, actor: UserId, comment: CommentId)
        -> Result<PostId, Error>;

    /// Returns whether the post is liked after the toggle. A private
    /// post reads as not-found to everyone but its owner, here too.
    async fn toggle_post_like(&mut self, actor: UserId, post: PostId) -> Result<bool, Error>;

    /// Returns the owning post and whether the comment is liked after
    /// the toggle. Subject to the same visibility rule as post likes.
    async fn toggle_comment_like(
        &mut self,
        actor: UserId,
        comment: CommentId,
    ) -> Result<(PostId, bool), Error>;

    async fn set_post_tags(
        &mut self,
        actor: UserId,
        post: PostId,
        tags: &[String],
    ) -> Result<(), Error>;
}

/// Orchestrates reads and writes around the store and the cache.
///
/// Reads are read-through: cache hit wins, a miss (or an unreachable
/// cache, which only gets logged) computes from the store and
/// repopulates. Writes hit the store first and invalidate afterwards,
/// never the other way around, so a racing reader can only repopulate
/// from post-mutation data.
#[derive(Clone)]
pub struct ContentService<K> {
    kv: K,
    coordinator: CacheCoordinator<K>,
    views: ViewGate<K>,
}

impl<K: KvStore> ContentService<K> {
    pub fn new(kv: K) -> ContentService<K> {
        ContentService {
            coordinator: CacheCoordinator::new(kv.clone()),
            views: ViewGate::new(kv.clone()),
            kv,
        }
    }

    async fn cache_get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.kv.get(key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => Some(value),
                Err(err) => {
                    tracing::warn!(?err, %key, "discarding undecodable cache entry");
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                tracing::warn!(?err, %key, "cache read failed, computing from store");
                None
            }
        }
    }

    async fn cache_put<T: Serialize>(&self, key: &str, value: &T) {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(err) => {
                tracing::warn!(?err, %key, "not caching unserializable value");
                return;
            }
        };
        if let Err(err) = self.kv.set(key, &raw, cache::DEFAULT_TTL).await {
            tracing::warn!(?err, %key, "cache write failed");
        }
    }

    async fn count_view<S: Store>(
        &self,
        store: &mut S,
        post: PostId,
        client: &str,
    ) -> Result<(), Error> {
        match self.views.should_count_view(post, client).await {
            Ok(true) => store.bump_view_count(post).await,
            Ok(false) => Ok(()),
            Err(err) => {
                tracing::warn!(?err, post = post.0, "view gate unreachable, skipping count");
                Ok(())
            }
        }
    }

    /// Post detail page. Counts the view (at most once per client per
    /// day) whether or not the response comes from the cache, but only
    /// once the read is known to resolve: a probe for a post the viewer
    /// cannot see must not move the counter.
    pub async fn post_detail<S: Store>(
        &self,
        store: &mut S,
        post: PostId,
        viewer: Option<UserId>,
        client: &str,
    ) -> Result<PostDetail, Error> {
        let key = cache::post_details_key(post, viewer);
        if let Some(hit) = self.cache_get::<PostDetail>(&key).await {
            self.count_view(store, post, client).await?;
            return Ok(hit);
        }
        let detail = store.fetch_post_detail(post, viewer).await?;
        self.count_view(store, post, client).await?;
        // The store only hands a private post to its owner, and the key
        // is viewer-scoped, so this guard is about never letting private
        // content sit under any other key.
        if detail.is_public || viewer == Some(detail.owner) {
            self.cache_put(&key, &detail).await;
        }
        Ok(detail)
    }

    pub async fn post_page<S: Store>(
        &self,
        store: &mut S,
        blog: BlogId,
        viewer: Option<UserId>,
        page: &PageSpec,
    ) -> Result<Vec<PostSummary>, Error> {
        let key = cache::post_list_key(blog, page, viewer);
        if let Some(hit) = self.cache_get::<Vec<PostSummary>>(&key).await {
            return Ok(hit);
        }
        let posts = store.fetch_post_page(blog, viewer, page).await?;
        self.cache_put(&key, &posts).await;
        Ok(posts)
    }

    pub async fn tag_list<S: Store>(
        &self,
        store: &mut S,
        blog: BlogId,
    ) -> Result<Vec<TagCount>, Error> {
        let key = cache::tag_list_key(blog);
        if let Some(hit) = self.cache_get::<Vec<TagCount>>(&key).await {
            return Ok(hit);
        }
        let tags = store.fetch_tag_list(blog).await?;
        self.cache_put(&key, &tags).await;
        Ok(tags)
    }

    pub async fn comment_tree<S: Store>(
        &self,
        store: &mut S,
        post: PostId,
        viewer: Option<UserId>,
    ) -> Result<Vec<CommentNode>, Error> {
        // comments on a private post are as invisible as the post itself
        let meta = store.post_meta(post).await?;
        if !meta.is_public && viewer != Some(meta.owner) {
            return Err(Error::post_not_found(post));
        }
        let key = cache::comments_key(post, viewer);
        if let Some(hit) = self.cache_get::<Vec<CommentNode>>(&key).await {
            return Ok(hit);
        }
        let records = store.fetch_flat_comments(post, viewer).await?;
        let roots = build_comment_tree(records, viewer, meta.owner);
        // redaction is baked into the tree per viewer, and the key is
        // viewer-scoped, so caching is always safe here
        self.cache_put(&key, &roots).await;
        Ok(roots)
    }

    pub async fn create_post<S: Store>(
        &self,
        store: &mut S,
        owner: UserId,
        new: &NewPost,
    ) -> Result<PostId, Error> {
        new.validate()?;
        let post = store.create_post(owner, new).await?;
        self.coordinator.post_created(new.blog).await;
        Ok(post)
    }

    pub async fn update_post<S: Store>(
        &self,
        store: &mut S,
        actor: UserId,
        post: PostId,
        patch: &PostPatch,
    ) -> Result<(), Error> {
        patch.validate()?;
        let meta = store.post_meta(post).await?;
        store.update_post(actor, post, patch).await?;
        self.coordinator.post_updated(meta.blog, post).await;
        Ok(())
    }

    pub async fn delete_post<S: Store>(
        &self,
        store: &mut S,
        actor: UserId,
        post: PostId,
    ) -> Result<(), Error> {
        let meta = store.post_meta(post).await?;
        store.delete_post(actor, post).await?;
        self.coordinator.post_deleted(meta.blog, post).await;
        Ok(())
    }

    pub async fn create_comment<S: Store>(
        &self,
        store: &mut S,
        author: UserId,
        post: PostId,
        new: &NewComment,
    ) -> Result<CommentId, Error> {
        new.validate()?;
        let meta = store.post_meta(post).await?;
        let comment = store.create_comment(author, post, new).await?;
        self.coordinator.comment_changed(meta.blog, post).await;
        Ok(comment)
    }

    pub async fn update_comment<S: Store>(
        &self,
        store: &mut S,
        actor: UserId,
        comment: CommentId,
        patch: &CommentPatch,
    ) -> Result<(), Error> {
        patch.validate()?;
        let post = store.update_comment(actor, comment, patch).await?;
        let meta = store.post_meta(post).await?;
        self.coordinator.comment_changed(meta.blog, post).await;
        Ok(())
    }

    pub async fn delete_comment<S: Store>(
        &self,
        store: &mut S,
        actor: UserId,
        comment: CommentId,
    ) -> Result<(), Error> {
        let post = store.delete_comment(actor, comment).await?;
        let meta = store.post_meta(post).await?;
        self.coordinator.comment_changed(meta.blog, post).await;
        Ok(())
    }

    pub async fn toggle_post_like<S: Store>(
        &self,
        store: &mut S,
        actor: UserId,
        post: PostId,
    ) -> Result<bool, Error> {
        let meta = store.post_meta(post).await?;
        let liked = store.toggle_post_like(actor, post).await?;
        self.coordinator.post_like_toggled(meta.blog, post, actor).await;
        Ok(liked)
    }

    pub async fn toggle_comment_like<S: Store>(
        &self,
        store: &mut S,
        actor: UserId,
        comment: CommentId,
    ) -> Result<bool, Error> {
        let (post, liked) = store.toggle_comment_like(actor, comment).await?;
        self.coordinator.comment_like_toggled(post, comment, actor).await;
        Ok(liked)
    }

    pub async fn set_post_tags<S: Store>(
        &self,
        store: &mut S,
        actor: UserId,
        post: PostId,
        tags: &[String],
    ) -> Result<(), Error> {
        for tag in tags {
            burogu_api::validate_string(tag)?;
        }
        let meta = store.post_meta(post).await?;
        store.set_post_tags(actor, post, tags).await?;
        self.coordinator.tags_changed(meta.blog, post).await;
        Ok(())
    }
}
