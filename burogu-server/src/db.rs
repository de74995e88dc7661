use anyhow::Context;
use async_trait::async_trait;
use burogu_api::{
    BlogId, CommentId, CommentPatch, CommentRecord, NewComment, NewPost, PageSpec, PostDetail,
    PostId, PostPatch, PostSummary, SortOrder, TagCount, UserId, Uuid,
};
use sqlx::postgres::PgRow;
use sqlx::Row;

use crate::content::{PostMeta, Store};
use crate::Error;

pub struct PostgresStore<'c> {
    pub conn: &'c mut sqlx::PgConnection,
}

pub async fn recover_session(
    conn: &mut sqlx::PgConnection,
    token: Uuid,
) -> Result<UserId, Error> {
    // sessions are provisioned by the user service; we only look them up
    let row = sqlx::query("SELECT user_id FROM sessions WHERE token = $1")
        .bind(token)
        .fetch_optional(conn)
        .await
        .context("recovering session")?;
    match row {
        Some(row) => Ok(UserId(
            row.try_get("user_id").context("retrieving the user_id field")?,
        )),
        None => Err(Error::permission_denied()),
    }
}

fn comment_record_from_row(row: &PgRow) -> anyhow::Result<CommentRecord> {
    Ok(CommentRecord {
        id: CommentId(row.try_get("id").context("retrieving the id field")?),
        parent: row
            .try_get::<Option<i64>, _>("parent_id")
            .context("retrieving the parent_id field")?
            .map(CommentId),
        author: UserId(
            row.try_get("author_id")
                .context("retrieving the author_id field")?,
        ),
        author_name: row
            .try_get("author_name")
            .context("retrieving the author_name field")?,
        content: row.try_get("content").context("retrieving the content field")?,
        like_count: row
            .try_get("like_count")
            .context("retrieving the like_count field")?,
        is_public: row
            .try_get("is_public")
            .context("retrieving the is_public field")?,
        liked_by_viewer: row
            .try_get("liked_by_viewer")
            .context("retrieving the liked_by_viewer field")?,
        created_at: row
            .try_get("created_at")
            .context("retrieving the created_at field")?,
        updated_at: row
            .try_get("updated_at")
            .context("retrieving the updated_at field")?,
    })
}

fn post_summary_from_row(row: &PgRow) -> anyhow::Result<PostSummary> {
    Ok(PostSummary {
        id: PostId(row.try_get("id").context("retrieving the id field")?),
        blog: BlogId(row.try_get("blog_id").context("retrieving the blog_id field")?),
        title: row.try_get("title").context("retrieving the title field")?,
        is_public: row
            .try_get("is_public")
            .context("retrieving the is_public field")?,
        like_count: row
            .try_get("like_count")
            .context("retrieving the like_count field")?,
        comment_count: row
            .try_get("comment_count")
            .context("retrieving the comment_count field")?,
        view_count: row
            .try_get("view_count")
            .context("retrieving the view_count field")?,
        created_at: row
            .try_get("created_at")
            .context("retrieving the created_at field")?,
    })
}

impl PostgresStore<'_> {
    async fn post_owner(&mut self, post: PostId) -> Result<UserId, Error> {
        Ok(self.post_meta(post).await?.owner)
    }
}

#[async_trait]
impl Store for PostgresStore<'_> {
    async fn fetch_post_detail(
        &mut self,
        post: PostId,
        viewer: Option<UserId>,
    ) -> Result<PostDetail, Error> {
        let row = sqlx::query(
            "
                SELECT
                    p.id, p.blog_id, p.owner_id, p.title, p.content, p.is_public,
                    p.view_count, p.created_at, p.updated_at,
                    (SELECT COUNT(*) FROM post_likes pl WHERE pl.post_id = p.id)
                        AS like_count,
                    (SELECT COUNT(*) FROM comments c WHERE c.post_id = p.id)
                        AS comment_count,
                    EXISTS(
                        SELECT 1 FROM post_likes pl
                        WHERE pl.post_id = p.id AND pl.user_id = $2
                    ) AS liked_by_viewer
                FROM posts p
                WHERE p.id = $1
            ",
        )
        .bind(post.0)
        .bind(viewer.map(|u| u.0))
        .fetch_optional(&mut *self.conn)
        .await
        .with_context(|| format!("querying post {:?}", post))?
        .ok_or_else(|| Error::post_not_found(post))?;

        let owner = UserId(
            row.try_get("owner_id")
                .context("retrieving the owner_id field")?,
        );
        let is_public: bool = row
            .try_get("is_public")
            .context("retrieving the is_public field")?;
        // a private post does not exist as far as anyone else is concerned
        if !is_public && viewer != Some(owner) {
            return Err(Error::post_not_found(post));
        }

        let tags = sqlx::query("SELECT tag FROM post_tags WHERE post_id = $1 ORDER BY tag")
            .bind(post.0)
            .fetch_all(&mut *self.conn)
            .await
            .with_context(|| format!("querying tags of post {:?}", post))?
            .iter()
            .map(|row| row.try_get("tag").context("retrieving the tag field"))
            .collect::<anyhow::Result<Vec<String>>>()?;

        Ok(PostDetail {
            id: post,
            blog: BlogId(row.try_get("blog_id").context("retrieving the blog_id field")?),
            owner,
            title: row.try_get("title").context("retrieving the title field")?,
            content: row.try_get("content").context("retrieving the content field")?,
            is_public,
            like_count: row
                .try_get("like_count")
                .context("retrieving the like_count field")?,
            comment_count: row
                .try_get("comment_count")
                .context("retrieving the comment_count field")?,
            view_count: row
                .try_get("view_count")
                .context("retrieving the view_count field")?,
            liked_by_viewer: row
                .try_get("liked_by_viewer")
                .context("retrieving the liked_by_viewer field")?,
            tags,
            created_at: row
                .try_get("created_at")
                .context("retrieving the created_at field")?,
            updated_at: row
                .try_get("updated_at")
                .context("retrieving the updated_at field")?,
        })
    }

    async fn fetch_post_page(
        &mut self,
        blog: BlogId,
        viewer: Option<UserId>,
        page: &PageSpec,
    ) -> Result<Vec<PostSummary>, Error> {
        let order_by = match page.sort {
            SortOrder::Latest => "p.created_at DESC, p.id DESC",
            SortOrder::Oldest => "p.created_at, p.id",
            SortOrder::Popular => "like_count DESC, p.id DESC",
        };
        let rows = sqlx::query(&format!(
            "
                SELECT
                    p.id, p.blog_id, p.title, p.is_public, p.view_count, p.created_at,
                    (SELECT COUNT(*) FROM post_likes pl WHERE pl.post_id = p.id)
                        AS like_count,
                    (SELECT COUNT(*) FROM comments c WHERE c.post_id = p.id)
                        AS comment_count
                FROM posts p
                WHERE p.blog_id = $1
                AND (p.is_public OR p.owner_id = $2)
                ORDER BY {order_by}
                LIMIT $3 OFFSET $4
            ",
        ))
        .bind(blog.0)
        .bind(viewer.map(|u| u.0))
        .bind(page.size as i64)
        .bind(page.offset())
        .fetch_all(&mut *self.conn)
        .await
        .with_context(|| format!("querying post page of blog {:?}", blog))?;
        Ok(rows
            .iter()
            .map(post_summary_from_row)
            .collect::<anyhow::Result<Vec<_>>>()?)
    }

    async fn fetch_tag_list(&mut self, blog: BlogId) -> Result<Vec<TagCount>, Error> {
        let rows = sqlx::query(
            "
                SELECT pt.tag, COUNT(*) AS post_count
                FROM post_tags pt
                INNER JOIN posts p
                    ON p.id = pt.post_id
                WHERE p.blog_id = $1
                AND p.is_public
                GROUP BY pt.tag
                ORDER BY post_count DESC, pt.tag
            ",
        )
        .bind(blog.0)
        .fetch_all(&mut *self.conn)
        .await
        .with_context(|| format!("querying tag list of blog {:?}", blog))?;
        rows.iter()
            .map(|row| {
                Ok(TagCount {
                    name: row.try_get("tag").context("retrieving the tag field")?,
                    post_count: row
                        .try_get("post_count")
                        .context("retrieving the post_count field")?,
                })
            })
            .collect::<anyhow::Result<Vec<_>>>()
            .map_err(Error::from)
    }

    async fn fetch_flat_comments(
        &mut self,
        post: PostId,
        viewer: Option<UserId>,
    ) -> Result<Vec<CommentRecord>, Error> {
        let rows = sqlx::query(
            "
                SELECT
                    c.id, c.parent_id, c.author_id, u.name AS author_name,
                    c.content, c.is_public, c.created_at, c.updated_at,
                    (SELECT COUNT(*) FROM comment_likes cl WHERE cl.comment_id = c.id)
                        AS like_count,
                    EXISTS(
                        SELECT 1 FROM comment_likes cl
                        WHERE cl.comment_id = c.id AND cl.user_id = $2
                    ) AS liked_by_viewer
                FROM comments c
                INNER JOIN users u
                    ON u.id = c.author_id
                WHERE c.post_id = $1
                ORDER BY c.created_at, c.id
            ",
        )
        .bind(post.0)
        .bind(viewer.map(|u| u.0))
        .fetch_all(&mut *self.conn)
        .await
        .with_context(|| format!("querying comments of post {:?}", post))?;
        Ok(rows
            .iter()
            .map(comment_record_from_row)
            .collect::<anyhow::Result<Vec<_>>>()?)
    }

    async fn post_meta(&mut self, post: PostId) -> Result<PostMeta, Error> {
        let row = sqlx::query("SELECT blog_id, owner_id, is_public FROM posts WHERE id = $1")
            .bind(post.0)
            .fetch_optional(&mut *self.conn)
            .await
            .with_context(|| format!("querying metadata of post {:?}", post))?
            .ok_or_else(|| Error::post_not_found(post))?;
        Ok(PostMeta {
            blog: BlogId(row.try_get("blog_id").context("retrieving the blog_id field")?),
            owner: UserId(
                row.try_get("owner_id")
                    .context("retrieving the owner_id field")?,
            ),
            is_public: row
                .try_get("is_public")
                .context("retrieving the is_public field")?,
        })
    }

    async fn bump_view_count(&mut self, post: PostId) -> Result<(), Error> {
        // racing a delete is fine, the count just goes nowhere
        sqlx::query("UPDATE posts SET view_count = view_count + 1 WHERE id = $1")
            .bind(post.0)
            .execute(&mut *self.conn)
            .await
            .with_context(|| format!("bumping view count of post {:?}", post))?;
        Ok(())
    }

    async fn create_post(&mut self, owner: UserId, new: &NewPost) -> Result<PostId, Error> {
        let blog = sqlx::query("SELECT owner_id FROM blogs WHERE id = $1")
            .bind(new.blog.0)
            .fetch_optional(&mut *self.conn)
            .await
            .with_context(|| format!("querying blog {:?}", new.blog))?
            .ok_or_else(|| Error::blog_not_found(new.blog))?;
        let blog_owner: i64 = blog
            .try_get("owner_id")
            .context("retrieving the owner_id field")?;
        if blog_owner != owner.0 {
            return Err(Error::permission_denied());
        }

        let row = sqlx::query(
            "
                INSERT INTO posts
                    (blog_id, owner_id, title, content, is_public, view_count,
                     created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, 0, now(), now())
                RETURNING id
            ",
        )
        .bind(new.blog.0)
        .bind(owner.0)
        .bind(&new.title)
        .bind(&new.content)
        .bind(new.is_public)
        .fetch_one(&mut *self.conn)
        .await
        .context("inserting post")?;
        let post = PostId(row.try_get("id").context("retrieving the id field")?);

        for tag in &new.tags {
            sqlx::query("INSERT INTO post_tags (post_id, tag) VALUES ($1, $2)")
                .bind(post.0)
                .bind(tag)
                .execute(&mut *self.conn)
                .await
                .with_context(|| format!("inserting tag {:?} on post {:?}", tag, post))?;
        }
        Ok(post)
    }

    async fn update_post(
        &mut self,
        actor: UserId,
        post: PostId,
        patch: &PostPatch,
    ) -> Result<(), Error> {
        if self.post_owner(post).await? != actor {
            return Err(Error::permission_denied());
        }
        sqlx::query(
            "
                UPDATE posts
                SET title = COALESCE($2, title),
                    content = COALESCE($3, content),
                    is_public = COALESCE($4, is_public),
                    updated_at = now()
                WHERE id = $1
            ",
        )
        .bind(post.0)
        .bind(&patch.title)
        .bind(&patch.content)
        .bind(patch.is_public)
        .execute(&mut *self.conn)
        .await
        .with_context(|| format!("updating post {:?}", post))?;
        Ok(())
    }

    async fn delete_post(&mut self, actor: UserId, post: PostId) -> Result<(), Error> {
        if self.post_owner(post).await? != actor {
            return Err(Error::permission_denied());
        }
        // comments, likes and tags go with it via schema cascades
        sqlx::query("DELETE FROM posts WHERE id = $1")
            .bind(post.0)
            .execute(&mut *self.conn)
            .await
            .with_context(|| format!("deleting post {:?}", post))?;
        Ok(())
    }

    async fn create_comment(
        &mut self,
        author: UserId,
        post: PostId,
        new: &NewComment,
    ) -> Result<CommentId, Error> {
        let meta = self.post_meta(post).await?;
        if !meta.is_public && meta.owner != author {
            return Err(Error::post_not_found(post));
        }
        if let Some(parent) = new.parent {
            let row = sqlx::query("SELECT post_id FROM comments WHERE id = $1")
                .bind(parent.0)
                .fetch_optional(&mut *self.conn)
                .await
                .with_context(|| format!("querying parent comment {:?}", parent))?
                .ok_or_else(|| Error::comment_not_found(parent))?;
            let parent_post: i64 = row
                .try_get("post_id")
                .context("retrieving the post_id field")?;
            if parent_post != post.0 {
                return Err(Error::comment_not_found(parent));
            }
        }
        let row = sqlx::query(
            "
                INSERT INTO comments
                    (post_id, parent_id, author_id, content, is_public,
                     created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, now(), now())
                RETURNING id
            ",
        )
        .bind(post.0)
        .bind(new.parent.map(|p| p.0))
        .bind(author.0)
        .bind(&new.content)
        .bind(new.is_public)
        .fetch_one(&mut *self.conn)
        .await
        .context("inserting comment")?;
        Ok(CommentId(row.try_get("id").context("retrieving the id field")?))
    }

    async fn update_comment(
        &mut self,
        actor: UserId,
        comment: CommentId,
        patch: &CommentPatch,
    ) -> Result<PostId, Error> {
        let row = sqlx::query("SELECT author_id, post_id FROM comments WHERE id = $1")
            .bind(comment.0)
            .fetch_optional(&mut *self.conn)
            .await
            .with_context(|| format!("querying comment {:?}", comment))?
            .ok_or_else(|| Error::comment_not_found(comment))?;
        let author: i64 = row
            .try_get("author_id")
            .context("retrieving the author_id field")?;
        if author != actor.0 {
            return Err(Error::permission_denied());
        }
        sqlx::query(
            "
                UPDATE comments
                SET content = COALESCE($2, content),
                    is_public = COALESCE($3, is_public),
                    updated_at = now()
                WHERE id = $1
            ",
        )
        .bind(comment.0)
        .bind(&patch.content)
        .bind(patch.is_public)
        .execute(&mut *self.conn)
        .await
        .with_context(|| format!("updating comment {:?}", comment))?;
        Ok(PostId(
            row.try_get("post_id").context("retrieving the post_id field")?,
        ))
    }

    async fn delete_comment(
        &mut self,
        actor: UserId,
        comment: CommentId,
    ) -> Result<PostId, Error> {
        let row = sqlx::query(
            "
                SELECT c.author_id, c.post_id, p.owner_id
                FROM comments c
                INNER JOIN posts p
                    ON p.id = c.post_id
                WHERE c.id = $1
            ",
        )
        .bind(comment.0)
        .fetch_optional(&mut *self.conn)
        .await
        .with_context(|| format!("querying comment {:?}", comment))?
        .ok_or_else(|| Error::comment_not_found(comment))?;
        let author: i64 = row
            .try_get("author_id")
            .context("retrieving the author_id field")?;
        let post_owner: i64 = row
            .try_get("owner_id")
            .context("retrieving the owner_id field")?;
        // the comment's author and the post's owner may both remove it
        if actor.0 != author && actor.0 != post_owner {
            return Err(Error::permission_denied());
        }
        sqlx::query("DELETE FROM comments WHERE id = $1")
            .bind(comment.0)
            .execute(&mut *self.conn)
            .await
            .with_context(|| format!("deleting comment {:?}", comment))?;
        Ok(PostId(
            row.try_get("post_id").context("retrieving the post_id field")?,
        ))
    }

    async fn toggle_post_like(&mut self, actor: UserId, post: PostId) -> Result<bool, Error> {
        let meta = self.post_meta(post).await?;
        if !meta.is_public && meta.owner != actor {
            return Err(Error::post_not_found(post));
        }
        // concurrent toggles are serialized by the primary key on
        // (post_id, user_id), no app-side locking needed
        let inserted = sqlx::query(
            "
                INSERT INTO post_likes (post_id, user_id)
                VALUES ($1, $2)
                ON CONFLICT DO NOTHING
            ",
        )
        .bind(post.0)
        .bind(actor.0)
        .execute(&mut *self.conn)
        .await
        .with_context(|| format!("liking post {:?}", post))?;
        if inserted.rows_affected() == 1 {
            return Ok(true);
        }
        sqlx::query("DELETE FROM post_likes WHERE post_id = $1 AND user_id = $2")
            .bind(post.0)
            .bind(actor.0)
            .execute(&mut *self.conn)
            .await
            .with_context(|| format!("unliking post {:?}", post))?;
        Ok(false)
    }

    async fn toggle_comment_like(
        &mut self,
        actor: UserId,
        comment: CommentId,
    ) -> Result<(PostId, bool), Error> {
        let row = sqlx::query("SELECT post_id FROM comments WHERE id = $1")
            .bind(comment.0)
            .fetch_optional(&mut *self.conn)
            .await
            .with_context(|| format!("querying comment {:?}", comment))?
            .ok_or_else(|| Error::comment_not_found(comment))?;
        let post = PostId(
            row.try_get("post_id").context("retrieving the post_id field")?,
        );
        let meta = self.post_meta(post).await?;
        if !meta.is_public && meta.owner != actor {
            return Err(Error::post_not_found(post));
        }
        let inserted = sqlx::query(
            "
                INSERT INTO comment_likes (comment_id, user_id)
                VALUES ($1, $2)
                ON CONFLICT DO NOTHING
            ",
        )
        .bind(comment.0)
        .bind(actor.0)
        .execute(&mut *self.conn)
        .await
        .with_context(|| format!("liking comment {:?}", comment))?;
        if inserted.rows_affected() == 1 {
            return Ok((post, true));
        }
        sqlx::query("DELETE FROM comment_likes WHERE comment_id = $1 AND user_id = $2")
            .bind(comment.0)
            .bind(actor.0)
            .execute(&mut *self.conn)
            .await
            .with_context(|| format!("unliking comment {:?}", comment))?;
        Ok((post, false))
    }

    async fn set_post_tags(
        &mut self,
        actor: UserId,
        post: PostId,
        tags: &[String],
    ) -> Result<(), Error> {
        if self.post_owner(post).await? != actor {
            return Err(Error::permission_denied());
        }
        sqlx::query("DELETE FROM post_tags WHERE post_id = $1")
            .bind(post.0)
            .execute(&mut *self.conn)
            .await
            .with_context(|| format!("clearing tags of post {:?}", post))?;
        for tag in tags {
            sqlx::query("INSERT INTO post_tags (post_id, tag) VALUES ($1, $2)")
                .bind(post.0)
                .bind(tag)
                .execute(&mut *self.conn)
                .await
                .with_context(|| format!("inserting tag {:?} on post {:?}", tag, post))?;
        }
        Ok(())
    }
}
