use axum::{
    extract::{Path, Query, State},
    Json,
};
use burogu_api::{
    BlogId, CommentId, CommentNode, CommentPatch, NewComment, NewPost, PageSpec, PostDetail,
    PostId, PostPatch, PostSummary, TagCount,
};

use crate::{
    content::ContentService,
    db::PostgresStore,
    extractors::{Auth, ClientIp, MaybeAuth, PgConn},
    kv::RedisKv,
    Error,
};

pub async fn create_post(
    Auth(user): Auth,
    State(content): State<ContentService<RedisKv>>,
    mut conn: PgConn,
    Json(data): Json<NewPost>,
) -> Result<Json<PostId>, Error> {
    let mut store = PostgresStore { conn: &mut *conn };
    Ok(Json(content.create_post(&mut store, user, &data).await?))
}

pub async fn fetch_post(
    MaybeAuth(viewer): MaybeAuth,
    ClientIp(client): ClientIp,
    State(content): State<ContentService<RedisKv>>,
    mut conn: PgConn,
    Path(post): Path<PostId>,
) -> Result<Json<PostDetail>, Error> {
    let mut store = PostgresStore { conn: &mut *conn };
    Ok(Json(
        content.post_detail(&mut store, post, viewer, &client).await?,
    ))
}

pub async fn update_post(
    Auth(user): Auth,
    State(content): State<ContentService<RedisKv>>,
    mut conn: PgConn,
    Path(post): Path<PostId>,
    Json(patch): Json<PostPatch>,
) -> Result<(), Error> {
    let mut store = PostgresStore { conn: &mut *conn };
    content.update_post(&mut store, user, post, &patch).await
}

pub async fn delete_post(
    Auth(user): Auth,
    State(content): State<ContentService<RedisKv>>,
    mut conn: PgConn,
    Path(post): Path<PostId>,
) -> Result<(), Error> {
    let mut store = PostgresStore { conn: &mut *conn };
    content.delete_post(&mut store, user, post).await
}

pub async fn fetch_post_page(
    MaybeAuth(viewer): MaybeAuth,
    State(content): State<ContentService<RedisKv>>,
    mut conn: PgConn,
    Path(blog): Path<BlogId>,
    Query(page): Query<PageSpec>,
) -> Result<Json<Vec<PostSummary>>, Error> {
    let mut store = PostgresStore { conn: &mut *conn };
    Ok(Json(
        content.post_page(&mut store, blog, viewer, &page).await?,
    ))
}

pub async fn fetch_tag_list(
    State(content): State<ContentService<RedisKv>>,
    mut conn: PgConn,
    Path(blog): Path<BlogId>,
) -> Result<Json<Vec<TagCount>>, Error> {
    let mut store = PostgresStore { conn: &mut *conn };
    Ok(Json(content.tag_list(&mut store, blog).await?))
}

pub async fn fetch_comments(
    MaybeAuth(viewer): MaybeAuth,
    State(content): State<ContentService<RedisKv>>,
    mut conn: PgConn,
    Path(post): Path<PostId>,
) -> Result<Json<Vec<CommentNode>>, Error> {
    let mut store = PostgresStore { conn: &mut *conn };
    Ok(Json(content.comment_tree(&mut store, post, viewer).await?))
}

pub async fn create_comment(
    Auth(user): Auth,
    State(content): State<ContentService<RedisKv>>,
    mut conn: PgConn,
    Path(post): Path<PostId>,
    Json(data): Json<NewComment>,
) -> Result<Json<CommentId>, Error> {
    let mut store = PostgresStore { conn: &mut *conn };
    Ok(Json(
        content.create_comment(&mut store, user, post, &data).await?,
    ))
}

pub async fn update_comment(
    Auth(user): Auth,
    State(content): State<ContentService<RedisKv>>,
    mut conn: PgConn,
    Path(comment): Path<CommentId>,
    Json(patch): Json<CommentPatch>,
) -> Result<(), Error> {
    let mut store = PostgresStore { conn: &mut *conn };
    content.update_comment(&mut store, user, comment, &patch).await
}

pub async fn delete_comment(
    Auth(user): Auth,
    State(content): State<ContentService<RedisKv>>,
    mut conn: PgConn,
    Path(comment): Path<CommentId>,
) -> Result<(), Error> {
    let mut store = PostgresStore { conn: &mut *conn };
    content.delete_comment(&mut store, user, comment).await
}

pub async fn toggle_post_like(
    Auth(user): Auth,
    State(content): State<ContentService<RedisKv>>,
    mut conn: PgConn,
    Path(post): Path<PostId>,
) -> Result<Json<bool>, Error> {
    let mut store = PostgresStore { conn: &mut *conn };
    Ok(Json(content.toggle_post_like(&mut store, user, post).await?))
}

pub async fn toggle_comment_like(
    Auth(user): Auth,
    State(content): State<ContentService<RedisKv>>,
    mut conn: PgConn,
    Path(comment): Path<CommentId>,
) -> Result<Json<bool>, Error> {
    let mut store = PostgresStore { conn: &mut *conn };
    Ok(Json(
        content.toggle_comment_like(&mut store, user, comment).await?,
    ))
}

pub async fn set_post_tags(
    Auth(user): Auth,
    State(content): State<ContentService<RedisKv>>,
    mut conn: PgConn,
    Path(post): Path<PostId>,
    Json(tags): Json<Vec<String>>,
) -> Result<(), Error> {
    let mut store = PostgresStore { conn: &mut *conn };
    content.set_post_tags(&mut store, user, post, &tags).await
}
