use std::net::SocketAddr;

use anyhow::Context;
use axum::{
    routing::{get, patch, post, put},
    Router,
};

mod cache;
mod content;
mod db;
mod error;
mod extractors;
mod handlers;
mod kv;
mod tree;
mod views;

pub use error::Error;

use extractors::{AppState, PgPool};

#[derive(structopt::StructOpt)]
struct Opt {
    /// Address to listen on
    #[structopt(short, long, default_value = "127.0.0.1:3000")]
    bind: SocketAddr,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opt = <Opt as structopt::StructOpt>::from_args();
    tracing_subscriber::fmt::init();

    let db_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let db = sqlx::postgres::PgPoolOptions::new()
        .max_connections(8)
        .connect(&db_url)
        .await
        .with_context(|| format!("Error opening database {:?}", db_url))?;

    let redis_url = std::env::var("REDIS_URL").context("REDIS_URL must be set")?;
    let kv = kv::RedisKv::connect(&redis_url)
        .await
        .with_context(|| format!("Error connecting to redis {:?}", redis_url))?;

    let state = AppState {
        db: PgPool::new(db),
        content: content::ContentService::new(kv),
    };

    let app = Router::new()
        .route("/api/posts", post(handlers::create_post))
        .route(
            "/api/posts/:post",
            get(handlers::fetch_post)
                .patch(handlers::update_post)
                .delete(handlers::delete_post),
        )
        .route(
            "/api/posts/:post/comments",
            get(handlers::fetch_comments).post(handlers::create_comment),
        )
        .route("/api/posts/:post/like", post(handlers::toggle_post_like))
        .route("/api/posts/:post/tags", put(handlers::set_post_tags))
        .route(
            "/api/comments/:comment",
            patch(handlers::update_comment).delete(handlers::delete_comment),
        )
        .route(
            "/api/comments/:comment/like",
            post(handlers::toggle_comment_like),
        )
        .route("/api/blogs/:blog/posts", get(handlers::fetch_post_page))
        .route("/api/blogs/:blog/tags", get(handlers::fetch_tag_list))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state);

    tracing::info!("listening on {}", opt.bind);
    axum::Server::bind(&opt.bind)
        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .context("serving axum webserver")
}
