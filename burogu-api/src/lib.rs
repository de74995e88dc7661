use chrono::Utc;

pub use uuid::Uuid;
pub type Time = chrono::DateTime<Utc>;

mod comment;
mod error;
mod post;
mod tag;
mod user;

pub use comment::{
    CommentId, CommentNode, CommentPatch, CommentRecord, NewComment, REDACTED_AUTHOR_NAME,
    REDACTED_CONTENT,
};
pub use error::Error;
pub use post::{
    BlogId, NewPost, PageSpec, PostDetail, PostId, PostPatch, PostSummary, SortOrder,
};
pub use tag::TagCount;
pub use user::UserId;

pub fn validate_string(s: &str) -> Result<(), Error> {
    if s.contains('\0') {
        Err(Error::NullByteInString(String::from(s)))
    } else {
        Ok(())
    }
}
