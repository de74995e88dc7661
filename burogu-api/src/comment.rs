use crate::{Time, UserId};

/// Author name shown in place of a private comment's author.
pub const REDACTED_AUTHOR_NAME: &str = "private user";

/// Body shown in place of a private comment's content.
pub const REDACTED_CONTENT: &str = "this is a private comment";

#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
pub struct CommentId(pub i64);

impl CommentId {
    pub fn stub() -> CommentId {
        CommentId(0)
    }
}

/// A comment row as fetched from the store, flat and unfiltered.
///
/// Privacy is resolved later, at tree-assembly time, because whether a
/// comment is visible depends on who is looking at it.
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct CommentRecord {
    pub id: CommentId,
    pub parent: Option<CommentId>,
    pub author: UserId,
    pub author_name: String,
    pub content: String,
    pub like_count: i64,
    pub is_public: bool,
    pub liked_by_viewer: bool,
    pub created_at: Time,
    pub updated_at: Time,
}

/// A comment as returned to a viewer: nested replies, privacy applied.
///
/// `author` is `None` when the comment was redacted for this viewer. A
/// redacted node keeps its position and its children.
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct CommentNode {
    pub id: CommentId,
    pub parent: Option<CommentId>,
    pub author: Option<UserId>,
    pub author_name: String,
    pub content: String,
    pub like_count: i64,
    pub liked_by_viewer: bool,
    pub created_at: Time,
    pub updated_at: Time,
    pub children: Vec<CommentNode>,
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct NewComment {
    pub parent: Option<CommentId>,
    pub content: String,
    pub is_public: bool,
}

impl NewComment {
    pub fn validate(&self) -> Result<(), crate::Error> {
        crate::validate_string(&self.content)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct CommentPatch {
    pub content: Option<String>,
    pub is_public: Option<bool>,
}

impl CommentPatch {
    pub fn validate(&self) -> Result<(), crate::Error> {
        if let Some(content) = &self.content {
            crate::validate_string(content)?;
        }
        Ok(())
    }
}
