use crate::{Time, UserId};

#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
pub struct BlogId(pub i64);

impl BlogId {
    pub fn stub() -> BlogId {
        BlogId(0)
    }
}

#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
pub struct PostId(pub i64);

impl PostId {
    pub fn stub() -> PostId {
        PostId(0)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Latest,
    Oldest,
    Popular,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Latest => "latest",
            SortOrder::Oldest => "oldest",
            SortOrder::Popular => "popular",
        }
    }
}

impl Default for SortOrder {
    fn default() -> SortOrder {
        SortOrder::Latest
    }
}

/// Which page of a blog's post list to fetch. Pages are 1-based.
#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct PageSpec {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_size")]
    pub size: u32,
    #[serde(default)]
    pub sort: SortOrder,
}

fn default_page() -> u32 {
    1
}

fn default_size() -> u32 {
    20
}

impl PageSpec {
    pub fn offset(&self) -> i64 {
        (self.page.max(1) as i64 - 1) * self.size as i64
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct PostDetail {
    pub id: PostId,
    pub blog: BlogId,
    pub owner: UserId,
    pub title: String,
    pub content: String,
    pub is_public: bool,
    pub like_count: i64,
    pub comment_count: i64,
    pub view_count: i64,
    pub liked_by_viewer: bool,
    pub tags: Vec<String>,
    pub created_at: Time,
    pub updated_at: Time,
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct PostSummary {
    pub id: PostId,
    pub blog: BlogId,
    pub title: String,
    pub is_public: bool,
    pub like_count: i64,
    pub comment_count: i64,
    pub view_count: i64,
    pub created_at: Time,
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct NewPost {
    pub blog: BlogId,
    pub title: String,
    pub content: String,
    pub is_public: bool,
    pub tags: Vec<String>,
}

impl NewPost {
    pub fn validate(&self) -> Result<(), crate::Error> {
        crate::validate_string(&self.title)?;
        crate::validate_string(&self.content)?;
        for tag in &self.tags {
            crate::validate_string(tag)?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct PostPatch {
    pub title: Option<String>,
    pub content: Option<String>,
    pub is_public: Option<bool>,
}

impl PostPatch {
    pub fn validate(&self) -> Result<(), crate::Error> {
        if let Some(title) = &self.title {
            crate::validate_string(title)?;
        }
        if let Some(content) = &self.content {
            crate::validate_string(content)?;
        }
        Ok(())
    }
}
