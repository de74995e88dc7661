/// One tag of a blog, with the number of public posts carrying it.
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct TagCount {
    pub name: String,
    pub post_count: i64,
}
