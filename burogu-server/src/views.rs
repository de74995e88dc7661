use std::time::Duration;

use burogu_api::{PostId, Time};

use crate::kv::KvStore;

const VIEW_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// First-view-wins gate in front of the persisted view counter.
///
/// One key per (post, client, day); whoever manages the atomic
/// set-if-absent counts the view, everyone else within the window does
/// not. The day bucket keeps the key space bounded and means a client
/// counts again tomorrow even if the TTL has not quite elapsed.
#[derive(Clone)]
pub struct ViewGate<K> {
    kv: K,
}

impl<K: KvStore> ViewGate<K> {
    pub fn new(kv: K) -> ViewGate<K> {
        ViewGate { kv }
    }

    /// Returns true iff this client's view of this post should be
    /// counted. An unreachable store is an error here; the caller
    /// decides that a lost count is better than a failed read.
    pub async fn should_count_view(&self, post: PostId, client: &str) -> anyhow::Result<bool> {
        self.should_count_view_at(post, client, chrono::Utc::now()).await
    }

    async fn should_count_view_at(
        &self,
        post: PostId,
        client: &str,
        now: Time,
    ) -> anyhow::Result<bool> {
        let key = format!(
            "blog:views::post:{}:client:{}:day:{}",
            post.0,
            client,
            now.format("%Y-%m-%d"),
        );
        self.kv.set_if_absent(&key, "1", VIEW_TTL).await
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::kv::testing::{FailingKv, MemoryKv};

    fn noon() -> Time {
        chrono::Utc.with_ymd_and_hms(2023, 3, 14, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn first_view_counts_second_does_not() {
        let gate = ViewGate::new(MemoryKv::new());
        assert!(gate
            .should_count_view_at(PostId(42), "1.2.3.4", noon())
            .await
            .unwrap());
        assert!(!gate
            .should_count_view_at(PostId(42), "1.2.3.4", noon())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn distinct_clients_both_count() {
        let gate = ViewGate::new(MemoryKv::new());
        assert!(gate
            .should_count_view_at(PostId(42), "1.2.3.4", noon())
            .await
            .unwrap());
        assert!(gate
            .should_count_view_at(PostId(42), "5.6.7.8", noon())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn distinct_posts_both_count() {
        let gate = ViewGate::new(MemoryKv::new());
        assert!(gate
            .should_count_view_at(PostId(42), "1.2.3.4", noon())
            .await
            .unwrap());
        assert!(gate
            .should_count_view_at(PostId(43), "1.2.3.4", noon())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn counts_again_once_the_window_expires() {
        let kv = MemoryKv::new();
        let gate = ViewGate::new(kv.clone());
        assert!(gate
            .should_count_view_at(PostId(42), "1.2.3.4", noon())
            .await
            .unwrap());
        kv.advance(std::time::Duration::from_secs(25 * 60 * 60));
        assert!(gate
            .should_count_view_at(PostId(42), "1.2.3.4", noon())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn counts_again_on_the_next_day_bucket() {
        let gate = ViewGate::new(MemoryKv::new());
        assert!(gate
            .should_count_view_at(PostId(42), "1.2.3.4", noon())
            .await
            .unwrap());
        let tomorrow = noon() + chrono::Duration::hours(13);
        assert!(gate
            .should_count_view_at(PostId(42), "1.2.3.4", tomorrow)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn unreachable_store_surfaces_an_error() {
        let gate = ViewGate::new(FailingKv);
        assert!(gate.should_count_view(PostId(42), "1.2.3.4").await.is_err());
    }
}
