use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::warn;

use crate::error::AppResult;
use crate::models::UnreadConversation;
use crate::remote::RemoteApi;

/// Account-wide unread message counts, refreshed on a slow timer (30s in
/// production) so the navigation badge stays roughly current without a chat
/// being open.
pub struct UnreadAggregator {
    api: Arc<dyn RemoteApi>,
    user_id: i64,
    total: i64,
    conversations: Vec<UnreadConversation>,
}

impl UnreadAggregator {
    pub fn new(api: Arc<dyn RemoteApi>, user_id: i64) -> Self {
        Self {
            api,
            user_id,
            total: 0,
            conversations: Vec::new(),
        }
    }

    pub async fn refresh(&mut self) -> AppResult<()> {
        let summary = self.api.unread_summary(self.user_id).await?;
        self.total = summary.total;
        self.conversations = summary.conversations;
        Ok(())
    }

    /// `None` when everything is read, so the badge disappears rather than
    /// showing a zero.
    pub fn badge(&self) -> Option<i64> {
        (self.total > 0).then_some(self.total)
    }

    pub fn conversations(&self) -> &[UnreadConversation] {
        &self.conversations
    }

    /// Opens an unread entry: hands (property id, conversation id) to the
    /// caller's open-chat hook, then reconciles the badge.
    pub async fn open<F>(&mut self, conversation_id: i64, open_chat: F) -> AppResult<()>
    where
        F: FnOnce(i64, i64),
    {
        if let Some(entry) = self
            .conversations
            .iter()
            .find(|c| c.conversation_id == conversation_id)
        {
            open_chat(entry.property_id, entry.conversation_id);
        }
        self.opened_conversation(conversation_id).await
    }

    /// Opening a conversation marks its messages read server-side almost
    /// immediately, so re-fetch shortly after instead of waiting out the
    /// slow timer.
    pub async fn opened_conversation(&mut self, conversation_id: i64) -> AppResult<()> {
        self.conversations
            .retain(|c| c.conversation_id != conversation_id);
        self.total = self.conversations.iter().map(|c| c.unread_count).sum();
        tokio::time::sleep(Duration::from_secs(1)).await;
        self.refresh().await
    }
}

/// Aborts the badge timer on drop (sign-out, account switch).
pub struct UnreadPollHandle {
    task: JoinHandle<()>,
}

impl Drop for UnreadPollHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub fn spawn_polling(
    aggregator: Arc<tokio::sync::Mutex<UnreadAggregator>>,
    every: Duration,
) -> UnreadPollHandle {
    let task = tokio::spawn(async move {
        let mut tick = tokio::time::interval(every);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tick.tick().await;
            if let Err(e) = aggregator.lock().await.refresh().await {
                warn!(error = %e, "unread poll failed");
            }
        }
    });
    UnreadPollHandle { task }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Message, NewConversation};
    use crate::remote::fake::FakeRemoteApi;
    use chrono::Utc;

    async fn seed_unread(api: &FakeRemoteApi, buyer_id: i64, count: usize) -> i64 {
        let conversation = api
            .create_conversation(&NewConversation {
                property_id: 10,
                buyer_id,
                seller_id: 1,
            })
            .await
            .unwrap();
        for i in 0..count {
            api.add_message(Message {
                id: api.next_id(),
                conversation_id: conversation.id,
                sender_id: 1,
                content: format!("message {i}"),
                bloburl: None,
                created_at: Utc::now(),
                read_at: None,
                local_key: None,
            });
        }
        conversation.id
    }

    #[tokio::test]
    async fn badge_hides_at_zero_and_shows_the_total() {
        let api = Arc::new(FakeRemoteApi::new());
        let mut aggregator = UnreadAggregator::new(api.clone(), 2);

        aggregator.refresh().await.unwrap();
        assert_eq!(aggregator.badge(), None);

        seed_unread(&api, 2, 3).await;
        aggregator.refresh().await.unwrap();
        assert_eq!(aggregator.badge(), Some(3));
        assert_eq!(aggregator.conversations().len(), 1);
        assert_eq!(aggregator.conversations()[0].unread_count, 3);
    }

    #[tokio::test]
    async fn only_other_party_messages_count() {
        let api = Arc::new(FakeRemoteApi::new());
        let conversation_id = seed_unread(&api, 2, 1).await;
        // The user's own unread-by-the-seller message must not inflate their
        // badge.
        api.add_message(Message {
            id: api.next_id(),
            conversation_id,
            sender_id: 2,
            content: "my own reply".into(),
            bloburl: None,
            created_at: Utc::now(),
            read_at: None,
            local_key: None,
        });

        let mut aggregator = UnreadAggregator::new(api.clone(), 2);
        aggregator.refresh().await.unwrap();
        assert_eq!(aggregator.badge(), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn opening_a_conversation_clears_it_promptly() {
        let api = Arc::new(FakeRemoteApi::new());
        let conversation_id = seed_unread(&api, 2, 2).await;

        let mut aggregator = UnreadAggregator::new(api.clone(), 2);
        aggregator.refresh().await.unwrap();
        assert_eq!(aggregator.badge(), Some(2));

        // The chat view marks the thread read on open.
        api.mark_read(2, conversation_id).await.unwrap();
        aggregator.opened_conversation(conversation_id).await.unwrap();
        assert_eq!(aggregator.badge(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn open_hands_the_entry_to_the_chat_hook() {
        let api = Arc::new(FakeRemoteApi::new());
        let conversation_id = seed_unread(&api, 2, 2).await;

        let mut aggregator = UnreadAggregator::new(api.clone(), 2);
        aggregator.refresh().await.unwrap();

        let mut opened = None;
        api.mark_read(2, conversation_id).await.unwrap();
        aggregator
            .open(conversation_id, |property_id, conversation_id| {
                opened = Some((property_id, conversation_id));
            })
            .await
            .unwrap();
        assert_eq!(opened, Some((10, conversation_id)));
        assert_eq!(aggregator.badge(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn timer_refreshes_until_the_handle_drops() {
        let api = Arc::new(FakeRemoteApi::new());
        let aggregator = Arc::new(tokio::sync::Mutex::new(UnreadAggregator::new(
            api.clone(),
            2,
        )));
        let handle = spawn_polling(aggregator.clone(), Duration::from_secs(30));

        seed_unread(&api, 2, 1).await;
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(aggregator.lock().await.badge(), Some(1));

        drop(handle);
        tokio::task::yield_now().await;
        seed_unread(&api, 2, 4).await;
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(aggregator.lock().await.badge(), Some(1));
    }
}
