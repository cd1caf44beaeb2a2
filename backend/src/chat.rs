use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{Message, NewConversation, NewMessage, Property, User};
use crate::remote::RemoteApi;

/// Sink for chat-side notifications (the UI's new-message sound). Fired for
/// messages authored by the other party that arrive via polling.
pub trait ChatEvents: Send + Sync {
    fn message_received(&self, message: &Message);
}

struct NoEvents;

impl ChatEvents for NoEvents {
    fn message_received(&self, _message: &Message) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    ResolvingUser,
    /// Terminal: the user must finish profile completion before messaging.
    ProfileRequired,
    ResolvingConversation,
    Ready,
    Polling,
}

/// A two-party message thread for one property, kept near-real-time by a
/// fixed-interval poll. The conversation record is created lazily on the
/// first send, which also fixes the current user as the buyer.
pub struct ChatSession {
    api: Arc<dyn RemoteApi>,
    events: Arc<dyn ChatEvents>,
    property_id: i64,
    seller_id: i64,
    user_id: i64,
    is_buyer: bool,
    conversation_id: Option<i64>,
    state: SessionState,
    messages: Vec<Message>,
}

impl ChatSession {
    pub fn new(api: Arc<dyn RemoteApi>, property: &Property, conversation_id: Option<i64>) -> Self {
        Self::with_events(api, property, conversation_id, Arc::new(NoEvents))
    }

    pub fn with_events(
        api: Arc<dyn RemoteApi>,
        property: &Property,
        conversation_id: Option<i64>,
        events: Arc<dyn ChatEvents>,
    ) -> Self {
        Self {
            api,
            events,
            property_id: property.id,
            seller_id: property.seller_id,
            user_id: 0,
            is_buyer: false,
            conversation_id,
            state: SessionState::Uninitialized,
            messages: Vec::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn conversation_id(&self) -> Option<i64> {
        self.conversation_id
    }

    pub fn is_buyer(&self) -> bool {
        self.is_buyer
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Resolves the session user and conversation. A missing numeric id or
    /// incomplete profile is terminal: messaging stays blocked until the
    /// profile-completion flow finishes.
    pub async fn resolve(&mut self, user: &User) -> AppResult<()> {
        self.state = SessionState::ResolvingUser;
        if user.id <= 0 || !user.profile_complete {
            self.state = SessionState::ProfileRequired;
            return Err(AppError::ProfileIncomplete);
        }
        self.user_id = user.id;
        self.is_buyer = user.id != self.seller_id;

        self.state = SessionState::ResolvingConversation;
        if self.conversation_id.is_none() {
            let conversations = self.api.conversations_for_user(user.id).await?;
            if let Some(existing) = conversations.iter().find(|c| {
                c.property_id == self.property_id
                    && (c.buyer_id == user.id || c.seller_id == user.id)
            }) {
                self.conversation_id = Some(existing.id);
                self.is_buyer = existing.buyer_id == user.id;
            }
            // No match: stay Ready without a conversation; it is created
            // lazily on the first send.
        }
        self.state = SessionState::Ready;
        Ok(())
    }

    /// Fetches the full thread and bulk-marks the other party's unread
    /// messages as read, keyed by (user id, conversation id).
    pub async fn load_messages(&mut self) -> AppResult<()> {
        let Some(conversation_id) = self.conversation_id else {
            self.messages.clear();
            return Ok(());
        };
        let mut messages = self.api.messages_for_conversation(conversation_id).await?;
        let has_unread = messages
            .iter()
            .any(|m| m.sender_id != self.user_id && m.read_at.is_none());
        if has_unread {
            self.api.mark_read(self.user_id, conversation_id).await?;
            stamp_read(&mut messages, self.user_id);
        }
        // Displayed in server order; no client-side resort.
        self.messages = messages;
        Ok(())
    }

    /// Optimistic send: the message appears locally under a temporary key,
    /// then is replaced by the server record. On failure the optimistic entry
    /// is removed and the error surfaces. The first send creates the
    /// conversation and fixes the current user as buyer for the session.
    pub async fn send_message(&mut self, content: &str, bloburl: Option<String>) -> AppResult<Message> {
        match self.state {
            SessionState::ProfileRequired => return Err(AppError::ProfileIncomplete),
            SessionState::Ready | SessionState::Polling => {}
            _ => return Err(AppError::Validation("chat session is not ready".into())),
        }
        let content = content.trim();
        if content.is_empty() {
            return Err(AppError::Validation("message cannot be empty".into()));
        }

        let local_key = Uuid::new_v4();
        self.messages.push(Message {
            id: 0,
            conversation_id: self.conversation_id.unwrap_or(0),
            sender_id: self.user_id,
            content: content.to_string(),
            bloburl: bloburl.clone(),
            created_at: Utc::now(),
            read_at: None,
            local_key: Some(local_key),
        });

        let conversation_id = match self.conversation_id {
            Some(id) => id,
            None => {
                let conversation = NewConversation {
                    property_id: self.property_id,
                    buyer_id: self.user_id,
                    seller_id: self.seller_id,
                };
                match self.api.create_conversation(&conversation).await {
                    Ok(created) => {
                        info!(conversation_id = created.id, property_id = self.property_id,
                            "conversation created on first message");
                        self.conversation_id = Some(created.id);
                        self.is_buyer = true;
                        created.id
                    }
                    Err(e) => {
                        self.discard_optimistic(local_key);
                        return Err(e);
                    }
                }
            }
        };

        let new_message = NewMessage {
            conversation_id,
            sender_id: self.user_id,
            content: content.to_string(),
            bloburl,
        };
        match self.api.create_message(&new_message).await {
            Ok(saved) => {
                if let Some(entry) = self
                    .messages
                    .iter_mut()
                    .find(|m| m.local_key == Some(local_key))
                {
                    *entry = saved.clone();
                }
                Ok(saved)
            }
            Err(e) => {
                self.discard_optimistic(local_key);
                Err(e)
            }
        }
    }

    fn discard_optimistic(&mut self, local_key: Uuid) {
        self.messages.retain(|m| m.local_key != Some(local_key));
    }

    /// One poll tick. An unchanged message count leaves the held list
    /// untouched; otherwise the list is replaced wholesale, and newly arrived
    /// messages from the other party raise an event and get marked read.
    pub async fn refresh(&mut self) -> AppResult<()> {
        let Some(conversation_id) = self.conversation_id else {
            return Ok(());
        };
        let mut fetched = self.api.messages_for_conversation(conversation_id).await?;
        if fetched.len() == self.messages.len() {
            return Ok(());
        }

        let known: HashSet<i64> = self.messages.iter().map(|m| m.id).collect();
        let mut from_other_party = false;
        for message in fetched.iter().filter(|m| !known.contains(&m.id)) {
            if message.sender_id != self.user_id {
                from_other_party = true;
                self.events.message_received(message);
            }
        }
        if from_other_party {
            self.api.mark_read(self.user_id, conversation_id).await?;
            stamp_read(&mut fetched, self.user_id);
        }
        self.messages = fetched;
        Ok(())
    }
}

/// Mirrors the server-side bulk mark-read on the held copies, so the local
/// list never shows just-read messages as unread.
fn stamp_read(messages: &mut [Message], reader_id: i64) {
    let now = Utc::now();
    for message in messages {
        if message.sender_id != reader_id && message.read_at.is_none() {
            message.read_at = Some(now);
        }
    }
}

/// Aborts its polling task on drop, so a closed chat (or changed identifiers)
/// never leaves an orphaned timer behind.
pub struct PollHandle {
    task: JoinHandle<()>,
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Re-fetches the open conversation at a fixed interval (3s in production).
pub fn spawn_polling(session: Arc<tokio::sync::Mutex<ChatSession>>, every: Duration) -> PollHandle {
    let task = tokio::spawn(async move {
        let mut tick = tokio::time::interval(every);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately; skip it so the initial load stays
        // with the caller.
        tick.tick().await;
        loop {
            tick.tick().await;
            let mut session = session.lock().await;
            if session.state == SessionState::Ready {
                session.state = SessionState::Polling;
            }
            if let Err(e) = session.refresh().await {
                warn!(error = %e, "chat poll failed");
            }
        }
    });
    PollHandle { task }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Property, Role};
    use crate::remote::fake::FakeRemoteApi;
    use std::sync::atomic::Ordering;
    use std::sync::Mutex;

    fn property() -> Property {
        Property {
            id: 10,
            seller_id: 1,
            title: "Weatherboard cottage".into(),
            address: "12 Acacia St, Northcote".into(),
            price: 750_000,
            building_insp_blob: None,
            building_insp_verified: false,
            building_insp_public: false,
            pest_insp_blob: None,
            pest_insp_verified: false,
            pest_insp_public: false,
            title_search_blob: None,
            title_search_verified: false,
            title_search_public: false,
        }
    }

    fn user(id: i64, complete: bool) -> User {
        User {
            id,
            email: format!("user{id}@example.com"),
            firstname: "Test".into(),
            lastname: "User".into(),
            idverified: true,
            photoverified: true,
            profile_complete: complete,
            role: if id == 1 { Role::Seller } else { Role::Buyer },
        }
    }

    fn message(api: &FakeRemoteApi, conversation_id: i64, sender_id: i64, content: &str) -> Message {
        Message {
            id: api.next_id(),
            conversation_id,
            sender_id,
            content: content.into(),
            bloburl: None,
            created_at: Utc::now(),
            read_at: None,
            local_key: None,
        }
    }

    struct RecordingEvents(Mutex<Vec<i64>>);

    impl ChatEvents for RecordingEvents {
        fn message_received(&self, message: &Message) {
            self.0.lock().unwrap().push(message.id);
        }
    }

    #[tokio::test]
    async fn incomplete_profile_is_terminal() {
        let api = Arc::new(FakeRemoteApi::new());
        let mut session = ChatSession::new(api, &property(), None);
        assert_eq!(session.state(), SessionState::Uninitialized);

        let result = session.resolve(&user(2, false)).await;
        assert!(matches!(result, Err(AppError::ProfileIncomplete)));
        assert_eq!(session.state(), SessionState::ProfileRequired);

        assert!(matches!(
            session.send_message("hello", None).await,
            Err(AppError::ProfileIncomplete)
        ));
    }

    #[tokio::test]
    async fn resolve_reuses_existing_conversation() {
        let api = Arc::new(FakeRemoteApi::new());
        let existing = api
            .create_conversation(&NewConversation {
                property_id: 10,
                buyer_id: 2,
                seller_id: 1,
            })
            .await
            .unwrap();

        let mut session = ChatSession::new(api.clone(), &property(), None);
        session.resolve(&user(2, true)).await.unwrap();
        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(session.conversation_id(), Some(existing.id));
        assert!(session.is_buyer());
    }

    #[tokio::test]
    async fn first_send_creates_one_conversation_and_fixes_buyer() {
        let api = Arc::new(FakeRemoteApi::new());
        let mut session = ChatSession::new(api.clone(), &property(), None);
        session.resolve(&user(2, true)).await.unwrap();
        assert_eq!(session.conversation_id(), None);

        let sent = session.send_message("is this still available?", None).await.unwrap();
        assert_eq!(api.conversations.lock().unwrap().len(), 1);
        assert_eq!(session.conversation_id(), Some(sent.conversation_id));
        assert!(session.is_buyer());

        // The optimistic placeholder was replaced with the server record.
        assert_eq!(session.messages().len(), 1);
        assert_eq!(session.messages()[0].id, sent.id);
        assert!(session.messages()[0].local_key.is_none());
    }

    #[tokio::test]
    async fn failed_send_rolls_back_the_optimistic_entry() {
        let api = Arc::new(FakeRemoteApi::new());
        let mut session = ChatSession::new(api.clone(), &property(), None);
        session.resolve(&user(2, true)).await.unwrap();

        api.fail_create_message.store(true, Ordering::SeqCst);
        let result = session.send_message("hello?", None).await;
        assert!(matches!(result, Err(AppError::Remote { .. })));
        assert!(session.messages().is_empty());
    }

    #[tokio::test]
    async fn empty_messages_are_rejected_before_any_call() {
        let api = Arc::new(FakeRemoteApi::new());
        let mut session = ChatSession::new(api.clone(), &property(), None);
        session.resolve(&user(2, true)).await.unwrap();
        assert!(matches!(
            session.send_message("   ", None).await,
            Err(AppError::Validation(_))
        ));
        assert!(api.conversations.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn load_bulk_marks_the_thread_read() {
        let api = Arc::new(FakeRemoteApi::new());
        let conversation = api
            .create_conversation(&NewConversation {
                property_id: 10,
                buyer_id: 2,
                seller_id: 1,
            })
            .await
            .unwrap();
        for content in ["one", "two", "three"] {
            let m = message(&api, conversation.id, 1, content);
            api.add_message(m);
        }

        let mut session = ChatSession::new(api.clone(), &property(), Some(conversation.id));
        session.resolve(&user(2, true)).await.unwrap();
        session.load_messages().await.unwrap();

        assert_eq!(session.messages().len(), 3);
        // Both the server records and the held copies carry the read stamp.
        assert!(api
            .messages
            .lock()
            .unwrap()
            .iter()
            .all(|m| m.read_at.is_some()));
        assert!(session.messages().iter().all(|m| m.read_at.is_some()));
        let summary = api.unread_summary(2).await.unwrap();
        assert_eq!(summary.total, 0);
    }

    #[tokio::test]
    async fn unchanged_poll_leaves_the_list_untouched() {
        let api = Arc::new(FakeRemoteApi::new());
        let conversation = api
            .create_conversation(&NewConversation {
                property_id: 10,
                buyer_id: 2,
                seller_id: 1,
            })
            .await
            .unwrap();
        let m = message(&api, conversation.id, 1, "hello");
        api.add_message(m);

        let events = Arc::new(RecordingEvents(Mutex::new(Vec::new())));
        let mut session = ChatSession::with_events(
            api.clone(),
            &property(),
            Some(conversation.id),
            events.clone(),
        );
        session.resolve(&user(2, true)).await.unwrap();
        session.load_messages().await.unwrap();

        let before: Vec<i64> = session.messages().iter().map(|m| m.id).collect();
        session.refresh().await.unwrap();
        let after: Vec<i64> = session.messages().iter().map(|m| m.id).collect();
        assert_eq!(before, after);
        assert!(events.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn poll_detects_other_party_messages_and_marks_them_read() {
        let api = Arc::new(FakeRemoteApi::new());
        let conversation = api
            .create_conversation(&NewConversation {
                property_id: 10,
                buyer_id: 2,
                seller_id: 1,
            })
            .await
            .unwrap();

        let events = Arc::new(RecordingEvents(Mutex::new(Vec::new())));
        let mut session = ChatSession::with_events(
            api.clone(),
            &property(),
            Some(conversation.id),
            events.clone(),
        );
        session.resolve(&user(2, true)).await.unwrap();
        session.load_messages().await.unwrap();
        assert!(session.messages().is_empty());

        let incoming = message(&api, conversation.id, 1, "any questions?");
        let incoming_id = incoming.id;
        api.add_message(incoming);

        session.refresh().await.unwrap();
        assert_eq!(session.messages().len(), 1);
        assert_eq!(events.0.lock().unwrap().as_slice(), &[incoming_id]);
        assert!(api.messages.lock().unwrap()[0].read_at.is_some());
        assert!(session.messages()[0].read_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn polling_stops_when_the_handle_drops() {
        let api = Arc::new(FakeRemoteApi::new());
        let conversation = api
            .create_conversation(&NewConversation {
                property_id: 10,
                buyer_id: 2,
                seller_id: 1,
            })
            .await
            .unwrap();

        let mut session = ChatSession::new(api.clone(), &property(), Some(conversation.id));
        session.resolve(&user(2, true)).await.unwrap();
        let session = Arc::new(tokio::sync::Mutex::new(session));

        let handle = spawn_polling(session.clone(), Duration::from_secs(3));

        let m = message(&api, conversation.id, 1, "ping");
        api.add_message(m);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(session.lock().await.messages().len(), 1);
        assert_eq!(session.lock().await.state(), SessionState::Polling);

        drop(handle);
        tokio::task::yield_now().await;

        let m = message(&api, conversation.id, 1, "ping again");
        api.add_message(m);
        tokio::time::sleep(Duration::from_secs(10)).await;
        // No poll ran after the handle dropped.
        assert_eq!(session.lock().await.messages().len(), 1);
    }
}
