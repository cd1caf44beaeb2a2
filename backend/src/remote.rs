//! Thin typed client over the external marketplace REST API. The remote
//! backend is the single source of truth; nothing here caches entity state
//! beyond the per-user display-info lookup cache.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{AppError, AppResult};
use crate::models::{
    Conversation, DocumentRequest, Message, NewConversation, NewMessage, NewOffer,
    NewOfferCondition, NewOfferHistory, Offer, OfferCondition, OfferHistoryRecord, Property,
    PushPayload, UnreadSummary, User,
};

/// Every remote endpoint the workflows touch. Implemented over HTTP in
/// production; tests substitute an in-memory fake.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn create_offer(&self, offer: &NewOffer) -> AppResult<Offer>;
    async fn update_offer(&self, offer: &Offer) -> AppResult<Offer>;
    async fn offer_by_id(&self, id: i64) -> AppResult<Offer>;
    async fn offers_by_property(&self, property_id: i64) -> AppResult<Vec<Offer>>;
    async fn offers_by_buyer(&self, buyer_id: i64) -> AppResult<Vec<Offer>>;

    async fn create_condition(&self, condition: &NewOfferCondition) -> AppResult<OfferCondition>;
    async fn update_condition(&self, condition: &OfferCondition) -> AppResult<OfferCondition>;
    async fn conditions_for_offer(&self, offer_id: i64) -> AppResult<Vec<OfferCondition>>;

    async fn create_history(&self, record: &NewOfferHistory) -> AppResult<OfferHistoryRecord>;
    async fn history_for_offer(&self, offer_id: i64) -> AppResult<Vec<OfferHistoryRecord>>;

    async fn create_conversation(&self, conversation: &NewConversation) -> AppResult<Conversation>;
    async fn conversations_for_user(&self, user_id: i64) -> AppResult<Vec<Conversation>>;

    async fn messages_for_conversation(&self, conversation_id: i64) -> AppResult<Vec<Message>>;
    async fn create_message(&self, message: &NewMessage) -> AppResult<Message>;
    /// Bulk mark-read: every unread message in the conversation not authored
    /// by `user_id` gets its `readat` stamped server-side.
    async fn mark_read(&self, user_id: i64, conversation_id: i64) -> AppResult<()>;
    async fn unread_summary(&self, user_id: i64) -> AppResult<UnreadSummary>;

    async fn property_by_id(&self, id: i64) -> AppResult<Property>;
    async fn user_by_id(&self, id: i64) -> AppResult<User>;
    async fn user_by_email(&self, email: &str) -> AppResult<User>;

    async fn create_document_request(&self, request: &DocumentRequest) -> AppResult<()>;
    async fn send_push(&self, payload: &PushPayload) -> AppResult<()>;
}

/// Production implementation backed by reqwest against the configured base
/// URL (e.g. `https://buysel.azurewebsites.net/api`).
pub struct HttpRemoteApi {
    http: reqwest::Client,
    base: String,
}

impl HttpRemoteApi {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> AppResult<T> {
        let status = resp.status();
        if !status.is_success() {
            let detail: String = resp
                .text()
                .await
                .unwrap_or_default()
                .chars()
                .take(200)
                .collect();
            return Err(AppError::Remote {
                status: status.as_u16(),
                detail,
            });
        }
        resp.json::<T>()
            .await
            .map_err(|e| AppError::Transport(format!("decode response: {e}")))
    }

    async fn expect_ok(resp: reqwest::Response) -> AppResult<()> {
        let status = resp.status();
        if !status.is_success() {
            let detail: String = resp
                .text()
                .await
                .unwrap_or_default()
                .chars()
                .take(200)
                .collect();
            return Err(AppError::Remote {
                status: status.as_u16(),
                detail,
            });
        }
        Ok(())
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> AppResult<T> {
        let resp = self.http.get(self.url(path)).send().await?;
        Self::decode(resp).await
    }

    async fn post_json<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> AppResult<T> {
        let resp = self.http.post(self.url(path)).json(body).send().await?;
        Self::decode(resp).await
    }

    async fn put_json<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> AppResult<T> {
        let resp = self.http.put(self.url(path)).json(body).send().await?;
        Self::decode(resp).await
    }
}

#[async_trait]
impl RemoteApi for HttpRemoteApi {
    async fn create_offer(&self, offer: &NewOffer) -> AppResult<Offer> {
        self.post_json("/offer", offer).await
    }

    async fn update_offer(&self, offer: &Offer) -> AppResult<Offer> {
        self.put_json("/offer", offer).await
    }

    async fn offer_by_id(&self, id: i64) -> AppResult<Offer> {
        self.get_json(&format!("/offer/{id}")).await
    }

    async fn offers_by_property(&self, property_id: i64) -> AppResult<Vec<Offer>> {
        self.get_json(&format!("/offer/property/{property_id}")).await
    }

    async fn offers_by_buyer(&self, buyer_id: i64) -> AppResult<Vec<Offer>> {
        self.get_json(&format!("/offer/buyer/{buyer_id}")).await
    }

    async fn create_condition(&self, condition: &NewOfferCondition) -> AppResult<OfferCondition> {
        self.post_json("/offercondition", condition).await
    }

    async fn update_condition(&self, condition: &OfferCondition) -> AppResult<OfferCondition> {
        self.put_json("/offercondition", condition).await
    }

    async fn conditions_for_offer(&self, offer_id: i64) -> AppResult<Vec<OfferCondition>> {
        self.get_json(&format!("/offercondition/{offer_id}")).await
    }

    async fn create_history(&self, record: &NewOfferHistory) -> AppResult<OfferHistoryRecord> {
        self.post_json("/offerhistory", record).await
    }

    async fn history_for_offer(&self, offer_id: i64) -> AppResult<Vec<OfferHistoryRecord>> {
        self.get_json(&format!("/offerhistory/{offer_id}")).await
    }

    async fn create_conversation(&self, conversation: &NewConversation) -> AppResult<Conversation> {
        self.post_json("/conversation", conversation).await
    }

    async fn conversations_for_user(&self, user_id: i64) -> AppResult<Vec<Conversation>> {
        self.get_json(&format!("/conversation/user/{user_id}")).await
    }

    async fn messages_for_conversation(&self, conversation_id: i64) -> AppResult<Vec<Message>> {
        self.get_json(&format!("/message/conversation/{conversation_id}")).await
    }

    async fn create_message(&self, message: &NewMessage) -> AppResult<Message> {
        self.post_json("/message", message).await
    }

    async fn mark_read(&self, user_id: i64, conversation_id: i64) -> AppResult<()> {
        let resp = self
            .http
            .put(self.url(&format!("/message/markread/{user_id}/{conversation_id}")))
            .send()
            .await?;
        Self::expect_ok(resp).await
    }

    async fn unread_summary(&self, user_id: i64) -> AppResult<UnreadSummary> {
        self.get_json(&format!("/message/unread/{user_id}")).await
    }

    async fn property_by_id(&self, id: i64) -> AppResult<Property> {
        self.get_json(&format!("/property/{id}")).await
    }

    async fn user_by_id(&self, id: i64) -> AppResult<User> {
        self.get_json(&format!("/user/{id}")).await
    }

    async fn user_by_email(&self, email: &str) -> AppResult<User> {
        self.get_json(&format!("/user/email/{email}")).await
    }

    async fn create_document_request(&self, request: &DocumentRequest) -> AppResult<()> {
        let resp = self
            .http
            .post(self.url("/propertybuyerdoc"))
            .json(request)
            .send()
            .await?;
        Self::expect_ok(resp).await
    }

    async fn send_push(&self, payload: &PushPayload) -> AppResult<()> {
        let resp = self.http.post(self.url("/push/send")).json(payload).send().await?;
        Self::expect_ok(resp).await
    }
}

/// In-memory per-user-id lookup cache for display info, so screens do not
/// refetch the same buyer/seller names on every render.
pub struct UserCache {
    api: Arc<dyn RemoteApi>,
    cache: Mutex<HashMap<i64, User>>,
}

impl UserCache {
    pub fn new(api: Arc<dyn RemoteApi>) -> Self {
        Self {
            api,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get(&self, user_id: i64) -> AppResult<User> {
        if let Some(user) = self.cache.lock().unwrap().get(&user_id) {
            return Ok(user.clone());
        }
        let user = self.api.user_by_id(user_id).await?;
        self.cache.lock().unwrap().insert(user_id, user.clone());
        Ok(user)
    }
}
