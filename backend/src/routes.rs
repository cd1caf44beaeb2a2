use axum::extract::{Path, Query, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post, put};
use axum::{Extension, Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::auth::{self, SessionContext};
use crate::chat::ChatSession;
use crate::documents::{decisions_for, DocumentDecision, DocumentKind};
use crate::error::{AppError, AppResult};
use crate::models::{
    Message, Offer, OfferCondition, OfferHistoryRecord, OfferStatus, Role, User,
};
use crate::offer::{price_delta_label, OfferForm};
use crate::state::AppState;
use crate::unread::UnreadAggregator;

async fn authenticate(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let header = headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or(AppError::Unauthorized)?;
    let token = header.strip_prefix("Bearer ").ok_or(AppError::Unauthorized)?;
    let session = auth::validate_token(token, &state.config.jwt_secret)?;
    request.extensions_mut().insert(session);
    Ok(next.run(request).await)
}

#[derive(Deserialize)]
struct LoginForm {
    email: String,
}

async fn login(
    State(state): State<AppState>,
    Json(form): Json<LoginForm>,
) -> AppResult<Json<serde_json::Value>> {
    let user = state.api.user_by_email(&form.email).await?;
    let token = auth::create_token(&user, &state.config.jwt_secret)?;
    info!(user_id = user.id, "session opened");
    Ok(Json(json!({ "token": token, "user": user })))
}

/// An offer decorated for display: derived status and the price positioning
/// label relative to the asking price.
#[derive(Serialize)]
struct OfferView {
    #[serde(flatten)]
    offer: Offer,
    #[serde(rename = "displaystatus")]
    display_status: OfferStatus,
    #[serde(rename = "pricedelta")]
    price_delta: String,
    #[serde(rename = "buyername")]
    buyer_name: String,
}

impl AppState {
    async fn offer_view(&self, offer: Offer, asking: i64) -> OfferView {
        let now = Utc::now();
        let buyer_name = self
            .users
            .get(offer.buyer_id)
            .await
            .map(|u| u.display_name())
            .unwrap_or_default();
        OfferView {
            display_status: offer.display_status(now),
            price_delta: price_delta_label(offer.offer_amount, asking),
            buyer_name,
            offer,
        }
    }

    async fn asking_price(&self, property_id: i64) -> i64 {
        self.api
            .property_by_id(property_id)
            .await
            .map(|p| p.price)
            .unwrap_or(0)
    }

    async fn session_user(&self, session: &SessionContext) -> AppResult<User> {
        self.users.get(session.user_id).await
    }
}

#[derive(Deserialize)]
struct SubmitOfferRequest {
    #[serde(rename = "propertyid")]
    property_id: i64,
    #[serde(flatten)]
    form: OfferForm,
}

async fn submit_offer(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
    Json(request): Json<SubmitOfferRequest>,
) -> AppResult<(StatusCode, Json<OfferView>)> {
    let user = state.session_user(&session).await?;
    if !user.profile_complete {
        return Err(AppError::ProfileIncomplete);
    }
    let property = state.api.property_by_id(request.property_id).await?;
    if session.user_id == property.seller_id {
        return Err(AppError::Forbidden("sellers cannot offer on their own listing".into()));
    }
    let offer = state
        .offers()
        .submit_offer(&property, &session, &request.form)
        .await?;
    let view = state.offer_view(offer, property.price).await;
    Ok((StatusCode::CREATED, Json(view)))
}

async fn counter_offer(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
    Path(offer_id): Path<i64>,
    Json(form): Json<OfferForm>,
) -> AppResult<(StatusCode, Json<OfferView>)> {
    let parent = state.api.offer_by_id(offer_id).await?;
    let property = state.api.property_by_id(parent.property_id).await?;
    let offer = state
        .offers()
        .counter_offer(&property, &parent, &session, &form)
        .await?;
    let view = state.offer_view(offer, property.price).await;
    Ok((StatusCode::CREATED, Json(view)))
}

#[derive(Deserialize)]
#[serde(rename_all = "lowercase")]
enum OfferAction {
    Accept,
    Reject,
    Withdraw,
}

#[derive(Deserialize)]
struct StatusForm {
    action: OfferAction,
}

async fn update_offer_status(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
    Path(offer_id): Path<i64>,
    Json(form): Json<StatusForm>,
) -> AppResult<Json<OfferView>> {
    let offer = state.api.offer_by_id(offer_id).await?;
    let property = state.api.property_by_id(offer.property_id).await?;
    let new_status = match form.action {
        OfferAction::Accept => OfferStatus::Accepted,
        OfferAction::Reject => OfferStatus::Rejected,
        OfferAction::Withdraw => OfferStatus::Withdrawn,
    };
    let updated = state
        .offers()
        .update_status(&offer, &property, &session, new_status)
        .await?;
    Ok(Json(state.offer_view(updated, property.price).await))
}

async fn toggle_condition(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
    Path((offer_id, condition_id)): Path<(i64, i64)>,
) -> AppResult<Json<OfferCondition>> {
    let offer = state.api.offer_by_id(offer_id).await?;
    let conditions = state.offers().conditions_for_offer(offer_id).await?;
    let condition = conditions
        .iter()
        .find(|c| c.id == condition_id)
        .ok_or(AppError::NotFound)?;
    let updated = state.offers().toggle_condition(&offer, condition, &session).await?;
    Ok(Json(updated))
}

async fn property_offers(
    State(state): State<AppState>,
    Path(property_id): Path<i64>,
) -> AppResult<Json<Vec<OfferView>>> {
    let property = state.api.property_by_id(property_id).await?;
    let offers = state.offers().offers_for_property(property_id).await?;
    let mut views = Vec::with_capacity(offers.len());
    for offer in offers {
        views.push(state.offer_view(offer, property.price).await);
    }
    Ok(Json(views))
}

async fn buyer_offers(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
    Path(buyer_id): Path<i64>,
) -> AppResult<Json<Vec<OfferView>>> {
    if session.user_id != buyer_id && session.role != Role::Admin {
        return Err(AppError::Forbidden("cannot list another buyer's offers".into()));
    }
    let offers = state.offers().offers_for_buyer(buyer_id).await?;
    let mut views = Vec::with_capacity(offers.len());
    for offer in offers {
        let asking = state.asking_price(offer.property_id).await;
        views.push(state.offer_view(offer, asking).await);
    }
    Ok(Json(views))
}

async fn offer_conditions(
    State(state): State<AppState>,
    Path(offer_id): Path<i64>,
) -> AppResult<Json<Vec<OfferCondition>>> {
    Ok(Json(state.offers().conditions_for_offer(offer_id).await?))
}

/// History row joined with the acting user's display name.
#[derive(Serialize)]
struct HistoryView {
    #[serde(flatten)]
    record: OfferHistoryRecord,
    #[serde(rename = "actorname")]
    actor_name: String,
}

async fn offer_history(
    State(state): State<AppState>,
    Path(offer_id): Path<i64>,
) -> AppResult<Json<Vec<HistoryView>>> {
    let records = state.offers().history_for_offer(offer_id).await?;
    let mut views = Vec::with_capacity(records.len());
    for record in records {
        let actor_name = state
            .users
            .get(record.actor_id)
            .await
            .map(|u| u.display_name())
            .unwrap_or_default();
        views.push(HistoryView { record, actor_name });
    }
    Ok(Json(views))
}

#[derive(Deserialize)]
struct ChatQuery {
    #[serde(rename = "propertyId")]
    property_id: Option<i64>,
    #[serde(rename = "conversationId")]
    conversation_id: Option<i64>,
}

impl ChatQuery {
    /// The thread is addressable by property or by conversation; a
    /// conversation-only lookup resolves the property through the caller's
    /// own conversation list.
    async fn resolve_property_id(&self, state: &AppState, user_id: i64) -> AppResult<i64> {
        if let Some(property_id) = self.property_id {
            return Ok(property_id);
        }
        let conversation_id = self
            .conversation_id
            .ok_or_else(|| AppError::Validation("propertyId or conversationId is required".into()))?;
        state
            .api
            .conversations_for_user(user_id)
            .await?
            .iter()
            .find(|c| c.id == conversation_id)
            .map(|c| c.property_id)
            .ok_or(AppError::NotFound)
    }
}

#[derive(Serialize)]
struct ChatView {
    #[serde(rename = "conversationid")]
    conversation_id: Option<i64>,
    messages: Vec<Message>,
}

async fn conversation_messages(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
    Query(query): Query<ChatQuery>,
) -> AppResult<Json<ChatView>> {
    let user = state.session_user(&session).await?;
    let property_id = query.resolve_property_id(&state, session.user_id).await?;
    let property = state.api.property_by_id(property_id).await?;
    let mut chat = ChatSession::new(state.api.clone(), &property, query.conversation_id);
    chat.resolve(&user).await?;
    chat.load_messages().await?;
    Ok(Json(ChatView {
        conversation_id: chat.conversation_id(),
        messages: chat.messages().to_vec(),
    }))
}

#[derive(Deserialize)]
struct MessageForm {
    #[serde(rename = "propertyid")]
    property_id: i64,
    #[serde(rename = "conversationid")]
    conversation_id: Option<i64>,
    content: String,
    bloburl: Option<String>,
}

async fn send_message(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
    Json(form): Json<MessageForm>,
) -> AppResult<(StatusCode, Json<Message>)> {
    let user = state.session_user(&session).await?;
    let property = state.api.property_by_id(form.property_id).await?;
    let mut chat = ChatSession::new(state.api.clone(), &property, form.conversation_id);
    chat.resolve(&user).await?;
    let message = chat.send_message(&form.content, form.bloburl).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

async fn unread(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
) -> AppResult<Json<serde_json::Value>> {
    let mut aggregator = UnreadAggregator::new(state.api.clone(), session.user_id);
    aggregator.refresh().await?;
    Ok(Json(json!({
        "badge": aggregator.badge(),
        "conversations": aggregator.conversations(),
    })))
}

async fn property_documents(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
    Path(property_id): Path<i64>,
) -> AppResult<Json<Vec<DocumentDecision>>> {
    let user = state.session_user(&session).await?;
    let property = state.api.property_by_id(property_id).await?;
    Ok(Json(decisions_for(&user, &property, Utc::now())))
}

#[derive(Deserialize)]
struct DocumentRequestForm {
    #[serde(rename = "propertyid")]
    property_id: i64,
    kind: DocumentKind,
}

async fn request_document(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
    Json(form): Json<DocumentRequestForm>,
) -> AppResult<StatusCode> {
    let user = state.session_user(&session).await?;
    let property = state.api.property_by_id(form.property_id).await?;
    state
        .documents()
        .request_access(&user, &property, form.kind)
        .await?;
    Ok(StatusCode::ACCEPTED)
}

pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/offers", post(submit_offer))
        .route("/api/offers/:id/counter", post(counter_offer))
        .route("/api/offers/:id/status", put(update_offer_status))
        .route("/api/offers/:id/conditions", get(offer_conditions))
        .route(
            "/api/offers/:id/conditions/:condition_id/toggle",
            put(toggle_condition),
        )
        .route("/api/offers/:id/history", get(offer_history))
        .route("/api/offers/property/:id", get(property_offers))
        .route("/api/offers/buyer/:id", get(buyer_offers))
        .route("/api/chat", get(conversation_messages).post(send_message))
        .route("/api/chat/unread", get(unread))
        .route("/api/documents/:id", get(property_documents))
        .route("/api/documents/request", post(request_document))
        .layer(middleware::from_fn_with_state(state.clone(), authenticate));

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/auth/session", post(login))
        .merge(protected)
        .with_state(state)
}
