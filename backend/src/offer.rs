use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::auth::SessionContext;
use crate::error::{AppError, AppResult};
use crate::models::{
    ConditionType, HistoryAction, NewOffer, NewOfferCondition, NewOfferHistory, Offer,
    OfferCondition, OfferHistoryRecord, OfferStatus, Property, Role,
};
use crate::push::PushNotifier;
use crate::remote::RemoteApi;

/// Expiry windows the offer form presents, in days.
pub const EXPIRY_CHOICES: [i64; 6] = [1, 2, 3, 5, 7, 14];

#[derive(Debug, Clone, Deserialize)]
pub struct ConditionChoice {
    pub condition_type: ConditionType,
    pub description: String,
    pub days_to_satisfy: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OfferForm {
    pub offer_amount: i64,
    pub deposit_amount: Option<i64>,
    pub settlement_days: i32,
    pub expiry_days: i64,
    #[serde(default)]
    pub conditions: Vec<ConditionChoice>,
}

#[derive(Serialize)]
struct ConditionEntry<'a> {
    description: &'a str,
    days: i32,
}

/// Builds, submits, and transitions negotiable purchase offers. The remote
/// backend owns every record; this workflow only sequences the calls and the
/// append-only history trail.
pub struct OfferWorkflow {
    api: Arc<dyn RemoteApi>,
    push: PushNotifier,
}

impl OfferWorkflow {
    pub fn new(api: Arc<dyn RemoteApi>) -> Self {
        let push = PushNotifier::new(api.clone());
        Self { api, push }
    }

    /// Submits a buyer's offer: the offer record, one condition record per
    /// selected condition, a `created` history entry, and a best-effort push
    /// to the seller. Only the offer create itself is a hard requirement;
    /// condition/history failures are logged and do not roll anything back.
    pub async fn submit_offer(
        &self,
        property: &Property,
        session: &SessionContext,
        form: &OfferForm,
    ) -> AppResult<Offer> {
        self.submit_inner(property, session, session.user_id, form, None).await
    }

    /// Seller counter: same pipeline as a submission, linked to the parent
    /// via `parent_offer_id` with `version = parent.version + 1`, after which
    /// the parent transitions to `countered`.
    pub async fn counter_offer(
        &self,
        property: &Property,
        parent: &Offer,
        session: &SessionContext,
        form: &OfferForm,
    ) -> AppResult<Offer> {
        if !is_selling_party(session, property) {
            return Err(AppError::Forbidden("only the seller can counter an offer".into()));
        }
        if parent.display_status(Utc::now()) != OfferStatus::Pending {
            return Err(AppError::Validation("offer is no longer open".into()));
        }

        let counter = self
            .submit_inner(property, session, parent.buyer_id, form, Some(parent))
            .await?;
        self.transition(parent, session, OfferStatus::Countered).await?;
        self.push
            .notify(
                parent.buyer_id,
                "Counter offer received",
                &format!("The seller countered at ${}", form.offer_amount),
            )
            .await;
        Ok(counter)
    }

    async fn submit_inner(
        &self,
        property: &Property,
        session: &SessionContext,
        buyer_id: i64,
        form: &OfferForm,
        parent: Option<&Offer>,
    ) -> AppResult<Offer> {
        validate_form(form)?;

        let now = Utc::now();
        let conditions_json = conditions_json(&form.conditions)?;
        let new_offer = NewOffer {
            property_id: property.id,
            buyer_id,
            status: OfferStatus::Pending,
            offer_amount: form.offer_amount,
            deposit_amount: form.deposit_amount,
            settlement_days: form.settlement_days,
            conditions_json: conditions_json.clone(),
            expires_at: now + Duration::days(form.expiry_days),
            parent_offer_id: parent.map(|p| p.id),
            version: parent.map(|p| p.version + 1).unwrap_or(1),
        };

        // The only hard requirement: the offer record itself.
        let offer = self.api.create_offer(&new_offer).await?;
        info!(offer_id = offer.id, property_id = property.id, "offer created");

        for choice in &form.conditions {
            let condition = NewOfferCondition {
                offer_id: offer.id,
                condition_type: choice.condition_type,
                description: choice.description.clone(),
                days_to_satisfy: choice.days_to_satisfy,
            };
            if let Err(e) = self.api.create_condition(&condition).await {
                warn!(offer_id = offer.id, error = %e, "condition create failed; offer stands without it");
            }
        }

        let history = NewOfferHistory {
            offer_id: offer.id,
            actor_id: session.user_id,
            action: HistoryAction::Created,
            offer_amount: Some(form.offer_amount),
            conditions_json,
            message: format!("Offer of ${} submitted", form.offer_amount),
        };
        if let Err(e) = self.api.create_history(&history).await {
            warn!(offer_id = offer.id, error = %e, "history create failed");
        }

        if parent.is_none() {
            self.push
                .notify(
                    property.seller_id,
                    "New offer received",
                    &format!("An offer of ${} was made on {}", form.offer_amount, property.address),
                )
                .await;
        }

        Ok(offer)
    }

    /// Transitions a pending offer and appends the matching history entry.
    /// Accept/reject/counter belong to the listing's seller (or an admin);
    /// withdraw belongs to the buyer. Terminal states (and derived-expired
    /// offers) admit nothing.
    pub async fn update_status(
        &self,
        offer: &Offer,
        property: &Property,
        session: &SessionContext,
        new_status: OfferStatus,
    ) -> AppResult<Offer> {
        if offer.property_id != property.id {
            return Err(AppError::Validation("offer does not belong to this property".into()));
        }
        match new_status {
            OfferStatus::Withdrawn => {
                if session.user_id != offer.buyer_id {
                    return Err(AppError::Forbidden("only the buyer can withdraw an offer".into()));
                }
            }
            OfferStatus::Accepted | OfferStatus::Rejected | OfferStatus::Countered => {
                if !is_selling_party(session, property) {
                    return Err(AppError::Forbidden(
                        "only the seller can action this offer".into(),
                    ));
                }
            }
            OfferStatus::Pending | OfferStatus::Expired => {
                return Err(AppError::Validation(format!(
                    "cannot transition an offer to {new_status:?}"
                )));
            }
        }
        if offer.display_status(Utc::now()) != OfferStatus::Pending {
            return Err(AppError::Validation("offer is no longer open".into()));
        }
        self.transition(offer, session, new_status).await
    }

    async fn transition(
        &self,
        offer: &Offer,
        session: &SessionContext,
        new_status: OfferStatus,
    ) -> AppResult<Offer> {
        let mut updated = offer.clone();
        updated.status = new_status;
        // The PUT carries the known version so a capable backend can reject
        // stale writes.
        let updated = self.api.update_offer(&updated).await?;
        info!(offer_id = offer.id, status = ?new_status, "offer status updated");

        let (action, message) = match new_status {
            OfferStatus::Accepted => (HistoryAction::Accepted, "Offer accepted".to_string()),
            OfferStatus::Rejected => (HistoryAction::Rejected, "Offer rejected".to_string()),
            OfferStatus::Countered => (HistoryAction::Countered, "Offer countered".to_string()),
            OfferStatus::Withdrawn => {
                (HistoryAction::Withdrawn, "Offer withdrawn by buyer".to_string())
            }
            OfferStatus::Pending | OfferStatus::Expired => unreachable!("guarded above"),
        };
        let history = NewOfferHistory {
            offer_id: offer.id,
            actor_id: session.user_id,
            action,
            offer_amount: Some(offer.offer_amount),
            conditions_json: None,
            message,
        };
        if let Err(e) = self.api.create_history(&history).await {
            warn!(offer_id = offer.id, error = %e, "history create failed");
        }
        Ok(updated)
    }

    /// Flips a condition's satisfied flag. Only available once the offer is
    /// accepted; satisfaction (not un-satisfaction) is recorded in history.
    pub async fn toggle_condition(
        &self,
        offer: &Offer,
        condition: &OfferCondition,
        session: &SessionContext,
    ) -> AppResult<OfferCondition> {
        if offer.status != OfferStatus::Accepted {
            return Err(AppError::Validation(
                "conditions can only be updated on an accepted offer".into(),
            ));
        }
        if condition.offer_id != offer.id {
            return Err(AppError::Validation("condition does not belong to this offer".into()));
        }

        let mut updated = condition.clone();
        updated.is_satisfied = !condition.is_satisfied;
        updated.satisfied_at = updated.is_satisfied.then(Utc::now);
        let updated = self.api.update_condition(&updated).await?;

        if updated.is_satisfied {
            let history = NewOfferHistory {
                offer_id: offer.id,
                actor_id: session.user_id,
                action: HistoryAction::ConditionSatisfied,
                offer_amount: None,
                conditions_json: None,
                message: format!("{} marked satisfied", updated.condition_type.label()),
            };
            if let Err(e) = self.api.create_history(&history).await {
                warn!(offer_id = offer.id, error = %e, "history create failed");
            }
        }
        Ok(updated)
    }

    /// Seller view: all offers on a property, newest first.
    pub async fn offers_for_property(&self, property_id: i64) -> AppResult<Vec<Offer>> {
        let mut offers = self.api.offers_by_property(property_id).await?;
        sort_newest_first(&mut offers);
        Ok(offers)
    }

    /// Buyer view: all offers made by a buyer, newest first.
    pub async fn offers_for_buyer(&self, buyer_id: i64) -> AppResult<Vec<Offer>> {
        let mut offers = self.api.offers_by_buyer(buyer_id).await?;
        sort_newest_first(&mut offers);
        Ok(offers)
    }

    pub async fn history_for_offer(&self, offer_id: i64) -> AppResult<Vec<OfferHistoryRecord>> {
        self.api.history_for_offer(offer_id).await
    }

    pub async fn conditions_for_offer(&self, offer_id: i64) -> AppResult<Vec<OfferCondition>> {
        self.api.conditions_for_offer(offer_id).await
    }
}

fn is_selling_party(session: &SessionContext, property: &Property) -> bool {
    session.user_id == property.seller_id || session.role == Role::Admin
}

fn validate_form(form: &OfferForm) -> AppResult<()> {
    if form.offer_amount <= 0 {
        return Err(AppError::Validation("offer amount must be greater than zero".into()));
    }
    if let Some(deposit) = form.deposit_amount {
        if deposit < 0 {
            return Err(AppError::Validation("deposit cannot be negative".into()));
        }
    }
    if form.settlement_days <= 0 {
        return Err(AppError::Validation("settlement period must be at least one day".into()));
    }
    if !EXPIRY_CHOICES.contains(&form.expiry_days) {
        return Err(AppError::Validation(format!(
            "expiry must be one of {EXPIRY_CHOICES:?} days"
        )));
    }
    Ok(())
}

/// Serializes the selected conditions into the JSON condition map stored on
/// the offer record (keyed by condition type, deterministic ordering).
fn conditions_json(choices: &[ConditionChoice]) -> AppResult<Option<String>> {
    if choices.is_empty() {
        return Ok(None);
    }
    let map: BTreeMap<ConditionType, ConditionEntry> = choices
        .iter()
        .map(|c| {
            (
                c.condition_type,
                ConditionEntry {
                    description: &c.description,
                    days: c.days_to_satisfy,
                },
            )
        })
        .collect();
    serde_json::to_string(&map)
        .map(Some)
        .map_err(|e| AppError::Validation(format!("conditions not serializable: {e}")))
}

/// Newest first; equal timestamps keep the order the API returned them in.
pub fn sort_newest_first(offers: &mut [Offer]) {
    offers.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}

/// Signed percentage of the offer relative to asking price.
pub fn price_delta_pct(offer_amount: i64, asking: i64) -> f64 {
    if asking == 0 {
        return 0.0;
    }
    (offer_amount - asking) as f64 / asking as f64 * 100.0
}

/// Display label, e.g. "-6.7% below asking" for $700k against $750k.
pub fn price_delta_label(offer_amount: i64, asking: i64) -> String {
    let pct = price_delta_pct(offer_amount, asking);
    if pct < 0.0 {
        format!("-{:.1}% below asking", pct.abs())
    } else if pct > 0.0 {
        format!("+{:.1}% above asking", pct)
    } else {
        "at asking price".to_string()
    }
}
