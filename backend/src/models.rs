use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The remote marketplace API emits timestamps without a timezone suffix
/// (naive strings that are in fact UTC). Every timestamp crossing the wire
/// goes through this module so the rest of the code only ever sees
/// `DateTime<Utc>`.
pub mod remote_datetime {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.with_timezone(&Utc));
        }
        for fmt in NAIVE_FORMATS {
            if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
                return Some(DateTime::from_naive_utc_and_offset(naive, Utc));
            }
        }
        None
    }

    pub fn serialize<S: Serializer>(dt: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&dt.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("unrecognized timestamp: {raw}")))
    }
}

/// `remote_datetime` for nullable columns (`readat`, `satisfiedat`).
pub mod remote_datetime_opt {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(dt: &Option<DateTime<Utc>>, s: S) -> Result<S::Ok, S::Error> {
        match dt {
            Some(dt) => s.serialize_some(&dt.to_rfc3339()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<DateTime<Utc>>, D::Error> {
        match Option::<String>::deserialize(d)? {
            None => Ok(None),
            Some(raw) => super::remote_datetime::parse(&raw)
                .map(Some)
                .ok_or_else(|| serde::de::Error::custom(format!("unrecognized timestamp: {raw}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OfferStatus {
    Pending,
    Accepted,
    Rejected,
    Countered,
    Withdrawn,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionType {
    Finance,
    BuildingPest,
    SaleOfProperty,
    Valuation,
    SolicitorReview,
    Other,
}

impl ConditionType {
    pub fn label(&self) -> &'static str {
        match self {
            ConditionType::Finance => "Subject to finance",
            ConditionType::BuildingPest => "Subject to building & pest inspection",
            ConditionType::SaleOfProperty => "Subject to sale of buyer's property",
            ConditionType::Valuation => "Subject to valuation",
            ConditionType::SolicitorReview => "Subject to solicitor review",
            ConditionType::Other => "Other condition",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryAction {
    Created,
    Accepted,
    Rejected,
    Countered,
    Withdrawn,
    Expired,
    ConditionSatisfied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Buyer,
    Seller,
    Admin,
    Conveyancer,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Offer {
    pub id: i64,
    #[serde(rename = "propertyid")]
    pub property_id: i64,
    #[serde(rename = "buyerid")]
    pub buyer_id: i64,
    pub status: OfferStatus,
    #[serde(rename = "offeramount")]
    pub offer_amount: i64,
    #[serde(rename = "depositamount")]
    pub deposit_amount: Option<i64>,
    #[serde(rename = "settlementdays")]
    pub settlement_days: i32,
    #[serde(rename = "conditionsjson")]
    pub conditions_json: Option<String>,
    #[serde(rename = "expiresat", with = "remote_datetime")]
    pub expires_at: DateTime<Utc>,
    /// Set on counter-offers; links back to the offer being countered.
    #[serde(rename = "parentofferid")]
    pub parent_offer_id: Option<i64>,
    /// Monotonic per offer chain: 1 for a root offer, parent + 1 for counters.
    pub version: i32,
    #[serde(rename = "createdat", with = "remote_datetime")]
    pub created_at: DateTime<Utc>,
}

impl Offer {
    /// Expiry is a derived display status: a pending offer past its expiry
    /// renders as expired without any server-side transition.
    pub fn display_status(&self, now: DateTime<Utc>) -> OfferStatus {
        if self.status == OfferStatus::Pending && self.expires_at < now {
            OfferStatus::Expired
        } else {
            self.status
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NewOffer {
    #[serde(rename = "propertyid")]
    pub property_id: i64,
    #[serde(rename = "buyerid")]
    pub buyer_id: i64,
    pub status: OfferStatus,
    #[serde(rename = "offeramount")]
    pub offer_amount: i64,
    #[serde(rename = "depositamount")]
    pub deposit_amount: Option<i64>,
    #[serde(rename = "settlementdays")]
    pub settlement_days: i32,
    #[serde(rename = "conditionsjson")]
    pub conditions_json: Option<String>,
    #[serde(rename = "expiresat", with = "remote_datetime")]
    pub expires_at: DateTime<Utc>,
    #[serde(rename = "parentofferid")]
    pub parent_offer_id: Option<i64>,
    pub version: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferCondition {
    pub id: i64,
    #[serde(rename = "offerid")]
    pub offer_id: i64,
    #[serde(rename = "conditiontype")]
    pub condition_type: ConditionType,
    pub description: String,
    #[serde(rename = "daystosatisfy")]
    pub days_to_satisfy: i32,
    #[serde(rename = "issatisfied")]
    pub is_satisfied: bool,
    #[serde(rename = "satisfiedat", default, with = "remote_datetime_opt")]
    pub satisfied_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewOfferCondition {
    #[serde(rename = "offerid")]
    pub offer_id: i64,
    #[serde(rename = "conditiontype")]
    pub condition_type: ConditionType,
    pub description: String,
    #[serde(rename = "daystosatisfy")]
    pub days_to_satisfy: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferHistoryRecord {
    pub id: i64,
    #[serde(rename = "offerid")]
    pub offer_id: i64,
    #[serde(rename = "actorid")]
    pub actor_id: i64,
    pub action: HistoryAction,
    #[serde(rename = "offeramount")]
    pub offer_amount: Option<i64>,
    #[serde(rename = "conditionsjson")]
    pub conditions_json: Option<String>,
    pub message: String,
    #[serde(rename = "createdat", with = "remote_datetime")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewOfferHistory {
    #[serde(rename = "offerid")]
    pub offer_id: i64,
    #[serde(rename = "actorid")]
    pub actor_id: i64,
    pub action: HistoryAction,
    #[serde(rename = "offeramount")]
    pub offer_amount: Option<i64>,
    #[serde(rename = "conditionsjson")]
    pub conditions_json: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: i64,
    #[serde(rename = "propertyid")]
    pub property_id: i64,
    #[serde(rename = "buyerid")]
    pub buyer_id: i64,
    #[serde(rename = "sellerid")]
    pub seller_id: i64,
    #[serde(rename = "createdat", with = "remote_datetime")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewConversation {
    #[serde(rename = "propertyid")]
    pub property_id: i64,
    #[serde(rename = "buyerid")]
    pub buyer_id: i64,
    #[serde(rename = "sellerid")]
    pub seller_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    #[serde(rename = "conversationid")]
    pub conversation_id: i64,
    #[serde(rename = "senderid")]
    pub sender_id: i64,
    pub content: String,
    /// Optional attachment blob URL.
    pub bloburl: Option<String>,
    #[serde(rename = "createdat", with = "remote_datetime")]
    pub created_at: DateTime<Utc>,
    /// Set by the recipient's mark-read call, never by the sender.
    #[serde(rename = "readat", default, with = "remote_datetime_opt")]
    pub read_at: Option<DateTime<Utc>>,
    /// Client-side key for an optimistic entry awaiting its server record.
    #[serde(skip)]
    pub local_key: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewMessage {
    #[serde(rename = "conversationid")]
    pub conversation_id: i64,
    #[serde(rename = "senderid")]
    pub sender_id: i64,
    pub content: String,
    pub bloburl: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Property {
    pub id: i64,
    #[serde(rename = "sellerid")]
    pub seller_id: i64,
    pub title: String,
    pub address: String,
    pub price: i64,
    #[serde(rename = "buildinginspazureblob")]
    pub building_insp_blob: Option<String>,
    #[serde(rename = "buildinginspverified", default)]
    pub building_insp_verified: bool,
    #[serde(rename = "buildinginsppublic", default)]
    pub building_insp_public: bool,
    #[serde(rename = "pestinspazureblob")]
    pub pest_insp_blob: Option<String>,
    #[serde(rename = "pestinspverified", default)]
    pub pest_insp_verified: bool,
    #[serde(rename = "pestinsppublic", default)]
    pub pest_insp_public: bool,
    #[serde(rename = "titlesearchazureblob")]
    pub title_search_blob: Option<String>,
    #[serde(rename = "titlesearchverified", default)]
    pub title_search_verified: bool,
    #[serde(rename = "titlesearchpublic", default)]
    pub title_search_public: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub firstname: String,
    pub lastname: String,
    #[serde(default)]
    pub idverified: bool,
    #[serde(default)]
    pub photoverified: bool,
    #[serde(rename = "profilecomplete", default)]
    pub profile_complete: bool,
    pub role: Role,
}

impl User {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.firstname, self.lastname)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnreadConversation {
    #[serde(rename = "conversationid")]
    pub conversation_id: i64,
    #[serde(rename = "propertyid")]
    pub property_id: i64,
    #[serde(rename = "lastmessage")]
    pub last_message: String,
    #[serde(rename = "lastmessageat", with = "remote_datetime")]
    pub last_message_at: DateTime<Utc>,
    #[serde(rename = "unreadcount")]
    pub unread_count: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnreadSummary {
    pub total: i64,
    pub conversations: Vec<UnreadConversation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRequest {
    #[serde(rename = "propertyid")]
    pub property_id: i64,
    #[serde(rename = "buyerid")]
    pub buyer_id: i64,
    #[serde(rename = "documenttype")]
    pub document_type: String,
    #[serde(rename = "requestedat", with = "remote_datetime")]
    pub requested_at: DateTime<Utc>,
    /// Null until the seller actions the request.
    pub action: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushPayload {
    #[serde(rename = "userid")]
    pub user_id: i64,
    pub title: String,
    pub body: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn naive_remote_timestamps_are_read_as_utc() {
        let json = r#"{
            "id": 7, "conversationid": 3, "senderid": 2,
            "content": "hi", "bloburl": null,
            "createdat": "2026-08-10T04:30:00", "readat": null
        }"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        assert_eq!(msg.created_at, Utc.with_ymd_and_hms(2026, 8, 10, 4, 30, 0).unwrap());
        assert!(msg.read_at.is_none());
        assert!(msg.local_key.is_none());
    }

    #[test]
    fn rfc3339_timestamps_are_normalized_to_utc() {
        let parsed = remote_datetime::parse("2026-08-10T14:30:00+10:00").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2026, 8, 10, 4, 30, 0).unwrap());
    }

    #[test]
    fn pending_offer_past_expiry_displays_as_expired() {
        let now = Utc.with_ymd_and_hms(2026, 8, 29, 0, 0, 0).unwrap();
        let offer = Offer {
            id: 1,
            property_id: 1,
            buyer_id: 2,
            status: OfferStatus::Pending,
            offer_amount: 500_000,
            deposit_amount: None,
            settlement_days: 30,
            conditions_json: None,
            expires_at: now - chrono::Duration::hours(1),
            parent_offer_id: None,
            version: 1,
            created_at: now - chrono::Duration::days(4),
        };
        assert_eq!(offer.display_status(now), OfferStatus::Expired);

        // Terminal states are never rewritten by the expiry clock.
        let accepted = Offer { status: OfferStatus::Accepted, ..offer };
        assert_eq!(accepted.display_status(now), OfferStatus::Accepted);
    }

    #[test]
    fn remote_field_names_round_trip() {
        let offer = NewOffer {
            property_id: 9,
            buyer_id: 4,
            status: OfferStatus::Pending,
            offer_amount: 700_000,
            deposit_amount: Some(70_000),
            settlement_days: 30,
            conditions_json: None,
            expires_at: Utc.with_ymd_and_hms(2026, 9, 1, 0, 0, 0).unwrap(),
            parent_offer_id: None,
            version: 1,
        };
        let value = serde_json::to_value(&offer).unwrap();
        assert_eq!(value["propertyid"], 9);
        assert_eq!(value["offeramount"], 700_000);
        assert_eq!(value["status"], "pending");
    }
}
