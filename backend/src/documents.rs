use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{AppError, AppResult};
use crate::models::{DocumentRequest, Property, Role, User};
use crate::push::PushNotifier;
use crate::remote::RemoteApi;

/// The three due-diligence documents a listing can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    BuildingInspection,
    PestInspection,
    TitleSearch,
}

impl DocumentKind {
    pub const ALL: [DocumentKind; 3] = [
        DocumentKind::BuildingInspection,
        DocumentKind::PestInspection,
        DocumentKind::TitleSearch,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            DocumentKind::BuildingInspection => "Building Inspection",
            DocumentKind::PestInspection => "Pest Inspection",
            DocumentKind::TitleSearch => "Title Search",
        }
    }

    fn slot(&self, property: &Property) -> (Option<String>, bool, bool) {
        match self {
            DocumentKind::BuildingInspection => (
                property.building_insp_blob.clone(),
                property.building_insp_verified,
                property.building_insp_public,
            ),
            DocumentKind::PestInspection => (
                property.pest_insp_blob.clone(),
                property.pest_insp_verified,
                property.pest_insp_public,
            ),
            DocumentKind::TitleSearch => (
                property.title_search_blob.clone(),
                property.title_search_verified,
                property.title_search_public,
            ),
        }
    }
}

/// What the current viewer may do with one document slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "access", rename_all = "snake_case")]
pub enum DocumentAccess {
    /// Not uploaded, or uploaded but not yet verified by an admin.
    Unavailable,
    /// The untouched blob, for the seller side and admins.
    Original { url: String },
    /// Public documents render for buyers behind a watermark overlay.
    Preview { url: String, watermark: String },
    /// Non-public: the buyer may ask the seller to release it.
    Requestable,
}

fn can_view_original(viewer: &User, property: &Property) -> bool {
    viewer.id == property.seller_id
        || matches!(viewer.role, Role::Admin | Role::Conveyancer)
}

/// Diagonal overlay text stamped across buyer previews. Ties the render to
/// the listing, the date, and the viewer so a screenshot is attributable.
pub fn watermark_text(property: &Property, viewer: &User, now: DateTime<Utc>) -> String {
    format!(
        "{} | {} | {}",
        property.address,
        now.format("%Y-%m-%d"),
        viewer.email
    )
}

/// Gate decision for one document slot. A document is actionable only when
/// uploaded AND verified; visibility then splits on the public flag and on
/// who is looking.
pub fn access_for(
    viewer: &User,
    property: &Property,
    kind: DocumentKind,
    now: DateTime<Utc>,
) -> DocumentAccess {
    let (blob, verified, public) = kind.slot(property);
    let Some(url) = blob else {
        return DocumentAccess::Unavailable;
    };
    if !verified {
        return DocumentAccess::Unavailable;
    }
    if can_view_original(viewer, property) {
        return DocumentAccess::Original { url };
    }
    if public {
        DocumentAccess::Preview {
            url,
            watermark: watermark_text(property, viewer, now),
        }
    } else {
        DocumentAccess::Requestable
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentDecision {
    pub kind: DocumentKind,
    pub label: &'static str,
    #[serde(flatten)]
    pub access: DocumentAccess,
}

/// All three slots decided at once, for the listing detail view.
pub fn decisions_for(viewer: &User, property: &Property, now: DateTime<Utc>) -> Vec<DocumentDecision> {
    DocumentKind::ALL
        .iter()
        .map(|&kind| DocumentDecision {
            kind,
            label: kind.label(),
            access: access_for(viewer, property, kind, now),
        })
        .collect()
}

pub struct DocumentAccessGate {
    api: Arc<dyn RemoteApi>,
    push: PushNotifier,
}

impl DocumentAccessGate {
    pub fn new(api: Arc<dyn RemoteApi>, push: PushNotifier) -> Self {
        Self { api, push }
    }

    /// Records a buyer's request for a non-public document and nudges the
    /// seller. Only valid when the gate decision is `Requestable`.
    pub async fn request_access(
        &self,
        viewer: &User,
        property: &Property,
        kind: DocumentKind,
    ) -> AppResult<()> {
        let now = Utc::now();
        match access_for(viewer, property, kind, now) {
            DocumentAccess::Requestable => {}
            DocumentAccess::Unavailable => return Err(AppError::NotFound),
            DocumentAccess::Original { .. } | DocumentAccess::Preview { .. } => {
                return Err(AppError::Validation(
                    "document is already viewable".into(),
                ))
            }
        }

        let request = DocumentRequest {
            property_id: property.id,
            buyer_id: viewer.id,
            document_type: kind.label().to_string(),
            requested_at: now,
            action: None,
        };
        self.api.create_document_request(&request).await?;
        info!(property_id = property.id, buyer_id = viewer.id,
            document = kind.label(), "document access requested");

        self.push
            .notify(
                property.seller_id,
                "Document request",
                &format!(
                    "{} requested access to the {} for {}",
                    viewer.display_name(),
                    kind.label(),
                    property.address
                ),
            )
            .await;
        Ok(())
    }
}
