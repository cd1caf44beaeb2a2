use std::sync::Arc;

use tracing::warn;

use crate::models::PushPayload;
use crate::remote::RemoteApi;

/// Best-effort push dispatch. Delivery failures are logged and swallowed;
/// they must never fail the workflow that triggered them.
#[derive(Clone)]
pub struct PushNotifier {
    api: Arc<dyn RemoteApi>,
}

impl PushNotifier {
    pub fn new(api: Arc<dyn RemoteApi>) -> Self {
        Self { api }
    }

    pub async fn notify(&self, user_id: i64, title: &str, body: &str) {
        let payload = PushPayload {
            user_id,
            title: title.to_string(),
            body: body.to_string(),
        };
        if let Err(e) = self.api.send_push(&payload).await {
            warn!(user_id, error = %e, "push notification failed");
        }
    }
}
