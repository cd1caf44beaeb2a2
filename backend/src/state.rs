use std::sync::Arc;

use crate::config::AppConfig;
use crate::documents::DocumentAccessGate;
use crate::offer::OfferWorkflow;
use crate::push::PushNotifier;
use crate::remote::{RemoteApi, UserCache};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub api: Arc<dyn RemoteApi>,
    pub users: Arc<UserCache>,
}

impl AppState {
    pub fn new(config: AppConfig, api: Arc<dyn RemoteApi>) -> Self {
        let users = Arc::new(UserCache::new(api.clone()));
        Self { config, api, users }
    }

    pub fn offers(&self) -> OfferWorkflow {
        OfferWorkflow::new(self.api.clone())
    }

    pub fn documents(&self) -> DocumentAccessGate {
        DocumentAccessGate::new(self.api.clone(), PushNotifier::new(self.api.clone()))
    }
}
