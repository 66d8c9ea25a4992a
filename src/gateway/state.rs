use std::sync::Arc;

use crate::monitor::ConfirmationMonitor;
use crate::rails::RequestRouter;
use crate::request::RequestStore;
use crate::websocket::ConnectionManager;

/// Gateway shared state
#[derive(Clone)]
pub struct AppState {
    /// Intake for live-connection requests
    pub router: Arc<RequestRouter>,
    /// Live connection registry
    pub ws_manager: Arc<ConnectionManager>,
    /// Read side for HTTP queries and health
    pub store: Arc<dyn RequestStore>,
    pub monitor: Arc<ConfirmationMonitor>,
}

impl AppState {
    pub fn new(
        router: Arc<RequestRouter>,
        ws_manager: Arc<ConnectionManager>,
        store: Arc<dyn RequestStore>,
        monitor: Arc<ConfirmationMonitor>,
    ) -> Self {
        Self {
            router,
            ws_manager,
            store,
            monitor,
        }
    }
}
