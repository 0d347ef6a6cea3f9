//! Application state and composition.

use std::sync::Arc;
use std::time::Duration;

use crate::api::connections::ConnectionManager;
use crate::infrastructure::auth::TokenVerifier;
use crate::infrastructure::clock::ClockPort;
use crate::infrastructure::config::AppConfig;
use crate::infrastructure::ports::{ChatPort, EventBusPort};
use crate::infrastructure::store::{StateStore, StoreLayout, TemplateRegistry};
use crate::use_cases::{BuildAoi, Dispatcher};

/// Main application state.
///
/// Holds the wired components; passed to HTTP/WebSocket handlers via
/// Axum state. Ports are injected so the composition is the same in
/// production and under test.
pub struct App {
    pub config: AppConfig,
    pub store: Arc<StateStore>,
    pub templates: Arc<TemplateRegistry>,
    pub bus: Arc<dyn EventBusPort>,
    pub clock: Arc<dyn ClockPort>,
    pub verifier: TokenVerifier,
    pub connections: Arc<ConnectionManager>,
    pub aoi: BuildAoi,
    pub dispatcher: Dispatcher,
}

impl App {
    /// Create a new App with all dependencies wired up.
    pub fn new(
        config: AppConfig,
        bus: Arc<dyn EventBusPort>,
        chat: Arc<dyn ChatPort>,
        clock: Arc<dyn ClockPort>,
    ) -> Self {
        let layout = StoreLayout::new(&config.data_root);
        let templates = Arc::new(TemplateRegistry::new(layout.clone()));
        let store = Arc::new(StateStore::new(
            layout,
            templates.clone(),
            bus.clone(),
            clock.clone(),
            Duration::from_millis(config.store.lock_timeout_ms),
        ));
        let connections = Arc::new(ConnectionManager::new());
        let verifier = TokenVerifier::new(&config.auth.jwt_secret);

        let aoi = BuildAoi::new(store.clone(), templates.clone());
        let dispatcher = Dispatcher::new(
            store.clone(),
            templates.clone(),
            chat,
            clock.clone(),
            bus.clone(),
            connections.clone(),
        );

        Self {
            config,
            store,
            templates,
            bus,
            clock,
            verifier,
            connections,
            aoi,
            dispatcher,
        }
    }
}
