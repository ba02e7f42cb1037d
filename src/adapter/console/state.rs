use std::sync::Arc;

use crate::application::config::ControllerConfig;
use crate::application::controller::SessionController;
use crate::application::eventbus::SharedEventBus;
use crate::domain::clock::SharedClock;
use crate::domain::worker_api::WorkerApiHandle;

pub struct AppState {
    pub controller: Arc<SessionController>,
    pub clock: SharedClock,
    pub event_bus: SharedEventBus,
}

impl AppState {
    pub fn new(
        api: WorkerApiHandle,
        config: ControllerConfig,
        clock: SharedClock,
        event_bus: SharedEventBus,
    ) -> Self {
        let controller = Arc::new(SessionController::spawn(
            api,
            config,
            clock.clone(),
            event_bus.clone(),
        ));

        Self {
            controller,
            clock,
            event_bus,
        }
    }
}
