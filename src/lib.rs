mod adapter;
pub mod application;
pub mod domain;
pub mod infrastructure;

use std::sync::Arc;

use anyhow::Context;

use adapter::console::{self, state::AppState};
use application::eventbus::create_event_bus;
use domain::clock::SystemClock;
use infrastructure::config::{self, paths, TOKEN_ENV};
use infrastructure::http::HttpWorkerApi;
use infrastructure::logging;

pub use application::config::ControllerConfig;
pub use application::controller::SessionController;

pub fn run() -> anyhow::Result<()> {
    let app_config = config::app();

    // Initialize logging
    logging::setup(app_config.logging.production);

    // Initialize configuration
    config::init();
    app_config.validate()?;
    if app_config.backend.token.is_none() {
        tracing::warn!(
            "No bearer token configured; set {} or backend.token in {:?}",
            TOKEN_ENV,
            paths::settings_path()
        );
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    runtime.block_on(async {
        let api = HttpWorkerApi::new(app_config.backend.clone())
            .context("Failed to create HTTP client")?;
        tracing::info!(base_url = %app_config.backend.base_url, "Connecting to dashboard backend");

        let state = AppState::new(
            Arc::new(api),
            app_config.controller_config(),
            Arc::new(SystemClock),
            create_event_bus(),
        );
        console::run_console(state).await
    })
}
