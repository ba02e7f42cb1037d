mod app_config;
pub mod loader;
pub mod paths;
pub mod settings;

pub use app_config::*;

use std::sync::OnceLock;

/// Environment variable holding the dashboard bearer token
pub const TOKEN_ENV: &str = "AUTOAPPLY_TOKEN";

static APP_CONFIG: OnceLock<AppConfig> = OnceLock::new();

/// Initialize configuration system (called at app startup)
pub fn init() {
    APP_CONFIG.get_or_init(load_app_config);
    tracing::info!("Configuration initialized");
}

/// Get application configuration
pub fn app() -> &'static AppConfig {
    APP_CONFIG.get_or_init(load_app_config)
}

fn load_app_config() -> AppConfig {
    let mut config: AppConfig = loader::load_embedded_config("app");
    config.apply_settings(&loader::load_user_settings());
    config.apply_env_token(std::env::var(TOKEN_ENV).ok());
    config
}
