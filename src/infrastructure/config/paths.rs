use std::path::PathBuf;

const APP_DIR: &str = "autoapply";

/// Get platform-specific configuration directory
pub fn config_dir() -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Library/Application Support")
            .join(APP_DIR)
    }

    #[cfg(not(target_os = "macos"))]
    {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
    }
}

pub fn settings_path() -> PathBuf {
    config_dir().join("settings.yaml")
}

pub fn log_dir() -> PathBuf {
    config_dir().join("logs")
}
