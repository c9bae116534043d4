//! Configuration module for the companion app.
//!
//! Provides `AppConfig` (top-level settings), sub-configs for the API,
//! audio and chat, `AppPaths` for cross-platform directories, and TOML
//! persistence via `AppConfig::load` / `AppConfig::save`.

pub mod paths;
pub mod settings;

pub use paths::AppPaths;
pub use settings::{ApiConfig, AppConfig, AudioConfig, ChatConfig, UiConfig, API_KEY_ENV_VARS};
