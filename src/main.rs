//! Application entry point: companion chat with live voice calls.
//!
//! # Startup sequence
//!
//! 1. Initialise logging.
//! 2. Load [`AppConfig`] from disk; on first run write the defaults so the
//!    user has a `settings.toml` to put the API key in.
//! 3. Create the [`tokio`] runtime (multi-thread, 2 workers).
//! 4. Build the shared [`GeminiClient`] and the [`ChatService`] around it.
//! 5. Run [`eframe::run_native`]: blocks the main thread until the window
//!    is closed.

use std::sync::Arc;

use companion_voice::{
    app::CompanionApp,
    chat::{ChatService, GeminiClient, GenerativeClient},
    config::{AppConfig, AppPaths, API_KEY_ENV_VARS},
};

use eframe::egui;

fn native_options(config: &AppConfig) -> eframe::NativeOptions {
    let (width, height) = config.ui.window_size;
    let viewport = egui::ViewportBuilder::default()
        .with_title("Soulmate")
        .with_inner_size([width, height])
        .with_min_inner_size([720.0, 480.0]);

    eframe::NativeOptions {
        viewport,
        ..Default::default()
    }
}

fn main() -> eframe::Result<()> {
    // 1. Logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("companion starting up");

    // 2. Configuration
    let config = AppConfig::load().unwrap_or_else(|e| {
        log::warn!("Failed to load config ({e}); using defaults");
        AppConfig::default()
    });
    if AppConfig::is_first_run() {
        match config.save() {
            Ok(()) => log::info!(
                "Wrote default settings to {}",
                AppPaths::new().settings_file.display()
            ),
            Err(e) => log::warn!("Could not write default settings: {e}"),
        }
    }
    if config.api.resolved_api_key().is_none() {
        log::warn!(
            "No API key: set {} or api.api_key in {}",
            API_KEY_ENV_VARS.join(" / "),
            AppPaths::new().settings_file.display()
        );
    }

    // 3. Tokio runtime
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("failed to create tokio runtime");

    // 4. Shared generative client
    let client: Arc<dyn GenerativeClient> = Arc::new(GeminiClient::from_config(&config.api));
    let service = Arc::new(ChatService::new(client, &config.chat));

    // 5. Window
    let options = native_options(&config);
    let runtime = rt.handle().clone();

    eframe::run_native(
        "Soulmate",
        options,
        Box::new(move |cc| {
            egui_extras::install_image_loaders(&cc.egui_ctx);
            Ok(Box::new(CompanionApp::new(runtime, service, config)))
        }),
    )
}
