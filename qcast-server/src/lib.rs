pub mod app;
pub mod config;

use config::ServerSettings;
use qcast_axum::QcastAxumApp;

/// Load configuration from the environment and build the app.
pub fn build() -> anyhow::Result<(ServerSettings, QcastAxumApp)> {
    let cfg = config::load();
    let settings = ServerSettings::from_config(&cfg)?;
    let app = app::qcast_app(&settings);
    Ok((settings, app))
}
