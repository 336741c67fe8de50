pub mod adapters;
pub mod config;
pub mod domain;
pub mod infra;
pub mod services;

use {
    crate::adapters::{gateway::GatewayRegistry, panel::HostRegistry},
    crate::config::AppConfig,
    crate::services::notify::Notifier,
    std::sync::Arc,
};

#[derive(Clone)]
pub struct AppState {
    pub pool: sqlx::PgPool,
    pub config: Arc<AppConfig>,
    pub gateways: Arc<GatewayRegistry>,
    pub hosts: Arc<HostRegistry>,
    pub notifier: Arc<dyn Notifier>,
}
