use std::sync::Arc;

use qcast_auth::TokenCodec;
use qcast_axum::{axum, QcastAxumApp, QcastAxumState};
use qcast_core::{Gateway, PoolRegistry, SubscriberRegistry, TenantConnector, TenantDirectory};
use qcast_mssql::MssqlConnector;
use tracing::info;

use crate::config::ServerSettings;

/// Wire the components together. Nothing connects until the first request.
pub fn qcast_app(settings: &ServerSettings) -> QcastAxumApp {
    let connector: Arc<dyn TenantConnector> = Arc::new(MssqlConnector::new(settings.mssql.clone()));

    let directory = TenantDirectory::new(
        Arc::clone(&connector),
        settings.directory.clone(),
        &settings.directory_table,
    );
    info!(
        pool_key = %settings.directory.pool_key(),
        table = %settings.directory_table,
        "directory configured"
    );

    let state = QcastAxumState {
        directory: Arc::new(directory),
        tokens: Arc::new(TokenCodec::new(&settings.jwt_secret, settings.token_ttl)),
        pools: Arc::new(PoolRegistry::new(connector, settings.pool.clone())),
        gateway: Gateway::new(settings.pool.request_timeout),
        subscribers: Arc::new(SubscriberRegistry::new()),
        realtime: settings.realtime.clone(),
    };

    axum(state)
}
