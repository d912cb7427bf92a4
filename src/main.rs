use std::net::SocketAddr;
use std::sync::Arc;

use dotenvy::dotenv;
use snafu::ResultExt;
use tokio::net::TcpListener;

use viewkeeper::api::{self, App};
use viewkeeper::config::Config;
use viewkeeper::engine::ViewTracker;
use viewkeeper::error::{
    ApplicationError, BindAddressSnafu, ConfigLoadSnafu, ConnectDatabaseSnafu, WebServerSnafu,
};
use viewkeeper::logger;
use viewkeeper::store::SurrealStore;

#[tokio::main]
async fn main() -> Result<(), ApplicationError> {
    dotenv().ok();

    let config = Config::from_env().context(ConfigLoadSnafu)?;

    let _guard = logger::init(&config.server)?;

    let store = SurrealStore::connect(&config.server.database)
        .await
        .context(ConnectDatabaseSnafu)?;

    let tracker = Arc::new(ViewTracker::new(Arc::new(store), &config.engine));
    let router = api::router(App::new(tracker.clone()));

    let address = config.server.host;
    let listener = TcpListener::bind(address)
        .await
        .context(BindAddressSnafu { address })?;

    tracing::info!(%address, "serving view tracking");

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context(WebServerSnafu)?;

    tracker.shutdown().await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(%error, "failed to listen for the shutdown signal");
        std::future::pending::<()>().await;
    }

    tracing::info!("shutting down");
}
