//! wp-harden - Entry point

use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::FmtSubscriber;
use wp_harden::admin::SettingsPage;
use wp_harden::config::Config;
use wp_harden::error::HardenError;
use wp_harden::filter::FilterChain;
use wp_harden::options::{InMemoryOptionStore, JsonFileOptionStore, OptionStore};
use wp_harden::proxy::ProxyClient;
use wp_harden::server::{Hardener, Server};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = Config::from_env()?;

    FmtSubscriber::builder()
        .with_max_level(config.log.level)
        .with_target(false)
        .init();

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| HardenError::Config(format!("Invalid SERVER_HOST: {}", e)))?;

    let options: Arc<dyn OptionStore> = match &config.options.path {
        Some(path) => Arc::new(JsonFileOptionStore::open(path).await.map_err(HardenError::from)?),
        None => {
            tracing::warn!("OPTIONS_PATH not set, settings are kept in memory only");
            Arc::new(InMemoryOptionStore::new())
        }
    };

    let filter_chain = FilterChain::hardening();
    let proxy_client = ProxyClient::new(config.proxy.clone())?;

    let mut hardener = Hardener::new(filter_chain, proxy_client, options.clone())
        .with_settings_path(config.admin.settings_path.clone());
    match config.admin.token.clone() {
        Some(token) => {
            tracing::info!(path = %config.admin.settings_path, "Settings page enabled");
            hardener = hardener.with_settings_page(SettingsPage::new(
                options,
                token,
                config.admin.settings_path.clone(),
            ));
        }
        None => tracing::info!("ADMIN_TOKEN not set, settings path answers 404"),
    }

    tracing::info!(upstream = %config.proxy.upstream_url, "Proxying to upstream site");

    let server = Server::bind(addr, hardener).await?;
    server.run().await?;

    Ok(())
}
