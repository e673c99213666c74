use std::sync::Arc;

use lilygate::access::{DecryptionNetwork, HttpNetwork, LocalNetwork};
use lilygate::chain::{ChainClient, ChainRpc, EphemeralIdentityProvider};
use lilygate::config::Settings;
use lilygate::modules::api;
use lilygate::modules::upstream::RetryingFetcher;
use lilygate::orchestrator::RequestOrchestrator;
use log::{info, warn};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    env_logger::init();

    // Load configuration
    let settings = Arc::new(Settings::from_env()?);
    info!("Loaded settings: {:?}", settings);

    // Missing keys fail each request, not startup
    if let Err(e) = settings.request_config() {
        warn!("{}; every request will fail until it is set", e);
    }

    let condition = Arc::new(settings.access_condition()?);
    info!(
        "Access condition {} on {}",
        condition.condition_hash(),
        condition.chain()
    );

    let chain: Arc<dyn ChainRpc> = Arc::new(ChainClient::new(
        settings.chain_rpc_url().unwrap_or_default(),
    ));
    let identities = EphemeralIdentityProvider::new(chain.clone());

    let network: Arc<dyn DecryptionNetwork> = match &settings.condition_network_url {
        Some(url) if !settings.uses_local_network() => {
            info!("Using {} network gateway at {}", settings.condition_network, url);
            Arc::new(HttpNetwork::new(url.clone(), settings.condition_network.clone()))
        }
        _ => {
            info!("Using in-process {} network", settings.condition_network);
            Arc::new(LocalNetwork::new(settings.condition_network.clone()).with_anchor_source(chain))
        }
    };

    let orchestrator = Arc::new(RequestOrchestrator::new(
        settings.clone(),
        condition,
        RetryingFetcher::new(settings.retry_policy()),
        network,
        identities,
    ));

    // Bind the server
    let listener = TcpListener::bind(format!("0.0.0.0:{}", settings.port)).await?;
    info!("Listening on: 0.0.0.0:{}", settings.port);

    axum::serve(listener, api::router(orchestrator)).await?;

    Ok(())
}
