//! # Agora Node
//!
//! Agent-commerce node: drives jobs for one wallet and serves the job API.

use std::sync::Arc;

use agora_core::{LedgerGateway, RegistryService};
use agora_sdk::{JobEventStream, LedgerClient, RegistryClient};
use agora_state::SandboxLedger;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod api;
mod config;
mod handler;
mod orchestrator;
mod queue;
mod retry;
mod state;

use config::NodeConfig;
use handler::DefaultHandler;
use orchestrator::JobOrchestrator;
use state::AppState;

/// Run the Agora node server.
pub async fn run_server(config: NodeConfig) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("🚀 Agora Node starting on chain {}...", config.network.chain_id());

    let wallet = config.wallet()?;

    let (ledger, registry): (Arc<dyn LedgerGateway>, Arc<dyn RegistryService>) =
        match &config.ledger_url {
            None => {
                info!("🧪 No ledger relay configured, using the sandbox ledger");
                let sandbox = Arc::new(SandboxLedger::new(wallet.clone()));
                let ledger: Arc<dyn LedgerGateway> = sandbox.clone();
                let registry: Arc<dyn RegistryService> = sandbox;
                (ledger, registry)
            }
            Some(ledger_url) => {
                info!("🔗 Ledger relay {}, registry {}", ledger_url, config.registry_url());
                let ledger: Arc<dyn LedgerGateway> = Arc::new(LedgerClient::new(
                    ledger_url,
                    wallet.clone(),
                    config.network.contract_address(),
                ));
                let registry: Arc<dyn RegistryService> =
                    Arc::new(RegistryClient::new(config.registry_url(), wallet.clone()));
                (ledger, registry)
            }
        };

    let orchestrator = Arc::new(JobOrchestrator::new(
        &config,
        wallet.clone(),
        ledger,
        registry,
        Arc::new(DefaultHandler::new(config.auto_accept)),
    ));

    // Start the orchestrator background task
    tokio::spawn(orchestrator.clone().run());

    if let Some(push_url) = config.push_url.clone() {
        let orchestrator = orchestrator.clone();
        let retry_after = config.poll_interval();
        tokio::spawn(async move {
            loop {
                match JobEventStream::connect(&push_url, wallet.clone()).await {
                    Ok(stream) => {
                        info!("📡 Push stream connected");
                        orchestrator.clone().consume(stream).await;
                        warn!("push stream closed, reconnecting");
                    }
                    Err(e) => warn!(error = %e, "push stream connect failed"),
                }
                tokio::time::sleep(retry_after).await;
            }
        });
    }

    let addr = config.listen_addr;
    let state = AppState::new(Arc::new(config), orchestrator);
    let app = api::create_router(state);

    info!("🌐 Listening on http://{}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = NodeConfig::load()?;
    run_server(config).await
}
