//! Crashpoint Game Server
//!
//! Runs both round engines and the WebSocket front end with in-memory
//! backends. Production deployments replace the boundary collaborators
//! with real ones; in particular, the entropy mode must name a real
//! oracle or the process refuses to start.

use std::sync::Arc;

use anyhow::{bail, Context};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use crashpoint::boundary::{InMemoryBalances, InMemoryRoundStore};
use crashpoint::game::engine::recover_unfinished;
use crashpoint::{
    CrashEngine, EngineConfig, EngineDeps, GameServer, ServerConfig, SlideEngine, VERSION,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    info!("Crashpoint Server v{}", VERSION);

    // The dev entropy source voids the fairness guarantee; it needs an
    // explicit opt-in, and anything else fails closed.
    let entropy: Arc<dyn crashpoint::boundary::EntropySource> =
        match std::env::var("ENTROPY_MODE").as_deref() {
            Ok("dev") => {
                warn!("ENTROPY_MODE=dev: locally generated public seeds, NOT provably fair");
                Arc::new(crashpoint::boundary::LocalEntropy)
            }
            Ok(other) => bail!(
                "ENTROPY_MODE={other}: no entropy oracle configured; refusing to run rounds \
                 that cannot be proven fair"
            ),
            Err(_) => bail!(
                "ENTROPY_MODE is not set; set ENTROPY_MODE=dev for local development or \
                 configure a production entropy oracle"
            ),
        };

    let balances = Arc::new(InMemoryBalances::new());
    let store = Arc::new(InMemoryRoundStore::new());

    // Refund anything a previous process left open before taking new bets.
    let recovered = recover_unfinished(store.as_ref(), balances.as_ref())
        .await
        .context("startup recovery failed")?;
    if recovered > 0 {
        info!("recovered {} unfinished rounds", recovered);
    }

    let deps = EngineDeps {
        entropy,
        balances,
        store: store.clone(),
    };
    let crash = CrashEngine::spawn(EngineConfig::default(), deps.clone());
    let slide = SlideEngine::spawn(EngineConfig::slide_defaults(), deps);

    let server = GameServer::new(ServerConfig::from_env(), crash, slide, store);
    server.run().await.context("server error")?;

    Ok(())
}
