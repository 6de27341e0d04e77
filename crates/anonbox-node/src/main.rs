//! AnonBox node entry point.
//!
//! Headless: loads the configuration, starts a [`ChatNode`] with LAN discovery
//! and the default chat dispatcher, then runs until Ctrl-C.
//!
//! ```text
//! main()
//!  └─ load_config()            -- TOML + ANONBOX_* environment overrides
//!  └─ init_config()            -- default config.toml on first run
//!  └─ ChatNode::start()
//!       ├─ Listener             (accept loop task)
//!       ├─ LanDiscovery         (announce + browse threads)
//!       └─ ChatDispatcher       (log, history, attachments)
//!  └─ ctrl_c ─► ChatNode::stop()
//! ```

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use anonbox_node::application::history::ChatHistory;
use anonbox_node::application::receive_message::{AttachmentStore, ChatDispatcher};
use anonbox_node::infrastructure::network::discovery::{
    DiscoveryProvider, LanDiscovery, LanDiscoveryConfig,
};
use anonbox_node::infrastructure::runtime::{ChatNode, NodeOptions};
use anonbox_node::infrastructure::storage::config::{init_config, load_config, AppConfig};

const ENV_PASSPHRASE: &str = "ANONBOX_PASSPHRASE";
const ENV_NAME: &str = "ANONBOX_NAME";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (mut config, config_error) = match load_config() {
        Ok(config) => (config, None),
        Err(e) => (AppConfig::default(), Some(e)),
    };
    apply_env_overrides(&mut config);

    // `RUST_LOG` wins over the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.node.log_level)),
        )
        .init();

    if let Some(e) = config_error {
        warn!("using default configuration: {e}");
    }
    match init_config() {
        Ok(Some(path)) => info!("wrote default configuration to {}", path.display()),
        Ok(None) => {}
        Err(e) => warn!("could not write default configuration: {e}"),
    }
    info!("AnonBox starting");

    let history = Arc::new(ChatHistory::new(config.history.capacity));
    let dispatcher = Arc::new(ChatDispatcher::new(
        Arc::clone(&history),
        AttachmentStore::new(&config.node.download_dir),
    ));

    let discovery: Option<Arc<dyn DiscoveryProvider>> = if config.network.discovery_enabled {
        let mut lan = LanDiscoveryConfig::broadcast(config.network.discovery_port);
        lan.announce_interval = config.network.announce_interval();
        lan.record_ttl = config.network.record_ttl();
        Some(Arc::new(LanDiscovery::new(lan)) as Arc<dyn DiscoveryProvider>)
    } else {
        info!("discovery disabled by configuration");
        None
    };

    let options = NodeOptions::from_config(&config).context("invalid network configuration")?;
    let node = ChatNode::start(options, dispatcher, discovery)
        .await
        .context("failed to start node")?
        .with_history(history);

    info!(
        "{} ready on {}.  Press Ctrl-C to exit.",
        node.identity().display_name(),
        node.local_addr()
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("shutdown signal received");

    node.stop().await;
    info!("AnonBox stopped");
    Ok(())
}

/// Applies `ANONBOX_PASSPHRASE` and `ANONBOX_NAME` on top of the file config.
fn apply_env_overrides(config: &mut AppConfig) {
    if let Ok(passphrase) = std::env::var(ENV_PASSPHRASE) {
        config.node.passphrase = Some(passphrase);
    }
    if let Ok(name) = std::env::var(ENV_NAME) {
        config.node.display_name = Some(name);
    }
}
