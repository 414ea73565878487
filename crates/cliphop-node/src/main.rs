//! Cliphop node entry point.
//!
//! Wires the infrastructure adapters to the sync controller and runs until
//! Ctrl-C.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load_config()            -- TOML, defaults on first run
//!  └─ AddressResolver          -- pick the mesh interface address
//!  └─ start services
//!       ├─ MessageListener     (Tokio task: accept → decode → mpsc)
//!       ├─ DiscoveryService    (mDNS thread → mpsc → registry pump task)
//!       ├─ inbound pump        (Tokio task: mpsc → SyncController)
//!       └─ clipboard poll loop (this task, every poll interval)
//! ```

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use cliphop_node::application::peer_registry::{PeerEvent, PeerRegistry};
use cliphop_node::application::sync_controller::{Clipboard, NodeIdentity, SyncController};
use cliphop_node::infrastructure::clipboard::{mock::MemoryClipboard, SystemClipboard};
use cliphop_node::infrastructure::network::address::AddressResolver;
use cliphop_node::infrastructure::network::discovery::{
    pump_discovery_events, Advertisement, DiscoveryService,
};
use cliphop_node::infrastructure::network::listener::{ListenerConfig, MessageListener};
use cliphop_node::infrastructure::network::sender::TcpMessageSender;
use cliphop_node::infrastructure::notify::LogNotifier;
use cliphop_node::infrastructure::storage::config::{load_config, AppConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (config, config_error) = match load_config() {
        Ok(cfg) => (cfg, None),
        Err(e) => (AppConfig::default(), Some(e)),
    };

    // Structured logging.  `RUST_LOG` overrides the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.node.log_level)),
        )
        .init();

    if let Some(e) = config_error {
        warn!("config unusable, falling back to defaults: {e}");
    }

    let hostname = gethostname::gethostname().to_string_lossy().into_owned();
    let device_id = config.node.resolve_device_id(&hostname);
    let trust = config.network.trusted_subnet;
    info!("Cliphop starting as {device_id} ({hostname}), trusted subnet {trust}");

    // ── Local address ─────────────────────────────────────────────────────────
    let resolver = AddressResolver::new(trust);
    let local = resolver.resolve();
    if !trust.contains(local.ip) {
        warn!(
            "local address {} is outside {trust}; peers will not accept this node",
            local.ip
        );
    }

    // ── Listener ──────────────────────────────────────────────────────────────
    let (inbound_tx, mut inbound_rx) = mpsc::channel(64);
    let mut listener_config = ListenerConfig::new(local.ip, config.network.listen_port);
    listener_config.probe_attempts = config.network.port_probe_attempts;
    listener_config.max_payload_bytes = config.network.max_payload_bytes;
    let listener = MessageListener::start(listener_config, inbound_tx)
        .context("failed to start message listener")?;

    // ── Registry ──────────────────────────────────────────────────────────────
    let registry = Arc::new(Mutex::new(PeerRegistry::new(device_id.clone(), trust)));
    let mut peer_events = registry.lock().await.subscribe();
    tokio::spawn(async move {
        loop {
            match peer_events.recv().await {
                Ok(PeerEvent::Added(p) | PeerEvent::Updated(p)) => {
                    info!("peer available: {} at {}", p.device_id, p.socket_addr())
                }
                Ok(PeerEvent::Removed(id)) => info!("peer gone: {id}"),
                Err(RecvError::Lagged(missed)) => warn!("peer log skipped {missed} events"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    // ── Discovery ─────────────────────────────────────────────────────────────
    let (discovery_tx, discovery_rx) = mpsc::channel(64);
    let advertisement = Advertisement {
        device_id: device_id.clone(),
        hostname: hostname.clone(),
        interface_ip: local.ip,
        port: listener.port(),
    };
    let mut discovery =
        match DiscoveryService::start(&config.network.service_type, &advertisement, discovery_tx) {
            Ok(service) => Some(service),
            Err(e) => {
                error!("discovery unavailable, no peers will be found: {e}");
                None
            }
        };
    tokio::spawn(pump_discovery_events(
        discovery_rx,
        Arc::clone(&registry),
        config.network.service_type.clone(),
    ));

    // ── Sync controller ───────────────────────────────────────────────────────
    let clipboard: Arc<dyn Clipboard> = match SystemClipboard::open() {
        Ok(c) => Arc::new(c),
        Err(e) => {
            warn!("{e}; received text will only be kept in history");
            Arc::new(MemoryClipboard::new())
        }
    };
    let sender = TcpMessageSender::new(local.ip)
        .with_timeout(config.network.send_timeout())
        .with_max_payload_bytes(config.network.max_payload_bytes);
    let controller = Arc::new(SyncController::new(
        NodeIdentity {
            device_id,
            listen_port: listener.port(),
            trust,
        },
        config.sync.settings(),
        Arc::clone(&registry),
        Arc::new(sender),
        Arc::clone(&clipboard),
        Arc::new(LogNotifier),
    ));
    controller.prime(&clipboard.get().unwrap_or_default()).await;

    let inbound_controller = Arc::clone(&controller);
    tokio::spawn(async move {
        while let Some(inbound) = inbound_rx.recv().await {
            inbound_controller.handle_message(inbound.message).await;
        }
    });

    info!("Cliphop ready on {}.  Press Ctrl-C to exit.", listener.local_addr());

    // ── Clipboard poll loop ───────────────────────────────────────────────────
    let mut ticker = tokio::time::interval(config.sync.poll_interval());
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                controller.poll_clipboard().await;
            }
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!("failed to listen for shutdown signal: {e}");
                }
                info!("shutdown signal received");
                break;
            }
        }
    }

    if let Some(service) = discovery.as_mut() {
        service.stop();
    }
    listener.shutdown().await;

    info!("Cliphop stopped");
    Ok(())
}
