pub mod api;
pub mod codec;
pub mod config;
pub mod context;
pub mod error;
pub mod links;
pub mod logging;
pub mod opcua;
pub mod scheduler;
pub mod tags;
pub mod ws;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use config::GatewayConfig;
use context::GatewayContext;
use opcua::OpcUaServer;

/// Load configuration, wire up links/registry/OPC UA server/scheduler, and
/// serve the dashboard until the process is killed or the OPC UA server
/// task exits. Split out of `main.rs` so integration tests can exercise the
/// individual pieces (`links`, `tags`, `codec`, `config`) without running
/// the whole gateway.
pub async fn run() {
    let config_path =
        PathBuf::from(std::env::var("GATEWAY_CONFIG").unwrap_or_else(|_| "config.yaml".to_string()));
    let cfg = match GatewayConfig::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, path = %config_path.display(), "failed to load configuration");
            std::process::exit(1);
        }
    };
    info!(
        slaves = cfg.modbus.slaves.len(),
        tags = cfg.nodes.len(),
        "configuration loaded"
    );

    let links = match links::build_links(&cfg.modbus) {
        Ok(l) => l,
        Err(e) => {
            error!(error = %e, "failed to build modbus links");
            std::process::exit(1);
        }
    };
    let link_names = links::link_names(&links);

    let registry = match tags::TagRegistry::build(&cfg.nodes, &link_names) {
        Ok(r) => r,
        Err(e) => {
            error!(error = %e, "failed to build tag registry");
            std::process::exit(1);
        }
    };

    let opcua_server = match opcua::build(&cfg.opcua, &registry) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to build opc ua server");
            std::process::exit(1);
        }
    };
    let OpcUaServer {
        server,
        node_manager,
        node_table,
    } = opcua_server;

    let ctx = GatewayContext::new(registry, links, node_manager.clone(), &node_table, config_path);

    let poll_interval = Duration::from_secs_f64(cfg.modbus.poll_interval.max(0.01));
    scheduler::spawn(ctx.clone(), poll_interval);

    opcua::spawn_write_watch(
        node_manager,
        Arc::new(node_table),
        ctx.links.clone(),
        ctx.cache.clone(),
        ctx.tx.clone(),
    );

    let opcua_task = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            error!(error = %e, "opc ua server exited");
        }
    });

    let app = axum::Router::new()
        .merge(api::router())
        .merge(ws::router())
        .with_state(ctx);

    let addr = SocketAddr::from(([0, 0, 0, 0], 8080));
    info!(%addr, "dashboard listening");
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(error = %e, %addr, "failed to bind dashboard listener");
            std::process::exit(1);
        }
    };

    tokio::select! {
        res = axum::serve(listener, app) => {
            if let Err(e) = res {
                error!(error = %e, "dashboard server exited");
            }
        }
        _ = opcua_task => {
            error!("opc ua server task exited unexpectedly");
        }
    }
}
