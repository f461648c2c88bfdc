//! Agent Bridge server binary.
//!
//! Serves the built-in tools over stdio or HTTP in the configured protocol.

use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use agent_bridge::config::{Args, Config};
use agent_bridge::context::Context;
use agent_bridge::elicit::ElicitationHandler;
use agent_bridge::error::Result;
use agent_bridge::resource::SubscriptionManager;
use agent_bridge::server::Server;
use agent_bridge::session::SessionStore;
use agent_bridge::task::{MemoryTaskStore, TaskManager};
use agent_bridge::transport::TransportRegistry;
use agent_bridge::VERSION;

const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    let config = Config::load(&args)?;

    // Initialize logging. stdout carries the protocol stream.
    let default_level = if config.debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if config.log_json {
        builder.json().init();
    } else {
        builder.init();
    }

    info!("Agent Bridge v{}", VERSION);
    info!("Transport: {:?}, protocol: {}", config.transport, config.protocol);

    let tasks = TaskManager::with_buffer(Arc::new(MemoryTaskStore::new()), config.subscription_buffer);
    let server = Server::new(config.name.clone())
        .with_protocol(config.protocol.clone())
        .with_sessions(Arc::new(SessionStore::new(config.session_ttl())))
        .with_tasks(Arc::new(tasks))
        .with_subscriptions(SubscriptionManager::new(config.subscription_buffer))
        .with_elicitation(Arc::new(
            ElicitationHandler::new().with_default_timeout(config.elicit_timeout()),
        ));
    let server = Arc::new(server);
    info!("Registered {} tools", server.tools().tool_count());

    let transport = TransportRegistry::with_defaults()
        .create(config.transport.as_str(), &config.transport_options())?;

    let ctx = Context::new();
    let shutdown = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            shutdown.cancel();
        }
    });

    // Sweep expired sessions.
    let sessions = Arc::clone(server.sessions());
    let sweep_ctx = ctx.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(SESSION_SWEEP_INTERVAL);
        loop {
            tokio::select! {
                _ = sweep_ctx.done() => break,
                _ = tick.tick() => match sessions.cleanup(&sweep_ctx).await {
                    Ok(0) => {}
                    Ok(n) => debug!("Removed {} expired sessions", n),
                    Err(e) => warn!("Session sweep failed: {}", e),
                },
            }
        }
    });

    transport.serve(&ctx, server).await?;
    transport.close().await?;
    info!("Server stopped");
    Ok(())
}
