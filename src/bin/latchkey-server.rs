// ABOUTME: Server binary wiring configuration, database, and the HTTP router together
// ABOUTME: Handles startup, first-party client seeding, and graceful shutdown
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Latchkey Identity

//! # Latchkey Server Binary
//!
//! Starts the OAuth2 identity provider: loads configuration from the
//! environment, opens and migrates the database, optionally seeds the
//! privileged first-party client, and serves the HTTP API.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use latchkey::{
    config::environment::ServerConfig, database::Database, logging, models::Client,
    resources::ServerResources, routes,
};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "latchkey-server")]
#[command(about = "Latchkey - single-node OAuth2 identity provider")]
pub struct Args {
    /// Override HTTP port
    #[arg(long)]
    http_port: Option<u16>,

    /// Seed the privileged first-party client with this name if none
    /// exists yet. The generated secret is logged exactly once.
    #[arg(long)]
    seed_app_client: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = ServerConfig::from_env()?;
    if let Some(http_port) = args.http_port {
        config.http_port = http_port;
    }

    logging::init_from_env()?;

    info!("Starting Latchkey identity provider");
    info!("{}", config.summary());

    let database = Database::new(&config.database.url).await?;
    database.migrate().await?;
    info!("Database initialized: {}", config.database.url);

    let resources = ServerResources::new(database, config.clone());

    if let Some(name) = args.seed_app_client {
        seed_first_party_client(&resources, &name).await?;
    }

    let router = routes::router(resources);

    let addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("HTTP server listening on {addr}");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    info!("Latchkey shut down cleanly");
    Ok(())
}

/// Create the first-party client unless one already exists. The
/// `first_party` column is only ever set here, never through the API.
async fn seed_first_party_client(resources: &ServerResources, name: &str) -> Result<()> {
    if let Some(existing) = resources.database.get_first_party_client().await? {
        warn!(
            client_id = %existing.id,
            "first-party client already seeded, skipping"
        );
        return Ok(());
    }

    let secret = resources.credentials.generate_client_secret();
    let client = Client {
        id: resources.credentials.generate_client_id(),
        secret_hash: resources.credentials.hash_token(&secret),
        name: name.to_owned(),
        developer_id: Uuid::nil(),
        authorize_test_accounts: true,
        first_party: true,
        update_notification_handler: None,
        created_at: Utc::now(),
    };
    resources.database.create_client(&client).await?;

    // Shown once; only the hash is stored.
    info!(client_id = %client.id, "first-party client seeded");
    info!("first-party client secret: {secret}");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {e}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => warn!("Failed to install SIGTERM handler: {e}"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
    }
}
