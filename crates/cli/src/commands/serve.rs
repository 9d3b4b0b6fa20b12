//! `trailverse serve` — Start the HTTP API server.

use std::sync::Arc;
use trailverse_gateway::GatewayState;

pub async fn run(port_override: Option<u16>, memory: bool) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = super::load_config()?;

    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    let stores = super::open_stores(&config, memory).await?;
    let state = GatewayState::from_config(&config, stores.sessions, stores.users);

    let providers = state.chat.providers();
    if providers.is_empty() {
        tracing::warn!("No AI providers configured; chat requests will fail until a key is set");
    }

    println!("🌲 TrailVerse Gateway");
    println!("   Listening: {}:{}", config.gateway.host, config.gateway.port);
    println!("   Store:     {}", stores.backend);
    println!(
        "   Providers: {}",
        if providers.is_empty() {
            "none".to_string()
        } else {
            providers
                .iter()
                .map(|p| p.id)
                .collect::<Vec<_>>()
                .join(", ")
        }
    );

    trailverse_gateway::serve(&config, Arc::new(state)).await?;

    Ok(())
}
