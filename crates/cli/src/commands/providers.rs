//! `trailverse providers` — List configured AI providers.

use trailverse_providers::ProviderRegistry;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config()?;
    let registry = ProviderRegistry::from_config(&config.providers);
    let providers = registry.availability();

    println!("🤖 AI Providers");
    println!("──────────────────────────────────────────────");

    if providers.is_empty() {
        println!("  No providers configured.");
        println!();
        println!("  Set ANTHROPIC_API_KEY and/or OPENAI_API_KEY, or add keys to");
        println!("  the [providers] section of ~/.trailverse/config.toml.");
        return Ok(());
    }

    for provider in &providers {
        println!("  {} ({})", provider.name, provider.id);
        for (i, model) in provider.models.iter().enumerate() {
            println!("    {}. {model}", i + 1);
        }
    }

    if registry.claude().is_some() {
        println!();
        println!("  Claude models are tried in the order listed; a model that is");
        println!("  unavailable falls through to the next one.");
    }

    Ok(())
}
