//! `trailverse init` — Write a default config file.

use trailverse_config::AppConfig;

pub async fn run(force: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config_dir = AppConfig::config_dir();
    let config_path = config_dir.join("config.toml");

    println!("🌲 TrailVerse — Setup");
    println!("=====================\n");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
        println!("✅ Created config directory: {}", config_dir.display());
    }

    if config_path.exists() && !force {
        println!("  Config file exists: {}", config_path.display());
        println!("  Use --force to overwrite it.");
        return Ok(());
    }

    std::fs::write(&config_path, AppConfig::default_toml())?;
    println!("✅ Wrote {}", config_path.display());
    println!();
    println!("  API keys are read from the environment:");
    println!("    ANTHROPIC_API_KEY, OPENAI_API_KEY");
    println!("    OPENWEATHER_API_KEY, NPS_API_KEY");
    println!();
    println!("  Next: trailverse doctor, then trailverse serve");

    Ok(())
}
