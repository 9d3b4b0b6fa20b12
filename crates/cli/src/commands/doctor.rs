//! `trailverse doctor` — Diagnose configuration.

use trailverse_config::AppConfig;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    println!("🩺 TrailVerse Doctor — Configuration Check");
    println!("==========================================\n");

    let mut issues = 0;

    let config_path = AppConfig::config_dir().join("config.toml");
    if config_path.exists() {
        println!("  ✅ Config file found: {}", config_path.display());
    } else {
        println!("  ⚠️  No config file — using defaults (run `trailverse init`)");
    }

    let config = match AppConfig::load() {
        Ok(config) => {
            println!("  ✅ Config valid");
            config
        }
        Err(e) => {
            println!("  ❌ Config invalid: {e}");
            return Ok(());
        }
    };

    if config.has_claude() {
        println!(
            "  ✅ Claude configured ({} model(s) in fallback order)",
            config.providers.claude_models.len()
        );
    } else {
        println!("  ⚠️  Claude not configured — set ANTHROPIC_API_KEY");
    }

    if config.has_openai() {
        println!("  ✅ OpenAI configured ({})", config.providers.openai_model);
    } else {
        println!("  ⚠️  OpenAI not configured — set OPENAI_API_KEY");
    }

    if !config.has_claude() && !config.has_openai() {
        println!("  ❌ No AI provider available; every chat request will fail");
        issues += 1;
    }

    if config.facts.openweather_api_key.is_some() {
        println!("  ✅ Weather facts enabled");
    } else {
        println!("  ⚠️  Weather facts disabled — set OPENWEATHER_API_KEY");
    }

    if config.facts.nps_api_key.is_some() {
        println!("  ✅ Park alert facts enabled");
    } else {
        println!("  ⚠️  Park alert facts disabled — set NPS_API_KEY");
    }

    match config.store.backend.as_str() {
        "memory" => println!("  ⚠️  In-memory store: sessions are lost on restart"),
        _ => match super::open_stores(&config, false).await {
            Ok(_) => println!(
                "  ✅ SQLite store opened: {}",
                config.store.database_path().display()
            ),
            Err(e) => {
                println!("  ❌ SQLite store failed to open: {e}");
                issues += 1;
            }
        },
    }

    println!(
        "  ℹ️  Daily token limit for users: {}",
        config.budget.user_daily_tokens
    );

    println!();
    if issues == 0 {
        println!("  🎉 Ready to serve!");
    } else {
        println!("  ⚠️  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}
