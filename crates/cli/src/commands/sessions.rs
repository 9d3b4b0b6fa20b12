//! `trailverse sessions` — Inspect and purge anonymous chat sessions.

use chrono::Utc;
use trailverse_core::session::MAX_ANONYMOUS_USER_MESSAGES;

/// Show one session's gate state and message log.
pub async fn status(anonymous_id: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config()?;
    let stores = super::open_stores(&config, false).await?;

    let Some(session) = stores.sessions.get(anonymous_id).await? else {
        println!("No live session with ID {anonymous_id} (unknown or expired).");
        return Ok(());
    };

    println!("💬 Session {}", session.anonymous_id);
    println!("─────────────────────────────────────");
    println!(
        "  User messages:  {} / {MAX_ANONYMOUS_USER_MESSAGES}",
        session.user_message_count()
    );
    println!("  Total messages: {}", session.message_count);
    println!("  Can send more:  {}", session.can_send_message());
    println!("  Converted:      {}", session.is_converted);
    println!("  Park:           {}", session.park_name.as_deref().unwrap_or("-"));
    println!("  Last activity:  {}", session.last_activity.to_rfc3339());
    println!("  Expires:        {}", session.expires_at().to_rfc3339());

    if !session.messages.is_empty() {
        println!();
        for message in &session.messages {
            let via = match (&message.provider, &message.model) {
                (Some(provider), Some(model)) => format!(" [{provider}/{model}]"),
                _ => String::new(),
            };
            let preview: String = message.content.chars().take(72).collect();
            println!("  {:<9}{via} {preview}", message.role.as_str());
        }
    }

    Ok(())
}

/// Delete every session idle past the 48-hour TTL.
pub async fn purge() -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config()?;
    let stores = super::open_stores(&config, false).await?;

    let removed = stores.sessions.purge_expired(Utc::now()).await?;
    tracing::info!(removed, backend = stores.backend, "Purged expired sessions");
    println!("🧹 Removed {removed} expired session(s).");

    Ok(())
}
