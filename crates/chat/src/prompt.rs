//! Message sanitisation and fact-augmented system prompt assembly.

use trailverse_core::facts::FactsBundle;
use trailverse_core::message::{Message, Role};

/// Used when the caller supplies no system prompt of their own.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are TrailVerse, a friendly and knowledgeable \
national parks trip-planning assistant. Give practical, specific advice about parks, trails, \
logistics and safety. If you are unsure about current conditions, say so and suggest checking \
the official National Park Service website.";

/// Split caller messages into conversation turns and system text.
///
/// System-role turns are removed from the conversation; their content is
/// returned separately, in order, for merging into the system prompt.
pub fn sanitize_messages(messages: Vec<Message>) -> (Vec<Message>, Vec<String>) {
    let (system, turns): (Vec<Message>, Vec<Message>) =
        messages.into_iter().partition(|m| m.role == Role::System);
    let system = system
        .into_iter()
        .map(|m| m.content)
        .filter(|c| !c.trim().is_empty())
        .collect();
    (turns, system)
}

/// Build the system prompt: base prompt, any inline system turns, then the
/// fact blocks.
pub fn build_system_prompt(
    base: Option<&str>,
    inline_system: &[String],
    park_name: Option<&str>,
    facts: &FactsBundle,
) -> String {
    let base = base
        .map(str::trim)
        .filter(|b| !b.is_empty())
        .unwrap_or(DEFAULT_SYSTEM_PROMPT);

    let mut prompt = String::from(base);
    for extra in inline_system {
        prompt.push_str("\n\n");
        prompt.push_str(extra.trim());
    }

    let park = park_name
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .unwrap_or("this park");

    if let Some(nps) = &facts.nps_facts {
        prompt.push_str(&format!(
            "\n\nNPS FACTS for {park}:\n{nps}\n\
             Use these official facts for alerts, closures and permits. \
             Do not invent closures, alerts or permit requirements that are not listed here."
        ));
    }

    if let Some(weather) = &facts.weather_facts {
        prompt.push_str(&format!(
            "\n\nWEATHER FACTS for {park}:\n{weather}\n\
             Base any weather statements on these facts only. \
             Do not guess conditions beyond the dates and figures given."
        ));
    }

    prompt
}

/// The most recent user-authored turn, which drives fact gathering and is
/// the message stored on anonymous sessions.
pub fn last_user_message(messages: &[Message]) -> Option<&str> {
    messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.as_str())
        .filter(|c| !c.trim().is_empty())
}
