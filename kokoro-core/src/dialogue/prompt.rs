//! System prompt construction for character replies.

use std::fmt::Write;

use super::DialogueRequest;
use crate::emotion::Emotion;

fn level(value: u8) -> &'static str {
    match value {
        0..=20 => "very low",
        21..=40 => "low",
        41..=60 => "moderate",
        61..=80 => "high",
        _ => "very high",
    }
}

/// Build the system prompt: persona, scenario, relationship, reply format.
pub fn build_system_prompt(request: &DialogueRequest) -> String {
    let c = &request.character;
    let r = &request.relationship;
    let mut prompt = String::new();

    let _ = writeln!(prompt, "You are {}, a companion character. {}", c.name, c.description);
    let _ = writeln!(prompt);
    let _ = writeln!(prompt, "Personality:");
    for (name, value) in c.personality.named() {
        let _ = writeln!(prompt, "- {name}: {} ({value}/100)", level(value));
    }
    let _ = writeln!(
        prompt,
        "Appearance: {} hair, wearing {}, with {}.",
        c.appearance.hair_color, c.appearance.outfit, c.appearance.accessory
    );
    let _ = writeln!(prompt);
    let _ = writeln!(prompt, "Scene: {}", request.scenario.setting);
    let _ = writeln!(
        prompt,
        "You are talking with {}. Relationship: {} (intimacy {}/100, trust {}/100).",
        request.user_name,
        r.kind.as_str().replace('_', " "),
        r.intimacy_level,
        r.trust_level
    );
    let _ = writeln!(prompt);
    let _ = writeln!(
        prompt,
        "Stay in character. Reply in the language the user writes in, in one to three short sentences."
    );
    let emotions: Vec<&str> = Emotion::ALL.iter().map(|e| e.as_str()).collect();
    let _ = write!(
        prompt,
        "Respond with a JSON object: {{\"text\": string, \"emotion\": one of [{}], \"confidence\": number between 0 and 1}}.",
        emotions.join(", ")
    );
    prompt
}
