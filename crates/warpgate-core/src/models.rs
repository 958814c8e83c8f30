//! Model alias table
//!
//! Clients address models by short aliases; the upstream expects fully
//! qualified `vendor/model` identifiers.

/// Short alias → upstream model identifier, sorted by alias
pub const MODEL_ALIASES: &[(&str, &str)] = &[
    ("claude-opus-4.5", "anthropic/claude-opus-4.5"),
    ("claude-sonnet-4.5", "anthropic/claude-sonnet-4.5"),
    ("gemini-3-pro-preview", "google/gemini-3-pro-preview"),
    ("gpt-5.2", "openai/gpt-5.2"),
];

/// `created` timestamp reported for every listed model
pub const MODEL_CREATED: i64 = 1_700_000_000;

/// Owner reported for every listed model
pub const MODEL_OWNER: &str = "chat-sdk";

/// Resolve an alias to its upstream identifier; unknown names pass through
pub fn resolve_model(name: &str) -> String {
    MODEL_ALIASES
        .iter()
        .find(|(alias, _)| *alias == name)
        .map(|(_, target)| (*target).to_string())
        .unwrap_or_else(|| name.to_string())
}

/// All aliases clients may request
pub fn model_aliases() -> impl Iterator<Item = &'static str> {
    MODEL_ALIASES.iter().map(|(alias, _)| *alias)
}
