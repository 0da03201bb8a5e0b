//! Static model catalog and baked-in system prompts.
//!
//! Upstream does not expose a model discovery endpoint, so `GET /v1/models`
//! and `GET /api/tags` are backed by a small fixed table.

#[derive(Debug, Clone, Copy)]
pub struct ModelInfo {
    pub id: &'static str,
    pub family: &'static str,
    pub context_window: u32,
    pub reasoning: bool,
}

pub const MODEL_CATALOG: &[ModelInfo] = &[
    ModelInfo {
        id: "gpt-5",
        family: "gpt-5",
        context_window: 400_000,
        reasoning: true,
    },
    ModelInfo {
        id: "gpt-5-mini",
        family: "gpt-5",
        context_window: 400_000,
        reasoning: true,
    },
    ModelInfo {
        id: "gpt-4.1",
        family: "gpt-4.1",
        context_window: 128_000,
        reasoning: false,
    },
    ModelInfo {
        id: "codex-mini",
        family: "codex",
        context_window: 200_000,
        reasoning: true,
    },
];

pub fn model_info(id: &str) -> Option<&'static ModelInfo> {
    MODEL_CATALOG
        .iter()
        .find(|m| m.id == id)
        .or_else(|| MODEL_CATALOG.iter().filter(|m| id.starts_with(m.id)).max_by_key(|m| m.id.len()))
}

/// Baked-in system prompt chosen by model family, used when a request
/// carries no system/developer text at all.
pub fn default_system_prompt(model: &str) -> &'static str {
    match model_info(model).map(|m| m.family) {
        Some("codex") => "You are Codex, a coding assistant. Be direct and concise.",
        Some("gpt-5") => "You are a helpful assistant. Answer directly and verify claims before stating them.",
        _ => "You are a helpful assistant.",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_exact_and_prefixed_model_ids() {
        assert!(model_info("gpt-5").is_some());
        assert!(model_info("gpt-5-high").is_some());
        assert!(model_info("unknown-model-xyz").is_none());
    }
}
