//! Static model capability inference.
//!
//! OpenRouter exposes a models endpoint, but the engine only needs coarse
//! facts (context length, tool support, modalities), so a static table with
//! per-provider fallbacks keeps capability checks synchronous and cheap.

use trellis_core::llm::{Modality, ModelCapabilities};

struct Entry {
    id: &'static str,
    context_length: u32,
    supports_tools: bool,
    image_input: bool,
}

static KNOWN_MODELS: &[Entry] = &[
    Entry { id: "openai/gpt-4o", context_length: 128_000, supports_tools: true, image_input: true },
    Entry { id: "openai/gpt-4o-mini", context_length: 128_000, supports_tools: true, image_input: true },
    Entry { id: "openai/gpt-4.1", context_length: 1_047_576, supports_tools: true, image_input: true },
    Entry { id: "openai/gpt-4.1-mini", context_length: 1_047_576, supports_tools: true, image_input: true },
    Entry { id: "openai/o3-mini", context_length: 200_000, supports_tools: true, image_input: false },
    Entry { id: "anthropic/claude-3-opus", context_length: 200_000, supports_tools: true, image_input: true },
    Entry { id: "anthropic/claude-3.5-sonnet", context_length: 200_000, supports_tools: true, image_input: true },
    Entry { id: "anthropic/claude-3.5-haiku", context_length: 200_000, supports_tools: true, image_input: false },
    Entry { id: "google/gemini-1.5-pro", context_length: 2_000_000, supports_tools: true, image_input: true },
    Entry { id: "google/gemini-1.5-flash", context_length: 1_000_000, supports_tools: true, image_input: true },
    Entry { id: "google/gemini-2.0-flash-001", context_length: 1_000_000, supports_tools: true, image_input: true },
    Entry { id: "meta-llama/llama-3.1-70b-instruct", context_length: 131_072, supports_tools: true, image_input: false },
    Entry { id: "meta-llama/llama-3.1-8b-instruct", context_length: 131_072, supports_tools: false, image_input: false },
    Entry { id: "mistralai/mistral-large", context_length: 128_000, supports_tools: true, image_input: false },
    Entry { id: "deepseek/deepseek-chat", context_length: 64_000, supports_tools: true, image_input: false },
];

/// Infer capabilities for a provider-qualified model id.
pub fn infer_capabilities(model: &str) -> ModelCapabilities {
    if let Some(entry) = KNOWN_MODELS.iter().find(|e| e.id == model) {
        let mut modalities = vec![Modality::Text];
        if entry.image_input {
            modalities.push(Modality::Image);
        }
        return ModelCapabilities {
            input_modalities: modalities,
            context_length: entry.context_length,
            supports_tools: entry.supports_tools,
            supports_streaming: true,
        };
    }

    // Unknown model: assume the provider's common baseline.
    let supports_tools = ["openai/", "anthropic/", "google/", "mistralai/"]
        .iter()
        .any(|prefix| model.starts_with(prefix));
    ModelCapabilities {
        supports_tools,
        ..ModelCapabilities::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_model_uses_table() {
        let caps = infer_capabilities("anthropic/claude-3.5-sonnet");
        assert_eq!(caps.context_length, 200_000);
        assert!(caps.supports_tools);
        assert!(caps.supports_modality(Modality::Image));
    }

    #[test]
    fn unknown_model_falls_back_by_provider() {
        let caps = infer_capabilities("openai/gpt-99-turbo");
        assert!(caps.supports_tools);
        assert_eq!(caps.context_length, 128_000);

        let caps = infer_capabilities("somelab/tiny-model");
        assert!(!caps.supports_tools);
        assert!(caps.supports_modality(Modality::Text));
    }
}
