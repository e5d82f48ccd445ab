//! Registry of supported model backends.
//!
//! A model identifier is only accepted if a registered backend claims it.
//! Backends are recognised by id prefix, mirroring how the solver's engine
//! factory dispatches on the model string.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Supported model backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelBackend {
    OpenAi,
    Anthropic,
    Gemini,
    DeepSeek,
    Grok,
    Together,
    Vllm,
    Ollama,
    LiteLlm,
}

impl ModelBackend {
    /// All registered backends, in lookup order.
    pub const ALL: [ModelBackend; 9] = [
        ModelBackend::OpenAi,
        ModelBackend::Anthropic,
        ModelBackend::Gemini,
        ModelBackend::DeepSeek,
        ModelBackend::Grok,
        ModelBackend::Together,
        ModelBackend::Vllm,
        ModelBackend::Ollama,
        ModelBackend::LiteLlm,
    ];

    /// Returns the display name for this backend.
    pub fn display_name(&self) -> &'static str {
        match self {
            ModelBackend::OpenAi => "OpenAI",
            ModelBackend::Anthropic => "Anthropic",
            ModelBackend::Gemini => "Google Gemini",
            ModelBackend::DeepSeek => "DeepSeek",
            ModelBackend::Grok => "xAI Grok",
            ModelBackend::Together => "Together AI",
            ModelBackend::Vllm => "vLLM",
            ModelBackend::Ollama => "Ollama",
            ModelBackend::LiteLlm => "LiteLLM",
        }
    }

    /// Model id prefixes claimed by this backend.
    pub fn prefixes(&self) -> &'static [&'static str] {
        match self {
            ModelBackend::OpenAi => &["gpt-", "o1", "o3", "o4"],
            ModelBackend::Anthropic => &["claude-"],
            ModelBackend::Gemini => &["gemini-"],
            ModelBackend::DeepSeek => &["deepseek-"],
            ModelBackend::Grok => &["grok"],
            ModelBackend::Together => &["together-"],
            ModelBackend::Vllm => &["vllm-"],
            ModelBackend::Ollama => &["ollama-"],
            ModelBackend::LiteLlm => &["litellm-"],
        }
    }

    /// Environment variable holding the API key the solver expects, if any.
    ///
    /// Local backends do not need a key.
    pub fn api_key_env(&self) -> Option<&'static str> {
        match self {
            ModelBackend::OpenAi => Some("OPENAI_API_KEY"),
            ModelBackend::Anthropic => Some("ANTHROPIC_API_KEY"),
            ModelBackend::Gemini => Some("GOOGLE_API_KEY"),
            ModelBackend::DeepSeek => Some("DEEPSEEK_API_KEY"),
            ModelBackend::Grok => Some("XAI_API_KEY"),
            ModelBackend::Together => Some("TOGETHER_API_KEY"),
            ModelBackend::LiteLlm => Some("LITELLM_API_KEY"),
            ModelBackend::Vllm | ModelBackend::Ollama => None,
        }
    }

    fn claims(&self, model: &str) -> bool {
        self.prefixes().iter().any(|p| model.starts_with(p))
    }

    /// Resolves the backend for a model identifier.
    pub fn resolve(model: &str) -> Result<Self, ConfigError> {
        let model = model.trim();
        if model.is_empty() {
            return Err(ConfigError::MissingOption("model"));
        }
        Self::ALL
            .iter()
            .copied()
            .find(|backend| backend.claims(model))
            .ok_or_else(|| ConfigError::UnknownModel {
                model: model.to_string(),
                supported: supported_prefixes(),
            })
    }
}

impl std::fmt::Display for ModelBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

fn supported_prefixes() -> String {
    ModelBackend::ALL
        .iter()
        .flat_map(|b| b.prefixes().iter().copied())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_known_models() {
        assert_eq!(ModelBackend::resolve("gpt-4o-mini").unwrap(), ModelBackend::OpenAi);
        assert_eq!(ModelBackend::resolve("o3-mini").unwrap(), ModelBackend::OpenAi);
        assert_eq!(
            ModelBackend::resolve("claude-3-5-sonnet-20241022").unwrap(),
            ModelBackend::Anthropic
        );
        assert_eq!(
            ModelBackend::resolve("vllm-Qwen/Qwen2.5-VL-3B-Instruct").unwrap(),
            ModelBackend::Vllm
        );
        assert_eq!(ModelBackend::resolve("grok-2").unwrap(), ModelBackend::Grok);
    }

    #[test]
    fn test_resolve_unknown_model() {
        let err = ModelBackend::resolve("m1").unwrap_err();
        match err {
            ConfigError::UnknownModel { model, supported } => {
                assert_eq!(model, "m1");
                assert!(supported.contains("claude-"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_resolve_empty_model() {
        assert!(matches!(
            ModelBackend::resolve("  "),
            Err(ConfigError::MissingOption("model"))
        ));
    }

    #[test]
    fn test_local_backends_need_no_key() {
        assert!(ModelBackend::Ollama.api_key_env().is_none());
        assert_eq!(ModelBackend::Anthropic.api_key_env(), Some("ANTHROPIC_API_KEY"));
    }
}
