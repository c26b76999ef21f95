//! Inference Providers
//!
//! Concrete backends behind the [`Provider`] capability:
//!
//! | Name | Transport | Available when |
//! |---|---|---|
//! | `ollama` | local HTTP | `/api/tags` answers |
//! | `gemini` | Google Generative Language API | `GOOGLE_API_KEY` set |
//! | `openrouter` | OpenAI-compatible chat completions | `OPENROUTER_API_KEY` set |
//! | `huggingface` | Inference API | `HUGGINGFACE_API_KEY` set |
//! | `anthropic` | Messages API | `ANTHROPIC_API_KEY` set |

mod anthropic;
mod gemini;
mod http;
mod huggingface;
mod json;
mod ollama;
mod openrouter;
mod traits;

#[cfg(test)]
pub(crate) mod test_server;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

pub use anthropic::{AnthropicProvider, DEFAULT_ANTHROPIC_MODEL};
pub use gemini::{GeminiProvider, DEFAULT_GEMINI_MODEL};
pub use huggingface::{HuggingFaceProvider, DEFAULT_HUGGINGFACE_MODEL};
pub use json::extract_json;
pub use ollama::{OllamaProvider, DEFAULT_OLLAMA_MODEL, DEFAULT_OLLAMA_URL};
pub use openrouter::{OpenRouterProvider, DEFAULT_OPENROUTER_MODEL};
pub use traits::{
    GenerationParams, Provider, ProviderError, ProviderErrorKind, DEFAULT_MAX_TOKENS,
    DEFAULT_TEMPERATURE,
};

/// The built-in providers
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    /// Local Ollama server
    Ollama,
    /// Google Gemini
    Gemini,
    /// OpenRouter
    OpenRouter,
    /// HuggingFace Inference API
    HuggingFace,
    /// Anthropic
    Anthropic,
}

impl ProviderKind {
    /// Local-first order
    pub const ALL: [ProviderKind; 5] = [
        Self::Ollama,
        Self::Gemini,
        Self::OpenRouter,
        Self::HuggingFace,
        Self::Anthropic,
    ];

    /// Routing name
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Ollama => "ollama",
            Self::Gemini => "gemini",
            Self::OpenRouter => "openrouter",
            Self::HuggingFace => "huggingface",
            Self::Anthropic => "anthropic",
        }
    }

    /// Model used when none is configured
    #[must_use]
    pub fn default_model(self) -> &'static str {
        match self {
            Self::Ollama => DEFAULT_OLLAMA_MODEL,
            Self::Gemini => DEFAULT_GEMINI_MODEL,
            Self::OpenRouter => DEFAULT_OPENROUTER_MODEL,
            Self::HuggingFace => DEFAULT_HUGGINGFACE_MODEL,
            Self::Anthropic => DEFAULT_ANTHROPIC_MODEL,
        }
    }

    /// Environment variable holding the API key, if the provider needs one
    #[must_use]
    pub fn api_key_var(self) -> Option<&'static str> {
        match self {
            Self::Ollama => None,
            Self::Gemini => Some("GOOGLE_API_KEY"),
            Self::OpenRouter => Some("OPENROUTER_API_KEY"),
            Self::HuggingFace => Some("HUGGINGFACE_API_KEY"),
            Self::Anthropic => Some("ANTHROPIC_API_KEY"),
        }
    }

    /// Default order: local first unless `prefer_local` is off, then it goes last
    #[must_use]
    pub fn default_order(prefer_local: bool) -> Vec<ProviderKind> {
        let mut order = Self::ALL.to_vec();
        if !prefer_local {
            order.rotate_left(1);
        }
        order
    }

    /// Instantiate the provider
    ///
    /// `base_url` overrides the endpoint root (the server address for Ollama).
    #[must_use]
    pub fn build(
        self,
        model: &str,
        api_key: Option<String>,
        base_url: Option<&str>,
        params: GenerationParams,
    ) -> Arc<dyn Provider> {
        match self {
            Self::Ollama => Arc::new(
                OllamaProvider::new(base_url.unwrap_or(DEFAULT_OLLAMA_URL), model)
                    .with_params(params),
            ),
            Self::Gemini => {
                let provider = GeminiProvider::new(api_key, model).with_params(params);
                Arc::new(match base_url {
                    Some(url) => provider.with_base_url(url),
                    None => provider,
                })
            }
            Self::OpenRouter => {
                let provider = OpenRouterProvider::new(api_key, model).with_params(params);
                Arc::new(match base_url {
                    Some(url) => provider.with_base_url(url),
                    None => provider,
                })
            }
            Self::HuggingFace => {
                let provider = HuggingFaceProvider::new(api_key, model).with_params(params);
                Arc::new(match base_url {
                    Some(url) => provider.with_base_url(url),
                    None => provider,
                })
            }
            Self::Anthropic => {
                let provider = AnthropicProvider::new(api_key, model).with_params(params);
                Arc::new(match base_url {
                    Some(url) => provider.with_base_url(url),
                    None => provider,
                })
            }
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Unknown provider name
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown provider {0:?} (expected ollama, gemini, openrouter, huggingface or anthropic)")]
pub struct UnknownProvider(pub String);

impl FromStr for ProviderKind {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == wanted)
            .ok_or_else(|| UnknownProvider(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_order() {
        let local_first: Vec<_> = ProviderKind::default_order(true)
            .into_iter()
            .map(ProviderKind::name)
            .collect();
        assert_eq!(
            local_first,
            vec!["ollama", "gemini", "openrouter", "huggingface", "anthropic"]
        );

        let local_last = ProviderKind::default_order(false);
        assert_eq!(local_last.first(), Some(&ProviderKind::Gemini));
        assert_eq!(local_last.last(), Some(&ProviderKind::Ollama));
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("OpenRouter".parse::<ProviderKind>(), Ok(ProviderKind::OpenRouter));
        assert!("gpt".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn test_build_uses_routing_name() {
        for kind in ProviderKind::ALL {
            let provider = kind.build(kind.default_model(), None, None, GenerationParams::default());
            assert_eq!(provider.name(), kind.name());
        }
    }
}
