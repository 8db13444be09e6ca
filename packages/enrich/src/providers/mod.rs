//! Generative text provider abstraction and implementations.
//!
//! Supports Google Gemini (with web search grounding) and any
//! `OpenAI`-compatible chat completions endpoint, including self-hosted
//! servers (Ollama, vLLM, llama.cpp, LM Studio) via `AI_BASE_URL`.

pub mod gemini;
pub mod openai;

use std::sync::Arc;

use strum_macros::{Display, EnumString};

use crate::EnrichError;

/// Default Gemini model.
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-pro";

/// Default `OpenAI` model.
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o";

/// Trait for text generation providers.
#[async_trait::async_trait]
pub trait TextGenerator: Send + Sync {
    /// Sends a single-turn prompt and returns the generated text.
    ///
    /// # Errors
    ///
    /// Returns [`EnrichError`] if the request fails or the provider rejects
    /// it.
    async fn generate(&self, prompt: &str) -> Result<String, EnrichError>;

    /// Provider and model, for logging.
    fn name(&self) -> String;
}

/// Which generative provider to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum AiProvider {
    /// Google Gemini `generateContent`.
    #[strum(to_string = "gemini", serialize = "google")]
    Gemini,
    /// `OpenAI`-compatible chat completions.
    #[strum(to_string = "openai", serialize = "gpt")]
    OpenAi,
}

/// Settings for [`create_provider`].
#[derive(Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    /// Selected provider.
    pub provider: AiProvider,
    /// Model override. Each provider has a default.
    pub model: Option<String>,
    /// API key. Optional only for self-hosted `OpenAI`-compatible servers.
    pub api_key: Option<String>,
    /// Base URL override.
    pub base_url: Option<String>,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// Creates a text generator from `config`.
///
/// Gemini always needs a key. An `OpenAI` provider needs one unless a
/// custom `base_url` points at a self-hosted server.
///
/// # Errors
///
/// Returns [`EnrichError::MissingCredential`] if the required key is
/// absent, or [`EnrichError::Http`] if the HTTP client cannot be built.
pub fn create_provider(config: &ProviderConfig) -> Result<Arc<dyn TextGenerator>, EnrichError> {
    let api_key = config.api_key.clone().filter(|k| !k.trim().is_empty());

    match config.provider {
        AiProvider::Gemini => {
            let api_key = api_key.ok_or_else(|| EnrichError::MissingCredential {
                name: "GOOGLE_API_KEY".to_string(),
            })?;
            let model = config
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string());
            let base_url = config
                .base_url
                .clone()
                .unwrap_or_else(|| gemini::DEFAULT_BASE_URL.to_string());
            log::info!("Using Gemini provider (model: {model})");
            Ok(Arc::new(gemini::GeminiProvider::new(api_key, model, base_url)?))
        }
        AiProvider::OpenAi => {
            if api_key.is_none() && config.base_url.is_none() {
                return Err(EnrichError::MissingCredential {
                    name: "OPENAI_API_KEY".to_string(),
                });
            }
            let model = config
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string());
            let provider = match &config.base_url {
                Some(url) => {
                    log::info!("Using OpenAI-compatible provider at {url} (model: {model})");
                    openai::OpenAiProvider::with_base_url(
                        api_key.unwrap_or_default(),
                        model,
                        url.clone(),
                    )?
                }
                None => {
                    log::info!("Using OpenAI provider (model: {model})");
                    openai::OpenAiProvider::new(api_key.unwrap_or_default(), model)?
                }
            };
            Ok(Arc::new(provider))
        }
    }
}

/// Builds the HTTP client shared by the providers.
///
/// Grounded generation over a full chunk can take minutes.
fn http_client() -> Result<reqwest::Client, EnrichError> {
    Ok(reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(300))
        .build()?)
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    fn config(provider: AiProvider) -> ProviderConfig {
        ProviderConfig {
            provider,
            model: None,
            api_key: None,
            base_url: None,
        }
    }

    #[test]
    fn parses_provider_aliases() {
        assert_eq!(AiProvider::from_str("Gemini").unwrap(), AiProvider::Gemini);
        assert_eq!(AiProvider::from_str("google").unwrap(), AiProvider::Gemini);
        assert_eq!(AiProvider::from_str("OPENAI").unwrap(), AiProvider::OpenAi);
        assert!(AiProvider::from_str("claude").is_err());
    }

    #[test]
    fn gemini_requires_key() {
        assert!(matches!(
            create_provider(&config(AiProvider::Gemini)),
            Err(EnrichError::MissingCredential { name }) if name == "GOOGLE_API_KEY"
        ));
    }

    #[test]
    fn blank_key_counts_as_missing() {
        let mut config = config(AiProvider::OpenAi);
        config.api_key = Some("  ".to_string());
        assert!(matches!(
            create_provider(&config),
            Err(EnrichError::MissingCredential { .. })
        ));
    }

    #[test]
    fn self_hosted_openai_needs_no_key() {
        let mut config = config(AiProvider::OpenAi);
        config.base_url = Some("http://localhost:11434/v1".to_string());
        let provider = create_provider(&config).unwrap();
        assert!(provider.name().contains("gpt-4o"));
    }

    #[test]
    fn debug_redacts_key() {
        let mut config = config(AiProvider::Gemini);
        config.api_key = Some("secret".to_string());
        assert!(!format!("{config:?}").contains("secret"));
    }
}
