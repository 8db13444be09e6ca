//! `OpenAI` chat completions provider implementation.

use serde::{Deserialize, Serialize};

use super::TextGenerator;
use crate::EnrichError;

/// Default `OpenAI` API base URL.
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// `OpenAI` API provider.
///
/// Also works with any `OpenAI`-compatible API (Ollama, vLLM, llama.cpp,
/// LM Studio, etc.) by setting a custom base URL.
pub struct OpenAiProvider {
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAiProvider {
    /// Creates a new `OpenAI` provider using the default `OpenAI` API URL.
    ///
    /// # Errors
    ///
    /// Returns [`EnrichError::Http`] if the HTTP client cannot be built.
    pub fn new(api_key: String, model: String) -> Result<Self, EnrichError> {
        Self::with_base_url(api_key, model, DEFAULT_BASE_URL.to_string())
    }

    /// Creates a new provider with a custom base URL.
    ///
    /// The base URL should include the version path (e.g.,
    /// `http://localhost:11434/v1`). The `/chat/completions` path is
    /// appended automatically.
    ///
    /// # Errors
    ///
    /// Returns [`EnrichError::Http`] if the HTTP client cannot be built.
    pub fn with_base_url(
        api_key: String,
        model: String,
        base_url: String,
    ) -> Result<Self, EnrichError> {
        Ok(Self {
            api_key,
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
            client: super::http_client()?,
        })
    }
}

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAiMessage<'a>>,
}

#[derive(Serialize)]
struct OpenAiMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiResponseMessage,
}

#[derive(Deserialize)]
struct OpenAiResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiError {
    error: OpenAiErrorDetail,
}

#[derive(Deserialize)]
struct OpenAiErrorDetail {
    message: String,
}

#[async_trait::async_trait]
impl TextGenerator for OpenAiProvider {
    async fn generate(&self, prompt: &str) -> Result<String, EnrichError> {
        let request = OpenAiRequest {
            model: &self.model,
            messages: vec![OpenAiMessage {
                role: "user",
                content: prompt,
            }],
        };

        let url = format!("{}/chat/completions", self.base_url);
        let mut req = self
            .client
            .post(&url)
            .header("Content-Type", "application/json");

        // Local servers (Ollama, etc.) typically don't require auth
        if !self.api_key.is_empty() {
            req = req.header("Authorization", format!("Bearer {}", self.api_key));
        }

        let resp = req.json(&request).send().await?;

        let status = resp.status();
        let body = resp.text().await?;

        if !status.is_success() {
            let err: OpenAiError = serde_json::from_str(&body).unwrap_or_else(|_| OpenAiError {
                error: OpenAiErrorDetail {
                    message: format!("HTTP {status}: {body}"),
                },
            });
            return Err(EnrichError::Provider {
                message: err.error.message,
            });
        }

        parse_response(&body)
    }

    fn name(&self) -> String {
        format!("openai/{}", self.model)
    }
}

fn parse_response(body: &str) -> Result<String, EnrichError> {
    let response: OpenAiResponse = serde_json::from_str(body)?;

    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| EnrichError::Provider {
            message: "No choices in OpenAI response".to_string(),
        })?;

    match choice.message.content {
        Some(text) if !text.trim().is_empty() => Ok(text),
        _ => Err(EnrichError::EmptyResponse),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_first_choice() {
        let body = serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": "ID|店名" } }]
        })
        .to_string();
        assert_eq!(parse_response(&body).unwrap(), "ID|店名");
    }

    #[test]
    fn null_content_is_empty_response() {
        let body = serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": null } }]
        })
        .to_string();
        assert!(matches!(parse_response(&body), Err(EnrichError::EmptyResponse)));
    }

    #[test]
    fn malformed_body_is_json_error() {
        assert!(matches!(parse_response("not json"), Err(EnrichError::Json(_))));
    }

    #[test]
    fn trims_trailing_slash() {
        let provider = OpenAiProvider::with_base_url(
            String::new(),
            "llama3".to_string(),
            "http://localhost:11434/v1/".to_string(),
        )
        .unwrap();
        assert_eq!(provider.base_url, "http://localhost:11434/v1");
    }
}
