use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::llm::CompletionClient;

/// Generative Language API client. Holds a shared `reqwest::Client`; base
/// URL and model name are injected (tests point at a fixture server).
pub struct GeminiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

// -- API wire types --

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Serialize, Deserialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f64,
}

#[derive(Deserialize)]
struct GenerateResponse {
    candidates: Option<Vec<Candidate>>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<Content>,
}

impl GeminiClient {
    pub fn new(http: reqwest::Client, base_url: String, api_key: String, model: String) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
        }
    }
}

#[async_trait]
impl CompletionClient for GeminiClient {
    async fn complete(&self, prompt: &str) -> Result<String, AppError> {
        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
            // Extraction wants determinism, not creativity
            generation_config: GenerationConfig { temperature: 0.0 },
        };

        let resp = self
            .http
            .post(format!(
                "{}/models/{}:generateContent",
                self.base_url, self.model
            ))
            .query(&[("key", self.api_key.as_str())])
            .json(&request)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(AppError::Model(format!(
                "completion request failed (HTTP {status}): {body}"
            )));
        }

        let decoded: GenerateResponse = resp.json().await?;
        let text = decoded
            .candidates
            .unwrap_or_default()
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .and_then(|c| c.parts.into_iter().next())
            .map(|p| p.text)
            .ok_or_else(|| AppError::Model("completion response carried no text".into()))?;

        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_text_extraction_shape() {
        let raw = r#"{
            "candidates": [
                {"content": {"parts": [{"text": "{\"transactions\": []}"}]}}
            ]
        }"#;
        let decoded: GenerateResponse = serde_json::from_str(raw).unwrap();
        let text = decoded
            .candidates
            .unwrap()
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .and_then(|c| c.parts.into_iter().next())
            .map(|p| p.text);
        assert_eq!(text.as_deref(), Some("{\"transactions\": []}"));
    }

    #[test]
    fn test_empty_candidates_decodes() {
        let decoded: GenerateResponse = serde_json::from_str("{}").unwrap();
        assert!(decoded.candidates.is_none());
    }
}
