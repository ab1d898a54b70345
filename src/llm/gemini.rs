use async_trait::async_trait;
use log::debug;
use serde::{ Deserialize, Serialize };
use std::error::Error as StdError;
use super::{ CompletionResponse, GenerationClient, GenerationConfig };

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-2.0-flash";
const EMPTY_RESPONSE_TEXT: &str = "No response from the model.";

#[derive(Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
}

#[derive(Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(api_key: String, model: Option<String>, base_url: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        }
    }

    pub fn from_config(config: &GenerationConfig) -> Result<Self, Box<dyn StdError + Send + Sync>> {
        let api_key = config.api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| "Gemini API key is required for GeminiClient".to_string())?;
        Ok(Self::new(api_key, config.model.clone(), config.base_url.clone()))
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url.trim_end_matches('/'),
            self.model,
            self.api_key
        )
    }

    fn extract_text(response: &GenerateResponse) -> Option<String> {
        response.candidates
            .first()
            .and_then(|candidate| candidate.content.parts.first())
            .map(|part| part.text.clone())
    }
}

#[async_trait]
impl GenerationClient for GeminiClient {
    async fn complete(
        &self,
        prompt: &str
    ) -> Result<CompletionResponse, Box<dyn StdError + Send + Sync>> {
        debug!("GeminiClient::complete() → model={}", self.model);

        let payload = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
        };

        let response = self.http.post(self.endpoint()).json(&payload).send().await?;

        if !response.status().is_success() {
            // The provider's error body goes back to the caller verbatim.
            let status = response.status();
            let body = response.text().await.unwrap_or_else(|_| status.to_string());
            return Err(body.into());
        }

        let parsed: GenerateResponse = match response.json().await {
            Ok(parsed) => parsed,
            Err(_) => {
                return Ok(CompletionResponse {
                    response: EMPTY_RESPONSE_TEXT.to_string(),
                });
            }
        };

        Ok(CompletionResponse {
            response: Self::extract_text(&parsed).unwrap_or_else(||
                EMPTY_RESPONSE_TEXT.to_string()
            ),
        })
    }
}
