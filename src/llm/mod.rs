pub mod gemini;

use async_trait::async_trait;
use serde::{ Serialize, Deserialize };
use std::error::Error as StdError;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use self::gemini::GeminiClient;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    Gemini,
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseProviderTypeError {
    message: String,
}

impl fmt::Display for ParseProviderTypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl StdError for ParseProviderTypeError {}

impl FromStr for ProviderType {
    type Err = ParseProviderTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "gemini" => Ok(ProviderType::Gemini),
            _ =>
                Err(ParseProviderTypeError {
                    message: format!("Invalid generation provider: '{}'", s),
                }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub provider: ProviderType,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct CompletionResponse {
    pub response: String,
}

/// The outbound generation call: prompt in, text out. Remote failures come
/// back as Err carrying the provider's error body verbatim.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    async fn complete(
        &self,
        prompt: &str
    ) -> Result<CompletionResponse, Box<dyn StdError + Send + Sync>>;
}

pub fn new_client(
    config: &GenerationConfig
) -> Result<Arc<dyn GenerationClient>, Box<dyn StdError + Send + Sync>> {
    let client: Arc<dyn GenerationClient> = match config.provider {
        ProviderType::Gemini => {
            let specific_client = GeminiClient::from_config(config)?;
            Arc::new(specific_client)
        }
    };
    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_type_parses_case_insensitively() {
        assert_eq!("Gemini".parse::<ProviderType>().unwrap(), ProviderType::Gemini);
        assert!("bard".parse::<ProviderType>().is_err());
    }
}
