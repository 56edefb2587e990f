use std::env;

use async_trait::async_trait;
use recast_config::{DEFAULT_ENDPOINT, DEFAULT_MODEL, InferenceConfig, InferenceProviderKind};
use serde_json::{Value, json};
use thiserror::Error;

mod conventional;
mod payload;
mod service;

pub use conventional::{
    CONVENTIONAL_TYPES, MessageWarning, fallback_message, has_conventional_prefix, infer_type,
    normalize_message, validate_message,
};
pub use payload::GroupPayload;
pub use service::{GeneratedMessage, MessageService, RetryPolicy};

const SYSTEM_PROMPT: &str = "You write concise, single-line conventional commit messages.";

#[derive(Debug, Error)]
pub enum InferError {
    #[error("missing API key in {0}")]
    MissingApiKey(String),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("response decoding failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid model response: {0}")]
    InvalidResponse(String),
}

#[async_trait]
pub trait MessageGenerator: Send + Sync {
    async fn generate(&self, payload: &GroupPayload) -> Result<String, InferError>;
}

/// Offline generator: answers with the keyword fallback for the payload.
#[derive(Debug, Default, Clone, Copy)]
pub struct MockGenerator;

#[async_trait]
impl MessageGenerator for MockGenerator {
    async fn generate(&self, payload: &GroupPayload) -> Result<String, InferError> {
        Ok(fallback_message(&payload.keyword_text()))
    }
}

/// Chat-completions client for OpenAI-compatible endpoints.
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleGenerator {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    prompt_template: String,
}

impl OpenAiCompatibleGenerator {
    pub fn from_config(config: &InferenceConfig) -> Result<Self, InferError> {
        let api_key = read_env_non_empty(&config.api_key_env)
            .ok_or_else(|| InferError::MissingApiKey(config.api_key_env.clone()))?;
        Ok(Self::new(api_key, config))
    }

    pub fn new(api_key: String, config: &InferenceConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            endpoint: config
                .endpoint
                .clone()
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_owned()),
            model: config
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_MODEL.to_owned()),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            prompt_template: config.prompt_template().to_owned(),
        }
    }

    fn endpoint_url(&self) -> String {
        format!("{}/chat/completions", self.endpoint.trim_end_matches('/'))
    }
}

#[async_trait]
impl MessageGenerator for OpenAiCompatibleGenerator {
    async fn generate(&self, payload: &GroupPayload) -> Result<String, InferError> {
        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": payload.render_prompt(&self.prompt_template) }
            ],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });

        let response_value: Value = self
            .client
            .post(self.endpoint_url())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        extract_chat_content(&response_value).map(str::to_owned)
    }
}

pub struct LoadedGenerator {
    pub generator: Box<dyn MessageGenerator>,
    pub provider_name: String,
    pub model_name: String,
}

pub fn load_generator(config: &InferenceConfig) -> Result<LoadedGenerator, InferError> {
    let mock = || LoadedGenerator {
        generator: Box::new(MockGenerator),
        provider_name: InferenceProviderKind::Mock.as_str().to_owned(),
        model_name: "mock".to_owned(),
    };

    match config.provider {
        InferenceProviderKind::Auto => match read_env_non_empty(&config.api_key_env) {
            Some(api_key) => Ok(remote(OpenAiCompatibleGenerator::new(api_key, config))),
            None => Ok(mock()),
        },
        InferenceProviderKind::Mock => Ok(mock()),
        InferenceProviderKind::OpenaiCompatible => {
            Ok(remote(OpenAiCompatibleGenerator::from_config(config)?))
        }
    }
}

fn remote(generator: OpenAiCompatibleGenerator) -> LoadedGenerator {
    LoadedGenerator {
        model_name: generator.model.clone(),
        generator: Box::new(generator),
        provider_name: InferenceProviderKind::OpenaiCompatible.as_str().to_owned(),
    }
}

fn extract_chat_content(response: &Value) -> Result<&str, InferError> {
    response
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .ok_or_else(|| InferError::InvalidResponse("missing choices[0].message.content".to_owned()))
}

fn read_env_non_empty(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}
