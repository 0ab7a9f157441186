//! Minimal client for OpenAI-compatible chat completion servers.
//!
//! This crate provides a focused client for the `/chat/completions` endpoint
//! exposed by vLLM and similar servers:
//! - Role-tagged chat messages with per-request generation parameters
//! - Optional JSON response mode for structured generation
//! - Model auto-detection from the server's `/models` listing
//!
//! The [`ChatProvider`] trait is the seam callers program against, so a
//! scripted implementation can stand in for the network during tests.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const DEFAULT_BASE_URL: &str = "http://localhost:8000/v1";

/// Errors that can occur when talking to the completion server.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// A text-generation backend.
///
/// Implemented by [`ChatClient`] for real servers; test code supplies its own
/// scripted implementation.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Send a completion request and return the generated text.
    async fn complete(&self, request: Request) -> Result<String, Error>;

    /// Provider name, for diagnostics.
    fn name(&self) -> &str;
}

/// Client for an OpenAI-compatible chat completions server.
#[derive(Clone)]
pub struct ChatClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: Option<String>,
}

impl ChatClient {
    /// Create a new client for the given server.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(60))
                .connect_timeout(std::time::Duration::from_secs(10))
                .build()
                .expect("Failed to build HTTP client"),
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: None,
        }
    }

    /// Create a client from `OPENAI_BASE_URL` / `OPENAI_API_KEY` / `MODEL_NAME`.
    ///
    /// Local inference servers commonly ignore the key, so a missing
    /// `OPENAI_API_KEY` falls back to the conventional `"EMPTY"` placeholder.
    pub fn from_env() -> Self {
        let base_url =
            std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let api_key = std::env::var("OPENAI_API_KEY").unwrap_or_else(|_| "EMPTY".to_string());
        let mut client = Self::new(base_url, api_key);
        if let Ok(model) = std::env::var("MODEL_NAME") {
            client.model = Some(model);
        }
        client
    }

    /// Set the default model for this client.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Ask the server which models it serves and adopt the first one.
    ///
    /// vLLM serves exactly one model, so "first" is unambiguous there.
    pub async fn detect_model(mut self) -> Result<Self, Error> {
        let response = self
            .client
            .get(format!("{}/models", self.base_url))
            .headers(self.build_headers()?)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api {
                status,
                message: body,
            });
        }

        let listing: ModelListing = response
            .json()
            .await
            .map_err(|e| Error::Parse(e.to_string()))?;

        let first = listing
            .data
            .into_iter()
            .next()
            .ok_or_else(|| Error::Config("server reported no models".to_string()))?;

        self.model = Some(first.id);
        Ok(self)
    }

    /// The configured model, if any.
    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    fn build_headers(&self) -> Result<HeaderMap, Error> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.api_key))
                .map_err(|e| Error::Config(format!("Invalid API key: {e}")))?,
        );
        Ok(headers)
    }

    fn build_api_request(&self, request: &Request) -> Result<ApiRequest, Error> {
        let model = request
            .model
            .clone()
            .or_else(|| self.model.clone())
            .ok_or_else(|| {
                Error::Config("no model configured; set MODEL_NAME or call detect_model".to_string())
            })?;

        Ok(ApiRequest {
            model,
            messages: request.messages.clone(),
            temperature: request.temperature,
            top_p: request.top_p,
            max_tokens: request.max_tokens,
            response_format: request.json_mode.then(|| ResponseFormat {
                r#type: "json_object".to_string(),
            }),
        })
    }
}

#[async_trait]
impl ChatProvider for ChatClient {
    async fn complete(&self, request: Request) -> Result<String, Error> {
        let api_request = self.build_api_request(&request)?;

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .headers(self.build_headers()?)
            .json(&api_request)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api {
                status,
                message: body,
            });
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| Error::Parse(e.to_string()))?;

        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::Parse("response contained no choices".to_string()))?;

        Ok(choice.message.content.unwrap_or_default())
    }

    fn name(&self) -> &str {
        "openai-compat"
    }
}

// ============================================================================
// Public types
// ============================================================================

/// A completion request.
#[derive(Debug, Clone)]
pub struct Request {
    pub model: Option<String>,
    pub messages: Vec<Message>,
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: usize,
    pub json_mode: bool,
}

impl Request {
    /// Create a new request with the given messages.
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            model: None,
            messages,
            temperature: 0.7,
            top_p: 0.9,
            max_tokens: 1024,
            json_mode: false,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = top_p;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Request a JSON object from the server instead of free text.
    pub fn with_json_mode(mut self, json_mode: bool) -> Self {
        self.json_mode = json_mode;
        self
    }
}

/// A message in the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Create an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// The role of a message sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

// ============================================================================
// Internal API types
// ============================================================================

#[derive(Debug, Serialize)]
struct ApiRequest {
    model: String,
    messages: Vec<Message>,
    temperature: f32,
    top_p: f32,
    max_tokens: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    r#type: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ApiChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelListing {
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}
