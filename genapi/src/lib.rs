//! Minimal client for the generation services behind a bar night.
//!
//! This crate provides a focused JSON-over-HTTP binding with:
//! - Text completion bounded by minimum and maximum token counts
//! - Image synthesis, both text-to-image and image-to-image
//! - Emotion classification of short passages

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:5000/v1";
const DEFAULT_TEXT_MODEL: &str = "default";

/// Errors that can occur when using the generation client.
#[derive(Debug, Error)]
pub enum Error {
    #[error("API key not configured")]
    NoApiKey,

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Generation service client.
#[derive(Clone)]
pub struct Client {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl Client {
    /// Create a new client for the service at `base_url`.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: build_http_client(Duration::from_secs(120)),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: DEFAULT_TEXT_MODEL.to_string(),
        }
    }

    /// Create a client from `GENAPI_API_KEY` and (optionally) `GENAPI_BASE_URL`.
    pub fn from_env() -> Result<Self, Error> {
        let api_key = std::env::var("GENAPI_API_KEY").map_err(|_| Error::NoApiKey)?;
        let base_url =
            std::env::var("GENAPI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        Ok(Self::new(base_url, api_key))
    }

    /// Set the text model used for completions.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Replace the request timeout. Image synthesis can be slow.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = build_http_client(timeout);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Run a text completion and return the generated text.
    pub async fn complete(&self, request: CompletionRequest) -> Result<Completion, Error> {
        let body = ApiCompletionRequest {
            model: request.model.as_deref().unwrap_or(&self.model),
            prompt: &request.prompt,
            max_tokens: request.max_tokens,
            min_tokens: request.min_tokens,
            temperature: request.temperature,
        };
        let response: ApiCompletionResponse = self.post("text/completions", &body).await?;
        Ok(Completion {
            text: response.result.unwrap_or_default(),
        })
    }

    /// Generate an image and return its reference.
    ///
    /// A service that accepts the request but produces nothing yields an
    /// empty `url`; callers decide whether that is fatal.
    pub async fn generate_image(&self, request: ImageRequest) -> Result<GeneratedImage, Error> {
        let body = ApiImageRequest::from(&request);
        let response: ApiImageResponse = self.post("images/generations", &body).await?;
        Ok(GeneratedImage {
            url: response.url.unwrap_or_default(),
        })
    }

    /// Classify the emotional tone of `text`, strongest label first.
    pub async fn classify(&self, text: &str) -> Result<Vec<EmotionLabel>, Error> {
        let body = ApiClassifyRequest { text };
        let response: Vec<Vec<EmotionLabel>> = self.post("classify/emotion", &body).await?;
        let mut labels: Vec<EmotionLabel> = response.into_iter().flatten().collect();
        labels.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(labels)
    }

    async fn post<B, R>(&self, path: &str, body: &B) -> Result<R, Error>
    where
        B: Serialize + ?Sized,
        R: for<'de> Deserialize<'de>,
    {
        let response = self
            .client
            .post(format!("{}/{path}", self.base_url))
            .headers(self.build_headers()?)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(Error::Api { status, message });
        }

        response
            .json()
            .await
            .map_err(|e| Error::Parse(e.to_string()))
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
}

fn build_http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(30))
        .build()
        .unwrap_or_default()
}

// ============================================================================
// Public types
// ============================================================================

/// A text completion request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: Option<String>,
    pub prompt: String,
    pub max_tokens: usize,
    pub min_tokens: usize,
    pub temperature: Option<f32>,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            model: None,
            prompt: prompt.into(),
            max_tokens: 400,
            min_tokens: 0,
            temperature: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_min_tokens(mut self, min_tokens: usize) -> Self {
        self.min_tokens = min_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// Generated text.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
}

/// Shape of a generated image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AspectRatio {
    #[serde(rename = "1:1")]
    Square,
    #[serde(rename = "2:3")]
    Portrait,
    #[serde(rename = "16:9")]
    Widescreen,
}

/// An image generation request.
#[derive(Debug, Clone)]
pub struct ImageRequest {
    pub prompt: String,
    pub negative_prompt: String,
    pub aspect_ratio: AspectRatio,
    pub remove_background: bool,
    pub seed: Option<u64>,
    /// Source image for image-to-image generation.
    pub init_image: Option<String>,
    /// How far image-to-image output may drift from `init_image` (0.0 - 1.0).
    pub strength: Option<f32>,
}

impl ImageRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            negative_prompt: String::new(),
            aspect_ratio: AspectRatio::Square,
            remove_background: false,
            seed: None,
            init_image: None,
            strength: None,
        }
    }

    pub fn with_negative_prompt(mut self, negative: impl Into<String>) -> Self {
        self.negative_prompt = negative.into();
        self
    }

    pub fn with_aspect_ratio(mut self, aspect_ratio: AspectRatio) -> Self {
        self.aspect_ratio = aspect_ratio;
        self
    }

    pub fn with_background_removed(mut self) -> Self {
        self.remove_background = true;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_init_image(mut self, image: impl Into<String>, strength: f32) -> Self {
        self.init_image = Some(image.into());
        self.strength = Some(strength.clamp(0.0, 1.0));
        self
    }
}

/// A generated image reference. Empty when the service produced nothing.
#[derive(Debug, Clone)]
pub struct GeneratedImage {
    pub url: String,
}

/// One scored label from the emotion classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionLabel {
    pub label: String,
    pub score: f32,
}

// ============================================================================
// Internal API types
// ============================================================================

#[derive(Debug, Serialize)]
struct ApiCompletionRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    max_tokens: usize,
    min_tokens: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct ApiCompletionResponse {
    #[serde(default)]
    result: Option<String>,
}

#[derive(Debug, Serialize)]
struct ApiImageRequest<'a> {
    prompt: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    negative_prompt: &'a str,
    aspect_ratio: AspectRatio,
    remove_background: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    strength: Option<f32>,
}

impl<'a> From<&'a ImageRequest> for ApiImageRequest<'a> {
    fn from(request: &'a ImageRequest) -> Self {
        Self {
            prompt: &request.prompt,
            negative_prompt: &request.negative_prompt,
            aspect_ratio: request.aspect_ratio,
            remove_background: request.remove_background,
            seed: request.seed,
            image: request.init_image.as_deref(),
            strength: request.strength,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiImageResponse {
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Serialize)]
struct ApiClassifyRequest<'a> {
    text: &'a str,
}
