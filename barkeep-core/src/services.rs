//! External generation services.
//!
//! The pipeline talks to three opaque services: text completion, image
//! synthesis and emotion classification. Each sits behind a trait so
//! sessions can run against [`genapi::Client`] in production and against
//! the mocks in [`crate::testing`] everywhere else.

use crate::director::Direction;
use crate::emotion::Emotion;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

pub use genapi::{AspectRatio, ImageRequest};

/// Which service a call went to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceKind {
    Text,
    Image,
    Emotion,
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ServiceKind::Text => "text generation",
            ServiceKind::Image => "image generation",
            ServiceKind::Emotion => "emotion classification",
        })
    }
}

/// A failed external call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    #[error("{0} service returned nothing")]
    Empty(ServiceKind),

    #[error("{service} service failed: {message}")]
    Transport { service: ServiceKind, message: String },
}

impl ServiceError {
    pub fn transport(service: ServiceKind, message: impl Into<String>) -> Self {
        Self::Transport {
            service,
            message: message.into(),
        }
    }

    pub fn service(&self) -> ServiceKind {
        match self {
            ServiceError::Empty(service) => *service,
            ServiceError::Transport { service, .. } => *service,
        }
    }
}

/// What a text request is for. Not sent to the back-end; used for logs
/// and by test doubles to answer each stage appropriately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptKind {
    Distillation,
    Bar,
    Beverages,
    Patron,
    DummyPatron,
    Narration(Direction),
}

impl fmt::Display for PromptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PromptKind::Distillation => f.write_str("distillation"),
            PromptKind::Bar => f.write_str("bar"),
            PromptKind::Beverages => f.write_str("beverages"),
            PromptKind::Patron => f.write_str("patron"),
            PromptKind::DummyPatron => f.write_str("dummy patron"),
            PromptKind::Narration(direction) => write!(f, "narration ({direction})"),
        }
    }
}

/// A text completion request.
#[derive(Debug, Clone)]
pub struct TextRequest {
    pub kind: PromptKind,
    pub prompt: String,
    pub max_tokens: usize,
    pub min_tokens: usize,
}

impl TextRequest {
    pub fn new(kind: PromptKind, prompt: impl Into<String>) -> Self {
        Self {
            kind,
            prompt: prompt.into(),
            max_tokens: 400,
            min_tokens: 0,
        }
    }

    pub fn with_tokens(mut self, min_tokens: usize, max_tokens: usize) -> Self {
        self.min_tokens = min_tokens;
        self.max_tokens = max_tokens.max(min_tokens);
        self
    }
}

/// One classifier label with its confidence.
#[derive(Debug, Clone, PartialEq)]
pub struct EmotionScore {
    pub label: String,
    pub confidence: f32,
}

impl EmotionScore {
    pub fn new(label: impl Into<String>, confidence: f32) -> Self {
        Self {
            label: label.into(),
            confidence,
        }
    }
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Complete `request.prompt`. May return an empty string.
    async fn generate(&self, request: TextRequest) -> Result<String, ServiceError>;
}

#[async_trait]
pub trait ImageGenerator: Send + Sync {
    /// Produce an image reference. An empty string means no image.
    async fn generate_image(&self, request: ImageRequest) -> Result<String, ServiceError>;
}

#[async_trait]
pub trait EmotionClassifier: Send + Sync {
    /// Score `text` against the classifier's (open) label vocabulary.
    async fn classify(&self, text: &str) -> Result<Vec<EmotionScore>, ServiceError>;
}

/// The three services a session needs.
#[derive(Clone)]
pub struct Services {
    pub text: Arc<dyn TextGenerator>,
    pub images: Arc<dyn ImageGenerator>,
    pub emotions: Arc<dyn EmotionClassifier>,
}

impl Services {
    pub fn new(
        text: Arc<dyn TextGenerator>,
        images: Arc<dyn ImageGenerator>,
        emotions: Arc<dyn EmotionClassifier>,
    ) -> Self {
        Self {
            text,
            images,
            emotions,
        }
    }

    /// Use one HTTP client for all three services.
    pub fn from_client(client: genapi::Client) -> Self {
        let client = Arc::new(client);
        Self {
            text: client.clone(),
            images: client.clone(),
            emotions: client,
        }
    }

    /// Build services from `GENAPI_API_KEY` / `GENAPI_BASE_URL`.
    pub fn from_env() -> Result<Self, genapi::Error> {
        Ok(Self::from_client(genapi::Client::from_env()?))
    }

    /// Generate text, treating a blank completion as a failure.
    pub async fn text(&self, request: TextRequest) -> Result<String, ServiceError> {
        let kind = request.kind;
        let text = self.text.generate(request).await?;
        let text = text.trim();
        if text.is_empty() {
            tracing::warn!(target: "services", %kind, "Text service returned nothing");
            return Err(ServiceError::Empty(ServiceKind::Text));
        }
        Ok(text.to_string())
    }

    /// Generate an image, treating an empty reference as a failure.
    pub async fn image(&self, request: ImageRequest) -> Result<String, ServiceError> {
        let image = self.images.generate_image(request).await?;
        if image.trim().is_empty() {
            tracing::warn!(target: "services", "Image service returned no image");
            return Err(ServiceError::Empty(ServiceKind::Image));
        }
        Ok(image)
    }

    /// Classify `text` and keep the strongest known emotion above `threshold`.
    pub async fn emotion_of(
        &self,
        text: &str,
        threshold: f32,
    ) -> Result<Option<Emotion>, ServiceError> {
        let scores = self.emotions.classify(text).await?;
        Ok(strongest_emotion(&scores, threshold))
    }
}

/// The highest-confidence label in the closed vocabulary, if its
/// confidence exceeds `threshold`. Unknown labels are ignored.
pub fn strongest_emotion(scores: &[EmotionScore], threshold: f32) -> Option<Emotion> {
    scores
        .iter()
        .filter_map(|score| Emotion::from_label(&score.label).map(|e| (e, score.confidence)))
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .filter(|(_, confidence)| *confidence > threshold)
        .map(|(emotion, _)| emotion)
}

// ============================================================================
// genapi bindings
// ============================================================================

fn client_error(service: ServiceKind, error: genapi::Error) -> ServiceError {
    ServiceError::transport(service, error.to_string())
}

#[async_trait]
impl TextGenerator for genapi::Client {
    async fn generate(&self, request: TextRequest) -> Result<String, ServiceError> {
        let completion = self
            .complete(
                genapi::CompletionRequest::new(request.prompt)
                    .with_max_tokens(request.max_tokens)
                    .with_min_tokens(request.min_tokens),
            )
            .await
            .map_err(|e| client_error(ServiceKind::Text, e))?;
        Ok(completion.text)
    }
}

#[async_trait]
impl ImageGenerator for genapi::Client {
    async fn generate_image(&self, request: ImageRequest) -> Result<String, ServiceError> {
        let image = genapi::Client::generate_image(self, request)
            .await
            .map_err(|e| client_error(ServiceKind::Image, e))?;
        Ok(image.url)
    }
}

#[async_trait]
impl EmotionClassifier for genapi::Client {
    async fn classify(&self, text: &str) -> Result<Vec<EmotionScore>, ServiceError> {
        let labels = genapi::Client::classify(self, text)
            .await
            .map_err(|e| client_error(ServiceKind::Emotion, e))?;
        Ok(labels
            .into_iter()
            .map(|l| EmotionScore::new(l.label, l.score))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strongest_emotion_respects_threshold() {
        let scores = vec![
            EmotionScore::new("joy", 0.62),
            EmotionScore::new("amusement", 0.30),
        ];
        assert_eq!(strongest_emotion(&scores, 0.5), Some(Emotion::Joy));

        let weak = vec![EmotionScore::new("joy", 0.5)];
        assert_eq!(strongest_emotion(&weak, 0.5), None);
    }

    #[test]
    fn test_strongest_emotion_ignores_unknown_labels() {
        let scores = vec![
            EmotionScore::new("LABEL_7", 0.95),
            EmotionScore::new("sadness", 0.55),
        ];
        assert_eq!(strongest_emotion(&scores, 0.5), Some(Emotion::Sadness));
        assert_eq!(strongest_emotion(&[], 0.5), None);
    }

    #[test]
    fn test_text_request_tokens() {
        let request = TextRequest::new(PromptKind::Bar, "Describe it").with_tokens(100, 50);
        assert_eq!(request.min_tokens, 100);
        assert_eq!(request.max_tokens, 100);
    }

    #[test]
    fn test_service_error_display() {
        let err = ServiceError::Empty(ServiceKind::Image);
        assert_eq!(err.to_string(), "image generation service returned nothing");
        assert_eq!(err.service(), ServiceKind::Image);
    }
}
