//! Distilling seed characters into setting summaries.

use super::{GenerationError, Pipeline, Stage};
use crate::parse::{parse_distillation, Distillation};
use crate::prompts::distillation_prompt;
use crate::services::{PromptKind, TextRequest};

impl Pipeline<'_> {
    /// Ask for the four summaries until setting, theme and art are all
    /// present. A source summary is nice to have but not required.
    pub async fn distill(&self, characters: &[String]) -> Result<Distillation, GenerationError> {
        let attempts = self.config.distillation_attempts.max(1);
        let prompt = distillation_prompt(characters);

        for attempt in 1..=attempts {
            let request = TextRequest::new(PromptKind::Distillation, prompt.clone())
                .with_tokens(self.config.min_tokens, self.config.max_tokens);
            let text = self
                .services
                .text(request)
                .await
                .map_err(GenerationError::service(Stage::Distillation))?;

            let distillation = parse_distillation(&text);
            if distillation.is_complete() {
                tracing::debug!(target: "pipeline", attempt, "Distillation accepted");
                return Ok(distillation);
            }
            tracing::warn!(
                target: "pipeline",
                attempt,
                attempts,
                "Distillation missing setting, theme or art; retrying"
            );
        }

        Err(GenerationError::DistillationFailed { attempts })
    }
}
