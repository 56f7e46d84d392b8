//! The bar description and its image.

use super::{GenerationError, Pipeline, Stage};
use crate::parse::{clean_value, Distillation};
use crate::prompts::{bar_image_prompt, bar_prompt};
use crate::registry::Bar;
use crate::services::{
    AspectRatio, ImageRequest, PromptKind, ServiceError, ServiceKind, TextRequest,
};

impl Pipeline<'_> {
    pub async fn generate_bar(&self, summaries: &Distillation) -> Result<Bar, GenerationError> {
        let request = TextRequest::new(PromptKind::Bar, bar_prompt(summaries))
            .with_tokens(self.config.min_tokens, self.config.max_tokens);
        let text = self
            .services
            .text(request)
            .await
            .map_err(GenerationError::service(Stage::Bar))?;
        let description = clean_value(&text);
        if description.is_empty() {
            return Err(GenerationError::Service {
                stage: Stage::Bar,
                source: ServiceError::Empty(ServiceKind::Text),
            });
        }

        let request = ImageRequest::new(bar_image_prompt(summaries, &description))
            .with_negative_prompt("people, text, watermark")
            .with_aspect_ratio(AspectRatio::Widescreen);
        let image = self
            .services
            .image(request)
            .await
            .map_err(GenerationError::service(Stage::Bar))?;

        tracing::info!(target: "pipeline", "Bar generated");
        Ok(Bar { description, image })
    }
}
