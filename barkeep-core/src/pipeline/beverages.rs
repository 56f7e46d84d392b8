//! Filling the drinks menu.

use super::{GenerationError, Pipeline, Stage};
use crate::parse::{parse_beverages, Distillation};
use crate::prompts::{beverage_image_prompt, beverages_prompt};
use crate::registry::{same_name, Beverage};
use crate::services::{AspectRatio, ImageRequest, PromptKind, TextRequest};

impl Pipeline<'_> {
    /// Accumulate beverages over as many text calls as it takes, then give
    /// each one an image.
    pub async fn generate_beverages(
        &self,
        summaries: &Distillation,
        bar: &str,
    ) -> Result<Vec<Beverage>, GenerationError> {
        let target = self.config.beverage_target;
        let mut accepted: Vec<Beverage> = Vec::with_capacity(target);
        let mut rounds = 0;

        while accepted.len() < target {
            if let Some(limit) = self.config.beverage_round_limit {
                if rounds >= limit {
                    return Err(GenerationError::InsufficientBeverages {
                        accepted: accepted.len(),
                        target,
                        rounds,
                    });
                }
            }
            rounds += 1;

            let request = TextRequest::new(
                PromptKind::Beverages,
                beverages_prompt(summaries, bar, &accepted),
            )
            .with_tokens(self.config.min_tokens, self.config.max_tokens);
            let text = self
                .services
                .text(request)
                .await
                .map_err(GenerationError::service(Stage::Beverages))?;

            let before = accepted.len();
            accept_beverages(&mut accepted, parse_beverages(&text), target);
            tracing::debug!(
                target: "pipeline",
                round = rounds,
                new = accepted.len() - before,
                total = accepted.len(),
                "Beverage round"
            );
        }

        let requests = accepted
            .iter()
            .map(|beverage| {
                ImageRequest::new(beverage_image_prompt(summaries, beverage))
                    .with_aspect_ratio(AspectRatio::Square)
                    .with_background_removed()
            })
            .collect();
        let images = self.generate_images(Stage::Beverages, requests).await?;
        for (beverage, image) in accepted.iter_mut().zip(images) {
            beverage.image = image;
        }

        tracing::info!(target: "pipeline", count = accepted.len(), rounds, "Beverages generated");
        Ok(accepted)
    }
}

/// Merge one round of parsed entries into `accepted`, stopping at `target`.
fn accept_beverages(
    accepted: &mut Vec<Beverage>,
    entries: Vec<Result<Beverage, crate::parse::Rejection>>,
    target: usize,
) {
    for entry in entries {
        if accepted.len() >= target {
            break;
        }
        match entry {
            Ok(beverage) => {
                if accepted
                    .iter()
                    .any(|b| same_name(&b.name, &beverage.name))
                {
                    tracing::debug!(target: "pipeline", name = %beverage.name, "Duplicate beverage rejected");
                } else {
                    accepted.push(beverage);
                }
            }
            Err(rejection) => {
                tracing::debug!(target: "pipeline", %rejection, "Beverage entry rejected");
            }
        }
    }
}
