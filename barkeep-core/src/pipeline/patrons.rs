//! Generating the bar's patrons.

use super::{GenerationError, Pipeline, Stage};
use crate::emotion::Emotion;
use crate::parse::{parse_patron, Distillation, PatronDraft, Rejection};
use crate::prompts::{dummy_patron_prompt, patron_image_prompt, patron_prompt, PatronSeed};
use crate::registry::{same_name, Patron};
use crate::services::{AspectRatio, ImageRequest, PromptKind, TextRequest};

/// Longest accepted patron name, in characters.
pub const MAX_PATRON_NAME_LEN: usize = 32;

/// Check a parsed patron against the player and the patrons accepted so far.
pub fn validate_patron(
    draft: PatronDraft,
    player: &str,
    accepted: &[Patron],
) -> Result<Patron, Rejection> {
    if draft.name.chars().count() > MAX_PATRON_NAME_LEN {
        return Err(Rejection::NameTooLong {
            name: draft.name,
            max: MAX_PATRON_NAME_LEN,
        });
    }

    let name = draft.name.to_lowercase();
    let player = player.trim().to_lowercase();
    if !player.is_empty() && (name.contains(&player) || player.contains(&name)) {
        return Err(Rejection::CollidesWithPlayer { name: draft.name });
    }

    if accepted.iter().any(|p| same_name(&p.name, &draft.name)) {
        return Err(Rejection::Duplicate { name: draft.name });
    }

    Ok(Patron::new(draft.name, draft.description, draft.personality))
}

impl Pipeline<'_> {
    /// Generate one patron per seed character plus the configured number of
    /// originals, each with a neutral portrait.
    pub async fn generate_patrons(
        &self,
        summaries: &Distillation,
        bar: &str,
        player: &str,
        characters: &[String],
    ) -> Result<Vec<Patron>, GenerationError> {
        let dummies = self.generate_dummies(summaries).await;

        let seeds = characters
            .iter()
            .map(|c| PatronSeed::Source(c.as_str()))
            .chain(std::iter::repeat(PatronSeed::Filler).take(self.config.filler_patrons));

        let mut accepted: Vec<Patron> = Vec::new();
        for seed in seeds {
            let patron = self
                .generate_patron(summaries, bar, player, seed, &accepted, &dummies)
                .await?;
            tracing::debug!(target: "pipeline", name = %patron.name, "Patron accepted");
            accepted.push(patron);
        }

        let requests = accepted
            .iter()
            .map(|patron| {
                ImageRequest::new(patron_image_prompt(summaries, patron))
                    .with_aspect_ratio(AspectRatio::Portrait)
                    .with_background_removed()
            })
            .collect();
        let images = self.generate_images(Stage::Patrons, requests).await?;
        for (patron, image) in accepted.iter_mut().zip(images) {
            patron.set_portrait(Emotion::Neutral, image);
        }

        tracing::info!(target: "pipeline", count = accepted.len(), "Patrons generated");
        Ok(accepted)
    }

    /// Names of throwaway characters. Failures only cost a warning.
    async fn generate_dummies(&self, summaries: &Distillation) -> Vec<String> {
        let mut names = Vec::new();
        for _ in 0..self.config.dummy_patrons {
            let request = TextRequest::new(PromptKind::DummyPatron, dummy_patron_prompt(summaries))
                .with_tokens(self.config.min_tokens, self.config.max_tokens);
            match self.services.text(request).await {
                Ok(text) => match parse_patron(&text) {
                    Ok(draft) => names.push(draft.name),
                    Err(rejection) => {
                        tracing::warn!(target: "pipeline", %rejection, "Skipping unusable dummy patron");
                    }
                },
                Err(error) => {
                    tracing::warn!(target: "pipeline", %error, "Skipping dummy patron");
                }
            }
        }
        names
    }

    async fn generate_patron(
        &self,
        summaries: &Distillation,
        bar: &str,
        player: &str,
        seed: PatronSeed<'_>,
        accepted: &[Patron],
        dummies: &[String],
    ) -> Result<Patron, GenerationError> {
        let attempts = self.config.patron_attempts.max(1);
        let avoid: Vec<String> = accepted
            .iter()
            .map(|p| p.name.clone())
            .chain(dummies.iter().cloned())
            .collect();
        let prompt = patron_prompt(summaries, bar, player, seed, &avoid);

        let mut last = Rejection::NothingParsed;
        for attempt in 1..=attempts {
            let request = TextRequest::new(PromptKind::Patron, prompt.clone())
                .with_tokens(self.config.min_tokens, self.config.max_tokens);
            let text = self
                .services
                .text(request)
                .await
                .map_err(GenerationError::service(Stage::Patrons))?;

            match parse_patron(&text).and_then(|draft| validate_patron(draft, player, accepted)) {
                Ok(patron) => return Ok(patron),
                Err(rejection) => {
                    tracing::debug!(target: "pipeline", attempt, %rejection, "Patron rejected");
                    last = rejection;
                }
            }
        }

        tracing::warn!(target: "pipeline", ?seed, attempts, "Patron retries exhausted");
        Err(GenerationError::RetryBudgetExhausted {
            stage: Stage::Patrons,
            attempts,
            last,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::GenerationConfig;
    use crate::services::{ServiceError, ServiceKind};
    use crate::testing::{MockText, TestHarness, TextStage};

    fn draft(name: &str) -> PatronDraft {
        PatronDraft {
            name: name.to_string(),
            description: "Weathered coat.".to_string(),
            personality: "Wry.".to_string(),
        }
    }

    fn summaries() -> Distillation {
        Distillation {
            source: "Sea shanties".to_string(),
            setting: "Harbor tavern".to_string(),
            theme: "Old debts".to_string(),
            art: "Ink wash".to_string(),
        }
    }

    #[test]
    fn test_player_name_collisions_are_rejected() {
        for name in ["Rosa", "rosalind", "ROSA MAE", "Ros"] {
            assert!(
                matches!(
                    validate_patron(draft(name), "Rosa", &[]),
                    Err(Rejection::CollidesWithPlayer { .. })
                ),
                "{name} should collide"
            );
        }
        assert!(validate_patron(draft("Marla"), "Rosa", &[]).is_ok());
    }

    #[test]
    fn test_long_and_duplicate_names_are_rejected() {
        let long = "Bartholomew Fitzgerald Worthington III";
        assert!(matches!(
            validate_patron(draft(long), "Rosa", &[]),
            Err(Rejection::NameTooLong { max: 32, .. })
        ));

        let accepted = vec![Patron::new("Marla", "", "")];
        assert!(matches!(
            validate_patron(draft("marla"), "Rosa", &accepted),
            Err(Rejection::Duplicate { .. })
        ));

        let accepted = vec![Patron::new("Élodie", "", "")];
        assert!(matches!(
            validate_patron(draft("ÉLODIE"), "Rosa", &accepted),
            Err(Rejection::Duplicate { .. })
        ));
    }

    #[tokio::test]
    async fn test_player_named_patron_is_retried() {
        let text = MockText::new();
        text.queue(
            TextStage::Patron,
            "Name: Rosa\nTraits: Red scarf.\nPersonality: Cheerful.",
        );
        let harness = TestHarness::new().with_text(text);
        let services = harness.services();
        let config = GenerationConfig::default().with_filler_patrons(0);

        let patrons = Pipeline::new(&services, &config)
            .generate_patrons(&summaries(), "The Lantern", "Rosa", &["Spike".to_string()])
            .await
            .unwrap();

        assert_eq!(patrons.len(), 1);
        assert_ne!(patrons[0].name, "Rosa");
        assert_eq!(harness.text.calls(TextStage::Patron), 2);
        assert!(!patrons[0].neutral_image().is_empty());
    }

    #[tokio::test]
    async fn test_retry_budget_exhausted() {
        let text = MockText::new();
        for _ in 0..3 {
            text.queue(TextStage::Patron, "Name: Rosa\nTraits: Tall.\nPersonality: Calm.");
        }
        let harness = TestHarness::new().with_text(text);
        let services = harness.services();
        let config = GenerationConfig::default();

        let err = Pipeline::new(&services, &config)
            .generate_patrons(&summaries(), "The Lantern", "Rosa", &["Spike".to_string()])
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            GenerationError::RetryBudgetExhausted {
                stage: Stage::Patrons,
                attempts: 3,
                last: Rejection::CollidesWithPlayer { .. }
            }
        ));
        assert_eq!(harness.images.calls(), 0);
    }

    #[tokio::test]
    async fn test_dummy_failures_are_skipped_and_names_avoided() {
        let text = MockText::new();
        text.queue_failure(TextStage::DummyPatron, ServiceError::Empty(ServiceKind::Text));
        text.queue(TextStage::DummyPatron, "no labels at all");
        text.queue(
            TextStage::DummyPatron,
            "Name: Gus\nTraits: Stout.\nPersonality: Loud.",
        );
        let harness = TestHarness::new().with_text(text);
        let services = harness.services();
        let config = GenerationConfig::default().with_filler_patrons(1);

        let patrons = Pipeline::new(&services, &config)
            .generate_patrons(&summaries(), "The Lantern", "Rosa", &[])
            .await
            .unwrap();

        assert_eq!(patrons.len(), 1);
        let prompts = harness.text.prompts(TextStage::Patron);
        assert!(prompts[0].contains("- Gus"));
    }
}
