//! The multi-stage generation pipeline.
//!
//! World generation runs distillation, bar, beverages and patrons in
//! order, then narrates the opening node. Every stage either produces
//! validated content or fails the whole generation; stages work on a
//! draft [`SessionState`] that the caller commits only on success.

mod bar;
mod beverages;
mod distill;
mod narration;
mod patrons;

pub use narration::{commit_narration, Beat, NarrationPlan};
pub use patrons::{validate_patron, MAX_PATRON_NAME_LEN};

use crate::director::{Direction, Director};
use crate::graph::{GraphError, NarrativeGraph, NodeId};
use crate::parse::Rejection;
use crate::registry::{Registry, RegistryError};
use crate::services::{ImageRequest, ServiceError, Services};
use crate::session::SessionState;
use futures::{stream, StreamExt, TryStreamExt};
use rand::Rng;
use std::fmt;
use thiserror::Error;

/// A pipeline stage, for error reports and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Distillation,
    Bar,
    Beverages,
    Patrons,
    Narration,
    Portrait,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Distillation => "distillation",
            Stage::Bar => "bar",
            Stage::Beverages => "beverages",
            Stage::Patrons => "patrons",
            Stage::Narration => "narration",
            Stage::Portrait => "portrait",
        })
    }
}

/// Errors that abort a generation.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Could not distill setting, theme and art after {attempts} attempts")]
    DistillationFailed { attempts: usize },

    #[error("Only {accepted} of {target} beverages after {rounds} rounds")]
    InsufficientBeverages {
        accepted: usize,
        target: usize,
        rounds: usize,
    },

    #[error("{stage} gave up after {attempts} attempts, last rejection: {last}")]
    RetryBudgetExhausted {
        stage: Stage,
        attempts: usize,
        last: Rejection,
    },

    #[error("{stage} stage: {source}")]
    Service {
        stage: Stage,
        #[source]
        source: ServiceError,
    },

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
}

impl GenerationError {
    /// Wrap a service failure with the stage it interrupted.
    pub fn service(stage: Stage) -> impl FnOnce(ServiceError) -> GenerationError {
        move |source| GenerationError::Service { stage, source }
    }

    /// One sentence suitable for showing to the player.
    pub fn user_message(&self) -> String {
        match self {
            GenerationError::DistillationFailed { .. } => {
                "Couldn't work out a setting from those characters. Try different ones.".to_string()
            }
            GenerationError::InsufficientBeverages { .. } => {
                "Couldn't come up with enough drinks for the menu. Please try again.".to_string()
            }
            GenerationError::RetryBudgetExhausted { stage, .. } => {
                format!("The {stage} step kept producing unusable results. Please try again.")
            }
            GenerationError::Service { source, .. } => {
                format!("The {} service is unavailable right now. Please try again.", source.service())
            }
            GenerationError::Graph(_) | GenerationError::Registry(_) => {
                "Something went wrong while saving the story. Please try again.".to_string()
            }
        }
    }
}

/// Tunables for every generation stage.
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    /// Token budget for descriptions and structured answers.
    pub max_tokens: usize,
    /// Token budget for narration beats.
    pub narration_max_tokens: usize,
    pub min_tokens: usize,
    pub distillation_attempts: usize,
    /// Attempts per patron before the generation is abandoned.
    pub patron_attempts: usize,
    /// Throwaway characters generated to steer the model off its first picks.
    pub dummy_patrons: usize,
    /// Original characters added alongside the seed characters.
    pub filler_patrons: usize,
    pub beverage_target: usize,
    /// Give up on beverages after this many text calls. Unlimited by default.
    pub beverage_round_limit: Option<usize>,
    /// Parallel image calls during world generation.
    pub image_concurrency: usize,
    pub emotion_threshold: f32,
    /// Image-to-image strength for emotion portraits.
    pub portrait_strength: f32,
    /// Servings of each beverage available per night.
    pub nightly_stock: u32,
    /// Seed for the director's random choices.
    pub seed: Option<u64>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_tokens: 400,
            narration_max_tokens: 200,
            min_tokens: 16,
            distillation_attempts: 3,
            patron_attempts: 3,
            dummy_patrons: 3,
            filler_patrons: 3,
            beverage_target: 5,
            beverage_round_limit: None,
            image_concurrency: 3,
            emotion_threshold: 0.5,
            portrait_strength: 0.1,
            nightly_stock: 3,
            seed: None,
        }
    }
}

impl GenerationConfig {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_beverage_target(mut self, target: usize) -> Self {
        self.beverage_target = target;
        self
    }

    pub fn with_beverage_round_limit(mut self, rounds: usize) -> Self {
        self.beverage_round_limit = Some(rounds);
        self
    }

    pub fn with_filler_patrons(mut self, count: usize) -> Self {
        self.filler_patrons = count;
        self
    }

    pub fn with_dummy_patrons(mut self, count: usize) -> Self {
        self.dummy_patrons = count;
        self
    }

    pub fn with_patron_attempts(mut self, attempts: usize) -> Self {
        self.patron_attempts = attempts.max(1);
        self
    }

    pub fn with_image_concurrency(mut self, limit: usize) -> Self {
        self.image_concurrency = limit.max(1);
        self
    }

    pub fn with_nightly_stock(mut self, stock: u32) -> Self {
        self.nightly_stock = stock;
        self
    }

    pub fn with_emotion_threshold(mut self, threshold: f32) -> Self {
        self.emotion_threshold = threshold;
        self
    }
}

/// Runs generation stages against a set of services.
pub struct Pipeline<'a> {
    services: &'a Services,
    config: &'a GenerationConfig,
}

impl<'a> Pipeline<'a> {
    pub fn new(services: &'a Services, config: &'a GenerationConfig) -> Self {
        Self { services, config }
    }

    pub fn config(&self) -> &GenerationConfig {
        self.config
    }

    /// Generate a whole new world into `state` and narrate its opening.
    ///
    /// Replaces summaries, bar, registries, graph and director. On error
    /// `state` may be partially written and must be discarded.
    pub async fn build_world<R: Rng>(
        &self,
        state: &mut SessionState,
        rng: &mut R,
    ) -> Result<NodeId, GenerationError> {
        tracing::info!(
            target: "pipeline",
            player = %state.player,
            characters = state.characters.len(),
            "Generating world"
        );

        let summaries = self.distill(&state.characters).await?;
        state.summaries = summaries;

        let bar = self.generate_bar(&state.summaries).await?;
        let beverages = self.generate_beverages(&state.summaries, &bar.description).await?;
        let patrons = self
            .generate_patrons(
                &state.summaries,
                &bar.description,
                &state.player,
                &state.characters,
            )
            .await?;

        let mut registry = Registry::new();
        for beverage in beverages {
            registry.add_beverage(beverage)?;
        }
        for patron in patrons {
            registry.add_patron(patron)?;
        }

        let table = state.director.table().clone();
        state.director = Director::new(registry.patron_names()).with_table(table);
        state.registry = registry;
        state.bar = bar;
        state.graph = NarrativeGraph::new();
        state.active = None;

        let root = self.narrate(state, rng, Some(Direction::IntroduceBar)).await?;
        tracing::info!(
            target: "pipeline",
            beverages = state.registry.beverages().len(),
            patrons = state.registry.patrons().len(),
            "World generated"
        );
        Ok(root)
    }

    /// Generate images with bounded parallelism, in request order.
    /// Nothing is returned unless every image succeeds.
    async fn generate_images(
        &self,
        stage: Stage,
        requests: Vec<ImageRequest>,
    ) -> Result<Vec<String>, GenerationError> {
        stream::iter(requests)
            .map(|request| self.services.image(request))
            .buffered(self.config.image_concurrency.max(1))
            .try_collect()
            .await
            .map_err(GenerationError::service(stage))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{assert_graph_valid, MockImages, MockText, TextStage, TestHarness};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn state() -> SessionState {
        SessionState::new("Rosa", vec!["Spike".to_string(), "Faye".to_string()])
    }

    #[tokio::test]
    async fn test_build_world_with_default_mocks() {
        let harness = TestHarness::new();
        let services = harness.services();
        let config = GenerationConfig::default();
        let pipeline = Pipeline::new(&services, &config);
        let mut draft = state();
        let mut rng = StdRng::seed_from_u64(1);

        let root = pipeline.build_world(&mut draft, &mut rng).await.unwrap();

        assert_eq!(draft.registry.beverages().len(), 5);
        assert_eq!(draft.registry.patrons().len(), 5);
        assert_eq!(draft.graph.len(), 1);
        assert_eq!(draft.active, Some(root));
        let root = draft.graph.root().unwrap();
        assert_eq!(root.direction, Direction::IntroduceBar);
        assert_eq!(root.night, 1);
        assert!(root.beverage_counts.values().all(|count| *count == 3));
        assert!(!draft.bar.image.is_empty());
        assert!(draft
            .registry
            .patrons()
            .iter()
            .all(|p| !p.neutral_image().is_empty()));
        assert_eq!(draft.director.patrons().len(), 5);
        assert_graph_valid(&draft.graph);
    }

    #[tokio::test]
    async fn test_bar_image_failure_is_fatal() {
        let images = MockImages::new();
        images.queue_failure(ServiceError::Empty(crate::services::ServiceKind::Image));
        let harness = TestHarness::new().with_images(images);
        let services = harness.services();
        let config = GenerationConfig::default();
        let pipeline = Pipeline::new(&services, &config);
        let mut draft = state();
        let mut rng = StdRng::seed_from_u64(1);

        let err = pipeline.build_world(&mut draft, &mut rng).await.unwrap_err();
        assert!(matches!(
            err,
            GenerationError::Service {
                stage: Stage::Bar,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_blank_bar_text_is_a_service_failure() {
        let text = MockText::new();
        text.queue(TextStage::Bar, "   \n ");
        let harness = TestHarness::new().with_text(text);
        let services = harness.services();
        let config = GenerationConfig::default();
        let pipeline = Pipeline::new(&services, &config);
        let mut draft = state();
        let mut rng = StdRng::seed_from_u64(1);

        let err = pipeline.build_world(&mut draft, &mut rng).await.unwrap_err();
        assert!(matches!(
            err,
            GenerationError::Service {
                stage: Stage::Bar,
                source: ServiceError::Empty(_)
            }
        ));
        assert!(err.user_message().contains("text generation"));
    }
}
