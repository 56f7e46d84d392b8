//! Per-node narration and lazy emotion portraits.

use super::{GenerationError, Pipeline, Stage};
use crate::director::{Direction, Director};
use crate::emotion::Emotion;
use crate::graph::{NodeFields, NodeId, SceneNode, Speaker};
use crate::parse::Distillation;
use crate::prompts::{narration_prompt, portrait_prompt, Scene};
use crate::registry::{Patron, Registry};
use crate::services::{AspectRatio, ImageRequest, PromptKind, TextRequest};
use crate::session::SessionState;
use rand::Rng;
use std::collections::BTreeMap;

/// Whether a node following `parent` opens a new night. The bar closes
/// once the last patron has left.
pub(crate) fn starts_new_night(parent: &SceneNode) -> bool {
    parent.direction == Direction::PatronLeaves && parent.present_patron_ids.is_empty()
}

/// Full stock of every beverage on the menu.
pub(crate) fn fresh_stock(registry: &Registry, per_beverage: u32) -> BTreeMap<String, u32> {
    registry
        .beverages()
        .iter()
        .map(|b| (b.name.clone(), per_beverage))
        .collect()
}

/// Everything decided about the next beat before any service call.
///
/// Planning reads the session; committing writes it. Nothing in between
/// touches the aggregate, so a caller can drop its lock while the text
/// and emotion services run.
#[derive(Debug, Clone)]
pub struct NarrationPlan {
    parent: Option<NodeId>,
    director: Director,
    direction: Direction,
    focus: Option<String>,
    night: u32,
    beverage_counts: BTreeMap<String, u32>,
    prompt: String,
}

impl NarrationPlan {
    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn focus(&self) -> Option<&str> {
        self.focus.as_deref()
    }

    pub fn night(&self) -> u32 {
        self.night
    }
}

/// Service output for a planned beat.
#[derive(Debug, Clone)]
pub struct Beat {
    pub message: String,
    pub emotion: Option<Emotion>,
}

impl Pipeline<'_> {
    /// Generate the next beat below `state.active` and make it active.
    ///
    /// With no active node the beat becomes the root. `forced` skips the
    /// director's random choice; a new night always opens the bar again.
    pub async fn narrate<R: Rng>(
        &self,
        state: &mut SessionState,
        rng: &mut R,
        forced: Option<Direction>,
    ) -> Result<NodeId, GenerationError> {
        let parent = state.active;
        let plan = self.plan_narration(state, parent, rng, forced)?;
        let beat = self.compose(&plan).await?;
        commit_narration(state, plan, beat)
    }

    /// Pick the direction, focus, night and stock for a beat below
    /// `parent` and build its prompt. `state` is left untouched.
    pub fn plan_narration<R: Rng>(
        &self,
        state: &SessionState,
        parent: Option<NodeId>,
        rng: &mut R,
        forced: Option<Direction>,
    ) -> Result<NarrationPlan, GenerationError> {
        let parent = match parent {
            Some(id) => Some(state.graph.node(id)?),
            None => None,
        };

        let (night, new_night) = match parent {
            None => (1, true),
            Some(parent) if starts_new_night(parent) => (parent.night + 1, true),
            Some(parent) => (parent.night, false),
        };

        let mut director = state.director.clone();
        if let Some(parent) = parent {
            director.resume_from(parent);
        }
        let direction = match forced.or(new_night.then_some(Direction::IntroduceBar)) {
            Some(target) => director.transition(target, rng),
            None => director.choose_next(rng),
        };
        let focus = if direction.is_patron_focused() {
            director.current_patron().map(str::to_string)
        } else {
            None
        };

        let beverage_counts = match parent {
            Some(parent) if !new_night => parent.beverage_counts.clone(),
            _ => fresh_stock(&state.registry, self.config.nightly_stock),
        };

        let prompt = scene_prompt(state, &director, parent, direction, focus.as_deref(), night);
        Ok(NarrationPlan {
            parent: parent.map(|p| p.id),
            director,
            direction,
            focus,
            night,
            beverage_counts,
            prompt,
        })
    }

    /// Run the text call for a planned beat and tag patron lines with an
    /// emotion.
    pub async fn compose(&self, plan: &NarrationPlan) -> Result<Beat, GenerationError> {
        let request = TextRequest::new(PromptKind::Narration(plan.direction), plan.prompt.clone())
            .with_tokens(self.config.min_tokens, self.config.narration_max_tokens);
        let message = self
            .services
            .text(request)
            .await
            .map_err(GenerationError::service(Stage::Narration))?;

        let emotion = match &plan.focus {
            Some(_) => self
                .services
                .emotion_of(&message, self.config.emotion_threshold)
                .await
                .map_err(GenerationError::service(Stage::Narration))?,
            None => None,
        };
        Ok(Beat { message, emotion })
    }

    /// Produce an emotion variant of a patron's neutral portrait.
    pub async fn generate_portrait(
        &self,
        summaries: &Distillation,
        patron: &Patron,
        emotion: Emotion,
    ) -> Result<String, GenerationError> {
        let mut request = ImageRequest::new(portrait_prompt(summaries, patron, emotion))
            .with_aspect_ratio(AspectRatio::Portrait)
            .with_background_removed();
        let neutral = patron.neutral_image();
        if !neutral.is_empty() {
            request = request.with_init_image(neutral, self.config.portrait_strength);
        }

        let image = self
            .services
            .image(request)
            .await
            .map_err(GenerationError::service(Stage::Portrait))?;
        tracing::debug!(target: "pipeline", patron = %patron.name, %emotion, "Portrait generated");
        Ok(image)
    }
}

/// Append a composed beat below its planned parent, select it and make
/// it active. The director takes the state it had when the beat was
/// planned.
pub fn commit_narration(
    state: &mut SessionState,
    plan: NarrationPlan,
    beat: Beat,
) -> Result<NodeId, GenerationError> {
    let NarrationPlan {
        parent,
        director,
        direction,
        focus,
        night,
        beverage_counts,
        ..
    } = plan;

    let fields = NodeFields {
        speaker: focus.clone().map(Speaker::Patron),
        emotion: beat.emotion,
        message: beat.message,
        direction,
        present_patron_ids: director.present().to_vec(),
        selected_patron_id: focus,
        selected_beverage: None,
        beverage_counts,
        night,
    };

    let id = state.graph.append_node(parent, fields)?.id;
    if let Some(parent) = parent {
        state.graph.select_child(parent, id)?;
    }
    state.director = director;
    state.active = Some(id);

    tracing::info!(
        target: "pipeline",
        node = %id,
        %direction,
        night,
        emotion = ?beat.emotion,
        "Narrated node"
    );
    Ok(id)
}

fn scene_prompt(
    state: &SessionState,
    director: &Director,
    parent: Option<&SceneNode>,
    direction: Direction,
    focus: Option<&str>,
    night: u32,
) -> String {
    let history: Vec<&SceneNode> = match parent {
        Some(parent) => state
            .graph
            .history_of(parent.id, |node| node.night == night)
            .iter()
            .collect(),
        None => Vec::new(),
    };
    let served = parent
        .filter(|p| p.direction == Direction::PatronDrinkRequest)
        .and_then(|p| p.selected_beverage.as_deref())
        .and_then(|name| state.registry.beverage(name));

    let scene = Scene {
        direction,
        player: &state.player,
        summaries: &state.summaries,
        bar: &state.bar.description,
        focus: focus.and_then(|name| state.registry.patron(name)),
        present: director
            .present()
            .iter()
            .filter_map(|name| state.registry.patron(name))
            .collect(),
        history,
        served,
        menu: state.registry.beverages(),
        night,
    };
    narration_prompt(&scene)
}
