//! SessionController - the primary public API for a bar-night session.
//!
//! The controller owns the session aggregate and the generation flag. It
//! wraps the pipeline, graph navigation and persistence into one API that
//! a host drives from its input loop.

use crate::director::{Direction, Director, TransitionTable};
use crate::emotion::Emotion;
use crate::graph::{GraphError, NarrativeGraph, NodeId, SceneNode};
use crate::parse::Distillation;
use crate::persist::{self, PersistError, TurnState};
use crate::pipeline::{
    commit_narration, GenerationConfig, GenerationError, NarrationPlan, Pipeline,
};
use crate::registry::{Bar, Registry};
use crate::services::Services;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::Mutex;

/// Errors from SessionController operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Generation failed: {0}")]
    Generation(#[from] GenerationError),

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("A generation is already in progress")]
    Busy,

    #[error("No world has been generated yet")]
    NoWorld,

    #[error("No patron named '{0}'")]
    UnknownPatron(String),

    #[error("No beverage named '{0}'")]
    UnknownBeverage(String),

    #[error("'{0}' has run out for tonight")]
    OutOfStock(String),

    #[error("Node {0} already has continuations")]
    NodeLocked(NodeId),

    #[error("Node {0} is not a drink request")]
    NotDrinkRequest(NodeId),

    #[error("The opening scene cannot be regenerated")]
    NothingToReroll,

    #[error("Persistence error: {0}")]
    Persist(#[from] PersistError),
}

impl SessionError {
    /// One sentence suitable for showing to the player.
    pub fn user_message(&self) -> String {
        match self {
            SessionError::Generation(e) => e.user_message(),
            SessionError::Busy => "Still working on the last request. One moment.".to_string(),
            SessionError::NoWorld => "Generate a bar first.".to_string(),
            SessionError::UnknownPatron(name) => format!("Nobody called {name} drinks here."),
            SessionError::UnknownBeverage(name) => format!("{name} isn't on the menu."),
            SessionError::OutOfStock(name) => format!("You're out of {name} for tonight."),
            SessionError::NodeLocked(_) => "That moment has already passed.".to_string(),
            SessionError::NotDrinkRequest(_) => "Nobody asked for a drink just now.".to_string(),
            SessionError::NothingToReroll => "The opening can't be rewritten.".to_string(),
            SessionError::Graph(_) | SessionError::Persist(_) => {
                "The story could not be loaded correctly.".to_string()
            }
        }
    }
}

/// Configuration for creating a new session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// The bartender's name.
    pub player: String,

    /// Seed characters the bar is built around.
    pub characters: Vec<String>,

    /// Pipeline tunables.
    pub generation: GenerationConfig,
}

impl SessionConfig {
    /// Create a new session config for the given player.
    pub fn new(player: impl Into<String>) -> Self {
        Self {
            player: player.into(),
            characters: Vec::new(),
            generation: GenerationConfig::default(),
        }
    }

    /// Add a seed character.
    pub fn with_character(mut self, name: impl Into<String>) -> Self {
        self.characters.push(name.into());
        self
    }

    /// Add several seed characters.
    pub fn with_characters<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.characters.extend(names.into_iter().map(Into::into));
        self
    }

    /// Replace the pipeline tunables.
    pub fn with_generation(mut self, generation: GenerationConfig) -> Self {
        self.generation = generation;
        self
    }
}

/// Everything a session knows: the persisted aggregate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub player: String,
    pub characters: Vec<String>,
    pub summaries: Distillation,
    pub bar: Bar,
    pub registry: Registry,
    pub graph: NarrativeGraph,
    pub director: Director,
    /// The node the player is looking at. Saved separately as a [`TurnState`].
    #[serde(skip)]
    pub active: Option<NodeId>,
}

impl SessionState {
    pub fn new(player: impl Into<String>, characters: Vec<String>) -> Self {
        Self {
            player: player.into(),
            characters,
            ..Self::default()
        }
    }

    /// Whether a world has been generated.
    pub fn has_world(&self) -> bool {
        self.graph.root_id().is_some()
    }

    pub fn active_node(&self) -> Option<&SceneNode> {
        self.active.and_then(|id| self.graph.get(id))
    }
}

/// Result of [`SessionController::begin_generation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationOutcome {
    /// A new world was generated; its opening node is active.
    Generated(NodeId),
    /// Another generation was running; nothing happened.
    AlreadyRunning,
}

/// Result of [`SessionController::advance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advanced {
    /// Moved to an existing node.
    Existing(NodeId),
    /// Generated a new node.
    Generated(NodeId),
}

impl Advanced {
    pub fn node(&self) -> NodeId {
        match self {
            Advanced::Existing(id) | Advanced::Generated(id) => *id,
        }
    }
}

/// Clears the generation flag when dropped, including when the
/// generation future is cancelled.
struct GenerationGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> GenerationGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for GenerationGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

struct Inner {
    state: SessionState,
    rng: StdRng,
}

/// A bar-night session.
///
/// This is the main entry point. It manages:
/// - The session aggregate (graph, registries, director, summaries)
/// - World generation and per-node narration
/// - Navigation and branch selection
/// - Save blobs
///
/// The aggregate lock is never held across a service call. A new world is
/// built on a separate draft and swapped in only when it succeeds; a new
/// beat is planned under the lock, composed without it and appended
/// afterwards.
pub struct SessionController {
    services: Services,
    config: GenerationConfig,
    inner: Mutex<Inner>,
    generating: AtomicBool,
}

impl SessionController {
    /// Create a session with no world yet.
    pub fn new(config: SessionConfig, services: Services) -> Self {
        let rng = match config.generation.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            services,
            inner: Mutex::new(Inner {
                state: SessionState::new(config.player, config.characters),
                rng,
            }),
            config: config.generation,
            generating: AtomicBool::new(false),
        }
    }

    /// Replace the director's transition table.
    pub fn with_transition_table(mut self, table: TransitionTable) -> Self {
        let inner = self.inner.get_mut();
        inner.state.director = std::mem::take(&mut inner.state.director).with_table(table);
        self
    }

    /// Whether a generation is outstanding.
    pub fn is_generating(&self) -> bool {
        self.generating.load(Ordering::Acquire)
    }

    fn ensure_idle(&self) -> Result<(), SessionError> {
        if self.is_generating() {
            return Err(SessionError::Busy);
        }
        Ok(())
    }

    fn pipeline(&self) -> Pipeline<'_> {
        Pipeline::new(&self.services, &self.config)
    }

    /// A blank aggregate for a new world. Only the player, the seed
    /// characters and the transition table carry over.
    async fn world_draft(&self) -> (SessionState, StdRng) {
        let inner = self.inner.lock().await;
        let state = &inner.state;
        let mut draft = SessionState::new(state.player.clone(), state.characters.clone());
        draft.director = Director::default().with_table(state.director.table().clone());
        (draft, inner.rng.clone())
    }

    async fn commit(&self, state: SessionState, rng: StdRng) {
        let mut inner = self.inner.lock().await;
        inner.state = state;
        inner.rng = rng;
    }

    /// Plan a beat below `parent` under the lock, without touching the
    /// session. Returns the plan and the rng it advanced.
    fn plan_beat(
        &self,
        inner: &Inner,
        parent: NodeId,
    ) -> Result<(NarrationPlan, StdRng), SessionError> {
        let mut rng = inner.rng.clone();
        let plan = self
            .pipeline()
            .plan_narration(&inner.state, Some(parent), &mut rng, None)?;
        Ok((plan, rng))
    }

    /// Run the service calls for a planned beat with the lock released,
    /// then append it. The generation flag keeps every other mutation out
    /// in between.
    async fn finish_beat(&self, plan: NarrationPlan, rng: StdRng) -> Result<NodeId, SessionError> {
        let beat = self.pipeline().compose(&plan).await?;
        let mut inner = self.inner.lock().await;
        let id = commit_narration(&mut inner.state, plan, beat)?;
        inner.rng = rng;
        Ok(id)
    }

    /// Generate a new world: summaries, bar, menu, patrons and the opening
    /// node. Calling it while a generation is running does nothing.
    ///
    /// On failure the previous world, if any, is left untouched.
    pub async fn begin_generation(&self) -> Result<GenerationOutcome, SessionError> {
        let Some(_guard) = GenerationGuard::acquire(&self.generating) else {
            tracing::info!(target: "session", "Generation already running, ignoring request");
            return Ok(GenerationOutcome::AlreadyRunning);
        };

        let (mut draft, mut rng) = self.world_draft().await;
        match self.pipeline().build_world(&mut draft, &mut rng).await {
            Ok(root) => {
                self.commit(draft, rng).await;
                tracing::info!(target: "session", %root, "World ready");
                Ok(GenerationOutcome::Generated(root))
            }
            Err(e) => {
                tracing::error!(target: "session", error = %e, "World generation failed");
                Err(e.into())
            }
        }
    }

    /// Move forward along the active branch, generating a node at a leaf.
    pub async fn advance(&self) -> Result<Advanced, SessionError> {
        let Some(_guard) = GenerationGuard::acquire(&self.generating) else {
            return Err(SessionError::Busy);
        };

        let (plan, rng) = {
            let mut inner = self.inner.lock().await;
            let active = inner.state.active.ok_or(SessionError::NoWorld)?;
            if let Some(next) = inner.state.graph.advance(active)?.map(|node| node.id) {
                inner.state.active = Some(next);
                tracing::debug!(target: "session", node = %next, "Advanced");
                return Ok(Advanced::Existing(next));
            }
            self.plan_beat(&inner, active)?
        };

        let id = self.finish_beat(plan, rng).await?;
        Ok(Advanced::Generated(id))
    }

    /// Step back to the parent node. Returns `None` at the root.
    pub async fn recede(&self) -> Result<Option<NodeId>, SessionError> {
        self.ensure_idle()?;
        let mut inner = self.inner.lock().await;
        let active = inner.state.active.ok_or(SessionError::NoWorld)?;
        let parent = inner.state.graph.recede(active)?.map(|node| node.id);
        if let Some(parent) = parent {
            inner.state.active = Some(parent);
            tracing::debug!(target: "session", node = %parent, "Receded");
        }
        Ok(parent)
    }

    /// Regenerate the active node as a new sibling branch and select it.
    pub async fn reroll(&self) -> Result<NodeId, SessionError> {
        let Some(_guard) = GenerationGuard::acquire(&self.generating) else {
            return Err(SessionError::Busy);
        };

        let (active, plan, rng) = {
            let inner = self.inner.lock().await;
            let active = inner.state.active.ok_or(SessionError::NoWorld)?;
            let parent = inner
                .state
                .graph
                .node(active)?
                .parent_id
                .ok_or(SessionError::NothingToReroll)?;
            let (plan, rng) = self.plan_beat(&inner, parent)?;
            (active, plan, rng)
        };

        let id = self.finish_beat(plan, rng).await?;
        tracing::info!(target: "session", replaced = %active, node = %id, "Rerolled");
        Ok(id)
    }

    /// Switch to another branch below the same parent.
    pub async fn select_branch(&self, child: NodeId) -> Result<(), SessionError> {
        self.ensure_idle()?;
        let mut inner = self.inner.lock().await;
        let parent = inner
            .state
            .graph
            .node(child)?
            .parent_id
            .ok_or(GraphError::InvalidReference(child))?;
        inner.state.graph.select_child(parent, child)?;
        inner.state.active = Some(child);
        Ok(())
    }

    /// Mark the active node as fully read.
    pub async fn mark_read(&self) -> Result<(), SessionError> {
        self.ensure_idle()?;
        let mut inner = self.inner.lock().await;
        let active = inner.state.active.ok_or(SessionError::NoWorld)?;
        inner.state.graph.mark_read(active)?;
        Ok(())
    }

    /// Serve `beverage` in answer to the active drink request.
    pub async fn serve_beverage(&self, beverage: &str) -> Result<(), SessionError> {
        self.ensure_idle()?;
        let mut inner = self.inner.lock().await;
        let state = &mut inner.state;
        let active = state.active.ok_or(SessionError::NoWorld)?;

        let name = state
            .registry
            .beverage(beverage)
            .map(|b| b.name.clone())
            .ok_or_else(|| SessionError::UnknownBeverage(beverage.to_string()))?;

        let node = state.graph.node(active)?;
        if node.direction != Direction::PatronDrinkRequest {
            return Err(SessionError::NotDrinkRequest(active));
        }
        if !node.is_leaf() {
            return Err(SessionError::NodeLocked(active));
        }

        let mut counts = node.beverage_counts.clone();
        match counts.get_mut(&name) {
            Some(count) if *count > 0 => *count -= 1,
            _ => return Err(SessionError::OutOfStock(name)),
        }

        state.graph.record_serving(active, name.clone(), counts)?;
        tracing::info!(target: "session", beverage = %name, node = %active, "Served");
        Ok(())
    }

    /// Image for `patron` showing `emotion`, generating it on first use.
    ///
    /// If generation fails the error is returned and the patron keeps
    /// showing the neutral portrait.
    pub async fn portrait(&self, patron: &str, emotion: Emotion) -> Result<String, SessionError> {
        let Some(_guard) = GenerationGuard::acquire(&self.generating) else {
            return Err(SessionError::Busy);
        };

        let (found, summaries) = {
            let inner = self.inner.lock().await;
            let found = inner
                .state
                .registry
                .patron(patron)
                .cloned()
                .ok_or_else(|| SessionError::UnknownPatron(patron.to_string()))?;
            (found, inner.state.summaries.clone())
        };
        if emotion == Emotion::Neutral || found.has_portrait(emotion) {
            return Ok(found.image_for(emotion).to_string());
        }

        let image = match self
            .pipeline()
            .generate_portrait(&summaries, &found, emotion)
            .await
        {
            Ok(image) => image,
            Err(e) => {
                tracing::warn!(
                    target: "session",
                    patron = %found.name,
                    %emotion,
                    error = %e,
                    "Portrait generation failed, keeping neutral portrait"
                );
                return Err(e.into());
            }
        };

        let mut inner = self.inner.lock().await;
        if let Some(entry) = inner.state.registry.patron_mut(&found.name) {
            entry.set_portrait(emotion, image.clone());
        }
        Ok(image)
    }

    /// Serialize the session to a save blob.
    pub async fn serialize(&self) -> Result<String, SessionError> {
        let inner = self.inner.lock().await;
        Ok(persist::to_json(&inner.state)?)
    }

    /// Replace the session with a save blob. The active node becomes the
    /// end of the saved active branch until a turn state says otherwise.
    pub async fn deserialize(&self, blob: &str) -> Result<(), SessionError> {
        self.ensure_idle()?;
        let mut state = persist::from_json(blob)?;
        state.active = match state.graph.root_id() {
            Some(root) => Some(state.graph.active_tip(root)?),
            None => None,
        };

        let mut inner = self.inner.lock().await;
        let table = inner.state.director.table().clone();
        state.director = state.director.with_table(table);
        inner.state = state;
        tracing::info!(target: "session", nodes = inner.state.graph.len(), "Session restored");
        Ok(())
    }

    /// The per-turn state to store next to the save blob.
    pub async fn turn_state(&self) -> Option<TurnState> {
        let inner = self.inner.lock().await;
        inner.state.active_node().map(|node| TurnState {
            active: node.id,
            read: node.read,
        })
    }

    /// Restore the per-turn state saved with [`turn_state`](Self::turn_state).
    pub async fn apply_turn_state(&self, turn: TurnState) -> Result<(), SessionError> {
        self.ensure_idle()?;
        let mut inner = self.inner.lock().await;
        inner.state.graph.node(turn.active)?;
        if turn.read {
            inner.state.graph.mark_read(turn.active)?;
        }
        inner.state.active = Some(turn.active);
        Ok(())
    }

    /// The node the player is looking at.
    pub async fn current_node(&self) -> Option<SceneNode> {
        self.inner.lock().await.state.active_node().cloned()
    }

    /// Nodes from the root down to the active node.
    pub async fn history(&self) -> Vec<SceneNode> {
        let inner = self.inner.lock().await;
        let Some(active) = inner.state.active else {
            return Vec::new();
        };
        let mut nodes: Vec<SceneNode> = inner.state.graph.ancestors(active).cloned().collect();
        nodes.reverse();
        nodes
    }

    /// A copy of the whole aggregate.
    pub async fn snapshot(&self) -> SessionState {
        self.inner.lock().await.state.clone()
    }

    /// The player's name.
    pub async fn player(&self) -> String {
        self.inner.lock().await.state.player.clone()
    }
}
