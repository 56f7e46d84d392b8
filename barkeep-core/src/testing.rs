//! Testing utilities for the narrative engine.
//!
//! This module provides tools for integration testing:
//! - `MockText`, `MockImages` and `MockEmotions` for deterministic runs
//!   without network calls
//! - `TestHarness` for wiring the mocks into a session
//! - Assertion helpers for verifying graph and director state

use crate::director::Director;
use crate::graph::{NarrativeGraph, NodeId};
use crate::pipeline::GenerationConfig;
use crate::services::{
    EmotionClassifier, EmotionScore, ImageGenerator, ImageRequest, PromptKind, ServiceError,
    Services, TextGenerator, TextRequest,
};
use crate::session::{SessionConfig, SessionController};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Text stages a mock can be scripted for. Narration covers every direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextStage {
    Distillation,
    Bar,
    Beverages,
    Patron,
    DummyPatron,
    Narration,
}

impl From<PromptKind> for TextStage {
    fn from(kind: PromptKind) -> Self {
        match kind {
            PromptKind::Distillation => TextStage::Distillation,
            PromptKind::Bar => TextStage::Bar,
            PromptKind::Beverages => TextStage::Beverages,
            PromptKind::Patron => TextStage::Patron,
            PromptKind::DummyPatron => TextStage::DummyPatron,
            PromptKind::Narration(_) => TextStage::Narration,
        }
    }
}

/// Holds a mocked call until the test releases it.
#[derive(Debug, Default)]
pub struct Gate {
    entered: Notify,
    release: Notify,
}

impl Gate {
    /// Wait until the gated call has started.
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    /// Let the gated call finish.
    pub fn release(&self) {
        self.release.notify_one();
    }
}

const PATRON_NAMES: [&str; 10] = [
    "Marla", "Tobias", "Quill", "Hesper", "Dov", "Ansel", "Brisa", "Corvin", "Edda", "Fenwick",
];
const DUMMY_NAMES: [&str; 3] = ["Gus", "Nell", "Otto"];

/// A text generator that returns scripted responses.
///
/// Queued responses are returned first, per stage. Once a stage's queue is
/// empty the mock answers with well-formed defaults, so an unscripted mock
/// always produces a complete world.
#[derive(Debug, Default)]
pub struct MockText {
    queued: Mutex<HashMap<TextStage, VecDeque<Result<String, ServiceError>>>>,
    counters: Mutex<HashMap<TextStage, usize>>,
    requests: Mutex<Vec<TextRequest>>,
    gate: Mutex<Option<(TextStage, Arc<Gate>)>>,
}

impl MockText {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for the next call of `stage`.
    pub fn queue(&self, stage: TextStage, response: impl Into<String>) -> &Self {
        lock(&self.queued)
            .entry(stage)
            .or_default()
            .push_back(Ok(response.into()));
        self
    }

    /// Queue a failure for the next call of `stage`.
    pub fn queue_failure(&self, stage: TextStage, error: ServiceError) -> &Self {
        lock(&self.queued)
            .entry(stage)
            .or_default()
            .push_back(Err(error));
        self
    }

    /// Hold the next call of `stage` until the returned gate is released.
    pub fn gate(&self, stage: TextStage) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        *lock(&self.gate) = Some((stage, gate.clone()));
        gate
    }

    /// Number of calls made for `stage`.
    pub fn calls(&self, stage: TextStage) -> usize {
        lock(&self.counters).get(&stage).copied().unwrap_or(0)
    }

    /// Every request received, in order.
    pub fn requests(&self) -> Vec<TextRequest> {
        lock(&self.requests).clone()
    }

    /// Prompts sent for `stage`, in order.
    pub fn prompts(&self, stage: TextStage) -> Vec<String> {
        lock(&self.requests)
            .iter()
            .filter(|r| TextStage::from(r.kind) == stage)
            .map(|r| r.prompt.clone())
            .collect()
    }

    fn default_response(kind: PromptKind, n: usize) -> String {
        match kind {
            PromptKind::Distillation => "Source: The Drowned Quarter stories\n\
                 Setting: A harbor tavern in a rain-soaked port city\n\
                 Theme: Found family and old debts\n\
                 Art: Ink wash with warm lantern highlights"
                .to_string(),
            PromptKind::Bar => "The Lantern & Anchor leans against the seawall, all brass \
                 and tar-black beams, smelling of rope and rum."
                .to_string(),
            PromptKind::Beverages => format!(
                "Name: Harbor Draught {a}\nDescription: A cloudy ale with a salt rim.\n\n\
                 Name: Lamplight {b}\nDescription: Honeyed spirit that glows amber.",
                a = 2 * n + 1,
                b = 2 * n + 2,
            ),
            PromptKind::Patron => {
                let base = PATRON_NAMES[n % PATRON_NAMES.len()];
                let name = match n / PATRON_NAMES.len() {
                    0 => base.to_string(),
                    round => format!("{base} {round}"),
                };
                format!(
                    "Name: {name}\nTraits: Salt-stained coat and a crooked smile.\n\
                     Personality: Talks in riddles, tips generously."
                )
            }
            PromptKind::DummyPatron => format!(
                "Name: {}\nTraits: Unremarkable.\nPersonality: Forgettable.",
                DUMMY_NAMES[n % DUMMY_NAMES.len()]
            ),
            PromptKind::Narration(direction) => {
                format!("{} beat {}.", direction.name(), n + 1)
            }
        }
    }
}

#[async_trait]
impl TextGenerator for MockText {
    async fn generate(&self, request: TextRequest) -> Result<String, ServiceError> {
        let stage = TextStage::from(request.kind);

        let gate = {
            let mut slot = lock(&self.gate);
            if matches!(slot.as_ref(), Some((gated, _)) if *gated == stage) {
                slot.take().map(|(_, gate)| gate)
            } else {
                None
            }
        };
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }

        let n = {
            let mut counters = lock(&self.counters);
            let count = counters.entry(stage).or_insert(0);
            *count += 1;
            *count - 1
        };
        let kind = request.kind;
        lock(&self.requests).push(request);

        let queued = lock(&self.queued)
            .get_mut(&stage)
            .and_then(VecDeque::pop_front);
        queued.unwrap_or_else(|| Ok(Self::default_response(kind, n)))
    }
}

/// An image generator that returns numbered references.
#[derive(Debug, Default)]
pub struct MockImages {
    queued: Mutex<VecDeque<Result<String, ServiceError>>>,
    requests: Mutex<Vec<ImageRequest>>,
}

impl MockImages {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a failure for the next call.
    pub fn queue_failure(&self, error: ServiceError) -> &Self {
        lock(&self.queued).push_back(Err(error));
        self
    }

    /// Queue a response for the next call.
    pub fn queue(&self, image: impl Into<String>) -> &Self {
        lock(&self.queued).push_back(Ok(image.into()));
        self
    }

    pub fn calls(&self) -> usize {
        lock(&self.requests).len()
    }

    pub fn requests(&self) -> Vec<ImageRequest> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl ImageGenerator for MockImages {
    async fn generate_image(&self, request: ImageRequest) -> Result<String, ServiceError> {
        let n = {
            let mut requests = lock(&self.requests);
            requests.push(request);
            requests.len()
        };
        let queued = lock(&self.queued).pop_front();
        queued.unwrap_or_else(|| Ok(format!("img://mock/{n}")))
    }
}

/// An emotion classifier with fixed scores.
#[derive(Debug)]
pub struct MockEmotions {
    scores: Vec<EmotionScore>,
    queued: Mutex<VecDeque<Result<Vec<EmotionScore>, ServiceError>>>,
    calls: Mutex<Vec<String>>,
}

impl Default for MockEmotions {
    fn default() -> Self {
        Self::with_scores(vec![
            EmotionScore::new("joy", 0.72),
            EmotionScore::new("neutral", 0.2),
        ])
    }
}

impl MockEmotions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every call with `scores`.
    pub fn with_scores(scores: Vec<EmotionScore>) -> Self {
        Self {
            scores,
            queued: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Queue a failure for the next call.
    pub fn queue_failure(&self, error: ServiceError) -> &Self {
        lock(&self.queued).push_back(Err(error));
        self
    }

    pub fn calls(&self) -> usize {
        lock(&self.calls).len()
    }
}

#[async_trait]
impl EmotionClassifier for MockEmotions {
    async fn classify(&self, text: &str) -> Result<Vec<EmotionScore>, ServiceError> {
        lock(&self.calls).push(text.to_string());
        let queued = lock(&self.queued).pop_front();
        queued.unwrap_or_else(|| Ok(self.scores.clone()))
    }
}

/// Mock services plus a session configuration.
pub struct TestHarness {
    pub text: Arc<MockText>,
    pub images: Arc<MockImages>,
    pub emotions: Arc<MockEmotions>,
    pub config: SessionConfig,
}

impl TestHarness {
    /// Player "Rosa" with two seed characters and a fixed seed.
    pub fn new() -> Self {
        Self {
            text: Arc::new(MockText::new()),
            images: Arc::new(MockImages::new()),
            emotions: Arc::new(MockEmotions::new()),
            config: SessionConfig::new("Rosa")
                .with_characters(["Spike", "Faye"])
                .with_generation(GenerationConfig::default().with_seed(7)),
        }
    }

    pub fn with_text(mut self, text: MockText) -> Self {
        self.text = Arc::new(text);
        self
    }

    pub fn with_images(mut self, images: MockImages) -> Self {
        self.images = Arc::new(images);
        self
    }

    pub fn with_emotions(mut self, emotions: MockEmotions) -> Self {
        self.emotions = Arc::new(emotions);
        self
    }

    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// The mocks as a service bundle.
    pub fn services(&self) -> Services {
        Services::new(self.text.clone(), self.images.clone(), self.emotions.clone())
    }

    /// A fresh session backed by the mocks.
    pub fn controller(&self) -> SessionController {
        SessionController::new(self.config.clone(), self.services())
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Assertion Helpers
// ============================================================================

/// Assert that every structural invariant of the graph holds and that
/// every node reaches the root without revisiting a node.
#[track_caller]
pub fn assert_graph_valid(graph: &NarrativeGraph) {
    if let Err(e) = graph.validate() {
        panic!("Expected a valid graph, got: {e}");
    }
    let Some(root) = graph.root_id() else {
        assert!(graph.is_empty(), "Expected an empty graph without a root");
        return;
    };
    for node in graph.nodes() {
        let mut seen = HashSet::new();
        let mut last = None;
        for ancestor in graph.ancestors(node.id) {
            assert!(
                seen.insert(ancestor.id),
                "Expected no cycle above {}, revisited {}",
                node.id,
                ancestor.id
            );
            last = Some(ancestor.id);
        }
        assert_eq!(last, Some(root), "Expected {} to reach the root", node.id);
        if let Some(selected) = node.selected_child_id() {
            assert!(
                node.child_ids().contains(&selected),
                "Expected selection of {} to be one of its children",
                node.id
            );
        }
    }
}

/// Assert that `child` hangs directly below `parent`.
#[track_caller]
pub fn assert_child_of(graph: &NarrativeGraph, child: NodeId, parent: NodeId) {
    let node = graph
        .get(child)
        .unwrap_or_else(|| panic!("Expected node {child} to exist"));
    assert_eq!(node.parent_id, Some(parent), "Expected {child} under {parent}");
    let parent_node = graph
        .get(parent)
        .unwrap_or_else(|| panic!("Expected node {parent} to exist"));
    assert!(
        parent_node.child_ids().contains(&child),
        "Expected {parent} to list {child} as a child"
    );
}

/// Assert the director's roster invariants.
#[track_caller]
pub fn assert_roster_consistent(director: &Director) {
    let mut seen = HashSet::new();
    for name in director.present() {
        assert!(
            director.patrons().contains(name),
            "Expected present patron '{name}' to be known"
        );
        assert!(seen.insert(name), "Expected '{name}' to be present only once");
    }

    let Some(direction) = director.direction() else {
        return;
    };
    match (direction.is_patron_focused(), director.current_patron()) {
        (false, current) => assert_eq!(current, None, "Expected no focus during {direction}"),
        (true, None) => panic!("Expected a focus patron during {direction}"),
        (true, Some(name)) => {
            let present = director.present().iter().any(|p| p == name);
            let leaving = direction == crate::director::Direction::PatronLeaves;
            assert_eq!(
                present, !leaving,
                "Expected '{name}' present={} during {direction}",
                !leaving
            );
        }
    }
}
