//! Navigation, branching and the generation guard.

use barkeep_core::services::{ServiceError, ServiceKind};
use barkeep_core::testing::{assert_child_of, assert_graph_valid, TestHarness, TextStage};
use barkeep_core::{
    Advanced, Direction, Emotion, GenerationConfig, GenerationOutcome, SessionConfig,
    SessionController, SessionError, TransitionTable,
};
use std::sync::Arc;

async fn generated(harness: &TestHarness) -> SessionController {
    let session = harness.controller();
    session.begin_generation().await.unwrap();
    session
}

#[tokio::test]
async fn test_advance_on_leaf_appends_exactly_one_child() {
    let harness = TestHarness::new();
    let session = generated(&harness).await;
    let root = session.current_node().await.unwrap().id;
    let narrations = harness.text.calls(TextStage::Narration);

    let step = session.advance().await.unwrap();
    let Advanced::Generated(child) = step else {
        panic!("expected a generated node, got {step:?}");
    };

    assert_eq!(harness.text.calls(TextStage::Narration), narrations + 1);
    let state = session.snapshot().await;
    assert_eq!(state.graph.len(), 2);
    assert_child_of(&state.graph, child, root);
    assert_eq!(state.graph.root().unwrap().selected_child_id(), Some(child));
    assert_eq!(state.active, Some(child));
    assert_graph_valid(&state.graph);
}

#[tokio::test]
async fn test_recede_then_advance_follows_selection_without_generating() {
    let harness = TestHarness::new();
    let session = generated(&harness).await;
    let root = session.current_node().await.unwrap().id;
    let first = session.advance().await.unwrap().node();
    let second = session.advance().await.unwrap().node();
    let narrations = harness.text.calls(TextStage::Narration);

    assert_eq!(session.recede().await.unwrap(), Some(first));
    assert_eq!(session.recede().await.unwrap(), Some(root));
    assert_eq!(session.recede().await.unwrap(), None);
    assert_eq!(session.current_node().await.unwrap().id, root);

    assert_eq!(session.advance().await.unwrap(), Advanced::Existing(first));
    assert_eq!(session.advance().await.unwrap(), Advanced::Existing(second));
    assert_eq!(harness.text.calls(TextStage::Narration), narrations);

    let history: Vec<_> = session.history().await.iter().map(|n| n.id).collect();
    assert_eq!(history, vec![root, first, second]);
}

#[tokio::test]
async fn test_mark_read_and_turn_state() {
    let harness = TestHarness::new();
    let session = generated(&harness).await;

    let turn = session.turn_state().await.unwrap();
    assert!(!turn.read);
    session.mark_read().await.unwrap();
    let turn = session.turn_state().await.unwrap();
    assert!(turn.read);
    assert!(session.current_node().await.unwrap().read);
}

#[tokio::test]
async fn test_serving_drinks() {
    let table = TransitionTable::empty()
        .with(Direction::IntroduceBar, vec![(Direction::IntroducePatron, 1)])
        .with(
            Direction::IntroducePatron,
            vec![(Direction::PatronDrinkRequest, 1)],
        )
        .with(Direction::PatronDrinkRequest, vec![(Direction::PatronBanter, 1)]);
    let harness = TestHarness::new().with_config(
        SessionConfig::new("Rosa")
            .with_character("Spike")
            .with_generation(GenerationConfig::default().with_seed(3).with_nightly_stock(1)),
    );
    let session = harness.controller().with_transition_table(table);
    session.begin_generation().await.unwrap();
    let drink = session.snapshot().await.registry.beverages()[0].name.clone();

    assert!(matches!(
        session.serve_beverage(&drink).await,
        Err(SessionError::NotDrinkRequest(_))
    ));

    session.advance().await.unwrap();
    let ask = session.advance().await.unwrap().node();
    assert_eq!(
        session.current_node().await.unwrap().direction,
        Direction::PatronDrinkRequest
    );
    assert!(matches!(
        session.serve_beverage("Mystery Punch").await,
        Err(SessionError::UnknownBeverage(_))
    ));

    session.serve_beverage(&drink.to_uppercase()).await.unwrap();
    let node = session.current_node().await.unwrap();
    assert_eq!(node.selected_beverage.as_deref(), Some(drink.as_str()));
    assert_eq!(node.beverage_counts.get(&drink), Some(&0));

    assert!(matches!(
        session.serve_beverage(&drink).await,
        Err(SessionError::OutOfStock(_))
    ));

    // Once the story moves on, the request is locked.
    session.advance().await.unwrap();
    session.recede().await.unwrap();
    assert_eq!(session.current_node().await.unwrap().id, ask);
    let other = session.snapshot().await.registry.beverages()[1].name.clone();
    assert!(matches!(
        session.serve_beverage(&other).await,
        Err(SessionError::NodeLocked(_))
    ));

    let prompts = harness.text.prompts(TextStage::Narration);
    assert!(prompts.last().unwrap().contains(&format!("served a {drink}")));
}

#[tokio::test]
async fn test_portraits_are_generated_once_and_fall_back_on_failure() {
    let harness = TestHarness::new();
    let session = generated(&harness).await;
    let patron = session.snapshot().await.registry.patrons()[0].clone();
    let images_before = harness.images.calls();

    let neutral = session.portrait(&patron.name, Emotion::Neutral).await.unwrap();
    assert_eq!(neutral, patron.neutral_image());
    assert_eq!(harness.images.calls(), images_before);

    let joy = session.portrait(&patron.name, Emotion::Joy).await.unwrap();
    let again = session.portrait(&patron.name, Emotion::Joy).await.unwrap();
    assert_eq!(joy, again);
    assert_eq!(harness.images.calls(), images_before + 1);

    harness
        .images
        .queue_failure(ServiceError::transport(ServiceKind::Image, "timeout"));
    let err = session.portrait(&patron.name, Emotion::Fear).await.unwrap_err();
    assert!(matches!(err, SessionError::Generation(_)));
    let state = session.snapshot().await;
    let stored = state.registry.patron(&patron.name).unwrap();
    assert!(!stored.has_portrait(Emotion::Fear));
    assert_eq!(stored.image_for(Emotion::Fear), patron.neutral_image());

    assert!(matches!(
        session.portrait("Nobody", Emotion::Joy).await,
        Err(SessionError::UnknownPatron(_))
    ));
}

#[tokio::test]
async fn test_reentry_while_generating_is_rejected() {
    let harness = TestHarness::new();
    let gate = harness.text.gate(TextStage::Distillation);
    let session = Arc::new(harness.controller());

    let task = {
        let session = session.clone();
        tokio::spawn(async move { session.begin_generation().await })
    };
    gate.entered().await;

    assert!(session.is_generating());
    assert_eq!(
        session.begin_generation().await.unwrap(),
        GenerationOutcome::AlreadyRunning
    );
    assert!(matches!(session.advance().await, Err(SessionError::Busy)));
    assert!(matches!(session.recede().await, Err(SessionError::Busy)));
    assert!(matches!(session.reroll().await, Err(SessionError::Busy)));
    assert!(matches!(
        session.serve_beverage("anything").await,
        Err(SessionError::Busy)
    ));
    assert!(matches!(
        session.portrait("anyone", Emotion::Joy).await,
        Err(SessionError::Busy)
    ));
    assert!(matches!(
        session.deserialize("{}").await,
        Err(SessionError::Busy)
    ));
    assert!(matches!(session.mark_read().await, Err(SessionError::Busy)));

    gate.release();
    let outcome = task.await.unwrap().unwrap();
    assert!(matches!(outcome, GenerationOutcome::Generated(_)));
    assert!(!session.is_generating());
    assert_eq!(harness.text.calls(TextStage::Distillation), 1);
}

#[tokio::test]
async fn test_mutations_wait_for_a_beat_to_finish() {
    let harness = TestHarness::new();
    let session = Arc::new(generated(&harness).await);
    let first = session.advance().await.unwrap().node();
    let turn = session.turn_state().await.unwrap();

    let gate = harness.text.gate(TextStage::Narration);
    let task = {
        let session = session.clone();
        tokio::spawn(async move { session.advance().await.map(|step| step.node()) })
    };
    gate.entered().await;

    assert!(matches!(session.mark_read().await, Err(SessionError::Busy)));
    assert!(matches!(
        session.select_branch(first).await,
        Err(SessionError::Busy)
    ));
    assert!(matches!(
        session.apply_turn_state(turn).await,
        Err(SessionError::Busy)
    ));
    assert!(matches!(session.reroll().await, Err(SessionError::Busy)));

    // Reads keep working and show the state from before the beat.
    let during = session.snapshot().await;
    assert_eq!(during.graph.len(), 2);
    assert_eq!(during.active, Some(first));
    assert!(!during.graph.get(first).unwrap().read);

    gate.release();
    let second = task.await.unwrap().unwrap();
    assert!(!session.is_generating());

    let state = session.snapshot().await;
    assert_eq!(state.graph.len(), 3);
    assert_child_of(&state.graph, second, first);
    assert_eq!(state.active, Some(second));
    assert_eq!(state.graph.root().unwrap().selected_child_id(), Some(first));
    assert!(!state.graph.get(first).unwrap().read);
    assert_graph_valid(&state.graph);

    session.mark_read().await.unwrap();
    assert!(session.current_node().await.unwrap().read);
}

#[tokio::test]
async fn test_failed_beat_leaves_session_unchanged() {
    let harness = TestHarness::new();
    let session = generated(&harness).await;
    let before = session.snapshot().await;

    harness
        .text
        .queue_failure(TextStage::Narration, ServiceError::transport(ServiceKind::Text, "503"));
    let err = session.advance().await.unwrap_err();
    assert!(matches!(err, SessionError::Generation(_)));
    assert!(!session.is_generating());
    assert_eq!(session.snapshot().await, before);

    let retry = session.advance().await.unwrap();
    assert!(matches!(retry, Advanced::Generated(_)));
}
