//! End-to-end world generation against mock services.

use barkeep_core::pipeline::{GenerationError, Stage};
use barkeep_core::services::{ServiceError, ServiceKind};
use barkeep_core::testing::{
    assert_graph_valid, assert_roster_consistent, MockImages, MockText, TestHarness, TextStage,
};
use barkeep_core::{Direction, GenerationOutcome, SessionError};

#[tokio::test]
async fn test_begin_generation_builds_a_complete_world() {
    let harness = TestHarness::new();
    let session = harness.controller();

    let outcome = session.begin_generation().await.unwrap();
    let GenerationOutcome::Generated(root) = outcome else {
        panic!("expected a generated world, got {outcome:?}");
    };
    assert!(!session.is_generating());

    let state = session.snapshot().await;
    assert_eq!(state.registry.beverages().len(), 5);
    assert!(state.registry.patrons().len() >= 3);
    assert_eq!(state.graph.len(), 1);
    assert_eq!(state.graph.root_id(), Some(root));
    assert_eq!(state.active, Some(root));

    let opening = state.graph.root().unwrap();
    assert_eq!(opening.direction, Direction::IntroduceBar);
    assert!(opening.speaker.is_none());
    assert!(opening.present_patron_ids.is_empty());
    assert!(!state.summaries.setting.is_empty());
    assert!(!state.bar.description.is_empty());
    assert!(!state.bar.image.is_empty());

    // Neutral portraits only; the rest are generated on demand.
    for patron in state.registry.patrons() {
        assert!(!patron.neutral_image().is_empty());
        assert_eq!(patron.portrait_emotions().count(), 1);
    }

    assert_graph_valid(&state.graph);
    assert_roster_consistent(&state.director);
    assert_eq!(harness.text.calls(TextStage::DummyPatron), 3);
    assert_eq!(harness.text.calls(TextStage::Narration), 1);
}

#[tokio::test]
async fn test_failed_regeneration_keeps_previous_world() {
    let text = MockText::new();
    let harness = TestHarness::new().with_text(text);
    let session = harness.controller();
    session.begin_generation().await.unwrap();
    session.advance().await.unwrap();
    let before = session.snapshot().await;

    for _ in 0..3 {
        harness.text.queue(TextStage::Distillation, "Setting: nowhere");
    }
    let err = session.begin_generation().await.unwrap_err();

    assert!(matches!(
        err,
        SessionError::Generation(GenerationError::DistillationFailed { attempts: 3 })
    ));
    assert!(!err.user_message().is_empty());
    assert!(!session.is_generating());

    let after = session.snapshot().await;
    assert_eq!(after.summaries, before.summaries);
    assert_eq!(after.graph, before.graph);
    assert_eq!(after.registry, before.registry);
    assert_eq!(after.active, before.active);
}

#[tokio::test]
async fn test_failed_first_generation_leaves_summaries_empty() {
    let images = MockImages::new();
    images.queue_failure(ServiceError::transport(ServiceKind::Image, "503"));
    let session = TestHarness::new().with_images(images).controller();

    let err = session.begin_generation().await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::Generation(GenerationError::Service {
            stage: Stage::Bar,
            ..
        })
    ));

    let state = session.snapshot().await;
    assert_eq!(state.summaries.setting, "");
    assert!(state.graph.is_empty());
    assert!(state.registry.is_empty());

    // The flag was cleared, so a retry runs.
    let retry = session.begin_generation().await.unwrap();
    assert!(matches!(retry, GenerationOutcome::Generated(_)));
}

#[tokio::test]
async fn test_patron_image_failure_is_fatal() {
    let images = MockImages::new();
    // Bar and five beverages succeed, then the first portrait fails.
    for _ in 0..6 {
        images.queue("img://ok");
    }
    images.queue_failure(ServiceError::Empty(ServiceKind::Image));
    let session = TestHarness::new().with_images(images).controller();

    let err = session.begin_generation().await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::Generation(GenerationError::Service {
            stage: Stage::Patrons,
            ..
        })
    ));
    assert!(session.snapshot().await.registry.is_empty());
}
