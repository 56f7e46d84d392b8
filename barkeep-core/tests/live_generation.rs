//! QA tests against the real generation services.
//!
//! These tests spend credits, so they are ignored by default.
//!
//! Run with: `GENAPI_API_KEY=$GENAPI_API_KEY cargo test -p barkeep-core live_generation -- --ignored --nocapture`

use barkeep_core::testing::{assert_graph_valid, assert_roster_consistent};
use barkeep_core::{Emotion, GenerationConfig, Services, SessionConfig, SessionController};

/// Load environment variables from .env file
fn setup() {
    let _ = dotenvy::dotenv();
}

/// Check if API key is available
fn has_api_key() -> bool {
    std::env::var("GENAPI_API_KEY").is_ok()
}

fn controller() -> SessionController {
    let config = SessionConfig::new("Rosa")
        .with_character("Spike Spiegel")
        .with_character("Faye Valentine")
        .with_generation(GenerationConfig::default().with_seed(1).with_filler_patrons(1));
    let services = Services::from_env().expect("GENAPI_API_KEY is set");
    SessionController::new(config, services)
}

#[tokio::test]
#[ignore]
async fn test_live_world_generation() {
    setup();
    if !has_api_key() {
        eprintln!("Skipping test: GENAPI_API_KEY not set");
        return;
    }

    println!("\n=== Generating a world ===\n");
    let session = controller();
    match session.begin_generation().await {
        Ok(outcome) => println!("SUCCESS: {outcome:?}"),
        Err(e) => panic!("FAILED: Could not generate world: {}", e.user_message()),
    }

    let state = session.snapshot().await;
    println!("Setting: {}", state.summaries.setting);
    println!("Bar: {}", state.bar.description);
    for beverage in state.registry.beverages() {
        println!("  Drink: {} - {}", beverage.name, beverage.description);
    }
    for patron in state.registry.patrons() {
        println!("  Patron: {}", patron.summary());
    }

    assert_eq!(state.registry.beverages().len(), 5);
    assert!(!state.registry.patrons().is_empty());
    assert_graph_valid(&state.graph);
}

#[tokio::test]
#[ignore]
async fn test_live_evening_walkthrough() {
    setup();
    if !has_api_key() {
        eprintln!("Skipping test: GENAPI_API_KEY not set");
        return;
    }

    let session = controller();
    session.begin_generation().await.expect("world generated");

    for turn in 1..=6 {
        let step = session.advance().await.expect("advance");
        let node = session.current_node().await.expect("active node");
        println!("[{turn}] {} ({:?}): {}", node.direction, step, node.message);

        if let Some(patron) = node.patron_speaker() {
            let image = session
                .portrait(patron, node.emotion.unwrap_or(Emotion::Neutral))
                .await
                .expect("portrait");
            println!("    portrait: {image}");
        }
    }

    let state = session.snapshot().await;
    assert_eq!(state.graph.len(), 7);
    assert_graph_valid(&state.graph);
    assert_roster_consistent(&state.director);

    let blob = session.serialize().await.expect("serialize");
    let restored = controller();
    restored.deserialize(&blob).await.expect("deserialize");
    assert_eq!(restored.snapshot().await.graph, state.graph);
}
