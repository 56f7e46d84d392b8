//! Play a short evening against scripted services and print the transcript.
//!
//! Run with: `RUST_LOG=director=debug,pipeline=info cargo run -p barkeep-core --example scripted_night`

use barkeep_core::testing::{TestHarness, TextStage};
use barkeep_core::{Direction, Emotion, SessionError};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), SessionError> {
    init_tracing();

    let harness = TestHarness::new();
    harness.text.queue(
        TextStage::Bar,
        "A narrow bar under the elevated tracks, brass rail worn pale, one flickering sign.",
    );
    let session = harness.controller();
    session.begin_generation().await?;

    let state = session.snapshot().await;
    println!("# {}\n", state.bar.description);
    println!("## Menu");
    for beverage in state.registry.beverages() {
        println!("- {}: {}", beverage.name, beverage.description);
    }
    println!("\n## Regulars");
    for patron in state.registry.patrons() {
        println!("- {}", patron.summary());
    }
    println!();

    let mut served = 0;
    for _ in 0..12 {
        let node = session.current_node().await.expect("generation set an active node");
        let speaker = node.patron_speaker().unwrap_or("Narrator");
        println!("[night {}] {} | {speaker}: {}", node.night, node.direction, node.message);

        if let (Some(name), Some(emotion)) = (node.patron_speaker(), node.emotion) {
            if emotion != Emotion::Neutral {
                let image = session.portrait(name, emotion).await?;
                println!("    ({name} looks {emotion}: {image})");
            }
        }

        if node.direction == Direction::PatronDrinkRequest {
            let menu = session.snapshot().await.registry.beverages().to_vec();
            let pick = &menu[served % menu.len()];
            match session.serve_beverage(&pick.name).await {
                Ok(()) => {
                    served += 1;
                    println!("    > Rosa pours a {}", pick.name);
                }
                Err(e) => println!("    > {}", e.user_message()),
            }
        }

        session.mark_read().await?;
        session.advance().await?;
    }

    let rerolled = session.reroll().await?;
    let alt = session.current_node().await.expect("reroll selected a node");
    println!("\nRerolled {rerolled}: {}", alt.message);
    println!(
        "\n{} nodes, {} narration calls, {} images",
        session.snapshot().await.graph.len(),
        harness.text.calls(TextStage::Narration),
        harness.images.calls()
    );
    Ok(())
}
