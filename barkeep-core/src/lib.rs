//! Branching bar-night narrative engine with an automated scene director.
//!
//! This crate provides:
//! - A branching narrative graph the player walks forward and back through
//! - A weighted scene director that decides what happens next in the bar
//! - A generation pipeline over text, image and emotion services
//! - Session control with save blobs
//!
//! # Quick Start
//!
//! ```ignore
//! use barkeep_core::{Services, SessionConfig, SessionController};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SessionConfig::new("Rosa")
//!         .with_character("Spike Spiegel")
//!         .with_character("Faye Valentine");
//!
//!     let session = SessionController::new(config, Services::from_env()?);
//!     session.begin_generation().await?;
//!
//!     session.advance().await?;
//!     if let Some(node) = session.current_node().await {
//!         println!("{}", node.message);
//!     }
//!
//!     let blob = session.serialize().await?;
//!     Ok(())
//! }
//! ```

pub mod director;
pub mod emotion;
pub mod graph;
pub mod parse;
pub mod persist;
pub mod pipeline;
pub mod prompts;
pub mod registry;
pub mod services;
pub mod session;
pub mod testing;

// Primary public API
pub use director::{Direction, Director, TransitionTable};
pub use emotion::Emotion;
pub use graph::{NarrativeGraph, NodeId, SceneNode, Speaker};
pub use persist::{PersistError, TurnState};
pub use pipeline::{GenerationConfig, GenerationError};
pub use registry::{Bar, Beverage, Patron, Registry};
pub use services::{EmotionClassifier, ImageGenerator, Services, TextGenerator};
pub use session::{
    Advanced, GenerationOutcome, SessionConfig, SessionController, SessionError, SessionState,
};
pub use testing::{MockEmotions, MockImages, MockText, TestHarness};
