//! Multi-character narrative engine.
//!
//! This crate coordinates an ensemble of autonomous character responders
//! through a turn pipeline:
//! - the director decides who perceives each event and validates moves
//! - the cast fans perception out to responders under a concurrency cap
//! - the narrator composes prose over a bounded conversation window
//! - the session sequencer drives the stages and persists snapshots
//!
//! Memory is bounded everywhere it accumulates: responder memory windows,
//! relationship notes, and the narrator's conversation window all evict
//! oldest-first, so sessions can run indefinitely.
//!
//! # Quick Start
//!
//! ```ignore
//! use troupe_core::{Engine, testing};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut engine = Engine::from_env();
//!
//!     let (story_id, outline) = engine.create_story(testing::sample_config()).await?;
//!     println!("{}", outline.premise);
//!
//!     let opening = engine.start_story(&story_id).await?;
//!     println!("{}", opening.narrative);
//!
//!     let turn = engine.process_turn(&story_id, "I study the ledgers").await?;
//!     println!("{}", turn.narrative);
//!     Ok(())
//! }
//! ```

pub mod cast;
pub mod config;
pub mod decode;
pub mod director;
pub mod memory;
pub mod narrator;
pub mod persist;
pub mod responder;
pub mod schema;
pub mod session;
pub mod testing;

// Primary public API
pub use cast::{Cast, DispatchFailure, DispatchOutcome};
pub use config::{EngineConfig, RoleParams};
pub use decode::GenerationError;
pub use director::{Director, RoutingError, ValidationError};
pub use narrator::Narrator;
pub use persist::{FileStore, PersistError, SnapshotStore, StorySnapshot};
pub use responder::{Responder, ResponderError};
pub use session::{Engine, SessionError, StorySession};
