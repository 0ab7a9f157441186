//! Testing utilities.
//!
//! This module provides tools for deterministic testing without a live
//! generation server:
//! - `MockProvider` returns scripted responses and tracks call concurrency
//! - `MemoryStore` is an in-memory snapshot store
//! - `TestHarness` wires an engine together and scripts whole turns

use crate::cast::Cast;
use crate::config::EngineConfig;
use crate::persist::{PersistError, SnapshotStore, StorySnapshot};
use crate::schema::{
    CharacterConcept, CharacterMove, PlayerCharacter, ResponderId, Scene, StoryConfig,
    StoryOutline, StoryPreferences,
};
use crate::session::Engine;
use async_trait::async_trait;
use openai_compat::{ChatProvider, Error, Request};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// A provider that returns scripted responses in order.
///
/// Tracks the total call count and the peak number of concurrently
/// outstanding calls, which is how dispatch bounds are asserted. Each call
/// yields to the scheduler a few times so grouped calls genuinely overlap.
pub struct MockProvider {
    script: Mutex<VecDeque<Result<String, Error>>>,
    calls: AtomicUsize,
    outstanding: AtomicUsize,
    peak: AtomicUsize,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
            outstanding: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    /// Queue a free-text response.
    pub fn push_text(&self, text: impl Into<String>) {
        self.script.lock().unwrap().push_back(Ok(text.into()));
    }

    /// Queue a JSON response.
    pub fn push_json(&self, value: Value) {
        self.push_text(value.to_string());
    }

    /// Queue a failure.
    pub fn push_error(&self, error: Error) {
        self.script.lock().unwrap().push_back(Err(error));
    }

    /// Total completed calls so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of calls that were ever outstanding at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatProvider for MockProvider {
    async fn complete(&self, _request: Request) -> Result<String, Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let current = self.outstanding.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(current, Ordering::SeqCst);

        // Scripted responses pop at call entry so they map to calls in
        // dispatch selection order.
        let scripted = self.script.lock().unwrap().pop_front();

        for _ in 0..4 {
            tokio::task::yield_now().await;
        }

        self.outstanding.fetch_sub(1, Ordering::SeqCst);
        scripted.unwrap_or_else(|| Ok("The story continues.".to_string()))
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// An in-memory snapshot store.
pub struct MemoryStore {
    snapshots: Mutex<HashMap<String, StorySnapshot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            snapshots: Mutex::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.snapshots.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.lock().unwrap().is_empty()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn put(&self, story_id: &str, snapshot: &StorySnapshot) -> Result<(), PersistError> {
        self.snapshots
            .lock()
            .unwrap()
            .insert(story_id.to_string(), snapshot.clone());
        Ok(())
    }

    async fn get(&self, story_id: &str) -> Result<Option<StorySnapshot>, PersistError> {
        Ok(self.snapshots.lock().unwrap().get(story_id).cloned())
    }
}

// ============================================================================
// Fixtures
// ============================================================================

/// A character concept for tests.
pub fn concept(name: &str) -> CharacterConcept {
    CharacterConcept {
        name: name.to_string(),
        role: "rival".to_string(),
        description: format!("{name}, a fixture of the court"),
        personality: vec!["observant".to_string(), "guarded".to_string()],
        goals: vec!["keep their position".to_string()],
        secrets: vec![],
        relationship_to_player: "wary acquaintance".to_string(),
    }
}

/// A story configuration for tests.
pub fn sample_config() -> StoryConfig {
    StoryConfig {
        player_character: PlayerCharacter {
            name: "Lyra".to_string(),
            background: "A cartographer with a forged title".to_string(),
            traits: vec!["curious".to_string(), "stubborn".to_string()],
            motivations: vec!["find her brother".to_string()],
            appearance: "Ink-stained fingers, travel-worn coat".to_string(),
            skills: vec!["mapmaking".to_string()],
            relationships: HashMap::new(),
        },
        preferences: StoryPreferences {
            genre: "Court intrigue".to_string(),
            tone: "witty".to_string(),
            themes: vec!["betrayal".to_string()],
            length: Default::default(),
            content_boundaries: vec![],
        },
        temperatures: Default::default(),
        seed: 1337,
    }
}

/// An outline with two major characters.
pub fn sample_outline() -> StoryOutline {
    StoryOutline {
        premise: "A forged title draws Lyra into the regent's shadow war.".to_string(),
        acts: vec![
            "Arrival at court".to_string(),
            "The shadow war surfaces".to_string(),
        ],
        major_characters: vec![concept("Corin"), concept("Mira")],
        key_locations: vec!["The Lantern Hall".to_string()],
        potential_endings: vec!["Lyra claims the title for real".to_string()],
    }
}

/// An opening scene with the player present.
pub fn sample_scene() -> Scene {
    Scene {
        scene_id: "opening".to_string(),
        when: "Dusk, the night of the winter audit".to_string(),
        where_: "The Lantern Hall".to_string(),
        atmosphere: "Candle smoke and whispered ledgers".to_string(),
        present_characters: vec!["Lyra".to_string()],
        nearby_characters: vec![],
        ongoing_events: vec!["Clerks tally the year's accounts".to_string()],
        facts: vec!["The regent never leaves the keep".to_string()],
    }
}

/// JSON for a scene, suitable for scripting `create_opening_scene`.
pub fn scene_json(scene: &Scene) -> Value {
    serde_json::to_value(scene).expect("scene serializes")
}

/// A move for the given character.
pub fn move_value(character: &str, responder: ResponderId, intent: &str) -> CharacterMove {
    CharacterMove {
        character: character.to_string(),
        responder,
        intent: intent.to_string(),
        action: None,
        dialogue: Some(format!("{character} has something to say.")),
        internal_thought: None,
        target: None,
    }
}

/// JSON for a responding character (proposes a move).
pub fn response_json(character: &str, responder: ResponderId, intent: &str) -> Value {
    json!({
        "character": character,
        "responder": responder,
        "responds": true,
        "move": move_value(character, responder, intent),
        "observes_only": false
    })
}

/// JSON for a character who declines to act.
pub fn decline_json(character: &str, responder: ResponderId) -> Value {
    json!({
        "character": character,
        "responder": responder,
        "responds": false,
        "observes_only": true,
        "observation_notes": format!("{character} watches in silence.")
    })
}

/// Routing JSON: one decision per (name, id, receives) triple.
pub fn routing_json(members: &[(String, ResponderId, bool)]) -> Value {
    let decisions: Vec<Value> = members
        .iter()
        .map(|(name, id, receives)| {
            json!({
                "character": name,
                "responder": id,
                "receives": receives,
                "packet": receives.then(|| json!({
                    "scene_description": "The hall, as they see it.",
                    "observed_actions": ["the player's latest action"],
                    "overheard_dialogue": []
                })),
                "reason": if *receives { "present" } else { "remote" },
                "attention": "full"
            })
        })
        .collect();
    json!({ "decisions": decisions })
}

/// Validation JSON accepting every move.
pub fn validation_json(accepted: &[CharacterMove]) -> Value {
    json!({
        "accepted_moves": accepted,
        "rejected_moves": [],
        "npc_actions": [],
        "environment_changes": [],
        "continuity_notes": []
    })
}

// ============================================================================
// Harness
// ============================================================================

/// Test harness wiring an [`Engine`] to a mock provider and an in-memory
/// snapshot store.
pub struct TestHarness {
    pub provider: Arc<MockProvider>,
    pub store: Arc<MemoryStore>,
    pub engine: Engine,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let provider = Arc::new(MockProvider::new());
        let store = Arc::new(MemoryStore::new());
        let engine = Engine::new(provider.clone(), store.clone(), config);

        Self {
            provider,
            store,
            engine,
        }
    }

    /// Script the provider calls `create_story` makes (the outline).
    pub fn script_create(&self) {
        self.provider
            .push_json(serde_json::to_value(sample_outline()).expect("outline serializes"));
    }

    /// Script the provider calls `start_story` makes: world context, the
    /// opening scene, and the opening narrative.
    pub fn script_start(&self) {
        self.provider.push_json(json!({
            "established_facts": ["The regent never leaves the keep"]
        }));
        self.provider.push_json(scene_json(&sample_scene()));
        self.provider
            .push_text("Lyra pushed open the doors of the Lantern Hall.");
    }

    /// Script an entire turn in which every cast member perceives, proposes
    /// a move, and has it accepted.
    pub fn script_full_turn(&self, story_id: &str, narrative: &str) {
        let session = self.engine.session(story_id).expect("session registered");
        let members = cast_members(session.cast());

        let routing: Vec<(String, ResponderId, bool)> = members
            .iter()
            .map(|(name, id)| (name.clone(), *id, true))
            .collect();
        self.provider.push_json(routing_json(&routing));

        let mut moves = Vec::new();
        for (name, id) in &members {
            self.provider.push_json(response_json(name, *id, "react"));
            moves.push(move_value(name, *id, "react"));
        }

        self.provider.push_json(validation_json(&moves));
        self.provider.push_text(narrative);
    }

    /// Script a turn in which every cast member perceives but declines to
    /// act (no validation call happens).
    pub fn script_silent_turn(&self, story_id: &str, narrative: &str) {
        let session = self.engine.session(story_id).expect("session registered");
        let members = cast_members(session.cast());

        let routing: Vec<(String, ResponderId, bool)> = members
            .iter()
            .map(|(name, id)| (name.clone(), *id, true))
            .collect();
        self.provider.push_json(routing_json(&routing));

        for (name, id) in &members {
            self.provider.push_json(decline_json(name, *id));
        }

        self.provider.push_text(narrative);
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// (name, id) for every cast member, in spawn order.
pub fn cast_members(cast: &Cast) -> Vec<(String, ResponderId)> {
    cast.iter()
        .map(|r| (r.name().to_string(), r.id()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_provider_scripts_in_order() {
        let provider = MockProvider::new();
        provider.push_text("first");
        provider.push_text("second");

        let request = Request::new(vec![]);
        assert_eq!(provider.complete(request.clone()).await.unwrap(), "first");
        assert_eq!(provider.complete(request.clone()).await.unwrap(), "second");

        // Exhausted scripts fall back to a default line.
        let fallback = provider.complete(request).await.unwrap();
        assert!(fallback.contains("story continues"));
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test]
    async fn test_memory_store_round_trip() {
        let store = MemoryStore::new();
        let snapshot = StorySnapshot {
            story_id: "test_00000000".to_string(),
            ..Default::default()
        };

        store.put("test_00000000", &snapshot).await.unwrap();
        let loaded = store.get("test_00000000").await.unwrap().unwrap();
        assert_eq!(loaded.story_id, "test_00000000");
        assert!(store.get("other").await.unwrap().is_none());
    }
}
