//! Story data model.
//!
//! Contains the passive types shared across the engine: player and cast
//! identity, scenes, perception routing, proposed moves, validation results,
//! and turn records. These types carry no orchestration logic of their own.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// How many interaction notes a relationship retains before the oldest
/// are dropped.
pub const RELATIONSHIP_NOTE_CAP: usize = 8;

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for a character responder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResponderId(pub Uuid);

impl ResponderId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ResponderId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ResponderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Story configuration
// ============================================================================

/// The player's character definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerCharacter {
    pub name: String,
    pub background: String,
    #[serde(default)]
    pub traits: Vec<String>,
    #[serde(default)]
    pub motivations: Vec<String>,
    #[serde(default)]
    pub appearance: String,
    #[serde(default)]
    pub skills: Vec<String>,
    /// Name -> how the player relates to them.
    #[serde(default)]
    pub relationships: HashMap<String, String>,
}

/// Requested length of the story arc.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoryLength {
    #[default]
    Short,
    Medium,
    Long,
}

/// Player preferences for story generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoryPreferences {
    pub genre: String,
    pub tone: String,
    #[serde(default)]
    pub themes: Vec<String>,
    #[serde(default)]
    pub length: StoryLength,
    /// Stored but not enforced.
    #[serde(default)]
    pub content_boundaries: Vec<String>,
}

/// Per-role temperature overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleTemperatures {
    pub director: f32,
    pub narrator: f32,
    pub character_default: f32,
}

impl Default for RoleTemperatures {
    fn default() -> Self {
        Self {
            director: 0.2,
            narrator: 0.7,
            character_default: 0.7,
        }
    }
}

/// Complete configuration for one story.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoryConfig {
    pub player_character: PlayerCharacter,
    pub preferences: StoryPreferences,
    #[serde(default)]
    pub temperatures: RoleTemperatures,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_seed() -> u64 {
    1337
}

// ============================================================================
// Cast identity
// ============================================================================

/// High-level concept for a character to be spawned as a responder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CharacterConcept {
    pub name: String,
    /// "antagonist", "romantic interest", "rival", "ally", ...
    pub role: String,
    pub description: String,
    #[serde(default)]
    pub personality: Vec<String>,
    #[serde(default)]
    pub goals: Vec<String>,
    #[serde(default)]
    pub secrets: Vec<String>,
    #[serde(default)]
    pub relationship_to_player: String,
}

/// Generated story structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoryOutline {
    pub premise: String,
    #[serde(default)]
    pub acts: Vec<String>,
    #[serde(default)]
    pub major_characters: Vec<CharacterConcept>,
    #[serde(default)]
    pub key_locations: Vec<String>,
    #[serde(default)]
    pub potential_endings: Vec<String>,
}

/// A character's speech and personality style.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StyleCard {
    #[serde(default)]
    pub voice: Vec<String>,
    #[serde(default)]
    pub speech_patterns: Vec<String>,
    #[serde(default)]
    pub taboos: Vec<String>,
    #[serde(default)]
    pub catchphrases: Vec<String>,
    #[serde(default)]
    pub temperature_override: Option<f32>,
}

/// A responder's stance toward another party.
///
/// The stance is a single current descriptor; interaction notes accumulate
/// alongside it in a bounded list so long sessions cannot grow it without
/// limit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub stance: String,
    #[serde(default)]
    pub notes: Vec<String>,
}

impl Relationship {
    pub fn new(stance: impl Into<String>) -> Self {
        Self {
            stance: stance.into(),
            notes: Vec::new(),
        }
    }

    /// Record an interaction note, evicting the oldest past the cap.
    pub fn note(&mut self, note: impl Into<String>) {
        self.notes.push(note.into());
        while self.notes.len() > RELATIONSHIP_NOTE_CAP {
            self.notes.remove(0);
        }
    }
}

/// Complete identity record for one responder.
///
/// Exclusively owned by its [`Responder`](crate::responder::Responder);
/// nothing else mutates it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dossier {
    pub name: String,
    pub responder: ResponderId,
    pub concept: CharacterConcept,
    #[serde(default)]
    pub style: StyleCard,
    /// Facts this character holds true, in order of first insertion.
    #[serde(default)]
    pub beliefs: Vec<String>,
    #[serde(default)]
    pub current_goals: Vec<String>,
    /// Key events they remember long-term.
    #[serde(default)]
    pub memories: Vec<String>,
    /// Other-party name -> current relationship.
    #[serde(default)]
    pub relationships: HashMap<String, Relationship>,
    #[serde(default = "default_emotional_state")]
    pub emotional_state: String,
}

fn default_emotional_state() -> String {
    "neutral".to_string()
}

// ============================================================================
// Scene
// ============================================================================

/// Current scene state.
///
/// A name may legally appear in both `present_characters` and
/// `nearby_characters`; presence wins when classifying a character's
/// position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scene {
    pub scene_id: String,
    pub when: String,
    #[serde(rename = "where")]
    pub where_: String,
    pub atmosphere: String,
    #[serde(default)]
    pub present_characters: Vec<String>,
    /// Could overhear or observe without being in the scene.
    #[serde(default)]
    pub nearby_characters: Vec<String>,
    #[serde(default)]
    pub ongoing_events: Vec<String>,
    /// Established facts the story must stay consistent with.
    #[serde(default)]
    pub facts: Vec<String>,
}

impl Scene {
    /// Classify a character's position in this scene.
    pub fn position_of(&self, name: &str) -> ScenePosition {
        if self.present_characters.iter().any(|n| n == name) {
            ScenePosition::Present
        } else if self.nearby_characters.iter().any(|n| n == name) {
            ScenePosition::Nearby
        } else {
            ScenePosition::Remote
        }
    }
}

/// Where a character stands relative to the current scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenePosition {
    Present,
    Nearby,
    Remote,
}

impl fmt::Display for ScenePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScenePosition::Present => write!(f, "present"),
            ScenePosition::Nearby => write!(f, "nearby"),
            ScenePosition::Remote => write!(f, "remote"),
        }
    }
}

// ============================================================================
// Perception routing
// ============================================================================

/// What a character learns this turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerceptionPacket {
    pub scene_description: String,
    #[serde(default)]
    pub observed_actions: Vec<String>,
    #[serde(default)]
    pub overheard_dialogue: Vec<String>,
    /// Rumors or private information.
    #[serde(default)]
    pub whispers: Vec<String>,
    /// Smells, sounds, and so on.
    #[serde(default)]
    pub sensory_details: Vec<String>,
}

/// Qualitative strength of a responder's perception.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttentionLevel {
    #[default]
    Full,
    Partial,
    Peripheral,
}

/// Who learns what this turn, one decision per responder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub character: String,
    pub responder: ResponderId,
    pub receives: bool,
    #[serde(default)]
    pub packet: Option<PerceptionPacket>,
    /// "present", "eavesdropping", "spy network", ...
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub attention: AttentionLevel,
}

// ============================================================================
// Moves and validation
// ============================================================================

/// A character's proposed action for the turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CharacterMove {
    pub character: String,
    pub responder: ResponderId,
    /// "deflect", "charm", "investigate", ...
    pub intent: String,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub dialogue: Option<String>,
    #[serde(default)]
    pub internal_thought: Option<String>,
    #[serde(default)]
    pub target: Option<String>,
}

/// A responder's answer to a perception packet.
///
/// `responds == false` is a valid, common outcome, not an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CharacterResponse {
    pub character: String,
    pub responder: ResponderId,
    pub responds: bool,
    #[serde(rename = "move", default)]
    pub proposed_move: Option<CharacterMove>,
    #[serde(default)]
    pub observes_only: bool,
    #[serde(default)]
    pub observation_notes: Option<String>,
}

/// A rejected move with the reason and an optional fix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoveRejection {
    #[serde(rename = "move")]
    pub rejected: CharacterMove,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub edit_suggestion: Option<String>,
}

/// Reconciliation of all proposed moves for one turn.
///
/// Accepted and rejected sets partition the proposed moves exactly; the
/// director enforces that invariant after decoding.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationOutcome {
    #[serde(default)]
    pub accepted_moves: Vec<CharacterMove>,
    #[serde(default)]
    pub rejected_moves: Vec<MoveRejection>,
    /// "guard reacts", "crowd gasps", ...
    #[serde(default)]
    pub npc_actions: Vec<String>,
    #[serde(default)]
    pub environment_changes: Vec<String>,
    #[serde(default)]
    pub continuity_notes: Vec<String>,
}

// ============================================================================
// Turn output and history
// ============================================================================

/// Final narrative output for one turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnOutput {
    pub narrative: String,
    #[serde(default)]
    pub visible_moves: Vec<CharacterMove>,
    /// Present when the narrator replaced the scene this turn.
    #[serde(default)]
    pub scene_update: Option<Scene>,
    #[serde(default)]
    pub continuity_flags: Vec<String>,
}

impl TurnOutput {
    /// A plain narrative with no moves attached (meta-command replies).
    pub fn message(narrative: impl Into<String>) -> Self {
        Self {
            narrative: narrative.into(),
            visible_moves: Vec::new(),
            scene_update: None,
            continuity_flags: Vec::new(),
        }
    }
}

/// One processed turn, appended to history and never mutated afterward.
///
/// The opening carries turn number 0; post-opening turns number from 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    pub turn: u32,
    #[serde(default)]
    pub input: String,
    pub narrative: String,
    pub summary: String,
}

/// Small session-scoped summary kept alongside the story.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorldState {
    #[serde(default)]
    pub story_id: String,
    #[serde(default)]
    pub player_name: String,
    #[serde(default)]
    pub genre: String,
    #[serde(default)]
    pub tone: String,
}
