//! The narrator: composition and the rolling conversation window.
//!
//! The narrator is the only role that writes prose. It keeps two kinds of
//! context: a world-context block generated once per story and prepended to
//! every request, and a rolling window of (player input, narrative) pairs
//! bounded to a configured number of turns. Character moves and NPC actions
//! inform each turn's text but are never written into the window; only the
//! triggering input and the finished narrative persist, which keeps already
//! rendered intermediate material from compounding across turns.

use crate::config::RoleParams;
use crate::decode::{decode_structured, GenerationError};
use crate::schema::{
    CharacterMove, PlayerCharacter, Scene, StoryConfig, StoryOutline, TurnOutput,
};
use openai_compat::{ChatProvider, Message, Request};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Errors from narrative generation.
#[derive(Debug, Error)]
pub enum NarratorError {
    #[error("API error: {0}")]
    Api(#[from] openai_compat::Error),

    #[error("Narrator payload undecodable: {0}")]
    Decode(#[from] GenerationError),
}

/// One entry in the conversation window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: HistoryRole,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryRole {
    User,
    Assistant,
}

/// Composes narrative and owns the conversation window.
pub struct Narrator {
    provider: Arc<dyn ChatProvider>,
    params: RoleParams,
    history: Vec<HistoryEntry>,
    world_context: Option<serde_json::Value>,
    max_history_turns: usize,
}

impl Narrator {
    pub fn new(
        provider: Arc<dyn ChatProvider>,
        params: RoleParams,
        max_history_turns: usize,
    ) -> Self {
        Self {
            provider,
            params,
            history: Vec::new(),
            world_context: None,
            max_history_turns,
        }
    }

    /// The rolling conversation window, oldest first.
    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    pub fn world_context(&self) -> Option<&serde_json::Value> {
        self.world_context.as_ref()
    }

    /// Restore persisted window state.
    pub fn restore(&mut self, history: Vec<HistoryEntry>, world_context: Option<serde_json::Value>) {
        self.history = history;
        self.world_context = world_context;
        self.trim_history();
    }

    pub fn set_max_history_turns(&mut self, max_turns: usize) {
        self.max_history_turns = max_turns;
        self.trim_history();
    }

    /// Override the generation temperature (per-story configuration).
    pub fn set_temperature(&mut self, temperature: f32) {
        self.params.temperature = temperature;
    }

    /// Generate a story outline from the player's character and preferences.
    pub async fn generate_outline(
        &self,
        config: &StoryConfig,
    ) -> Result<StoryOutline, NarratorError> {
        let player = &config.player_character;
        let prefs = &config.preferences;

        let prompt = format!(
            r#"Create a story outline for an interactive narrative.

PLAYER CHARACTER:
Name: {name}
Background: {background}
Traits: {traits}
Motivations: {motivations}

STORY PREFERENCES:
Genre: {genre}
Tone: {tone}
Themes: {themes}
Length: {length:?}

Generate:
1. A compelling premise that incorporates the player character
2. A 3-5 act structure appropriate for the story length
3. 2-4 major characters (allies, rivals, antagonists) with clear goals
   that create dramatic tension with the player
4. Key locations where the story unfolds
5. 2-3 potential endings based on different paths

Return JSON:
{{
  "premise": "one paragraph premise",
  "acts": ["Act 1 description", "Act 2 description"],
  "major_characters": [
    {{
      "name": "Character Name",
      "role": "antagonist/ally/rival/romantic interest",
      "description": "brief description",
      "personality": ["trait1", "trait2"],
      "goals": ["goal1", "goal2"],
      "secrets": ["secret1"],
      "relationship_to_player": "how they relate to the player"
    }}
  ],
  "key_locations": ["Location 1", "Location 2"],
  "potential_endings": ["Ending 1", "Ending 2"]
}}"#,
            name = player.name,
            background = player.background,
            traits = player.traits.join(", "),
            motivations = player.motivations.join(", "),
            genre = prefs.genre,
            tone = prefs.tone,
            themes = if prefs.themes.is_empty() {
                "None specified".to_string()
            } else {
                prefs.themes.join(", ")
            },
            length = prefs.length,
        );

        let raw = self.complete_structured(prompt).await?;
        Ok(decode_structured(&raw)?)
    }

    /// Generate the one-time world-context block.
    ///
    /// The block is stored and prepended to every later request; it is not
    /// part of the rolling window and is never evicted. An undecodable
    /// payload is an error, not an empty context.
    pub async fn generate_world_context(
        &mut self,
        outline: &StoryOutline,
        config: &StoryConfig,
    ) -> Result<(), NarratorError> {
        let prefs = &config.preferences;

        let prompt = format!(
            r#"Generate detailed world-building for this interactive story.

PREMISE: {premise}
GENRE: {genre}
TONE: {tone}
KEY LOCATIONS: {locations}
MAJOR CHARACTERS: {characters}

Create comprehensive world context covering: cultural context, historical
background, rules of the world (what is possible and impossible), key
factions, detailed descriptions of the key locations, 10-15 established
facts that must remain consistent, tone guidelines for maintaining a
{tone} tone, and the kinds of background characters who might appear.

Return JSON:
{{
  "cultural_context": "detailed paragraph about society",
  "historical_background": "recent history that matters",
  "world_rules": {{"limitations": "..."}},
  "factions": [{{"name": "...", "goals": "...", "conflict": "..."}}],
  "locations": {{"location name": "detailed description"}},
  "established_facts": ["fact 1", "fact 2"],
  "tone_guidelines": ["guideline 1"],
  "npc_types": ["type 1"]
}}"#,
            premise = outline.premise,
            genre = prefs.genre,
            tone = prefs.tone,
            locations = outline.key_locations.join(", "),
            characters = outline
                .major_characters
                .iter()
                .map(|c| c.name.as_str())
                .collect::<Vec<_>>()
                .join(", "),
        );

        let raw = self.complete_structured(prompt).await?;
        let context: serde_json::Value = decode_structured(&raw)?;
        self.world_context = Some(context);
        Ok(())
    }

    /// Generate the opening scene.
    pub async fn create_opening_scene(
        &self,
        outline: &StoryOutline,
        player: &PlayerCharacter,
    ) -> Result<Scene, NarratorError> {
        let prompt = format!(
            r#"Create the opening scene for this story.

PREMISE: {premise}
FIRST ACT: {first_act}

PLAYER CHARACTER: {name} - {background}

The scene should set up the initial situation, introduce the player
character in their element, establish atmosphere and stakes, and give
clear hooks for player action. Do NOT include the major characters yet.

Return JSON:
{{
  "scene_id": "opening",
  "when": "time of day and context",
  "where": "location description",
  "atmosphere": "mood and sensory details",
  "present_characters": ["{name}"],
  "nearby_characters": [],
  "ongoing_events": ["event 1"],
  "facts": ["important fact about the world or situation"]
}}"#,
            premise = outline.premise,
            first_act = outline
                .acts
                .first()
                .map(String::as_str)
                .unwrap_or("Beginning of the story"),
            name = player.name,
            background = player.background,
        );

        let raw = self.complete_structured(prompt).await?;
        Ok(decode_structured(&raw)?)
    }

    /// Compose the opening narrative and seed the conversation window with
    /// exactly one user/assistant pair.
    pub async fn compose_opening(
        &mut self,
        scene: &Scene,
        outline: &StoryOutline,
    ) -> Result<TurnOutput, NarratorError> {
        let prompt = format!(
            r#"Compose the opening narrative for this interactive story.

SCENE:
When: {when}
Where: {where_}
Atmosphere: {atmosphere}
Ongoing: {ongoing}

PREMISE: {premise}

Write 300-500 words of engaging third-person past tense narrative that
establishes the setting vividly, introduces the player character in
action, creates hooks that invite exploration, and ends on a moment where
the player can naturally make a choice. Do not include dialogue from the
major characters."#,
            when = scene.when,
            where_ = scene.where_,
            atmosphere = scene.atmosphere,
            ongoing = scene.ongoing_events.join(", "),
            premise = outline.premise,
        );

        let request = self
            .params
            .apply(Request::new(self.build_messages(&prompt)));
        let narrative = self.provider.complete(request).await?;

        self.history = vec![
            HistoryEntry {
                role: HistoryRole::User,
                content: format!("[OPENING SCENE]\n{prompt}"),
            },
            HistoryEntry {
                role: HistoryRole::Assistant,
                content: narrative.clone(),
            },
        ];

        Ok(TurnOutput {
            narrative,
            visible_moves: Vec::new(),
            scene_update: Some(scene.clone()),
            continuity_flags: Vec::new(),
        })
    }

    /// Compose one turn's narrative.
    ///
    /// `accepted_moves` and `npc_actions` are ephemeral input: they shape
    /// this turn's prose but only the player input and the generated
    /// narrative enter the window.
    pub async fn compose_turn(
        &mut self,
        input: &str,
        accepted_moves: &[CharacterMove],
        npc_actions: &[String],
        scene: &Scene,
    ) -> Result<TurnOutput, NarratorError> {
        let moves_text = if accepted_moves.is_empty() {
            "None - characters observe silently".to_string()
        } else {
            accepted_moves
                .iter()
                .map(|m| {
                    let mut line = format!("- {}: {}", m.character, m.intent);
                    if let Some(dialogue) = &m.dialogue {
                        line.push_str(&format!(" (says: \"{dialogue}\")"));
                    }
                    if let Some(action) = &m.action {
                        line.push_str(&format!(" (does: {action})"));
                    }
                    line
                })
                .collect::<Vec<_>>()
                .join("\n")
        };

        let npc_text = if npc_actions.is_empty() {
            "None".to_string()
        } else {
            npc_actions
                .iter()
                .map(|a| format!("- {a}"))
                .collect::<Vec<_>>()
                .join("\n")
        };

        let prompt = format!(
            r#"Compose the narrative for this turn.

SCENE: {where_} - {atmosphere}
PRESENT: {present}

PLAYER ACTION: {input}

CHARACTER RESPONSES (for this turn only):
{moves_text}

NPC REACTIONS NEEDED:
{npc_text}

Write 200-500 words of narrative that describes the player's action and
its immediate effects, integrates character responses naturally
(preserve exact dialogue!), shows the NPC reactions, maintains the
scene's atmosphere and continuity with previous narrative, uses
third-person past tense, and ends on a natural pause for the next player
input."#,
            where_ = scene.where_,
            atmosphere = scene.atmosphere,
            present = scene.present_characters.join(", "),
        );

        let request = self
            .params
            .apply(Request::new(self.build_messages(&prompt)));
        let narrative = self.provider.complete(request).await?;

        self.push_history(input, &narrative);

        Ok(TurnOutput {
            narrative,
            visible_moves: accepted_moves.to_vec(),
            scene_update: None,
            continuity_flags: Vec::new(),
        })
    }

    /// Messages for a request: system prompt, world context (if generated),
    /// the full window, then the current turn.
    fn build_messages(&self, current_prompt: &str) -> Vec<Message> {
        let mut messages = vec![Message::system(include_str!("prompts/narrator.txt"))];

        if let Some(context) = &self.world_context {
            let rendered = serde_json::to_string_pretty(context)
                .unwrap_or_else(|_| context.to_string());
            messages.push(Message::system(format!(
                "WORLD CONTEXT (maintain consistency with these details):\n{rendered}"
            )));
        }

        for entry in &self.history {
            messages.push(match entry.role {
                HistoryRole::User => Message::user(&entry.content),
                HistoryRole::Assistant => Message::assistant(&entry.content),
            });
        }

        messages.push(Message::user(current_prompt));
        messages
    }

    fn push_history(&mut self, input: &str, narrative: &str) {
        self.history.push(HistoryEntry {
            role: HistoryRole::User,
            content: format!("PLAYER ACTION: {input}"),
        });
        self.history.push(HistoryEntry {
            role: HistoryRole::Assistant,
            content: narrative.to_string(),
        });
        self.trim_history();
    }

    // Each turn is a (user, assistant) pair; drop the oldest pairs first.
    fn trim_history(&mut self) {
        let max_entries = self.max_history_turns * 2;
        while self.history.len() > max_entries {
            self.history.remove(0);
        }
    }

    async fn complete_structured(&self, prompt: String) -> Result<String, NarratorError> {
        let params = RoleParams {
            json_mode: true,
            ..self.params
        };
        let request = params.apply(Request::new(vec![
            Message::system(include_str!("prompts/narrator.txt")),
            Message::user(prompt),
        ]));
        Ok(self.provider.complete(request).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::testing::{sample_config, sample_outline, sample_scene, MockProvider};
    use crate::schema::ResponderId;
    use serde_json::json;

    fn narrator(provider: &Arc<MockProvider>, max_turns: usize) -> Narrator {
        Narrator::new(
            provider.clone(),
            EngineConfig::default().narrator_params,
            max_turns,
        )
    }

    #[tokio::test]
    async fn test_compose_opening_seeds_one_pair() {
        let provider = Arc::new(MockProvider::new());
        let mut narrator = narrator(&provider, 10);

        provider.push_text("The candles guttered as Lyra crossed the hall.");

        let output = narrator
            .compose_opening(&sample_scene(), &sample_outline())
            .await
            .unwrap();

        assert!(output.narrative.contains("Lyra"));
        assert!(output.scene_update.is_some());
        assert_eq!(narrator.history().len(), 2);
        assert_eq!(narrator.history()[0].role, HistoryRole::User);
        assert_eq!(narrator.history()[1].role, HistoryRole::Assistant);
    }

    #[tokio::test]
    async fn test_window_trims_to_configured_turns() {
        let provider = Arc::new(MockProvider::new());
        let mut narrator = narrator(&provider, 2);
        let scene = sample_scene();

        for i in 1..=3 {
            provider.push_text(format!("Narrative for turn {i}."));
            narrator
                .compose_turn(&format!("input {i}"), &[], &[], &scene)
                .await
                .unwrap();
        }

        // Two turns retained = four entries; turn 1 is gone.
        assert_eq!(narrator.history().len(), 4);
        let joined: String = narrator
            .history()
            .iter()
            .map(|e| e.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        assert!(!joined.contains("input 1"));
        assert!(!joined.contains("Narrative for turn 1"));
        assert!(joined.contains("input 2"));
        assert!(joined.contains("input 3"));
    }

    #[tokio::test]
    async fn test_moves_are_ephemeral() {
        let provider = Arc::new(MockProvider::new());
        let mut narrator = narrator(&provider, 10);
        let scene = sample_scene();

        let mv = CharacterMove {
            character: "Corin".to_string(),
            responder: ResponderId::new(),
            intent: "taunt".to_string(),
            action: None,
            dialogue: Some("You are out of your depth.".to_string()),
            internal_thought: None,
            target: None,
        };

        provider.push_text("Corin smiled thinly.");
        let output = narrator
            .compose_turn("I confront Corin", &[mv], &[], &scene)
            .await
            .unwrap();

        assert_eq!(output.visible_moves.len(), 1);

        // The window holds input and narrative, not the move text.
        let joined: String = narrator
            .history()
            .iter()
            .map(|e| e.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        assert!(joined.contains("I confront Corin"));
        assert!(joined.contains("Corin smiled thinly."));
        assert!(!joined.contains("out of your depth"));
    }

    #[tokio::test]
    async fn test_world_context_prepended_and_never_evicted() {
        let provider = Arc::new(MockProvider::new());
        let mut narrator = narrator(&provider, 1);
        let scene = sample_scene();

        provider.push_json(json!({
            "established_facts": ["The regent never leaves the keep."]
        }));
        narrator
            .generate_world_context(&sample_outline(), &sample_config())
            .await
            .unwrap();

        // Burn through enough turns to evict everything in the window.
        for i in 0..3 {
            provider.push_text(format!("Turn {i}."));
            narrator
                .compose_turn(&format!("input {i}"), &[], &[], &scene)
                .await
                .unwrap();
        }

        let messages = narrator.build_messages("next");
        assert_eq!(messages[0].role, openai_compat::Role::System);
        assert!(messages[1]
            .content
            .contains("The regent never leaves the keep."));
        // Window capped at 1 turn: system, world context, pair, current.
        assert_eq!(messages.len(), 5);
    }

    #[tokio::test]
    async fn test_outline_decodes_from_fenced_payload() {
        let provider = Arc::new(MockProvider::new());
        let narrator = narrator(&provider, 10);

        let outline = json!({
            "premise": "A clockwork city winds down.",
            "acts": ["Act 1"],
            "major_characters": [],
            "key_locations": ["The Great Spring"],
            "potential_endings": ["The city stops"]
        });
        provider.push_text(format!("```json\n{outline}\n```"));

        let outline = narrator.generate_outline(&sample_config()).await.unwrap();
        assert_eq!(outline.premise, "A clockwork city winds down.");
    }

    #[tokio::test]
    async fn test_world_context_failure_is_an_error_not_a_default() {
        let provider = Arc::new(MockProvider::new());
        let mut narrator = narrator(&provider, 10);

        provider.push_text("I cannot produce world details right now.");

        let err = narrator
            .generate_world_context(&sample_outline(), &sample_config())
            .await
            .unwrap_err();

        assert!(matches!(err, NarratorError::Decode(_)));
        assert!(narrator.world_context().is_none());
    }
}
