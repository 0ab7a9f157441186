//! Character responders.
//!
//! A responder is one autonomous character: it exclusively owns its dossier
//! and a bounded memory window, and turns perception packets into proposed
//! moves (or the decision to stay silent). Responders never touch each
//! other's state.

use crate::config::RoleParams;
use crate::decode::{decode_structured, GenerationError};
use crate::memory::MemoryWindow;
use crate::schema::{
    AttentionLevel, CharacterConcept, CharacterResponse, Dossier, PerceptionPacket, Relationship,
    ResponderId, StyleCard, TurnRecord,
};
use openai_compat::{ChatProvider, Message, Request};
use std::sync::Arc;
use thiserror::Error;

/// How many recent turns a responder consults when deciding to act.
const RESPONSE_CONTEXT_TURNS: usize = 3;

/// Errors from a responder's generation call.
#[derive(Debug, Error)]
pub enum ResponderError {
    #[error("API error: {0}")]
    Api(#[from] openai_compat::Error),

    #[error("Response decode error: {0}")]
    Decode(#[from] GenerationError),
}

/// One autonomous character in the story.
pub struct Responder {
    dossier: Dossier,
    memory: MemoryWindow,
    provider: Arc<dyn ChatProvider>,
    params: RoleParams,
}

impl Responder {
    /// Spawn a fresh responder from a character concept.
    pub fn from_concept(
        concept: CharacterConcept,
        provider: Arc<dyn ChatProvider>,
        default_params: RoleParams,
    ) -> Self {
        let style = StyleCard {
            voice: concept.personality.iter().take(2).cloned().collect(),
            speech_patterns: concept
                .personality
                .first()
                .map(|p| vec![format!("Tends to be {p}")])
                .unwrap_or_default(),
            taboos: Vec::new(),
            catchphrases: Vec::new(),
            temperature_override: None,
        };

        let dossier = Dossier {
            name: concept.name.clone(),
            responder: ResponderId::new(),
            current_goals: concept.goals.clone(),
            concept,
            style,
            beliefs: Vec::new(),
            memories: Vec::new(),
            relationships: Default::default(),
            emotional_state: "neutral".to_string(),
        };

        Self::restore(dossier, MemoryWindow::new(), provider, default_params)
    }

    /// Rebuild a responder from persisted state.
    pub fn restore(
        dossier: Dossier,
        memory: MemoryWindow,
        provider: Arc<dyn ChatProvider>,
        default_params: RoleParams,
    ) -> Self {
        let mut params = default_params;
        if let Some(temp) = dossier.style.temperature_override {
            params.temperature = temp;
        }

        Self {
            dossier,
            memory,
            provider,
            params,
        }
    }

    pub fn id(&self) -> ResponderId {
        self.dossier.responder
    }

    pub fn name(&self) -> &str {
        &self.dossier.name
    }

    pub fn dossier(&self) -> &Dossier {
        &self.dossier
    }

    pub fn memory(&self) -> &MemoryWindow {
        &self.memory
    }

    /// Process perceived information and decide whether and how to act.
    pub async fn respond(
        &self,
        packet: &PerceptionPacket,
        attention: AttentionLevel,
    ) -> Result<CharacterResponse, ResponderError> {
        let prompt = self.build_prompt(packet, attention);

        let request = self.params.apply(Request::new(vec![
            Message::system(include_str!("prompts/character.txt")),
            Message::user(prompt),
        ]));

        let raw = self.provider.complete(request).await?;
        let response: CharacterResponse = decode_structured(&raw)?;
        Ok(response)
    }

    /// Append a turn record to the memory window (FIFO past the cap).
    pub fn update_memory(&mut self, record: TurnRecord) {
        self.memory.record(record);
    }

    /// Add newly learned facts with set semantics: duplicates are ignored
    /// and first-insertion order is preserved.
    pub fn update_beliefs(&mut self, new_facts: &[String]) {
        for fact in new_facts {
            if !self.dossier.beliefs.contains(fact) {
                self.dossier.beliefs.push(fact.clone());
            }
        }
    }

    /// Record an interaction with another character.
    pub fn update_relationship(&mut self, other: &str, interaction: impl Into<String>) {
        self.dossier
            .relationships
            .entry(other.to_string())
            .or_insert_with(|| Relationship::new("neutral"))
            .note(interaction);
    }

    /// Replace the character's emotional state.
    pub fn update_emotion(&mut self, state: impl Into<String>) {
        self.dossier.emotional_state = state.into();
    }

    /// Add a key event to long-term memory (set semantics).
    pub fn remember(&mut self, memory: impl Into<String>) {
        let memory = memory.into();
        if !self.dossier.memories.contains(&memory) {
            self.dossier.memories.push(memory);
        }
    }

    fn build_prompt(&self, packet: &PerceptionPacket, attention: AttentionLevel) -> String {
        let d = &self.dossier;
        let mut prompt = String::new();

        prompt.push_str(&format!("CHARACTER: {}\n", d.name));
        prompt.push_str(&format!("Role: {}\n", d.concept.role));
        prompt.push_str(&format!("Personality: {}\n", d.concept.personality.join(", ")));
        if !d.current_goals.is_empty() {
            prompt.push_str(&format!("Current goals: {}\n", d.current_goals.join(", ")));
        }
        prompt.push_str(&format!("Emotional state: {}\n", d.emotional_state));

        prompt.push_str("\nSTYLE:\n");
        prompt.push_str(&format!("Voice: {}\n", d.style.voice.join(", ")));
        if !d.style.speech_patterns.is_empty() {
            prompt.push_str(&format!(
                "Speech patterns: {}\n",
                d.style.speech_patterns.join(", ")
            ));
        }
        if !d.style.catchphrases.is_empty() {
            prompt.push_str(&format!("Catchphrases: {}\n", d.style.catchphrases.join(", ")));
        }

        if !d.beliefs.is_empty() {
            prompt.push_str("\nBELIEFS:\n");
            for belief in &d.beliefs {
                prompt.push_str(&format!("- {belief}\n"));
            }
        }

        if !d.concept.secrets.is_empty() {
            prompt.push_str("\nSECRETS (never reveal directly):\n");
            for secret in &d.concept.secrets {
                prompt.push_str(&format!("- {secret}\n"));
            }
        }

        if !d.relationships.is_empty() {
            prompt.push_str("\nRELATIONSHIPS:\n");
            for (name, rel) in &d.relationships {
                prompt.push_str(&format!("- {name}: {}", rel.stance));
                if let Some(last) = rel.notes.last() {
                    prompt.push_str(&format!(" (recently: {last})"));
                }
                prompt.push('\n');
            }
        }

        let recent = self.memory.recent(RESPONSE_CONTEXT_TURNS);
        if !recent.is_empty() {
            prompt.push_str("\nRECENT EVENTS:\n");
            for record in recent {
                prompt.push_str(&format!("Turn {}: {}\n", record.turn, record.summary));
            }
        }

        let attention = match attention {
            AttentionLevel::Full => "full",
            AttentionLevel::Partial => "partial",
            AttentionLevel::Peripheral => "peripheral",
        };
        prompt.push_str(&format!("\nWHAT YOU PERCEIVE (attention level: {attention}):\n"));
        prompt.push_str(&format!("Scene: {}\n", packet.scene_description));
        if !packet.observed_actions.is_empty() {
            prompt.push_str("Observed actions:\n");
            for action in &packet.observed_actions {
                prompt.push_str(&format!("- {action}\n"));
            }
        }
        if !packet.overheard_dialogue.is_empty() {
            prompt.push_str("Overheard dialogue:\n");
            for line in &packet.overheard_dialogue {
                prompt.push_str(&format!("- \"{line}\"\n"));
            }
        }
        if !packet.whispers.is_empty() {
            prompt.push_str("Whispers and rumors:\n");
            for whisper in &packet.whispers {
                prompt.push_str(&format!("- {whisper}\n"));
            }
        }
        if !packet.sensory_details.is_empty() {
            prompt.push_str("Sensory details:\n");
            for detail in &packet.sensory_details {
                prompt.push_str(&format!("- {detail}\n"));
            }
        }

        prompt.push_str(&format!(
            r#"
Decide how to respond. You may act, speak, think privately, or simply
observe without acting (responds: false).

Return ONLY valid JSON:
{{
  "character": "{name}",
  "responder": "{id}",
  "responds": true or false,
  "move": {{
    "character": "{name}",
    "responder": "{id}",
    "intent": "your intent, e.g. 'deflect', 'charm', 'investigate'",
    "action": "physical action or null",
    "dialogue": "spoken words or null",
    "internal_thought": "private thought or null",
    "target": "who or what you focus on, or null"
  }} or null,
  "observes_only": true or false,
  "observation_notes": "what you notice, or null"
}}"#,
            name = d.name,
            id = d.responder,
        ));

        prompt
    }
}
