//! Turn sequencing and the session registry.
//!
//! [`StorySession`] drives one story through create -> start -> repeated
//! turn processing, with save/load available throughout. [`Engine`] is the
//! context object that owns the provider, the snapshot store, and one
//! sequencer per active story; there are no process-wide singletons.
//!
//! Turns of one session are serialized by construction: `process_turn`
//! takes `&mut self`, and the conversation and memory windows are mutated
//! in place. Distinct sessions are independent state; arbitrating between
//! them is the caller's concern.

use crate::cast::Cast;
use crate::config::{EngineConfig, RoleParams};
use crate::director::{Director, RoutingError, ValidationError};
use crate::narrator::{Narrator, NarratorError};
use crate::persist::{
    now_rfc3339, FileStore, PersistError, ResponderSnapshot, SnapshotStore, StorySnapshot,
};
use crate::schema::{
    RoleTemperatures, Scene, StoryConfig, StoryOutline, TurnOutput, TurnRecord, WorldState,
};
use openai_compat::{ChatClient, ChatProvider};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by the session entry points.
///
/// Nothing here is retried or recovered internally; every failure reaches
/// the caller. A failed turn leaves session state untouched, so earlier
/// stages' generation calls are reissued in full on retry (duplicate
/// external calls are a known gap, not a feature).
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Routing error: {0}")]
    Routing(#[from] RoutingError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Narration error: {0}")]
    Narration(#[from] NarratorError),

    #[error("Persistence error: {0}")]
    Persist(#[from] PersistError),
}

/// One story's turn sequencer.
pub struct StorySession {
    story_id: String,
    provider: Arc<dyn ChatProvider>,
    store: Arc<dyn SnapshotStore>,
    engine_config: EngineConfig,
    character_params: RoleParams,

    config: Option<StoryConfig>,
    outline: Option<StoryOutline>,
    scene: Option<Scene>,
    world_state: WorldState,
    cast: Cast,
    director: Director,
    narrator: Narrator,
    turn_history: Vec<TurnRecord>,
}

impl StorySession {
    fn new(
        story_id: String,
        provider: Arc<dyn ChatProvider>,
        store: Arc<dyn SnapshotStore>,
        engine_config: EngineConfig,
    ) -> Self {
        let director = Director::new(provider.clone(), engine_config.director_params);
        let narrator = Narrator::new(
            provider.clone(),
            engine_config.narrator_params,
            engine_config.narrator_history_turns,
        );

        Self {
            story_id,
            character_params: engine_config.character_params,
            provider,
            store,
            engine_config,
            config: None,
            outline: None,
            scene: None,
            world_state: WorldState::default(),
            cast: Cast::new(),
            director,
            narrator,
            turn_history: Vec::new(),
        }
    }

    fn set_config(&mut self, config: StoryConfig) {
        self.world_state = WorldState {
            story_id: self.story_id.clone(),
            player_name: config.player_character.name.clone(),
            genre: config.preferences.genre.clone(),
            tone: config.preferences.tone.clone(),
        };
        self.apply_temperatures(&config.temperatures);
        self.config = Some(config);
    }

    fn apply_temperatures(&mut self, temperatures: &RoleTemperatures) {
        self.director.set_temperature(temperatures.director);
        self.narrator.set_temperature(temperatures.narrator);
        self.character_params.temperature = temperatures.character_default;
    }

    /// Generate and store the story outline.
    async fn generate_outline(&mut self) -> Result<StoryOutline, SessionError> {
        let config = self
            .config
            .clone()
            .ok_or_else(|| SessionError::Config(format!("story {} has no config", self.story_id)))?;

        let outline = self.narrator.generate_outline(&config).await?;
        self.outline = Some(outline.clone());
        Ok(outline)
    }

    /// Spawn the cast and compose the opening.
    pub async fn start(&mut self) -> Result<TurnOutput, SessionError> {
        let config = self
            .config
            .clone()
            .ok_or_else(|| SessionError::Config(format!("story {} has no config", self.story_id)))?;
        let outline = self.outline.clone().ok_or_else(|| {
            SessionError::Config(format!("story {} has no outline; create it first", self.story_id))
        })?;

        log::info!("starting story {}", self.story_id);

        self.narrator
            .generate_world_context(&outline, &config)
            .await?;

        self.cast.spawn_all(
            &outline.major_characters,
            &self.provider,
            self.character_params,
        );
        log::debug!("spawned {} responders", self.cast.len());

        let scene = self
            .narrator
            .create_opening_scene(&outline, &config.player_character)
            .await?;
        let output = self.narrator.compose_opening(&scene, &outline).await?;

        self.scene = Some(scene);
        self.turn_history.push(TurnRecord {
            turn: 0,
            input: String::new(),
            narrative: output.narrative.clone(),
            summary: "Story begins".to_string(),
        });

        self.persist().await?;
        Ok(output)
    }

    /// Process one player turn.
    pub async fn process_turn(&mut self, input: &str) -> Result<TurnOutput, SessionError> {
        if input.starts_with('/') {
            return self.handle_meta_command(input).await;
        }

        let scene = self.scene.clone().ok_or_else(|| {
            SessionError::Config(format!("story {} has no active scene", self.story_id))
        })?;

        let recent: Vec<String> = self
            .turn_history
            .iter()
            .rev()
            .take(5)
            .rev()
            .map(|t| t.summary.clone())
            .collect();

        // 1. Route perception.
        let dossiers = self.cast.dossiers();
        let decisions = self
            .director
            .route_perception(&scene, input, &dossiers, &recent)
            .await?;

        // 2. Fan out to responders under the concurrency cap. The turn
        // proceeds with whatever responses came back; failures are reported
        // and the affected characters simply do not act this turn.
        let outcome = self
            .cast
            .dispatch(
                &decisions,
                self.engine_config.max_active_characters_per_turn,
            )
            .await;
        for failure in &outcome.failures {
            log::warn!(
                "story {}: responder {} ({}) failed: {}",
                self.story_id,
                failure.character,
                failure.responder,
                failure.error
            );
        }

        // 3. Reconcile proposed moves.
        let validation = self
            .director
            .validate_moves(&outcome.responses, &scene, &recent)
            .await?;

        // 4. Compose the narrative. Nothing below mutates session state
        // until this has succeeded, so a failed turn can be retried whole.
        let output = self
            .narrator
            .compose_turn(
                input,
                &validation.accepted_moves,
                &validation.npc_actions,
                &scene,
            )
            .await?;

        // 5-7. Update memories, apply any scene change, record the turn.
        let turn = self.turn_history.last().map_or(0, |t| t.turn) + 1;
        let record = TurnRecord {
            turn,
            input: input.to_string(),
            narrative: output.narrative.clone(),
            summary: summarize_input(input),
        };
        self.cast.update_all_memories(&record);

        if let Some(updated) = &output.scene_update {
            self.scene = Some(updated.clone());
        }
        self.turn_history.push(record);

        // 8. Persist the full snapshot.
        self.persist().await?;

        Ok(output)
    }

    async fn handle_meta_command(&mut self, command: &str) -> Result<TurnOutput, SessionError> {
        match command {
            "/scene" => {
                let narrative = match &self.scene {
                    Some(scene) => format!(
                        "CURRENT SCENE:\nWhere: {}\nWhen: {}\nAtmosphere: {}\nPresent: {}\nNearby: {}",
                        scene.where_,
                        scene.when,
                        scene.atmosphere,
                        scene.present_characters.join(", "),
                        if scene.nearby_characters.is_empty() {
                            "None".to_string()
                        } else {
                            scene.nearby_characters.join(", ")
                        },
                    ),
                    None => "No active scene.".to_string(),
                };
                Ok(TurnOutput::message(narrative))
            }

            "/save" => {
                self.persist().await?;
                Ok(TurnOutput::message("Story saved successfully."))
            }

            "/cast" => {
                if self.cast.is_empty() {
                    return Ok(TurnOutput::message("No characters spawned yet."));
                }
                let list = self
                    .cast
                    .iter()
                    .map(|r| format!("- {} ({})", r.name(), r.dossier().concept.role))
                    .collect::<Vec<_>>()
                    .join("\n");
                Ok(TurnOutput::message(format!("ACTIVE CHARACTERS:\n{list}")))
            }

            _ => Ok(TurnOutput::message(format!("Unknown command: {command}"))),
        }
    }

    /// Persist the full session snapshot.
    pub async fn persist(&self) -> Result<(), SessionError> {
        let snapshot = self.snapshot();
        self.store.put(&self.story_id, &snapshot).await?;
        Ok(())
    }

    fn snapshot(&self) -> StorySnapshot {
        let responders = self
            .cast
            .iter()
            .map(|r| {
                (
                    r.id(),
                    ResponderSnapshot {
                        dossier: r.dossier().clone(),
                        memory: r.memory().clone(),
                    },
                )
            })
            .collect();

        StorySnapshot {
            story_id: self.story_id.clone(),
            saved_at: now_rfc3339(),
            config: self.config.clone(),
            outline: self.outline.clone(),
            scene: self.scene.clone(),
            responders,
            turn_history: self.turn_history.clone(),
            world_state: self.world_state.clone(),
            narrator_history: self.narrator.history().to_vec(),
            narrator_world_context: self.narrator.world_context().cloned(),
        }
    }

    /// Rebuild a session, its responders, and the narrator's windows from a
    /// snapshot.
    fn from_snapshot(
        snapshot: StorySnapshot,
        provider: Arc<dyn ChatProvider>,
        store: Arc<dyn SnapshotStore>,
        engine_config: EngineConfig,
    ) -> Self {
        let mut session = Self::new(snapshot.story_id, provider, store, engine_config);

        if let Some(config) = snapshot.config {
            session.set_config(config);
        }
        session.outline = snapshot.outline;
        session.scene = snapshot.scene;
        session.world_state = snapshot.world_state;
        session.turn_history = snapshot.turn_history;
        session
            .narrator
            .restore(snapshot.narrator_history, snapshot.narrator_world_context);

        for (_, responder) in snapshot.responders {
            session.cast.restore(
                responder.dossier,
                responder.memory,
                session.provider.clone(),
                session.character_params,
            );
        }

        session
    }

    pub fn story_id(&self) -> &str {
        &self.story_id
    }

    pub fn config(&self) -> Option<&StoryConfig> {
        self.config.as_ref()
    }

    pub fn outline(&self) -> Option<&StoryOutline> {
        self.outline.as_ref()
    }

    pub fn scene(&self) -> Option<&Scene> {
        self.scene.as_ref()
    }

    pub fn world_state(&self) -> &WorldState {
        &self.world_state
    }

    pub fn cast(&self) -> &Cast {
        &self.cast
    }

    pub fn narrator(&self) -> &Narrator {
        &self.narrator
    }

    pub fn turn_history(&self) -> &[TurnRecord] {
        &self.turn_history
    }
}

/// The engine context: provider, store, config, and one sequencer per
/// active story.
pub struct Engine {
    provider: Arc<dyn ChatProvider>,
    store: Arc<dyn SnapshotStore>,
    config: EngineConfig,
    sessions: HashMap<String, StorySession>,
}

impl Engine {
    pub fn new(
        provider: Arc<dyn ChatProvider>,
        store: Arc<dyn SnapshotStore>,
        config: EngineConfig,
    ) -> Self {
        Self {
            provider,
            store,
            config,
            sessions: HashMap::new(),
        }
    }

    /// Build an engine from environment variables with file-backed saves
    /// under `./saves`.
    pub fn from_env() -> Self {
        Self::new(
            Arc::new(ChatClient::from_env()),
            Arc::new(FileStore::new("./saves")),
            EngineConfig::from_env(),
        )
    }

    /// Create a story: register a session, generate its outline, persist.
    ///
    /// The configuration is persisted before the outline call so player
    /// preferences survive a failed generation.
    pub async fn create_story(
        &mut self,
        config: StoryConfig,
    ) -> Result<(String, StoryOutline), SessionError> {
        let story_id = story_id_for(&config.player_character.name);
        log::info!("creating story {story_id}");

        let mut session = StorySession::new(
            story_id.clone(),
            self.provider.clone(),
            self.store.clone(),
            self.config.clone(),
        );
        session.set_config(config);
        self.sessions.insert(story_id.clone(), session);

        let session = self.sessions.get_mut(&story_id).expect("just inserted");
        session.persist().await?;
        let outline = session.generate_outline().await?;
        session.persist().await?;

        Ok((story_id, outline))
    }

    /// Start a created story: spawn the cast and compose the opening.
    pub async fn start_story(&mut self, story_id: &str) -> Result<TurnOutput, SessionError> {
        self.ensure_session(story_id).await?.start().await
    }

    /// Process one turn of a story.
    pub async fn process_turn(
        &mut self,
        story_id: &str,
        input: &str,
    ) -> Result<TurnOutput, SessionError> {
        self.ensure_session(story_id).await?.process_turn(input).await
    }

    /// Persist a story's snapshot.
    pub async fn save_story(&mut self, story_id: &str) -> Result<(), SessionError> {
        self.ensure_session(story_id).await?.persist().await
    }

    /// Load (or reload) a story from the snapshot store.
    pub async fn load_story(&mut self, story_id: &str) -> Result<(), SessionError> {
        let snapshot = self
            .store
            .get(story_id)
            .await?
            .ok_or_else(|| PersistError::Missing {
                story_id: story_id.to_string(),
            })?;

        let session = StorySession::from_snapshot(
            snapshot,
            self.provider.clone(),
            self.store.clone(),
            self.config.clone(),
        );
        self.sessions.insert(story_id.to_string(), session);
        Ok(())
    }

    /// The active session for a story, if registered.
    pub fn session(&self, story_id: &str) -> Option<&StorySession> {
        self.sessions.get(story_id)
    }

    async fn ensure_session(&mut self, story_id: &str) -> Result<&mut StorySession, SessionError> {
        if !self.sessions.contains_key(story_id) {
            self.load_story(story_id).await?;
        }
        Ok(self
            .sessions
            .get_mut(story_id)
            .expect("session registered above"))
    }
}

/// Derive a story id from the player's name plus a random suffix.
fn story_id_for(player_name: &str) -> String {
    let slug: String = player_name
        .to_lowercase()
        .chars()
        .map(|c| if c == ' ' { '_' } else { c })
        .filter(|c| c.is_alphanumeric() || *c == '_')
        .collect();
    let slug = if slug.is_empty() {
        "story".to_string()
    } else {
        slug
    };

    let suffix = Uuid::new_v4().simple().to_string();
    format!("{slug}_{}", &suffix[..8])
}

fn summarize_input(input: &str) -> String {
    let truncated: String = input.chars().take(50).collect();
    if truncated.len() < input.len() {
        format!("Player: {truncated}...")
    } else {
        format!("Player: {truncated}")
    }
}
