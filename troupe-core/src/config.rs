//! Engine configuration.
//!
//! Role parameters mirror the generation settings each pipeline role uses:
//! the director runs cold and structured, the narrator warm and free-form,
//! responders in between with a tight output budget.

/// Parameters for a specific role's generation calls.
#[derive(Debug, Clone, Copy)]
pub struct RoleParams {
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: usize,
    pub json_mode: bool,
}

impl RoleParams {
    /// Apply these parameters to a request.
    pub fn apply(&self, request: openai_compat::Request) -> openai_compat::Request {
        request
            .with_temperature(self.temperature)
            .with_top_p(self.top_p)
            .with_max_tokens(self.max_tokens)
            .with_json_mode(self.json_mode)
    }
}

/// Configuration for the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Concurrency cap for responder dispatch within one turn.
    pub max_active_characters_per_turn: usize,

    /// Turns the narrator keeps in its rolling conversation window.
    pub narrator_history_turns: usize,

    pub director_params: RoleParams,
    pub narrator_params: RoleParams,
    pub character_params: RoleParams,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_active_characters_per_turn: 4,
            narrator_history_turns: 30,
            director_params: RoleParams {
                temperature: 0.2,
                top_p: 0.9,
                max_tokens: 512,
                json_mode: true,
            },
            narrator_params: RoleParams {
                temperature: 0.7,
                top_p: 0.95,
                max_tokens: 700,
                json_mode: false,
            },
            character_params: RoleParams {
                temperature: 0.7,
                top_p: 0.9,
                max_tokens: 180,
                json_mode: true,
            },
        }
    }
}

impl EngineConfig {
    /// Create config from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(n) = env_parse("MAX_ACTIVE_CHARACTERS_PER_TURN") {
            config.max_active_characters_per_turn = n;
        }
        if let Some(n) = env_parse("NARRATOR_HISTORY_TURNS") {
            config.narrator_history_turns = n;
        }
        if let Some(t) = env_parse("DIRECTOR_TEMPERATURE") {
            config.director_params.temperature = t;
        }
        if let Some(t) = env_parse("NARRATOR_TEMPERATURE") {
            config.narrator_params.temperature = t;
        }
        if let Some(t) = env_parse("CHARACTER_DEFAULT_TEMPERATURE") {
            config.character_params.temperature = t;
        }

        config
    }

    /// Set the narrator window size.
    pub fn with_narrator_history_turns(mut self, turns: usize) -> Self {
        self.narrator_history_turns = turns;
        self
    }

    /// Set the responder dispatch cap.
    pub fn with_max_active_characters(mut self, cap: usize) -> Self {
        self.max_active_characters_per_turn = cap;
        self
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
