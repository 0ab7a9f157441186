//! The director: perception routing and move validation.
//!
//! The director makes the cold decisions of the pipeline. It asks the model
//! who perceives what and which proposed moves stand, but its own contract
//! is narrow: build the request context, decode the reply, and check it
//! against what was actually asked. A decision set referencing an unknown
//! responder is rejected wholesale; an answer that drops or duplicates a
//! proposed move violates the partition invariant and never reaches the
//! narrator.

use crate::config::RoleParams;
use crate::decode::{decode_structured, GenerationError};
use crate::schema::{
    CharacterMove, CharacterResponse, Dossier, ResponderId, RoutingDecision, Scene,
    ValidationOutcome,
};
use openai_compat::{ChatProvider, Message, Request};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;

/// Errors from perception routing.
#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("API error: {0}")]
    Api(#[from] openai_compat::Error),

    #[error("Routing decisions undecodable: {0}")]
    Decode(#[from] GenerationError),

    #[error("Routing decision references unknown responder {responder} ({character})")]
    UnknownResponder {
        character: String,
        responder: ResponderId,
    },
}

/// Errors from move validation.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("API error: {0}")]
    Api(#[from] openai_compat::Error),

    #[error("Validation outcome undecodable: {0}")]
    Decode(#[from] GenerationError),

    #[error("Validation partition violated: {detail}")]
    Partition { detail: String },
}

#[derive(Debug, Deserialize)]
struct RoutingPlan {
    decisions: Vec<RoutingDecision>,
}

/// Routes information to characters and validates their moves.
pub struct Director {
    provider: Arc<dyn ChatProvider>,
    params: RoleParams,
}

impl Director {
    pub fn new(provider: Arc<dyn ChatProvider>, params: RoleParams) -> Self {
        Self { provider, params }
    }

    /// Override the generation temperature (per-story configuration).
    pub fn set_temperature(&mut self, temperature: f32) {
        self.params.temperature = temperature;
    }

    /// Decide, per responder, whether and what they perceive this turn.
    ///
    /// Produces exactly the decision set the model returned, unmodified,
    /// after checking that every decision references a known responder. A
    /// payload that cannot be decoded yields no partial subset.
    pub async fn route_perception(
        &self,
        scene: &Scene,
        input: &str,
        dossiers: &[&Dossier],
        recent_history: &[String],
    ) -> Result<Vec<RoutingDecision>, RoutingError> {
        let prompt = self.build_routing_prompt(scene, input, dossiers, recent_history);

        let request = self.params.apply(Request::new(vec![
            Message::system(include_str!("prompts/director.txt")),
            Message::user(prompt),
        ]));

        let raw = self.provider.complete(request).await?;
        let plan: RoutingPlan = decode_structured(&raw)?;

        let known: HashSet<ResponderId> = dossiers.iter().map(|d| d.responder).collect();
        for decision in &plan.decisions {
            if !known.contains(&decision.responder) {
                return Err(RoutingError::UnknownResponder {
                    character: decision.character.clone(),
                    responder: decision.responder,
                });
            }
        }

        Ok(plan.decisions)
    }

    /// Reconcile proposed moves into accepted and rejected sets.
    ///
    /// With no proposed moves this short-circuits to an empty outcome
    /// without a generation call. Otherwise the decoded outcome must
    /// partition the proposed moves exactly: every move in one set, none
    /// duplicated, none dropped.
    pub async fn validate_moves(
        &self,
        responses: &[CharacterResponse],
        scene: &Scene,
        recent_history: &[String],
    ) -> Result<ValidationOutcome, ValidationError> {
        let moves: Vec<&CharacterMove> = responses
            .iter()
            .filter(|r| r.responds)
            .filter_map(|r| r.proposed_move.as_ref())
            .collect();

        if moves.is_empty() {
            return Ok(ValidationOutcome::default());
        }

        let prompt = self.build_validation_prompt(&moves, scene, recent_history);

        let request = self.params.apply(Request::new(vec![
            Message::system(include_str!("prompts/director.txt")),
            Message::user(prompt),
        ]));

        let raw = self.provider.complete(request).await?;
        let outcome: ValidationOutcome = decode_structured(&raw)?;

        enforce_partition(&moves, &outcome)?;
        Ok(outcome)
    }

    fn build_routing_prompt(
        &self,
        scene: &Scene,
        input: &str,
        dossiers: &[&Dossier],
        recent_history: &[String],
    ) -> String {
        let mut characters = String::new();
        for dossier in dossiers {
            let position = scene.position_of(&dossier.name);
            let goal = dossier
                .current_goals
                .first()
                .map(String::as_str)
                .unwrap_or("none");
            characters.push_str(&format!(
                "- {} (responder: {}): {position}, current goal: {goal}\n",
                dossier.name, dossier.responder
            ));
        }

        let history = if recent_history.is_empty() {
            "Story just beginning".to_string()
        } else {
            recent_history.join("\n")
        };

        format!(
            r#"Decide which characters should be aware of this event and what they perceive.

SCENE: {where_}
Present in scene: {present}
Nearby (can potentially observe): {nearby}

PLAYER ACTION: {input}

CHARACTERS:
{characters}
RECENT CONTEXT:
{history}

For each character decide:
1. Should they receive information about this event?
2. If yes, what specifically do they observe?
3. What is their attention level? (full/partial/peripheral)

Consider:
- Characters present in the scene get full information
- Nearby characters might overhear or glimpse things (partial)
- Remote characters normally perceive nothing unless they have special means
- Goals and abilities affect what a character notices

Return JSON:
{{
  "decisions": [
    {{
      "character": "Character Name",
      "responder": "responder id from the list above",
      "receives": true or false,
      "packet": {{
        "scene_description": "what they see of the scene",
        "observed_actions": ["actions they observe"],
        "overheard_dialogue": ["what they hear"],
        "whispers": [],
        "sensory_details": ["smells, sounds, ..."]
      }} or null,
      "reason": "why they do or don't receive information",
      "attention": "full/partial/peripheral"
    }}
  ]
}}"#,
            where_ = scene.where_,
            present = scene.present_characters.join(", "),
            nearby = if scene.nearby_characters.is_empty() {
                "None".to_string()
            } else {
                scene.nearby_characters.join(", ")
            },
        )
    }

    fn build_validation_prompt(
        &self,
        moves: &[&CharacterMove],
        scene: &Scene,
        recent_history: &[String],
    ) -> String {
        let moves_json =
            serde_json::to_string_pretty(moves).unwrap_or_else(|_| "[]".to_string());

        let history = if recent_history.is_empty() {
            "Story just beginning".to_string()
        } else {
            recent_history.join("\n")
        };

        format!(
            r#"Validate these proposed character moves and decide which to accept.

SCENE: {where_} - {atmosphere}
Present: {present}
Established facts: {facts}

RECENT CONTEXT:
{history}

PROPOSED MOVES:
{moves_json}

For each move determine:
1. Is it physically possible given the scene?
2. Does it contradict established facts?
3. If moves conflict, which takes priority?
4. What NPC reactions are needed?
5. Are there environmental changes?

Every proposed move must appear in exactly one of accepted_moves or
rejected_moves, unchanged apart from validation. Do not invent moves.

Return JSON:
{{
  "accepted_moves": [ {{ ...the move object exactly as proposed... }} ],
  "rejected_moves": [
    {{
      "move": {{ ...the move object exactly as proposed... }},
      "reason": "why it was rejected",
      "edit_suggestion": "how to fix it, or null"
    }}
  ],
  "npc_actions": ["NPC reaction 1"],
  "environment_changes": [],
  "continuity_notes": []
}}"#,
            where_ = scene.where_,
            atmosphere = scene.atmosphere,
            present = scene.present_characters.join(", "),
            facts = if scene.facts.is_empty() {
                "None established".to_string()
            } else {
                scene.facts.join(", ")
            },
        )
    }
}

/// Check that accepted + rejected exactly partition the proposed moves.
fn enforce_partition(
    proposed: &[&CharacterMove],
    outcome: &ValidationOutcome,
) -> Result<(), ValidationError> {
    let mut remaining: Vec<ResponderId> = proposed.iter().map(|m| m.responder).collect();

    let returned = outcome
        .accepted_moves
        .iter()
        .map(|m| (&m.character, m.responder))
        .chain(
            outcome
                .rejected_moves
                .iter()
                .map(|r| (&r.rejected.character, r.rejected.responder)),
        );

    for (character, responder) in returned {
        match remaining.iter().position(|id| *id == responder) {
            Some(index) => {
                remaining.remove(index);
            }
            None => {
                return Err(ValidationError::Partition {
                    detail: format!(
                        "move for {character} ({responder}) was duplicated or never proposed"
                    ),
                });
            }
        }
    }

    if let Some(dropped) = remaining.first() {
        return Err(ValidationError::Partition {
            detail: format!("proposed move for responder {dropped} was silently dropped"),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::schema::AttentionLevel;
    use crate::testing::{sample_scene, MockProvider};
    use serde_json::json;

    fn director(provider: &Arc<MockProvider>) -> Director {
        Director::new(provider.clone(), EngineConfig::default().director_params)
    }

    fn dossier(name: &str) -> Dossier {
        Dossier {
            name: name.to_string(),
            responder: ResponderId::new(),
            concept: crate::testing::concept(name),
            style: Default::default(),
            beliefs: vec![],
            current_goals: vec!["stay alive".to_string()],
            memories: vec![],
            relationships: Default::default(),
            emotional_state: "neutral".to_string(),
        }
    }

    fn a_move(character: &str, responder: ResponderId) -> CharacterMove {
        CharacterMove {
            character: character.to_string(),
            responder,
            intent: "charm".to_string(),
            action: None,
            dialogue: Some("A pleasure.".to_string()),
            internal_thought: None,
            target: None,
        }
    }

    fn a_response(character: &str, responder: ResponderId) -> CharacterResponse {
        CharacterResponse {
            character: character.to_string(),
            responder,
            responds: true,
            proposed_move: Some(a_move(character, responder)),
            observes_only: false,
            observation_notes: None,
        }
    }

    #[tokio::test]
    async fn test_route_passes_decisions_through() {
        let provider = Arc::new(MockProvider::new());
        let director = director(&provider);
        let scene = sample_scene();
        let ada = dossier("Ada");

        provider.push_json(json!({
            "decisions": [{
                "character": "Ada",
                "responder": ada.responder,
                "receives": true,
                "packet": { "scene_description": "The hall at dusk." },
                "reason": "present",
                "attention": "full"
            }]
        }));

        let decisions = director
            .route_perception(&scene, "I enter the hall", &[&ada], &[])
            .await
            .unwrap();

        assert_eq!(decisions.len(), 1);
        assert!(decisions[0].receives);
        assert_eq!(decisions[0].attention, AttentionLevel::Full);
        assert_eq!(decisions[0].reason, "present");
    }

    #[tokio::test]
    async fn test_route_rejects_unknown_responder() {
        let provider = Arc::new(MockProvider::new());
        let director = director(&provider);
        let scene = sample_scene();
        let ada = dossier("Ada");

        provider.push_json(json!({
            "decisions": [{
                "character": "Ghost",
                "responder": ResponderId::new(),
                "receives": false,
                "packet": null,
                "reason": "remote",
                "attention": "peripheral"
            }]
        }));

        let err = director
            .route_perception(&scene, "I look around", &[&ada], &[])
            .await
            .unwrap_err();

        assert!(matches!(err, RoutingError::UnknownResponder { .. }));
    }

    #[tokio::test]
    async fn test_route_fails_on_malformed_payload() {
        let provider = Arc::new(MockProvider::new());
        let director = director(&provider);
        let scene = sample_scene();
        let ada = dossier("Ada");

        provider.push_text("I decline to answer in JSON today.");

        let err = director
            .route_perception(&scene, "I look around", &[&ada], &[])
            .await
            .unwrap_err();

        assert!(matches!(err, RoutingError::Decode(_)));
    }

    #[tokio::test]
    async fn test_validate_short_circuits_without_moves() {
        let provider = Arc::new(MockProvider::new());
        let director = director(&provider);
        let scene = sample_scene();

        // One response that declined to act: nothing to validate.
        let declined = CharacterResponse {
            character: "Ada".to_string(),
            responder: ResponderId::new(),
            responds: false,
            proposed_move: None,
            observes_only: true,
            observation_notes: None,
        };

        let outcome = director
            .validate_moves(&[declined], &scene, &[])
            .await
            .unwrap();

        assert!(outcome.accepted_moves.is_empty());
        assert!(outcome.rejected_moves.is_empty());
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_validate_partitions_moves() {
        let provider = Arc::new(MockProvider::new());
        let director = director(&provider);
        let scene = sample_scene();

        let ada = ResponderId::new();
        let brin = ResponderId::new();
        let responses = vec![a_response("Ada", ada), a_response("Brin", brin)];

        provider.push_json(json!({
            "accepted_moves": [a_move("Ada", ada)],
            "rejected_moves": [{
                "move": a_move("Brin", brin),
                "reason": "contradicts an established fact",
                "edit_suggestion": "address the regent instead"
            }],
            "npc_actions": ["the crowd murmurs"],
            "environment_changes": [],
            "continuity_notes": []
        }));

        let outcome = director
            .validate_moves(&responses, &scene, &[])
            .await
            .unwrap();

        assert_eq!(outcome.accepted_moves.len(), 1);
        assert_eq!(outcome.rejected_moves.len(), 1);
        assert_eq!(outcome.npc_actions, vec!["the crowd murmurs"]);
        assert_eq!(
            outcome.rejected_moves[0].reason.as_deref(),
            Some("contradicts an established fact")
        );
    }

    #[tokio::test]
    async fn test_validate_rejects_dropped_move() {
        let provider = Arc::new(MockProvider::new());
        let director = director(&provider);
        let scene = sample_scene();

        let ada = ResponderId::new();
        let brin = ResponderId::new();
        let responses = vec![a_response("Ada", ada), a_response("Brin", brin)];

        // Brin's move vanished from the answer.
        provider.push_json(json!({
            "accepted_moves": [a_move("Ada", ada)],
            "rejected_moves": []
        }));

        let err = director
            .validate_moves(&responses, &scene, &[])
            .await
            .unwrap_err();

        assert!(matches!(err, ValidationError::Partition { .. }));
    }

    #[tokio::test]
    async fn test_validate_rejects_duplicated_move() {
        let provider = Arc::new(MockProvider::new());
        let director = director(&provider);
        let scene = sample_scene();

        let ada = ResponderId::new();
        let responses = vec![a_response("Ada", ada)];

        // The same move shows up accepted and rejected.
        provider.push_json(json!({
            "accepted_moves": [a_move("Ada", ada)],
            "rejected_moves": [{
                "move": a_move("Ada", ada),
                "reason": "conflicting answer"
            }]
        }));

        let err = director
            .validate_moves(&responses, &scene, &[])
            .await
            .unwrap_err();

        assert!(matches!(err, ValidationError::Partition { .. }));
    }

    #[tokio::test]
    async fn test_validate_rejects_invented_move() {
        let provider = Arc::new(MockProvider::new());
        let director = director(&provider);
        let scene = sample_scene();

        let ada = ResponderId::new();
        let responses = vec![a_response("Ada", ada)];

        provider.push_json(json!({
            "accepted_moves": [a_move("Ada", ada), a_move("Nobody", ResponderId::new())],
            "rejected_moves": []
        }));

        let err = director
            .validate_moves(&responses, &scene, &[])
            .await
            .unwrap_err();

        assert!(matches!(err, ValidationError::Partition { .. }));
    }
}
