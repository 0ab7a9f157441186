//! Cast management and bounded response dispatch.
//!
//! The cast owns every spawned responder and fans perception packets out to
//! them under a concurrency cap. Dispatch runs in consecutive groups of at
//! most `cap` concurrent calls with a barrier between groups; results come
//! back in selection order, and each call's failure is collected
//! independently so one bad response does not discard the rest of the turn.

use crate::config::RoleParams;
use crate::memory::MemoryWindow;
use crate::responder::{Responder, ResponderError};
use crate::schema::{
    CharacterConcept, CharacterResponse, Dossier, ResponderId, RoutingDecision, TurnRecord,
};
use futures::future;
use openai_compat::ChatProvider;
use std::sync::Arc;

/// A single failed responder call within a dispatch.
#[derive(Debug)]
pub struct DispatchFailure {
    pub responder: ResponderId,
    pub character: String,
    pub error: ResponderError,
}

/// Results of fanning a turn out to the cast.
///
/// `responses` preserves the order the routing decisions were selected in.
/// The caller decides whether a turn with `failures` is acceptable.
#[derive(Debug, Default)]
pub struct DispatchOutcome {
    pub responses: Vec<CharacterResponse>,
    pub failures: Vec<DispatchFailure>,
}

impl DispatchOutcome {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// The set of active responders for one story.
#[derive(Default)]
pub struct Cast {
    responders: Vec<Responder>,
}

impl Cast {
    pub fn new() -> Self {
        Self {
            responders: Vec::new(),
        }
    }

    /// Spawn a responder from a concept. Returns its id.
    pub fn spawn(
        &mut self,
        concept: CharacterConcept,
        provider: Arc<dyn ChatProvider>,
        params: RoleParams,
    ) -> ResponderId {
        let responder = Responder::from_concept(concept, provider, params);
        let id = responder.id();
        self.responders.push(responder);
        id
    }

    /// Spawn responders for every concept, in order.
    pub fn spawn_all(
        &mut self,
        concepts: &[CharacterConcept],
        provider: &Arc<dyn ChatProvider>,
        params: RoleParams,
    ) -> Vec<ResponderId> {
        concepts
            .iter()
            .map(|concept| self.spawn(concept.clone(), provider.clone(), params))
            .collect()
    }

    /// Rebuild a responder from persisted state.
    pub fn restore(
        &mut self,
        dossier: Dossier,
        memory: MemoryWindow,
        provider: Arc<dyn ChatProvider>,
        params: RoleParams,
    ) -> ResponderId {
        let responder = Responder::restore(dossier, memory, provider, params);
        let id = responder.id();
        self.responders.push(responder);
        id
    }

    pub fn get(&self, id: ResponderId) -> Option<&Responder> {
        self.responders.iter().find(|r| r.id() == id)
    }

    pub fn get_mut(&mut self, id: ResponderId) -> Option<&mut Responder> {
        self.responders.iter_mut().find(|r| r.id() == id)
    }

    pub fn by_name(&self, name: &str) -> Option<&Responder> {
        self.responders.iter().find(|r| r.name() == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Responder> {
        self.responders.iter()
    }

    pub fn dossiers(&self) -> Vec<&Dossier> {
        self.responders.iter().map(|r| r.dossier()).collect()
    }

    pub fn len(&self) -> usize {
        self.responders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.responders.is_empty()
    }

    /// Append the turn record to every responder's memory window, including
    /// responders who did not perceive or act this turn.
    pub fn update_all_memories(&mut self, record: &TurnRecord) {
        for responder in &mut self.responders {
            responder.update_memory(record.clone());
        }
    }

    /// Fan routing decisions out to the cast.
    ///
    /// Only decisions with `receives == true` and a packet are dispatched.
    /// Calls run in consecutive groups of at most `cap`; a group fully
    /// completes before the next one starts, so at most `cap` calls are ever
    /// outstanding.
    pub async fn dispatch(&self, decisions: &[RoutingDecision], cap: usize) -> DispatchOutcome {
        let selected: Vec<&RoutingDecision> = decisions
            .iter()
            .filter(|d| d.receives && d.packet.is_some())
            .collect();

        let mut outcome = DispatchOutcome::default();

        for group in selected.chunks(cap.max(1)) {
            let calls = group.iter().filter_map(|decision| {
                let Some(responder) = self.get(decision.responder) else {
                    log::warn!(
                        "dispatch skipping unknown responder {} ({})",
                        decision.responder,
                        decision.character
                    );
                    return None;
                };
                let packet = decision.packet.as_ref()?;
                Some(async move { (*decision, responder.respond(packet, decision.attention).await) })
            });

            // Barrier: the whole group finishes before the next group starts.
            for (decision, result) in future::join_all(calls).await {
                match result {
                    Ok(response) => outcome.responses.push(response),
                    Err(error) => outcome.failures.push(DispatchFailure {
                        responder: decision.responder,
                        character: decision.character.clone(),
                        error,
                    }),
                }
            }
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::schema::{AttentionLevel, PerceptionPacket};
    use crate::testing::{concept, response_json, MockProvider};

    fn decision(responder: &Responder, receives: bool) -> RoutingDecision {
        RoutingDecision {
            character: responder.name().to_string(),
            responder: responder.id(),
            receives,
            packet: receives.then(PerceptionPacket::default),
            reason: "present".to_string(),
            attention: AttentionLevel::Full,
        }
    }

    fn spawn_cast(provider: &Arc<MockProvider>, names: &[&str]) -> Cast {
        let mut cast = Cast::new();
        let shared: Arc<dyn ChatProvider> = provider.clone();
        for name in names {
            cast.spawn(
                concept(name),
                shared.clone(),
                EngineConfig::default().character_params,
            );
        }
        cast
    }

    #[tokio::test]
    async fn test_dispatch_groups_and_order() {
        let provider = Arc::new(MockProvider::new());
        let cast = spawn_cast(&provider, &["Ada", "Brin", "Cass", "Dorn", "Eli"]);

        // Five decisions, three receiving: with cap 2 that is groups of 2 + 1.
        let responders: Vec<&Responder> = cast.iter().collect();
        let decisions = vec![
            decision(responders[0], true),
            decision(responders[1], false),
            decision(responders[2], true),
            decision(responders[3], false),
            decision(responders[4], true),
        ];

        for responder in [responders[0], responders[2], responders[4]] {
            provider.push_json(response_json(responder.name(), responder.id(), "observe"));
        }

        let outcome = cast.dispatch(&decisions, 2).await;

        assert!(outcome.is_complete());
        assert_eq!(outcome.responses.len(), 3);
        let names: Vec<&str> = outcome
            .responses
            .iter()
            .map(|r| r.character.as_str())
            .collect();
        assert_eq!(names, vec!["Ada", "Cass", "Eli"]);

        assert_eq!(provider.call_count(), 3);
        assert_eq!(provider.peak_concurrency(), 2);
    }

    #[tokio::test]
    async fn test_dispatch_never_exceeds_cap() {
        let provider = Arc::new(MockProvider::new());
        let names = ["A", "B", "C", "D", "E", "F", "G"];
        let cast = spawn_cast(&provider, &names);

        let responders: Vec<&Responder> = cast.iter().collect();
        let decisions: Vec<RoutingDecision> =
            responders.iter().map(|r| decision(r, true)).collect();

        for responder in &responders {
            provider.push_json(response_json(responder.name(), responder.id(), "observe"));
        }

        let outcome = cast.dispatch(&decisions, 3).await;

        assert_eq!(outcome.responses.len(), 7);
        assert!(provider.peak_concurrency() <= 3);
    }

    #[tokio::test]
    async fn test_dispatch_collects_failures_independently() {
        let provider = Arc::new(MockProvider::new());
        let cast = spawn_cast(&provider, &["Ada", "Brin", "Cass"]);
        let responders: Vec<&Responder> = cast.iter().collect();

        let decisions: Vec<RoutingDecision> =
            responders.iter().map(|r| decision(r, true)).collect();

        provider.push_json(response_json("Ada", responders[0].id(), "act"));
        provider.push_error(openai_compat::Error::Api {
            status: 500,
            message: "server overloaded".to_string(),
        });
        provider.push_json(response_json("Cass", responders[2].id(), "observe"));

        let outcome = cast.dispatch(&decisions, 4).await;

        assert_eq!(outcome.responses.len(), 2);
        assert_eq!(outcome.failures.len(), 1);
        assert!(!outcome.is_complete());
        assert_eq!(outcome.failures[0].character, "Brin");

        // Surviving responses still preserve selection order.
        assert_eq!(outcome.responses[0].character, "Ada");
        assert_eq!(outcome.responses[1].character, "Cass");
    }

    #[tokio::test]
    async fn test_dispatch_with_no_receiving_decisions_makes_no_calls() {
        let provider = Arc::new(MockProvider::new());
        let cast = spawn_cast(&provider, &["Ada"]);
        let responders: Vec<&Responder> = cast.iter().collect();

        let decisions = vec![decision(responders[0], false)];
        let outcome = cast.dispatch(&decisions, 4).await;

        assert!(outcome.responses.is_empty());
        assert!(outcome.failures.is_empty());
        assert_eq!(provider.call_count(), 0);
    }

    #[test]
    fn test_cast_lookup() {
        let provider = Arc::new(MockProvider::new());
        let cast = spawn_cast(&provider, &["Ada", "Brin"]);

        assert_eq!(cast.len(), 2);
        let ada = cast.by_name("Ada").unwrap();
        assert_eq!(cast.get(ada.id()).unwrap().name(), "Ada");
        assert!(cast.by_name("Zed").is_none());
    }

    #[test]
    fn test_update_all_memories_reaches_every_responder() {
        let provider = Arc::new(MockProvider::new());
        let mut cast = spawn_cast(&provider, &["Ada", "Brin", "Cass"]);

        let record = TurnRecord {
            turn: 1,
            input: "I bow to the regent".to_string(),
            narrative: "The court watches.".to_string(),
            summary: "Player: I bow to the regent".to_string(),
        };
        cast.update_all_memories(&record);

        for responder in cast.iter() {
            assert_eq!(responder.memory().len(), 1);
            assert_eq!(responder.memory().entries()[0].turn, 1);
        }
    }
}
