//! Live tests against a running OpenAI-compatible server.
//!
//! These exercise the full pipeline with real generation and are ignored by
//! default. Run with:
//! `OPENAI_BASE_URL=http://localhost:8000/v1 cargo test -p troupe-core live_ -- --ignored --nocapture`

use openai_compat::ChatClient;
use std::sync::Arc;
use troupe_core::testing::sample_config;
use troupe_core::{Engine, EngineConfig, FileStore};

fn setup() {
    let _ = dotenvy::dotenv();
}

fn has_server() -> bool {
    std::env::var("OPENAI_BASE_URL").is_ok()
}

#[tokio::test]
#[ignore]
async fn live_create_start_and_one_turn() {
    setup();
    if !has_server() {
        eprintln!("Skipping test: OPENAI_BASE_URL not set");
        return;
    }

    let client = ChatClient::from_env()
        .detect_model()
        .await
        .expect("server lists a model");
    let mut engine = Engine::new(
        Arc::new(client),
        Arc::new(FileStore::new("./saves")),
        EngineConfig::from_env(),
    );

    let (story_id, outline) = engine
        .create_story(sample_config())
        .await
        .expect("create should succeed");
    println!("premise: {}", outline.premise);
    assert!(!outline.major_characters.is_empty());

    let opening = engine
        .start_story(&story_id)
        .await
        .expect("start should succeed");
    println!("opening:\n{}", opening.narrative);
    assert!(!opening.narrative.is_empty());

    let turn = engine
        .process_turn(&story_id, "I take stock of my surroundings")
        .await
        .expect("turn should succeed");
    println!("turn 1:\n{}", turn.narrative);
    assert!(!turn.narrative.is_empty());

    let session = engine.session(&story_id).expect("session registered");
    assert_eq!(session.turn_history().last().unwrap().turn, 1);
}
