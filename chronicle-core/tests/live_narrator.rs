//! Sessions against a real narrator provider.
//!
//! Run with: `ANTHROPIC_API_KEY=$ANTHROPIC_API_KEY cargo test -p chronicle-core live_narrator -- --ignored --nocapture`

use chronicle_core::{CharacterRecord, MemoryStore, NarratorConfig, Orchestrator, SessionConfig};
use std::sync::Arc;

/// Load environment variables from .env file
fn setup() {
    let _ = dotenvy::dotenv();
}

#[tokio::test]
#[ignore]
async fn test_live_session_round_trip() {
    setup();
    let chain = match NarratorConfig::from_env().build_chain() {
        Ok(chain) => chain,
        Err(e) => {
            eprintln!("Skipping test: {e}");
            return;
        }
    };
    let orch = Orchestrator::new(Arc::new(MemoryStore::new()), Arc::new(chain));
    let aria = CharacterRecord::new("Aria", "ranger", 2, 16);
    orch.records().save(&aria).await.unwrap();

    let started = orch
        .start(aria.id, SessionConfig::new().with_location("Neverwinter Wood"))
        .await
        .unwrap();
    println!("{}", started.narration);
    assert!(!started.narration.trim().is_empty());
    assert!(!started.narration.contains("[CONDITION_ADD"));

    let turn = orch
        .act(started.session.id, "I follow the deer trail north")
        .await
        .unwrap();
    println!("{}", turn.narration);
    assert_eq!(turn.session.turns, 3);
    orch.abort(started.session.id).await.unwrap();
}
