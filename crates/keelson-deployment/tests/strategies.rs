//! End-to-end strategy runs against the in-memory engine.

use keelson_deployment::{create_strategy, RollbackStatus, StrategyError, UpdateRequest};
use keelson_engine::InMemoryEngine;
use keelson_types::{HealthState, StrategyConfig, StrategyKind};
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;

fn config(kind: StrategyKind) -> StrategyConfig {
    let mut config = StrategyConfig::new(kind)
        .with_rollback(true)
        .with_timeout(Duration::from_secs(60));
    config.verification_period = Duration::from_secs(5);
    config
}

#[tokio::test(start_paused = true)]
async fn starting_forever_rolls_back_to_initial_set() {
    let engine = Arc::new(InMemoryEngine::new());
    engine.seed("app", 3, "app:1");
    engine.script_replica_health("app:2", 2, vec![HealthState::Starting]);
    let before = engine.snapshot("app");

    let strategy = create_strategy(config(StrategyKind::OneAtATime), engine.clone()).unwrap();
    let result = strategy
        .execute(&UpdateRequest::new("app", "app:1", "app:2").with_declared(3))
        .await;

    assert!(matches!(
        result.error,
        Some(StrategyError::HealthTimeout { ref replica }) if replica == "app#2"
    ));
    assert_eq!(result.rollback, RollbackStatus::RolledBack);
    assert_eq!(engine.snapshot("app"), before);
}

#[tokio::test(start_paused = true)]
async fn rollback_disabled_leaves_partial_state() {
    let engine = Arc::new(InMemoryEngine::new());
    engine.seed("app", 2, "app:1");
    engine.reject_image("app:2");

    let strategy = create_strategy(
        config(StrategyKind::OneAtATime).with_rollback(false),
        engine.clone(),
    )
    .unwrap();
    let result = strategy
        .execute(&UpdateRequest::new("app", "app:1", "app:2").with_declared(2))
        .await;

    assert!(matches!(result.error, Some(StrategyError::Engine(_))));
    assert_eq!(result.rollback, RollbackStatus::NotAttempted);
    // Ordinal 1 was stopped before its replacement failed to start
    assert_eq!(engine.snapshot("app").len(), 1);

    // An explicit rollback still has the journal to work from
    strategy.rollback("app").await.unwrap();
    assert_eq!(engine.snapshot("app").len(), 2);
}

#[tokio::test(start_paused = true)]
async fn post_command_failure_only_warns() {
    let engine = Arc::new(InMemoryEngine::new());
    engine.seed("app", 1, "app:1");
    engine.script_exec("warm-cache", 1);
    let mut config = config(StrategyKind::AllAtOnce);
    config.post_update_command = Some("warm-cache".to_string());

    let strategy = create_strategy(config, engine.clone()).unwrap();
    let result = strategy
        .execute(&UpdateRequest::new("app", "app:1", "app:2"))
        .await;

    assert!(result.is_success(), "{:?}", result.error);
    assert_eq!(engine.snapshot("app")[0].1, "app:2");
}

#[tokio::test(start_paused = true)]
async fn successful_run_clears_journal() {
    let engine = Arc::new(InMemoryEngine::new());
    engine.seed("app", 2, "app:1");

    let strategy = create_strategy(config(StrategyKind::Canary), engine.clone()).unwrap();
    let result = strategy
        .execute(&UpdateRequest::new("app", "app:1", "app:2").with_declared(2))
        .await;
    assert!(result.is_success(), "{:?}", result.error);

    // Nothing left to undo
    strategy.rollback("app").await.unwrap();
    assert!(engine
        .snapshot("app")
        .iter()
        .all(|(_, image, _)| image == "app:2"));
}

// ============================================================================
// Rollback safety
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum Fault {
    Unhealthy,
    NeverReady,
    StartRejected,
}

fn kind() -> impl Strategy<Value = StrategyKind> {
    prop_oneof![
        Just(StrategyKind::OneAtATime),
        Just(StrategyKind::AllAtOnce),
        Just(StrategyKind::BlueGreen),
        Just(StrategyKind::Canary),
    ]
}

fn fault() -> impl Strategy<Value = Fault> {
    prop_oneof![
        Just(Fault::Unhealthy),
        Just(Fault::NeverReady),
        Just(Fault::StartRejected),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// A failed Execute with rollback enabled leaves exactly the replicas it
    /// found: same ordinals, images and roles.
    #[test]
    fn failed_execute_restores_replica_set(
        kind in kind(),
        replicas in 1u32..6,
        faulty in 1u32..6,
        fault in fault(),
    ) {
        let faulty = faulty.min(replicas);
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .start_paused(true)
            .build()
            .unwrap();

        runtime.block_on(async {
            let engine = Arc::new(InMemoryEngine::new());
            engine.seed("app", replicas, "app:1");
            match fault {
                Fault::Unhealthy => {
                    engine.script_replica_health("app:2", faulty, vec![HealthState::Unhealthy])
                }
                Fault::NeverReady => {
                    engine.script_replica_health("app:2", faulty, vec![HealthState::Starting])
                }
                Fault::StartRejected => engine.reject_image("app:2"),
            }
            let before = engine.snapshot("app");

            let strategy = create_strategy(config(kind), engine.clone()).unwrap();
            let result = strategy
                .execute(&UpdateRequest::new("app", "app:1", "app:2").with_declared(replicas))
                .await;

            prop_assert!(result.error.is_some());
            prop_assert_eq!(&result.rollback, &RollbackStatus::RolledBack);
            prop_assert_eq!(engine.snapshot("app"), before);
            Ok(())
        })?;
    }
}
