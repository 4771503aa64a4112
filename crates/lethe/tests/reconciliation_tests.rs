//! Integration tests for the event bus safety net: dropped events are
//! recovered by the reconciliation sweep

use std::sync::Arc;

use lethe::config::{ActiveContextConfig, BusConfig, Config, PromotionConfig, SweepConfig};
use lethe::embedding::HashEmbedder;
use lethe::memory::types::{EventKind, LifecycleEvent, Role};
use lethe::store::{FactFilter, TierStore};
use lethe::testing::MockCapability;
use lethe::MemoryRuntime;

fn tiny_bus_runtime() -> Arc<MemoryRuntime> {
    let config = Config {
        active: ActiveContextConfig {
            buffer_threshold: 1,
            ..ActiveContextConfig::default()
        },
        promotion: PromotionConfig {
            min_batch: 1,
            ..PromotionConfig::default()
        },
        bus: BusConfig { capacity: 2 },
        sweep: SweepConfig {
            interval_secs: 1,
            // Everything unprocessed counts as stranded immediately.
            stranded_after_secs: 0,
        },
        ..Config::default()
    };
    MemoryRuntime::with_components(
        config,
        Arc::new(MockCapability::with_facts(vec![(
            "Alice works at Acme",
            0.95,
            0.9,
        )])),
        Arc::new(HashEmbedder::new()),
    )
    .unwrap()
}

#[tokio::test]
async fn sweep_recovers_turns_whose_event_was_trimmed() {
    let runtime = tiny_bus_runtime();

    runtime
        .record_turn("s1", Role::User, "Alice works at Acme these days")
        .await
        .unwrap();

    // Flood the tiny log so the buffer-threshold event for s1 is trimmed
    // before any consumer sees it.
    for i in 0..8 {
        runtime
            .bus()
            .publish(LifecycleEvent::new(
                EventKind::FactPromoted,
                "noise",
                serde_json::json!({ "i": i }),
            ))
            .unwrap();
    }
    assert!(runtime.bus().trimmed_unconsumed() > 0, "events were lost");
    let surviving = runtime.bus().poll("promotion", 64).unwrap();
    assert!(
        surviving
            .iter()
            .all(|e| e.event.event_type != EventKind::BufferThresholdReached),
        "the trigger event must actually be gone"
    );

    // One sweep interval later the turn is promoted anyway.
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    let report = runtime.sweeper().run_once().await.unwrap();
    assert!(report.stranded_promotions >= 1);

    let facts = runtime
        .facts()
        .query("s1", &FactFilter::default())
        .await
        .unwrap();
    assert_eq!(facts.len(), 1);
    assert_eq!(facts[0].content, "Alice works at Acme");
}

#[tokio::test]
async fn sweep_chains_consolidation_and_distillation_for_stale_items() {
    let runtime = tiny_bus_runtime();

    // A fact sitting unconsolidated with no event in the log.
    runtime
        .facts()
        .store(lethe::memory::types::Fact::new(
            "s1",
            "Stale fact nobody consolidated",
            0.9,
            0.9,
            vec![],
        ))
        .await
        .unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    let report = runtime.sweeper().run_once().await.unwrap();
    assert!(report.stranded_consolidations >= 1);

    let episodes = runtime
        .episodes()
        .query("s1", &lethe::store::EpisodeFilter::default())
        .await
        .unwrap();
    assert_eq!(episodes.len(), 1, "sweep consolidated the stale fact");
}

#[tokio::test]
async fn sweep_purges_expired_turns() {
    let config = Config {
        active: ActiveContextConfig {
            turn_ttl_secs: 0,
            ..ActiveContextConfig::default()
        },
        ..Config::default()
    };
    let runtime = MemoryRuntime::with_components(
        config,
        Arc::new(MockCapability::with_facts(vec![])),
        Arc::new(HashEmbedder::new()),
    )
    .unwrap();

    runtime
        .record_turn("s1", Role::User, "This message expires immediately")
        .await
        .unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    let report = runtime.sweeper().run_once().await.unwrap();
    assert!(report.expired_purged >= 1);
}

#[tokio::test]
async fn sweep_is_idempotent_when_nothing_is_stranded() {
    let runtime = tiny_bus_runtime();
    runtime
        .record_turn("s1", Role::User, "Alice works at Acme these days")
        .await
        .unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    runtime.sweeper().run_once().await.unwrap();
    let facts_after_first = runtime
        .facts()
        .query("s1", &FactFilter::default())
        .await
        .unwrap()
        .len();

    runtime.sweeper().run_once().await.unwrap();
    runtime.sweeper().run_once().await.unwrap();
    let facts_after_third = runtime
        .facts()
        .query("s1", &FactFilter::default())
        .await
        .unwrap()
        .len();
    assert_eq!(facts_after_first, facts_after_third);
}
