//! Engine runtime
//!
//! Wires the tiers, the event bus, and the three lifecycle engines into
//! independent background tasks. The agent-facing surface is
//! [`MemoryRuntime::record_turn`], which writes the ephemeral tier and
//! returns immediately; every engine failure degrades memory quality, never
//! the synchronous path.

pub mod consolidation;
pub mod distillation;
pub mod promotion;
pub mod sweep;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bus::LifecycleBus;
use crate::config::Config;
use crate::embedding::{Embedder, HashEmbedder};
use crate::error::Result;
use crate::extract::{GuardedCapability, LanguageCapability, RemoteCapability, RuleBasedExtractor};
use crate::index::{KeywordIndex, RelationGraph, SimilarityIndex};
use crate::kv::{AtomicStateLayer, KvBackend, MemoryKv};
use crate::memory::types::{EventKind, LifecycleEvent, Role, Turn};
use crate::store::{
    ActiveContextStore, EpisodeFilter, EpisodeStore, FactFilter, FactStore, KnowledgeFilter,
    KnowledgeStore, TierStore, TurnFilter,
};

pub use consolidation::{ConsolidationEngine, ConsolidationReport};
pub use distillation::{DistillationEngine, DistillationReport};
pub use promotion::{PromotionEngine, PromotionReport};
pub use sweep::{ReconciliationSweep, SweepReport};

/// Per-tier record counts plus bus health, for the daemon's status log
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeStats {
    pub scopes: usize,
    pub turns: usize,
    pub facts: usize,
    pub episodes: usize,
    pub documents: usize,
    pub bus_retained: usize,
    pub bus_trimmed_unconsumed: u64,
}

/// The assembled memory subsystem
pub struct MemoryRuntime {
    config: Config,
    kv: Arc<dyn KvBackend>,
    active: Arc<ActiveContextStore>,
    facts: Arc<FactStore>,
    episodes: Arc<EpisodeStore>,
    knowledge: Arc<KnowledgeStore>,
    bus: Arc<LifecycleBus>,
    promotion: Arc<PromotionEngine>,
    consolidation: Arc<ConsolidationEngine>,
    distillation: Arc<DistillationEngine>,
    sweep: Arc<ReconciliationSweep>,
}

/// Handle over the spawned engine tasks
pub struct RuntimeHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl RuntimeHandle {
    /// Signal every engine task and wait for them to finish
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            let _ = task.await;
        }
        info!("Lifecycle engines stopped");
    }
}

impl MemoryRuntime {
    /// Build the runtime from configuration alone. Uses the remote language
    /// capability when one is configured, the rule-based fallback otherwise,
    /// and deterministic hash embeddings.
    pub fn new(config: Config) -> Result<Arc<Self>> {
        let fallback: Arc<dyn LanguageCapability> = Arc::new(RuleBasedExtractor::new());
        let capability: Arc<dyn LanguageCapability> = if config.capability.api_url.is_empty() {
            info!("No remote capability configured; running with the rule-based extractor");
            Arc::new(GuardedCapability::fallback_only(fallback))
        } else {
            let remote = RemoteCapability::new(&config.capability)?;
            Arc::new(GuardedCapability::new(
                Some(Arc::new(remote)),
                fallback,
                &config.capability,
            ))
        };
        Self::with_components(config, capability, Arc::new(HashEmbedder::new()))
    }

    /// Build the runtime with explicit capability and embedder. The seam
    /// tests and embedding features plug into.
    pub fn with_components(
        config: Config,
        capability: Arc<dyn LanguageCapability>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Arc<Self>> {
        config.scoring.validate()?;

        let kv: Arc<dyn KvBackend> = Arc::new(MemoryKv::new(config.storage.shard_count));
        // Fails closed if the substrate cannot merge atomically.
        let layer = AtomicStateLayer::new(kv.clone())?;

        let active = Arc::new(ActiveContextStore::new(layer.clone(), config.active.clone()));
        let facts = Arc::new(FactStore::new(layer.clone()));
        let episodes = Arc::new(EpisodeStore::new(
            layer.clone(),
            Arc::new(SimilarityIndex::new()),
            Arc::new(RelationGraph::new()),
        ));
        let knowledge = Arc::new(KnowledgeStore::new(layer, Arc::new(KeywordIndex::new())));
        let bus = Arc::new(LifecycleBus::new(&config.bus));

        let promotion = Arc::new(PromotionEngine::new(
            active.clone(),
            facts.clone(),
            capability.clone(),
            bus.clone(),
            config.scoring,
            config.promotion.clone(),
        )?);
        let consolidation = Arc::new(ConsolidationEngine::new(
            facts.clone(),
            episodes.clone(),
            capability.clone(),
            embedder,
            bus.clone(),
            config.consolidation.clone(),
        ));
        let distillation = Arc::new(DistillationEngine::new(
            episodes.clone(),
            knowledge.clone(),
            capability,
            bus.clone(),
            config.distillation.clone(),
        ));
        let sweep = Arc::new(ReconciliationSweep::new(
            kv.clone(),
            active.clone(),
            facts.clone(),
            episodes.clone(),
            promotion.clone(),
            consolidation.clone(),
            distillation.clone(),
            config.scoring,
            config.sweep.clone(),
        ));

        Ok(Arc::new(Self {
            config,
            kv,
            active,
            facts,
            episodes,
            knowledge,
            bus,
            promotion,
            consolidation,
            distillation,
            sweep,
        }))
    }

    /// Record one interaction turn. This is the synchronous ingest path:
    /// one write plus at most one event publish, no engine work.
    pub async fn record_turn(
        &self,
        scope: &str,
        role: Role,
        content: impl Into<String>,
    ) -> Result<Uuid> {
        let turn = Turn::new(scope, role, content);
        let id = self.active.store(turn).await?;

        if self.active.over_threshold(scope).await? {
            self.bus.publish(LifecycleEvent::new(
                EventKind::BufferThresholdReached,
                scope,
                serde_json::json!({}),
            ))?;
        }
        Ok(id)
    }

    pub fn active(&self) -> &Arc<ActiveContextStore> {
        &self.active
    }

    pub fn facts(&self) -> &Arc<FactStore> {
        &self.facts
    }

    pub fn episodes(&self) -> &Arc<EpisodeStore> {
        &self.episodes
    }

    pub fn knowledge(&self) -> &Arc<KnowledgeStore> {
        &self.knowledge
    }

    pub fn bus(&self) -> &Arc<LifecycleBus> {
        &self.bus
    }

    pub fn promotion(&self) -> &Arc<PromotionEngine> {
        &self.promotion
    }

    pub fn consolidation(&self) -> &Arc<ConsolidationEngine> {
        &self.consolidation
    }

    pub fn distillation(&self) -> &Arc<DistillationEngine> {
        &self.distillation
    }

    pub fn sweeper(&self) -> &Arc<ReconciliationSweep> {
        &self.sweep
    }

    /// Per-tier counts across every scope
    pub async fn stats(&self) -> Result<RuntimeStats> {
        let mut stats = RuntimeStats {
            bus_retained: self.bus.len(),
            bus_trimmed_unconsumed: self.bus.trimmed_unconsumed(),
            ..RuntimeStats::default()
        };
        for scope in self.kv.list_scopes().await? {
            stats.scopes += 1;
            stats.turns += self.active.query(&scope, &TurnFilter::default()).await?.len();
            stats.facts += self.facts.query(&scope, &FactFilter::default()).await?.len();
            stats.episodes += self
                .episodes
                .query(&scope, &EpisodeFilter::default())
                .await?
                .len();
            stats.documents += self
                .knowledge
                .query(&scope, &KnowledgeFilter::default())
                .await?
                .len();
        }
        Ok(stats)
    }

    /// Spawn the three engines plus the reconciliation sweep as background
    /// tasks. Returns the handle that stops them.
    pub fn start(self: &Arc<Self>) -> RuntimeHandle {
        let (shutdown, _) = watch::channel(false);
        let tasks = vec![
            tokio::spawn(promotion_loop(self.clone(), shutdown.subscribe())),
            tokio::spawn(consolidation_loop(self.clone(), shutdown.subscribe())),
            tokio::spawn(distillation_loop(self.clone(), shutdown.subscribe())),
            tokio::spawn(sweep_loop(self.clone(), shutdown.subscribe())),
        ];
        info!("Lifecycle engines started");
        RuntimeHandle { shutdown, tasks }
    }

    /// Scopes named by events of one kind in this group's backlog, with the
    /// backlog acknowledged
    fn drain_event_scopes(&self, group: &str, kind: EventKind) -> Result<BTreeSet<String>> {
        let polled = self.bus.poll(group, 256)?;
        let mut scopes = BTreeSet::new();
        let mut last_offset = None;
        for entry in &polled {
            if entry.event.event_type == kind {
                scopes.insert(entry.event.scope_id.clone());
            }
            last_offset = Some(entry.offset);
        }
        if let Some(offset) = last_offset {
            self.bus.ack(group, offset)?;
        }
        Ok(scopes)
    }
}

async fn wait_for_tick(
    interval: &mut tokio::time::Interval,
    notify: &tokio::sync::Notify,
    shutdown: &mut watch::Receiver<bool>,
) -> bool {
    tokio::select! {
        _ = interval.tick() => true,
        _ = notify.notified() => true,
        _ = shutdown.changed() => false,
    }
}

async fn promotion_loop(runtime: Arc<MemoryRuntime>, mut shutdown: watch::Receiver<bool>) {
    let period = Duration::from_secs(runtime.config.promotion.sweep_interval_secs);
    let run_timeout = Duration::from_secs(runtime.config.promotion.run_timeout_secs);
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let notify = runtime.bus.notifier();

    loop {
        if !wait_for_tick(&mut interval, &notify, &mut shutdown).await {
            break;
        }

        let mut scopes = match runtime.drain_event_scopes("promotion", EventKind::BufferThresholdReached)
        {
            Ok(scopes) => scopes,
            Err(e) => {
                warn!("Promotion event poll failed: {e}");
                continue;
            }
        };
        if let Ok(known) = runtime.kv.list_scopes().await {
            scopes.extend(known);
        }

        for scope in scopes {
            match tokio::time::timeout(run_timeout, runtime.promotion.run_once(&scope, false)).await
            {
                Ok(Ok(report)) if report.promoted > 0 => {
                    debug!("Promotion run for {scope}: {report:?}")
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => warn!("Promotion run for {scope} failed: {e}"),
                Err(_) => warn!("Promotion run for {scope} timed out; batch left pending"),
            }
        }
    }
}

async fn consolidation_loop(runtime: Arc<MemoryRuntime>, mut shutdown: watch::Receiver<bool>) {
    let period = Duration::from_secs(runtime.config.consolidation.sweep_interval_secs);
    let run_timeout = Duration::from_secs(runtime.config.consolidation.run_timeout_secs);
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let notify = runtime.bus.notifier();

    loop {
        if !wait_for_tick(&mut interval, &notify, &mut shutdown).await {
            break;
        }

        let mut scopes = match runtime.drain_event_scopes("consolidation", EventKind::FactPromoted) {
            Ok(scopes) => scopes,
            Err(e) => {
                warn!("Consolidation event poll failed: {e}");
                continue;
            }
        };
        if let Ok(known) = runtime.kv.list_scopes().await {
            scopes.extend(known);
        }

        for scope in scopes {
            match tokio::time::timeout(run_timeout, runtime.consolidation.run_once(&scope)).await {
                Ok(Ok(report)) if report.episodes_written > 0 => {
                    debug!("Consolidation run for {scope}: {report:?}")
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => warn!("Consolidation run for {scope} failed: {e}"),
                Err(_) => warn!("Consolidation run for {scope} timed out; facts left pending"),
            }
        }
    }
}

async fn distillation_loop(runtime: Arc<MemoryRuntime>, mut shutdown: watch::Receiver<bool>) {
    let period = Duration::from_secs(runtime.config.distillation.sweep_interval_secs);
    let run_timeout = Duration::from_secs(runtime.config.distillation.run_timeout_secs);
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        // Low priority: interval only, no event wakeups.
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.changed() => break,
        }

        let scopes = match runtime.kv.list_scopes().await {
            Ok(scopes) => scopes,
            Err(e) => {
                warn!("Distillation scope listing failed: {e}");
                continue;
            }
        };
        for scope in scopes {
            match tokio::time::timeout(run_timeout, runtime.distillation.run_once(&scope)).await {
                Ok(Ok(report)) if report.documents_archived > 0 => {
                    debug!("Distillation run for {scope}: {report:?}")
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => warn!("Distillation run for {scope} failed: {e}"),
                Err(_) => warn!("Distillation run for {scope} timed out; episodes left unmined"),
            }
        }
    }
}

async fn sweep_loop(runtime: Arc<MemoryRuntime>, mut shutdown: watch::Receiver<bool>) {
    let period = Duration::from_secs(runtime.config.sweep.interval_secs);
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.changed() => break,
        }
        if let Err(e) = runtime.sweep.run_once().await {
            warn!("Reconciliation sweep failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockCapability;

    fn test_runtime(capability: Arc<dyn LanguageCapability>) -> Arc<MemoryRuntime> {
        let config = Config {
            active: crate::config::ActiveContextConfig {
                buffer_threshold: 3,
                ..crate::config::ActiveContextConfig::default()
            },
            promotion: crate::config::PromotionConfig {
                min_batch: 2,
                ..crate::config::PromotionConfig::default()
            },
            ..Config::default()
        };
        MemoryRuntime::with_components(config, capability, Arc::new(HashEmbedder::new())).unwrap()
    }

    #[tokio::test]
    async fn test_record_turn_is_synchronous_and_cheap() {
        let runtime = test_runtime(Arc::new(MockCapability::failing()));
        // A dead capability must not affect the ingest path.
        let id = runtime
            .record_turn("s1", Role::User, "Hello from the agent loop")
            .await
            .unwrap();
        assert!(runtime.active().retrieve("s1", id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_buffer_threshold_event_emitted() {
        let runtime = test_runtime(Arc::new(MockCapability::with_facts(vec![])));
        for i in 0..3 {
            runtime
                .record_turn("s1", Role::User, format!("Message number {i}"))
                .await
                .unwrap();
        }

        let polled = runtime.bus().poll("observer", 16).unwrap();
        assert!(polled
            .iter()
            .any(|e| e.event.event_type == EventKind::BufferThresholdReached));
    }

    #[tokio::test]
    async fn test_drain_event_scopes_acks_backlog() {
        let runtime = test_runtime(Arc::new(MockCapability::with_facts(vec![])));
        for i in 0..3 {
            runtime
                .record_turn("s1", Role::User, format!("Message number {i}"))
                .await
                .unwrap();
        }

        let scopes = runtime
            .drain_event_scopes("promotion", EventKind::BufferThresholdReached)
            .unwrap();
        assert!(scopes.contains("s1"));

        let again = runtime
            .drain_event_scopes("promotion", EventKind::BufferThresholdReached)
            .unwrap();
        assert!(again.is_empty(), "backlog was acknowledged");
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let runtime = test_runtime(Arc::new(MockCapability::with_facts(vec![(
            "Alice works at Acme",
            0.95,
            0.9,
        )])));
        let handle = runtime.start();
        runtime
            .record_turn("s1", Role::User, "Alice works at Acme these days")
            .await
            .unwrap();
        handle.stop().await;
    }

    #[tokio::test]
    async fn test_stats_counts_tiers() {
        let runtime = test_runtime(Arc::new(MockCapability::with_facts(vec![])));
        runtime
            .record_turn("s1", Role::User, "Some message content")
            .await
            .unwrap();

        let stats = runtime.stats().await.unwrap();
        assert_eq!(stats.scopes, 1);
        assert_eq!(stats.turns, 1);
        assert_eq!(stats.facts, 0);
    }
}
