//! Draw-order reassertion.
//!
//! After every membership change the scheduler moves the sub-layers of each
//! active prioritized overlay to the top of the stack, lowest priority first,
//! so the final stack matches the priority order. Overlays missing from the
//! priority order are never moved and therefore stay below all prioritized
//! ones. A pass only runs once every involved source has loaded; until then it
//! is retried on a fixed delay, and abandoned quietly after the last attempt.

use crate::catalog::OverlayId;
use crate::engine::EngineAdapter;
use crate::registry::{LayerRegistry, RealizedOverlay};
use crate::session::{MapSessionState, StyleSwitchGate};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderingPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl Default for OrderingPolicy {
    fn default() -> Self {
        Self {
            max_retries: 30,
            delay: Duration::from_millis(1000),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderingOutcome {
    /// The stack now follows the priority order.
    Applied,
    /// Sources never became ready within the policy.
    GaveUp,
    /// A newer pass was scheduled before this one finished.
    Superseded,
}

enum Attempt {
    Applied,
    NotReady(&'static str),
}

struct SchedulerInner {
    adapter: EngineAdapter,
    registry: Arc<LayerRegistry>,
    session: Arc<Mutex<MapSessionState>>,
    gate: StyleSwitchGate,
    priority: Vec<OverlayId>,
    policy: OrderingPolicy,
    generation: AtomicU64,
    /// Generation of the last finished pass and how it ended.
    finished: watch::Sender<(u64, Option<OrderingOutcome>)>,
}

#[derive(Clone)]
pub struct OrderingScheduler {
    inner: Arc<SchedulerInner>,
}

impl OrderingScheduler {
    pub fn new(
        adapter: EngineAdapter,
        registry: Arc<LayerRegistry>,
        session: Arc<Mutex<MapSessionState>>,
        gate: StyleSwitchGate,
        priority: Vec<OverlayId>,
        policy: OrderingPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                adapter,
                registry,
                session,
                gate,
                priority,
                policy,
                generation: AtomicU64::new(0),
                finished: watch::Sender::new((0, None)),
            }),
        }
    }

    pub fn priority(&self) -> &[OverlayId] {
        &self.inner.priority
    }

    pub fn policy(&self) -> OrderingPolicy {
        self.inner.policy
    }

    /// Start a new pass in the background, superseding any running one.
    pub fn schedule(&self) {
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let inner = self.inner.clone();
        crate::runtime::spawn(async move {
            let outcome = inner.run(generation).await;
            if outcome != OrderingOutcome::Superseded {
                inner.finished.send_replace((generation, Some(outcome)));
            }
            outcome
        });
    }

    /// Outcome of the latest scheduled pass, once it has finished.
    /// `None` when no pass was ever scheduled.
    pub async fn settled(&self) -> Option<OrderingOutcome> {
        let mut rx = self.inner.finished.subscribe();
        let inner = self.inner.clone();
        let result = rx
            .wait_for(move |(finished, outcome)| {
                let latest = inner.generation.load(Ordering::SeqCst);
                latest == 0 || (*finished == latest && outcome.is_some())
            })
            .await;
        match result {
            Ok(value) => value.1,
            Err(_) => None,
        }
    }

    /// One pass right now, without readiness retries.
    #[cfg(test)]
    pub(crate) fn apply_now(&self) -> bool {
        matches!(self.inner.attempt(), Attempt::Applied)
    }
}

impl SchedulerInner {
    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    async fn run(&self, generation: u64) -> OrderingOutcome {
        let attempts = self.policy.max_retries.max(1);
        for attempt in 1..=attempts {
            if !self.is_current(generation) {
                return OrderingOutcome::Superseded;
            }
            match self.attempt() {
                Attempt::Applied => {
                    tracing::debug!(attempt, "draw order applied");
                    return OrderingOutcome::Applied;
                }
                Attempt::NotReady(reason) => {
                    tracing::trace!(attempt, reason, "draw order not ready");
                }
            }
            if attempt < attempts {
                crate::runtime::sleep(self.policy.delay).await;
            }
        }
        tracing::debug!(attempts, "gave up reasserting draw order");
        OrderingOutcome::GaveUp
    }

    /// Active prioritized overlays, lowest priority first.
    fn prioritized(&self) -> Vec<(OverlayId, RealizedOverlay)> {
        let active = self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .active
            .clone();
        self.priority
            .iter()
            .filter(|id| active.contains(id))
            .filter_map(|id| {
                let realized = self.registry.state(id)?.realized()?;
                Some((id.clone(), realized))
            })
            .collect()
    }

    fn attempt(&self) -> Attempt {
        profiling::scope!("ordering::attempt");
        if !self.gate.is_open() {
            return Attempt::NotReady("style switch in flight");
        }
        let overlays = self.prioritized();
        if overlays
            .iter()
            .any(|(_, realized)| !self.adapter.sources_ready(&realized.sources))
        {
            return Attempt::NotReady("sources loading");
        }

        let engine = self.adapter.engine();
        for (id, realized) in &overlays {
            for layer in &realized.layers {
                if let Err(e) = engine.move_layer(layer, None) {
                    tracing::debug!(overlay = %id, layer, error = %e, "move failed");
                    return Attempt::NotReady("layer vanished");
                }
            }
        }
        Attempt::Applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Catalog, CatalogOptions};
    use crate::engine::{HeadlessEngine, MapEngine};
    use crate::registry::{OverlayNamespace, OverlayStatus};

    struct Fixture {
        engine: Arc<HeadlessEngine>,
        registry: Arc<LayerRegistry>,
        session: Arc<Mutex<MapSessionState>>,
        gate: StyleSwitchGate,
    }

    impl Fixture {
        fn new() -> Self {
            let catalog = Arc::new(Catalog::standard(&CatalogOptions::default()));
            Self {
                engine: Arc::new(HeadlessEngine::default()),
                registry: Arc::new(LayerRegistry::new(catalog, OverlayNamespace::default()).unwrap()),
                session: Arc::new(Mutex::new(MapSessionState::default())),
                gate: StyleSwitchGate::default(),
            }
        }

        fn scheduler(&self, priority: &[&str], policy: OrderingPolicy) -> OrderingScheduler {
            OrderingScheduler::new(
                EngineAdapter::new(self.engine.clone()),
                self.registry.clone(),
                self.session.clone(),
                self.gate.clone(),
                priority.iter().map(|p| OverlayId::from(*p)).collect(),
                policy,
            )
        }

        /// Realize a tile overlay directly, bypassing the orchestrator.
        fn realize(&self, id: &str) {
            let id = OverlayId::from(id);
            let recipe = self.registry.recipe_for(&id).unwrap();
            self.engine
                .add_source(id.as_str(), recipe.static_source().unwrap())
                .unwrap();
            for layer in &recipe.layers {
                self.engine.add_layer(layer.clone(), None).unwrap();
            }
            let state = self.registry.state_for(&id);
            state.set_realized(Some(RealizedOverlay {
                sources: recipe.source_ids(),
                layers: recipe.layer_ids().map(String::from).collect(),
                images: Vec::new(),
            }));
            state.set_status(OverlayStatus::Active);
            self.session.lock().unwrap().activate(&id);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_priority_order_applied_once_loaded() {
        let fixture = Fixture::new();
        fixture.realize("tile_openseamap");
        fixture.realize("tile_gsi_photo");
        let scheduler = fixture.scheduler(
            &["tile_gsi_photo", "tile_openseamap"],
            OrderingPolicy::default(),
        );
        scheduler.schedule();
        let driver = fixture.engine.drive(Duration::from_millis(100));
        assert_eq!(scheduler.settled().await, Some(OrderingOutcome::Applied));
        driver.abort();
        assert_eq!(fixture.engine.layer_ids(), vec!["tile_gsi_photo", "tile_openseamap"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_when_sources_never_load() {
        let fixture = Fixture::new();
        fixture.engine.stall_source("tile_openseamap");
        fixture.realize("tile_openseamap");
        let policy = OrderingPolicy {
            max_retries: 5,
            delay: Duration::from_millis(1000),
        };
        let scheduler = fixture.scheduler(&["tile_openseamap"], policy);
        let started = tokio::time::Instant::now();
        scheduler.schedule();
        assert_eq!(scheduler.settled().await, Some(OrderingOutcome::GaveUp));
        assert!(started.elapsed() <= Duration::from_millis(5 * 1000));
    }

    #[tokio::test]
    async fn test_settled_without_schedule() {
        let fixture = Fixture::new();
        let scheduler = fixture.scheduler(&[], OrderingPolicy::default());
        assert_eq!(scheduler.settled().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unprioritized_overlays_stay_below() {
        let fixture = Fixture::new();
        fixture.realize("tile_gsi_photo");
        fixture.realize("tile_railwaymap");
        fixture.engine.frame();
        fixture.engine.frame();
        let scheduler = fixture.scheduler(&["tile_gsi_photo"], OrderingPolicy::default());
        assert!(scheduler.apply_now());
        assert_eq!(fixture.engine.layer_ids(), vec!["tile_railwaymap", "tile_gsi_photo"]);
    }
}
