//! Pool of pre-started runtimes.
//!
//! For every container backend that supports quick launch the pool keeps a
//! slot per out-of-process runtime backend. Slots of quick-launch capable
//! runtimes hold warm launcher processes; the remaining slot of a container
//! only holds prepared containers. Refilling happens in the background, one
//! instance per pass, and never reports errors to callers.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use appman_core::RuntimeId;
use appman_events::{AppManEvent, EventMetadata, EventReceiver};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::backend::RuntimeBackendRegistry;
use crate::container::{Container, ContainerRegistry};
use crate::settings::QuickLaunchSettings;
use crate::supervisor::SharedSupervisor;

/// Something handed out by [`QuickLauncherPool::acquire`].
#[derive(Debug)]
pub enum Acquired {
    /// A warm runtime to attach the application to.
    Runtime(RuntimeId),
    /// A prepared container to start the application in.
    Container(Box<dyn Container>),
}

#[derive(Debug)]
enum PooledInstance {
    Runtime(RuntimeId),
    Container(Box<dyn Container>),
}

#[derive(Debug)]
struct Slot {
    container_id: String,
    runtime_name: Option<String>,
    instances: Vec<PooledInstance>,
    failures: VecDeque<Instant>,
    disabled: bool,
}

impl Slot {
    fn needs_instance(&self, target: usize) -> bool {
        !self.disabled && self.instances.len() < target
    }
}

#[derive(Debug, Default)]
struct PoolState {
    slots: Vec<Slot>,
    shut_down: bool,
}

/// Handle to the quick launcher pool. Cheap to clone.
#[derive(Clone)]
pub struct QuickLauncherPool {
    state: Arc<Mutex<PoolState>>,
    supervisor: SharedSupervisor,
    settings: QuickLaunchSettings,
    default_container: String,
    rebuild_scheduled: Arc<AtomicBool>,
}

impl std::fmt::Debug for QuickLauncherPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuickLauncherPool")
            .field("settings", &self.settings)
            .field("idle", &self.idle_count())
            .finish_non_exhaustive()
    }
}

impl QuickLauncherPool {
    /// Create an empty pool. Call [`initialize`](Self::initialize) to
    /// populate it.
    #[must_use]
    pub fn new(
        supervisor: SharedSupervisor,
        settings: QuickLaunchSettings,
        default_container: impl Into<String>,
    ) -> Self {
        Self {
            state: Arc::default(),
            supervisor,
            settings,
            default_container: default_container.into(),
            rebuild_scheduled: Arc::new(AtomicBool::new(false)),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create the slots and schedule the first refill.
    pub fn initialize(&self, containers: &ContainerRegistry, backends: &RuntimeBackendRegistry) {
        if self.settings.runtimes_per_container == 0 {
            info!("Quick launcher disabled");
            return;
        }

        let runtime_backends: Vec<_> = backends
            .backends()
            .into_iter()
            .filter(|b| !b.is_in_process())
            .collect();

        {
            let mut state = self.lock();
            for container in containers.iter().filter(|c| c.supports_quick_launch()) {
                let mut runtime_less = false;
                for backend in &runtime_backends {
                    if backend.supports_quick_launch() {
                        state.slots.push(Slot {
                            container_id: container.id().to_owned(),
                            runtime_name: Some(backend.id().to_owned()),
                            instances: Vec::new(),
                            failures: VecDeque::new(),
                            disabled: false,
                        });
                    } else if !runtime_less {
                        runtime_less = true;
                        state.slots.push(Slot {
                            container_id: container.id().to_owned(),
                            runtime_name: None,
                            instances: Vec::new(),
                            failures: VecDeque::new(),
                            disabled: false,
                        });
                    }
                }
            }
            info!(
                slots = state.slots.len(),
                per_slot = self.settings.runtimes_per_container,
                "Quick launcher initialized"
            );
        }
        self.schedule_rebuild();
    }

    /// Total idle instances.
    #[must_use]
    pub fn idle_count(&self) -> usize {
        self.lock().slots.iter().map(|s| s.instances.len()).sum()
    }

    /// Whether any slot is below its target.
    #[must_use]
    pub fn is_short(&self) -> bool {
        let state = self.lock();
        !state.shut_down
            && state
                .slots
                .iter()
                .any(|s| s.needs_instance(self.settings.runtimes_per_container))
    }

    /// Take an instance for `runtime_name` in the default container.
    pub fn acquire(&self, runtime_name: &str) -> Option<Acquired> {
        let container_id = self.default_container.clone();
        self.take(&container_id, runtime_name)
    }

    /// Take an instance: first from the runtime-specific slot, then a bare
    /// container from the runtime-less slot.
    pub fn take(&self, container_id: &str, runtime_name: &str) -> Option<Acquired> {
        let taken = {
            let mut state = self.lock();
            let exact = state
                .slots
                .iter_mut()
                .find(|s| {
                    s.container_id == container_id
                        && s.runtime_name.as_deref() == Some(runtime_name)
                        && !s.instances.is_empty()
                })
                .and_then(|s| s.instances.pop());
            exact.or_else(|| {
                state
                    .slots
                    .iter_mut()
                    .find(|s| {
                        s.container_id == container_id
                            && s.runtime_name.is_none()
                            && !s.instances.is_empty()
                    })
                    .and_then(|s| s.instances.pop())
            })
        };

        let acquired = taken.map(|instance| match instance {
            PooledInstance::Runtime(id) => Acquired::Runtime(id),
            PooledInstance::Container(c) => Acquired::Container(c),
        });
        if acquired.is_some() {
            debug!(container_id, runtime_name, "Took quick launcher instance");
            self.schedule_rebuild();
        }
        acquired
    }

    /// Refill one instance. Returns whether more refill passes are needed.
    pub async fn rebuild_once(&self) -> bool {
        let target = self.settings.runtimes_per_container;
        let next = {
            let state = self.lock();
            if state.shut_down {
                return false;
            }
            state
                .slots
                .iter()
                .position(|s| s.needs_instance(target))
                .map(|i| (i, state.slots[i].container_id.clone(), state.slots[i].runtime_name.clone()))
        };
        let Some((index, container_id, runtime_name)) = next else {
            return false;
        };

        let created = match &runtime_name {
            Some(name) => {
                let mut supervisor = self.supervisor.lock().await;
                match supervisor.spawn_quick_launcher(&container_id, name).await {
                    Ok(id) => {
                        supervisor.bus().publish(AppManEvent::QuickLauncherReplenished {
                            metadata: EventMetadata::new("appman-runtime"),
                            runtime_id: id,
                            container_id: container_id.clone(),
                            runtime_name: Some(name.clone()),
                        });
                        Ok(PooledInstance::Runtime(id))
                    },
                    Err(e) => Err(e.to_string()),
                }
            },
            None => {
                let backend = self.supervisor.lock().await.containers().get(&container_id);
                match backend.map(|b| b.create(None)) {
                    Some(Ok(container)) => Ok(PooledInstance::Container(container)),
                    Some(Err(e)) => Err(e.to_string()),
                    None => Err(format!("no container backend '{container_id}'")),
                }
            },
        };

        let mut orphan = None;
        {
            let mut state = self.lock();
            let shut_down = state.shut_down;
            let Some(slot) = state.slots.get_mut(index) else {
                return false;
            };
            match created {
                Ok(instance) if shut_down => orphan = Some(instance),
                Ok(instance) => {
                    debug!(
                        container_id = %slot.container_id,
                        runtime_name = ?slot.runtime_name,
                        "Quick launcher instance added"
                    );
                    slot.instances.push(instance);
                },
                Err(e) => {
                    warn!(
                        container_id = %slot.container_id,
                        runtime_name = ?slot.runtime_name,
                        error = %e,
                        "Failed to create quick launcher instance"
                    );
                    self.record_failure(slot);
                },
            }
        }
        if let Some(PooledInstance::Runtime(id)) = orphan {
            self.supervisor.lock().await.discard(id);
        }
        self.is_short()
    }

    fn record_failure(&self, slot: &mut Slot) {
        let now = Instant::now();
        slot.failures.push_back(now);
        while let Some(first) = slot.failures.front() {
            if now.saturating_duration_since(*first) > self.settings.failed_start_window {
                slot.failures.pop_front();
            } else {
                break;
            }
        }
        if slot.failures.len() >= self.settings.failed_start_limit {
            warn!(
                container_id = %slot.container_id,
                runtime_name = ?slot.runtime_name,
                failures = slot.failures.len(),
                "Disabling quick launcher slot after repeated failures"
            );
            slot.disabled = true;
        }
    }

    /// Schedule background refilling unless it is already scheduled.
    pub fn schedule_rebuild(&self) {
        if self.rebuild_scheduled.swap(true, Ordering::AcqRel) {
            return;
        }
        let pool = self.clone();
        tokio::spawn(async move {
            loop {
                while pool.rebuild_once().await {
                    tokio::time::sleep(pool.settings.rebuild_delay).await;
                }
                pool.rebuild_scheduled.store(false, Ordering::Release);
                if !pool.is_short() || pool.rebuild_scheduled.swap(true, Ordering::AcqRel) {
                    break;
                }
            }
        });
    }

    /// Drop idle instances that exited and refill. Runs until the bus closes.
    pub fn watch(&self, mut events: EventReceiver) -> JoinHandle<()> {
        let pool = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let AppManEvent::RuntimeFinished {
                    runtime_id,
                    idle_quick_launcher: true,
                    ..
                } = event.as_ref()
                else {
                    continue;
                };
                pool.on_idle_exit(*runtime_id).await;
            }
        })
    }

    async fn on_idle_exit(&self, id: RuntimeId) {
        let removed = {
            let mut state = self.lock();
            let mut removed = false;
            for slot in &mut state.slots {
                let before = slot.instances.len();
                slot.instances
                    .retain(|i| !matches!(i, PooledInstance::Runtime(r) if *r == id));
                if slot.instances.len() != before {
                    removed = true;
                    self.record_failure(slot);
                }
            }
            removed
        };
        self.supervisor.lock().await.discard(id);
        if removed {
            debug!(runtime_id = %id, "Idle quick launcher exited");
            self.schedule_rebuild();
        }
    }

    /// Kill every idle instance and stop refilling.
    pub async fn kill_all(&self) {
        let instances: Vec<PooledInstance> = {
            let mut state = self.lock();
            state.shut_down = true;
            state
                .slots
                .iter_mut()
                .flat_map(|s| s.instances.drain(..))
                .collect()
        };
        let mut supervisor = self.supervisor.lock().await;
        for instance in instances {
            if let PooledInstance::Runtime(id) = instance {
                supervisor.discard(id);
            }
        }
        info!("Quick launcher pool shut down");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::ancestry::ProcessAncestry;
    use crate::backend::{LauncherBackend, NativeBackend};
    use crate::peer::DetachedEndpoints;
    use crate::settings::RuntimeSettings;
    use crate::supervisor::{RuntimeSupervisor, run};
    use crate::testing::FakeBackend;
    use appman_core::ExitStatus;
    use appman_events::EventBus;

    struct NoAncestry;

    impl ProcessAncestry for NoAncestry {
        fn parent_of(&self, _pid: u32) -> Option<u32> {
            None
        }
    }

    fn pool(fake: &FakeBackend, per_slot: usize) -> (QuickLauncherPool, SharedSupervisor, EventBus) {
        let mut backends = RuntimeBackendRegistry::new();
        backends.register(Arc::new(NativeBackend)).unwrap();
        backends.register(Arc::new(LauncherBackend::new("qml"))).unwrap();
        let mut containers = ContainerRegistry::new();
        containers.register(Arc::new(fake.clone())).unwrap();
        let backends = Arc::new(backends);
        let containers = Arc::new(containers);
        let bus = EventBus::new();
        let (sup, rx) = RuntimeSupervisor::new(
            Arc::clone(&backends),
            Arc::clone(&containers),
            Arc::new(DetachedEndpoints::new()),
            Arc::new(NoAncestry),
            bus.clone(),
            Arc::new(RuntimeSettings::default()),
        );
        let shared = sup.into_shared();
        tokio::spawn(run(Arc::clone(&shared), rx));

        let settings = QuickLaunchSettings {
            runtimes_per_container: per_slot,
            failed_start_limit: 3,
            ..QuickLaunchSettings::default()
        };
        let pool = QuickLauncherPool::new(Arc::clone(&shared), settings, fake.id);
        pool.initialize(&containers, &backends);
        (pool, shared, bus)
    }

    #[tokio::test(start_paused = true)]
    async fn test_fills_one_instance_per_pass() {
        let fake = FakeBackend::new("fake");
        let (pool, _sup, _bus) = pool(&fake, 2);

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(pool.idle_count(), 1);

        tokio::time::sleep(Duration::from_secs(5)).await;
        // Two launcher runtimes plus two prepared containers.
        assert_eq!(pool.idle_count(), 4);
        assert!(!pool.is_short());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_prefers_runtime_slot() {
        let fake = FakeBackend::new("fake");
        let (pool, sup, _bus) = pool(&fake, 1);
        tokio::time::sleep(Duration::from_secs(5)).await;

        let Some(Acquired::Runtime(id)) = pool.acquire("qml") else {
            panic!("expected a warm runtime");
        };
        assert!(sup.lock().await.runtime(id).unwrap().is_idle_quick_launcher());
        assert!(matches!(pool.acquire("native"), Some(Acquired::Container(_))));
        assert!(pool.acquire("native").is_none());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(pool.idle_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_when_zero() {
        let fake = FakeBackend::new("fake");
        let (pool, _sup, _bus) = pool(&fake, 0);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(pool.idle_count(), 0);
        assert!(pool.acquire("qml").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_failures_disable_slot() {
        let fake = FakeBackend::failing("fake");
        let (pool, _sup, _bus) = pool(&fake, 1);
        tokio::time::sleep(Duration::from_secs(30)).await;
        // Only the container slot fills; launcher starts keep failing.
        assert_eq!(pool.idle_count(), 1);
        assert!(!pool.is_short());
    }

    #[tokio::test(start_paused = true)]
    async fn test_crashed_idle_instance_is_replaced() {
        let fake = FakeBackend::new("fake");
        let (pool, sup, bus) = pool(&fake, 1);
        let _watch = pool.watch(bus.subscribe());
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(pool.idle_count(), 2);

        let pid = {
            let log = fake.log.lock().unwrap();
            *log.exits.keys().next().unwrap()
        };
        fake.exit(pid, ExitStatus::Signal(11));
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(pool.idle_count(), 2);
        assert_eq!(fake.log.lock().unwrap().started.len(), 2);
        assert_eq!(sup.lock().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_kill_all() {
        let fake = FakeBackend::new("fake");
        let (pool, sup, _bus) = pool(&fake, 1);
        tokio::time::sleep(Duration::from_secs(5)).await;
        pool.kill_all().await;
        assert_eq!(pool.idle_count(), 0);
        assert!(sup.lock().await.is_empty());
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(pool.idle_count(), 0);
    }
}
