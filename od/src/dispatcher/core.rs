//! Dispatcher implementation

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::instance::{Instance, InstanceSnapshot, InstanceState};
use crate::quarantine;
use crate::registry::{Lease, Registry};

use super::allocation::{Allocation, DispatchError, Dispatched, Reply};
use super::backlog::{Backlog, PendingRequest};
use super::config::DispatcherConfig;
use super::work::{ReleaseObserver, Work};

type Panic = Box<dyn Any + Send + 'static>;

/// Internal state protected by mutex
struct DispatcherInner {
    registry: Registry,
    backlog: Backlog,
    observer: Option<Arc<dyn ReleaseObserver>>,
}

struct Shared {
    config: DispatcherConfig,
    inner: Mutex<DispatcherInner>,
}

/// Consistent view of the registry and backlog
#[derive(Debug, Clone, Serialize)]
pub struct DispatcherState {
    pub instances: Vec<InstanceSnapshot>,
    pub backlog_len: usize,
}

/// Outcome of one admission decision
enum Admission {
    Run(Lease),
    Queue,
    Reject(DispatchError),
}

/// Decide whether a request runs now, waits, or is refused
///
/// Acquires the slot when the answer is Run. Caller holds the lock.
fn admit(config: &DispatcherConfig, registry: &mut Registry) -> Admission {
    if registry.is_empty() {
        return Admission::Reject(DispatchError::NoInstances);
    }
    if registry.all_blocked() {
        return Admission::Reject(DispatchError::AllInstancesBlocked);
    }

    let full = config.global_parallel_limit > 0
        && registry.count_by_state(InstanceState::Running) >= config.global_parallel_limit;

    match registry.select_available(full).and_then(|instance| registry.acquire(&instance)) {
        Some(lease) => Admission::Run(lease),
        None => Admission::Queue,
    }
}

/// The Dispatcher hands work to instances under a global and a per-instance
/// concurrency ceiling, queues what cannot run, and quarantines instances.
///
/// Cloning is cheap; all clones share one registry and one backlog.
#[derive(Clone)]
pub struct Dispatcher {
    shared: Arc<Shared>,
}

impl Dispatcher {
    /// Create a new dispatcher with the given configuration
    pub fn new(config: DispatcherConfig) -> Self {
        debug!(?config, "Dispatcher::new: called");
        let registry = Registry::new(config.per_instance_parallel_limit);
        Self {
            shared: Arc::new(Shared {
                config,
                inner: Mutex::new(DispatcherInner {
                    registry,
                    backlog: Backlog::default(),
                    observer: None,
                }),
            }),
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.shared.config
    }

    /// Register an instance; adding a known address is a no-op
    pub async fn add_instance(&self, address: &str) -> Instance {
        debug!(%address, "Dispatcher::add_instance: called");
        self.shared.inner.lock().await.registry.add(address)
    }

    /// Look up a registered instance by address
    pub async fn instance(&self, address: &str) -> Option<Instance> {
        self.shared.inner.lock().await.registry.find(address)
    }

    pub async fn instance_state(&self, instance: &Instance) -> Option<InstanceSnapshot> {
        self.shared.inner.lock().await.registry.snapshot(instance)
    }

    /// Round-robin instance, ignoring state and admission control
    pub async fn next_instance(&self) -> Option<Instance> {
        debug!("Dispatcher::next_instance: called");
        self.shared.inner.lock().await.registry.next()
    }

    /// Run work against the round-robin instance without admission control
    ///
    /// The instance's load is not tracked for this work.
    pub async fn with_next_instance<W: Work + 'static>(&self, work: W) -> Result<Instance, DispatchError> {
        debug!("Dispatcher::with_next_instance: called");
        let instance = self.next_instance().await.ok_or(DispatchError::NoInstances)?;
        Box::new(work).run(instance.clone()).await;
        Ok(instance)
    }

    /// Register the observer notified after every release, replacing any previous one
    pub async fn on_release<O: ReleaseObserver + 'static>(&self, observer: O) {
        debug!("Dispatcher::on_release: called");
        self.shared.inner.lock().await.observer = Some(Arc::new(observer));
    }

    /// Quarantine an instance for the configured duration
    ///
    /// Work already running on it is allowed to finish. The reinstatement timer
    /// cannot be cancelled; unblocking early still gets a redundant unblock later.
    pub async fn block_instance(&self, instance: &Instance) {
        let delay = self.shared.config.quarantine_duration();
        info!(address = %instance.address(), ?delay, "Blocking instance");
        self.shared.inner.lock().await.registry.block(instance);

        let shared = Arc::downgrade(&self.shared);
        let instance = instance.clone();
        quarantine::after(delay, async move {
            let Some(shared) = shared.upgrade() else {
                debug!(address = %instance.address(), "quarantine expired after dispatcher shutdown");
                return;
            };
            shared.inner.lock().await.registry.unblock(&instance);
            info!(address = %instance.address(), "Quarantine expired, instance ready");
        });
    }

    /// Reinstate an instance immediately
    pub async fn unblock_instance(&self, instance: &Instance) {
        info!(address = %instance.address(), "Unblocking instance");
        self.shared.inner.lock().await.registry.unblock(instance);
    }

    pub async fn snapshot(&self) -> DispatcherState {
        let inner = self.shared.inner.lock().await;
        DispatcherState {
            instances: inner.registry.snapshots(),
            backlog_len: inner.backlog.len(),
        }
    }

    /// Allocate an instance for `work`
    ///
    /// When capacity exists the work runs on the calling task and this returns
    /// once it has finished and the backlog has been drained, with the
    /// allocation already resolved. Otherwise the request is queued and the
    /// returned allocation stays pending until a later release dispatches it.
    /// When every instance is blocked the allocation comes back rejected and
    /// nothing is queued.
    pub async fn allocate<W: Work + 'static>(&self, work: W) -> Allocation {
        self.allocate_boxed(Box::new(work)).await
    }

    pub async fn allocate_boxed(&self, work: Box<dyn Work>) -> Allocation {
        let task_id = Uuid::now_v7();
        debug!(%task_id, "Dispatcher::allocate: called");
        let (allocation, reply) = Allocation::new(task_id);

        let lease = {
            let mut inner = self.shared.inner.lock().await;
            match admit(&self.shared.config, &mut inner.registry) {
                Admission::Run(lease) => lease,
                Admission::Queue => {
                    inner.backlog.push(PendingRequest {
                        task_id,
                        work,
                        reply,
                        enqueued_at: Instant::now(),
                    });
                    debug!(%task_id, backlog_len = inner.backlog.len(), "Dispatcher::allocate: no capacity, queued");
                    return allocation;
                }
                Admission::Reject(err) => {
                    warn!(%task_id, %err, "Allocation rejected");
                    let _ = reply.send(Err(err));
                    return allocation;
                }
            }
        };

        let panic = self.execute(task_id, lease, work, reply).await;
        let drain_panic = self.drain().await;
        if let Some(panic) = panic.or(drain_panic) {
            std::panic::resume_unwind(panic);
        }
        allocation
    }

    /// Run work on a leased instance, then give the slot back
    ///
    /// Returns the panic payload if the work panicked; the slot is released either way.
    async fn execute(&self, task_id: Uuid, lease: Lease, work: Box<dyn Work>, reply: Reply) -> Option<Panic> {
        let instance = lease.instance().clone();
        debug!(%task_id, address = %instance.address(), "Dispatcher::execute: running work");

        let mut guard = LeaseGuard {
            dispatcher: self.clone(),
            lease: Some(lease.clone()),
        };
        let result = AssertUnwindSafe(work.run(instance.clone())).catch_unwind().await;

        // The guard stays armed until the release holds the lock
        self.release(&lease).await;
        guard.disarm();

        match result {
            Ok(()) => {
                debug!(%task_id, address = %instance.address(), "Dispatcher::execute: work finished");
                let _ = reply.send(Ok(Dispatched {
                    task_id,
                    address: instance.address().to_string(),
                }));
                None
            }
            Err(panic) => {
                warn!(%task_id, address = %instance.address(), "Work panicked, slot released");
                Some(panic)
            }
        }
    }

    /// Give a slot back; the observer only hears about releases that changed the registry
    async fn release(&self, lease: &Lease) {
        let (snapshot, observer) = {
            let mut inner = self.shared.inner.lock().await;
            if !inner.registry.release(lease) {
                debug!(address = %lease.instance().address(), "Dispatcher::release: nothing to release");
                return;
            }
            (inner.registry.snapshot(lease.instance()), inner.observer.clone())
        };

        if let (Some(snapshot), Some(observer)) = (snapshot, observer) {
            observer.on_release(&snapshot);
        }
    }

    /// Dispatch queued requests, oldest first, until one cannot be admitted
    ///
    /// Each admitted request runs on this task; its release feeds the next
    /// iteration. A request refused for lack of capacity keeps its place at
    /// the head. A request refused because every instance is blocked is
    /// rejected and the drain stops.
    async fn drain(&self) -> Option<Panic> {
        let mut first_panic = None;
        loop {
            let (request, lease) = {
                let mut inner = self.shared.inner.lock().await;
                if inner.backlog.is_empty() {
                    debug!("Dispatcher::drain: backlog empty");
                    break;
                }
                let Some(request) = inner.backlog.pop() else {
                    break;
                };
                match admit(&self.shared.config, &mut inner.registry) {
                    Admission::Run(lease) => (request, lease),
                    Admission::Queue => {
                        debug!(task_id = %request.task_id, "Dispatcher::drain: still no capacity");
                        inner.backlog.requeue(request);
                        break;
                    }
                    Admission::Reject(err) => {
                        warn!(task_id = %request.task_id, %err, "Queued allocation rejected");
                        let _ = request.reply.send(Err(err));
                        break;
                    }
                }
            };

            let PendingRequest {
                task_id,
                work,
                reply,
                enqueued_at,
            } = request;
            debug!(
                %task_id,
                waited_ms = enqueued_at.elapsed().as_millis() as u64,
                "Dispatcher::drain: dispatching queued request"
            );
            let panic = self.execute(task_id, lease, work, reply).await;
            if first_panic.is_none() {
                first_panic = panic;
            }
        }
        first_panic
    }
}

/// Gives the slot back if the future running the work is dropped mid-flight
struct LeaseGuard {
    dispatcher: Dispatcher,
    lease: Option<Lease>,
}

impl LeaseGuard {
    fn disarm(&mut self) {
        self.lease = None;
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        let Some(lease) = self.lease.take() else {
            return;
        };
        warn!(address = %lease.instance().address(), "Work cancelled, releasing slot in background");
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let dispatcher = self.dispatcher.clone();
        handle.spawn(async move {
            dispatcher.release(&lease).await;
            if let Some(panic) = dispatcher.drain().await {
                std::panic::resume_unwind(panic);
            }
        });
    }
}
