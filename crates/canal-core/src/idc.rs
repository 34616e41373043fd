//! Inter-core communication.
//!
//! Each simulated DSP core is a thread running a command loop. Control
//! operations on a shared component owned by another core are sent to that
//! core as an [`IdcOp`]; the sender blocks until the owner replies or the
//! timeout expires. The owning core also ticks its low-latency scheduler on
//! request.
//!
//! No component lock is held while waiting for a reply: the caller holds
//! only the component reference, the owning core takes the lock itself.

use crate::component::{CompId, ComponentRef};
use crate::error::{ComponentError, Result, Status};
use crate::schedule::{LlScheduler, TickReport};
use crate::state::TriggerCmd;
use crate::stream::StreamParams;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::RwLock;
use std::cell::Cell;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Default time a caller waits for a remote core.
pub const DEFAULT_IDC_TIMEOUT: Duration = Duration::from_millis(500);

/// Core identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct CoreId(pub u32);

impl CoreId {
    /// The core that handles host requests.
    pub const PRIMARY: Self = Self(0);
}

impl fmt::Display for CoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "core{}", self.0)
    }
}

thread_local! {
    static CURRENT_CORE: Cell<CoreId> = const { Cell::new(CoreId::PRIMARY) };
}

/// Core the calling thread executes as. Threads not owned by [`Cores`]
/// count as the primary core.
pub fn current_core() -> CoreId {
    CURRENT_CORE.with(Cell::get)
}

/// Make the calling thread execute as `core`.
pub fn set_current_core(core: CoreId) {
    CURRENT_CORE.with(|c| c.set(core));
}

/// Control operation carried to a remote core.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IdcOp {
    /// `params` with the negotiated stream parameters.
    Params(StreamParams),
    /// `prepare`.
    Prepare,
    /// `trigger` with a command.
    Trigger(TriggerCmd),
    /// `reset`.
    Reset,
    /// Hardware side of a trigger-group round.
    GroupTrigger(TriggerCmd),
}

enum CoreCommand {
    Component {
        target: CompId,
        op: IdcOp,
        reply: Sender<Result<Status>>,
    },
    Tick {
        reply: Sender<TickReport>,
    },
    Shutdown,
}

/// Directory of live components, shared by every core.
#[derive(Clone, Default)]
pub struct ComponentDirectory {
    inner: Arc<RwLock<HashMap<CompId, ComponentRef>>>,
}

impl ComponentDirectory {
    /// Empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a component; ids must be unique.
    pub fn insert(&self, comp: ComponentRef) -> Result<()> {
        let mut map = self.inner.write();
        if map.contains_key(&comp.id()) {
            return Err(ComponentError::invalid(format!("duplicate component id {}", comp.id())));
        }
        map.insert(comp.id(), comp);
        Ok(())
    }

    /// Look up a component.
    pub fn get(&self, id: CompId) -> Option<ComponentRef> {
        self.inner.read().get(&id).cloned()
    }

    /// Remove a component.
    pub fn remove(&self, id: CompId) -> Option<ComponentRef> {
        self.inner.write().remove(&id)
    }

    /// Number of registered components.
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// True when no component is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registered ids in ascending order.
    pub fn ids(&self) -> Vec<CompId> {
        let mut ids: Vec<_> = self.inner.read().keys().copied().collect();
        ids.sort();
        ids
    }
}

/// Handle used to send requests to other cores. Cheap to clone.
#[derive(Clone)]
pub struct Idc {
    links: Arc<Vec<Sender<CoreCommand>>>,
    timeout: Duration,
}

impl fmt::Debug for Idc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Idc")
            .field("cores", &self.links.len())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Default for Idc {
    fn default() -> Self {
        Self::detached()
    }
}

impl Idc {
    /// A handle with no remote cores; every send fails with
    /// [`ComponentError::IdcUnavailable`].
    pub fn detached() -> Self {
        Self {
            links: Arc::new(Vec::new()),
            timeout: DEFAULT_IDC_TIMEOUT,
        }
    }

    /// How long a sender waits for a reply.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Number of reachable cores.
    pub fn cores(&self) -> usize {
        self.links.len()
    }

    fn link(&self, core: CoreId) -> Result<&Sender<CoreCommand>> {
        self.links
            .get(core.0 as usize)
            .ok_or(ComponentError::IdcUnavailable(core.0))
    }

    /// Run `op` on `target` on `core` and wait for its result.
    pub fn send(&self, core: CoreId, target: CompId, op: IdcOp) -> Result<Status> {
        let (reply, answer) = crossbeam_channel::bounded(1);
        self.link(core)?
            .send(CoreCommand::Component { target, op, reply })
            .map_err(|_| ComponentError::IdcUnavailable(core.0))?;
        match answer.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                tracing::error!(core = core.0, comp = target.0, ?op, "idc timeout");
                Err(ComponentError::IdcTimeout(core.0))
            }
            Err(RecvTimeoutError::Disconnected) => Err(ComponentError::IdcUnavailable(core.0)),
        }
    }

    fn request_tick(&self, core: CoreId) -> Result<Receiver<TickReport>> {
        let (reply, answer) = crossbeam_channel::bounded(1);
        self.link(core)?
            .send(CoreCommand::Tick { reply })
            .map_err(|_| ComponentError::IdcUnavailable(core.0))?;
        Ok(answer)
    }
}

/// The set of running core executors.
pub struct Cores {
    idc: Idc,
    schedulers: Vec<Arc<LlScheduler>>,
    workers: Vec<JoinHandle<()>>,
}

impl Cores {
    /// Spawn `count` core executors sharing `directory`.
    pub fn start(count: u32, directory: &ComponentDirectory, timeout: Duration) -> Result<Self> {
        if count == 0 {
            return Err(ComponentError::invalid("at least one core is required"));
        }

        let mut links = Vec::with_capacity(count as usize);
        let mut schedulers = Vec::with_capacity(count as usize);
        let mut workers = Vec::with_capacity(count as usize);

        for n in 0..count {
            let core = CoreId(n);
            let (tx, rx) = crossbeam_channel::unbounded();
            let scheduler = Arc::new(LlScheduler::new(core));
            let worker = {
                let directory = directory.clone();
                let scheduler = Arc::clone(&scheduler);
                std::thread::Builder::new()
                    .name(format!("canal-{core}"))
                    .spawn(move || core_loop(core, &rx, &directory, &scheduler))
                    .map_err(|e| {
                        tracing::error!(core = n, "failed to spawn core executor: {e}");
                        ComponentError::IdcUnavailable(n)
                    })?
            };
            links.push(tx);
            schedulers.push(scheduler);
            workers.push(worker);
        }

        tracing::info!(cores = count, ?timeout, "core executors started");
        Ok(Self {
            idc: Idc {
                links: Arc::new(links),
                timeout,
            },
            schedulers,
            workers,
        })
    }

    /// Handle for sending requests to the cores.
    pub fn idc(&self) -> &Idc {
        &self.idc
    }

    /// Number of cores.
    pub fn count(&self) -> u32 {
        self.schedulers.len() as u32
    }

    /// The low-latency scheduler owned by `core`.
    pub fn scheduler(&self, core: CoreId) -> Option<&Arc<LlScheduler>> {
        self.schedulers.get(core.0 as usize)
    }

    /// Run one scheduling period on every core and collect the reports.
    ///
    /// All cores are released before any answer is awaited, so they run
    /// concurrently.
    pub fn tick_all(&self) -> Result<Vec<TickReport>> {
        let pending = (0..self.count())
            .map(|n| self.idc.request_tick(CoreId(n)).map(|rx| (n, rx)))
            .collect::<Result<Vec<_>>>()?;
        pending
            .into_iter()
            .map(|(n, rx)| match rx.recv_timeout(self.idc.timeout) {
                Ok(report) => Ok(report),
                Err(RecvTimeoutError::Timeout) => Err(ComponentError::IdcTimeout(n)),
                Err(RecvTimeoutError::Disconnected) => Err(ComponentError::IdcUnavailable(n)),
            })
            .collect()
    }

    /// Stop every executor and wait for it to exit.
    pub fn shutdown(&mut self) {
        for link in self.idc.links.iter() {
            // executor may already be gone
            let _ = link.send(CoreCommand::Shutdown);
        }
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                tracing::error!("core executor panicked");
            }
        }
    }
}

impl Drop for Cores {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn core_loop(core: CoreId, rx: &Receiver<CoreCommand>, directory: &ComponentDirectory, scheduler: &LlScheduler) {
    set_current_core(core);
    tracing::debug!(core = core.0, "core executor running");

    while let Ok(cmd) = rx.recv() {
        match cmd {
            CoreCommand::Component { target, op, reply } => {
                let result = match directory.get(target) {
                    Some(comp) => comp.run_local(op),
                    None => Err(ComponentError::not_found(target.to_string())),
                };
                // the sender may have timed out and gone away
                let _ = reply.send(result);
            }
            CoreCommand::Tick { reply } => {
                let _ = reply.send(scheduler.run_once());
            }
            CoreCommand::Shutdown => break,
        }
    }

    tracing::debug!(core = core.0, "core executor stopped");
}
