//! Inter-component buffers.
//!
//! A [`CompBuffer`] connects exactly one producing component to exactly one
//! consuming component. All access goes through [`CompBuffer::acquire`], which
//! returns an exclusive guard; the peers' lifecycle states are readable
//! through the guard without locking either component.

use crate::component::CompId;
use crate::idc::CoreId;
use crate::state::{ComponentState, SharedState};
use crate::stream::{AudioStream, StreamParams};
use parking_lot::{Mutex, MutexGuard};
use std::fmt;
use std::sync::Arc;

/// Buffer identifier, unique within a topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u32);

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buf{}", self.0)
    }
}

/// One end of a buffer: the component attached there.
#[derive(Debug, Clone)]
pub struct Peer {
    /// Attached component.
    pub comp: CompId,
    /// Core the component executes on.
    pub core: CoreId,
    state: SharedState,
}

impl Peer {
    /// Describe an attached component.
    pub fn new(comp: CompId, core: CoreId, state: SharedState) -> Self {
        Self { comp, core, state }
    }

    /// The peer's current lifecycle state.
    #[inline]
    pub fn state(&self) -> ComponentState {
        self.state.get()
    }
}

/// Buffer contents and attachment, reachable only through a guard.
#[derive(Debug)]
pub struct BufferInner {
    /// The ring carrying PCM data.
    pub stream: AudioStream,
    producer: Option<Peer>,
    consumer: Option<Peer>,
    params_set: bool,
}

impl BufferInner {
    /// Component writing into this buffer.
    pub fn producer(&self) -> Option<&Peer> {
        self.producer.as_ref()
    }

    /// Component reading from this buffer.
    pub fn consumer(&self) -> Option<&Peer> {
        self.consumer.as_ref()
    }

    /// Producer state, if a producer is attached.
    pub fn producer_state(&self) -> Option<ComponentState> {
        self.producer.as_ref().map(Peer::state)
    }

    /// Consumer state, if a consumer is attached.
    pub fn consumer_state(&self) -> Option<ComponentState> {
        self.consumer.as_ref().map(Peer::state)
    }

    /// True once stream parameters have been committed.
    pub fn params_set(&self) -> bool {
        self.params_set
    }

    /// Commit stream parameters.
    pub fn set_params(&mut self, params: StreamParams) {
        self.stream.set_params(params);
        self.params_set = true;
    }

    /// Drop committed parameters and empty the ring.
    pub fn reset_params(&mut self) {
        self.params_set = false;
        self.stream.reset();
        self.stream.zero();
    }

    /// True when the two ends run on different cores.
    pub fn crosses_cores(&self) -> bool {
        match (&self.producer, &self.consumer) {
            (Some(p), Some(c)) => p.core != c.core,
            _ => false,
        }
    }
}

/// Exclusive access to a buffer.
pub type BufferGuard<'a> = MutexGuard<'a, BufferInner>;

/// Shared handle to a buffer.
pub type BufferRef = Arc<CompBuffer>;

/// A buffer joining two components.
#[derive(Debug)]
pub struct CompBuffer {
    id: BufferId,
    inner: Mutex<BufferInner>,
}

impl CompBuffer {
    /// Allocate a buffer of `size` bytes.
    pub fn new(id: BufferId, size: usize) -> BufferRef {
        Self::with_params(id, size, StreamParams::default())
    }

    /// Allocate a buffer of `size` bytes carrying `params`.
    pub fn with_params(id: BufferId, size: usize, params: StreamParams) -> BufferRef {
        Arc::new(Self {
            id,
            inner: Mutex::new(BufferInner {
                stream: AudioStream::with_params(size, params),
                producer: None,
                consumer: None,
                params_set: false,
            }),
        })
    }

    /// Buffer identifier.
    #[inline]
    pub fn id(&self) -> BufferId {
        self.id
    }

    /// Lock the buffer for exclusive access.
    #[inline]
    pub fn acquire(&self) -> BufferGuard<'_> {
        self.inner.lock()
    }

    pub(crate) fn attach_producer(&self, peer: Peer) {
        self.inner.lock().producer = Some(peer);
    }

    pub(crate) fn attach_consumer(&self, peer: Peer) {
        self.inner.lock().consumer = Some(peer);
    }

    pub(crate) fn detach(&self, comp: CompId) {
        let mut inner = self.inner.lock();
        if inner.producer.as_ref().is_some_and(|p| p.comp == comp) {
            inner.producer = None;
        }
        if inner.consumer.as_ref().is_some_and(|c| c.comp == comp) {
            inner.consumer = None;
        }
    }
}
