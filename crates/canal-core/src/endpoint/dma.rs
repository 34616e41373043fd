//! DMA channel interface and an in-memory simulation of it.

use crate::component::{CompId, Direction};
use crate::error::{ComponentError, Result};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use super::EndpointKind;

/// Channel configuration applied at prepare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaConfig {
    /// Transfer direction.
    pub direction: Direction,
    /// Bytes per period.
    pub period_bytes: usize,
    /// FIFO depth in bytes.
    pub fifo_bytes: usize,
}

/// Bytes the channel can hand out (`avail`) or accept (`free`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DmaStatus {
    /// Bytes ready to be pulled.
    pub avail: usize,
    /// Bytes that can be pushed.
    pub free: usize,
}

/// A DMA channel owned by one endpoint.
pub trait DmaChannel: Send {
    /// Apply `config`; the channel must be stopped.
    fn config(&mut self, config: &DmaConfig) -> Result<()>;
    /// Start transfers.
    fn start(&mut self) -> Result<()>;
    /// Stop transfers.
    fn stop(&mut self) -> Result<()>;
    /// Pause transfers.
    fn pause(&mut self) -> Result<()>;
    /// Current fill level.
    fn status(&self) -> DmaStatus;
    /// Queue `data` towards the far side; returns the bytes accepted.
    fn push(&mut self, data: &[u8]) -> Result<usize>;
    /// Take data from the far side into `dst`; returns the bytes taken.
    fn pull(&mut self, dst: &mut [u8]) -> Result<usize>;
}

/// Hands out DMA channels to endpoints.
pub trait DmaFactory: Send + Sync {
    /// Request a channel for `comp`.
    fn request(&self, comp: CompId, kind: EndpointKind, direction: Direction, fifo_bytes: usize) -> Result<Box<dyn DmaChannel>>;
}

#[derive(Debug)]
struct Fifo {
    data: VecDeque<u8>,
    capacity: usize,
    running: bool,
    configured: Option<DmaConfig>,
    fail_next_start: bool,
    transferred: u64,
}

/// In-memory DMA channel; the far side is reached through [`SimDmaPort`].
#[derive(Debug)]
pub struct SimDma {
    fifo: Arc<Mutex<Fifo>>,
}

/// Device-side handle of a [`SimDma`].
#[derive(Debug, Clone)]
pub struct SimDmaPort {
    fifo: Arc<Mutex<Fifo>>,
}

impl SimDma {
    /// A channel with a FIFO of `capacity` bytes and its device-side port.
    pub fn new(capacity: usize) -> (Self, SimDmaPort) {
        let fifo = Arc::new(Mutex::new(Fifo {
            data: VecDeque::with_capacity(capacity),
            capacity,
            running: false,
            configured: None,
            fail_next_start: false,
            transferred: 0,
        }));
        (Self { fifo: Arc::clone(&fifo) }, SimDmaPort { fifo })
    }
}

impl DmaChannel for SimDma {
    fn config(&mut self, config: &DmaConfig) -> Result<()> {
        let mut fifo = self.fifo.lock();
        if fifo.running {
            return Err(ComponentError::Busy("dma reconfigured while running".into()));
        }
        if config.fifo_bytes > 0 {
            fifo.capacity = config.fifo_bytes;
        }
        if config.period_bytes > fifo.capacity {
            return Err(ComponentError::invalid(format!(
                "period of {} bytes exceeds the {}-byte fifo",
                config.period_bytes, fifo.capacity
            )));
        }
        fifo.data.clear();
        fifo.configured = Some(*config);
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        let mut fifo = self.fifo.lock();
        if std::mem::take(&mut fifo.fail_next_start) {
            return Err(ComponentError::Dma("channel refused to start".into()));
        }
        if fifo.configured.is_none() {
            return Err(ComponentError::Dma("start before config".into()));
        }
        fifo.running = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.fifo.lock().running = false;
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        self.fifo.lock().running = false;
        Ok(())
    }

    fn status(&self) -> DmaStatus {
        let fifo = self.fifo.lock();
        DmaStatus {
            avail: fifo.data.len(),
            free: fifo.capacity.saturating_sub(fifo.data.len()),
        }
    }

    fn push(&mut self, data: &[u8]) -> Result<usize> {
        let mut fifo = self.fifo.lock();
        let n = data.len().min(fifo.capacity.saturating_sub(fifo.data.len()));
        fifo.data.extend(&data[..n]);
        fifo.transferred += n as u64;
        Ok(n)
    }

    fn pull(&mut self, dst: &mut [u8]) -> Result<usize> {
        let mut fifo = self.fifo.lock();
        let n = dst.len().min(fifo.data.len());
        for (slot, byte) in dst.iter_mut().zip(fifo.data.drain(..n)) {
            *slot = byte;
        }
        fifo.transferred += n as u64;
        Ok(n)
    }
}

impl SimDmaPort {
    /// Device writes `data` into the FIFO; returns the bytes accepted.
    pub fn feed(&self, data: &[u8]) -> usize {
        let mut fifo = self.fifo.lock();
        let n = data.len().min(fifo.capacity.saturating_sub(fifo.data.len()));
        fifo.data.extend(&data[..n]);
        n
    }

    /// Device reads up to `max` bytes out of the FIFO.
    pub fn drain(&self, max: usize) -> Vec<u8> {
        let mut fifo = self.fifo.lock();
        let n = max.min(fifo.data.len());
        fifo.data.drain(..n).collect()
    }

    /// Bytes waiting in the FIFO.
    pub fn queued(&self) -> usize {
        self.fifo.lock().data.len()
    }

    /// FIFO capacity.
    pub fn capacity(&self) -> usize {
        self.fifo.lock().capacity
    }

    /// True while the channel is started.
    pub fn running(&self) -> bool {
        self.fifo.lock().running
    }

    /// Bytes moved through the endpoint side since creation.
    pub fn transferred(&self) -> u64 {
        self.fifo.lock().transferred
    }

    /// Make the next `start` fail.
    pub fn fail_next_start(&self) {
        self.fifo.lock().fail_next_start = true;
    }
}

/// [`DmaFactory`] producing [`SimDma`] channels and keeping their ports.
#[derive(Debug, Default)]
pub struct SimDmaBank {
    ports: Mutex<HashMap<CompId, SimDmaPort>>,
}

impl SimDmaBank {
    /// Empty bank.
    pub fn new() -> Self {
        Self::default()
    }

    /// Device-side port of the channel handed to `comp`.
    pub fn port(&self, comp: CompId) -> Option<SimDmaPort> {
        self.ports.lock().get(&comp).cloned()
    }

    /// Components holding a channel.
    pub fn components(&self) -> Vec<CompId> {
        let mut ids: Vec<CompId> = self.ports.lock().keys().copied().collect();
        ids.sort();
        ids
    }
}

impl DmaFactory for SimDmaBank {
    fn request(&self, comp: CompId, kind: EndpointKind, direction: Direction, fifo_bytes: usize) -> Result<Box<dyn DmaChannel>> {
        if fifo_bytes == 0 {
            return Err(ComponentError::invalid("dma fifo must be non-zero"));
        }
        let (channel, port) = SimDma::new(fifo_bytes);
        tracing::debug!(comp = comp.0, %kind, ?direction, fifo_bytes, "simulated dma channel");
        self.ports.lock().insert(comp, port);
        Ok(Box::new(channel))
    }
}
