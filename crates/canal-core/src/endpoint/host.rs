//! Host endpoint: moves one period between host memory (a DMA channel)
//! and the pipeline buffer each copy.

use super::{DmaChannel, DmaConfig, EndpointKind, EndpointProcess, apply_dma, period_bytes, scratch};
use crate::component::{CompDev, Direction, StreamPosition};
use crate::error::{ComponentError, CopyStatus, Result, Status};
use crate::state::{ComponentState, TriggerCmd};

/// Gateway to host memory.
pub struct HostEndpoint {
    dma: Box<dyn DmaChannel>,
    direction: Direction,
    fifo_bytes: usize,
    period_bytes: usize,
    frame_bytes: usize,
    scratch: Vec<u8>,
    position: StreamPosition,
}

impl HostEndpoint {
    /// Host endpoint transferring through `dma`.
    pub fn new(dma: Box<dyn DmaChannel>, direction: Direction, fifo_bytes: usize) -> Self {
        Self {
            dma,
            direction,
            fifo_bytes,
            period_bytes: 0,
            frame_bytes: 1,
            scratch: Vec::new(),
            position: StreamPosition::default(),
        }
    }

    fn bytes_to_move(&self, available: usize, room: usize) -> usize {
        let bytes = available.min(room).min(self.period_bytes);
        bytes / self.frame_bytes * self.frame_bytes
    }
}

impl EndpointProcess for HostEndpoint {
    fn kind(&self) -> EndpointKind {
        EndpointKind::Host
    }

    fn prepare(&mut self, dev: &CompDev) -> Result<()> {
        let (period, frame) = period_bytes(dev);
        self.dma.config(&DmaConfig {
            direction: self.direction,
            period_bytes: period,
            fifo_bytes: self.fifo_bytes,
        })?;
        self.scratch = scratch(period)?;
        self.period_bytes = period;
        self.frame_bytes = frame.max(1);
        self.position = StreamPosition::default();
        Ok(())
    }

    fn trigger(&mut self, dev: &mut CompDev, cmd: TriggerCmd) -> Result<Status> {
        let transition = dev.set_state(cmd)?;
        if transition.already_set() {
            return Ok(Status::StopWalk);
        }
        apply_dma(self.dma.as_mut(), cmd)?;
        Ok(Status::Done)
    }

    fn copy(&mut self, dev: &mut CompDev) -> Result<CopyStatus> {
        if dev.state() != ComponentState::Active {
            return Ok(CopyStatus::Moved(0));
        }
        let dma = self.dma.status();
        let moved = match self.direction {
            Direction::Playback => {
                let buffer = dev
                    .sinks()
                    .first()
                    .ok_or_else(|| ComponentError::invalid(format!("{}: host playback without a sink", dev.id())))?;
                let mut guard = buffer.acquire();
                let bytes = self.bytes_to_move(dma.avail, guard.stream.free());
                let n = self.dma.pull(&mut self.scratch[..bytes])?;
                guard.stream.fill(0, &self.scratch[..n]);
                guard.stream.produce(n);
                guard.stream.writeback(n);
                n
            }
            Direction::Capture => {
                let buffer = dev
                    .sources()
                    .first()
                    .ok_or_else(|| ComponentError::invalid(format!("{}: host capture without a source", dev.id())))?;
                let mut guard = buffer.acquire();
                let bytes = self.bytes_to_move(guard.stream.avail(), dma.free);
                guard.stream.invalidate(bytes);
                guard.stream.peek(0, &mut self.scratch[..bytes]);
                let n = self.dma.push(&self.scratch[..bytes])?;
                guard.stream.consume(n);
                n
            }
        };
        self.position.bytes += moved as u64;
        tracing::trace!(comp = dev.id().0, bytes = moved, "host copy");
        Ok(CopyStatus::Moved((moved / self.frame_bytes) as u32))
    }

    fn reset(&mut self, _dev: &CompDev) -> Result<()> {
        self.dma.stop()?;
        self.scratch = Vec::new();
        self.period_bytes = 0;
        Ok(())
    }

    fn position(&self, _dev: &CompDev) -> StreamPosition {
        self.position
    }

    fn free(&mut self, dev: &CompDev) {
        if let Err(err) = self.dma.stop() {
            tracing::warn!(comp = dev.id().0, "dma stop on free: {err}");
        }
    }
}
