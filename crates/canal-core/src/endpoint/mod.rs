//! HOST and DAI endpoints: gateways between pipeline buffers and DMA.
//!
//! Endpoints bypass the module adapter's copy engines. The adapter calls
//! their [`EndpointProcess`] entry directly; they own their DMA channel and
//! are the only callers of it.

mod dai;
mod dma;
mod group;
mod host;

pub use dai::{DaiEndpoint, DaiMember};
pub use dma::{DmaChannel, DmaConfig, DmaFactory, DmaStatus, SimDma, SimDmaBank, SimDmaPort};
pub use group::{DaiGroup, DaiGroups, GroupMember, GroupTrigger};
pub use host::HostEndpoint;

use crate::component::{CompDev, StreamPosition, verify_params};
use crate::error::{ComponentError, CopyStatus, Result, Status};
use crate::state::TriggerCmd;
use crate::stream::StreamParams;
use std::fmt;

/// Which gateway an endpoint represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointKind {
    /// Host memory.
    Host,
    /// Device audio interface.
    Dai,
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Host => "host",
            Self::Dai => "dai",
        })
    }
}

/// Dedicated entry for endpoint components.
pub trait EndpointProcess: Send {
    /// Gateway kind.
    fn kind(&self) -> EndpointKind;

    /// Negotiate stream parameters.
    fn params(&mut self, dev: &CompDev, params: &StreamParams) -> Result<()> {
        verify_params(dev, params)
    }

    /// Configure the DMA channel. The component is already in PREPARE.
    fn prepare(&mut self, dev: &CompDev) -> Result<()>;

    /// Apply a lifecycle command, including the state change.
    fn trigger(&mut self, dev: &mut CompDev, cmd: TriggerCmd) -> Result<Status>;

    /// Move one period between the buffer and the DMA channel.
    fn copy(&mut self, dev: &mut CompDev) -> Result<CopyStatus>;

    /// Stop the channel and drop per-stream state.
    fn reset(&mut self, dev: &CompDev) -> Result<()>;

    /// Bytes transferred and xruns seen since prepare.
    fn position(&self, dev: &CompDev) -> StreamPosition;

    /// Trigger group, if any.
    fn group(&self) -> Option<u32> {
        None
    }

    /// Join or leave a trigger group.
    fn set_group(&mut self, _dev: &CompDev, _group: Option<u32>) -> Result<()> {
        Err(ComponentError::NotSupported("trigger groups"))
    }

    /// Physical trigger requested by the member that closed a group round.
    fn group_trigger(&mut self, _dev: &CompDev, _cmd: TriggerCmd) -> Result<()> {
        Err(ComponentError::NotSupported("trigger groups"))
    }

    /// Release the DMA channel.
    fn free(&mut self, _dev: &CompDev) {}
}

/// Drive `dma` for a command that changed the component's state.
pub(crate) fn apply_dma(dma: &mut dyn DmaChannel, cmd: TriggerCmd) -> Result<()> {
    match cmd {
        TriggerCmd::Start | TriggerCmd::Release => dma.start(),
        TriggerCmd::Stop | TriggerCmd::Xrun | TriggerCmd::Reset => dma.stop(),
        TriggerCmd::Pause => dma.pause(),
        TriggerCmd::Prepare | TriggerCmd::PreStart | TriggerCmd::PreRelease => Ok(()),
    }
}

/// Period size in bytes as seen by an endpoint: the stream on its buffer
/// side, or the default parameters when nothing is connected.
pub(crate) fn period_bytes(dev: &CompDev) -> (usize, usize) {
    let params = dev
        .sources()
        .first()
        .or(dev.sinks().first())
        .map(|b| *b.acquire().stream.params())
        .unwrap_or_default();
    (params.bytes_for(dev.period_frames()), params.frame_bytes())
}

/// Scratch buffer sized with fallible allocation.
pub(crate) fn scratch(bytes: usize) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(bytes)
        .map_err(|_| ComponentError::NoMemory(format!("endpoint scratch of {bytes} bytes")))?;
    buf.resize(bytes, 0);
    Ok(buf)
}
