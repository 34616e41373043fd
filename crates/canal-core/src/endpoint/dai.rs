//! DAI endpoint: the gateway to a device audio interface.
//!
//! Playback pushes the source buffer into the DMA FIFO, capture pulls the
//! FIFO into the sink buffer. Starvation on either side is not an error:
//! it is counted in the stream position and reported as an
//! [`XrunEvent`](crate::notify::XrunEvent).
//!
//! A grouped DAI routes START, RELEASE, STOP and PAUSE through its
//! [`DaiGroup`]; the hardware only moves when the whole group has arrived.
//! A member that arrived early returns at once; a failed round reaches it as
//! the result of its next copy or START/RELEASE/PAUSE.

use super::{
    DaiGroup, DaiGroups, DmaChannel, DmaConfig, EndpointKind, EndpointProcess, GroupMember, GroupTrigger, apply_dma,
    period_bytes, scratch,
};
use crate::component::{CompDev, CompId, Direction, StreamPosition, status_of};
use crate::error::{ComponentError, CopyStatus, Result, Status};
use crate::idc::CoreId;
use crate::notify::{XrunEvent, XrunKind, XrunNotifier};
use crate::state::{ComponentState, SharedState, Transition, TriggerCmd};
use parking_lot::Mutex;
use std::sync::Arc;

struct DaiHw {
    dma: Box<dyn DmaChannel>,
    position: StreamPosition,
    pending_error: Option<ComponentError>,
}

fn trigger_hw(hw: &Mutex<DaiHw>, state: &SharedState, cmd: TriggerCmd) -> Result<Transition> {
    let transition = state.apply(cmd)?;
    if !transition.already_set() {
        apply_dma(hw.lock().dma.as_mut(), cmd)?;
    }
    Ok(transition)
}

/// Group membership handle of one DAI.
pub struct DaiMember {
    comp: CompId,
    core: CoreId,
    hw: Arc<Mutex<DaiHw>>,
    state: SharedState,
}

impl GroupMember for DaiMember {
    fn core(&self) -> CoreId {
        self.core
    }

    fn physical_trigger(&self, cmd: TriggerCmd) -> Result<()> {
        tracing::debug!(comp = self.comp.0, ?cmd, "group trigger");
        trigger_hw(&self.hw, &self.state, cmd).map(|_| ())
    }

    fn round_result(&self, result: &Result<()>) {
        if let Err(err) = result {
            self.hw.lock().pending_error = Some(err.clone());
        }
    }
}

/// Gateway to a device audio interface.
pub struct DaiEndpoint {
    hw: Arc<Mutex<DaiHw>>,
    direction: Direction,
    fifo_bytes: usize,
    groups: Arc<DaiGroups>,
    group: Option<Arc<DaiGroup>>,
    notifier: XrunNotifier,
    period_bytes: usize,
    frame_bytes: usize,
    scratch: Vec<u8>,
}

impl DaiEndpoint {
    /// DAI endpoint transferring through `dma`.
    pub fn new(
        dma: Box<dyn DmaChannel>,
        direction: Direction,
        fifo_bytes: usize,
        groups: Arc<DaiGroups>,
        notifier: XrunNotifier,
    ) -> Self {
        Self {
            hw: Arc::new(Mutex::new(DaiHw {
                dma,
                position: StreamPosition::default(),
                pending_error: None,
            })),
            direction,
            fifo_bytes,
            groups,
            group: None,
            notifier,
            period_bytes: 0,
            frame_bytes: 1,
            scratch: Vec::new(),
        }
    }

    fn leave_group(&mut self, dev: &CompDev) -> Result<()> {
        if let Some(group) = self.group.take() {
            if let Err(err) = self.groups.leave(group.id(), dev.id()) {
                self.group = Some(group);
                return Err(err);
            }
        }
        Ok(())
    }

    fn report_xrun(&self, dev: &CompDev, position: &mut StreamPosition, kind: XrunKind, bytes: usize) {
        position.xruns += 1;
        position.xrun_bytes += bytes as u64;
        self.notifier.notify(XrunEvent {
            comp: dev.id(),
            pipeline: dev.config().pipeline,
            kind,
            bytes,
        });
    }

    fn round_down(&self, bytes: usize) -> usize {
        bytes.min(self.period_bytes) / self.frame_bytes * self.frame_bytes
    }
}

impl EndpointProcess for DaiEndpoint {
    fn kind(&self) -> EndpointKind {
        EndpointKind::Dai
    }

    fn prepare(&mut self, dev: &CompDev) -> Result<()> {
        let (period, frame) = period_bytes(dev);
        let mut hw = self.hw.lock();
        hw.dma.config(&DmaConfig {
            direction: self.direction,
            period_bytes: period,
            fifo_bytes: self.fifo_bytes,
        })?;
        self.scratch = scratch(period)?;
        self.period_bytes = period;
        self.frame_bytes = frame.max(1);
        hw.position = StreamPosition::default();
        hw.pending_error = None;
        Ok(())
    }

    fn trigger(&mut self, dev: &mut CompDev, cmd: TriggerCmd) -> Result<Status> {
        let grouped = matches!(
            cmd,
            TriggerCmd::Start | TriggerCmd::Release | TriggerCmd::Stop | TriggerCmd::Pause
        );
        if matches!(cmd, TriggerCmd::Start | TriggerCmd::Release | TriggerCmd::Pause) {
            if let Some(err) = self.hw.lock().pending_error.take() {
                return Err(err);
            }
        }

        let Some(group) = self.group.as_ref().filter(|_| grouped) else {
            return Ok(status_of(trigger_hw(&self.hw, dev.shared_state(), cmd)?));
        };

        if dev.state().transition(cmd)?.is_none() {
            return Ok(Status::StopWalk);
        }
        match group.trigger(dev.id(), cmd) {
            Ok(GroupTrigger::Pending { remaining }) => {
                tracing::debug!(comp = dev.id().0, group = group.id(), remaining, ?cmd, "waiting for group");
                Ok(Status::Done)
            }
            Ok(GroupTrigger::Fired) => Ok(Status::Done),
            Err(err) => {
                // the round's result is returned here, not on the next copy
                self.hw.lock().pending_error = None;
                Err(err)
            }
        }
    }

    fn copy(&mut self, dev: &mut CompDev) -> Result<CopyStatus> {
        let mut hw = self.hw.lock();
        if let Some(err) = hw.pending_error.take() {
            return Err(err);
        }
        if dev.state() != ComponentState::Active {
            return Ok(CopyStatus::Moved(0));
        }
        let status = hw.dma.status();
        let DaiHw { dma, position, .. } = &mut *hw;

        let moved = match self.direction {
            Direction::Playback => {
                let buffer = dev
                    .sources()
                    .first()
                    .ok_or_else(|| ComponentError::invalid(format!("{}: dai playback without a source", dev.id())))?;
                let mut guard = buffer.acquire();
                let bytes = self.round_down(guard.stream.avail().min(status.free));
                if bytes == 0 {
                    if status.free >= self.frame_bytes && guard.stream.avail() < self.frame_bytes {
                        let missing = self.round_down(status.free);
                        self.report_xrun(dev, position, XrunKind::Underrun, missing);
                    }
                    return Ok(CopyStatus::Moved(0));
                }
                guard.stream.invalidate(bytes);
                guard.stream.peek(0, &mut self.scratch[..bytes]);
                let n = dma.push(&self.scratch[..bytes])?;
                guard.stream.consume(n);
                n
            }
            Direction::Capture => {
                let buffer = dev
                    .sinks()
                    .first()
                    .ok_or_else(|| ComponentError::invalid(format!("{}: dai capture without a sink", dev.id())))?;
                let mut guard = buffer.acquire();
                let bytes = self.round_down(status.avail.min(guard.stream.free()));
                if bytes == 0 {
                    if status.avail >= self.frame_bytes && guard.stream.free() < self.frame_bytes {
                        let dropped = self.round_down(status.avail);
                        let n = dma.pull(&mut self.scratch[..dropped])?;
                        self.report_xrun(dev, position, XrunKind::Overrun, n);
                    }
                    return Ok(CopyStatus::Moved(0));
                }
                let n = dma.pull(&mut self.scratch[..bytes])?;
                guard.stream.fill(0, &self.scratch[..n]);
                guard.stream.produce(n);
                guard.stream.writeback(n);
                n
            }
        };
        position.bytes += moved as u64;
        tracing::trace!(comp = dev.id().0, bytes = moved, "dai copy");
        Ok(CopyStatus::Moved((moved / self.frame_bytes) as u32))
    }

    fn reset(&mut self, _dev: &CompDev) -> Result<()> {
        let mut hw = self.hw.lock();
        hw.dma.stop()?;
        hw.pending_error = None;
        self.scratch = Vec::new();
        self.period_bytes = 0;
        Ok(())
    }

    fn position(&self, _dev: &CompDev) -> StreamPosition {
        self.hw.lock().position
    }

    fn group(&self) -> Option<u32> {
        self.group.as_ref().map(|g| g.id())
    }

    fn group_trigger(&mut self, dev: &CompDev, cmd: TriggerCmd) -> Result<()> {
        tracing::debug!(comp = dev.id().0, ?cmd, "group trigger from another core");
        trigger_hw(&self.hw, dev.shared_state(), cmd).map(|_| ())
    }

    fn set_group(&mut self, dev: &CompDev, group: Option<u32>) -> Result<()> {
        if self.group() == group {
            return Ok(());
        }
        self.leave_group(dev)?;
        if let Some(id) = group {
            let member = Arc::new(DaiMember {
                comp: dev.id(),
                core: dev.config().core,
                hw: Arc::clone(&self.hw),
                state: dev.shared_state().clone(),
            });
            self.group = Some(self.groups.join(id, dev.id(), member)?);
        }
        Ok(())
    }

    fn free(&mut self, dev: &CompDev) {
        if let Err(err) = self.leave_group(dev) {
            tracing::warn!(comp = dev.id().0, "leaving trigger group on free: {err}");
        }
        if let Err(err) = self.hw.lock().dma.stop() {
            tracing::warn!(comp = dev.id().0, "dma stop on free: {err}");
        }
    }
}
