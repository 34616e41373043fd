//! Xrun notifications from endpoints to whoever owns recovery.

use crate::component::{CompId, PipelineId};
use crossbeam_channel::{Receiver, Sender, TrySendError};

/// Kind of stream discontinuity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XrunKind {
    /// The device ran out of data (playback).
    Underrun,
    /// The device had nowhere to put data (capture).
    Overrun,
}

/// One reported xrun.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XrunEvent {
    /// Endpoint that detected the xrun.
    pub comp: CompId,
    /// Pipeline the endpoint belongs to.
    pub pipeline: PipelineId,
    /// Underrun or overrun.
    pub kind: XrunKind,
    /// Bytes missing or dropped.
    pub bytes: usize,
}

/// Sending half of the xrun channel. A disabled notifier drops events.
#[derive(Debug, Clone, Default)]
pub struct XrunNotifier {
    tx: Option<Sender<XrunEvent>>,
}

impl XrunNotifier {
    /// Bounded channel holding up to `capacity` undelivered events.
    pub fn channel(capacity: usize) -> (Self, Receiver<XrunEvent>) {
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        (Self { tx: Some(tx) }, rx)
    }

    /// A notifier that discards everything.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Report an xrun without blocking the data path.
    pub fn notify(&self, event: XrunEvent) {
        tracing::warn!(comp = event.comp.0, pipeline = event.pipeline.0, kind = ?event.kind, bytes = event.bytes, "xrun");
        let Some(tx) = &self.tx else { return };
        match tx.try_send(event) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => {}
            Err(TrySendError::Full(_)) => tracing::debug!("xrun queue full, event dropped"),
        }
    }
}
