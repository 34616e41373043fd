//! Error and status types shared by every component operation.
//!
//! Operations return [`Result<Status>`] (or [`Result<CopyStatus>`] for the
//! data path). A successful result can still ask the pipeline walker to stop
//! descending the current branch; that is a normal outcome, not an error.

use crate::state::{ComponentState, TriggerCmd};
use thiserror::Error;

/// Errors reported by component, buffer and dispatch operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ComponentError {
    /// A caller supplied an out-of-range or inconsistent argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The requested command is illegal in the current state.
    #[error("cannot apply {cmd:?} in state {state:?}")]
    InvalidStateTransition {
        /// State the component was in.
        state: ComponentState,
        /// Command that was rejected.
        cmd: TriggerCmd,
    },

    /// A staging or buffer allocation exceeded the memory budget.
    #[error("out of memory: {0}")]
    NoMemory(String),

    /// The component does not implement the requested operation.
    #[error("operation not supported: {0}")]
    NotSupported(&'static str),

    /// The resource is in use by a conflicting request.
    #[error("busy: {0}")]
    Busy(String),

    /// Not enough input data to make progress.
    #[error("no data available")]
    NoData,

    /// Not enough output space to make progress.
    #[error("no space available")]
    NoSpace,

    /// A referenced component, buffer, pipeline or driver is unknown.
    #[error("not found: {0}")]
    NotFound(String),

    /// The target core has no running executor.
    #[error("core {0} is not running")]
    IdcUnavailable(u32),

    /// The target core did not answer within the configured timeout.
    #[error("core {0} did not answer in time")]
    IdcTimeout(u32),

    /// The DMA channel reported a failure.
    #[error("dma: {0}")]
    Dma(String),
}

impl ComponentError {
    /// Build an [`InvalidArgument`](Self::InvalidArgument) error.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Build a [`NotFound`](Self::NotFound) error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// True for the two "come back later" data-path conditions that the
    /// module adapter tolerates.
    pub fn is_flow_control(&self) -> bool {
        matches!(self, Self::NoData | Self::NoSpace)
    }
}

/// Result type for component operations.
pub type Result<T> = std::result::Result<T, ComponentError>;

/// Outcome of a successful control operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Operation completed; keep walking downstream.
    Done,
    /// Operation completed (or was already in effect); do not descend
    /// past this component on the current branch.
    StopWalk,
}

impl Status {
    /// True when the walker should stop descending.
    pub fn stops_walk(self) -> bool {
        matches!(self, Self::StopWalk)
    }
}

/// Outcome of a successful copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyStatus {
    /// The number of frames moved during this call.
    Moved(u32),
    /// Nothing was done; the walker should not descend.
    StopWalk,
}

impl CopyStatus {
    /// Frames moved, zero for [`StopWalk`](Self::StopWalk).
    pub fn frames(self) -> u32 {
        match self {
            Self::Moved(frames) => frames,
            Self::StopWalk => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flow_control_errors() {
        assert!(ComponentError::NoData.is_flow_control());
        assert!(ComponentError::NoSpace.is_flow_control());
        assert!(!ComponentError::invalid("x").is_flow_control());
    }

    #[test]
    fn transition_error_display() {
        let err = ComponentError::InvalidStateTransition {
            state: ComponentState::Ready,
            cmd: TriggerCmd::Start,
        };
        assert_eq!(err.to_string(), "cannot apply Start in state Ready");
    }

    #[test]
    fn copy_status_frames() {
        assert_eq!(CopyStatus::Moved(48).frames(), 48);
        assert_eq!(CopyStatus::StopWalk.frames(), 0);
    }
}
