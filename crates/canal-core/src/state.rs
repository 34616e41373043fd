//! Component lifecycle state machine.
//!
//! Every component owns a [`SharedState`] cell. The core executing the
//! component's operation is the only writer; peers (buffers, the stream-copy
//! engine deciding whether a neighbour is active, DAI group rounds) read it
//! without taking the component lock.
//!
//! | Command       | Legal from            | Moves to     |
//! |---------------|-----------------------|--------------|
//! | `Prepare`     | READY                 | PREPARE      |
//! | `PreStart`    | PREPARE               | PRE_ACTIVE   |
//! | `Start`       | PRE_ACTIVE            | ACTIVE       |
//! | `Pause`       | ACTIVE                | PAUSED       |
//! | `PreRelease`  | PAUSED                | PRE_ACTIVE   |
//! | `Release`     | PRE_ACTIVE            | ACTIVE       |
//! | `Stop`        | ACTIVE, PAUSED        | PREPARE      |
//! | `Reset`       | any                   | READY        |
//! | `Xrun`        | any                   | READY        |
//!
//! A command whose target equals the current state reports
//! [`Transition::AlreadySet`] instead of failing.

use crate::error::{ComponentError, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle state of a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum ComponentState {
    /// Created, not yet usable.
    #[default]
    Init = 0,
    /// Idle, buffers not committed.
    Ready = 1,
    /// Suspended by power management.
    Suspend = 2,
    /// Parameters committed, ready to start.
    Prepare = 3,
    /// Paused mid-stream.
    Paused = 4,
    /// Streaming.
    Active = 5,
    /// Armed for start or release.
    PreActive = 6,
}

impl ComponentState {
    const fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Self::Ready,
            2 => Self::Suspend,
            3 => Self::Prepare,
            4 => Self::Paused,
            5 => Self::Active,
            6 => Self::PreActive,
            _ => Self::Init,
        }
    }

    /// Validate `cmd` against this state and return the state it moves to.
    ///
    /// Returns `Ok(None)` when the component is already in the requested
    /// state.
    pub fn transition(self, cmd: TriggerCmd) -> Result<Option<ComponentState>> {
        let requested = cmd.requested_state();
        if self == requested {
            return Ok(None);
        }

        let legal = match cmd {
            TriggerCmd::Start | TriggerCmd::Release => self == Self::PreActive,
            TriggerCmd::Stop => matches!(self, Self::Active | Self::Paused),
            TriggerCmd::Pause => self == Self::Active,
            TriggerCmd::Reset | TriggerCmd::Xrun => true,
            TriggerCmd::Prepare => self == Self::Ready,
            TriggerCmd::PreStart => self == Self::Prepare,
            TriggerCmd::PreRelease => self == Self::Paused,
        };

        if legal {
            Ok(Some(requested))
        } else {
            Err(ComponentError::InvalidStateTransition { state: self, cmd })
        }
    }
}

/// Commands accepted by the state machine and by `trigger`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerCmd {
    /// Stop streaming and return to PREPARE.
    Stop,
    /// Start streaming from PRE_ACTIVE.
    Start,
    /// Pause an active stream.
    Pause,
    /// Resume a paused stream from PRE_ACTIVE.
    Release,
    /// Return to READY from any state.
    Reset,
    /// Commit parameters.
    Prepare,
    /// Report an under/overrun; returns to READY.
    Xrun,
    /// Arm for start.
    PreStart,
    /// Arm for release.
    PreRelease,
}

impl TriggerCmd {
    /// The state a successful command leaves the component in.
    pub const fn requested_state(self) -> ComponentState {
        match self {
            Self::Start | Self::Release => ComponentState::Active,
            Self::Prepare | Self::Stop => ComponentState::Prepare,
            Self::Pause => ComponentState::Paused,
            Self::Reset | Self::Xrun => ComponentState::Ready,
            Self::PreStart | Self::PreRelease => ComponentState::PreActive,
        }
    }
}

/// Result of applying a command to a [`SharedState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The state changed.
    Changed {
        /// Previous state.
        from: ComponentState,
        /// New state.
        to: ComponentState,
    },
    /// The component was already in the requested state.
    AlreadySet,
}

impl Transition {
    /// True when the state was already in effect.
    pub fn already_set(self) -> bool {
        matches!(self, Self::AlreadySet)
    }
}

/// Lock-free state cell shared between a component and its peers.
#[derive(Debug, Clone, Default)]
pub struct SharedState(Arc<AtomicU8>);

impl SharedState {
    /// Create a cell in `initial`.
    pub fn new(initial: ComponentState) -> Self {
        Self(Arc::new(AtomicU8::new(initial as u8)))
    }

    /// Current state.
    #[inline]
    pub fn get(&self) -> ComponentState {
        ComponentState::from_raw(self.0.load(Ordering::Acquire))
    }

    /// Overwrite the state without validation.
    ///
    /// Used for creation (INIT to READY) and for the trigger overrides that
    /// keep a component ACTIVE.
    #[inline]
    pub fn force(&self, state: ComponentState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// Validate and apply `cmd`.
    pub fn apply(&self, cmd: TriggerCmd) -> Result<Transition> {
        let from = self.get();
        match from.transition(cmd) {
            Ok(Some(to)) => {
                if cmd == TriggerCmd::Reset && from == ComponentState::Active {
                    tracing::warn!(?cmd, "reset while component is active");
                }
                self.force(to);
                Ok(Transition::Changed { from, to })
            }
            Ok(None) => {
                tracing::debug!(?cmd, state = ?from, "state already set");
                Ok(Transition::AlreadySet)
            }
            Err(err) => {
                tracing::error!(?cmd, state = ?from, "illegal state transition");
                Err(err)
            }
        }
    }

    /// True when both cells hold the same state.
    #[inline]
    pub fn matches(&self, other: &SharedState) -> bool {
        self.get() == other.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ComponentState as S;
    use TriggerCmd as C;

    const ALL_STATES: [ComponentState; 7] = [
        S::Init,
        S::Ready,
        S::Suspend,
        S::Prepare,
        S::Paused,
        S::Active,
        S::PreActive,
    ];

    #[test]
    fn full_start_stop_cycle() {
        let state = SharedState::new(S::Ready);
        for cmd in [C::Prepare, C::PreStart, C::Start, C::Pause, C::PreRelease, C::Release] {
            assert!(matches!(state.apply(cmd), Ok(Transition::Changed { .. })));
        }
        assert_eq!(state.get(), S::Active);
        state.apply(C::Stop).unwrap();
        assert_eq!(state.get(), S::Prepare);
        state.apply(C::Reset).unwrap();
        assert_eq!(state.get(), S::Ready);
    }

    #[test]
    fn repeated_command_is_already_set() {
        let state = SharedState::new(S::Prepare);
        assert_eq!(state.apply(C::Prepare), Ok(Transition::AlreadySet));
        assert_eq!(state.apply(C::Stop), Ok(Transition::AlreadySet));
        assert_eq!(state.get(), S::Prepare);
    }

    #[test]
    fn illegal_start_leaves_state_unchanged() {
        let state = SharedState::new(S::Ready);
        let err = state.apply(C::Start).unwrap_err();
        assert_eq!(
            err,
            ComponentError::InvalidStateTransition {
                state: S::Ready,
                cmd: C::Start
            }
        );
        assert_eq!(state.get(), S::Ready);
    }

    #[test]
    fn reset_and_xrun_always_legal() {
        for from in ALL_STATES {
            for cmd in [C::Reset, C::Xrun] {
                let state = SharedState::new(from);
                state.apply(cmd).unwrap();
                assert_eq!(state.get(), S::Ready);
            }
        }
    }

    #[test]
    fn transition_table() {
        let legal = [
            (C::Start, S::PreActive),
            (C::Release, S::PreActive),
            (C::Stop, S::Active),
            (C::Stop, S::Paused),
            (C::Pause, S::Active),
            (C::Prepare, S::Ready),
            (C::PreStart, S::Prepare),
            (C::PreRelease, S::Paused),
        ];
        for cmd in [C::Start, C::Release, C::Stop, C::Pause, C::Prepare, C::PreStart, C::PreRelease] {
            for from in ALL_STATES {
                let result = from.transition(cmd);
                if from == cmd.requested_state() {
                    assert_eq!(result, Ok(None), "{cmd:?} from {from:?}");
                } else if legal.contains(&(cmd, from)) {
                    assert_eq!(result, Ok(Some(cmd.requested_state())), "{cmd:?} from {from:?}");
                } else {
                    assert!(result.is_err(), "{cmd:?} from {from:?} should be rejected");
                }
            }
        }
    }

    #[test]
    fn clones_share_the_cell() {
        let a = SharedState::new(S::Ready);
        let b = a.clone();
        a.apply(C::Prepare).unwrap();
        assert_eq!(b.get(), S::Prepare);
        assert!(a.matches(&b));
    }
}
