//! Canal Core - component engine for DSP audio pipelines
//!
//! This crate provides the pieces a multi-core audio DSP needs to run a
//! graph of processing components: a lifecycle state machine every
//! component obeys, ring buffers joining components, cross-core dispatch
//! of control operations, and a module adapter that drives heterogeneous
//! processing modules through one contract.
//!
//! # Core Abstractions
//!
//! ## Components
//!
//! - [`ComponentOps`] - Capability table with default implementations
//! - [`ComponentDriver`] - Factory creating one component type
//! - [`ComponentCell`] - Shared instance that routes control calls locally or over IDC
//! - [`ComponentState`] / [`TriggerCmd`] - Lifecycle state machine
//!
//! ## Buffers
//!
//! - [`AudioStream`] - Byte ring with read/write indices and frame metadata
//! - [`CompBuffer`] - Ring joining one producer to one consumer, acquired under a lock
//! - [`CopyLimits`] - Frames that can move between two rings
//!
//! ## Cross-Core Dispatch
//!
//! - [`Cores`] - One executor thread per DSP core
//! - [`Idc`] - Blocking request/reply to a component on another core
//! - [`ComponentDirectory`] - Id to component lookup used by remote cores
//!
//! ## Module Adapter
//!
//! - [`ProcessingModule`] - A module exposing one or more processing entry points
//! - [`ModuleAdapter`] - Drives a module through stream-copy, raw-block or source/sink-object copies
//! - [`EndpointProcess`] - Dedicated entry for HOST and DAI gateways
//! - [`DaiGroup`] - Barrier triggering several DAIs at once
//!
//! ## Pipelines
//!
//! - [`PipelineBuilder`] / [`Pipeline`] - Component graph and its control walks
//! - [`LlScheduler`] - Per-core, once-per-period copy of every running pipeline
//!
//! # Example
//!
//! ```rust,ignore
//! use canal_core::{Idc, PipelineBuilder, PipelineId, CoreId, TriggerCmd, connect};
//!
//! connect(&host, &buffer, &dai)?;
//! let mut builder = PipelineBuilder::new(PipelineId(1), CoreId::PRIMARY, 48);
//! builder.add(host.clone())?.add(dai.clone())?;
//! builder.scheduling_component(dai.id());
//! let pipeline = builder.build()?;
//!
//! let idc = Idc::detached();
//! pipeline.params(&idc, &StreamParams::default())?;
//! pipeline.prepare(&idc)?;
//! pipeline.trigger(&idc, TriggerCmd::Start)?;
//! pipeline.copy()?;
//! ```

pub mod buffer;
pub mod component;
pub mod copy_limits;
pub mod endpoint;
pub mod error;
pub mod idc;
pub mod module;
pub mod notify;
pub mod pipeline;
pub mod schedule;
pub mod state;
pub mod stream;

pub use buffer::{BufferGuard, BufferId, BufferInner, BufferRef, CompBuffer, Peer};
pub use component::{
    AttrKind, AttrValue, CompConfig, CompDev, CompId, ComponentCell, ComponentDriver, ComponentOps, ComponentRef,
    ComponentType, Direction, LargeConfigBlock, PipelineId, StreamPosition, TypeConfig, status_of, verify_params,
};
pub use copy_limits::CopyLimits;
pub use endpoint::{
    DaiEndpoint, DaiGroup, DaiGroups, DmaChannel, DmaConfig, DmaFactory, DmaStatus, EndpointKind, EndpointProcess,
    GroupMember, GroupTrigger, HostEndpoint, SimDma, SimDmaBank, SimDmaPort,
};
pub use error::{ComponentError, CopyStatus, Result, Status};
pub use idc::{ComponentDirectory, CoreId, Cores, DEFAULT_IDC_TIMEOUT, Idc, IdcOp, current_core, set_current_core};
pub use module::{
    AdapterSettings, BlockSizes, ModuleAdapter, PrepareContext, ProcessingModule, ProcessingTopology, RawBlockProcess,
    RawInput, RawOutput, Sink, Source, SourceSinkProcess, StagingPlan, StreamInput, StreamOutput, StreamProcess,
    buff_periods,
};
pub use notify::{XrunEvent, XrunKind, XrunNotifier};
pub use pipeline::{Pipeline, PipelineBuilder, PipelineError, PipelineStatus, connect};
pub use schedule::{LlScheduler, TickReport};
pub use state::{ComponentState, SharedState, Transition, TriggerCmd};
pub use stream::{AudioStream, FrameFormat, StreamParams};
