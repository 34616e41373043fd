//! Integration tests for canal-core: pipelines, the module adapter's copy
//! engines, cross-core dispatch and endpoints working together.

use canal_core::{
    AdapterSettings, BlockSizes, BufferId, BufferRef, CompBuffer, CompConfig, CompDev, CompId, ComponentCell,
    ComponentDirectory, ComponentError, ComponentOps, ComponentRef, ComponentState, ComponentType, CopyStatus, CoreId,
    Cores, DaiEndpoint, DaiGroups, Direction, HostEndpoint, Idc, ModuleAdapter, Pipeline, PipelineBuilder, PipelineId,
    ProcessingModule, RawBlockProcess, RawInput, RawOutput, Result, SimDma, Sink, Source, SourceSinkProcess, Status,
    StreamInput, StreamOutput, StreamParams, StreamProcess, TriggerCmd, XrunNotifier, connect, current_core,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

/// Component that moves no data; stands in for upstream/downstream peers.
struct Idle;

impl ComponentOps for Idle {
    fn copy(&mut self, _dev: &mut CompDev) -> Result<CopyStatus> {
        Ok(CopyStatus::Moved(0))
    }
}

fn idle(id: u32, period_frames: u32) -> ComponentRef {
    let mut config = CompConfig::new(CompId(id), ComponentType::Custom(0));
    config.period_frames = period_frames;
    ComponentCell::from_ops(config, Box::new(Idle))
}

fn adapter(id: u32, period_frames: u32, module: Box<dyn ProcessingModule>) -> ComponentRef {
    let mut config = CompConfig::new(CompId(id), ComponentType::Custom(1));
    config.period_frames = period_frames;
    let ops = ModuleAdapter::new(module, AdapterSettings::default()).unwrap();
    ComponentCell::from_ops(config, Box::new(ops))
}

fn feed(buffer: &CompBuffer, bytes: &[u8]) {
    let mut guard = buffer.acquire();
    guard.stream.fill(0, bytes);
    guard.stream.produce(bytes.len());
}

// ---------------------------------------------------------------------------
// Raw-block deep buffering
// ---------------------------------------------------------------------------

/// Fixed-block module: consumes one 2048-byte block, emits 2048 bytes of 0x55.
struct BlockCodec {
    calls: Arc<AtomicUsize>,
}

impl RawBlockProcess for BlockCodec {
    fn block_sizes(&self) -> BlockSizes {
        BlockSizes {
            input: 2048,
            output: 2048,
        }
    }

    fn process(&mut self, inputs: &mut [RawInput<'_>], outputs: &mut [RawOutput<'_>]) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if inputs[0].size() < 2048 {
            return Err(ComponentError::NoData);
        }
        inputs[0].consume(2048);
        outputs[0].write(&[0x55; 2048]);
        Ok(())
    }
}

impl ProcessingModule for BlockCodec {
    fn name(&self) -> &str {
        "block-codec"
    }

    fn as_raw_block(&mut self) -> Option<&mut dyn RawBlockProcess> {
        Some(self)
    }
}

#[test]
fn deep_buffering_primes_with_silence() {
    const PERIOD_FRAMES: u32 = 480;
    const PERIOD_BYTES: usize = 1920;

    let calls = Arc::new(AtomicUsize::new(0));
    let feeder = idle(1, PERIOD_FRAMES);
    let codec = adapter(
        2,
        PERIOD_FRAMES,
        Box::new(BlockCodec {
            calls: Arc::clone(&calls),
        }),
    );
    let drain = idle(3, PERIOD_FRAMES);
    let input = CompBuffer::new(BufferId(1), PERIOD_BYTES * 4);
    let output = CompBuffer::new(BufferId(2), PERIOD_BYTES * 4);
    connect(&feeder, &input, &codec).unwrap();
    connect(&codec, &output, &drain).unwrap();

    let mut builder = PipelineBuilder::new(PipelineId(0), CoreId::PRIMARY, PERIOD_FRAMES);
    builder.add(feeder).unwrap().add(codec.clone()).unwrap().add(drain).unwrap();
    let pipeline = builder.build().unwrap();
    let idc = Idc::detached();
    pipeline.params(&idc, &StreamParams::default()).unwrap();
    pipeline.prepare(&idc).unwrap();
    pipeline.trigger(&idc, TriggerCmd::Start).unwrap();
    assert_eq!(codec.state(), ComponentState::Active);

    let period = [0x11u8; PERIOD_BYTES];
    for call in 1..=2 {
        feed(&input, &period);
        assert_eq!(codec.copy(), Ok(CopyStatus::Moved(PERIOD_FRAMES)));
        assert_eq!(calls.load(Ordering::SeqCst), 0, "module ran during priming call {call}");
        assert_eq!(input.acquire().stream.avail(), PERIOD_BYTES * call, "input consumed during priming");
        let out = output.acquire();
        assert_eq!(out.stream.avail(), PERIOD_BYTES * call);
        let mut tail = vec![0xffu8; PERIOD_BYTES];
        out.stream.peek(PERIOD_BYTES * (call - 1), &mut tail);
        assert!(tail.iter().all(|&b| b == 0), "priming period was not silent");
    }

    feed(&input, &period);
    codec.copy().unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(input.acquire().stream.avail(), 3 * PERIOD_BYTES - 2048);
    let out = output.acquire();
    assert_eq!(out.stream.avail(), 2 * PERIOD_BYTES + 2048);
    let mut produced = vec![0u8; 2048];
    out.stream.peek(2 * PERIOD_BYTES, &mut produced);
    assert!(produced.iter().all(|&b| b == 0x55));
    drop(out);

    // priming stays off until the next reset
    output.acquire().stream.reset();
    codec.copy().unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(codec.total_data_processed(0, true), 4096);
}

fn codec_between(
    input_bytes: usize,
    output_bytes: usize,
    calls: &Arc<AtomicUsize>,
) -> (Pipeline, ComponentRef, BufferRef, BufferRef) {
    let feeder = idle(1, 480);
    let codec = adapter(
        2,
        480,
        Box::new(BlockCodec {
            calls: Arc::clone(calls),
        }),
    );
    let drain = idle(3, 480);
    let input = CompBuffer::new(BufferId(1), input_bytes);
    let output = CompBuffer::new(BufferId(2), output_bytes);
    connect(&feeder, &input, &codec).unwrap();
    connect(&codec, &output, &drain).unwrap();
    let mut builder = PipelineBuilder::new(PipelineId(0), CoreId::PRIMARY, 480);
    builder.add(feeder).unwrap().add(codec.clone()).unwrap().add(drain).unwrap();
    (builder.build().unwrap(), codec, input, output)
}

#[test]
fn priming_completes_with_two_period_source() {
    const PERIOD_FRAMES: u32 = 480;
    const PERIOD_BYTES: usize = 1920;

    let calls = Arc::new(AtomicUsize::new(0));
    let (pipeline, codec, input, output) = codec_between(2 * PERIOD_BYTES, 4 * PERIOD_BYTES, &calls);
    let idc = Idc::detached();
    pipeline.params(&idc, &StreamParams::default()).unwrap();
    pipeline.prepare(&idc).unwrap();
    pipeline.trigger(&idc, TriggerCmd::Start).unwrap();
    assert_eq!(codec.state(), ComponentState::Active);

    let period = [0x11u8; PERIOD_BYTES];
    let mut coded = 0;
    for _ in 0..50 {
        if input.acquire().stream.free() >= PERIOD_BYTES {
            feed(&input, &period);
        }
        codec.copy().unwrap();
        let mut out = output.acquire();
        let avail = out.stream.avail();
        let mut drained = vec![0u8; avail];
        out.stream.peek(0, &mut drained);
        out.stream.consume(avail);
        coded += drained.iter().filter(|&&b| b == 0x55).count();
    }

    assert!(calls.load(Ordering::SeqCst) > 0, "module never ran");
    assert!(coded > 0, "no coded output reached the sink");
    assert!(codec.total_data_processed(0, true) > 0, "source never consumed");
}

#[test]
fn source_smaller_than_block_fails_prepare() {
    let calls = Arc::new(AtomicUsize::new(0));
    let (_pipeline, codec, _input, _output) = codec_between(1024, 7680, &calls);
    let err = codec.prepare(&Idc::detached()).unwrap_err();
    assert!(matches!(err, ComponentError::InvalidArgument(_)));
    assert_eq!(codec.state(), ComponentState::Ready);
}

#[test]
fn staging_budget_failure_returns_to_ready() {
    let feeder = idle(1, 480);
    let module = BlockCodec {
        calls: Arc::new(AtomicUsize::new(0)),
    };
    let mut config = CompConfig::new(CompId(2), ComponentType::Codec);
    config.period_frames = 480;
    let ops = ModuleAdapter::new(Box::new(module), AdapterSettings { max_staging_bytes: 4096 }).unwrap();
    let codec = ComponentCell::from_ops(config, Box::new(ops));
    let drain = idle(3, 480);
    connect(&feeder, &CompBuffer::new(BufferId(1), 7680), &codec).unwrap();
    connect(&codec, &CompBuffer::new(BufferId(2), 7680), &drain).unwrap();

    let err = codec.prepare(&Idc::detached()).unwrap_err();
    assert!(matches!(err, ComponentError::NoMemory(_)));
    assert_eq!(codec.state(), ComponentState::Ready);
}

// ---------------------------------------------------------------------------
// Stream copy with an inactive sink
// ---------------------------------------------------------------------------

/// 1:N splitter copying its input to every active output.
struct Splitter;

impl StreamProcess for Splitter {
    fn process(&mut self, inputs: &mut [StreamInput<'_>], outputs: &mut [StreamOutput<'_>], _frames: usize) -> Result<()> {
        let mut block = vec![0u8; inputs[0].bytes()];
        inputs[0].read(0, &mut block);
        for out in outputs.iter_mut() {
            out.write(&block);
        }
        inputs[0].consume(block.len());
        Ok(())
    }
}

impl ProcessingModule for Splitter {
    fn name(&self) -> &str {
        "splitter"
    }

    fn max_sinks(&self) -> usize {
        4
    }

    fn as_stream(&mut self) -> Option<&mut dyn StreamProcess> {
        Some(self)
    }
}

fn run(comp: &ComponentRef, idc: &Idc) {
    comp.prepare(idc).unwrap();
    comp.trigger(idc, TriggerCmd::PreStart).unwrap();
    comp.trigger(idc, TriggerCmd::Start).unwrap();
}

#[test]
fn inactive_sink_is_skipped() {
    let idc = Idc::detached();
    let source = idle(1, 16);
    let split = adapter(2, 16, Box::new(Splitter));
    let live = idle(3, 16);
    let parked = idle(4, 16);
    let input = CompBuffer::new(BufferId(1), 256);
    let to_live = CompBuffer::new(BufferId(2), 256);
    let to_parked = CompBuffer::new(BufferId(3), 256);
    connect(&source, &input, &split).unwrap();
    connect(&split, &to_live, &live).unwrap();
    connect(&split, &to_parked, &parked).unwrap();

    for comp in [&source, &split, &live] {
        run(comp, &idc);
    }
    assert_eq!(parked.state(), ComponentState::Ready);

    feed(&input, &[7u8; 64]);
    assert_eq!(split.copy(), Ok(CopyStatus::Moved(16)));

    let live_buf = to_live.acquire();
    assert_eq!(live_buf.stream.avail(), 64);
    assert_eq!(live_buf.stream.coherence().1, 64);
    let parked_buf = to_parked.acquire();
    assert_eq!(parked_buf.stream.avail(), 0);
    assert_eq!(parked_buf.stream.coherence(), (0, 0));
    assert_eq!(input.acquire().stream.avail(), 0);
}

/// 1:N copy through source and sink handles.
struct Broadcast {
    sinks_seen: Arc<AtomicUsize>,
}

impl SourceSinkProcess for Broadcast {
    fn process(&mut self, sources: &mut [Source<'_>], sinks: &mut [Sink<'_>]) -> Result<()> {
        self.sinks_seen.store(sinks.len(), Ordering::SeqCst);
        let bytes = sinks.iter().map(Sink::free_size).fold(sources[0].data_available(), usize::min);
        let mut block = vec![0u8; bytes];
        {
            let (head, tail) = sources[0].get_data(bytes)?;
            block[..head.len()].copy_from_slice(head);
            block[head.len()..].copy_from_slice(tail);
        }
        for sink in sinks.iter_mut() {
            let (head, tail) = sink.get_buffer(bytes)?;
            let split = head.len();
            head.copy_from_slice(&block[..split]);
            tail.copy_from_slice(&block[split..]);
            sink.commit_buffer(bytes)?;
        }
        sources[0].release_data(bytes)
    }
}

impl ProcessingModule for Broadcast {
    fn name(&self) -> &str {
        "broadcast"
    }

    fn max_sinks(&self) -> usize {
        4
    }

    fn as_source_sink(&mut self) -> Option<&mut dyn SourceSinkProcess> {
        Some(self)
    }
}

#[test]
fn source_sink_module_skips_inactive_sink() {
    let idc = Idc::detached();
    let seen = Arc::new(AtomicUsize::new(0));
    let source = idle(1, 16);
    let cast = adapter(
        2,
        16,
        Box::new(Broadcast {
            sinks_seen: Arc::clone(&seen),
        }),
    );
    let live = idle(3, 16);
    let parked = idle(4, 16);
    let input = CompBuffer::new(BufferId(1), 256);
    let to_live = CompBuffer::new(BufferId(2), 256);
    let to_parked = CompBuffer::new(BufferId(3), 256);
    connect(&source, &input, &cast).unwrap();
    connect(&cast, &to_live, &live).unwrap();
    connect(&cast, &to_parked, &parked).unwrap();

    for comp in [&source, &cast, &live] {
        run(comp, &idc);
    }
    assert_eq!(parked.state(), ComponentState::Ready);

    feed(&input, &[9u8; 64]);
    assert_eq!(cast.copy(), Ok(CopyStatus::Moved(16)));
    assert_eq!(seen.load(Ordering::SeqCst), 1, "parked sink handed to the module");
    assert_eq!(to_live.acquire().stream.avail(), 64);
    assert_eq!(to_parked.acquire().stream.avail(), 0);
    assert_eq!(input.acquire().stream.avail(), 0);
    assert_eq!(cast.total_data_processed(0, false), 64);
    assert_eq!(cast.total_data_processed(1, false), 0);
}

#[test]
fn fan_in_and_out_together_rejected() {
    let split = adapter(2, 16, Box::new(Splitter));
    let a = idle(1, 16);
    let b = idle(3, 16);
    let c = idle(4, 16);
    let d = idle(5, 16);
    connect(&a, &CompBuffer::new(BufferId(1), 64), &split).unwrap();
    connect(&b, &CompBuffer::new(BufferId(2), 64), &split).unwrap();
    connect(&split, &CompBuffer::new(BufferId(3), 64), &c).unwrap();
    connect(&split, &CompBuffer::new(BufferId(4), 64), &d).unwrap();
    assert!(matches!(split.prepare(&Idc::detached()), Err(ComponentError::InvalidArgument(_))));
}

// ---------------------------------------------------------------------------
// Cross-core dispatch
// ---------------------------------------------------------------------------

/// Records the core every control operation ran on.
struct CoreProbe {
    seen: Arc<AtomicU32>,
    delay: Duration,
    fail_prepare: bool,
}

impl ComponentOps for CoreProbe {
    fn prepare(&mut self, dev: &mut CompDev) -> Result<Status> {
        self.seen.store(current_core().0, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        if self.fail_prepare {
            return Err(ComponentError::invalid("probe refused"));
        }
        Ok(canal_core::status_of(dev.set_state(TriggerCmd::Prepare)?))
    }

    fn copy(&mut self, _dev: &mut CompDev) -> Result<CopyStatus> {
        Ok(CopyStatus::Moved(0))
    }
}

fn remote_probe(directory: &ComponentDirectory, delay: Duration, fail_prepare: bool) -> (ComponentRef, Arc<AtomicU32>) {
    let seen = Arc::new(AtomicU32::new(u32::MAX));
    let probe = ComponentCell::from_ops(
        CompConfig::new(CompId(20), ComponentType::Custom(2)).on_core(CoreId(1)),
        Box::new(CoreProbe {
            seen: Arc::clone(&seen),
            delay,
            fail_prepare,
        }),
    );
    let local = idle(10, 16);
    connect(&local, &CompBuffer::new(BufferId(1), 64), &probe).unwrap();
    directory.insert(probe.clone()).unwrap();
    directory.insert(local).unwrap();
    (probe, seen)
}

#[test]
fn shared_component_runs_on_its_core() {
    let directory = ComponentDirectory::new();
    let (probe, seen) = remote_probe(&directory, Duration::ZERO, false);
    let cores = Cores::start(2, &directory, Duration::from_secs(2)).unwrap();
    assert!(probe.is_shared());

    assert_eq!(probe.prepare(cores.idc()), Ok(Status::Done));
    assert_eq!(seen.load(Ordering::SeqCst), 1);
    assert_eq!(probe.state(), ComponentState::Prepare);

    probe.trigger(cores.idc(), TriggerCmd::PreStart).unwrap();
    probe.trigger(cores.idc(), TriggerCmd::Start).unwrap();
    assert_eq!(probe.state(), ComponentState::Active);
}

#[test]
fn remote_failure_propagates_verbatim() {
    let directory = ComponentDirectory::new();
    let (probe, _seen) = remote_probe(&directory, Duration::ZERO, true);
    let cores = Cores::start(2, &directory, Duration::from_secs(2)).unwrap();
    assert_eq!(
        probe.prepare(cores.idc()),
        Err(ComponentError::InvalidArgument("probe refused".into()))
    );
    assert_eq!(probe.state(), ComponentState::Ready);
}

#[test]
fn slow_remote_core_times_out() {
    let directory = ComponentDirectory::new();
    let (probe, _seen) = remote_probe(&directory, Duration::from_millis(300), false);
    let cores = Cores::start(2, &directory, Duration::from_millis(20)).unwrap();
    assert_eq!(probe.prepare(cores.idc()), Err(ComponentError::IdcTimeout(1)));
}

#[test]
fn detached_idc_cannot_reach_remote_core() {
    let directory = ComponentDirectory::new();
    let (probe, _seen) = remote_probe(&directory, Duration::ZERO, false);
    assert_eq!(probe.prepare(&Idc::detached()), Err(ComponentError::IdcUnavailable(1)));
}

// ---------------------------------------------------------------------------
// Endpoints
// ---------------------------------------------------------------------------

#[test]
fn host_to_dai_playback() {
    const PERIOD_FRAMES: u32 = 8;
    let period_bytes = StreamParams::default().bytes_for(PERIOD_FRAMES as usize);

    let (host_dma, host_port) = SimDma::new(256);
    let (dai_dma, dai_port) = SimDma::new(256);
    let mut host_cfg = CompConfig::new(CompId(1), ComponentType::Host);
    host_cfg.period_frames = PERIOD_FRAMES;
    let mut dai_cfg = CompConfig::new(CompId(2), ComponentType::Dai);
    dai_cfg.period_frames = PERIOD_FRAMES;
    let host = ComponentCell::from_ops(
        host_cfg,
        Box::new(ModuleAdapter::endpoint(Box::new(HostEndpoint::new(
            Box::new(host_dma),
            Direction::Playback,
            256,
        )))),
    );
    let (notifier, xruns) = XrunNotifier::channel(8);
    let dai = ComponentCell::from_ops(
        dai_cfg,
        Box::new(ModuleAdapter::endpoint(Box::new(DaiEndpoint::new(
            Box::new(dai_dma),
            Direction::Playback,
            256,
            Arc::new(DaiGroups::new()),
            notifier,
        )))),
    );
    let buffer = CompBuffer::new(BufferId(1), period_bytes * 2);
    connect(&host, &buffer, &dai).unwrap();

    let mut builder = PipelineBuilder::new(PipelineId(0), CoreId::PRIMARY, PERIOD_FRAMES);
    builder.add(host.clone()).unwrap().add(dai.clone()).unwrap();
    builder.scheduling_component(dai.id());
    let pipeline = builder.build().unwrap();
    let idc = Idc::detached();
    pipeline.params(&idc, &StreamParams::default()).unwrap();
    pipeline.prepare(&idc).unwrap();
    pipeline.trigger(&idc, TriggerCmd::Start).unwrap();
    assert!(host_port.running() && dai_port.running());

    let pcm: Vec<u8> = (0..period_bytes * 3).map(|i| i as u8).collect();
    host_port.feed(&pcm);
    for _ in 0..3 {
        assert_eq!(pipeline.copy().unwrap(), PERIOD_FRAMES);
    }
    assert_eq!(dai_port.drain(usize::MAX), pcm);
    assert_eq!(host.position().unwrap().bytes, pcm.len() as u64);
    assert_eq!(dai.position().unwrap().bytes, pcm.len() as u64);
    assert!(xruns.try_recv().is_err());

    // host ran dry: the dai starves
    pipeline.copy().unwrap();
    assert!(xruns.try_recv().is_ok());
    assert_eq!(dai.position().unwrap().xruns, 1);

    pipeline.trigger(&idc, TriggerCmd::Stop).unwrap();
    assert!(!dai_port.running());
    pipeline.reset(&idc).unwrap();
    assert_eq!(dai.state(), ComponentState::Ready);
}
