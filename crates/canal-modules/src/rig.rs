//! Test rig: one module component between idle feeders and drains, running
//! in a single started pipeline.

use canal_core::{
    AdapterSettings, BufferId, BufferRef, CompBuffer, CompConfig, CompDev, CompId, ComponentCell, ComponentOps,
    ComponentRef, ComponentType, CopyStatus, CoreId, FrameFormat, Idc, ModuleAdapter, Pipeline, PipelineBuilder,
    PipelineId, ProcessingModule, Result, StreamParams, TriggerCmd, connect,
};

struct Idle;

impl ComponentOps for Idle {
    fn copy(&mut self, _dev: &mut CompDev) -> Result<CopyStatus> {
        Ok(CopyStatus::Moved(0))
    }
}

/// Formats and fan of a rig.
pub(crate) struct Layout {
    pub period_frames: u32,
    pub channels: u16,
    /// Format of each feeder.
    pub inputs: Vec<FrameFormat>,
    /// Format the module writes.
    pub format: FrameFormat,
    pub outputs: usize,
}

impl Layout {
    pub(crate) fn one_to_one(format: FrameFormat) -> Self {
        Self {
            period_frames: 4,
            channels: 2,
            inputs: vec![format],
            format,
            outputs: 1,
        }
    }
}

pub(crate) struct Rig {
    pub module: ComponentRef,
    pub inputs: Vec<BufferRef>,
    pub outputs: Vec<BufferRef>,
    pub feeders: Vec<ComponentRef>,
    pub pipeline: Pipeline,
    pub idc: Idc,
}

impl Rig {
    /// Wire, negotiate, prepare and start.
    pub(crate) fn start(module: Box<dyn ProcessingModule>, layout: &Layout) -> Self {
        let rig = Self::wire(module, layout);
        let params = StreamParams {
            channels: layout.channels,
            ..StreamParams::default()
        };
        rig.pipeline.params(&rig.idc, &params).unwrap();
        rig.pipeline.prepare(&rig.idc).unwrap();
        rig.pipeline.trigger(&rig.idc, TriggerCmd::Start).unwrap();
        rig
    }

    /// Wire only; nothing negotiated.
    pub(crate) fn wire(module: Box<dyn ProcessingModule>, layout: &Layout) -> Self {
        let buffer_bytes = 4 * 4 * layout.channels as usize * layout.period_frames as usize;
        let mut config = CompConfig::new(CompId(100), ComponentType::Custom(1));
        config.period_frames = layout.period_frames;
        config.format = layout.format;
        let adapter = ModuleAdapter::new(module, AdapterSettings::default()).unwrap();
        let module = ComponentCell::from_ops(config, Box::new(adapter));

        let mut builder = PipelineBuilder::new(PipelineId(0), CoreId::PRIMARY, layout.period_frames);
        let mut inputs = Vec::new();
        let mut feeders = Vec::new();
        for (i, format) in layout.inputs.iter().enumerate() {
            let mut config = CompConfig::new(CompId(i as u32), ComponentType::Custom(0));
            config.period_frames = layout.period_frames;
            config.format = *format;
            let feeder = ComponentCell::from_ops(config, Box::new(Idle));
            let buffer = CompBuffer::new(BufferId(i as u32), buffer_bytes);
            connect(&feeder, &buffer, &module).unwrap();
            builder.add(feeder.clone()).unwrap();
            inputs.push(buffer);
            feeders.push(feeder);
        }
        builder.add(module.clone()).unwrap();
        let mut outputs = Vec::new();
        for i in 0..layout.outputs {
            let mut config = CompConfig::new(CompId(200 + i as u32), ComponentType::Custom(0));
            config.period_frames = layout.period_frames;
            let drain = ComponentCell::from_ops(config, Box::new(Idle));
            let buffer = CompBuffer::new(BufferId(200 + i as u32), buffer_bytes);
            connect(&module, &buffer, &drain).unwrap();
            builder.add(drain).unwrap();
            outputs.push(buffer);
        }
        let pipeline = builder.build().unwrap();
        Self {
            module,
            inputs,
            outputs,
            feeders,
            pipeline,
            idc: Idc::detached(),
        }
    }

    pub(crate) fn feed(&self, input: usize, bytes: &[u8]) {
        let mut guard = self.inputs[input].acquire();
        assert_eq!(guard.stream.fill(0, bytes), bytes.len(), "input ring full");
        guard.stream.produce(bytes.len());
    }

    pub(crate) fn copy(&self) -> CopyStatus {
        self.module.copy().unwrap()
    }

    /// Take everything waiting in output `index`.
    pub(crate) fn drain(&self, index: usize) -> Vec<u8> {
        let mut guard = self.outputs[index].acquire();
        let mut out = vec![0u8; guard.stream.avail()];
        guard.stream.peek(0, &mut out);
        guard.stream.consume(out.len());
        out
    }

    pub(crate) fn set_config(&self, param_id: u32, data: &[u8]) -> Result<()> {
        self.module.set_large_config(param_id, true, true, data.len(), data)
    }

    pub(crate) fn get_config(&self, param_id: u32) -> Vec<u8> {
        self.module.get_large_config(param_id, 0, 4096).unwrap().data
    }
}

pub(crate) fn s16(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

pub(crate) fn to_s16(bytes: &[u8]) -> Vec<i16> {
    bytes.chunks_exact(2).map(|b| i16::from_le_bytes([b[0], b[1]])).collect()
}
