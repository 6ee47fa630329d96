use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use bitos::integer::u3;

use crate::modules::memory::Ram;
use crate::modules::render::{Action, RenderModule};
use crate::modules::shader::{Change, ShaderModule};
use crate::system::fifo::Reg;
use crate::system::gx::Topology;
use crate::system::gx::cmd::{
    self, DrawOpcode, OP_CALL, OP_INDEXED_SET_XF_A, OP_NOP, OP_SET_BP, OP_SET_CP, OP_SET_XF,
};
use crate::system::{Config, Modules, System, fifo};
use crate::{Address, Gx};

/// Size of the memory given to test systems.
const RAM_SIZE: usize = 4 * 1024 * 1024;

/// Installs a test subscriber, filtered by `RUST_LOG`.
pub fn init_tracing() {
    _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A render module which records every action.
#[derive(Clone, Default)]
pub struct RecordingRender(Arc<Mutex<Vec<Action>>>);

impl RecordingRender {
    pub fn take(&self) -> Vec<Action> {
        std::mem::take(&mut self.0.lock().unwrap())
    }
}

impl RenderModule for RecordingRender {
    fn exec(&mut self, action: Action) {
        self.0.lock().unwrap().push(action);
    }
}

/// A shader module which records every change.
#[derive(Clone, Default)]
pub struct RecordingShader(Arc<Mutex<Vec<Change>>>);

impl RecordingShader {
    pub fn take(&self) -> Vec<Change> {
        std::mem::take(&mut self.0.lock().unwrap())
    }
}

impl ShaderModule for RecordingShader {
    fn notify(&mut self, change: Change) {
        self.0.lock().unwrap().push(change);
    }
}

pub fn modules() -> (Modules, RecordingRender, RecordingShader) {
    init_tracing();

    let render = RecordingRender::default();
    let shader = RecordingShader::default();
    let modules = Modules {
        render: Box::new(render.clone()),
        shader: Box::new(shader.clone()),
        mem: Arc::new(Ram::new(RAM_SIZE)),
    };

    (modules, render, shader)
}

pub fn system_with(config: Config) -> (System, RecordingRender, RecordingShader) {
    let (modules, render, shader) = self::modules();
    (System::new(modules, config), render, shader)
}

pub fn system() -> System {
    system_with(Config::default()).0
}

/// Builds a command stream.
#[derive(Default)]
pub struct StreamBuilder {
    data: Vec<u8>,
}

impl StreamBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn nop(mut self) -> Self {
        self.data.push(OP_NOP);
        self
    }

    pub fn set_bp(mut self, register: u8, value: u32) -> Self {
        self.data.push(OP_SET_BP);
        let word = ((register as u32) << 24) | (value & 0x00FF_FFFF);
        self.data.extend_from_slice(&word.to_be_bytes());
        self
    }

    pub fn set_cp(mut self, register: u8, value: u32) -> Self {
        self.data.push(OP_SET_CP);
        self.data.push(register);
        self.data.extend_from_slice(&value.to_be_bytes());
        self
    }

    pub fn set_xf(mut self, start: u16, values: &[u32]) -> Self {
        self.data.push(OP_SET_XF);
        let header = ((values.len() as u32 - 1) << 16) | start as u32;
        self.data.extend_from_slice(&header.to_be_bytes());
        for value in values {
            self.data.extend_from_slice(&value.to_be_bytes());
        }

        self
    }

    pub fn indexed_xf(mut self, array: u8, index: u16, base: u16, length: u8) -> Self {
        self.data.push(OP_INDEXED_SET_XF_A + 8 * array);
        let config = ((index as u32) << 16) | ((length as u32 - 1) << 12) | (base as u32 & 0xFFF);
        self.data.extend_from_slice(&config.to_be_bytes());
        self
    }

    pub fn call(mut self, addr: Address, length: u32) -> Self {
        self.data.push(OP_CALL);
        self.data.extend_from_slice(&addr.value().to_be_bytes());
        self.data.extend_from_slice(&length.to_be_bytes());
        self
    }

    pub fn draw(mut self, topology: Topology, vat: u8, count: u16, data: &[u8]) -> Self {
        let opcode = DrawOpcode::from_bits(0x80)
            .with_topology(topology)
            .with_vat_index(u3::new(vat));

        self.data.push(opcode.to_bits());
        self.data.extend_from_slice(&count.to_be_bytes());
        self.data.extend_from_slice(data);
        self
    }

    /// Pads the stream with NOPs up to a multiple of `alignment`.
    pub fn pad(mut self, alignment: usize) -> Self {
        while !self.data.len().is_multiple_of(alignment) {
            self.data.push(OP_NOP);
        }

        self
    }

    pub fn build(self) -> Vec<u8> {
        self.data
    }
}

fn draws(actions: Vec<Action>) -> usize {
    actions
        .into_iter()
        .filter(|action| matches!(action, Action::Draw(_)))
        .count()
}

fn strip_stream() -> Vec<u8> {
    let positions = [
        0.0f32, 0.0, 0.0, //
        1.0, 0.0, 0.0, //
        0.0, 1.0, 0.0, //
        1.0, 1.0, 0.0,
    ];
    let payload = positions
        .iter()
        .flat_map(|v| v.to_be_bytes())
        .collect::<Vec<_>>();

    StreamBuilder::new()
        .set_bp(0xF3, 0x0012_3456)
        .draw(Topology::TriangleStrip, 0, 4, &payload)
        .build()
}

fn strip_system(config: Config) -> (System, RecordingRender, RecordingShader) {
    let (mut sys, render, shader) = system_with(config);
    // direct position, vec3 f32
    cmd::set_register(&mut sys, 0x50, 0x0000_0200);
    cmd::set_register(&mut sys, 0x70, 0x0000_0009);
    (sys, render, shader)
}

#[test]
fn register_write_then_strip() {
    let (mut sys, render, shader) = strip_system(Config::default());
    let stream = strip_stream();

    let consumed = cmd::run(&mut sys, &stream, None).unwrap();
    assert_eq!(consumed, stream.len());
    assert_eq!(sys.gpu.bp[0xF3], 0x0012_3456);
    assert_eq!(shader.take(), [Change::AlphaTest]);
    assert_eq!(sys.vertices.indices.triangles, [0, 1, 2, 1, 3, 2]);
    assert_eq!(self::draws(render.take()), 0);

    // rewriting the same value is elided and leaves the batch pending
    let same = StreamBuilder::new().set_bp(0xF3, 0x0012_3456).build();
    cmd::run(&mut sys, &same, None).unwrap();
    assert!(shader.take().is_empty());
    assert_eq!(self::draws(render.take()), 0);
    assert_eq!(sys.vertices.indices.triangles, [0, 1, 2, 1, 3, 2]);

    // only the draw is pending
    let (mut sys, render, _) = strip_system(Config {
        vertex_buffer_size: 12 * 3,
        ..Default::default()
    });

    cmd::run(&mut sys, &stream, None).unwrap();
    assert_eq!(sys.gpu.bp[0xF3], 0x0012_3456);
    assert_eq!(self::draws(render.take()), 1);
    assert_eq!(sys.stats.flushes, 1);
}

#[test]
fn stream_split_across_bursts() {
    let (mut sys, render, _) = strip_system(Config::default());
    let stream = strip_stream();

    for chunk in stream.chunks(7) {
        sys.queue.push_bytes(chunk);
        fifo::execute_queue(&mut sys);
    }

    assert!(sys.queue.is_empty());
    assert!(!sys.halted());
    assert_eq!(sys.vertices.indices.triangles, [0, 1, 2, 1, 3, 2]);
    assert_eq!(self::draws(render.take()), 0);
}

const FIFO_BASE: u32 = 0x0001_0000;

fn write_cp32(gx: &mut Gx, low: Reg, value: u32) {
    gx.write_cp16(low as u16, value as u16);
    gx.write_cp16(low as u16 + 2, (value >> 16) as u16);
}

/// Sets up a linked FIFO of `size` bytes with reading enabled.
fn gx_with(config: Config, size: u32, read_enable: bool) -> Gx {
    let (modules, _, _) = self::modules();
    let mut gx = Gx::new(modules, config).unwrap();

    gx.write_pi32(0x0C, FIFO_BASE);
    gx.write_pi32(0x10, FIFO_BASE + size);
    gx.write_pi32(0x14, FIFO_BASE);

    write_cp32(&mut gx, Reg::BaseLow, FIFO_BASE);
    write_cp32(&mut gx, Reg::EndLow, FIFO_BASE + size - 32);
    write_cp32(&mut gx, Reg::WritePtrLow, FIFO_BASE);
    write_cp32(&mut gx, Reg::ReadPtrLow, FIFO_BASE);
    write_cp32(&mut gx, Reg::HighWatermarkLow, size - 64);
    write_cp32(&mut gx, Reg::LowWatermarkLow, 32);

    // linked
    let control = if read_enable { 0x11 } else { 0x10 };
    gx.write_cp16(Reg::Control as u16, control);

    gx
}

fn token_stream() -> Vec<u8> {
    StreamBuilder::new()
        .set_bp(0x40, 0x17)
        .set_bp(0x48, 0x1234)
        .pad(32)
        .build()
}

fn push(gx: &mut Gx, stream: &[u8]) {
    for &byte in stream {
        gx.write_gather_pipe(byte);
    }
}

#[test]
fn inline_gather_pipe() {
    let mut gx = gx_with(Config::default(), 0x1000, true);
    gx.write_pe_interrupt(0b01);

    let stream = token_stream();
    push(&mut gx, &stream[..31]);
    assert_eq!(gx.system().unwrap().gpu.bp[0x40], 0);

    push(&mut gx, &stream[31..]);
    assert_eq!(gx.system().unwrap().gpu.bp[0x40], 0x17);
    assert!(gx.pe_token_interrupt());
    assert_eq!(gx.read_cp16(Reg::Token as u16), 0x1234);

    let fifo = gx.fifo();
    assert_eq!(fifo.distance.load(Ordering::Relaxed), 0);
    assert_eq!(fifo.read_ptr.load(Ordering::Relaxed), FIFO_BASE + 32);
    assert_eq!(gx.processor.fifo_current.address(), Address(FIFO_BASE + 32));

    // acknowledge
    gx.write_pe_interrupt(0b0101);
    assert!(!gx.pe_token_interrupt());
}

#[test]
fn unlinked_bursts_only_reach_memory() {
    let mut gx = gx_with(Config::default(), 0x1000, true);
    gx.write_cp16(Reg::Control as u16, 0x01);

    push(&mut gx, &token_stream());
    assert_eq!(gx.system().unwrap().gpu.bp[0x40], 0);
    assert_eq!(gx.fifo().write_ptr.load(Ordering::Relaxed), FIFO_BASE);

    let mut burst = [0; 32];
    gx.system()
        .unwrap()
        .modules
        .mem
        .read(Address(FIFO_BASE), &mut burst);
    assert_eq!(burst.as_slice(), token_stream());
}

#[test]
fn overflow_halts_until_reset() {
    let mut gx = gx_with(Config::default(), 0x40, false);
    let nops = StreamBuilder::new().nop().pad(32).build();
    push(&mut gx, &nops);
    assert!(!gx.halted());

    push(&mut gx, &nops);
    assert!(gx.fifo().overflowed.load(Ordering::Relaxed));
    assert_eq!(gx.fifo().distance.load(Ordering::Relaxed), 0x20);
    assert_eq!(gx.fifo().write_ptr.load(Ordering::Relaxed), FIFO_BASE + 0x20);
    assert!(gx.halted());
    assert!(gx.system().unwrap().halted());

    gx.reset().unwrap();
    assert!(!gx.halted());
    assert!(!gx.fifo().overflowed.load(Ordering::Relaxed));
}

#[test]
fn unknown_opcode_halts() {
    let mut gx = gx_with(Config::default(), 0x1000, true);
    let stream = StreamBuilder::new()
        .set_bp(0x40, 0x17)
        .build()
        .into_iter()
        .chain([0x18])
        .chain(StreamBuilder::new().set_bp(0x40, 0x18).pad(32).build())
        .collect::<Vec<_>>();

    push(&mut gx, &stream[..32]);
    assert!(gx.halted());
    assert_eq!(gx.system().unwrap().gpu.bp[0x40], 0x17);
}

#[test]
fn dual_core_round_trip() {
    let config = Config {
        dual_core: true,
        ..Default::default()
    };

    let mut gx = gx_with(config, 0x1000, true);
    assert!(gx.system().is_none());
    gx.write_pe_interrupt(0b01);

    for _ in 0..64 {
        push(&mut gx, &token_stream());
    }

    assert!(gx.sync());
    assert!(gx.pe_token_interrupt());
    assert!(!gx.halted());

    let state = gx.save_state().unwrap();
    gx.invalidate_memory().unwrap();

    let mut inline = gx_with(Config::default(), 0x1000, true);
    inline.load_state(&state).unwrap();
    let sys = inline.system().unwrap();
    assert_eq!(sys.gpu.bp[0x40], 0x17);
    assert_eq!(sys.fifo.token.load(Ordering::Relaxed), 0x1234);
}
