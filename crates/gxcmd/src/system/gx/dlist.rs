//! Display list cache.
//!
//! Display lists called repeatedly go through three states. The first call interprets the list
//! while analysing it. The second call interprets it again, this time recording every operation
//! it performs and snapshotting the memory those operations read. Every call after that replays
//! the recording without decoding anything.
//!
//! A list is keyed by its address and length, and then by the vertex format state it runs
//! under, since the same bytes decode differently under different formats. Every few calls, a
//! running entry rehashes its bytes and snapshots. Any mismatch makes it uncachable for good.
use std::sync::Arc;

use rustc_hash::FxHashMap;
use twox_hash::XxHash3_64;
use zerocopy::IntoBytes;

use crate::Address;
use crate::modules::memory::MemoryModule;
use crate::system::gx::cmd::{self, ArrayDescriptor};
use crate::system::gx::{Topology, vertex, xform};
use crate::system::{DesyncError, System};

/// A recorded operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    Bp {
        register: u8,
        value: u32,
    },
    Cp {
        register: u8,
        value: u32,
    },
    Xf {
        start: u16,
        values: Box<[u32]>,
    },
    Draw {
        topology: Topology,
        vat: u8,
        count: u16,
        data: Box<[u8]>,
    },
}

impl Op {
    fn size(&self) -> usize {
        size_of::<Self>()
            + match self {
                Self::Xf { values, .. } => 4 * values.len(),
                Self::Draw { data, .. } => data.len(),
                _ => 0,
            }
    }
}

/// A snapshot of memory read indirectly by a display list.
#[derive(Debug, Clone)]
pub struct Region {
    pub addr: Address,
    pub data: Box<[u8]>,
    pub hash: u64,
}

impl Region {
    fn new(addr: Address, data: Box<[u8]>) -> Self {
        let hash = XxHash3_64::oneshot(&data);
        Self { addr, data, hash }
    }

    /// Whether the memory this region was taken from still has the same contents.
    fn is_valid(&self, mem: &dyn MemoryModule) -> bool {
        let mut current = vec![0; self.data.len()];
        mem.read(self.addr, &mut current) && XxHash3_64::oneshot(&current) == self.hash
    }
}

/// How many operations of each kind a display list performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Counts {
    pub bp: u32,
    pub cp: u32,
    pub xf: u32,
    pub indexed_xf: u32,
    pub draws: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Analyze,
    Compile,
}

/// Records the operations performed while interpreting a display list.
#[derive(Debug)]
pub struct Recorder {
    mode: Mode,
    ops: Vec<Op>,
    regions: Vec<Region>,
    counts: Counts,
    /// Vertex attribute table groups used by draws, one bit per group.
    vat_used: u8,
    uncachable: bool,
    /// A snapshot could not be allocated.
    failed: bool,
}

impl Recorder {
    fn new(mode: Mode) -> Self {
        Self {
            mode,
            ops: Vec::new(),
            regions: Vec::new(),
            counts: Counts::default(),
            vat_used: 0,
            uncachable: false,
            failed: false,
        }
    }

    pub fn push(&mut self, op: Op) {
        match &op {
            Op::Bp { .. } => self.counts.bp += 1,
            Op::Cp { .. } => self.counts.cp += 1,
            Op::Xf { .. } => self.counts.xf += 1,
            Op::Draw { vat, .. } => {
                self.counts.draws += 1;
                self.vat_used |= 1 << (vat & 0x7);
            }
        }

        if self.mode == Mode::Compile {
            self.ops.push(op);
        }
    }

    fn snapshot(&mut self, addr: Address, data: Box<[u8]>) {
        let duplicate = self
            .regions
            .iter()
            .any(|r| r.addr == addr && r.data.len() == data.len());

        if !duplicate {
            self.regions.push(Region::new(addr, data));
        }
    }

    /// Snapshots the words an indexed transform unit load read from memory.
    pub fn snapshot_words(&mut self, addr: Address, words: &[u32]) {
        self.counts.indexed_xf += 1;
        if self.mode == Mode::Compile {
            let data = words.iter().flat_map(|w| w.to_be_bytes()).collect();
            self.snapshot(addr, data);
        }
    }

    /// Snapshots the vertex array windows a draw read from memory.
    pub fn snapshot_touched(&mut self, mem: &dyn MemoryModule, touched: &vertex::Touched) {
        if self.mode != Mode::Compile {
            return;
        }

        for (addr, len) in touched.windows() {
            let mut data = Vec::new();
            if data.try_reserve_exact(len as usize).is_err() {
                tracing::warn!("failed to allocate a {len} byte snapshot of {addr}");
                self.failed = true;
                return;
            }

            data.resize(len as usize, 0);
            if !mem.read(addr, &mut data) {
                data.fill(0);
            }

            self.snapshot(addr, data.into_boxed_slice());
        }
    }

    pub fn mark_uncachable(&mut self) {
        self.uncachable = true;
    }
}

/// A recorded display list.
#[derive(Debug)]
pub struct Routine {
    ops: Vec<Op>,
    regions: Vec<Region>,
}

impl Routine {
    fn size(&self) -> usize {
        self.ops.iter().map(Op::size).sum::<usize>()
            + self
                .regions
                .iter()
                .map(|r| size_of::<Region>() + r.data.len())
                .sum::<usize>()
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }
}

/// Memory that serves reads from the snapshots of a routine when possible.
struct SnapshotMemory<'a> {
    regions: &'a [Region],
    live: &'a dyn MemoryModule,
}

impl MemoryModule for SnapshotMemory<'_> {
    fn read(&self, addr: Address, buf: &mut [u8]) -> bool {
        for region in self.regions {
            let offset = addr - region.addr;
            if let Some(src) = (offset as usize)
                .checked_add(buf.len())
                .and_then(|end| region.data.get(offset as usize..end))
            {
                buf.copy_from_slice(src);
                return true;
            }
        }

        self.live.read(addr, buf)
    }

    fn write(&self, addr: Address, data: &[u8]) -> bool {
        self.live.write(addr, data)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Analyzing,
    Compiled,
    Running,
}

#[derive(Debug)]
struct Entry {
    state: State,
    /// Hash of the list bytes.
    hash: u64,
    calls: u32,
    uncachable: bool,
    counts: Counts,
    routine: Option<Arc<Routine>>,
    /// Size of the routine, counted against the budget.
    bytes: usize,
}

impl Entry {
    fn new() -> Self {
        Self {
            state: State::Analyzing,
            hash: 0,
            calls: 0,
            uncachable: false,
            counts: Counts::default(),
            routine: None,
            bytes: 0,
        }
    }
}

/// Public view of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    pub state: State,
    pub uncachable: bool,
    pub calls: u32,
    pub counts: Counts,
}

#[derive(Debug, Default)]
struct Group {
    /// Vertex attribute table groups the entries depend on, one bit per group.
    vat_used: u8,
    entries: FxHashMap<u64, Entry>,
}

/// Vertex format state a display list runs under.
#[derive(Debug, Clone, Copy)]
struct KeyState {
    vcd: u64,
    vat: [[u32; 3]; 8],
    arrays: [ArrayDescriptor; 16],
}

impl KeyState {
    fn capture(cmd: &cmd::Interface) -> Self {
        Self {
            vcd: cmd.vertex_descriptor.to_bits(),
            vat: std::array::from_fn(|i| {
                let table = &cmd.vertex_attr_tables[i];
                [table.a.to_bits(), table.b.to_bits(), table.c.to_bits()]
            }),
            arrays: cmd.arrays,
        }
    }

    /// Hashes this state, including only the attribute table groups in `mask`.
    fn key(&self, mask: u8) -> u64 {
        let mut words = Vec::with_capacity(2 + 8 * 4 + 16 * 2);
        words.extend([self.vcd as u32, (self.vcd >> 32) as u32]);
        for (i, vat) in self.vat.iter().enumerate() {
            if mask & (1 << i) != 0 {
                words.push(i as u32);
                words.extend_from_slice(vat);
            }
        }

        for array in &self.arrays {
            words.extend([array.address.value(), array.stride]);
        }

        XxHash3_64::oneshot(words.as_bytes())
    }
}

/// The display list cache.
#[derive(Debug, Default)]
pub struct Cache {
    groups: FxHashMap<(Address, u32), Group>,
    /// Total size of every routine.
    bytes: usize,
}

impl Cache {
    fn entry_mut(&mut self, key: (Address, u32), secondary: u64) -> Option<&mut Entry> {
        self.groups.get_mut(&key)?.entries.get_mut(&secondary)
    }

    /// Status of every entry for the list at `addr` with `len` bytes.
    pub fn status(&self, addr: Address, len: u32) -> Vec<Status> {
        self.groups
            .get(&(addr.physical(), len))
            .map(|group| {
                group
                    .entries
                    .values()
                    .map(|e| Status {
                        state: e.state,
                        uncachable: e.uncachable,
                        calls: e.calls,
                        counts: e.counts,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of entries in the cache.
    pub fn len(&self) -> usize {
        self.groups.values().map(|g| g.entries.len()).sum()
    }

    /// Total size of the recorded routines, in bytes.
    pub fn bytes(&self) -> usize {
        self.bytes
    }

    /// Drops every entry.
    pub fn clear(&mut self) {
        if !self.groups.is_empty() {
            tracing::debug!(
                entries = self.len(),
                bytes = self.bytes,
                "clearing display list cache"
            );
        }

        self.groups.clear();
        self.bytes = 0;
    }
}

fn fetch(sys: &System, addr: Address, len: u32) -> Option<Vec<u8>> {
    let mut data = vec![0; len as usize];
    if sys.modules.mem.read(addr, &mut data) {
        Some(data)
    } else {
        tracing::warn!("display list at {addr} with {len} bytes is not mapped");
        None
    }
}

fn interpret(
    sys: &mut System,
    data: &[u8],
    recorder: Option<&mut Recorder>,
) -> Result<(), DesyncError> {
    let consumed = cmd::run(sys, data, recorder)?;
    if consumed < data.len() && !sys.halted {
        tracing::trace!(
            "ignored {} trailing bytes of display list",
            data.len() - consumed
        );
    }

    Ok(())
}

fn replay(sys: &mut System, routine: &Routine) {
    let live = sys.modules.mem.clone();
    let mem = SnapshotMemory {
        regions: &routine.regions,
        live: live.as_ref(),
    };

    for op in &routine.ops {
        match op {
            Op::Bp { register, value } => crate::system::gx::write_bp(sys, *register, *value),
            Op::Cp { register, value } => cmd::set_register(sys, *register, *value),
            Op::Xf { start, values } => xform::write_block(sys, *start, values),
            Op::Draw {
                topology,
                vat,
                count,
                data,
            } => vertex::draw(sys, *topology, *vat, *count, data, &mem, None),
        }

        if sys.halted {
            break;
        }
    }
}

/// Calls the display list at `addr` with `len` bytes.
pub fn call(sys: &mut System, addr: Address, len: u32) -> Result<(), DesyncError> {
    let addr = addr.physical();
    if sys.call_depth >= sys.config.max_call_depth {
        tracing::warn!(
            depth = sys.call_depth,
            "ignored call to display list at {addr} with {len} bytes: nested too deep"
        );
        return Ok(());
    }

    sys.call_depth += 1;
    let result = if sys.call_depth > 1 || !sys.config.display_list_cache {
        match self::fetch(sys, addr, len) {
            Some(data) => self::interpret(sys, &data, None),
            None => Ok(()),
        }
    } else {
        self::cached(sys, addr, len)
    };

    sys.call_depth -= 1;
    result
}

fn cached(sys: &mut System, addr: Address, len: u32) -> Result<(), DesyncError> {
    let key = (addr, len);
    let state = KeyState::capture(&sys.gpu.cmd);
    let group = sys.dlists.groups.entry(key).or_default();
    let secondary = state.key(group.vat_used);
    let entry = group.entries.entry(secondary).or_insert_with(Entry::new);
    let (uncachable, current) = (entry.uncachable, entry.state);

    if uncachable {
        sys.stats.dlist_fallbacks += 1;
        return match self::fetch(sys, addr, len) {
            Some(data) => self::interpret(sys, &data, None),
            None => Ok(()),
        };
    }

    match current {
        State::Analyzing => self::analyze(sys, key, secondary, &state),
        State::Compiled => self::compile(sys, key, secondary),
        State::Running => self::run(sys, key, secondary),
    }
}

fn analyze(
    sys: &mut System,
    key: (Address, u32),
    secondary: u64,
    state: &KeyState,
) -> Result<(), DesyncError> {
    let Some(data) = self::fetch(sys, key.0, key.1) else {
        return Ok(());
    };

    let mut recorder = Recorder::new(Mode::Analyze);
    let result = self::interpret(sys, &data, Some(&mut recorder));
    let hash = XxHash3_64::oneshot(&data);

    let cache = &mut sys.dlists;
    let group = cache.groups.entry(key).or_default();
    let Some(mut entry) = group.entries.remove(&secondary) else {
        return result;
    };

    entry.hash = hash;
    entry.calls += 1;
    entry.counts = recorder.counts;
    if result.is_err() || recorder.uncachable {
        entry.uncachable = true;
    } else {
        entry.state = State::Compiled;
    }

    // entries keyed with a narrower mask can no longer be found
    let mask = group.vat_used | recorder.vat_used;
    if mask != group.vat_used {
        let dropped = group.entries.drain().map(|(_, e)| e.bytes).sum::<usize>();
        cache.bytes -= dropped;
        group.vat_used = mask;
    }

    tracing::debug!(
        addr = %key.0,
        len = key.1,
        counts = ?entry.counts,
        vat_used = mask,
        uncachable = entry.uncachable,
        "analyzed display list"
    );

    group.entries.insert(state.key(mask), entry);
    result
}

fn compile(sys: &mut System, key: (Address, u32), secondary: u64) -> Result<(), DesyncError> {
    let Some(data) = self::fetch(sys, key.0, key.1) else {
        return Ok(());
    };

    let hash = XxHash3_64::oneshot(&data);
    let changed = sys
        .dlists
        .entry_mut(key, secondary)
        .is_none_or(|entry| entry.hash != hash);

    if changed {
        if let Some(entry) = sys.dlists.entry_mut(key, secondary) {
            entry.uncachable = true;
        }

        tracing::debug!(addr = %key.0, len = key.1, "display list changed before compiling");
        sys.stats.dlist_fallbacks += 1;
        return self::interpret(sys, &data, None);
    }

    let mut recorder = Recorder::new(Mode::Compile);
    let result = self::interpret(sys, &data, Some(&mut recorder));

    let Some(entry) = sys.dlists.entry_mut(key, secondary) else {
        return result;
    };

    entry.calls += 1;
    if result.is_err() || recorder.uncachable || recorder.failed {
        entry.uncachable = true;
        return result;
    }

    let routine = Routine {
        ops: recorder.ops,
        regions: recorder.regions,
    };

    let bytes = routine.size();
    tracing::debug!(
        addr = %key.0,
        len = key.1,
        ops = routine.ops.len(),
        regions = routine.regions.len(),
        bytes,
        "compiled display list"
    );

    entry.routine = Some(Arc::new(routine));
    entry.state = State::Running;
    entry.bytes = bytes;

    let cache = &mut sys.dlists;
    cache.bytes += bytes;
    sys.stats.dlist_compiles += 1;

    if cache.bytes > sys.config.display_list_budget {
        tracing::debug!(
            budget = sys.config.display_list_budget,
            "display list cache over budget"
        );
        cache.clear();
    }

    result
}

fn run(sys: &mut System, key: (Address, u32), secondary: u64) -> Result<(), DesyncError> {
    let interval = sys.config.display_list_check_interval.max(1);
    let Some(entry) = sys.dlists.entry_mut(key, secondary) else {
        return Ok(());
    };

    entry.calls += 1;
    let check = entry.calls.is_multiple_of(interval);
    let expected = entry.hash;
    let Some(routine) = entry.routine.clone() else {
        entry.uncachable = true;
        return Ok(());
    };

    if check {
        let data = self::fetch(sys, key.0, key.1).unwrap_or_default();
        let mem = sys.modules.mem.clone();
        let stale = XxHash3_64::oneshot(&data) != expected
            || routine.regions.iter().any(|r| !r.is_valid(mem.as_ref()));

        if stale {
            if let Some(entry) = sys.dlists.entry_mut(key, secondary) {
                entry.uncachable = true;
                entry.routine = None;
                let bytes = std::mem::take(&mut entry.bytes);
                sys.dlists.bytes -= bytes;
            }

            tracing::debug!(addr = %key.0, len = key.1, "display list went stale");
            sys.stats.dlist_fallbacks += 1;
            return self::interpret(sys, &data, None);
        }
    }

    sys.stats.dlist_hits += 1;
    self::replay(sys, &routine);
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::modules::render::{Action, Batch};
    use crate::system::Config;
    use crate::test::{RecordingRender, StreamBuilder, system_with};

    const LIST: Address = Address(0x1000);

    fn setup(config: Config) -> (System, RecordingRender) {
        let (mut sys, render, _) = system_with(config);
        // indexed position (index8), vec3 f32, array at 0x2000 with stride 12
        cmd::set_register(&mut sys, 0x50, 0x0000_0400);
        cmd::set_register(&mut sys, 0x70, 0x0000_0009);
        cmd::set_register(&mut sys, 0xA0, 0x2000);
        cmd::set_register(&mut sys, 0xB0, 12);

        let positions = [0.0f32, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
        let bytes = positions
            .iter()
            .flat_map(|v| v.to_be_bytes())
            .collect::<Vec<_>>();
        sys.modules.mem.write(Address(0x2000), &bytes);

        (sys, render)
    }

    fn write_list(sys: &System, stream: &[u8]) -> u32 {
        sys.modules.mem.write(LIST, stream);
        stream.len() as u32
    }

    fn drawn(sys: &mut System, render: &RecordingRender) -> Vec<Batch> {
        vertex::flush(sys);
        render
            .take()
            .into_iter()
            .filter_map(|action| match action {
                Action::Draw(batch) => Some(*batch),
                _ => None,
            })
            .collect()
    }

    fn states(sys: &System, len: u32) -> Vec<(State, bool)> {
        sys.dlists
            .status(LIST, len)
            .into_iter()
            .map(|s| (s.state, s.uncachable))
            .collect()
    }

    #[test]
    fn nop_list_goes_through_every_state() {
        let (mut sys, _) = setup(Config::default());
        let len = write_list(&sys, &[0; 32]);

        call(&mut sys, LIST, len).unwrap();
        assert_eq!(states(&sys, len), [(State::Compiled, false)]);

        call(&mut sys, LIST, len).unwrap();
        assert_eq!(states(&sys, len), [(State::Running, false)]);
        assert_eq!(sys.stats.dlist_compiles, 1);

        call(&mut sys, LIST, len).unwrap();
        assert_eq!(sys.stats.dlist_hits, 1);
        assert_eq!(sys.stats.dlist_compiles, 1);
    }

    #[test]
    fn replay_matches_interpretation() {
        let (mut sys, render) = setup(Config::default());
        let stream = StreamBuilder::new()
            .set_bp(0xF3, 0x42)
            .draw(Topology::TriangleList, 0, 3, &[0, 1, 2])
            .build();
        let len = write_list(&sys, &stream);

        let mut outputs = Vec::new();
        for _ in 0..4 {
            call(&mut sys, LIST, len).unwrap();
            outputs.push(drawn(&mut sys, &render));
        }

        assert_eq!(sys.stats.dlist_compiles, 1);
        assert_eq!(sys.stats.dlist_hits, 2);
        assert!(outputs.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(outputs[0][0].vertex_count(), 3);

        let status = sys.dlists.status(LIST, len);
        assert_eq!(status[0].counts.bp, 1);
        assert_eq!(status[0].counts.draws, 1);
    }

    #[test]
    fn referenced_memory_changes_are_detected() {
        let config = Config {
            display_list_check_interval: 1,
            ..Default::default()
        };

        let (mut sys, render) = setup(config);
        let stream = StreamBuilder::new()
            .draw(Topology::TriangleList, 0, 3, &[0, 1, 2])
            .build();
        let len = write_list(&sys, &stream);

        call(&mut sys, LIST, len).unwrap();
        call(&mut sys, LIST, len).unwrap();
        drawn(&mut sys, &render);
        assert_eq!(states(&sys, len), [(State::Running, false)]);

        sys.modules.mem.write(Address(0x2000), &2.0f32.to_be_bytes());
        call(&mut sys, LIST, len).unwrap();
        assert_eq!(states(&sys, len), [(State::Running, true)]);
        assert_eq!(sys.stats.dlist_fallbacks, 1);
        assert_eq!(sys.stats.dlist_hits, 0);

        let batch = &drawn(&mut sys, &render)[0];
        assert_eq!(batch.vertices[0..4], 2.0f32.to_ne_bytes());

        // uncachable is terminal
        call(&mut sys, LIST, len).unwrap();
        assert_eq!(sys.stats.dlist_fallbacks, 2);
        assert_eq!(sys.stats.dlist_compiles, 1);
        assert_eq!(sys.dlists.bytes(), 0);
    }

    #[test]
    fn changed_bytes_before_compiling() {
        let (mut sys, _) = setup(Config::default());
        let len = write_list(&sys, &StreamBuilder::new().set_bp(0xF3, 1).build());

        call(&mut sys, LIST, len).unwrap();
        write_list(&sys, &StreamBuilder::new().set_bp(0xF3, 2).build());
        call(&mut sys, LIST, len).unwrap();

        assert_eq!(states(&sys, len), [(State::Compiled, true)]);
        assert_eq!(sys.gpu.bp[0xF3], 2);
        assert_eq!(sys.stats.dlist_compiles, 0);
    }

    #[test]
    fn nested_calls_are_uncachable() {
        let (mut sys, _) = setup(Config::default());
        let inner = StreamBuilder::new().set_bp(0xF3, 7).build();
        sys.modules.mem.write(Address(0x3000), &inner);

        let outer = StreamBuilder::new()
            .call(Address(0x3000), inner.len() as u32)
            .build();
        let len = write_list(&sys, &outer);

        call(&mut sys, LIST, len).unwrap();
        assert_eq!(sys.gpu.bp[0xF3], 7);
        assert_eq!(states(&sys, len), [(State::Analyzing, true)]);
        assert!(sys.dlists.status(Address(0x3000), inner.len() as u32).is_empty());
        assert_eq!(sys.call_depth, 0);
    }

    #[test]
    fn formats_alias_the_same_list() {
        let (mut sys, _) = setup(Config::default());
        let stream = StreamBuilder::new()
            .draw(Topology::PointList, 0, 1, &[0])
            .build();
        let len = write_list(&sys, &stream);

        call(&mut sys, LIST, len).unwrap();
        call(&mut sys, LIST, len).unwrap();

        // same bytes, different array stride
        cmd::set_register(&mut sys, 0xB0, 24);
        call(&mut sys, LIST, len).unwrap();

        let mut states = states(&sys, len);
        states.sort_by_key(|(state, _)| *state as u8);
        assert_eq!(
            states,
            [(State::Compiled, false), (State::Running, false)]
        );
        assert_eq!(sys.dlists.len(), 2);
    }

    #[test]
    fn disabled_cache_interprets() {
        let config = Config {
            display_list_cache: false,
            ..Default::default()
        };

        let (mut sys, _) = setup(config);
        let len = write_list(&sys, &StreamBuilder::new().set_bp(0xF3, 3).build());
        for _ in 0..3 {
            call(&mut sys, LIST, len).unwrap();
        }

        assert_eq!(sys.gpu.bp[0xF3], 3);
        assert_eq!(sys.dlists.len(), 0);
    }

    #[test]
    fn budget_overflow_clears_everything() {
        let config = Config {
            display_list_budget: 1,
            ..Default::default()
        };

        let (mut sys, _) = setup(config);
        let len = write_list(&sys, &StreamBuilder::new().set_bp(0xF3, 1).build());
        call(&mut sys, LIST, len).unwrap();
        call(&mut sys, LIST, len).unwrap();

        assert_eq!(sys.stats.dlist_compiles, 1);
        assert_eq!(sys.dlists.len(), 0);
        assert_eq!(sys.dlists.bytes(), 0);
    }
}
