//! Node Graph: a mixing graph with a single endpoint (spec.md §4.3).
//!
//! Grounded on rf-engine::graph::AudioGraph's zero-allocation `process()`
//! (pre-allocated buffers, iterate-and-accumulate) but simplified to match
//! the spec: there is no general node-to-node connection topology here,
//! only attach-to-endpoint. Each node owns one stereo source and a bus
//! gain; the endpoint sums every started node's contribution.

use dm_core::StereoFrame;

/// A single stereo-producing source a graph node wraps. Implemented by
/// the pitch source (voices) and by simple generators (preview taps).
pub trait NodeSource: Send + Sync {
    /// Fills `out` with exactly `out.len()` frames; pads with silence and
    /// reports exhaustion the same way `PitchSource::read` does.
    fn read(&mut self, out: &mut [StereoFrame]) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Started,
    Stopped,
}

/// Opaque handle returned by `attach`. Carries a generation to guard
/// against stale handles after a slot is reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeHandle {
    index: usize,
    generation: u32,
}

struct Entry {
    source: Box<dyn NodeSource>,
    bus_volume: f32,
    state: NodeState,
    scratch: Vec<StereoFrame>,
}

/// The mixing graph. Capacity is fixed at construction (spec.md §9: fixed
/// arrays sized to worst case, not dynamic after init).
pub struct NodeGraph {
    slots: Vec<Option<Entry>>,
    /// Per-index generation, persisted across slot reuse so a stale
    /// `NodeHandle` from a detached node can't alias a later occupant.
    generations: Vec<u32>,
    attachment_order: Vec<usize>,
    block_size: usize,
}

impl NodeGraph {
    pub fn new(capacity: usize, block_size: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            generations: vec![0; capacity],
            attachment_order: Vec::with_capacity(capacity),
            block_size,
        }
    }

    /// Attaches a node and returns its handle. Allocation (the node's
    /// scratch buffer) happens here, never in `read` (spec.md §4.3).
    pub fn attach(&mut self, source: Box<dyn NodeSource>) -> Option<NodeHandle> {
        let index = self.slots.iter().position(Option::is_none)?;
        let generation = self.generations[index];
        self.slots[index] = Some(Entry {
            source,
            bus_volume: 0.0,
            state: NodeState::Started,
            scratch: vec![StereoFrame::silence(); self.block_size],
        });
        self.attachment_order.push(index);
        Some(NodeHandle { index, generation })
    }

    /// Detaches a node. The caller must not destroy the underlying source
    /// until the detach has taken effect relative to `read` (spec.md §4.3,
    /// §5) — on a single-threaded engine this is true as soon as this call
    /// returns.
    pub fn detach(&mut self, handle: NodeHandle) {
        if !self.valid(handle) {
            return;
        }
        self.slots[handle.index] = None;
        self.generations[handle.index] = self.generations[handle.index].wrapping_add(1);
        self.attachment_order.retain(|&i| i != handle.index);
    }

    fn valid(&self, handle: NodeHandle) -> bool {
        self.slots[handle.index].is_some() && self.generations[handle.index] == handle.generation
    }

    pub fn set_bus_volume(&mut self, handle: NodeHandle, volume: f32) {
        if self.valid(handle) {
            self.slots[handle.index].as_mut().unwrap().bus_volume = volume;
        }
    }

    pub fn bus_volume(&self, handle: NodeHandle) -> Option<f32> {
        self.valid(handle).then(|| self.slots[handle.index].as_ref().unwrap().bus_volume)
    }

    pub fn set_state(&mut self, handle: NodeHandle, state: NodeState) {
        if self.valid(handle) {
            self.slots[handle.index].as_mut().unwrap().state = state;
        }
    }

    pub fn is_attached(&self, handle: NodeHandle) -> bool {
        self.valid(handle)
    }

    /// Sums every started node's contribution into `out`, in attachment
    /// order. Never allocates. Sources at end-of-stream contribute
    /// silence for the remainder of the block (spec.md §4.3).
    pub fn read(&mut self, out: &mut [StereoFrame]) {
        for frame in out.iter_mut() {
            *frame = StereoFrame::silence();
        }

        for &index in &self.attachment_order {
            let Some(entry) = self.slots[index].as_mut() else { continue };
            if entry.state != NodeState::Started {
                continue;
            }
            let scratch = &mut entry.scratch[..out.len()];
            entry.source.read(scratch);
            let gain = entry.bus_volume;
            for (dst, src) in out.iter_mut().zip(scratch.iter()) {
                dst.left += src.left * gain;
                dst.right += src.right * gain;
            }
        }
    }
}
