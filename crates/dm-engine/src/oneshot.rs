//! One-shot playback voices shared by the preview channels and direct
//! slot audition (spec.md §3 Preview Channels; §6 "Slot play"). Unlike a
//! pooled cell voice, these have no grid coordinate, are never
//! retriggered by the sequencer, and carry no smoothing state of their
//! own — they attach at a fixed bus volume and play until replaced or
//! explicitly stopped.

use std::sync::Arc;

use dm_audio::pitch::{PitchSource, PitchStrategy, ReadOutcome};
use dm_core::{DmError, DmResult, StereoFrame};
use parking_lot::Mutex;

use crate::graph::{NodeGraph, NodeHandle, NodeSource, NodeState};

struct OneShotNode(Arc<Mutex<PitchSource>>);

impl NodeSource for OneShotNode {
    fn read(&mut self, out: &mut [StereoFrame]) -> bool {
        matches!(self.0.lock().read(out), Ok(ReadOutcome::AtEnd) | Err(_))
    }
}

/// A single attached, fire-and-forget graph node.
pub struct OneShotVoice {
    node: NodeHandle,
}

impl OneShotVoice {
    pub fn spawn(
        graph: &mut NodeGraph,
        buffer: Arc<Vec<StereoFrame>>,
        strategy: PitchStrategy,
        pitch: f32,
        volume: f32,
    ) -> DmResult<Self> {
        if !(0.0..=1.0).contains(&volume) {
            return Err(DmError::BadArgument(format!("volume {volume} out of [0,1]")));
        }
        let mut source = PitchSource::new(buffer, strategy);
        source.set_pitch(pitch)?;
        if strategy == PitchStrategy::Preprocess {
            source.preprocess()?;
        }
        let source = Arc::new(Mutex::new(source));

        let node = graph
            .attach(Box::new(OneShotNode(source)))
            .ok_or(DmError::PoolExhausted)?;
        graph.set_bus_volume(node, volume);
        graph.set_state(node, NodeState::Started);
        Ok(Self { node })
    }

    pub fn stop(self, graph: &mut NodeGraph) {
        graph.detach(self.node);
    }
}
