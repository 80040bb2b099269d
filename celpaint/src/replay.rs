//! # Replay
//!
//! Reconstructs the canvas of a frame from its active history, starting from the nearest snapshot.
//! The output depends only on the history: with or without snapshots, the pixels are identical.

use crate::{
    canvas::PingPongCanvas,
    context::GpuContext,
    device::{CommandList, DeviceError},
    snapshot::SnapshotCache,
};
use celpaint_core::{
    action::{apply_layer_action, ActionError},
    layer::LayerStore,
    stroke::expand_stroke,
    Action, DoUndo,
};

#[derive(Copy, Clone, PartialEq, Debug)]
pub struct ReplayEngine {
    /// A snapshot is stored after every this many actions.
    pub snapshot_interval: usize,
    pub spacing_factor: f32,
    pub softness: f32,
}

/// What a replay did.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub struct ReplayStats {
    /// History position replay started from. Zero without a snapshot.
    pub start_index: usize,
    pub target: usize,
    pub stamps: usize,
    pub snapshots_taken: usize,
}

impl ReplayEngine {
    /// Rebuild `canvas` as it looks after every action of `history` applied in order.
    ///
    /// Layer actions past the starting snapshot are re-applied to `layers`. Afterwards,
    /// [`PingPongCanvas::result`] holds the result, which the caller must rebind.
    ///
    /// # Errors
    /// Device errors, after which the canvas content is unspecified and snapshots taken during this
    /// replay are invalidated.
    pub fn replay(
        &self,
        context: &GpuContext,
        frame: u32,
        history: &[Action],
        canvas: &mut PingPongCanvas,
        snapshots: &mut SnapshotCache,
        layers: &mut impl LayerStore,
    ) -> Result<ReplayStats, DeviceError> {
        let target = history.len();
        let mut commands = CommandList::new();
        let start_index = match snapshots.nearest(frame, target) {
            Some(snapshot) => {
                assert!(
                    snapshot.action_index < target,
                    "snapshot at {} chosen for replay to {target}",
                    snapshot.action_index
                );
                canvas.seed_from(snapshot.image, &mut commands);
                snapshot.action_index
            }
            None => {
                canvas.clear(&mut commands);
                0
            }
        };
        let mut stats = ReplayStats {
            start_index,
            target,
            ..ReplayStats::default()
        };
        let mut taken = Vec::new();
        for (index, action) in history.iter().enumerate().skip(start_index) {
            match action {
                Action::Stroke(stroke) => {
                    for stamp in expand_stroke(stroke, self.spacing_factor) {
                        canvas.apply_stamp(&stamp, self.softness, &mut commands);
                        stats.stamps += 1;
                    }
                }
                other => match apply_layer_action(layers, DoUndo::Do(other)) {
                    Ok(()) => (),
                    Err(ActionError::Unimplemented(kind)) => {
                        log::debug!("replay skipping {kind} action at {index}");
                    }
                    Err(e) => log::warn!("replay of action {index} failed: {e}"),
                },
            }
            let applied = index + 1;
            if applied % self.snapshot_interval == 0 {
                if let Some(slot) =
                    snapshots.store(frame, applied, canvas.result().image(), &mut commands)
                {
                    taken.push(slot);
                }
            }
        }
        stats.snapshots_taken = taken.len();
        if let Err(e) = context.submit_and_wait(commands) {
            for slot in taken {
                snapshots.invalidate_slot(slot);
            }
            return Err(e);
        }
        log::debug!(
            "replayed frame {frame} from {start_index} to {target}, {} stamps",
            stats.stamps
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod test {
    use super::ReplayEngine;
    use crate::{
        canvas::PingPongCanvas, context::GpuContext, device::software::SoftwareDevice,
        snapshot::SnapshotCache,
    };
    use celpaint_core::{
        action::PropertyChange,
        color::Color,
        layer::{InMemoryLayers, LayerStore},
        stroke::{PenState, Stroke},
        transform::Similarity,
        Action, ActionRecorder,
    };

    const ENGINE: ReplayEngine = ReplayEngine {
        snapshot_interval: 2,
        spacing_factor: 0.25,
        softness: 1.0,
    };

    fn stroke(seed: usize) -> Action {
        let y = 2.0 + (seed % 6) as f32 * 4.5;
        let states: Vec<_> = (0..12)
            .map(|i| PenState::new(2.0 + i as f32 * 2.3, y + (i % 3) as f32, 0.5 + (i % 2) as f32 * 0.5))
            .collect();
        let color = Color::new_lossy((seed % 3) as f32 * 0.5, 0.3, 1.0, 0.8).unwrap();
        Stroke::new(&states, color, 3.0 + (seed % 2) as f32).unwrap().into()
    }
    struct Rig {
        context: std::sync::Arc<GpuContext>,
        device: std::sync::Arc<SoftwareDevice>,
        canvas: PingPongCanvas,
        snapshots: SnapshotCache,
        layers: InMemoryLayers,
    }
    impl Rig {
        fn new(capacity: usize) -> Self {
            let (context, device) = GpuContext::new_headless();
            Self {
                canvas: PingPongCanvas::new(&context, 32).unwrap(),
                snapshots: SnapshotCache::new(&context, capacity, 32).unwrap(),
                layers: InMemoryLayers::new(),
                context,
                device,
            }
        }
        fn replay(&mut self, frame: u32, history: &[Action]) -> Vec<[f32; 4]> {
            ENGINE
                .replay(
                    &self.context,
                    frame,
                    history,
                    &mut self.canvas,
                    &mut self.snapshots,
                    &mut self.layers,
                )
                .unwrap();
            self.device
                .read_pixels(self.canvas.result().image(), 0)
                .unwrap()
        }
    }

    #[test]
    fn snapshots_are_transparent() {
        let history: Vec<_> = (0..9).map(stroke).collect();
        let mut cold = Rig::new(1);
        // A fresh engine per prefix so no snapshot is ever used.
        let expected: Vec<_> = (0..=history.len())
            .map(|len| Rig::new(1).replay(0, &history[..len]))
            .collect();
        let mut warm = Rig::new(4);
        // Build up snapshots by replaying the full history, then walk back.
        assert_eq!(warm.replay(0, &history), expected[9]);
        assert!(warm.snapshots.valid_count(0) > 0);
        for len in (0..=history.len()).rev() {
            assert_eq!(warm.replay(0, &history[..len]), expected[len], "prefix {len}");
        }
        assert_eq!(cold.replay(0, &history), expected[9]);
    }
    #[test]
    fn starts_from_nearest_snapshot() {
        let history: Vec<_> = (0..7).map(stroke).collect();
        let mut rig = Rig::new(10);
        let stats = ENGINE
            .replay(
                &rig.context,
                0,
                &history,
                &mut rig.canvas,
                &mut rig.snapshots,
                &mut rig.layers,
            )
            .unwrap();
        assert_eq!(stats.start_index, 0);
        assert_eq!(stats.snapshots_taken, 3);
        let stats = ENGINE
            .replay(
                &rig.context,
                0,
                &history[..5],
                &mut rig.canvas,
                &mut rig.snapshots,
                &mut rig.layers,
            )
            .unwrap();
        assert_eq!(stats.start_index, 4);
        // Snapshot of 4 already existed.
        assert_eq!(stats.snapshots_taken, 0);
        // Other frames don't share snapshots.
        let stats = ENGINE
            .replay(
                &rig.context,
                1,
                &history[..5],
                &mut rig.canvas,
                &mut rig.snapshots,
                &mut rig.layers,
            )
            .unwrap();
        assert_eq!(stats.start_index, 0);
    }
    #[test]
    fn undo_redo_reversible() {
        let mut recorder = ActionRecorder::new();
        let mut rig = Rig::new(3);
        for seed in 0..6 {
            recorder.record(stroke(seed));
        }
        let original = rig.replay(0, recorder.active_history());
        while recorder.undo() {
            rig.replay(0, recorder.active_history());
        }
        assert!(rig.replay(0, recorder.active_history()).iter().all(|t| *t == [0.0; 4]));
        while recorder.redo() {
            rig.replay(0, recorder.active_history());
        }
        assert_eq!(rig.replay(0, recorder.active_history()), original);
    }
    #[test]
    fn layer_actions_applied_in_order() {
        let mut rig = Rig::new(2);
        let id = rig.layers.insert_new();
        let moves: Vec<Action> = (1..=3)
            .map(|i| {
                PropertyChange {
                    entity: id,
                    old: Similarity::translated((i - 1) as f32, 0.0),
                    new: Similarity::translated(i as f32, 0.0),
                }
                .into()
            })
            .chain([Action::LayerCreate(id), stroke(0)])
            .collect();
        rig.replay(0, &moves);
        assert_eq!(rig.layers.transform(id), Some(Similarity::translated(3.0, 0.0)));
    }
    #[test]
    fn failed_submit_invalidates_new_snapshots() {
        let history: Vec<_> = (0..4).map(stroke).collect();
        let mut rig = Rig::new(4);
        rig.device.fail_next_submit();
        assert!(ENGINE
            .replay(
                &rig.context,
                0,
                &history,
                &mut rig.canvas,
                &mut rig.snapshots,
                &mut rig.layers,
            )
            .is_err());
        assert_eq!(rig.snapshots.valid_count(0), 0);
    }
}
