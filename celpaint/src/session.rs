//! # Session
//!
//! Owns the live canvas and every per-frame resource, and drives them from a single thread: frame
//! switches, pen input, undo and redo, and the per-frame [`Session::tick`] that consumes background
//! results. Background tasks (upgrades, mip streaming, debounce timers) only ever talk back through
//! the handoff channel.

use crate::{
    bindless::{BindlessTable, TableError, TextureIndex, TextureTable},
    canvas::PingPongCanvas,
    config::{Settings, SettingsError},
    context::GpuContext,
    device::{CommandList, DeviceError},
    frames::{load_frame, save_frame, FrameError, FrameStore, FrameTexture},
    garbage::GarbageQueue,
    pen::{Brush, PenMachine, PenStep, StylusEvent},
    replay::ReplayEngine,
    snapshot::SnapshotCache,
    streaming,
    upgrade::{Handoff, PendingUpgrade, Upgrader},
};
use celpaint_core::{
    action::{apply_layer_action, ActionError, PropertyChange, VisibilityChange},
    color::Color,
    layer::{EntityId, LayerError, LayerStore},
    stroke::{PenState, Stroke},
    transform::Similarity,
    util::UnitF32,
    Action, ActionRecorder, DoUndo, ResolutionTier,
};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

/// Slots in the texture table: one per frame, plus the live canvas.
const TEXTURE_TABLE_CAPACITY: u32 = 4096;
/// How long [`Session::close`] waits for running upgrades.
const CLOSE_UPGRADE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Table(#[from] TableError),
    #[error(transparent)]
    Layer(#[from] LayerError),
    #[error(transparent)]
    Action(#[from] ActionError),
    #[error(transparent)]
    Settings(#[from] SettingsError),
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum SwitchOutcome {
    Completed,
    /// Already there.
    Unchanged,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum StrokeOutcome {
    /// The pen is up.
    Idle,
    /// Pen-down on a frame below full resolution. Nothing was drawn.
    Rejected,
    /// A stroke is in progress.
    Drawing,
    /// The stroke ended with too few samples to keep.
    Discarded,
    /// The stroke ended and was recorded.
    Committed,
}

/// Requests frame switches from any thread. Only the most recent request is kept, so rapid
/// scrubbing ends on the last frame asked for without visiting the ones in between.
#[derive(Clone)]
pub struct SwitchHandle {
    gate: Arc<tokio::sync::Semaphore>,
    pending: Arc<parking_lot::Mutex<Option<u32>>>,
}
impl SwitchHandle {
    fn new() -> Self {
        Self {
            gate: Arc::new(tokio::sync::Semaphore::new(1)),
            pending: Arc::default(),
        }
    }
    /// Switch to `frame` on the next tick, replacing any earlier request.
    pub fn request(&self, frame: u32) {
        *self.pending.lock() = Some(frame);
    }
    #[must_use]
    pub fn is_switching(&self) -> bool {
        self.gate.available_permits() == 0
    }
    fn take_pending(&self) -> Option<u32> {
        self.pending.lock().take()
    }
}

/// The canvas engine of one open document.
///
/// There is no `Drop`. Device resources are released by [`Session::close`].
pub struct Session<L: LayerStore> {
    settings: Settings,
    context: Arc<GpuContext>,
    runtime: tokio::runtime::Handle,
    frames: Arc<FrameStore>,
    canvas: PingPongCanvas,
    /// Table slot the live canvas is presented through.
    canvas_slot: TextureIndex,
    snapshots: SnapshotCache,
    garbage: GarbageQueue,
    table: BindlessTable,
    layers: L,
    recorders: hashbrown::HashMap<u32, ActionRecorder>,
    /// Opacity of each hidden layer, restored when it is shown again.
    hidden_opacity: hashbrown::HashMap<EntityId, UnitF32>,
    replay: ReplayEngine,
    current_frame: u32,
    frame_counter: u64,
    pen: PenMachine,
    brush: Brush,
    upgrader: Upgrader,
    handoff_send: crossbeam::channel::Sender<Handoff>,
    handoff_recv: crossbeam::channel::Receiver<Handoff>,
    switch: SwitchHandle,
    /// Bumped on every switch. Timers scheduled before a switch see the change and do nothing.
    switch_epoch: Arc<AtomicU64>,
}

impl<L: LayerStore> Session<L> {
    /// Allocate the canvas and snapshot ring and open frame 0.
    ///
    /// # Errors
    /// Invalid settings, or device failures. Nothing remains allocated.
    pub fn new(
        settings: Settings,
        context: Arc<GpuContext>,
        runtime: tokio::runtime::Handle,
        layers: L,
    ) -> Result<Self, SessionError> {
        settings.validate()?;
        let canvas = PingPongCanvas::new(&context, settings.working_resolution)?;
        let snapshots = match SnapshotCache::new(
            &context,
            settings.snapshot_capacity,
            settings.working_resolution,
        ) {
            Ok(snapshots) => snapshots,
            Err(e) => {
                canvas.destroy(&context);
                return Err(e.into());
            }
        };
        let mut table = BindlessTable::new(TEXTURE_TABLE_CAPACITY);
        // Unwrap OK - the table is fresh and nonempty.
        let canvas_slot = table.assign_texture_index().unwrap();
        let frames = Arc::new(FrameStore::new());
        let (handoff_send, handoff_recv) = crossbeam::channel::unbounded();
        let upgrader = Upgrader::new(
            context.clone(),
            frames.clone(),
            settings.ladder,
            handoff_send.clone(),
            runtime.clone(),
        );
        let mut this = Self {
            replay: ReplayEngine {
                snapshot_interval: settings.snapshot_interval,
                spacing_factor: settings.spacing_factor,
                softness: settings.brush_softness,
            },
            settings,
            context,
            runtime,
            frames,
            canvas,
            canvas_slot,
            snapshots,
            garbage: GarbageQueue::new(),
            table,
            layers,
            recorders: hashbrown::HashMap::new(),
            hidden_opacity: hashbrown::HashMap::new(),
            current_frame: 0,
            frame_counter: 0,
            pen: PenMachine::default(),
            brush: Brush::default(),
            upgrader,
            handoff_send,
            handoff_recv,
            switch: SwitchHandle::new(),
            switch_epoch: Arc::new(AtomicU64::new(0)),
        };
        match this.enter_frame(0) {
            Ok(()) => Ok(this),
            Err(e) => {
                this.close();
                Err(e)
            }
        }
    }
    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }
    #[must_use]
    pub fn context(&self) -> &Arc<GpuContext> {
        &self.context
    }
    #[must_use]
    pub fn frames(&self) -> &Arc<FrameStore> {
        &self.frames
    }
    #[must_use]
    pub fn canvas(&self) -> &PingPongCanvas {
        &self.canvas
    }
    #[must_use]
    pub fn canvas_slot(&self) -> TextureIndex {
        self.canvas_slot
    }
    #[must_use]
    pub fn texture_table(&self) -> &BindlessTable {
        &self.table
    }
    #[must_use]
    pub fn layers(&self) -> &L {
        &self.layers
    }
    /// Direct access to the layer store. Changes made here are not recorded.
    pub fn layers_mut(&mut self) -> &mut L {
        &mut self.layers
    }
    #[must_use]
    pub fn current_frame(&self) -> u32 {
        self.current_frame
    }
    #[must_use]
    pub fn frame_counter(&self) -> u64 {
        self.frame_counter
    }
    #[must_use]
    pub fn recorder(&self, frame: u32) -> Option<&ActionRecorder> {
        self.recorders.get(&frame)
    }
    #[must_use]
    pub fn switch_handle(&self) -> SwitchHandle {
        self.switch.clone()
    }
    #[must_use]
    pub fn brush(&self) -> Brush {
        self.brush
    }
    /// Brush for strokes started by [`Session::pen_event`] from now on.
    pub fn set_brush(&mut self, brush: Brush) {
        self.brush = brush;
    }
    #[must_use]
    pub fn tier(&self, frame: u32) -> Option<ResolutionTier> {
        self.frames.tier(frame)
    }
    /// Strokes may only start on a frame at full resolution.
    #[must_use]
    pub fn is_paintable(&self, frame: u32) -> bool {
        self.frames.tier(frame).is_some_and(ResolutionTier::is_full)
    }
    /// Whether the frame's canvas must be rebuilt from its history before presenting.
    #[must_use]
    pub fn needs_replay(&self, frame: u32) -> bool {
        self.frames
            .with(frame, |texture| texture.needs_replay())
            .unwrap_or(false)
    }

    /// Make `target` the current frame.
    ///
    /// A stroke in progress is finished on the departing frame first. Only the departing frame's
    /// own fence is waited on.
    ///
    /// The switch gate is held throughout, so holders of a [`SwitchHandle`] can see a switch in
    /// progress. Their requests are recorded and performed by the next [`Session::tick`].
    ///
    /// # Errors
    /// Device failures while saving or loading. The departing frame stays current, and is replayed
    /// from its history before it is next presented.
    pub fn switch_to_frame(&mut self, target: u32) -> Result<SwitchOutcome, SessionError> {
        let departing = self.current_frame;
        if target == departing {
            return Ok(SwitchOutcome::Unchanged);
        }
        let gate = self.switch.gate.clone();
        // Unwrap OK - only taken here, and `&mut self` excludes a second switch.
        let _permit = gate.try_acquire().unwrap();
        self.finish_stroke();
        if self.needs_replay(departing) {
            self.replay_current()?;
        }
        let context = &self.context;
        let canvas = &self.canvas;
        let saved = self
            .frames
            .with(departing, |texture| {
                let saved = texture
                    .wait(context)
                    .and_then(|()| save_frame(context, texture, canvas));
                if saved.is_ok() {
                    texture.cancel_streaming();
                } else {
                    texture.needs_replay = true;
                }
                saved
            })
            .transpose();
        if let Err(e) = saved {
            log::warn!("saving frame {departing} failed, staying: {e}");
            return Err(e.into());
        }
        self.current_frame = target;
        if let Err(e) = self.enter_frame(target) {
            log::warn!("entering frame {target} failed, returning to {departing}: {e}");
            self.current_frame = departing;
            self.frames
                .with(departing, |texture| texture.needs_replay = true);
            if let Err(e) = self.enter_frame(departing) {
                log::error!("reloading frame {departing} failed: {e}");
            }
            return Err(e);
        }
        log::debug!("switched from frame {departing} to {target}");
        Ok(SwitchOutcome::Completed)
    }
    /// Load the current frame into the canvas, creating its texture if new. Replays if the texture
    /// can't reproduce the frame's history at full detail.
    fn enter_frame(&mut self, frame: u32) -> Result<(), SessionError> {
        if !self.frames.contains(frame) {
            let texture =
                FrameTexture::create(&self.context, &mut self.table, &self.settings.ladder)?;
            log::debug!("created frame {frame}");
            if let Err(texture) = self.frames.insert(frame, texture) {
                texture.destroy(&self.context, &mut self.table);
            }
        }
        let context = &self.context;
        let canvas = &self.canvas;
        let (stale, needs_replay) = self
            .frames
            .with(frame, |texture| {
                load_frame(context, texture, canvas)
                    .map(|()| (texture.is_stale(), texture.needs_replay()))
            })
            .ok_or(FrameError::Missing(frame))??;
        let has_history = self
            .recorders
            .get(&frame)
            .is_some_and(|recorder| !recorder.is_empty());
        if has_history && (stale || needs_replay) {
            self.replay_current()?;
        } else {
            self.bind_canvas()?;
        }
        self.start_streaming(frame);
        let epoch = self.switch_epoch.fetch_add(1, Ordering::AcqRel) + 1;
        self.schedule_upgrade(frame, epoch, self.settings.switch_debounce());
        Ok(())
    }
    /// Rebuild the canvas from the current frame's active history.
    fn replay_current(&mut self) -> Result<(), SessionError> {
        let frame = self.current_frame;
        let history = self
            .recorders
            .get(&frame)
            .map_or(&[][..], ActionRecorder::active_history);
        self.replay.replay(
            &self.context,
            frame,
            history,
            &mut self.canvas,
            &mut self.snapshots,
            &mut self.layers,
        )?;
        // Only now, so nobody sees the frame as clean while replay is still running.
        self.frames
            .with(frame, |texture| texture.needs_replay = false);
        self.bind_canvas()
    }
    fn bind_canvas(&mut self) -> Result<(), SessionError> {
        self.table
            .update_binding(self.canvas_slot, self.canvas.result().view())?;
        Ok(())
    }
    /// Start or resume revealing the frame's mips, if it is at full resolution and not done yet.
    fn start_streaming(&self, frame: u32) {
        let runtime = &self.runtime;
        let step = self.settings.mip_stream_step();
        let handoff = &self.handoff_send;
        self.frames.with(frame, |texture| {
            if texture.tier.is_full() && texture.current_streamed_mip > 0 {
                texture.cancel_streaming();
                texture.stream_cancel = Some(streaming::spawn(
                    runtime,
                    frame,
                    texture.current_streamed_mip,
                    step,
                    handoff.clone(),
                ));
            }
        });
    }
    /// After `delay`, upgrade the frame one tier, unless a switch happened in the meantime.
    fn schedule_upgrade(&self, frame: u32, epoch: u64, delay: std::time::Duration) {
        let upgrader = self.upgrader.clone();
        let frames = self.frames.clone();
        let switch_epoch = self.switch_epoch.clone();
        self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if switch_epoch.load(Ordering::Acquire) != epoch {
                return;
            }
            if frames.tier(frame).is_some_and(|tier| !tier.is_full()) {
                upgrader.request(frame);
            }
        });
    }

    /// Feed one stylus event with the current brush.
    ///
    /// # Errors
    /// Device failures while drawing live stamps.
    pub fn pen_event(&mut self, event: StylusEvent) -> Result<StrokeOutcome, SessionError> {
        self.feed(event, self.brush)
    }
    /// Draw and record a whole stroke, as if the pen went down on the first state and lifted after
    /// the last. On a frame below full resolution, nothing happens and `Rejected` is returned.
    ///
    /// # Errors
    /// Device failures while drawing live stamps.
    pub fn record_stroke(
        &mut self,
        states: &[PenState],
        color: Color,
        radius: f32,
    ) -> Result<StrokeOutcome, SessionError> {
        self.finish_stroke();
        let brush = Brush { color, radius };
        for state in states {
            let event = StylusEvent {
                pos: (state.x, state.y),
                pressure: Some(state.pressure.get()),
                pressed: true,
            };
            match self.feed(event, brush)? {
                StrokeOutcome::Idle | StrokeOutcome::Drawing => (),
                ended => return Ok(ended),
            }
        }
        let pos = states.last().map_or((0.0, 0.0), |state| (state.x, state.y));
        self.feed(
            StylusEvent {
                pos,
                pressure: None,
                pressed: false,
            },
            brush,
        )
    }
    fn feed(&mut self, event: StylusEvent, brush: Brush) -> Result<StrokeOutcome, SessionError> {
        let frame = self.current_frame;
        let paintable = self.is_paintable(frame);
        let step = self.pen.handle(
            event,
            paintable,
            brush,
            self.settings.spacing_factor,
            self.settings.smoothing_warmup,
        );
        match step {
            PenStep::Ignored => Ok(if self.pen.is_active() {
                StrokeOutcome::Drawing
            } else {
                StrokeOutcome::Idle
            }),
            PenStep::Rejected => {
                let tier = self.frames.tier(frame).unwrap_or(ResolutionTier::Thumb);
                log::info!(
                    "stroke on frame {frame} rejected, still at {} resolution",
                    tier.as_ref()
                );
                Ok(StrokeOutcome::Rejected)
            }
            PenStep::Stamps(stamps) => {
                if !stamps.is_empty() {
                    let mut commands = CommandList::new();
                    for stamp in &stamps {
                        self.canvas
                            .apply_stamp(stamp, self.settings.brush_softness, &mut commands);
                    }
                    self.context.submit_and_wait(commands)?;
                    self.bind_canvas()?;
                }
                Ok(StrokeOutcome::Drawing)
            }
            PenStep::Finished(brush, samples) => Ok(self.commit_stroke(brush, samples)),
        }
    }
    /// End a stroke left in progress, as if the pen lifted.
    fn finish_stroke(&mut self) {
        if let Some((brush, samples)) = self.pen.finish() {
            self.commit_stroke(brush, samples);
        }
    }
    fn commit_stroke(&mut self, brush: Brush, samples: Vec<PenState>) -> StrokeOutcome {
        let frame = self.current_frame;
        // Live stamps are on the canvas either way. Replay makes it match the history exactly.
        self.frames
            .with(frame, |texture| texture.needs_replay = true);
        if samples.len() <= self.settings.min_stroke_samples {
            log::debug!("discarding {}-sample stroke on frame {frame}", samples.len());
            return StrokeOutcome::Discarded;
        }
        match Stroke::new(&samples, brush.color, brush.radius) {
            Ok(stroke) => {
                self.record(stroke.into());
                StrokeOutcome::Committed
            }
            Err(e) => {
                log::warn!("discarding stroke on frame {frame}: {e}");
                StrokeOutcome::Discarded
            }
        }
    }
    /// Record onto the current frame's history.
    fn record(&mut self, action: Action) {
        let frame = self.current_frame;
        let recorder = self.recorders.entry(frame).or_default();
        let cursor = recorder.cursor();
        let dropped = recorder.record(action);
        if dropped != 0 {
            log::debug!("frame {frame} dropped {dropped} undone actions");
            self.snapshots.invalidate_after(frame, cursor);
        }
    }

    /// Undo the current frame's latest action. Returns false if there was none.
    pub fn undo(&mut self) -> bool {
        self.finish_stroke();
        let frame = self.current_frame;
        let Some(recorder) = self.recorders.get_mut(&frame) else {
            return false;
        };
        if !recorder.undo() {
            return false;
        }
        if let Some(action) = recorder.action_at(recorder.cursor()) {
            Self::apply(&self.frames, &mut self.layers, frame, DoUndo::Undo(action));
        }
        true
    }
    /// Redo the current frame's next undone action. Returns false if there was none.
    pub fn redo(&mut self) -> bool {
        self.finish_stroke();
        let frame = self.current_frame;
        let Some(recorder) = self.recorders.get_mut(&frame) else {
            return false;
        };
        if !recorder.redo() {
            return false;
        }
        if let Some(action) = recorder.action_at(recorder.cursor() - 1) {
            Self::apply(&self.frames, &mut self.layers, frame, DoUndo::Do(action));
        }
        true
    }
    /// Strokes take effect on the next replay. Layer actions take effect immediately.
    fn apply(frames: &FrameStore, layers: &mut L, frame: u32, action: DoUndo<'_, Action>) {
        let inner = action.inner();
        if inner.is_stroke() {
            frames.with(frame, |texture| texture.needs_replay = true);
            return;
        }
        match apply_layer_action(layers, action) {
            Ok(()) => (),
            Err(ActionError::Unimplemented(kind)) => log::debug!("{kind} has no effect, skipped"),
            Err(e) => log::warn!("failed to apply {}: {e}", inner.kind()),
        }
    }
    /// Apply a layer action and record it onto the current frame. Unrecorded on failure.
    fn record_layer_action(&mut self, action: Action) -> Result<(), SessionError> {
        self.finish_stroke();
        apply_layer_action(&mut self.layers, DoUndo::Do(&action))?;
        self.record(action);
        Ok(())
    }
    /// Show or hide a layer. A hidden layer's opacity is zero until shown again.
    ///
    /// # Errors
    /// If the layer doesn't exist.
    pub fn set_layer_visibility(
        &mut self,
        entity: EntityId,
        visible: bool,
    ) -> Result<(), SessionError> {
        let old_visible = self
            .layers
            .visible(entity)
            .ok_or(LayerError::UnknownEntity(entity))?;
        if old_visible == visible {
            return Ok(());
        }
        let saved_opacity = if visible {
            self.hidden_opacity
                .get(&entity)
                .copied()
                .unwrap_or(UnitF32::ONE)
        } else {
            let opacity = self
                .layers
                .blend_mode(entity)
                .ok_or(LayerError::UnknownEntity(entity))?
                .opacity;
            self.hidden_opacity.insert(entity, opacity);
            opacity
        };
        self.record_layer_action(
            VisibilityChange {
                entity,
                old_visible,
                new_visible: visible,
                saved_opacity,
            }
            .into(),
        )
    }
    /// # Errors
    /// If the layer doesn't exist.
    pub fn set_layer_opacity(
        &mut self,
        entity: EntityId,
        opacity: UnitF32,
    ) -> Result<(), SessionError> {
        let old = self
            .layers
            .blend_mode(entity)
            .ok_or(LayerError::UnknownEntity(entity))?
            .opacity;
        self.record_layer_action(
            PropertyChange {
                entity,
                old,
                new: opacity,
            }
            .into(),
        )
    }
    /// # Errors
    /// If the layer doesn't exist.
    pub fn set_layer_transform(
        &mut self,
        entity: EntityId,
        transform: Similarity,
    ) -> Result<(), SessionError> {
        let old = self
            .layers
            .transform(entity)
            .ok_or(LayerError::UnknownEntity(entity))?;
        self.record_layer_action(
            PropertyChange {
                entity,
                old,
                new: transform,
            }
            .into(),
        )
    }

    /// Delete a frame other than the current one, along with its history and snapshots. Its image
    /// is destroyed once the device can no longer be using it.
    ///
    /// # Errors
    /// [`FrameError::Current`] or [`FrameError::Missing`].
    pub fn delete_frame(&mut self, frame: u32) -> Result<(), SessionError> {
        if frame == self.current_frame {
            return Err(FrameError::Current(frame).into());
        }
        let texture = self
            .frames
            .remove(frame)
            .ok_or(FrameError::Missing(frame))?;
        if let Err(e) = texture.wait(&self.context) {
            log::warn!("waiting on deleted frame {frame}: {e}");
        }
        let image = texture.retire(&self.context, &mut self.table);
        self.garbage.push(image, self.frame_counter);
        self.recorders.remove(&frame);
        self.snapshots.invalidate_frame(frame);
        log::debug!("deleted frame {frame}");
        Ok(())
    }

    /// Per-frame upkeep. Installs finished upgrades, applies streaming progress, performs a pending
    /// switch, replays the current frame if needed, and collects garbage.
    ///
    /// # Errors
    /// Device failures. The tick may be retried.
    pub fn tick(&mut self) -> Result<(), SessionError> {
        self.frame_counter += 1;
        while let Ok(handoff) = self.handoff_recv.try_recv() {
            match handoff {
                Handoff::Upgrade(pending) => self.install_upgrade(pending)?,
                Handoff::MipStreamed { frame, mip } => {
                    // Progress sent just before a cancel is stale.
                    self.frames.with(frame, |texture| {
                        let streaming = texture.stream_cancel.is_some();
                        if streaming && texture.tier.is_full() && mip < texture.current_streamed_mip
                        {
                            texture.current_streamed_mip = mip;
                        }
                    });
                }
            }
        }
        if let Some(target) = self.switch.take_pending() {
            self.switch_to_frame(target)?;
        }
        if self.needs_replay(self.current_frame) {
            self.replay_current()?;
        }
        let context = &self.context;
        for frame in self.frames.frame_indices() {
            self.frames
                .with(frame, |texture| texture.reap_fences(context))
                .transpose()?;
        }
        self.garbage.collect(
            &self.context,
            self.frame_counter,
            self.settings.frames_in_flight,
        );
        Ok(())
    }
    /// Swap an upgraded image into its texture. The old image goes to the garbage queue, as does
    /// the new one if the texture moved on without it.
    fn install_upgrade(&mut self, pending: PendingUpgrade) -> Result<(), SessionError> {
        let PendingUpgrade {
            frame,
            from_tier,
            tier,
            image,
        } = pending;
        self.upgrader.finish(frame);
        let initial_mip = self.settings.initial_streamed_mip;
        let mut incoming = Some(image);
        let installed = self
            .frames
            .with(frame, |texture| {
                if texture.tier != from_tier {
                    return None;
                }
                let old = std::mem::replace(&mut texture.image, incoming.take()?);
                texture.tier = tier;
                if tier.is_full() {
                    texture.current_streamed_mip = initial_mip.min(texture.mip_levels() - 1);
                    texture.needs_replay = true;
                }
                Some((old, texture.texture_index(), texture.image.view()))
            })
            .flatten();
        let Some((old, index, view)) = installed else {
            if let Some(image) = incoming {
                log::warn!(
                    "discarding stale upgrade of frame {frame} to {}",
                    tier.as_ref()
                );
                self.garbage.push(image, self.frame_counter);
            }
            return Ok(());
        };
        self.garbage.push(old, self.frame_counter);
        self.table.update_binding(index, view)?;
        log::debug!("frame {frame} now at {} resolution", tier.as_ref());
        if frame == self.current_frame {
            if tier.is_full() {
                self.start_streaming(frame);
            } else {
                let epoch = self.switch_epoch.load(Ordering::Acquire);
                self.schedule_upgrade(frame, epoch, self.settings.upgrade_chain_delay());
            }
        }
        Ok(())
    }

    /// Release every device resource. Upgrades already running are waited for, and their results
    /// destroyed.
    pub fn close(mut self) {
        self.finish_stroke();
        self.upgrader.close();
        // Invalidates any pending debounce or chain timers.
        self.switch_epoch.fetch_add(1, Ordering::AcqRel);
        let deadline = std::time::Instant::now() + CLOSE_UPGRADE_TIMEOUT;
        while self.upgrader.has_in_flight() {
            match self.handoff_recv.recv_timeout(std::time::Duration::from_millis(10)) {
                Ok(handoff) => self.discard_handoff(handoff),
                Err(crossbeam::channel::RecvTimeoutError::Timeout)
                    if std::time::Instant::now() < deadline => {}
                Err(_) => {
                    log::error!("upgrades still running at close, their images are leaked");
                    break;
                }
            }
        }
        while let Ok(handoff) = self.handoff_recv.try_recv() {
            self.discard_handoff(handoff);
        }
        for (frame, texture) in self.frames.drain() {
            if let Err(e) = texture.wait(&self.context) {
                log::warn!("waiting on frame {frame} at close: {e}");
            }
            texture.destroy(&self.context, &mut self.table);
        }
        self.table.release(self.canvas_slot);
        self.snapshots.destroy(&self.context);
        self.canvas.destroy(&self.context);
        self.garbage.drain(&self.context);
        log::debug!("session closed after {} frames", self.frame_counter);
    }
    fn discard_handoff(&self, handoff: Handoff) {
        if let Handoff::Upgrade(pending) = handoff {
            self.upgrader.finish(pending.frame);
            self.context.destroy_image(pending.image);
        }
    }
}
