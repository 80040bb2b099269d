//! # Frames
//!
//! Every animation frame that has ever been visited owns a persistent [`FrameTexture`], kept at one
//! of four resolution tiers. New frames start at the smallest tier, blank, so visiting one is
//! instant. Background upgrades raise the tier later.

use crate::{
    bindless::{TableError, TextureIndex, TextureTable},
    canvas::PingPongCanvas,
    context::GpuContext,
    device::{CommandList, DeviceError, Fence, Filter, GpuImage},
};
use celpaint_core::tier::{Ladder, ResolutionTier};

#[derive(thiserror::Error, Debug)]
pub enum FrameError {
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    Table(#[from] TableError),
    #[error("frame {0} does not exist")]
    Missing(u32),
    #[error("frame {0} is current and cannot be deleted")]
    Current(u32),
}

pub struct FrameTexture {
    pub(crate) image: GpuImage,
    texture_index: TextureIndex,
    pub(crate) tier: ResolutionTier,
    /// Finest mip level revealed so far. Only meaningful at full resolution.
    pub(crate) current_streamed_mip: u32,
    pub(crate) needs_replay: bool,
    /// The most recent submission touching this texture.
    last_fence: Option<Fence>,
    /// Older fences, destroyed once `last_fence` is seen signaled.
    superseded_fences: smallvec::SmallVec<[Fence; 4]>,
    /// Dropping or sending cancels this frame's mip streaming.
    pub(crate) stream_cancel: Option<tokio::sync::oneshot::Sender<()>>,
}
impl FrameTexture {
    /// A blank texture at the smallest tier, bound into a fresh table slot.
    ///
    /// # Errors
    /// On failure, nothing remains allocated.
    pub fn create(
        context: &GpuContext,
        table: &mut impl TextureTable,
        ladder: &Ladder,
    ) -> Result<Self, FrameError> {
        let tier = ResolutionTier::Thumb;
        // Proxies never get a mip chain.
        let image = context.create_image(ladder.extent(tier), 1)?;
        let texture_index = match table.assign_texture_index() {
            Ok(index) => index,
            Err(e) => {
                context.destroy_image(image);
                return Err(e.into());
            }
        };
        let fence = table
            .update_binding(texture_index, image.view())
            .map_err(FrameError::from)
            .and_then(|()| {
                let mut commands = CommandList::new();
                commands.clear(image.image(), [0.0; 4]);
                context.submit(commands).map_err(FrameError::from)
            });
        match fence {
            Ok(fence) => Ok(Self {
                image,
                texture_index,
                tier,
                current_streamed_mip: 0,
                needs_replay: false,
                last_fence: Some(fence),
                superseded_fences: smallvec::SmallVec::new(),
                stream_cancel: None,
            }),
            Err(e) => {
                table.release(texture_index);
                context.destroy_image(image);
                Err(e)
            }
        }
    }
    #[must_use]
    pub fn image(&self) -> &GpuImage {
        &self.image
    }
    #[must_use]
    pub fn texture_index(&self) -> TextureIndex {
        self.texture_index
    }
    #[must_use]
    pub fn tier(&self) -> ResolutionTier {
        self.tier
    }
    #[must_use]
    pub fn mip_levels(&self) -> u32 {
        self.image.mip_levels()
    }
    #[must_use]
    pub fn current_streamed_mip(&self) -> u32 {
        self.current_streamed_mip
    }
    #[must_use]
    pub fn needs_replay(&self) -> bool {
        self.needs_replay
    }
    #[must_use]
    pub fn last_fence(&self) -> Option<Fence> {
        self.last_fence
    }
    /// Whether loading this texture yields less than full detail.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        !self.tier.is_full() || self.current_streamed_mip > 0
    }
    /// Mip level a load reads from.
    #[must_use]
    pub fn load_mip(&self) -> u32 {
        if self.tier.is_full() {
            self.current_streamed_mip.min(self.mip_levels() - 1)
        } else {
            0
        }
    }
    /// Track a new submission. The previous fence is kept until the new one is seen signaled.
    fn push_fence(&mut self, context: &GpuContext, fence: Fence) -> Result<(), DeviceError> {
        if let Some(old) = self.last_fence.replace(fence) {
            self.superseded_fences.push(old);
        }
        self.reap_fences(context)
    }
    /// Destroy superseded fences, if the latest has signaled.
    pub fn reap_fences(&mut self, context: &GpuContext) -> Result<(), DeviceError> {
        if self.superseded_fences.is_empty() {
            return Ok(());
        }
        if let Some(last) = self.last_fence {
            if context.is_signaled(last)? {
                for fence in self.superseded_fences.drain(..) {
                    context.destroy_fence(fence);
                }
            }
        }
        Ok(())
    }
    /// Block until the latest submission touching this texture completes.
    pub fn wait(&self, context: &GpuContext) -> Result<(), DeviceError> {
        match self.last_fence {
            Some(fence) => context.wait(fence),
            None => Ok(()),
        }
    }
    pub fn cancel_streaming(&mut self) {
        if let Some(cancel) = self.stream_cancel.take() {
            // Err if the task already finished.
            let _ = cancel.send(());
        }
    }
    /// Release everything but the image, which is returned for deferred destruction.
    #[must_use = "the image must be destroyed or queued as garbage"]
    pub fn retire(mut self, context: &GpuContext, table: &mut impl TextureTable) -> GpuImage {
        self.cancel_streaming();
        for fence in self.superseded_fences.drain(..).chain(self.last_fence.take()) {
            context.destroy_fence(fence);
        }
        table.release(self.texture_index);
        self.image
    }
    /// Release everything. The device must be done with the texture.
    pub fn destroy(self, context: &GpuContext, table: &mut impl TextureTable) {
        let image = self.retire(context, table);
        context.destroy_image(image);
    }
}

/// Write the canvas result into the texture at its native size. At full resolution, the mip chain
/// is regenerated too.
pub fn save_frame(
    context: &GpuContext,
    texture: &mut FrameTexture,
    canvas: &PingPongCanvas,
) -> Result<(), DeviceError> {
    let mut commands = CommandList::new();
    commands.blit(
        canvas.result().image(),
        0,
        texture.image.image(),
        0,
        Filter::Linear,
    );
    if texture.tier.is_full() {
        commands.generate_mips(texture.image.image(), texture.mip_levels());
    }
    let fence = context.submit(commands)?;
    texture.push_fence(context, fence)
}

/// Resample the texture's currently streamed mip into both canvas images.
pub fn load_frame(
    context: &GpuContext,
    texture: &mut FrameTexture,
    canvas: &PingPongCanvas,
) -> Result<(), DeviceError> {
    let mut commands = CommandList::new();
    canvas.load_from(texture.image.image(), texture.load_mip(), &mut commands);
    let fence = context.submit(commands)?;
    texture.push_fence(context, fence)
}

/// Every frame texture, by frame index.
///
/// Textures are only reached through [`FrameStore::with`], never handed out, so removing a frame
/// yields sole ownership of its texture.
#[derive(Default)]
pub struct FrameStore {
    frames: parking_lot::RwLock<hashbrown::HashMap<u32, parking_lot::Mutex<FrameTexture>>>,
}
impl FrameStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
    /// Call the given closure on the frame's texture, if found, under its lock.
    /// The closure must not access the store.
    pub fn with<F, T>(&self, frame: u32, f: F) -> Option<T>
    where
        F: FnOnce(&mut FrameTexture) -> T,
    {
        let read = self.frames.read();
        let texture = read.get(&frame)?;
        let mut lock = texture.lock();
        Some(f(&mut lock))
    }
    /// Insert a texture. If the frame already has one, the untouched texture is returned as an error.
    pub fn insert(&self, frame: u32, texture: FrameTexture) -> Result<(), FrameTexture> {
        match self.frames.write().entry(frame) {
            hashbrown::hash_map::Entry::Occupied(_) => Err(texture),
            hashbrown::hash_map::Entry::Vacant(v) => {
                v.insert(parking_lot::Mutex::new(texture));
                Ok(())
            }
        }
    }
    pub fn remove(&self, frame: u32) -> Option<FrameTexture> {
        self.frames
            .write()
            .remove(&frame)
            .map(parking_lot::Mutex::into_inner)
    }
    pub fn drain(&self) -> Vec<(u32, FrameTexture)> {
        self.frames
            .write()
            .drain()
            .map(|(frame, texture)| (frame, texture.into_inner()))
            .collect()
    }
    #[must_use]
    pub fn contains(&self, frame: u32) -> bool {
        self.frames.read().contains_key(&frame)
    }
    #[must_use]
    pub fn tier(&self, frame: u32) -> Option<ResolutionTier> {
        self.with(frame, |texture| texture.tier)
    }
    /// Indices of all frames, in ascending order.
    #[must_use]
    pub fn frame_indices(&self) -> Vec<u32> {
        let mut frames: Vec<_> = self.frames.read().keys().copied().collect();
        frames.sort_unstable();
        frames
    }
    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.read().len()
    }
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.read().is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::{load_frame, save_frame, FrameStore, FrameTexture};
    use crate::{
        bindless::{BindlessTable, TextureTable},
        canvas::PingPongCanvas,
        context::GpuContext,
        device::CommandList,
    };
    use celpaint_core::tier::{Ladder, ResolutionTier};

    fn ladder() -> Ladder {
        Ladder::new([4, 8, 16, 32]).unwrap()
    }
    #[test]
    fn fresh_texture_is_blank_thumb() {
        let (context, device) = GpuContext::new_headless();
        let mut table = BindlessTable::new(4);
        let texture = FrameTexture::create(&context, &mut table, &ladder()).unwrap();
        assert_eq!(texture.tier(), ResolutionTier::Thumb);
        assert_eq!(texture.mip_levels(), 1);
        assert_eq!(texture.image().extent(), 4);
        assert!(texture.is_stale());
        assert_eq!(
            table.binding(texture.texture_index()),
            Some(texture.image().view())
        );
        let pixels = device.read_pixels(texture.image().image(), 0).unwrap();
        assert!(pixels.iter().all(|t| *t == [0.0; 4]));
        texture.destroy(&context, &mut table);
        assert_eq!(device.live_images(), 0);
        assert_eq!(device.live_fences(), 0);
        assert_eq!(table.assigned_count(), 0);
    }
    #[test]
    fn creation_rolls_back() {
        let (context, device) = GpuContext::new_headless();
        let mut table = BindlessTable::new(0);
        assert!(FrameTexture::create(&context, &mut table, &ladder()).is_err());
        assert_eq!(device.live_images(), 0);
    }
    #[test]
    fn save_then_load_round_trips() {
        let (context, device) = GpuContext::new_headless();
        let mut table = BindlessTable::new(4);
        let mut texture = FrameTexture::create(&context, &mut table, &ladder()).unwrap();
        let canvas = PingPongCanvas::new(&context, 32).unwrap();
        let mut commands = CommandList::new();
        canvas.clear(&mut commands);
        for image in [canvas.active(), canvas.source()] {
            commands.clear(image.image(), [0.25, 0.5, 0.75, 1.0]);
        }
        context.submit_and_wait(commands).unwrap();
        save_frame(&context, &mut texture, &canvas).unwrap();
        // A uniform canvas survives the trip down to 4px and back.
        let mut commands = CommandList::new();
        canvas.clear(&mut commands);
        context.submit_and_wait(commands).unwrap();
        load_frame(&context, &mut texture, &canvas).unwrap();
        let pixels = device.read_pixels(canvas.result().image(), 0).unwrap();
        assert!(pixels.iter().all(|t| *t == [0.25, 0.5, 0.75, 1.0]));
        // Older fences are reaped once newer ones signal.
        assert_eq!(device.live_fences(), 1);
        texture.destroy(&context, &mut table);
        canvas.destroy(&context);
    }
    #[test]
    fn store_access() {
        let (context, _device) = GpuContext::new_headless();
        let mut table = BindlessTable::new(4);
        let store = FrameStore::new();
        let texture = FrameTexture::create(&context, &mut table, &ladder()).unwrap();
        assert!(store.insert(3, texture).is_ok());
        let duplicate = FrameTexture::create(&context, &mut table, &ladder()).unwrap();
        let duplicate = store.insert(3, duplicate).err().unwrap();
        duplicate.destroy(&context, &mut table);
        assert_eq!(store.tier(3), Some(ResolutionTier::Thumb));
        assert_eq!(store.tier(4), None);
        store.with(3, |texture| texture.needs_replay = true);
        assert_eq!(store.with(3, |texture| texture.needs_replay()), Some(true));
        let removed = store.remove(3).unwrap();
        assert!(!store.contains(3));
        removed.destroy(&context, &mut table);
    }
}
