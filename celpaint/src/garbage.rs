//! # Garbage
//!
//! Superseded images may still be referenced by work in flight on the device, so they are not
//! destroyed right away. Each is stamped with the frame counter at which it died and only destroyed
//! once enough frames have passed that no submission could still refer to it.

use crate::{context::GpuContext, device::GpuImage};

/// Frames of slack on top of the frames-in-flight count.
pub const MARGIN_FRAMES: u64 = 2;

struct Garbage {
    image: GpuImage,
    death_frame: u64,
}

#[derive(Default)]
pub struct GarbageQueue {
    entries: Vec<Garbage>,
}
impl GarbageQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
    pub fn push(&mut self, image: GpuImage, death_frame: u64) {
        log::trace!("{:?} dies at frame {death_frame}", image.image());
        self.entries.push(Garbage { image, death_frame });
    }
    /// Destroy every entry with `current_frame > death_frame + frames_in_flight + MARGIN_FRAMES`,
    /// all under one hold of the context's memory lock. Returns the number destroyed.
    pub fn collect(&mut self, context: &GpuContext, current_frame: u64, frames_in_flight: u64) -> usize {
        let (dead, alive): (Vec<_>, Vec<_>) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|entry| current_frame > entry.death_frame + frames_in_flight + MARGIN_FRAMES);
        self.entries = alive;
        let count = dead.len();
        if count != 0 {
            log::debug!("collecting {count} garbage images at frame {current_frame}");
            context.destroy_images(dead.into_iter().map(|entry| entry.image));
        }
        count
    }
    /// Destroy everything regardless of age. Only valid once the device is idle.
    pub fn drain(&mut self, context: &GpuContext) {
        context.destroy_images(self.entries.drain(..).map(|entry| entry.image));
    }
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::GarbageQueue;
    use crate::context::GpuContext;

    #[test]
    fn waits_out_frames_in_flight() {
        let (context, device) = GpuContext::new_headless();
        let mut garbage = GarbageQueue::new();
        let image = context.create_image(4, 1).unwrap();
        let id = image.image();
        garbage.push(image, 10);
        // 10 + 2 in flight + 2 margin = 14, must be strictly exceeded.
        for frame in 0..=14 {
            assert_eq!(garbage.collect(&context, frame, 2), 0);
            assert!(device.is_live(id));
        }
        assert_eq!(garbage.collect(&context, 15, 2), 1);
        assert!(!device.is_live(id));
        assert!(garbage.is_empty());
    }
    #[test]
    fn collects_only_expired() {
        let (context, device) = GpuContext::new_headless();
        let mut garbage = GarbageQueue::new();
        let old = context.create_image(4, 1).unwrap();
        let young = context.create_image(4, 1).unwrap();
        let (old_id, young_id) = (old.image(), young.image());
        garbage.push(old, 0);
        garbage.push(young, 5);
        assert_eq!(garbage.collect(&context, 5, 2), 1);
        assert_eq!(device.destroyed_images(), vec![old_id]);
        assert_eq!(garbage.len(), 1);
        garbage.drain(&context);
        assert!(!device.is_live(young_id));
    }
}
