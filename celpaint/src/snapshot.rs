//! # Snapshots
//!
//! A fixed ring of canvas-sized images caching the canvas at particular history positions, so
//! replay can start from the nearest one instead of from an empty canvas. Slots are reused
//! round-robin, silently replacing whatever they held: the search tolerates missing snapshots by
//! falling back further, down to a full replay.

use crate::{
    context::GpuContext,
    device::{CommandList, DeviceError, GpuImage, ImageId},
};

struct Slot {
    image: GpuImage,
    frame: u32,
    /// Number of actions applied to the canvas this slot holds.
    action_index: usize,
    valid: bool,
    /// Write order, for breaking ties between snapshots of one position.
    seq: u64,
}

/// A snapshot found by [`SnapshotCache::nearest`].
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct SnapshotRef {
    pub slot: usize,
    pub image: ImageId,
    pub action_index: usize,
}

pub struct SnapshotCache {
    slots: Vec<Slot>,
    next: usize,
    seq: u64,
}
impl SnapshotCache {
    /// Allocate `capacity` images of `extent`. On failure, any already allocated are destroyed.
    pub fn new(context: &GpuContext, capacity: usize, extent: u32) -> Result<Self, DeviceError> {
        let mut slots = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            match context.create_image(extent, 1) {
                Ok(image) => slots.push(Slot {
                    image,
                    frame: 0,
                    action_index: 0,
                    valid: false,
                    seq: 0,
                }),
                Err(e) => {
                    context.destroy_images(slots.into_iter().map(|slot| slot.image));
                    return Err(e);
                }
            }
        }
        Ok(Self {
            slots,
            next: 0,
            seq: 0,
        })
    }
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
    /// The valid snapshot of `frame` with the greatest action index strictly below `target`. Among
    /// equals, the most recently written wins.
    #[must_use]
    pub fn nearest(&self, frame: u32, target: usize) -> Option<SnapshotRef> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.valid && slot.frame == frame && slot.action_index < target)
            .max_by_key(|(_, slot)| (slot.action_index, slot.seq))
            .map(|(index, slot)| SnapshotRef {
                slot: index,
                image: slot.image.image(),
                action_index: slot.action_index,
            })
    }
    #[must_use]
    pub fn contains(&self, frame: u32, action_index: usize) -> bool {
        self.slots
            .iter()
            .any(|slot| slot.valid && slot.frame == frame && slot.action_index == action_index)
    }
    /// Record a copy of `from` into the next ring slot, tagging it as `frame` after `action_index`
    /// actions. Skipped, returning `None`, if an identical valid snapshot exists.
    ///
    /// The tag is live immediately, so the copy must be submitted before the cache is searched again,
    /// or the slot invalidated if submission fails.
    pub fn store(
        &mut self,
        frame: u32,
        action_index: usize,
        from: ImageId,
        commands: &mut CommandList,
    ) -> Option<usize> {
        if self.slots.is_empty() || self.contains(frame, action_index) {
            return None;
        }
        let index = self.next;
        self.next = (self.next + 1) % self.slots.len();
        self.seq += 1;
        let slot = &mut self.slots[index];
        commands.copy(from, slot.image.image());
        slot.frame = frame;
        slot.action_index = action_index;
        slot.valid = true;
        slot.seq = self.seq;
        log::trace!("snapshot slot {index} <- frame {frame} @ {action_index}");
        Some(index)
    }
    pub fn invalidate_slot(&mut self, index: usize) {
        if let Some(slot) = self.slots.get_mut(index) {
            slot.valid = false;
        }
    }
    /// Invalidate snapshots of `frame` past `cursor`, which describe a discarded branch of history.
    pub fn invalidate_after(&mut self, frame: u32, cursor: usize) {
        for slot in &mut self.slots {
            if slot.frame == frame && slot.action_index > cursor {
                slot.valid = false;
            }
        }
    }
    pub fn invalidate_frame(&mut self, frame: u32) {
        for slot in &mut self.slots {
            if slot.frame == frame {
                slot.valid = false;
            }
        }
    }
    #[must_use]
    pub fn valid_count(&self, frame: u32) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.valid && slot.frame == frame)
            .count()
    }
    pub fn destroy(self, context: &GpuContext) {
        context.destroy_images(self.slots.into_iter().map(|slot| slot.image));
    }
}
