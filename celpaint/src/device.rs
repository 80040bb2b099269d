//! # Device
//!
//! The slice of a GPU command/queue API the canvas engine needs: image, view, and memory lifetimes,
//! command submission, and fences. Pipeline and shader construction live behind this interface
//! and are not visible here; stamping is a single opaque [`Command::Stamp`] pass.

pub mod software;

/// Handle to a device image. Plain handles are `Copy`, ownership lives in [`GpuImage`].
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct ImageId(pub(crate) u64);
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct ViewId(pub(crate) u64);
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct MemoryId(pub(crate) u64);
/// Signaled once all the work of a submission has completed.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct Fence(pub(crate) u64);

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceError {
    #[error("out of device memory")]
    OutOfDeviceMemory,
    #[error("out of host memory")]
    OutOfHostMemory,
    #[error("device lost")]
    DeviceLost,
    #[error("unknown {0} handle")]
    UnknownResource(&'static str),
    #[error("image {0:?} is both sampled and written in the same pass")]
    ReadWriteHazard(ImageId),
    #[error("mip {mip} out of range for image {image:?}")]
    MipOutOfRange { image: ImageId, mip: u32 },
    #[error("copy between images of differing shape")]
    ShapeMismatch,
    #[error("timed out waiting on fence")]
    Timeout,
}
impl DeviceError {
    /// Whether this is a resource-exhaustion failure, as opposed to misuse or device loss.
    #[must_use]
    pub fn is_exhaustion(&self) -> bool {
        matches!(self, Self::OutOfDeviceMemory | Self::OutOfHostMemory)
    }
}

/// Shape of a square RGBA image.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct ImageInfo {
    pub extent: u32,
    pub mip_levels: u32,
}
impl ImageInfo {
    /// Bytes taken by the full mip chain, at 4x16 bit per texel.
    #[must_use]
    pub fn byte_size(&self) -> u64 {
        (0..self.mip_levels)
            .map(|mip| {
                let extent = u64::from(celpaint_core::tier::mip_extent(self.extent, mip));
                extent * extent * 8
            })
            .sum()
    }
}

/// An owned image, view, and memory triple.
///
/// There is no `Drop`: it must be handed back to [`crate::context::GpuContext::destroy_image`] or
/// to the garbage queue. Moving this value is moving ownership of the device resources.
#[derive(Debug, PartialEq, Eq)]
pub struct GpuImage {
    image: ImageId,
    view: ViewId,
    memory: MemoryId,
    info: ImageInfo,
}
impl GpuImage {
    pub(crate) fn from_parts(image: ImageId, view: ViewId, memory: MemoryId, info: ImageInfo) -> Self {
        Self {
            image,
            view,
            memory,
            info,
        }
    }
    #[must_use]
    pub fn image(&self) -> ImageId {
        self.image
    }
    #[must_use]
    pub fn view(&self) -> ViewId {
        self.view
    }
    #[must_use]
    pub fn memory(&self) -> MemoryId {
        self.memory
    }
    #[must_use]
    pub fn extent(&self) -> u32 {
        self.info.extent
    }
    #[must_use]
    pub fn mip_levels(&self) -> u32 {
        self.info.mip_levels
    }
    #[must_use]
    pub fn info(&self) -> ImageInfo {
        self.info
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub enum Filter {
    Nearest,
    #[default]
    Linear,
}

/// A single brush dab, in pixels of the target image.
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct Dab {
    pub center: [f32; 2],
    pub radius: f32,
    pub softness: f32,
    /// Straight RGBA.
    pub color: [f32; 4],
    pub opacity: f32,
}
impl Dab {
    #[must_use]
    pub fn from_stamp(stamp: &celpaint_core::stroke::Stamp, softness: f32) -> Self {
        Self {
            center: [stamp.center.x, stamp.center.y],
            radius: stamp.radius,
            softness,
            color: stamp.color.as_array(),
            opacity: 1.0,
        }
    }
}

#[derive(Clone, PartialEq, Debug)]
pub enum Command {
    /// Clear every mip of the image.
    Clear { image: ImageId, color: [f32; 4] },
    /// Resample one mip of `src` into one mip of `dst`, whatever their sizes.
    Blit {
        src: ImageId,
        src_mip: u32,
        dst: ImageId,
        dst_mip: u32,
        filter: Filter,
    },
    /// Copy every mip between two images of identical shape.
    Copy { src: ImageId, dst: ImageId },
    /// Render `target` as `source` with the dab blended over it. `source` is only sampled,
    /// `target` only written, and they must differ.
    Stamp {
        source: ImageId,
        target: ImageId,
        dab: Dab,
    },
}

/// Commands recorded for a single submission, executed in order.
#[derive(Clone, Default, Debug)]
pub struct CommandList {
    commands: Vec<Command>,
}
impl CommandList {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
    pub fn clear(&mut self, image: ImageId, color: [f32; 4]) -> &mut Self {
        self.commands.push(Command::Clear { image, color });
        self
    }
    pub fn blit(
        &mut self,
        src: ImageId,
        src_mip: u32,
        dst: ImageId,
        dst_mip: u32,
        filter: Filter,
    ) -> &mut Self {
        self.commands.push(Command::Blit {
            src,
            src_mip,
            dst,
            dst_mip,
            filter,
        });
        self
    }
    pub fn copy(&mut self, src: ImageId, dst: ImageId) -> &mut Self {
        self.commands.push(Command::Copy { src, dst });
        self
    }
    pub fn stamp(&mut self, source: ImageId, target: ImageId, dab: Dab) -> &mut Self {
        self.commands.push(Command::Stamp {
            source,
            target,
            dab,
        });
        self
    }
    /// Regenerate mips `1..mip_levels` of `image`, each a linear downsample of the one above.
    pub fn generate_mips(&mut self, image: ImageId, mip_levels: u32) -> &mut Self {
        for mip in 1..mip_levels {
            self.blit(image, mip - 1, image, mip, Filter::Linear);
        }
        self
    }
    #[must_use]
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }
    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// A GPU command and queue API.
///
/// Destruction functions never fail: an unknown handle is a programming error, reported but
/// otherwise ignored. All functions may be called from any thread, but implementations may
/// require memory operations (allocation, image and view creation and destruction) to be
/// externally serialized. See [`crate::context::GpuContext`].
pub trait RenderDevice: Send + Sync {
    fn allocate_memory(&self, info: ImageInfo) -> Result<MemoryId, DeviceError>;
    fn free_memory(&self, memory: MemoryId);
    fn create_image(&self, info: ImageInfo, memory: MemoryId) -> Result<ImageId, DeviceError>;
    fn destroy_image(&self, image: ImageId);
    fn create_view(&self, image: ImageId) -> Result<ViewId, DeviceError>;
    fn destroy_view(&self, view: ViewId);

    /// Submit a list of commands, returning a fence signaled on completion.
    /// On error, no command of the list has executed.
    fn submit(&self, commands: CommandList) -> Result<Fence, DeviceError>;
    /// Block until the fence signals, or `timeout` passes.
    fn wait(&self, fence: Fence, timeout: Option<std::time::Duration>) -> Result<(), DeviceError>;
    fn is_signaled(&self, fence: Fence) -> Result<bool, DeviceError>;
    fn destroy_fence(&self, fence: Fence);
}

#[cfg(test)]
mod test {
    use super::{CommandList, DeviceError, ImageId, ImageInfo};
    #[test]
    fn mip_generation_commands() {
        let mut list = CommandList::new();
        list.generate_mips(ImageId(1), 4);
        assert_eq!(list.len(), 3);
        assert!(CommandList::new().generate_mips(ImageId(1), 1).is_empty());
    }
    #[test]
    fn byte_size() {
        let info = ImageInfo {
            extent: 4,
            mip_levels: 3,
        };
        assert_eq!(info.byte_size(), (16 + 4 + 1) * 8);
    }
    #[test]
    fn exhaustion() {
        assert!(DeviceError::OutOfDeviceMemory.is_exhaustion());
        assert!(!DeviceError::Timeout.is_exhaustion());
    }
}
