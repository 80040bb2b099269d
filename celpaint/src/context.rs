use crate::device::{CommandList, DeviceError, Fence, GpuImage, ImageInfo, RenderDevice};
use std::sync::Arc;

/// A render device, plus the coarse lock serializing every memory operation made through it.
///
/// Some drivers do not tolerate allocating on one thread while freeing on another, so every
/// allocate, create, and destroy goes through here.
pub struct GpuContext {
    device: Arc<dyn RenderDevice>,
    memory_lock: parking_lot::Mutex<()>,
}
impl GpuContext {
    #[must_use]
    pub fn new(device: Arc<dyn RenderDevice>) -> Self {
        Self {
            device,
            memory_lock: parking_lot::Mutex::new(()),
        }
    }
    /// Create a context around a fresh [`crate::device::software::SoftwareDevice`].
    #[must_use]
    pub fn new_headless() -> (Arc<Self>, Arc<crate::device::software::SoftwareDevice>) {
        let device = Arc::new(crate::device::software::SoftwareDevice::new());
        (Arc::new(Self::new(device.clone())), device)
    }
    #[must_use]
    pub fn device(&self) -> &dyn RenderDevice {
        &*self.device
    }
    /// Allocate memory, an image, and a view. On failure, whatever was already created is
    /// destroyed before returning.
    pub fn create_image(&self, extent: u32, mip_levels: u32) -> Result<GpuImage, DeviceError> {
        let info = ImageInfo { extent, mip_levels };
        let _lock = self.memory_lock.lock();
        let memory = self.device.allocate_memory(info)?;
        let image = match self.device.create_image(info, memory) {
            Ok(image) => image,
            Err(e) => {
                self.device.free_memory(memory);
                return Err(e);
            }
        };
        let view = match self.device.create_view(image) {
            Ok(view) => view,
            Err(e) => {
                self.device.destroy_image(image);
                self.device.free_memory(memory);
                return Err(e);
            }
        };
        log::trace!("created {image:?} at {extent}px, {mip_levels} mips");
        Ok(GpuImage::from_parts(image, view, memory, info))
    }
    pub fn destroy_image(&self, image: GpuImage) {
        let _lock = self.memory_lock.lock();
        self.destroy_locked(image);
    }
    /// Destroy many images under a single acquisition of the memory lock.
    pub fn destroy_images(&self, images: impl IntoIterator<Item = GpuImage>) {
        let _lock = self.memory_lock.lock();
        for image in images {
            self.destroy_locked(image);
        }
    }
    fn destroy_locked(&self, image: GpuImage) {
        log::trace!("destroying {:?}", image.image());
        self.device.destroy_view(image.view());
        self.device.destroy_image(image.image());
        self.device.free_memory(image.memory());
    }
    pub fn submit(&self, commands: CommandList) -> Result<Fence, DeviceError> {
        self.device.submit(commands)
    }
    /// Submit and block until complete, destroying the fence afterwards.
    pub fn submit_and_wait(&self, commands: CommandList) -> Result<(), DeviceError> {
        let fence = self.device.submit(commands)?;
        let result = self.device.wait(fence, None);
        self.device.destroy_fence(fence);
        result
    }
    pub fn wait(&self, fence: Fence) -> Result<(), DeviceError> {
        self.device.wait(fence, None)
    }
    pub fn is_signaled(&self, fence: Fence) -> Result<bool, DeviceError> {
        self.device.is_signaled(fence)
    }
    pub fn destroy_fence(&self, fence: Fence) {
        self.device.destroy_fence(fence);
    }
}

#[cfg(test)]
mod test {
    use super::GpuContext;
    use crate::device::{software::SoftwareDevice, DeviceError, ImageInfo};
    use std::sync::Arc;

    #[test]
    fn view_failure_rolls_back() {
        let (context, device) = GpuContext::new_headless();
        device.fail_next_view();
        assert_eq!(
            context.create_image(8, 1).err(),
            Some(DeviceError::OutOfHostMemory)
        );
        assert_eq!(device.live_images(), 0);
        assert_eq!(device.live_memory(), 0);
        let image = context.create_image(8, 1).unwrap();
        assert_eq!(device.live_images(), 1);
        context.destroy_image(image);
        assert_eq!(device.live_images(), 0);
        assert_eq!(device.live_memory(), 0);
    }
    #[test]
    fn exhaustion_is_distinguishable() {
        let info = ImageInfo {
            extent: 8,
            mip_levels: 1,
        };
        let device = Arc::new(SoftwareDevice::with_budget(info.byte_size()));
        let context = GpuContext::new(device.clone());
        let first = context.create_image(8, 1).unwrap();
        let err = context.create_image(8, 1).unwrap_err();
        assert!(err.is_exhaustion());
        context.destroy_image(first);
        assert_eq!(device.live_memory(), 0);
    }
    #[test]
    fn concurrent_memory_ops_are_serialized() {
        let (context, device) = GpuContext::new_headless();
        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..50 {
                        let image = context.create_image(4, 1).unwrap();
                        context.destroy_image(image);
                    }
                });
            }
        });
        assert!(!device.saw_overlapping_memory_ops());
        assert_eq!(device.live_images(), 0);
    }
}
