//! # Ping-pong canvas
//!
//! Two working-resolution images. Each stamp samples the *source* image and writes the *active*
//! one, then the two trade roles, so no pass ever reads the image it writes. After every stamp the
//! source holds the latest result; when idle, it is the image to present, save, or snapshot.

use crate::{
    context::GpuContext,
    device::{CommandList, Dab, DeviceError, Filter, GpuImage, ImageId},
};
use celpaint_core::stroke::Stamp;

pub struct PingPongCanvas {
    images: [GpuImage; 2],
    /// Index of the write target. The other is the source.
    active: usize,
}
impl PingPongCanvas {
    /// Allocate both images. On failure, the first is destroyed if the second fails.
    pub fn new(context: &GpuContext, extent: u32) -> Result<Self, DeviceError> {
        let first = context.create_image(extent, 1)?;
        let second = match context.create_image(extent, 1) {
            Ok(image) => image,
            Err(e) => {
                context.destroy_image(first);
                return Err(e);
            }
        };
        Ok(Self {
            images: [first, second],
            active: 0,
        })
    }
    #[must_use]
    pub fn extent(&self) -> u32 {
        self.images[0].extent()
    }
    /// The image the next stamp writes.
    #[must_use]
    pub fn active(&self) -> &GpuImage {
        &self.images[self.active]
    }
    /// The image the next stamp samples, holding the latest result.
    #[must_use]
    pub fn source(&self) -> &GpuImage {
        &self.images[1 - self.active]
    }
    /// The image holding the current canvas content.
    #[must_use]
    pub fn result(&self) -> &GpuImage {
        self.source()
    }
    #[must_use]
    pub fn contains(&self, image: ImageId) -> bool {
        self.images.iter().any(|own| own.image() == image)
    }
    /// Record a stamp into the active image, then swap roles.
    pub fn apply_stamp(&mut self, stamp: &Stamp, softness: f32, commands: &mut CommandList) {
        commands.stamp(
            self.source().image(),
            self.active().image(),
            Dab::from_stamp(stamp, softness),
        );
        self.active = 1 - self.active;
    }
    /// Clear both images to transparent.
    pub fn clear(&self, commands: &mut CommandList) {
        for image in &self.images {
            commands.clear(image.image(), [0.0; 4]);
        }
    }
    /// Copy a canvas-shaped image into both images.
    pub fn seed_from(&self, image: ImageId, commands: &mut CommandList) {
        for own in &self.images {
            commands.copy(image, own.image());
        }
    }
    /// Resample one mip of any image into both images.
    pub fn load_from(&self, image: ImageId, mip: u32, commands: &mut CommandList) {
        for own in &self.images {
            commands.blit(image, mip, own.image(), 0, Filter::Linear);
        }
    }
    pub fn destroy(self, context: &GpuContext) {
        context.destroy_images(self.images);
    }
}

#[cfg(test)]
mod test {
    use super::PingPongCanvas;
    use crate::{context::GpuContext, device::CommandList};
    use celpaint_core::{color::Color, stroke::Stamp};

    fn stamp(x: f32, y: f32) -> Stamp {
        Stamp {
            center: ultraviolet::Vec2::new(x, y),
            radius: 2.0,
            color: Color::WHITE,
        }
    }
    #[test]
    fn never_reads_what_it_writes() {
        let (context, _device) = GpuContext::new_headless();
        let mut canvas = PingPongCanvas::new(&context, 8).unwrap();
        let mut list = CommandList::new();
        canvas.clear(&mut list);
        for i in 0..5 {
            let before = (canvas.source().image(), canvas.active().image());
            canvas.apply_stamp(&stamp(i as f32, 4.0), 1.0, &mut list);
            assert_ne!(before.0, before.1);
            // Roles traded.
            assert_eq!(canvas.source().image(), before.1);
        }
        // The device rejects hazards, so a clean submit proves no pass sampled its target.
        context.submit_and_wait(list).unwrap();
        canvas.destroy(&context);
    }
    #[test]
    fn result_accumulates_all_stamps() {
        let (context, device) = GpuContext::new_headless();
        let mut canvas = PingPongCanvas::new(&context, 8).unwrap();
        let mut list = CommandList::new();
        canvas.clear(&mut list);
        canvas.apply_stamp(&stamp(1.0, 1.0), 0.5, &mut list);
        canvas.apply_stamp(&stamp(7.0, 7.0), 0.5, &mut list);
        context.submit_and_wait(list).unwrap();
        let pixels = device.read_pixels(canvas.result().image(), 0).unwrap();
        // Both corners painted.
        assert_eq!(pixels[0][3], 1.0);
        assert_eq!(pixels[63][3], 1.0);
        canvas.destroy(&context);
        assert_eq!(device.live_images(), 0);
    }
    #[test]
    fn seeding_writes_both() {
        let (context, device) = GpuContext::new_headless();
        let canvas = PingPongCanvas::new(&context, 4).unwrap();
        let proxy = context.create_image(2, 1).unwrap();
        let mut list = CommandList::new();
        list.clear(proxy.image(), [1.0; 4]);
        canvas.load_from(proxy.image(), 0, &mut list);
        context.submit_and_wait(list).unwrap();
        for image in [canvas.active(), canvas.source()] {
            assert!(device
                .read_pixels(image.image(), 0)
                .unwrap()
                .iter()
                .all(|texel| *texel == [1.0; 4]));
        }
        context.destroy_image(proxy);
        canvas.destroy(&context);
    }
}
