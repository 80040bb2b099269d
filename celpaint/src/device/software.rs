//! # Software device
//!
//! A deterministic CPU implementation of [`RenderDevice`], used for headless runs and tests.
//! Texels are straight RGBA `f32`. All work executes during [`RenderDevice::submit`], so fences are
//! signaled as soon as they exist.
//!
//! Beyond the device contract, it carries diagnostics: a memory budget to provoke exhaustion,
//! one-shot fault injection, a log of destroyed images, and detection of concurrent memory
//! operations.

use super::{
    Command, CommandList, Dab, DeviceError, Fence, Filter, ImageId, ImageInfo, MemoryId,
    RenderDevice, ViewId,
};
use celpaint_core::tier::mip_extent;
use rayon::iter::{IndexedParallelIterator, ParallelIterator};
use rayon::slice::ParallelSliceMut;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

type Texel = [f32; 4];

struct Image {
    info: ImageInfo,
    mips: Vec<Vec<Texel>>,
}
impl Image {
    fn new(info: ImageInfo) -> Self {
        let mips = (0..info.mip_levels)
            .map(|mip| {
                let extent = mip_extent(info.extent, mip) as usize;
                vec![[0.0; 4]; extent * extent]
            })
            .collect();
        Self { info, mips }
    }
    fn mip_extent(&self, mip: u32) -> u32 {
        mip_extent(self.info.extent, mip)
    }
}

/// Pixel rectangle, `[min, max)`.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
struct Rect {
    min: [u32; 2],
    max: [u32; 2],
}
impl Rect {
    const EMPTY: Self = Self {
        min: [0; 2],
        max: [0; 2],
    };
    fn rows(&self) -> std::ops::Range<usize> {
        self.min[1] as usize..self.max[1] as usize
    }
    fn columns(&self) -> std::ops::Range<usize> {
        self.min[0] as usize..self.max[0] as usize
    }
}

/// Two images known to hold identical mip 0 content outside of `differ`.
/// Lets consecutive stamps between a ping-pong pair copy only the last dab's area.
#[derive(Copy, Clone, Debug)]
struct StampPair {
    a: ImageId,
    b: ImageId,
    differ: Rect,
}
impl StampPair {
    fn involves(&self, image: ImageId) -> bool {
        self.a == image || self.b == image
    }
    fn is(&self, x: ImageId, y: ImageId) -> bool {
        (self.a == x && self.b == y) || (self.a == y && self.b == x)
    }
}

#[derive(Default)]
struct Resources {
    next_handle: u64,
    memory: hashbrown::HashMap<MemoryId, u64>,
    used_bytes: u64,
    images: hashbrown::HashMap<ImageId, Image>,
    /// Which memory each image is bound to.
    bindings: hashbrown::HashMap<ImageId, MemoryId>,
    views: hashbrown::HashMap<ViewId, ImageId>,
    fences: hashbrown::HashSet<Fence>,
    destroyed: Vec<ImageId>,
    pair: Option<StampPair>,
}
impl Resources {
    fn handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }
    fn image(&self, id: ImageId) -> Result<&Image, DeviceError> {
        self.images
            .get(&id)
            .ok_or(DeviceError::UnknownResource("image"))
    }
    fn check_mip(&self, id: ImageId, mip: u32) -> Result<(), DeviceError> {
        if mip < self.image(id)?.info.mip_levels {
            Ok(())
        } else {
            Err(DeviceError::MipOutOfRange { image: id, mip })
        }
    }
    /// Note that `image` was written by something other than a stamp.
    fn touched(&mut self, image: ImageId) {
        if self.pair.is_some_and(|pair| pair.involves(image)) {
            self.pair = None;
        }
    }
}

pub struct SoftwareDevice {
    resources: parking_lot::Mutex<Resources>,
    /// Maximum bytes of live memory, or unlimited.
    budget: Option<u64>,
    fail_next_view: AtomicBool,
    fail_next_submit: AtomicBool,
    memory_ops: AtomicUsize,
    overlapped: AtomicBool,
    submissions: AtomicUsize,
}
impl Default for SoftwareDevice {
    fn default() -> Self {
        Self::new()
    }
}
impl SoftwareDevice {
    #[must_use]
    pub fn new() -> Self {
        Self {
            resources: parking_lot::Mutex::default(),
            budget: None,
            fail_next_view: AtomicBool::new(false),
            fail_next_submit: AtomicBool::new(false),
            memory_ops: AtomicUsize::new(0),
            overlapped: AtomicBool::new(false),
            submissions: AtomicUsize::new(0),
        }
    }
    /// A device that reports [`DeviceError::OutOfDeviceMemory`] past `bytes` of live memory.
    #[must_use]
    pub fn with_budget(bytes: u64) -> Self {
        Self {
            budget: Some(bytes),
            ..Self::new()
        }
    }
    /// Make the next view creation fail with [`DeviceError::OutOfHostMemory`].
    pub fn fail_next_view(&self) {
        self.fail_next_view.store(true, Ordering::Release);
    }
    /// Make the next submission fail with [`DeviceError::DeviceLost`].
    pub fn fail_next_submit(&self) {
        self.fail_next_submit.store(true, Ordering::Release);
    }
    #[must_use]
    pub fn live_images(&self) -> usize {
        self.resources.lock().images.len()
    }
    #[must_use]
    pub fn live_memory(&self) -> usize {
        self.resources.lock().memory.len()
    }
    #[must_use]
    pub fn live_fences(&self) -> usize {
        self.resources.lock().fences.len()
    }
    /// Every image destroyed so far, in order of destruction.
    #[must_use]
    pub fn destroyed_images(&self) -> Vec<ImageId> {
        self.resources.lock().destroyed.clone()
    }
    #[must_use]
    pub fn is_live(&self, image: ImageId) -> bool {
        self.resources.lock().images.contains_key(&image)
    }
    /// Whether two memory operations were ever observed in progress at once.
    #[must_use]
    pub fn saw_overlapping_memory_ops(&self) -> bool {
        self.overlapped.load(Ordering::Acquire)
    }
    #[must_use]
    pub fn submissions(&self) -> usize {
        self.submissions.load(Ordering::Relaxed)
    }
    /// Copy out the texels of one mip level, row-major.
    pub fn read_pixels(&self, image: ImageId, mip: u32) -> Result<Vec<[f32; 4]>, DeviceError> {
        let resources = self.resources.lock();
        resources.check_mip(image, mip)?;
        Ok(resources.image(image)?.mips[mip as usize].clone())
    }
    /// Paired with [`Self::end_memory_op`]. The span covers the wait for the resource lock, so
    /// concurrent callers are caught.
    fn begin_memory_op(&self) {
        if self.memory_ops.fetch_add(1, Ordering::AcqRel) != 0 {
            log::error!("concurrent device memory operations");
            self.overlapped.store(true, Ordering::Release);
        }
    }
    fn end_memory_op(&self) {
        self.memory_ops.fetch_sub(1, Ordering::AcqRel);
    }
}

impl RenderDevice for SoftwareDevice {
    fn allocate_memory(&self, info: ImageInfo) -> Result<MemoryId, DeviceError> {
        self.begin_memory_op();
        defer::defer!(self.end_memory_op());
        let mut resources = self.resources.lock();
        let size = info.byte_size();
        if self
            .budget
            .is_some_and(|budget| resources.used_bytes + size > budget)
        {
            return Err(DeviceError::OutOfDeviceMemory);
        }
        let id = MemoryId(resources.handle());
        resources.memory.insert(id, size);
        resources.used_bytes += size;
        Ok(id)
    }
    fn free_memory(&self, memory: MemoryId) {
        self.begin_memory_op();
        defer::defer!(self.end_memory_op());
        let mut resources = self.resources.lock();
        match resources.memory.remove(&memory) {
            Some(size) => resources.used_bytes -= size,
            None => log::error!("freeing unknown memory {memory:?}"),
        }
    }
    fn create_image(&self, info: ImageInfo, memory: MemoryId) -> Result<ImageId, DeviceError> {
        self.begin_memory_op();
        defer::defer!(self.end_memory_op());
        let mut resources = self.resources.lock();
        let Some(&size) = resources.memory.get(&memory) else {
            return Err(DeviceError::UnknownResource("memory"));
        };
        if info.extent == 0 || info.mip_levels == 0 || size < info.byte_size() {
            return Err(DeviceError::ShapeMismatch);
        }
        let id = ImageId(resources.handle());
        resources.images.insert(id, Image::new(info));
        resources.bindings.insert(id, memory);
        Ok(id)
    }
    fn destroy_image(&self, image: ImageId) {
        self.begin_memory_op();
        defer::defer!(self.end_memory_op());
        let mut resources = self.resources.lock();
        if resources.images.remove(&image).is_some() {
            resources.bindings.remove(&image);
            resources.touched(image);
            resources.destroyed.push(image);
        } else {
            log::error!("destroying unknown image {image:?}");
        }
    }
    fn create_view(&self, image: ImageId) -> Result<ViewId, DeviceError> {
        self.begin_memory_op();
        defer::defer!(self.end_memory_op());
        if self.fail_next_view.swap(false, Ordering::AcqRel) {
            return Err(DeviceError::OutOfHostMemory);
        }
        let mut resources = self.resources.lock();
        resources.image(image)?;
        let id = ViewId(resources.handle());
        resources.views.insert(id, image);
        Ok(id)
    }
    fn destroy_view(&self, view: ViewId) {
        self.begin_memory_op();
        defer::defer!(self.end_memory_op());
        if self.resources.lock().views.remove(&view).is_none() {
            log::error!("destroying unknown view {view:?}");
        }
    }
    fn submit(&self, commands: CommandList) -> Result<Fence, DeviceError> {
        if self.fail_next_submit.swap(false, Ordering::AcqRel) {
            return Err(DeviceError::DeviceLost);
        }
        let mut resources = self.resources.lock();
        // Validate everything up front, so a failed submission has no effect.
        for command in commands.commands() {
            validate(&resources, command)?;
        }
        for command in commands.commands() {
            execute(&mut resources, command);
        }
        let fence = Fence(resources.handle());
        resources.fences.insert(fence);
        self.submissions.fetch_add(1, Ordering::Relaxed);
        log::trace!("submitted {} commands, {fence:?}", commands.len());
        Ok(fence)
    }
    fn wait(&self, fence: Fence, _timeout: Option<std::time::Duration>) -> Result<(), DeviceError> {
        // Work completes within `submit`, so a live fence is always signaled.
        self.is_signaled(fence).map(|_| ())
    }
    fn is_signaled(&self, fence: Fence) -> Result<bool, DeviceError> {
        if self.resources.lock().fences.contains(&fence) {
            Ok(true)
        } else {
            log::error!("using unknown fence {fence:?}");
            Err(DeviceError::UnknownResource("fence"))
        }
    }
    fn destroy_fence(&self, fence: Fence) {
        if !self.resources.lock().fences.remove(&fence) {
            log::error!("destroying unknown fence {fence:?}");
        }
    }
}

fn validate(resources: &Resources, command: &Command) -> Result<(), DeviceError> {
    match command {
        Command::Clear { image, .. } => resources.image(*image).map(|_| ()),
        Command::Blit {
            src,
            src_mip,
            dst,
            dst_mip,
            ..
        } => {
            resources.check_mip(*src, *src_mip)?;
            resources.check_mip(*dst, *dst_mip)?;
            if src == dst && src_mip == dst_mip {
                return Err(DeviceError::ReadWriteHazard(*src));
            }
            Ok(())
        }
        Command::Copy { src, dst } => {
            if src == dst {
                return Err(DeviceError::ReadWriteHazard(*src));
            }
            if resources.image(*src)?.info != resources.image(*dst)?.info {
                return Err(DeviceError::ShapeMismatch);
            }
            Ok(())
        }
        Command::Stamp { source, target, .. } => {
            if source == target {
                return Err(DeviceError::ReadWriteHazard(*source));
            }
            if resources.image(*source)?.info.extent != resources.image(*target)?.info.extent {
                return Err(DeviceError::ShapeMismatch);
            }
            Ok(())
        }
    }
}

/// Run one validated command.
fn execute(resources: &mut Resources, command: &Command) {
    match command {
        Command::Clear { image, color } => {
            resources.touched(*image);
            if let Some(image) = resources.images.get_mut(image) {
                for mip in &mut image.mips {
                    mip.fill(*color);
                }
            }
        }
        Command::Blit {
            src,
            src_mip,
            dst,
            dst_mip,
            filter,
        } => {
            resources.touched(*dst);
            let Some(source) = resources.images.get(src) else {
                return;
            };
            let src_extent = source.mip_extent(*src_mip);
            // Source and destination may be mips of the same image.
            let texels = source.mips[*src_mip as usize].clone();
            let Some(dest) = resources.images.get_mut(dst) else {
                return;
            };
            let dst_extent = dest.mip_extent(*dst_mip);
            blit(
                &texels,
                src_extent,
                &mut dest.mips[*dst_mip as usize],
                dst_extent,
                *filter,
            );
        }
        Command::Copy { src, dst } => {
            resources.touched(*dst);
            let Some(mips) = resources.images.get(src).map(|image| image.mips.clone()) else {
                return;
            };
            if let Some(dest) = resources.images.get_mut(dst) {
                dest.mips = mips;
            }
        }
        Command::Stamp {
            source,
            target,
            dab,
        } => stamp(resources, *source, *target, dab),
    }
}

fn stamp(resources: &mut Resources, source: ImageId, target: ImageId, dab: &Dab) {
    let Some(mut dest) = resources.images.remove(&target) else {
        return;
    };
    let extent = dest.info.extent;
    let bounds = dab_bounds(dab, extent);
    if let Some(src) = resources.images.get(&source) {
        // Bring target up to date with source. Only the last dab's area differs for a known pair.
        let stale = match resources.pair {
            Some(pair) if pair.is(source, target) => pair.differ,
            _ => Rect {
                min: [0; 2],
                max: [extent; 2],
            },
        };
        let width = extent as usize;
        let columns = stale.columns();
        for row in stale.rows() {
            let span = row * width + columns.start..row * width + columns.end;
            dest.mips[0][span.clone()].copy_from_slice(&src.mips[0][span]);
        }
        blend_dab(&mut dest.mips[0], extent, bounds, dab);
        resources.pair = Some(StampPair {
            a: source,
            b: target,
            differ: bounds,
        });
    }
    resources.images.insert(target, dest);
}

/// Pixels a dab may touch.
fn dab_bounds(dab: &Dab, extent: u32) -> Rect {
    let stamp = celpaint_core::stroke::Stamp {
        center: ultraviolet::Vec2::new(dab.center[0], dab.center[1]),
        radius: dab.radius,
        color: celpaint_core::color::Color::TRANSPARENT,
    };
    stamp
        .pixel_bounds(dab.softness, extent)
        .map_or(Rect::EMPTY, |(min, max)| Rect { min, max })
}

fn blend_dab(texels: &mut [Texel], extent: u32, bounds: Rect, dab: &Dab) {
    let columns = bounds.columns();
    let rows = bounds.rows();
    texels
        .par_chunks_mut(extent as usize)
        .enumerate()
        .skip(rows.start)
        .take(rows.len())
        .for_each(|(y, row)| {
            #[allow(clippy::cast_precision_loss)]
            let py = y as f32 + 0.5;
            for x in columns.clone() {
                #[allow(clippy::cast_precision_loss)]
                let px = x as f32 + 0.5;
                let distance = ((px - dab.center[0]).powi(2) + (py - dab.center[1]).powi(2)).sqrt();
                let alpha = celpaint_core::stroke::footprint_alpha(
                    distance,
                    dab.radius,
                    dab.softness,
                    dab.opacity,
                ) * dab.color[3];
                if alpha <= 0.0 {
                    continue;
                }
                let dst = &mut row[x];
                for c in 0..3 {
                    dst[c] = dab.color[c] * alpha + dst[c] * (1.0 - alpha);
                }
                dst[3] = alpha + dst[3] * (1.0 - alpha);
            }
        });
}

fn blit(src: &[Texel], src_extent: u32, dst: &mut [Texel], dst_extent: u32, filter: Filter) {
    #[allow(clippy::cast_precision_loss)]
    let scale = src_extent as f32 / dst_extent as f32;
    dst.par_chunks_mut(dst_extent as usize)
        .enumerate()
        .for_each(|(y, row)| {
            for (x, texel) in row.iter_mut().enumerate() {
                #[allow(clippy::cast_precision_loss)]
                let u = (x as f32 + 0.5) * scale;
                #[allow(clippy::cast_precision_loss)]
                let v = (y as f32 + 0.5) * scale;
                *texel = match filter {
                    Filter::Nearest => sample_nearest(src, src_extent, u, v),
                    Filter::Linear => sample_linear(src, src_extent, u, v),
                };
            }
        });
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn texel_index(extent: u32, x: f32, y: f32) -> usize {
    let max = extent.saturating_sub(1) as usize;
    let x = (x.max(0.0) as usize).min(max);
    let y = (y.max(0.0) as usize).min(max);
    y * extent as usize + x
}

fn sample_nearest(src: &[Texel], extent: u32, u: f32, v: f32) -> Texel {
    src[texel_index(extent, u.floor(), v.floor())]
}

fn sample_linear(src: &[Texel], extent: u32, u: f32, v: f32) -> Texel {
    let (x, y) = (u - 0.5, v - 0.5);
    let (x0, y0) = (x.floor(), y.floor());
    let (fx, fy) = (x - x0, y - y0);
    let fetch = |dx: f32, dy: f32| src[texel_index(extent, x0 + dx, y0 + dy)];
    let (a, b, c, d) = (fetch(0.0, 0.0), fetch(1.0, 0.0), fetch(0.0, 1.0), fetch(1.0, 1.0));
    let mut out = [0.0; 4];
    for i in 0..4 {
        let top = a[i] + (b[i] - a[i]) * fx;
        let bottom = c[i] + (d[i] - c[i]) * fx;
        out[i] = top + (bottom - top) * fy;
    }
    out
}

#[cfg(test)]
mod test {
    use super::SoftwareDevice;
    use crate::device::{CommandList, Dab, DeviceError, Filter, ImageInfo, RenderDevice};

    fn image(device: &SoftwareDevice, extent: u32, mip_levels: u32) -> crate::device::ImageId {
        let info = ImageInfo { extent, mip_levels };
        let memory = device.allocate_memory(info).unwrap();
        device.create_image(info, memory).unwrap()
    }
    fn dab(x: f32, y: f32, radius: f32) -> Dab {
        Dab {
            center: [x, y],
            radius,
            softness: 1.0,
            color: [1.0, 0.0, 0.0, 1.0],
            opacity: 1.0,
        }
    }
    #[test]
    fn stamp_hazard() {
        let device = SoftwareDevice::new();
        let a = image(&device, 8, 1);
        let mut list = CommandList::new();
        list.clear(a, [0.0; 4]).stamp(a, a, dab(4.0, 4.0, 2.0));
        assert_eq!(device.submit(list), Err(DeviceError::ReadWriteHazard(a)));
        // Nothing executed.
        assert_eq!(device.submissions(), 0);
    }
    #[test]
    fn stamp_copies_and_blends() {
        let device = SoftwareDevice::new();
        let a = image(&device, 8, 1);
        let b = image(&device, 8, 1);
        let mut list = CommandList::new();
        list.clear(a, [0.0, 0.0, 1.0, 1.0])
            .clear(b, [0.0; 4])
            .stamp(a, b, dab(1.0, 1.0, 3.0));
        device.submit(list).unwrap();
        let pixels = device.read_pixels(b, 0).unwrap();
        // Center is painted red, far corner keeps the source's blue.
        assert_eq!(pixels[0], [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(pixels[63], [0.0, 0.0, 1.0, 1.0]);
    }
    #[test]
    fn pair_shortcut_matches_full_copy() {
        // Ping-pong stamping through the shortcut must equal stamping onto fresh copies.
        let dabs = [dab(2.0, 2.0, 1.5), dab(5.0, 5.0, 2.0), dab(2.5, 6.0, 1.0)];
        let device = SoftwareDevice::new();
        let (a, b) = (image(&device, 8, 1), image(&device, 8, 1));
        let mut list = CommandList::new();
        list.clear(a, [0.0; 4]).clear(b, [0.0; 4]);
        let (mut source, mut target) = (a, b);
        for d in dabs {
            list.stamp(source, target, d);
            std::mem::swap(&mut source, &mut target);
        }
        device.submit(list).unwrap();
        let fast = device.read_pixels(source, 0).unwrap();

        let reference = SoftwareDevice::new();
        let mut prev = image(&reference, 8, 1);
        let mut list = CommandList::new();
        list.clear(prev, [0.0; 4]);
        reference.submit(list).unwrap();
        for d in dabs {
            let next = image(&reference, 8, 1);
            let mut list = CommandList::new();
            list.stamp(prev, next, d);
            reference.submit(list).unwrap();
            prev = next;
        }
        assert_eq!(fast, reference.read_pixels(prev, 0).unwrap());
    }
    #[test]
    fn blit_mips() {
        let device = SoftwareDevice::new();
        let a = image(&device, 4, 3);
        let mut list = CommandList::new();
        list.clear(a, [1.0; 4]).generate_mips(a, 3);
        device.submit(list).unwrap();
        assert_eq!(device.read_pixels(a, 2).unwrap(), vec![[1.0; 4]]);
        assert!(matches!(
            device.read_pixels(a, 3),
            Err(DeviceError::MipOutOfRange { mip: 3, .. })
        ));
        let mut list = CommandList::new();
        list.blit(a, 0, a, 0, Filter::Linear);
        assert!(device.submit(list).is_err());
    }
    #[test]
    fn linear_downsample_averages() {
        let device = SoftwareDevice::new();
        let a = image(&device, 2, 2);
        {
            let mut resources = device.resources.lock();
            let texels = &mut resources.images.get_mut(&a).unwrap().mips[0];
            for (i, texel) in texels.iter_mut().enumerate() {
                *texel = if i % 2 == 0 { [1.0; 4] } else { [0.0; 4] };
            }
        }
        let mut list = CommandList::new();
        list.generate_mips(a, 2);
        device.submit(list).unwrap();
        assert_eq!(device.read_pixels(a, 1).unwrap(), vec![[0.5; 4]]);
    }
    #[test]
    fn budget_and_faults() {
        let info = ImageInfo {
            extent: 4,
            mip_levels: 1,
        };
        let device = SoftwareDevice::with_budget(info.byte_size());
        let memory = device.allocate_memory(info).unwrap();
        assert_eq!(
            device.allocate_memory(info),
            Err(DeviceError::OutOfDeviceMemory)
        );
        let image = device.create_image(info, memory).unwrap();
        device.fail_next_view();
        assert_eq!(device.create_view(image), Err(DeviceError::OutOfHostMemory));
        assert!(device.create_view(image).is_ok());
        device.destroy_image(image);
        device.free_memory(memory);
        assert!(device.allocate_memory(info).is_ok());
        assert_eq!(device.destroyed_images(), vec![image]);
        assert!(!device.saw_overlapping_memory_ops());
    }
    #[test]
    fn destroyed_fences_are_unknown() {
        let device = SoftwareDevice::new();
        let fence = device.submit(CommandList::new()).unwrap();
        assert_eq!(device.is_signaled(fence), Ok(true));
        assert_eq!(device.wait(fence, None), Ok(()));
        device.destroy_fence(fence);
        assert_eq!(
            device.wait(fence, None),
            Err(DeviceError::UnknownResource("fence"))
        );
        assert_eq!(
            device.is_signaled(fence),
            Err(DeviceError::UnknownResource("fence"))
        );
        assert_eq!(device.live_fences(), 0);
    }
}
