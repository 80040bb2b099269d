//! # Resolution upgrades
//!
//! Raising a frame texture one tier happens in the background: allocate the larger image, upscale
//! into it, and hand it back to the main thread as a [`PendingUpgrade`]. The background side never
//! touches a texture's fields or the texture table. The main thread performs the swap when it
//! polls the handoff channel.
//!
//! Only one upgrade runs at a time, system wide, as the transfer path is not safe for concurrent
//! use.

use crate::{
    context::GpuContext,
    device::{CommandList, DeviceError, Filter, GpuImage},
    frames::FrameStore,
};
use celpaint_core::tier::{Ladder, ResolutionTier};
use std::sync::Arc;

#[derive(thiserror::Error, Debug)]
pub enum UpgradeError {
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error("frame {0} was deleted")]
    FrameDeleted(u32),
    #[error("frame {0} is already at full resolution")]
    AlreadyFull(u32),
    #[error("frame {0} changed while upgrading")]
    Superseded(u32),
}

/// A finished upgrade, owning its new image until the main thread installs it.
#[derive(Debug)]
pub struct PendingUpgrade {
    pub frame: u32,
    /// The tier the upgrade started from. Installing is only valid if the texture is still there.
    pub from_tier: ResolutionTier,
    pub tier: ResolutionTier,
    pub image: GpuImage,
}
impl PendingUpgrade {
    #[must_use]
    pub fn mip_levels(&self) -> u32 {
        self.image.mip_levels()
    }
}

/// Messages from background tasks to the main thread.
#[derive(Debug)]
pub enum Handoff {
    Upgrade(PendingUpgrade),
    /// Mip streaming revealed `mip` of `frame`.
    MipStreamed { frame: u32, mip: u32 },
}

#[derive(Clone)]
pub struct Upgrader {
    context: Arc<GpuContext>,
    frames: Arc<FrameStore>,
    ladder: Ladder,
    single_flight: Arc<tokio::sync::Semaphore>,
    /// Frames with an upgrade requested but not yet installed.
    in_flight: Arc<parking_lot::Mutex<hashbrown::HashSet<u32>>>,
    handoff: crossbeam::channel::Sender<Handoff>,
    runtime: tokio::runtime::Handle,
}
impl Upgrader {
    pub fn new(
        context: Arc<GpuContext>,
        frames: Arc<FrameStore>,
        ladder: Ladder,
        handoff: crossbeam::channel::Sender<Handoff>,
        runtime: tokio::runtime::Handle,
    ) -> Self {
        Self {
            context,
            frames,
            ladder,
            single_flight: Arc::new(tokio::sync::Semaphore::new(1)),
            in_flight: Arc::default(),
            handoff,
            runtime,
        }
    }
    /// Start upgrading `frame` by one tier. Returns false without doing anything if an upgrade of
    /// it is already requested and not yet installed.
    pub fn request(&self, frame: u32) -> bool {
        if !self.in_flight.lock().insert(frame) {
            log::trace!("upgrade of frame {frame} already in flight");
            return false;
        }
        let this = self.clone();
        self.runtime.spawn(async move {
            this.run(frame).await;
        });
        true
    }
    /// Whether an upgrade of the frame is requested and not yet installed.
    #[must_use]
    pub fn is_in_flight(&self, frame: u32) -> bool {
        self.in_flight.lock().contains(&frame)
    }
    /// Whether any upgrade is requested and not yet installed.
    #[must_use]
    pub fn has_in_flight(&self) -> bool {
        !self.in_flight.lock().is_empty()
    }
    /// Called by the main thread once a handoff for `frame` has been consumed.
    pub fn finish(&self, frame: u32) {
        self.in_flight.lock().remove(&frame);
    }
    /// Refuse further upgrades. Queued requests give up, the one running completes.
    pub fn close(&self) {
        self.single_flight.close();
    }
    async fn run(self, frame: u32) {
        let Ok(permit) = self.single_flight.clone().acquire_owned().await else {
            // Closed, shutting down.
            self.finish(frame);
            return;
        };
        let worker = self.clone();
        let result =
            tokio::task::spawn_blocking(move || worker.upgrade_blocking(frame)).await;
        drop(permit);
        match result {
            Ok(Ok(pending)) => {
                log::debug!("frame {frame} upgraded to {}", pending.tier.as_ref());
                if let Err(crossbeam::channel::SendError(Handoff::Upgrade(pending))) =
                    self.handoff.send(Handoff::Upgrade(pending))
                {
                    // Nobody left to install it.
                    self.context.destroy_image(pending.image);
                    self.finish(frame);
                }
            }
            Ok(Err(UpgradeError::AlreadyFull(_))) => self.finish(frame),
            Ok(Err(e)) => {
                log::warn!("upgrade of frame {frame} abandoned: {e}");
                self.finish(frame);
            }
            Err(e) => {
                log::error!("upgrade task of frame {frame} failed: {e}");
                self.finish(frame);
            }
        }
    }
    /// Build the next tier's image for `frame`. Never modifies the frame's texture.
    ///
    /// # Errors
    /// The frame's texture is left untouched and any new image destroyed.
    pub fn upgrade_blocking(&self, frame: u32) -> Result<PendingUpgrade, UpgradeError> {
        // Any pending save or load must land first, or the upscale reads stale content. The wait
        // happens under the texture's lock, as the main thread may otherwise reap the fence.
        let (old_image, from_tier) = self
            .frames
            .with(frame, |texture| {
                texture
                    .wait(&self.context)
                    .map(|()| (texture.image().image(), texture.tier()))
            })
            .ok_or(UpgradeError::FrameDeleted(frame))??;
        let tier = from_tier.next().ok_or(UpgradeError::AlreadyFull(frame))?;
        let image = self
            .context
            .create_image(self.ladder.extent(tier), self.ladder.mip_levels(tier))?;
        let built: Result<(), DeviceError> = try_block::try_block! {
            let mut commands = CommandList::new();
            commands.blit(old_image, 0, image.image(), 0, Filter::Linear);
            if tier.is_full() {
                commands.generate_mips(image.image(), image.mip_levels());
            }
            self.context.submit_and_wait(commands)?;
            Ok(())
        };
        if let Err(e) = built {
            self.context.destroy_image(image);
            return Err(e.into());
        }
        // The frame may have been deleted, or changed generation, while we were away.
        match self.frames.with(frame, |texture| texture.image().image()) {
            Some(current) if current == old_image => Ok(PendingUpgrade {
                frame,
                from_tier,
                tier,
                image,
            }),
            Some(_) => {
                self.context.destroy_image(image);
                Err(UpgradeError::Superseded(frame))
            }
            None => {
                self.context.destroy_image(image);
                Err(UpgradeError::FrameDeleted(frame))
            }
        }
    }
}
