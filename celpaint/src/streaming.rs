//! # Mip streaming
//!
//! Once a frame is at full resolution, its finer mips are revealed one at a time on a timer,
//! approximating a frame-paced fade-in. Progress is reported through the handoff channel. The
//! task never writes the texture itself, so cancelling it at any point leaves the texture at its
//! last reported mip.

use crate::upgrade::Handoff;
use tokio::sync::oneshot;

/// Spawn a task streaming `frame` from `from_mip` down to mip 0, one step per `step`.
///
/// Sending on, or dropping, the returned sender cancels it.
pub fn spawn(
    runtime: &tokio::runtime::Handle,
    frame: u32,
    from_mip: u32,
    step: std::time::Duration,
    handoff: crossbeam::channel::Sender<Handoff>,
) -> oneshot::Sender<()> {
    let (cancel, mut cancelled) = oneshot::channel();
    runtime.spawn(async move {
        let mut mip = from_mip;
        while mip > 0 {
            // Closed counts as a cancel, too.
            if !matches!(
                cancelled.try_recv(),
                Err(oneshot::error::TryRecvError::Empty)
            ) {
                log::trace!("mip streaming of frame {frame} cancelled at {mip}");
                return;
            }
            tokio::select! {
                () = tokio::time::sleep(step) => (),
                _ = &mut cancelled => {
                    log::trace!("mip streaming of frame {frame} cancelled at {mip}");
                    return;
                }
            }
            mip -= 1;
            if handoff.send(Handoff::MipStreamed { frame, mip }).is_err() {
                return;
            }
        }
        log::debug!("frame {frame} fully streamed");
    });
    cancel
}

#[cfg(test)]
mod test {
    use crate::upgrade::Handoff;
    use std::time::Duration;

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap()
    }
    #[test]
    fn streams_down_to_zero() {
        let runtime = runtime();
        let (send, recv) = crossbeam::channel::unbounded();
        let _cancel = super::spawn(runtime.handle(), 3, 4, Duration::from_millis(1), send);
        let mips: Vec<_> = (0..4)
            .map(|_| match recv.recv_timeout(Duration::from_secs(5)).unwrap() {
                Handoff::MipStreamed { frame: 3, mip } => mip,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(mips, [3, 2, 1, 0]);
    }
    #[test]
    fn cancel_stops_promptly() {
        let runtime = runtime();
        let (send, recv) = crossbeam::channel::unbounded();
        let cancel = super::spawn(runtime.handle(), 0, 10, Duration::from_secs(60), send);
        cancel.send(()).unwrap();
        // The sender is dropped by the finished task, disconnecting the channel.
        assert!(matches!(
            recv.recv_timeout(Duration::from_secs(5)),
            Err(crossbeam::channel::RecvTimeoutError::Disconnected)
        ));
    }
    #[test]
    fn dropping_handle_cancels() {
        let runtime = runtime();
        let (send, recv) = crossbeam::channel::unbounded();
        drop(super::spawn(runtime.handle(), 0, 10, Duration::from_secs(60), send));
        assert!(matches!(
            recv.recv_timeout(Duration::from_secs(5)),
            Err(crossbeam::channel::RecvTimeoutError::Disconnected)
        ));
    }
}
