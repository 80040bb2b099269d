#![warn(clippy::pedantic)]

pub mod bindless;
pub mod canvas;
pub mod config;
pub mod context;
pub mod device;
pub mod frames;
pub mod garbage;
pub mod pen;
pub mod replay;
pub mod session;
pub mod snapshot;
pub mod streaming;
pub mod upgrade;

use anyhow::Result as AnyResult;
use celpaint_core::{color::Color, layer::InMemoryLayers, stroke::PenState};
use session::{Session, StrokeOutcome};
use std::time::Duration;

/// Pace of the headless main loop.
const TICK: Duration = Duration::from_millis(16);

/// Tick until `done` holds, or fail after `timeout`.
fn run_until(
    session: &mut Session<InMemoryLayers>,
    timeout: Duration,
    what: &str,
    mut done: impl FnMut(&Session<InMemoryLayers>) -> bool,
) -> AnyResult<()> {
    let deadline = std::time::Instant::now() + timeout;
    while !done(session) {
        if std::time::Instant::now() > deadline {
            anyhow::bail!("timed out waiting for {what}");
        }
        session.tick()?;
        std::thread::sleep(TICK);
    }
    Ok(())
}

/// A wavy horizontal line across the canvas, with pressure tapering off at both ends.
fn wave(extent: u32, row: f32, samples: usize) -> Vec<PenState> {
    #[allow(clippy::cast_precision_loss)]
    let (extent, last) = (extent as f32, (samples - 1) as f32);
    (0..samples)
        .map(|i| {
            #[allow(clippy::cast_precision_loss)]
            let t = i as f32 / last;
            PenState::new(
                extent * (0.1 + 0.8 * t),
                extent * (row + 0.05 * (t * std::f32::consts::TAU * 2.0).sin()),
                (t * std::f32::consts::PI).sin().max(0.1),
            )
        })
        .collect()
}

fn script(session: &mut Session<InMemoryLayers>) -> AnyResult<()> {
    let extent = session.settings().working_resolution;
    #[allow(clippy::cast_precision_loss)]
    let radius = (extent as f32 / 64.0).max(1.0);
    let patience = Duration::from_secs(60);

    let early = session.record_stroke(&wave(extent, 0.5, 32), Color::BLACK, radius)?;
    log::info!("stroke before full resolution: {early:?}");

    run_until(session, patience, "frame 0 at full resolution", |session| {
        session.is_paintable(0)
    })?;
    for (row, color) in [
        (0.25, Color::new_lossy(0.8, 0.1, 0.1, 1.0)?),
        (0.5, Color::new_lossy(0.1, 0.6, 0.2, 0.8)?),
        (0.75, Color::BLACK),
    ] {
        let outcome = session.record_stroke(&wave(extent, row, 48), color, radius)?;
        log::info!("stroke at {row}: {outcome:?}");
    }
    let noise = session.record_stroke(&wave(extent, 0.9, 4), Color::BLACK, radius)?;
    debug_assert_eq!(noise, StrokeOutcome::Discarded);
    session.tick()?;

    log::info!("undo: {}, undo: {}", session.undo(), session.undo());
    session.tick()?;
    log::info!("redo: {}", session.redo());
    session.tick()?;

    let layer = session.layers_mut().insert_new();
    session.set_layer_opacity(layer, celpaint_core::util::UnitF32::saturating(0.5))?;
    session.set_layer_visibility(layer, false)?;
    session.undo();

    // Scrub from another thread. Only the last request is visited.
    let switcher = session.switch_handle();
    std::thread::spawn(move || {
        for frame in 1..=4 {
            switcher.request(frame);
            std::thread::sleep(Duration::from_millis(2));
        }
    })
    .join()
    .map_err(|_| anyhow::anyhow!("switch thread panicked"))?;
    run_until(session, patience, "scrub to frame 4", |session| {
        session.current_frame() == 4
    })?;
    let rejected = session.record_stroke(&wave(extent, 0.5, 32), Color::BLACK, radius)?;
    log::info!("stroke on fresh frame 4: {rejected:?}");

    session.switch_to_frame(1)?;
    session.switch_to_frame(0)?;
    if let Err(e) = session.delete_frame(1) {
        log::warn!("failed to delete frame 1: {e}");
    }
    run_until(session, patience, "frame 0 fully streamed", |session| {
        !session.needs_replay(0)
            && session
                .frames()
                .with(0, |texture| texture.current_streamed_mip())
                == Some(0)
    })?;

    for frame in session.frames().frame_indices() {
        log::info!(
            "frame {frame}: {} resolution, {} actions",
            session.tier(frame).map_or("no", <&'static str>::from),
            session.recorder(frame).map_or(0, |recorder| recorder.len())
        );
    }
    Ok(())
}

fn main() -> AnyResult<()> {
    let has_term = std::io::IsTerminal::is_terminal(&std::io::stdin());
    // Log to a terminal, if available. Else, log to "log.out" in the working directory.
    if has_term {
        env_logger::builder()
            .filter_level(log::LevelFilter::Debug)
            .init();
    } else {
        let _ = simple_logging::log_to_file("log.out", log::LevelFilter::Debug);
    }

    // The software device holds every image in host memory, so full size is slow and heavy.
    let settings = if std::env::args().skip(1).any(|arg| arg == "--small") {
        config::Settings::small()
    } else {
        let settings = config::Settings::load();
        if let Err(e) = settings.save() {
            log::warn!("Failed to save settings:\n{e:?}");
        }
        settings
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("celpaint worker")
        .build()?;
    let (context, device) = context::GpuContext::new_headless();
    let mut session = Session::new(
        settings,
        context,
        runtime.handle().clone(),
        InMemoryLayers::new(),
    )?;

    let result = script(&mut session);
    session.close();
    log::info!(
        "{} images, {} fences left after close",
        device.live_images(),
        device.live_fences()
    );
    result
}
