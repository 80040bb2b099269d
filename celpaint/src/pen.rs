//! # Pen
//!
//! Turns raw stylus events into live stamps and, once the pen lifts, a finished stroke.
//!
//! `Idle -> Active` needs the pen pressed with nonzero pressure on a paintable frame. A pen-down on
//! a frame still streaming in is rejected outright: nothing is queued. `Active -> Idle` happens on
//! release or when pressure reaches zero.

use celpaint_core::{
    color::Color,
    stroke::{LiveSmoother, PenState, Stamp},
};

#[derive(Copy, Clone, PartialEq, Debug)]
pub struct StylusEvent {
    /// Canvas pixel position.
    pub pos: (f32, f32),
    /// `None` for devices without pressure, treated as full pressure.
    pub pressure: Option<f32>,
    pub pressed: bool,
}
impl StylusEvent {
    #[must_use]
    pub fn pen_state(&self) -> PenState {
        PenState::new(self.pos.0, self.pos.1, self.pressure.unwrap_or(1.0))
    }
}

#[derive(Copy, Clone, PartialEq, Debug)]
pub struct Brush {
    pub color: Color,
    pub radius: f32,
}
impl Default for Brush {
    fn default() -> Self {
        Self {
            color: Color::BLACK,
            radius: 8.0,
        }
    }
}

/// Result of feeding one event.
#[derive(Debug, PartialEq)]
pub enum PenStep {
    /// Nothing happens.
    Ignored,
    /// Pen-down on a frame that cannot be painted.
    Rejected,
    /// The stroke continues. May be empty if the pen moved less than the stamp spacing.
    Stamps(Vec<Stamp>),
    /// The pen lifted. Every sample of the stroke, in order.
    Finished(Brush, Vec<PenState>),
}

pub struct LiveStroke {
    brush: Brush,
    samples: Vec<PenState>,
    smoother: LiveSmoother,
}

#[derive(Default)]
pub enum PenMachine {
    #[default]
    Idle,
    Active(LiveStroke),
}
impl PenMachine {
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active(_))
    }
    /// Feed one event.
    ///
    /// `paintable` and `brush` only matter on pen-down. The brush is fixed for the stroke's
    /// duration.
    pub fn handle(
        &mut self,
        event: StylusEvent,
        paintable: bool,
        brush: Brush,
        spacing_factor: f32,
        warmup: usize,
    ) -> PenStep {
        let state = event.pen_state();
        let touching = event.pressed && !state.pressure.is_zero();
        match self {
            Self::Idle if !touching => PenStep::Ignored,
            Self::Idle if !paintable => PenStep::Rejected,
            Self::Idle => {
                let mut smoother = LiveSmoother::new(brush.radius, brush.color, spacing_factor, warmup);
                let stamps = smoother.push(state);
                *self = Self::Active(LiveStroke {
                    brush,
                    samples: vec![state],
                    smoother,
                });
                PenStep::Stamps(stamps)
            }
            Self::Active(stroke) if touching => {
                stroke.samples.push(state);
                PenStep::Stamps(stroke.smoother.push(state))
            }
            Self::Active(_) => match self.finish() {
                Some((brush, samples)) => PenStep::Finished(brush, samples),
                None => PenStep::Ignored,
            },
        }
    }
    /// End the stroke in progress, if any, as though the pen lifted.
    pub fn finish(&mut self) -> Option<(Brush, Vec<PenState>)> {
        match std::mem::take(self) {
            Self::Active(stroke) => Some((stroke.brush, stroke.samples)),
            Self::Idle => None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::{Brush, PenMachine, PenStep, StylusEvent};

    fn event(x: f32, pressure: f32, pressed: bool) -> StylusEvent {
        StylusEvent {
            pos: (x, 4.0),
            pressure: Some(pressure),
            pressed,
        }
    }
    fn feed(pen: &mut PenMachine, event: StylusEvent, paintable: bool) -> PenStep {
        pen.handle(event, paintable, Brush::default(), 0.25, 3)
    }
    #[test]
    fn rejected_on_proxy() {
        let mut pen = PenMachine::default();
        assert_eq!(feed(&mut pen, event(0.0, 1.0, true), false), PenStep::Rejected);
        assert!(!pen.is_active());
        // Further motion is ignored, not queued.
        assert_eq!(feed(&mut pen, event(1.0, 1.0, true), false), PenStep::Rejected);
        assert_eq!(feed(&mut pen, event(1.0, 0.0, false), true), PenStep::Ignored);
    }
    #[test]
    fn zero_pressure_does_not_start() {
        let mut pen = PenMachine::default();
        assert_eq!(feed(&mut pen, event(0.0, 0.0, true), true), PenStep::Ignored);
        assert!(!pen.is_active());
    }
    #[test]
    fn full_lifecycle() {
        let mut pen = PenMachine::default();
        assert!(matches!(
            feed(&mut pen, event(0.0, 1.0, true), true),
            PenStep::Stamps(stamps) if stamps.len() == 1
        ));
        for i in 1..5 {
            assert!(matches!(
                feed(&mut pen, event(i as f32 * 3.0, 1.0, true), true),
                PenStep::Stamps(_)
            ));
        }
        // Pressure reaching zero ends the stroke. That sample isn't part of it.
        match feed(&mut pen, event(20.0, 0.0, true), true) {
            PenStep::Finished(brush, samples) => {
                assert_eq!(brush, Brush::default());
                assert_eq!(samples.len(), 5);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(!pen.is_active());
        assert_eq!(pen.finish(), None);
    }
    #[test]
    fn missing_pressure_is_full() {
        let event = StylusEvent {
            pos: (1.0, 2.0),
            pressure: None,
            pressed: true,
        };
        assert_eq!(event.pen_state().pressure.get(), 1.0);
    }
}
