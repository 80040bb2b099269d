//! # Strokes
//!
//! A stroke is an immutable, recorded sequence of pen samples plus the brush color and radius.
//! To draw it, it is expanded into a dense sequence of [`Stamp`]s, each a soft circular dab.
//!
//! Two expansions exist. [`expand_stroke`] is the deterministic one used for replay: straight
//! lines between recorded samples. [`LiveSmoother`] is used while the pen is still down and
//! rounds corners with a quadratic Bezier once the stroke is a few stamps old.

use crate::{color::Color, util::UnitF32};
use ultraviolet::Vec2;

/// Stamps are never closer than this, in canvas pixels, regardless of pressure.
pub const MIN_SPACING_PX: f32 = 0.5;
/// Radii below one pixel are multiplied by this so hairlines stay visible.
pub const SMALL_RADIUS_BOOST: f32 = 2.0;
/// How many straight pieces a smoothing curve is flattened into.
const CURVE_SUBDIVISIONS: usize = 8;

/// A single pen sample, in canvas pixels.
#[derive(Copy, Clone, PartialEq, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct PenState {
    pub x: f32,
    pub y: f32,
    pub pressure: UnitF32,
}
impl PenState {
    #[must_use]
    pub fn new(x: f32, y: f32, pressure: f32) -> Self {
        Self {
            x,
            y,
            pressure: UnitF32::saturating(pressure),
        }
    }
    #[must_use]
    pub fn position(&self) -> Vec2 {
        Vec2::new(self.x, self.y)
    }
    fn lerp(&self, other: &Self, t: f32) -> Self {
        let pos = self.position() + (other.position() - self.position()) * t;
        let pressure = self.pressure.get() + (other.pressure.get() - self.pressure.get()) * t;
        Self::new(pos.x, pos.y, pressure)
    }
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrokeError {
    #[error("a stroke needs at least one pen sample")]
    Empty,
    #[error("stroke radius must be finite and non-negative")]
    BadRadius,
    #[error("pen sample position is not finite")]
    BadPosition,
}

/// A recorded stroke. Owns a private copy of its samples, which are never modified afterwards.
#[derive(Clone, PartialEq, Debug)]
pub struct Stroke {
    states: Box<[PenState]>,
    color: Color,
    radius: f32,
}
impl Stroke {
    /// Deep-copies `states`.
    pub fn new(states: &[PenState], color: Color, radius: f32) -> Result<Self, StrokeError> {
        if states.is_empty() {
            return Err(StrokeError::Empty);
        }
        if !radius.is_finite() || radius < 0.0 {
            return Err(StrokeError::BadRadius);
        }
        if states
            .iter()
            .any(|state| !state.x.is_finite() || !state.y.is_finite())
        {
            return Err(StrokeError::BadPosition);
        }
        Ok(Self {
            states: states.into(),
            color,
            radius,
        })
    }
    #[must_use]
    pub fn states(&self) -> &[PenState] {
        &self.states
    }
    #[must_use]
    pub fn color(&self) -> Color {
        self.color
    }
    #[must_use]
    pub fn radius(&self) -> f32 {
        self.radius
    }
    #[must_use]
    pub fn len(&self) -> usize {
        self.states.len()
    }
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

/// One soft circular dab, ready to be rendered.
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct Stamp {
    pub center: Vec2,
    /// Pressure-scaled radius, in canvas pixels.
    pub radius: f32,
    pub color: Color,
}
impl Stamp {
    /// Inclusive-exclusive pixel rectangle `[min, max)` that this stamp may touch,
    /// clipped to a canvas of `extent` pixels. `None` if fully outside.
    #[must_use]
    pub fn pixel_bounds(&self, softness: f32, extent: u32) -> Option<([u32; 2], [u32; 2])> {
        let reach = self.radius.max(0.0) + softness.max(0.0) + 1.0;
        let extent_f = extent as f32;
        let min_x = (self.center.x - reach).floor().max(0.0);
        let min_y = (self.center.y - reach).floor().max(0.0);
        let max_x = (self.center.x + reach).ceil().min(extent_f);
        let max_y = (self.center.y + reach).ceil().min(extent_f);
        if min_x >= max_x || min_y >= max_y {
            return None;
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Some(([min_x as u32, min_y as u32], [max_x as u32, max_y as u32]))
    }
}

/// Coverage of a brush dab at `distance` from its center.
///
/// `alpha = 1 - smoothstep(radius - softness, radius, distance)`, times `opacity`. Sub-pixel radii
/// receive [`SMALL_RADIUS_BOOST`].
#[must_use]
pub fn footprint_alpha(distance: f32, radius: f32, softness: f32, opacity: f32) -> f32 {
    let mut alpha = 1.0 - crate::util::smoothstep(radius - softness, radius, distance);
    if radius < 1.0 {
        alpha *= SMALL_RADIUS_BOOST;
    }
    (alpha * opacity).clamp(0.0, 1.0)
}

/// Distance between consecutive stamps for a brush of `radius` at `pressure`.
#[must_use]
pub fn stamp_spacing(radius: f32, pressure: f32, spacing_factor: f32) -> f32 {
    (radius * pressure * spacing_factor).max(MIN_SPACING_PX)
}

/// Walks straight segments emitting stamps at pressure-dependent spacing, carrying the leftover
/// distance across segment boundaries.
#[derive(Clone, Debug)]
struct SpacingWalker {
    radius: f32,
    color: Color,
    spacing_factor: f32,
    /// Distance travelled since the last emitted stamp.
    since_last: f32,
    /// Pressure at the last emitted stamp. Governs the distance to the next.
    last_pressure: f32,
}
impl SpacingWalker {
    fn new(radius: f32, color: Color, spacing_factor: f32) -> Self {
        Self {
            radius,
            color,
            spacing_factor,
            since_last: 0.0,
            last_pressure: 0.0,
        }
    }
    fn stamp(&mut self, at: &PenState) -> Stamp {
        self.since_last = 0.0;
        self.last_pressure = at.pressure.get();
        Stamp {
            center: at.position(),
            radius: self.radius * at.pressure.get(),
            color: self.color,
        }
    }
    fn walk(&mut self, from: &PenState, to: &PenState, out: &mut Vec<Stamp>) {
        let length = (to.position() - from.position()).mag();
        if length <= f32::EPSILON {
            return;
        }
        let mut travelled = 0.0;
        loop {
            let spacing = stamp_spacing(self.radius, self.last_pressure, self.spacing_factor);
            let needed = spacing - self.since_last;
            if travelled + needed > length {
                self.since_last += length - travelled;
                return;
            }
            travelled += needed;
            let here = from.lerp(to, travelled / length);
            out.push(self.stamp(&here));
        }
    }
}

/// Expand a recorded stroke into dense stamps, linearly interpolating between samples.
///
/// Deterministic: the same stroke and factor always yield the same stamps. Always yields at least
/// one stamp (at the first sample).
#[must_use]
pub fn expand_stroke(stroke: &Stroke, spacing_factor: f32) -> Vec<Stamp> {
    let mut walker = SpacingWalker::new(stroke.radius, stroke.color, spacing_factor);
    let states = stroke.states();
    let mut out = Vec::with_capacity(states.len() * 2);
    // Non-empty by construction.
    out.push(walker.stamp(&states[0]));
    for pair in states.windows(2) {
        walker.walk(&pair[0], &pair[1], &mut out);
    }
    out
}

/// Incremental stamp generator for a stroke in progress.
///
/// After `warmup` stamps, each new segment is bent into a quadratic Bezier whose control point
/// continues the tangent of the two preceding samples. The first stamps stay straight so that the
/// stroke start doesn't bulge toward a noisy first sample.
#[derive(Clone, Debug)]
pub struct LiveSmoother {
    walker: SpacingWalker,
    /// Up to the last two recorded samples, oldest first.
    previous: smallvec::SmallVec<[PenState; 2]>,
    warmup: usize,
    emitted: usize,
}
impl LiveSmoother {
    #[must_use]
    pub fn new(radius: f32, color: Color, spacing_factor: f32, warmup: usize) -> Self {
        Self {
            walker: SpacingWalker::new(radius, color, spacing_factor),
            previous: smallvec::SmallVec::new(),
            warmup,
            emitted: 0,
        }
    }
    /// Feed the next recorded sample, returning the stamps it produces.
    pub fn push(&mut self, state: PenState) -> Vec<Stamp> {
        let mut out = Vec::new();
        match self.previous.as_slice() {
            [] => out.push(self.walker.stamp(&state)),
            [.., before, last] if self.emitted >= self.warmup => {
                let (before, last) = (*before, *last);
                self.curve(&before, &last, &state, &mut out);
            }
            [.., last] => {
                let last = *last;
                self.walker.walk(&last, &state, &mut out);
            }
        }
        self.emitted += out.len();
        if self.previous.len() == 2 {
            self.previous.remove(0);
        }
        self.previous.push(state);
        out
    }
    /// Stamps emitted so far.
    #[must_use]
    pub fn emitted(&self) -> usize {
        self.emitted
    }
    fn curve(&mut self, before: &PenState, start: &PenState, end: &PenState, out: &mut Vec<Stamp>) {
        // Continue the incoming tangent for half its length.
        let control = start.position() + (start.position() - before.position()) * 0.5;
        let bezier = |t: f32| -> Vec2 {
            let u = 1.0 - t;
            start.position() * (u * u) + control * (2.0 * u * t) + end.position() * (t * t)
        };
        let mut prev = *start;
        for i in 1..=CURVE_SUBDIVISIONS {
            #[allow(clippy::cast_precision_loss)]
            let t = i as f32 / CURVE_SUBDIVISIONS as f32;
            let pos = bezier(t);
            let pressure = start.pressure.get() + (end.pressure.get() - start.pressure.get()) * t;
            let next = PenState::new(pos.x, pos.y, pressure);
            self.walker.walk(&prev, &next, out);
            prev = next;
        }
    }
}
