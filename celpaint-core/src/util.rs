//! Utility types, used throughout the crate.

/// A float which is finite (non-NaN, non-infinite).
// Because of the preconditions invalidating many bitpatterns, this is not Pod.
#[derive(Copy, Clone, PartialEq, PartialOrd, bytemuck::NoUninit, bytemuck::Zeroable, Debug)]
#[repr(transparent)]
pub struct FiniteF32(f32);
impl FiniteF32 {
    pub const ZERO: Self = Self(0.0);
    pub const ONE: Self = Self(1.0);
    pub fn new(val: f32) -> Result<Self, FiniteF32Error> {
        if val.is_finite() {
            Ok(Self(val))
        } else {
            Err(FiniteF32Error::NotFinite)
        }
    }
    #[must_use]
    pub fn get(self) -> f32 {
        self.0
    }
}
impl Default for FiniteF32 {
    fn default() -> Self {
        Self::ZERO
    }
}
impl TryFrom<f32> for FiniteF32 {
    type Error = FiniteF32Error;
    fn try_from(value: f32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}
impl From<FiniteF32> for f32 {
    fn from(value: FiniteF32) -> Self {
        value.get()
    }
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FiniteF32Error {
    #[error("not finite")]
    NotFinite,
}

// Never NaN, so PartialEq can act like Eq.
impl Eq for FiniteF32 {}
#[allow(clippy::derive_ord_xor_partial_ord)]
impl Ord for FiniteF32 {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Neither side is NaN, so this never falls back.
        self.partial_cmp(other)
            .unwrap_or(std::cmp::Ordering::Equal)
    }
}
impl std::hash::Hash for FiniteF32 {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        // -0.0 and 0.0 compare equal but differ in bits. Normalize.
        let bits = if self.0 == 0.0 { 0 } else { self.0.to_bits() };
        state.write_u32(bits);
    }
}

/// A float in the closed range `[0, 1]`. Used for pen pressure and opacities.
#[derive(Copy, Clone, PartialEq, PartialOrd, Debug, Default, serde::Serialize, serde::Deserialize)]
#[serde(into = "f32", from = "f32")]
#[repr(transparent)]
pub struct UnitF32(f32);
impl UnitF32 {
    pub const ZERO: Self = Self(0.0);
    pub const ONE: Self = Self(1.0);
    /// Clamp into `[0, 1]`. NaN becomes zero.
    #[must_use]
    pub fn saturating(val: f32) -> Self {
        if val.is_nan() {
            Self::ZERO
        } else {
            Self(val.clamp(0.0, 1.0))
        }
    }
    #[must_use]
    pub fn get(self) -> f32 {
        self.0
    }
    #[must_use]
    pub fn is_zero(self) -> bool {
        self.0 == 0.0
    }
}
impl From<f32> for UnitF32 {
    fn from(value: f32) -> Self {
        Self::saturating(value)
    }
}
impl From<UnitF32> for f32 {
    fn from(value: UnitF32) -> Self {
        value.0
    }
}

/// Hermite smoothstep, as in GLSL. Returns 0 below `edge0`, 1 above `edge1`.
#[must_use]
pub fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    if edge1 <= edge0 {
        // Degenerate edge, acts as a hard step.
        return if x < edge0 { 0.0 } else { 1.0 };
    }
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

#[cfg(test)]
mod test {
    use super::{smoothstep, FiniteF32, UnitF32};
    #[test]
    fn finite_rejects() {
        assert!(FiniteF32::new(f32::NAN).is_err());
        assert!(FiniteF32::new(f32::INFINITY).is_err());
        assert_eq!(FiniteF32::new(2.5).map(FiniteF32::get), Ok(2.5));
    }
    #[test]
    fn unit_clamps() {
        assert_eq!(UnitF32::saturating(1.5).get(), 1.0);
        assert_eq!(UnitF32::saturating(-0.5).get(), 0.0);
        assert_eq!(UnitF32::saturating(f32::NAN).get(), 0.0);
        assert_eq!(UnitF32::saturating(0.25).get(), 0.25);
    }
    #[test]
    fn smoothstep_edges() {
        assert_eq!(smoothstep(1.0, 2.0, 0.5), 0.0);
        assert_eq!(smoothstep(1.0, 2.0, 3.0), 1.0);
        assert!((smoothstep(1.0, 2.0, 1.5) - 0.5).abs() < 1e-6);
        // Degenerate
        assert_eq!(smoothstep(1.0, 1.0, 0.9), 0.0);
        assert_eq!(smoothstep(1.0, 1.0, 1.0), 1.0);
    }
}
