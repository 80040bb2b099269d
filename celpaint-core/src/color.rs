use crate::util::{FiniteF32, FiniteF32Error};

/// A straight (non-premultiplied) linear color.
/// All transparent values (alpha == 0) are normalized to transparent black.
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, bytemuck::Zeroable, Debug)]
pub struct Color([FiniteF32; 4]);
impl Color {
    pub const TRANSPARENT: Self = Self([FiniteF32::ZERO; 4]);
    pub const WHITE: Self = Self([FiniteF32::ONE; 4]);
    pub const BLACK: Self = Self([
        FiniteF32::ZERO,
        FiniteF32::ZERO,
        FiniteF32::ZERO,
        FiniteF32::ONE,
    ]);
    /// Create a new color from straight linear channels. Alpha is clamped to `[0, 1]`,
    /// and fully transparent colors are normalized to [`Color::TRANSPARENT`].
    pub fn new_lossy(r: f32, g: f32, b: f32, a: f32) -> Result<Self, FiniteF32Error> {
        let raw = Self([
            FiniteF32::new(r)?,
            FiniteF32::new(g)?,
            FiniteF32::new(b)?,
            FiniteF32::new(a.clamp(0.0, 1.0))?,
        ]);
        if raw.0[3].get() == 0.0 {
            Ok(Self::TRANSPARENT)
        } else {
            Ok(raw)
        }
    }
    /// Channels as plain floats, in RGBA order, as uploaded to the device.
    #[must_use]
    pub fn as_array(&self) -> [f32; 4] {
        bytemuck::cast(*self)
    }
    #[must_use]
    pub fn alpha(&self) -> f32 {
        self.0[3].get()
    }
}
// Safety: FiniteF32 is NoUninit, arrays have no uninit bytes of their own.
unsafe impl bytemuck::NoUninit for Color {}

impl Default for Color {
    fn default() -> Self {
        Self::BLACK
    }
}

#[cfg(test)]
mod test {
    use super::Color;
    #[test]
    fn transparent_normalizes() {
        assert_eq!(
            Color::new_lossy(0.3, 0.2, 0.1, 0.0).unwrap(),
            Color::TRANSPARENT
        );
        assert!(Color::new_lossy(f32::NAN, 0.0, 0.0, 1.0).is_err());
        assert_eq!(Color::new_lossy(1.0, 0.0, 0.0, 4.0).unwrap().alpha(), 1.0);
        assert_eq!(
            Color::new_lossy(0.25, 0.5, 0.75, 0.5).unwrap().as_array(),
            [0.25, 0.5, 0.75, 0.5]
        );
    }
}
