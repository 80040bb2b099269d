/// Where a layer sits on the canvas: mirror, scale, rotate, then move.
///
/// Recorded by value in layer transform actions, so undo restores it exactly.
#[derive(
    Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable, PartialEq, PartialOrd,
    serde::Serialize, serde::Deserialize,
)]
#[repr(C)]
pub struct Similarity {
    /// Magnitude is the uniform scale. A negative sign mirrors across the layer's Y axis.
    pub flip_scale: f32,
    /// Radians, clockwise, since canvas Y points down.
    pub rotation: f32,
    /// Canvas pixels from the top-left corner.
    pub translation: [f32; 2],
}

impl Similarity {
    #[must_use]
    pub fn hflip(&self) -> bool {
        self.flip_scale.is_sign_negative()
    }
    #[must_use]
    pub fn scale(&self) -> f32 {
        self.flip_scale.abs()
    }
    #[must_use]
    pub fn translated(x: f32, y: f32) -> Self {
        Self {
            translation: [x, y],
            ..Self::default()
        }
    }
    /// Map a point through this transform.
    #[must_use]
    pub fn apply(&self, point: ultraviolet::Vec2) -> ultraviolet::Vec2 {
        let (sin, cos) = self.rotation.sin_cos();
        let x = point.x * self.flip_scale;
        let y = point.y * self.scale();
        ultraviolet::Vec2 {
            x: x * cos - y * sin + self.translation[0],
            y: x * sin + y * cos + self.translation[1],
        }
    }
}

impl Default for Similarity {
    fn default() -> Self {
        Self {
            flip_scale: 1.0,
            rotation: 0.0,
            translation: [0.0; 2],
        }
    }
}

#[cfg(test)]
mod test {
    use super::Similarity;
    #[test]
    fn flip_and_translate() {
        let xform = Similarity {
            flip_scale: -2.0,
            rotation: 0.0,
            translation: [1.0, 1.0],
        };
        assert!(xform.hflip());
        assert_eq!(xform.scale(), 2.0);
        let out = xform.apply(ultraviolet::Vec2::new(1.0, 1.0));
        assert_eq!((out.x, out.y), (-1.0, 3.0));
        assert_eq!(
            Similarity::default().apply(ultraviolet::Vec2::new(3.0, 4.0)),
            ultraviolet::Vec2::new(3.0, 4.0)
        );
    }
}
