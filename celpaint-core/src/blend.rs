use crate::util::UnitF32;

/// How a layer composites onto those below it. Compositing itself happens in the host renderer.
#[derive(
    strum::AsRefStr, PartialEq, Eq, Copy, Clone, Hash, Debug, Default, serde::Serialize,
    serde::Deserialize,
)]
pub enum BlendMode {
    #[default]
    Normal,
    Add,
    Multiply,
    Overlay,
}

/// Compositing settings of a layer, as read from and written to the layer store.
///
/// A hidden layer keeps its mode but carries zero opacity; the opacity it had before hiding
/// lives in the visibility action that hid it.
#[derive(Copy, Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Blend {
    pub mode: BlendMode,
    pub opacity: UnitF32,
    pub alpha_clip: bool,
}
impl Default for Blend {
    fn default() -> Self {
        Self {
            mode: BlendMode::default(),
            opacity: UnitF32::ONE,
            alpha_clip: false,
        }
    }
}
impl Blend {
    #[must_use = "returns a new blend without modifying `self`"]
    pub fn with_opacity(self, opacity: UnitF32) -> Self {
        Self { opacity, ..self }
    }
}
