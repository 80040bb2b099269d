//! # Resolution tiers
//!
//! A frame's persistent image is kept at one of four discrete resolutions. Tiers only ever move
//! upward, one step at a time, and only the top tier carries a mip chain.

#[derive(
    Copy,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Debug,
    strum::EnumIter,
    strum::EnumCount,
    strum::AsRefStr,
    strum::IntoStaticStr,
)]
#[repr(u8)]
pub enum ResolutionTier {
    /// Instant, blank-or-nearly proxy.
    Thumb,
    Low,
    Medium,
    /// The only paintable tier.
    Full,
}
impl ResolutionTier {
    /// The tier immediately above this one, or `None` at [`ResolutionTier::Full`].
    #[must_use]
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Thumb => Some(Self::Low),
            Self::Low => Some(Self::Medium),
            Self::Medium => Some(Self::Full),
            Self::Full => None,
        }
    }
    #[must_use]
    pub fn is_full(self) -> bool {
        self == Self::Full
    }
    fn index(self) -> usize {
        self as usize
    }
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LadderError {
    #[error("tier extents must be nonzero and strictly increasing")]
    NotIncreasing,
}

/// Pixel extents of each tier. Images are square.
#[derive(Copy, Clone, PartialEq, Eq, Debug, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "[u32; 4]", into = "[u32; 4]")]
pub struct Ladder([u32; 4]);
impl Ladder {
    pub const DEFAULT: Self = Self([32, 128, 512, 2048]);
    pub fn new(extents: [u32; 4]) -> Result<Self, LadderError> {
        let increasing = extents[0] > 0 && extents.windows(2).all(|pair| pair[0] < pair[1]);
        if increasing {
            Ok(Self(extents))
        } else {
            Err(LadderError::NotIncreasing)
        }
    }
    #[must_use]
    pub fn extent(&self, tier: ResolutionTier) -> u32 {
        self.0[tier.index()]
    }
    /// Number of mip levels an image of this tier carries.
    /// Proxies are a single level, full resolution is a full chain down to 1x1.
    #[must_use]
    pub fn mip_levels(&self, tier: ResolutionTier) -> u32 {
        if tier.is_full() {
            full_chain_levels(self.extent(tier))
        } else {
            1
        }
    }
}
impl Default for Ladder {
    fn default() -> Self {
        Self::DEFAULT
    }
}
impl TryFrom<[u32; 4]> for Ladder {
    type Error = LadderError;
    fn try_from(value: [u32; 4]) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}
impl From<Ladder> for [u32; 4] {
    fn from(value: Ladder) -> Self {
        value.0
    }
}

/// Length of a full mip chain for a square image of `extent`.
#[must_use]
pub fn full_chain_levels(extent: u32) -> u32 {
    extent.max(1).ilog2() + 1
}
/// Extent of `mip` for a square image of `extent`, never less than one.
#[must_use]
pub fn mip_extent(extent: u32, mip: u32) -> u32 {
    extent.checked_shr(mip).unwrap_or(0).max(1)
}
