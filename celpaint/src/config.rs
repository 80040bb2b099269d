use celpaint_core::tier::{Ladder, LadderError};

const DOCUMENTATION: &str = r#"# Celpaint engine settings. You may edit this file, but be aware that formatting and comments will not
# be preserved. Missing keys take their default values.

# working_resolution     - extent in pixels of the live painting canvas
# ladder                 - extents of the four resolution tiers, strictly increasing
# snapshot_capacity      - number of canvas snapshots kept for fast undo
# snapshot_interval      - a snapshot is taken every this many actions during replay
# frames_in_flight       - frames the device may lag behind, delaying the destruction of old images
# switch_debounce_ms     - idle time after a frame switch before upgrading the frame's resolution
# upgrade_chain_delay_ms - pause between consecutive resolution upgrades
# mip_stream_step_ms     - time between revealing successive mip levels
# initial_streamed_mip   - mip level shown first once a frame reaches full resolution
# min_stroke_samples     - strokes with at most this many pen samples are discarded as noise
# spacing_factor         - stamp spacing as a fraction of the pressure-scaled radius
# brush_softness         - width in pixels of the brush edge falloff
# smoothing_warmup       - stamps drawn unsmoothed at the start of each live stroke

"#;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum SettingsError {
    #[error(transparent)]
    Ladder(#[from] LadderError),
    #[error("working resolution must be nonzero")]
    ZeroResolution,
    #[error("snapshot capacity and interval must be nonzero")]
    ZeroSnapshots,
    #[error("spacing factor must be finite and positive")]
    BadSpacing,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Settings {
    pub working_resolution: u32,
    pub ladder: Ladder,
    pub snapshot_capacity: usize,
    pub snapshot_interval: usize,
    pub frames_in_flight: u64,
    pub switch_debounce_ms: u64,
    pub upgrade_chain_delay_ms: u64,
    pub mip_stream_step_ms: u64,
    pub initial_streamed_mip: u32,
    pub min_stroke_samples: usize,
    pub spacing_factor: f32,
    pub brush_softness: f32,
    pub smoothing_warmup: usize,
}
impl Default for Settings {
    fn default() -> Self {
        Self {
            working_resolution: 2048,
            ladder: Ladder::DEFAULT,
            snapshot_capacity: 10,
            snapshot_interval: 5,
            frames_in_flight: 2,
            switch_debounce_ms: 300,
            upgrade_chain_delay_ms: 100,
            mip_stream_step_ms: 16,
            initial_streamed_mip: 4,
            min_stroke_samples: 10,
            spacing_factor: 0.25,
            brush_softness: 1.0,
            smoothing_warmup: 3,
        }
    }
}
impl Settings {
    const FILENAME: &'static str = "engine.toml";
    /// Settings sized for tests: a tiny ladder and canvas, and short delays.
    #[must_use]
    pub fn small() -> Self {
        Self {
            working_resolution: 32,
            // Unwrap OK - constant, strictly increasing.
            ladder: Ladder::new([4, 8, 16, 32]).unwrap(),
            switch_debounce_ms: 20,
            upgrade_chain_delay_ms: 5,
            mip_stream_step_ms: 2,
            initial_streamed_mip: 4,
            ..Self::default()
        }
    }
    pub fn validate(&self) -> Result<(), SettingsError> {
        // Re-check, as the ladder may have been built by hand.
        Ladder::new(self.ladder.into())?;
        if self.working_resolution == 0 {
            return Err(SettingsError::ZeroResolution);
        }
        if self.snapshot_capacity == 0 || self.snapshot_interval == 0 {
            return Err(SettingsError::ZeroSnapshots);
        }
        if !self.spacing_factor.is_finite() || self.spacing_factor <= 0.0 {
            return Err(SettingsError::BadSpacing);
        }
        Ok(())
    }
    pub fn switch_debounce(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.switch_debounce_ms)
    }
    pub fn upgrade_chain_delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.upgrade_chain_delay_ms)
    }
    pub fn mip_stream_step(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.mip_stream_step_ms)
    }
    /// Settings from the user's preferences, or defaulted if missing or invalid.
    #[must_use]
    pub fn load() -> Self {
        let mut dir = preferences_dir();
        match dir.as_mut() {
            None => {
                log::warn!("Preferences dir unavailable, using default settings.");
                Self::default()
            }
            Some(dir) => {
                dir.push(Self::FILENAME);
                Self::load_or_default(dir)
            }
        }
    }
    #[must_use]
    fn load_or_default(path: &std::path::Path) -> Self {
        let settings: anyhow::Result<Self> = try_block::try_block! {
            let string = std::fs::read_to_string(path)?;
            let settings = Self::from_toml(&string)?;
            Ok(settings)
        };
        match settings {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!("Failed to load settings from {path:?}, defaulting:\n{e:?}");
                Self::default()
            }
        }
    }
    pub fn from_toml(string: &str) -> anyhow::Result<Self> {
        let settings: Self = toml::from_str(string)?;
        settings.validate()?;
        Ok(settings)
    }
    pub fn to_toml(&self) -> anyhow::Result<String> {
        let string = toml::ser::to_string_pretty(self)?;
        Ok(DOCUMENTATION.to_owned() + &string)
    }
    pub fn save(&self) -> anyhow::Result<()> {
        let mut preferences =
            preferences_dir().ok_or_else(|| anyhow::anyhow!("No preferences dir found"))?;
        // Explicity do *not* create recursively. If not found, the user probably has a good reason.
        // Ignore errors (could already exist). Any real errors will be emitted by file access below.
        let _ = std::fs::DirBuilder::new().create(&preferences);

        preferences.push(Self::FILENAME);
        std::fs::write(preferences, self.to_toml()?)?;
        Ok(())
    }
}

#[must_use]
pub fn preferences_dir() -> Option<std::path::PathBuf> {
    let mut base_dir = dirs::preference_dir()?;
    base_dir.push(env!("CARGO_PKG_NAME"));
    Some(base_dir)
}

#[cfg(test)]
mod test {
    use super::{Settings, SettingsError};
    use celpaint_core::tier::Ladder;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(Settings::default().validate(), Ok(()));
        assert_eq!(Settings::small().validate(), Ok(()));
        assert_eq!(Settings::default().ladder, Ladder::DEFAULT);
    }
    #[test]
    fn toml_round_trip_with_docs() {
        let settings = Settings::small();
        let string = settings.to_toml().unwrap();
        assert!(string.starts_with("# Celpaint"));
        assert_eq!(Settings::from_toml(&string).unwrap(), settings);
    }
    #[test]
    fn partial_and_invalid() {
        let partial = Settings::from_toml("snapshot_interval = 3").unwrap();
        assert_eq!(partial.snapshot_interval, 3);
        assert_eq!(partial.snapshot_capacity, 10);
        assert!(Settings::from_toml("ladder = [32, 16, 512, 2048]").is_err());
        assert!(Settings::from_toml("snapshot_capacity = 0").is_err());
        let zero = Settings {
            working_resolution: 0,
            ..Settings::default()
        };
        assert_eq!(zero.validate(), Err(SettingsError::ZeroResolution));
    }
}
