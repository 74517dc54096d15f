//! Multisource volume layer
//!
//! The driver plays up to [`MAXIMUM_SOURCES`] independent MIDI streams at once
//! (for example a music track and several sound effects). Each source carries
//! its own volume relative to a neutral volume, and can fade linearly towards
//! a target volume over time. User volume settings (music, SFX, mute) are
//! optionally applied on top.

mod mixer;

pub use mixer::SourceMixer;

use serde::{Deserialize, Serialize};

/// Number of sources the driver can play simultaneously
pub const MAXIMUM_SOURCES: usize = 10;
/// Default neutral source volume
pub const DEFAULT_SOURCE_NEUTRAL_VOLUME: u16 = 255;
/// Minimum time between fade volume updates in microseconds
pub const FADING_DELAY: u32 = 25_000;
/// Default user music and SFX volume
pub const DEFAULT_USER_VOLUME: u16 = 192;
/// Maximum user volume (unity gain)
pub const MAXIMUM_USER_VOLUME: u16 = 256;

/// Kind of content a source plays; selects the user volume that applies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// Not specified; treated as music
    #[default]
    Undefined,
    /// Background music
    Music,
    /// Sound effect
    Sfx,
}

/// Volume a source ends at when its fade is aborted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FadeAbortType {
    /// Jump to the fade target volume
    EndVolume,
    /// Keep the volume reached so far
    CurrentVolume,
    /// Return to the volume the fade started at
    StartVolume,
}

/// User volume settings from the application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserVolumeSettings {
    /// Music volume (0-256)
    pub music_volume: u16,
    /// Sound effect volume (0-256)
    pub sfx_volume: u16,
    /// Silence all sources
    pub mute: bool,
}

impl Default for UserVolumeSettings {
    fn default() -> Self {
        UserVolumeSettings {
            music_volume: DEFAULT_USER_VOLUME,
            sfx_volume: DEFAULT_USER_VOLUME,
            mute: false,
        }
    }
}

impl UserVolumeSettings {
    /// User volume applying to a source type
    pub fn volume_for(&self, source_type: SourceType) -> u16 {
        match source_type {
            SourceType::Sfx => self.sfx_volume,
            SourceType::Music | SourceType::Undefined => self.music_volume,
        }
    }

    /// Clip volumes to the supported range
    pub fn clipped(self) -> Self {
        UserVolumeSettings {
            music_volume: self.music_volume.min(MAXIMUM_USER_VOLUME),
            sfx_volume: self.sfx_volume.min(MAXIMUM_USER_VOLUME),
            mute: self.mute,
        }
    }
}

/// Volume state of one source as seen by the volume calculation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLevel {
    /// Source type
    pub source_type: SourceType,
    /// Current volume
    pub volume: u16,
    /// Volume at which notes play at their unscaled level
    pub neutral_volume: u16,
}

impl Default for SourceLevel {
    fn default() -> Self {
        SourceLevel {
            source_type: SourceType::Undefined,
            volume: DEFAULT_SOURCE_NEUTRAL_VOLUME,
            neutral_volume: DEFAULT_SOURCE_NEUTRAL_VOLUME,
        }
    }
}

/// Copy of all volume inputs, taken so register writes can proceed without
/// holding the mixer lock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceLevels {
    /// Per-source levels
    pub sources: [SourceLevel; MAXIMUM_SOURCES],
    /// User volume settings
    pub user: UserVolumeSettings,
    /// Whether user volume settings apply
    pub user_volume_scaling: bool,
}

impl SourceLevels {
    /// Level of one source; out of range sources read as neutral
    pub fn source(&self, source: u8) -> SourceLevel {
        self.sources
            .get(source as usize)
            .copied()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_volume_for_source_type() {
        let settings = UserVolumeSettings {
            music_volume: 100,
            sfx_volume: 50,
            mute: false,
        };
        assert_eq!(settings.volume_for(SourceType::Sfx), 50);
        assert_eq!(settings.volume_for(SourceType::Music), 100);
        assert_eq!(settings.volume_for(SourceType::Undefined), 100);
    }

    #[test]
    fn test_user_volume_clipped() {
        let settings = UserVolumeSettings {
            music_volume: 1000,
            sfx_volume: 10,
            mute: true,
        }
        .clipped();
        assert_eq!(settings.music_volume, MAXIMUM_USER_VOLUME);
        assert_eq!(settings.sfx_volume, 10);
        assert!(settings.mute);
    }
}
