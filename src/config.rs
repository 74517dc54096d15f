//! Driver configuration
//!
//! [`DriverConfig`] collects the settings a game-specific driver chooses at
//! construction time. It can be built in code or loaded from JSON:
//!
//! ```json
//! { "opl_type": "opl3", "accuracy_mode": "gm", "allocation_mode": "static" }
//! ```
//!
//! Missing fields take the Windows 95 SB16 driver defaults.

use std::path::Path;

use num_derive::FromPrimitive;
use serde::{Deserialize, Serialize};

use crate::opl::OplType;
use crate::{AdlibError, Result};

/// Default timer callback frequency in Hz
pub const DEFAULT_CALLBACK_FREQUENCY: u32 = 250;

/// Algorithm set used for frequency, pitch bend and volume
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, FromPrimitive, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum AccuracyMode {
    /// Reproduce the Windows 95 Sound Blaster 16 driver
    #[default]
    Sb16Win95 = 0,
    /// Follow General MIDI more closely
    Gm = 1,
}

/// OPL channel allocation strategy
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, FromPrimitive, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum AllocationMode {
    /// Every note picks the best free channel
    #[default]
    Dynamic = 0,
    /// Each MIDI channel of each source is pinned to one OPL channel
    Static = 1,
}

/// When instrument registers are written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentWriteMode {
    /// On every note on
    #[default]
    NoteOn,
    /// On program change, to the statically allocated channel
    ProgramChange,
}

/// Keyboard split note select (bit 6 of register 0x08)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteSelect {
    /// Split on F-num bit 9
    #[default]
    Mode0,
    /// Split on F-num bit 8
    Mode1,
}

impl NoteSelect {
    /// Register 0x08 value
    pub fn to_register(self) -> u8 {
        match self {
            NoteSelect::Mode0 => 0x00,
            NoteSelect::Mode1 => 0x40,
        }
    }
}

/// AM (tremolo) depth
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModulationDepth {
    /// 1 dB
    Low,
    /// 4.8 dB
    #[default]
    High,
}

/// Vibrato depth
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VibratoDepth {
    /// 7 cents
    Low,
    /// 14 cents
    #[default]
    High,
}

/// Settings readable and writable through [`crate::AdlibMultisource::property`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Property {
    /// Scale source volumes by the user music/SFX volume (0 or 1)
    UserVolumeScaling,
    /// [`AccuracyMode`] as its numeric value
    AccuracyMode,
    /// [`AllocationMode`] as its numeric value
    ChannelAllocationMode,
    /// Ignore note offs on the rhythm channel in rhythm mode (0 or 1)
    RhythmModeIgnoreNoteOff,
}

/// Parameter value that queries a property instead of setting it
pub const PROPERTY_QUERY: u32 = 0xFFFF;

/// Construction-time driver settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Chip type the backend must provide
    pub opl_type: OplType,
    /// Timer callback frequency in Hz
    pub timer_frequency: u32,
    /// Frequency/volume algorithm set
    pub accuracy_mode: AccuracyMode,
    /// Channel allocation strategy
    pub allocation_mode: AllocationMode,
    /// When instrument registers are written
    pub instrument_write_mode: InstrumentWriteMode,
    /// Rhythm notes are only ended by new notes on the same rhythm slot
    pub rhythm_mode_ignore_note_offs: bool,
    /// Treat MIDI channel 10 as a melodic channel
    pub channel10_melodic: bool,
    /// Initial MIDI channel volume (0-127)
    pub default_channel_volume: u8,
    /// Keyboard split note select
    pub note_select: NoteSelect,
    /// AM depth
    pub modulation_depth: ModulationDepth,
    /// Vibrato depth
    pub vibrato_depth: VibratoDepth,
    /// Scale source volumes by the user volume settings
    pub user_volume_scaling: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        DriverConfig {
            opl_type: OplType::Opl2,
            timer_frequency: DEFAULT_CALLBACK_FREQUENCY,
            accuracy_mode: AccuracyMode::Sb16Win95,
            allocation_mode: AllocationMode::Dynamic,
            instrument_write_mode: InstrumentWriteMode::NoteOn,
            rhythm_mode_ignore_note_offs: false,
            channel10_melodic: false,
            default_channel_volume: 0,
            note_select: NoteSelect::Mode0,
            modulation_depth: ModulationDepth::High,
            vibrato_depth: VibratoDepth::High,
            user_volume_scaling: false,
        }
    }
}

impl DriverConfig {
    /// Default settings for another chip type
    pub fn for_opl_type(opl_type: OplType) -> Self {
        DriverConfig {
            opl_type,
            ..Self::default()
        }
    }

    /// Timer period in microseconds
    pub fn timer_rate(&self) -> u32 {
        1_000_000 / self.timer_frequency.max(1)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if self.timer_frequency == 0 || self.timer_frequency > 1_000_000 {
            return Err(AdlibError::ConfigError(format!(
                "timer frequency must be between 1 and 1000000 Hz, got {}",
                self.timer_frequency
            )));
        }
        if self.default_channel_volume > 0x7F {
            return Err(AdlibError::ConfigError(format!(
                "default channel volume must be a MIDI value, got {}",
                self.default_channel_volume
            )));
        }
        Ok(())
    }

    /// Parse and validate a JSON configuration
    pub fn from_json(json: &str) -> Result<Self> {
        let config: DriverConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}
