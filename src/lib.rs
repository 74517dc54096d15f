//! Multisource MIDI driver for OPL2/OPL3 FM synthesis chips
//!
//! Translates MIDI channel-voice messages from up to ten independent sources
//! (music tracks, sound effects) into register writes for a Yamaha OPL2, dual
//! OPL2 or OPL3 chip. The chip itself (hardware or emulator) is supplied by the
//! caller through the [`OplBackend`] trait.
//!
//! # Features
//! - Dynamic or static OPL channel allocation
//! - Frequency, volume and panning calculation reproducing the Windows 95
//!   Sound Blaster 16 driver, or a more accurate General MIDI mode
//! - OPL rhythm mode (bass drum, snare, tom-tom, cymbal, hi-hat)
//! - Per-source volume with linear fades driven by the backend timer
//! - Register shadowing to suppress redundant chip writes
//! - Built-in General MIDI instrument banks (SB16 Win95 driver)
//!
//! # Quick start
//! ```no_run
//! use std::sync::Arc;
//! use opl_multisource::{AdlibMultisource, DriverConfig, RecordingBackend};
//!
//! let (backend, _handle) = RecordingBackend::new();
//! let driver = Arc::new(AdlibMultisource::new(backend, DriverConfig::default()));
//! driver.open().unwrap();
//! // Program change to piano, volume, then middle C on source 0.
//! driver.send(0, 0x00_00_C0);
//! driver.send(0, 0x00_64_07_B0);
//! driver.send(0, 0x00_7F_3C_90);
//! ```
//!
//! # Threading
//! The driver is shared as `Arc<AdlibMultisource<_>>`. Events may be sent from
//! any thread while the backend timer thread calls [`AdlibMultisource::on_timer`].

#![warn(missing_docs)]

pub mod backend; // OPL chip interface
pub mod config; // Driver configuration
pub mod driver; // Event dispatch, allocation, calculation
pub mod instrument; // Instrument definitions and banks
pub mod midi; // MIDI message decoding and controller state
pub mod multisource; // Source volumes and fades
pub mod opl; // Register layout and shadowing

use opl::OplType;

/// Error types for driver operations
#[derive(thiserror::Error, Debug)]
pub enum AdlibError {
    /// `open` was called on a driver that is already open
    #[error("Driver is already open")]
    AlreadyOpen,

    /// The backend cannot provide the requested OPL chip type
    #[error("OPL device not available: {0:?}")]
    DeviceNotAvailable(OplType),

    /// The backend failed to initialize
    #[error("Cannot connect to OPL device: {0}")]
    CannotConnect(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// IO error while loading configuration or instrument data
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed JSON configuration
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl AdlibError {
    /// Classic MIDI driver error code for open failures.
    ///
    /// Returns `None` for errors that have no driver code equivalent.
    pub fn driver_code(&self) -> Option<i32> {
        match self {
            AdlibError::DeviceNotAvailable(_) => Some(2),
            AdlibError::CannotConnect(_) => Some(3),
            AdlibError::AlreadyOpen => Some(5),
            _ => None,
        }
    }
}

impl From<String> for AdlibError {
    /// Converts a String into `AdlibError::Other`.
    ///
    /// Prefer the specific variants (`ConfigError`, `CannotConnect`) where the
    /// failure has a known category.
    fn from(msg: String) -> Self {
        AdlibError::Other(msg)
    }
}

impl From<&str> for AdlibError {
    /// Converts a string slice into `AdlibError::Other`.
    fn from(msg: &str) -> Self {
        AdlibError::Other(msg.to_string())
    }
}

/// Result type for driver operations
pub type Result<T> = std::result::Result<T, AdlibError>;

// Public API exports
pub use backend::{OplBackend, RecorderHandle, RecordingBackend, RegisterWrite, TimerCallback};
pub use config::{
    AccuracyMode, AllocationMode, DriverConfig, InstrumentWriteMode, ModulationDepth, NoteSelect,
    Property, VibratoDepth,
};
pub use driver::{
    AdlibMultisource, CalculationContext, DefaultStrategy, DriverStrategy, SourceTarget,
};
pub use instrument::{
    InstrumentBanks, InstrumentInfo, OplInstrumentDefinition, OplInstrumentOperatorDefinition,
    RhythmType, OPL_INSTRUMENT_BANK, OPL_RHYTHM_BANK,
};
pub use midi::{ControlData, ControllerDefaults, MidiMessage};
pub use multisource::{FadeAbortType, SourceType, UserVolumeSettings};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_codes() {
        assert_eq!(AdlibError::AlreadyOpen.driver_code(), Some(5));
        assert_eq!(
            AdlibError::DeviceNotAvailable(OplType::Opl3).driver_code(),
            Some(2)
        );
        assert_eq!(AdlibError::CannotConnect("x".into()).driver_code(), Some(3));
        assert_eq!(AdlibError::from("boom").driver_code(), None);
    }

    #[test]
    fn test_string_conversion() {
        let err: AdlibError = String::from("bad").into();
        assert_eq!(err.to_string(), "bad");
    }
}
