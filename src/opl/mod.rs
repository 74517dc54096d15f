//! OPL chip register layout
//!
//! Register addresses, masks and the channel/operator offset arithmetic shared
//! by OPL2, dual OPL2 and OPL3 chips. Registers at 0x100 and above address the
//! second register set (OPL3 channels 9-17, or the second chip of a dual OPL2).

pub mod registers;
pub mod rhythm;

pub use registers::RegisterShadow;
pub use rhythm::RhythmFlags;

use crate::instrument::RhythmType;
use serde::{Deserialize, Serialize};

/// OPL chip variant driven by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OplType {
    /// Single OPL2 (YM3812), 9 channels
    #[default]
    Opl2,
    /// Two OPL2 chips; the driver mirrors global registers to the second chip
    DualOpl2,
    /// OPL3 (YMF262), 18 channels and stereo panning
    Opl3,
}

impl OplType {
    /// Number of physical 2-operator channels
    pub fn channel_count(self) -> usize {
        match self {
            OplType::Opl2 => OPL2_NUM_CHANNELS,
            OplType::DualOpl2 | OplType::Opl3 => OPL3_NUM_CHANNELS,
        }
    }

    /// Melodic channels available for the given rhythm mode state
    pub fn melodic_channels(self, rhythm_mode: bool) -> &'static [u8] {
        match (self, rhythm_mode) {
            (OplType::Opl2 | OplType::DualOpl2, false) => &MELODIC_CHANNELS_OPL2,
            (OplType::Opl2 | OplType::DualOpl2, true) => &MELODIC_CHANNELS_OPL2_RHYTHM,
            (OplType::Opl3, false) => &MELODIC_CHANNELS_OPL3,
            (OplType::Opl3, true) => &MELODIC_CHANNELS_OPL3_RHYTHM,
        }
    }
}

/// Channels on an OPL2 chip
pub const OPL2_NUM_CHANNELS: usize = 9;
/// Channels on an OPL3 chip
pub const OPL3_NUM_CHANNELS: usize = 18;

/// Test / waveform select enable register
pub const OPL_REGISTER_TEST: u16 = 0x01;
/// Timer 1 count
pub const OPL_REGISTER_TIMER1: u16 = 0x02;
/// Timer 2 count
pub const OPL_REGISTER_TIMER2: u16 = 0x03;
/// Timer control / IRQ reset
pub const OPL_REGISTER_TIMERCONTROL: u16 = 0x04;
/// Note select and CSM mode
pub const OPL_REGISTER_NOTESELECT_CSM: u16 = 0x08;
/// Rhythm mode, AM and vibrato depth
pub const OPL_REGISTER_RHYTHM: u16 = 0xBD;

/// Operator base: tremolo, vibrato, sustain, KSR, frequency multiplier
pub const OPL_REGISTER_BASE_FREQMULT_MISC: u16 = 0x20;
/// Operator base: key scale level and output level
pub const OPL_REGISTER_BASE_LEVEL: u16 = 0x40;
/// Operator base: attack and decay rate
pub const OPL_REGISTER_BASE_DECAY_ATTACK: u16 = 0x60;
/// Operator base: sustain level and release rate
pub const OPL_REGISTER_BASE_RELEASE_SUSTAIN: u16 = 0x80;
/// Operator base: waveform select
pub const OPL_REGISTER_BASE_WAVEFORMSELECT: u16 = 0xE0;

/// Channel base: F-num low byte
pub const OPL_REGISTER_BASE_FNUMLOW: u16 = 0xA0;
/// Channel base: key on, block, F-num high bits
pub const OPL_REGISTER_BASE_FNUMHIGH_BLOCK_KEYON: u16 = 0xB0;
/// Channel base: panning, feedback and connection
pub const OPL_REGISTER_BASE_CONNECTION_FEEDBACK_PANNING: u16 = 0xC0;

/// OPL3 4-operator connection select
pub const OPL3_REGISTER_CONNECTIONSELECT: u16 = 0x104;
/// OPL3 "new" mode enable
pub const OPL3_REGISTER_NEW: u16 = 0x105;

/// Offset of the second register set
pub const OPL_REGISTER_SET_2_OFFSET: u16 = 0x100;

/// Output level bits of the level register
pub const OPL_MASK_LEVEL: u8 = 0x3F;
/// Block and F-num high bits of the Bx register
pub const OPL_MASK_FNUMHIGH_BLOCK: u8 = 0x1F;
/// Key on bit of the Bx register
pub const OPL_MASK_KEYON: u8 = 0x20;
/// Panning bits of the Cx register (OPL3)
pub const OPL_MASK_PANNING: u8 = 0x30;

/// Both speakers
pub const OPL_PANNING_CENTER: u8 = 0x30;
/// Left speaker only
pub const OPL_PANNING_LEFT: u8 = 0x10;
/// Right speaker only
pub const OPL_PANNING_RIGHT: u8 = 0x20;

/// Operator register offsets of the rhythm instruments, indexed by
/// `RhythmType::index` (hi-hat, cymbal, tom-tom, snare, bass drum).
pub const OPL_REGISTER_RHYTHM_OFFSETS: [u16; 5] = [0x11, 0x15, 0x12, 0x14, 0x10];
/// Channel used for the frequency of each rhythm instrument
pub const OPL_RHYTHM_INSTRUMENT_CHANNELS: [u8; 5] = [7, 8, 8, 7, 6];

/// Melodic channels of an OPL2
pub const MELODIC_CHANNELS_OPL2: [u8; 9] = [0, 1, 2, 3, 4, 5, 6, 7, 8];
/// Melodic channels of an OPL2 in rhythm mode
pub const MELODIC_CHANNELS_OPL2_RHYTHM: [u8; 6] = [0, 1, 2, 3, 4, 5];
/// Melodic channels of an OPL3
pub const MELODIC_CHANNELS_OPL3: [u8; 18] =
    [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17];
/// Melodic channels of an OPL3 in rhythm mode
pub const MELODIC_CHANNELS_OPL3_RHYTHM: [u8; 15] =
    [0, 1, 2, 3, 4, 5, 9, 10, 11, 12, 13, 14, 15, 16, 17];

/// Offset of an operator register relative to the operator base registers
/// (0x20, 0x40, 0x60, 0x80, 0xE0).
///
/// Rhythm instruments use fixed operator slots regardless of `opl_channel`.
/// 4-operator instruments are only valid on channels 0-5.
pub fn operator_register_offset(
    opl_channel: u8,
    operator: u8,
    rhythm_type: Option<RhythmType>,
    four_operator: bool,
) -> u16 {
    debug_assert!(four_operator || operator < 2);

    if let Some(rhythm) = rhythm_type {
        let mut offset = OPL_REGISTER_RHYTHM_OFFSETS[rhythm.index()];
        if rhythm == RhythmType::BassDrum && operator == 1 {
            // Bass drum is the only rhythm instrument with a second operator
            offset += 3;
        }
        return offset;
    }

    debug_assert!(!four_operator || opl_channel < 6);
    let channel = opl_channel as u16;
    let operator = operator as u16;
    if four_operator {
        // Operators 0-3 of channel n (mod 3) at n, n+3, n+8, n+11
        (channel / 3) * OPL_REGISTER_SET_2_OFFSET + operator / 2 * 8 + (operator % 2) * 3 + channel % 3
    } else {
        // Channel groups of 3 are spaced 8 apart, operator 1 sits 3 above operator 0
        (channel / 9) * OPL_REGISTER_SET_2_OFFSET + (channel % 9) / 3 * 8 + (channel % 9) % 3 + operator * 3
    }
}

/// Offset of a channel register relative to the channel base registers
/// (0xA0, 0xB0, 0xC0).
pub fn channel_register_offset(opl_channel: u8, four_operator: bool) -> u16 {
    debug_assert!(!four_operator || opl_channel < 6);

    let per_set: u16 = if four_operator { 3 } else { 9 };
    let channel = opl_channel as u16;
    (channel / per_set) * OPL_REGISTER_SET_2_OFFSET + channel % per_set
}
