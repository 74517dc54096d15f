//! OPL instrument definitions
//!
//! An instrument is a set of 2 or 4 operator register images plus the
//! connection/feedback byte(s). Rhythm instruments additionally name the OPL
//! rhythm slot they play on and the note used for their pitch.
//!
//! [`InstrumentBanks`] holds the active melodic and rhythm banks and resolves
//! the instrument for a MIDI note.

mod bank;

pub use bank::{GS_RHYTHM_FIRST_NOTE, GS_RHYTHM_LAST_NOTE, OPL_INSTRUMENT_BANK, OPL_RHYTHM_BANK};

use std::borrow::Cow;

use num_derive::FromPrimitive;
use serde::{Deserialize, Serialize};

use crate::midi::MIDI_RHYTHM_CHANNEL;
use crate::{AdlibError, Result};

/// Register image of a single operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OplInstrumentOperatorDefinition {
    /// Tremolo, vibrato, sustain, KSR and frequency multiplier (0x20)
    pub freq_mult_misc: u8,
    /// Key scale level and output level (0x40)
    pub level: u8,
    /// Attack and decay rate (0x60)
    pub decay_attack: u8,
    /// Sustain level and release rate (0x80)
    pub release_sustain: u8,
    /// Waveform select (0xE0)
    pub waveform_select: u8,
}

impl OplInstrumentOperatorDefinition {
    /// Operator with all registers zero
    pub const EMPTY: Self = Self::from_registers([0; 5]);

    /// Build an operator from its five register values in register order
    /// (0x20, 0x40, 0x60, 0x80, 0xE0).
    pub const fn from_registers(registers: [u8; 5]) -> Self {
        OplInstrumentOperatorDefinition {
            freq_mult_misc: registers[0],
            level: registers[1],
            decay_attack: registers[2],
            release_sustain: registers[3],
            waveform_select: registers[4],
        }
    }

    /// True if every register value is zero
    pub fn is_empty(&self) -> bool {
        *self == Self::EMPTY
    }
}

/// OPL rhythm mode instrument slot
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, FromPrimitive, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum RhythmType {
    /// Hi-hat (channel 7, operator 0)
    HiHat = 1,
    /// Top cymbal (channel 8, operator 1)
    Cymbal = 2,
    /// Tom-tom (channel 8, operator 0)
    TomTom = 3,
    /// Snare drum (channel 7, operator 1)
    SnareDrum = 4,
    /// Bass drum (channel 6, both operators)
    BassDrum = 5,
}

impl RhythmType {
    /// All rhythm types in register bit order
    pub const ALL: [RhythmType; 5] = [
        RhythmType::HiHat,
        RhythmType::Cymbal,
        RhythmType::TomTom,
        RhythmType::SnareDrum,
        RhythmType::BassDrum,
    ];

    /// Zero-based slot index (also the key on bit position in 0xBD)
    pub fn index(self) -> usize {
        self as usize - 1
    }

    /// Rhythm type for a zero-based slot index
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }
}

/// Complete OPL instrument
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OplInstrumentDefinition {
    /// Uses 4 operators (OPL3 channels 0-5 only)
    #[serde(default)]
    pub four_operator: bool,
    /// Operator register images; slots 2 and 3 only used by 4-operator instruments
    pub operators: [OplInstrumentOperatorDefinition; 4],
    /// Connection/feedback bytes for 0xC0 (second byte for 4-operator instruments)
    pub connection_feedback: [u8; 2],
    /// Note played when this is a rhythm instrument
    #[serde(default)]
    pub rhythm_note: u8,
    /// Rhythm slot, `None` for melodic instruments
    #[serde(default)]
    pub rhythm_type: Option<RhythmType>,
}

impl OplInstrumentDefinition {
    /// Instrument without any operator data; never produces a note
    pub const EMPTY: Self = OplInstrumentDefinition {
        four_operator: false,
        operators: [OplInstrumentOperatorDefinition::EMPTY; 4],
        connection_feedback: [0; 2],
        rhythm_note: 0,
        rhythm_type: None,
    };

    /// Number of operators this instrument drives
    pub fn operator_count(&self) -> u8 {
        match self.rhythm_type {
            None if self.four_operator => 4,
            None => 2,
            Some(RhythmType::BassDrum) => 2,
            Some(_) => 1,
        }
    }

    /// Operator definition by index
    pub fn operator(&self, operator: u8) -> &OplInstrumentOperatorDefinition {
        debug_assert!(operator < if self.four_operator { 4 } else { 2 });
        &self.operators[operator as usize & 3]
    }

    /// True if all operators this instrument uses are empty
    pub fn is_empty(&self) -> bool {
        self.operators[..self.operator_count() as usize]
            .iter()
            .all(OplInstrumentOperatorDefinition::is_empty)
    }

    /// Whether note velocity, channel volume and source volume apply to an
    /// operator. Carriers and additive operators are scaled; modulators keep
    /// the instrument level.
    pub fn is_volume_scaled(&self, operator: u8) -> bool {
        match self.rhythm_type {
            Some(rhythm_type) => rhythm_type != RhythmType::BassDrum || operator == 1,
            None if self.four_operator => {
                let connection = (self.connection_feedback[0] & 0x01)
                    | ((self.connection_feedback[1] & 0x01) << 1);
                match connection {
                    // 4FM
                    0 => operator == 3,
                    // 1ADD+3FM
                    1 => operator == 0 || operator == 3,
                    // 2FM+2FM
                    2 => operator == 1 || operator == 3,
                    // 1ADD+2FM+1ADD
                    _ => operator == 0 || operator == 2 || operator == 3,
                }
            }
            None => (self.connection_feedback[0] & 0x01) == 0x01 || operator == 1,
        }
    }

    /// The instrument as played on a melodic channel. Channels run in
    /// 2-operator mode, so a 4-operator instrument keeps its first pair.
    pub fn to_melodic(mut self) -> Self {
        self.rhythm_type = None;
        self.four_operator = false;
        self
    }
}

impl Default for OplInstrumentDefinition {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// Instrument resolved for a note
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstrumentInfo {
    /// Program number, or 0x80 | note for rhythm bank instruments
    pub instrument_id: u8,
    /// Copy of the instrument definition
    pub definition: OplInstrumentDefinition,
    /// Note to play; the instrument rhythm note for rhythm bank instruments
    pub opl_note: u8,
}

/// Active melodic and rhythm banks
#[derive(Debug, Clone)]
pub struct InstrumentBanks {
    melodic: Cow<'static, [OplInstrumentDefinition]>,
    rhythm: Cow<'static, [OplInstrumentDefinition]>,
    rhythm_first_note: u8,
    rhythm_last_note: u8,
    remapping: Option<Cow<'static, [u8]>>,
}

impl Default for InstrumentBanks {
    /// Windows 95 SB16 driver banks covering the GS percussion range
    fn default() -> Self {
        InstrumentBanks {
            melodic: Cow::Borrowed(&OPL_INSTRUMENT_BANK[..]),
            rhythm: Cow::Borrowed(&OPL_RHYTHM_BANK[..]),
            rhythm_first_note: GS_RHYTHM_FIRST_NOTE,
            rhythm_last_note: GS_RHYTHM_LAST_NOTE,
            remapping: None,
        }
    }
}

impl InstrumentBanks {
    /// Replace the melodic bank
    pub fn set_melodic(&mut self, bank: impl Into<Cow<'static, [OplInstrumentDefinition]>>) {
        self.melodic = bank.into();
    }

    /// Replace the rhythm bank. Entry 0 plays `first_note`; notes above
    /// `last_note` (inclusive bound) have no instrument.
    pub fn set_rhythm(
        &mut self,
        bank: impl Into<Cow<'static, [OplInstrumentDefinition]>>,
        first_note: u8,
        last_note: u8,
    ) -> Result<()> {
        let bank = bank.into();
        if last_note < first_note || (last_note - first_note) as usize >= bank.len() {
            return Err(AdlibError::ConfigError(format!(
                "rhythm bank of {} entries cannot cover notes {}..={}",
                bank.len(),
                first_note,
                last_note
            )));
        }
        self.rhythm = bank;
        self.rhythm_first_note = first_note;
        self.rhythm_last_note = last_note;
        Ok(())
    }

    /// Set or clear a program remapping table applied before melodic lookup
    pub fn set_remapping(&mut self, remapping: Option<Cow<'static, [u8]>>) {
        self.remapping = remapping;
    }

    /// Note range covered by the rhythm bank
    pub fn rhythm_range(&self) -> (u8, u8) {
        (self.rhythm_first_note, self.rhythm_last_note)
    }

    /// Melodic bank entry for a program, after remapping
    pub fn melodic(&self, program: u8) -> Option<(u8, &OplInstrumentDefinition)> {
        let program = match &self.remapping {
            Some(table) => *table.get(program as usize)?,
            None => program,
        };
        self.melodic.get(program as usize).map(|def| (program, def))
    }

    /// Rhythm bank entry for a note
    pub fn rhythm(&self, note: u8) -> Option<&OplInstrumentDefinition> {
        if note < self.rhythm_first_note || note > self.rhythm_last_note {
            return None;
        }
        self.rhythm.get((note - self.rhythm_first_note) as usize)
    }

    /// Resolve the instrument for a note on a MIDI channel.
    ///
    /// Unless channel 10 is melodic, MIDI channel 9 selects rhythm bank
    /// instruments by note; other channels use the current program.
    pub fn determine(
        &self,
        channel: u8,
        program: u8,
        note: u8,
        channel10_melodic: bool,
    ) -> Option<InstrumentInfo> {
        if !channel10_melodic && channel == MIDI_RHYTHM_CHANNEL {
            let Some(definition) = self.rhythm(note) else {
                log::warn!("No rhythm instrument for note {:#04X}", note);
                return None;
            };
            Some(InstrumentInfo {
                instrument_id: 0x80 | note,
                definition: *definition,
                opl_note: definition.rhythm_note,
            })
        } else {
            let Some((instrument_id, definition)) = self.melodic(program) else {
                log::warn!("No melodic instrument for program {}", program);
                return None;
            };
            Some(InstrumentInfo {
                instrument_id,
                definition: *definition,
                opl_note: note,
            })
        }
    }
}

/// Parse an instrument bank from a JSON array of definitions
pub fn bank_from_json(json: &str) -> Result<Vec<OplInstrumentDefinition>> {
    Ok(serde_json::from_str(json)?)
}
