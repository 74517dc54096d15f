//! Active note table
//!
//! One entry per physical OPL channel plus one per rhythm instrument slot,
//! recording what each is playing and when it was last used.

use crate::instrument::{OplInstrumentDefinition, RhythmType};
use crate::opl::{OplType, OPL3_NUM_CHANNELS};

/// Number of OPL rhythm instruments
pub const OPL_NUM_RHYTHM_INSTRUMENTS: usize = 5;

/// Playback state of one OPL channel or rhythm slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ActiveNote {
    /// Key is on
    pub note_active: bool,
    /// Note off was received while sustain was on
    pub note_sustained: bool,
    /// MIDI note number
    pub note: u8,
    /// Note on velocity
    pub velocity: u8,
    /// MIDI channel that played the note
    pub channel: Option<u8>,
    /// Source that played the note
    pub source: Option<u8>,
    /// Note used for the frequency (differs from `note` for rhythm instruments)
    pub opl_note: u8,
    /// Last F-num/block word written (block << 10 | F-num)
    pub opl_frequency: u16,
    /// Note counter at note on or key off; 0 means the channel was never used
    pub note_counter_value: u32,
    /// Instrument id (program, or 0x80 | note for rhythm bank instruments)
    pub instrument_id: u8,
    /// Instrument written to the channel
    pub instrument_def: Option<OplInstrumentDefinition>,
    /// Channel is statically allocated to `source`/`channel`
    pub channel_allocated: bool,
}

impl ActiveNote {
    /// Return to the never-used state
    pub fn reset(&mut self) {
        *self = ActiveNote::default();
    }

    /// Whether this note was played by the given source and channel filters
    pub fn matches(&self, source: Option<u8>, channel: Option<u8>) -> bool {
        source.map_or(true, |source| self.source == Some(source))
            && channel.map_or(true, |channel| self.channel == Some(channel))
    }
}

/// Addresses an entry of the [`NoteTable`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteSlot {
    /// Melodic OPL channel
    Melodic(u8),
    /// Rhythm instrument slot
    Rhythm(RhythmType),
}

impl NoteSlot {
    /// Rhythm type of the slot, `None` for melodic channels
    pub fn rhythm_type(self) -> Option<RhythmType> {
        match self {
            NoteSlot::Melodic(_) => None,
            NoteSlot::Rhythm(rhythm_type) => Some(rhythm_type),
        }
    }
}

/// Active notes of all OPL channels and rhythm slots
#[derive(Debug, Clone)]
pub struct NoteTable {
    melodic: [ActiveNote; OPL3_NUM_CHANNELS],
    rhythm: [ActiveNote; OPL_NUM_RHYTHM_INSTRUMENTS],
    rhythm_mode: bool,
    melodic_channels: &'static [u8],
    note_counter: u32,
}

impl NoteTable {
    /// Empty table with the melodic channels of `opl_type`
    pub fn new(opl_type: OplType) -> Self {
        NoteTable {
            melodic: [ActiveNote::default(); OPL3_NUM_CHANNELS],
            rhythm: [ActiveNote::default(); OPL_NUM_RHYTHM_INSTRUMENTS],
            rhythm_mode: false,
            melodic_channels: opl_type.melodic_channels(false),
            note_counter: 1,
        }
    }

    /// Channels currently available for melodic notes
    pub fn melodic_channels(&self) -> &'static [u8] {
        self.melodic_channels
    }

    /// Recompute the melodic channel set from the chip type and rhythm mode
    pub fn determine_melodic_channels(&mut self, opl_type: OplType) {
        self.melodic_channels = opl_type.melodic_channels(self.rhythm_mode);
    }

    /// Whether rhythm mode is on
    pub fn rhythm_mode(&self) -> bool {
        self.rhythm_mode
    }

    pub(crate) fn set_rhythm_mode(&mut self, rhythm_mode: bool) {
        self.rhythm_mode = rhythm_mode;
    }

    /// Entry of an OPL channel
    pub fn melodic(&self, opl_channel: u8) -> &ActiveNote {
        &self.melodic[opl_channel as usize % OPL3_NUM_CHANNELS]
    }

    /// Mutable entry of an OPL channel
    pub fn melodic_mut(&mut self, opl_channel: u8) -> &mut ActiveNote {
        &mut self.melodic[opl_channel as usize % OPL3_NUM_CHANNELS]
    }

    /// Entry of a rhythm slot
    pub fn rhythm(&self, rhythm_type: RhythmType) -> &ActiveNote {
        &self.rhythm[rhythm_type.index()]
    }

    /// Mutable entry of a rhythm slot
    pub fn rhythm_mut(&mut self, rhythm_type: RhythmType) -> &mut ActiveNote {
        &mut self.rhythm[rhythm_type.index()]
    }

    /// Entry addressed by a slot
    pub fn slot(&self, slot: NoteSlot) -> &ActiveNote {
        match slot {
            NoteSlot::Melodic(channel) => self.melodic(channel),
            NoteSlot::Rhythm(rhythm_type) => self.rhythm(rhythm_type),
        }
    }

    /// Mutable entry addressed by a slot
    pub fn slot_mut(&mut self, slot: NoteSlot) -> &mut ActiveNote {
        match slot {
            NoteSlot::Melodic(channel) => self.melodic_mut(channel),
            NoteSlot::Rhythm(rhythm_type) => self.rhythm_mut(rhythm_type),
        }
    }

    /// Rhythm slots with their key on
    pub fn active_rhythm_types(&self) -> impl Iterator<Item = RhythmType> + '_ {
        RhythmType::ALL
            .into_iter()
            .filter(|rhythm_type| self.rhythm(*rhythm_type).note_active)
    }

    /// Current value of the global note counter
    pub fn note_counter(&self) -> u32 {
        self.note_counter
    }

    /// Take the current counter value for a new note and advance the counter
    pub fn next_note_counter(&mut self) -> u32 {
        let value = self.note_counter;
        self.note_counter = self.note_counter.wrapping_add(1).max(1);
        value
    }

    pub(crate) fn reset_note_counter(&mut self) {
        self.note_counter = 1;
    }

    pub(crate) fn reset_rhythm_notes(&mut self) {
        for note in self.rhythm.iter_mut() {
            note.reset();
        }
    }

    pub(crate) fn deactivate_rhythm_notes(&mut self) {
        for note in self.rhythm.iter_mut() {
            note.note_active = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_table() {
        let table = NoteTable::new(OplType::Opl3);
        assert_eq!(table.melodic_channels().len(), 18);
        assert_eq!(table.note_counter(), 1);
        assert!(!table.rhythm_mode());
        assert_eq!(table.melodic(17).note_counter_value, 0);
    }

    #[test]
    fn test_note_counter_skips_zero() {
        let mut table = NoteTable::new(OplType::Opl2);
        table.note_counter = u32::MAX;
        assert_eq!(table.next_note_counter(), u32::MAX);
        assert_eq!(table.next_note_counter(), 1, "0 is reserved for unused channels");
    }

    #[test]
    fn test_rhythm_mode_channels() {
        let mut table = NoteTable::new(OplType::Opl2);
        table.set_rhythm_mode(true);
        table.determine_melodic_channels(OplType::Opl2);
        assert_eq!(table.melodic_channels(), &[0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_matches_filters() {
        let note = ActiveNote {
            source: Some(2),
            channel: Some(4),
            ..ActiveNote::default()
        };
        assert!(note.matches(None, None));
        assert!(note.matches(Some(2), Some(4)));
        assert!(!note.matches(Some(1), None));
        assert!(!note.matches(None, Some(5)));
    }

    #[test]
    fn test_active_rhythm_types() {
        let mut table = NoteTable::new(OplType::Opl2);
        table.rhythm_mut(RhythmType::SnareDrum).note_active = true;
        table.rhythm_mut(RhythmType::HiHat).note_active = true;
        let active: Vec<_> = table.active_rhythm_types().collect();
        assert_eq!(active, vec![RhythmType::HiHat, RhythmType::SnareDrum]);

        table.deactivate_rhythm_notes();
        assert_eq!(table.active_rhythm_types().count(), 0);
    }
}
