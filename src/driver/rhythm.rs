//! OPL rhythm mode
//!
//! In rhythm mode OPL channels 6-8 stop playing melodic notes and drive the
//! five percussion instruments instead. Notes on MIDI channel 10 key them
//! through the rhythm register (0xBD). Snare drum and hi-hat share the
//! frequency of channel 7, tom-tom and cymbal that of channel 8; the most
//! recently played instrument of a pair sets it.

use crate::backend::OplBackend;
use crate::config::DriverConfig;
use crate::instrument::RhythmType;

use super::allocator::AllocationTable;
use super::calculator::DriverStrategy;
use super::notes::NoteSlot;
use super::voices::{Env, VoiceState};

/// OPL channels taken over by the rhythm instruments
const RHYTHM_OPL_CHANNELS: std::ops::RangeInclusive<u8> = 6..=8;

impl<B: OplBackend> VoiceState<B> {
    /// Switch rhythm mode on or off.
    ///
    /// Turning it on ends the notes on channels 6-8 and drops any static
    /// allocation of those channels. Turning it off silences the rhythm
    /// instruments.
    pub fn set_rhythm_mode(
        &mut self,
        config: &DriverConfig,
        allocations: &mut AllocationTable,
        rhythm_mode: bool,
    ) {
        if self.notes.rhythm_mode() == rhythm_mode {
            return;
        }

        if rhythm_mode {
            for opl_channel in RHYTHM_OPL_CHANNELS {
                if self.notes.melodic(opl_channel).note_active {
                    self.write_key_off(config, NoteSlot::Melodic(opl_channel), false);
                }
                allocations.release_opl_channel(opl_channel);
                self.notes.melodic_mut(opl_channel).reset();
            }
            self.notes.reset_rhythm_notes();
        } else {
            self.notes.deactivate_rhythm_notes();
        }

        log::debug!("Rhythm mode {}", if rhythm_mode { "on" } else { "off" });
        self.notes.set_rhythm_mode(rhythm_mode);
        self.notes.determine_melodic_channels(config.opl_type);
        self.write_rhythm(config, false);
    }

    /// Rewrite the frequencies of the rhythm instruments played by a source
    pub fn recalculate_rhythm_frequencies<S: DriverStrategy + ?Sized>(
        &mut self,
        env: &Env<'_, S>,
        source: u8,
    ) {
        let playing = |voices: &Self, rhythm_type: RhythmType| {
            let note = voices.notes.rhythm(rhythm_type);
            note.note_active && note.source == Some(source)
        };

        // Bass drum has a channel of its own
        if playing(self, RhythmType::BassDrum) {
            self.write_frequency(env, NoteSlot::Rhythm(RhythmType::BassDrum));
        }

        for (first, second) in [
            (RhythmType::SnareDrum, RhythmType::HiHat),
            (RhythmType::TomTom, RhythmType::Cymbal),
        ] {
            let latest = match (playing(self, first), playing(self, second)) {
                (true, true) => {
                    let first_counter = self.notes.rhythm(first).note_counter_value;
                    let second_counter = self.notes.rhythm(second).note_counter_value;
                    Some(if first_counter >= second_counter { first } else { second })
                }
                (true, false) => Some(first),
                (false, true) => Some(second),
                (false, false) => None,
            };
            if let Some(rhythm_type) = latest {
                self.write_frequency(env, NoteSlot::Rhythm(rhythm_type));
            }
        }
    }

    /// Silence the rhythm instruments, optionally only those of one source
    pub fn stop_rhythm_notes(&mut self, config: &DriverConfig, source: Option<u8>) {
        let mut changed = false;
        for rhythm_type in RhythmType::ALL {
            let note = self.notes.rhythm_mut(rhythm_type);
            if note.note_active && note.matches(source, None) {
                note.note_active = false;
                changed = true;
            }
        }
        if changed {
            self.write_rhythm(config, false);
        }
    }
}
