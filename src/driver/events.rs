//! MIDI event dispatch
//!
//! Decoded channel messages are routed to one handler per event type. Each
//! handler takes the locks it needs for the whole event, so an event from
//! one source never interleaves with an event from another.

use crate::backend::OplBackend;
use crate::config::InstrumentWriteMode;
use crate::midi::{
    controller::{MIDI_EXPRESSION_DEFAULT, MIDI_PITCH_BEND_DEFAULT, MIDI_RPN_NULL},
    Controller, MidiMessage, MIDI_META_END_OF_TRACK, MIDI_RHYTHM_CHANNEL,
};
use crate::multisource::MAXIMUM_SOURCES;

use super::calculator::DriverStrategy;
use super::AdlibMultisource;

/// General MIDI System On: F0 7E <device> 09 01 F7, without the F0 framing
const GM_SYSTEM_ON_SUB_ID: [u8; 2] = [0x09, 0x01];
const UNIVERSAL_NON_REALTIME: u8 = 0x7E;

impl<B: OplBackend, S: DriverStrategy> AdlibMultisource<B, S> {
    /// Send a packed MIDI event from a source.
    ///
    /// Source -1 stands for "no source": note events go to source 0, other
    /// events to every source.
    pub fn send(&self, source: i8, packed: u32) {
        let Some(message) = MidiMessage::from_packed(packed) else {
            log::warn!("Ignoring MIDI data without status byte: {:06X}", packed);
            return;
        };

        if source < 0 {
            if message.is_note_event() {
                self.send_message(0, message);
            } else {
                for source in 0..MAXIMUM_SOURCES as u8 {
                    self.send_message(source, message);
                }
            }
            return;
        }
        self.send_message(source as u8, message);
    }

    /// Send a decoded MIDI event from a source
    pub fn send_message(&self, source: u8, message: MidiMessage) {
        if source as usize >= MAXIMUM_SOURCES {
            log::warn!("Ignoring event from source {}: out of range", source);
            return;
        }
        if !self.is_open() {
            log::trace!("Ignoring event while closed: {:?}", message);
            return;
        }

        match message {
            MidiMessage::NoteOff { channel, note, .. } => self.note_off(source, channel, note),
            MidiMessage::NoteOn {
                channel,
                note,
                velocity,
            } => self.note_on(source, channel, note, velocity),
            // Not part of General MIDI and not used by the SB16 driver
            MidiMessage::PolyAftertouch { .. } => {}
            MidiMessage::ControlChange {
                channel,
                controller,
                value,
            } => self.control_change(source, channel, controller, value),
            MidiMessage::ProgramChange { channel, program } => {
                self.program_change(source, channel, program)
            }
            MidiMessage::ChannelAftertouch { channel, pressure } => {
                self.voices.lock().control_mut(source, channel).channel_pressure = pressure;
            }
            MidiMessage::PitchBend { channel, lsb, msb } => {
                self.pitch_bend(source, channel, (msb as u16) << 7 | lsb as u16)
            }
            MidiMessage::System(packed) => {
                log::warn!("Ignoring system message {:02X}", packed & 0xFF);
            }
        }
    }

    /// Handle a system exclusive message (without the F0/F7 framing).
    ///
    /// Only General MIDI System On is recognized; it stops all notes, resets
    /// every controller, turns rhythm mode off and reinitializes the chip.
    pub fn sys_ex(&self, data: &[u8]) {
        if !self.is_open() {
            return;
        }
        if data.len() < 4 || data[0] != UNIVERSAL_NON_REALTIME || data[2..4] != GM_SYSTEM_ON_SUB_ID {
            log::warn!("Ignoring unrecognized SysEx message: {:02X?}", data);
            return;
        }

        log::debug!("General MIDI System On");
        let config = self.config();
        let defaults = *self.controller_defaults.read();
        let mut allocations = self.allocations.lock();
        let mut voices = self.voices.lock();

        voices.stop_all_notes(&config, true);
        voices.reset_controls();
        for channels in voices.control.iter_mut() {
            for (channel, control) in channels.iter_mut().enumerate() {
                control.volume = config.default_channel_volume;
                defaults.apply(channel, control);
            }
        }
        voices.set_rhythm_mode(&config, &mut allocations, false);
        voices.reset_melodic_notes(config.opl_type);
        allocations.clear();
        voices.notes.reset_note_counter();
        voices.init_opl(&config);
    }

    /// Handle a meta event. End of track deinitializes the source.
    pub fn meta_event(&self, source: i8, meta_type: u8, _data: &[u8]) {
        if meta_type == MIDI_META_END_OF_TRACK && source >= 0 {
            self.deinit_source(source as u8);
        }
    }

    fn note_on(&self, source: u8, channel: u8, note: u8, velocity: u8) {
        if velocity == 0 {
            self.note_off(source, channel, note);
            return;
        }

        let env = self.env();
        let mut allocations = self.allocations.lock();
        let mut voices = self.voices.lock();
        let program = voices.control(source, channel).program;
        let Some(instrument) =
            self.banks
                .read()
                .determine(channel, program, note, env.config.channel10_melodic)
        else {
            return;
        };
        voices.note_on(&env, &mut allocations, source, channel, note, velocity, instrument);
    }

    fn note_off(&self, source: u8, channel: u8, note: u8) {
        let config = self.config();
        self.voices.lock().note_off(&config, source, channel, note);
    }

    fn program_change(&self, source: u8, channel: u8, program: u8) {
        let env = self.env();
        let mut allocations = self.allocations.lock();
        let mut voices = self.voices.lock();
        voices.control_mut(source, channel).program = program;

        if env.config.instrument_write_mode != InstrumentWriteMode::ProgramChange
            || (voices.notes.rhythm_mode() && channel == MIDI_RHYTHM_CHANNEL)
        {
            return;
        }
        let Some(instrument) =
            self.banks
                .read()
                .determine(channel, program, 0, env.config.channel10_melodic)
        else {
            return;
        };
        voices.program_change(&env, &mut allocations, source, channel, instrument);
    }

    fn pitch_bend(&self, source: u8, channel: u8, pitch_bend: u16) {
        let env = self.env();
        let mut voices = self.voices.lock();
        voices.control_mut(source, channel).pitch_bend = pitch_bend;
        voices.recalculate_frequencies(&env, source, channel);
    }

    fn control_change(&self, source: u8, channel: u8, controller: u8, value: u8) {
        let Some(controller) = Controller::from_number(controller) else {
            log::trace!("Ignoring controller {:02X} on channel {}", controller, channel);
            return;
        };

        let env = self.env();
        let config = &env.config;
        let mut voices = self.voices.lock();
        match controller {
            // Stored only; the SB16 driver has no modulation effect
            Controller::Modulation => voices.control_mut(source, channel).modulation = value,
            Controller::Volume => {
                if voices.control(source, channel).volume == value {
                    return;
                }
                voices.control_mut(source, channel).volume = value;
                voices.recalculate_volumes(&env, Some(channel), Some(source));
            }
            Controller::Expression => {
                if voices.control(source, channel).expression == value {
                    return;
                }
                voices.control_mut(source, channel).expression = value;
                voices.recalculate_volumes(&env, Some(channel), Some(source));
            }
            Controller::Panning => {
                if voices.control(source, channel).panning == value {
                    return;
                }
                voices.control_mut(source, channel).panning = value;
                voices.recalculate_panning(&env, source, channel);
            }
            Controller::Sustain => {
                let sustain = value >= 0x40;
                let was_sustained = voices.control(source, channel).sustain;
                voices.control_mut(source, channel).sustain = sustain;
                if was_sustained && !sustain {
                    voices.release_sustained(config, source, channel);
                }
            }
            Controller::RpnMsb => voices.control_mut(source, channel).set_rpn(Some(value), None),
            Controller::RpnLsb => voices.control_mut(source, channel).set_rpn(None, Some(value)),
            Controller::DataEntryMsb | Controller::DataEntryLsb => {
                let (msb, lsb) = if controller == Controller::DataEntryMsb {
                    (Some(value), None)
                } else {
                    (None, Some(value))
                };
                if voices.control_mut(source, channel).data_entry(msb, lsb) {
                    voices.recalculate_frequencies(&env, source, channel);
                }
            }
            Controller::AllSoundOff => voices.stop_notes(config, Some(source), Some(channel)),
            Controller::ResetAllControllers => {
                let control = voices.control_mut(source, channel);
                let was_sustained = control.sustain;
                control.modulation = 0;
                control.expression = MIDI_EXPRESSION_DEFAULT;
                control.sustain = false;
                control.rpn = MIDI_RPN_NULL;
                control.pitch_bend = MIDI_PITCH_BEND_DEFAULT;
                control.channel_pressure = 0;
                if was_sustained {
                    voices.release_sustained(config, source, channel);
                }
                voices.recalculate_volumes(&env, Some(channel), Some(source));
                voices.recalculate_frequencies(&env, source, channel);
            }
            Controller::AllNotesOff
            | Controller::OmniOff
            | Controller::OmniOn
            | Controller::MonoOn
            | Controller::PolyOn => voices.all_notes_off(config, source, channel),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{RecorderHandle, RecordingBackend};
    use crate::config::{AllocationMode, DriverConfig};
    use crate::opl::{OPL_MASK_KEYON, OPL_REGISTER_BASE_FNUMHIGH_BLOCK_KEYON, OPL_REGISTER_BASE_LEVEL};
    use std::sync::Arc;

    fn open_driver(config: DriverConfig) -> (Arc<AdlibMultisource<RecordingBackend>>, RecorderHandle) {
        let (backend, handle) = RecordingBackend::new();
        let driver = Arc::new(AdlibMultisource::new(backend, config));
        driver.open().expect("recording backend opens");
        // Full channel volume for every source
        driver.send(-1, 0x00_7F_07_B0);
        (driver, handle)
    }

    fn key_on(handle: &RecorderHandle, opl_channel: u16) -> bool {
        handle.register(OPL_REGISTER_BASE_FNUMHIGH_BLOCK_KEYON + opl_channel) & OPL_MASK_KEYON != 0
    }

    #[test]
    fn test_note_on_zero_velocity_is_note_off() {
        let (driver, handle) = open_driver(DriverConfig::default());
        driver.send(0, 0x00_7F_3C_90);
        assert!(key_on(&handle, 0));
        driver.send(0, 0x00_00_3C_90);
        assert!(!key_on(&handle, 0));
    }

    #[test]
    fn test_broadcast_controller_reaches_all_sources() {
        let (driver, _handle) = open_driver(DriverConfig::default());
        for source in 0..MAXIMUM_SOURCES as u8 {
            let control = driver.controller_state(source, 0).expect("in range");
            assert_eq!(control.volume, 0x7F);
        }
    }

    #[test]
    fn test_events_ignored_while_closed() {
        let (backend, handle) = RecordingBackend::new();
        let driver = AdlibMultisource::new(backend, DriverConfig::default());
        driver.send(0, 0x00_7F_3C_90);
        assert!(handle.writes().is_empty());
    }

    #[test]
    fn test_sustain_pedal() {
        let (driver, handle) = open_driver(DriverConfig::default());
        driver.send(0, 0x00_7F_40_B0);
        driver.send(0, 0x00_7F_3C_90);
        driver.send(0, 0x00_00_3C_80);
        assert!(key_on(&handle, 0), "held by sustain");
        assert!(driver.active_note(0).is_some_and(|note| note.note_sustained));

        driver.send(0, 0x00_00_40_B0);
        assert!(!key_on(&handle, 0));
    }

    #[test]
    fn test_volume_controller_rewrites_level() {
        let (driver, handle) = open_driver(DriverConfig::default());
        driver.send(0, 0x00_7F_3C_90);
        handle.clear();

        driver.send(0, 0x00_7F_07_B0);
        assert!(handle.writes().is_empty(), "unchanged volume is ignored");

        driver.send(0, 0x00_00_07_B0);
        assert_eq!(handle.writes_to(OPL_REGISTER_BASE_LEVEL + 3), vec![0x3F]);
    }

    #[test]
    fn test_pitch_bend_rewrites_frequency() {
        let (driver, handle) = open_driver(DriverConfig::default());
        driver.send(0, 0x00_7F_3C_90);
        let before = driver.active_note(0).map(|note| note.opl_frequency);

        driver.send(0, 0x00_7F_7F_E0);
        let after = driver.active_note(0).map(|note| note.opl_frequency);
        assert_ne!(before, after);
        assert!(key_on(&handle, 0), "frequency rewrite keeps the key on");
    }

    #[test]
    fn test_data_entry_pitch_bend_sensitivity() {
        let (driver, _handle) = open_driver(DriverConfig::default());
        driver.send(3, 0x00_00_65_B2);
        driver.send(3, 0x00_00_64_B2);
        driver.send(3, 0x00_0C_06_B2);
        let control = driver.controller_state(3, 2).expect("in range");
        assert_eq!(control.pitch_bend_sensitivity, 12);
    }

    #[test]
    fn test_all_notes_off_and_all_sound_off() {
        let (driver, handle) = open_driver(DriverConfig::default());
        driver.send(0, 0x00_7F_3C_90);
        driver.send(0, 0x00_7F_40_90);
        driver.send(0, 0x00_00_7B_B0);
        assert!(!key_on(&handle, 0));
        assert!(!key_on(&handle, 1));

        driver.send(0, 0x00_7F_40_B0);
        driver.send(0, 0x00_7F_3C_90);
        driver.send(0, 0x00_00_7B_B0);
        let playing = (0..9).filter(|&ch| key_on(&handle, ch)).count();
        assert_eq!(playing, 1, "all notes off respects sustain");

        driver.send(0, 0x00_00_78_B0);
        assert_eq!((0..9).filter(|&ch| key_on(&handle, ch)).count(), 0);
    }

    #[test]
    fn test_reset_all_controllers() {
        let (driver, _handle) = open_driver(DriverConfig::default());
        driver.send(1, 0x00_7F_00_E5);
        driver.send(1, 0x00_20_0B_B5);
        driver.send(1, 0x00_00_79_B5);
        let control = driver.controller_state(1, 5).expect("in range");
        assert_eq!(control.pitch_bend, 0x2000);
        assert_eq!(control.expression, 0x7F);
        assert_eq!(control.volume, 0x7F, "volume is not a reset controller");
    }

    #[test]
    fn test_program_change_write_mode() {
        let config = DriverConfig {
            instrument_write_mode: InstrumentWriteMode::ProgramChange,
            allocation_mode: AllocationMode::Static,
            ..DriverConfig::default()
        };
        let (driver, handle) = open_driver(config);
        handle.clear();

        driver.send(0, 0x00_00_05_C0);
        assert!(!handle.writes().is_empty(), "instrument written on program change");
        let note = driver.active_note(0).expect("channel exists");
        assert_eq!(note.instrument_id, 5);
        assert!(!note.note_active);
    }

    #[test]
    fn test_gm_system_on_resets() {
        let (driver, handle) = open_driver(DriverConfig::default());
        driver.set_rhythm_mode(true);
        driver.send(0, 0x00_7F_3C_90);
        driver.send(0, 0x00_10_00_C1);

        driver.sys_ex(&[0x7E, 0x7F, 0x09, 0x01]);
        assert!(!driver.rhythm_mode());
        assert!(!key_on(&handle, 0));
        assert_eq!(driver.controller_state(0, 1).map(|control| control.program), Some(0));
        assert_eq!(driver.active_note(0).map(|note| note.note_counter_value), Some(0));
    }

    #[test]
    fn test_unknown_sysex_ignored() {
        let (driver, handle) = open_driver(DriverConfig::default());
        handle.clear();
        driver.sys_ex(&[0x7E, 0x7F, 0x09, 0x02]);
        driver.sys_ex(&[0x41]);
        assert!(handle.writes().is_empty());
    }

    #[test]
    fn test_end_of_track_deinits_source() {
        let config = DriverConfig {
            allocation_mode: AllocationMode::Static,
            ..DriverConfig::default()
        };
        let (driver, handle) = open_driver(config);
        driver.send(4, 0x00_7F_3C_90);
        assert!(driver.active_note(0).is_some_and(|note| note.channel_allocated));

        driver.meta_event(4, MIDI_META_END_OF_TRACK, &[]);
        assert!(!key_on(&handle, 0));
        assert!(driver.active_note(0).is_some_and(|note| !note.channel_allocated));
    }
}
