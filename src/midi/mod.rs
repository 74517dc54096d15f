//! MIDI message decoding
//!
//! Events arrive packed in a `u32` the way MIDI parsers hand them out:
//! status byte in bits 0-7, first data byte in bits 8-15, second data byte in
//! bits 16-23.

pub mod controller;

pub use controller::{ControlData, ControllerDefaults};

use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

/// MIDI channels per source
pub const MIDI_CHANNEL_COUNT: usize = 16;
/// MIDI channel 10 (zero-based 9), the General MIDI percussion channel
pub const MIDI_RHYTHM_CHANNEL: u8 = 9;
/// Meta event: end of track
pub const MIDI_META_END_OF_TRACK: u8 = 0x2F;

/// Status nibble of a channel message
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum MidiCommand {
    /// Note off (0x80)
    NoteOff = 0x80,
    /// Note on (0x90)
    NoteOn = 0x90,
    /// Polyphonic key pressure (0xA0)
    PolyphonicAftertouch = 0xA0,
    /// Control change (0xB0)
    ControlChange = 0xB0,
    /// Program change (0xC0)
    ProgramChange = 0xC0,
    /// Channel pressure (0xD0)
    ChannelAftertouch = 0xD0,
    /// Pitch bend (0xE0)
    PitchBend = 0xE0,
    /// System message (0xF0)
    System = 0xF0,
}

/// Controllers handled by the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum Controller {
    /// Modulation wheel
    Modulation = 0x01,
    /// Data entry MSB
    DataEntryMsb = 0x06,
    /// Channel volume
    Volume = 0x07,
    /// Panning
    Panning = 0x0A,
    /// Expression
    Expression = 0x0B,
    /// Data entry LSB
    DataEntryLsb = 0x26,
    /// Sustain pedal
    Sustain = 0x40,
    /// Registered parameter number LSB
    RpnLsb = 0x64,
    /// Registered parameter number MSB
    RpnMsb = 0x65,
    /// All sound off
    AllSoundOff = 0x78,
    /// Reset all controllers
    ResetAllControllers = 0x79,
    /// All notes off
    AllNotesOff = 0x7B,
    /// Omni mode off (implies all notes off)
    OmniOff = 0x7C,
    /// Omni mode on (implies all notes off)
    OmniOn = 0x7D,
    /// Mono mode on (implies all notes off)
    MonoOn = 0x7E,
    /// Poly mode on (implies all notes off)
    PolyOn = 0x7F,
}

impl Controller {
    /// Decode a controller number
    pub fn from_number(number: u8) -> Option<Self> {
        Controller::from_u8(number)
    }
}

/// Decoded MIDI event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiMessage {
    /// Note off
    NoteOff {
        /// MIDI channel (0-15)
        channel: u8,
        /// Note number
        note: u8,
        /// Release velocity
        velocity: u8,
    },
    /// Note on; velocity 0 acts as note off
    NoteOn {
        /// MIDI channel (0-15)
        channel: u8,
        /// Note number
        note: u8,
        /// Velocity
        velocity: u8,
    },
    /// Polyphonic key pressure
    PolyAftertouch {
        /// MIDI channel (0-15)
        channel: u8,
        /// Note number
        note: u8,
        /// Pressure
        pressure: u8,
    },
    /// Control change
    ControlChange {
        /// MIDI channel (0-15)
        channel: u8,
        /// Controller number
        controller: u8,
        /// Controller value
        value: u8,
    },
    /// Program change
    ProgramChange {
        /// MIDI channel (0-15)
        channel: u8,
        /// Program number
        program: u8,
    },
    /// Channel pressure
    ChannelAftertouch {
        /// MIDI channel (0-15)
        channel: u8,
        /// Pressure
        pressure: u8,
    },
    /// Pitch bend
    PitchBend {
        /// MIDI channel (0-15)
        channel: u8,
        /// Low 7 bits
        lsb: u8,
        /// High 7 bits
        msb: u8,
    },
    /// System message (raw packed value)
    System(u32),
}

impl MidiMessage {
    /// Decode a packed event. Returns `None` if the low byte is not a status byte.
    pub fn from_packed(packed: u32) -> Option<Self> {
        let status = (packed & 0xFF) as u8;
        let channel = status & 0x0F;
        let data1 = ((packed >> 8) & 0xFF) as u8;
        let data2 = ((packed >> 16) & 0xFF) as u8;

        let message = match MidiCommand::from_u8(status & 0xF0)? {
            MidiCommand::NoteOff => MidiMessage::NoteOff {
                channel,
                note: data1,
                velocity: data2,
            },
            MidiCommand::NoteOn => MidiMessage::NoteOn {
                channel,
                note: data1,
                velocity: data2,
            },
            MidiCommand::PolyphonicAftertouch => MidiMessage::PolyAftertouch {
                channel,
                note: data1,
                pressure: data2,
            },
            MidiCommand::ControlChange => MidiMessage::ControlChange {
                channel,
                controller: data1,
                value: data2,
            },
            MidiCommand::ProgramChange => MidiMessage::ProgramChange {
                channel,
                program: data1,
            },
            MidiCommand::ChannelAftertouch => MidiMessage::ChannelAftertouch {
                channel,
                pressure: data1,
            },
            MidiCommand::PitchBend => MidiMessage::PitchBend {
                channel,
                lsb: data1,
                msb: data2,
            },
            MidiCommand::System => MidiMessage::System(packed),
        };
        Some(message)
    }

    /// Encode back into the packed format
    pub fn to_packed(&self) -> u32 {
        let pack = |command: MidiCommand, channel: u8, data1: u8, data2: u8| -> u32 {
            (command as u32 | (channel & 0x0F) as u32) | (data1 as u32) << 8 | (data2 as u32) << 16
        };
        match *self {
            MidiMessage::NoteOff {
                channel,
                note,
                velocity,
            } => pack(MidiCommand::NoteOff, channel, note, velocity),
            MidiMessage::NoteOn {
                channel,
                note,
                velocity,
            } => pack(MidiCommand::NoteOn, channel, note, velocity),
            MidiMessage::PolyAftertouch {
                channel,
                note,
                pressure,
            } => pack(MidiCommand::PolyphonicAftertouch, channel, note, pressure),
            MidiMessage::ControlChange {
                channel,
                controller,
                value,
            } => pack(MidiCommand::ControlChange, channel, controller, value),
            MidiMessage::ProgramChange { channel, program } => {
                pack(MidiCommand::ProgramChange, channel, program, 0)
            }
            MidiMessage::ChannelAftertouch { channel, pressure } => {
                pack(MidiCommand::ChannelAftertouch, channel, pressure, 0)
            }
            MidiMessage::PitchBend { channel, lsb, msb } => {
                pack(MidiCommand::PitchBend, channel, lsb, msb)
            }
            MidiMessage::System(packed) => packed,
        }
    }

    /// Whether this is a note on or note off event
    pub fn is_note_event(&self) -> bool {
        matches!(
            self,
            MidiMessage::NoteOn { .. } | MidiMessage::NoteOff { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_note_on() {
        let message = MidiMessage::from_packed(0x00_7F_3C_92).expect("valid event");
        assert_eq!(
            message,
            MidiMessage::NoteOn {
                channel: 2,
                note: 0x3C,
                velocity: 0x7F
            }
        );
        assert!(message.is_note_event());
    }

    #[test]
    fn test_decode_pitch_bend() {
        let message = MidiMessage::from_packed(0x00_40_00_E0).expect("valid event");
        assert_eq!(
            message,
            MidiMessage::PitchBend {
                channel: 0,
                lsb: 0,
                msb: 0x40
            }
        );
    }

    #[test]
    fn test_decode_rejects_data_byte() {
        assert_eq!(MidiMessage::from_packed(0x00_00_00_3C), None);
    }

    #[test]
    fn test_system_message_kept_raw() {
        let message = MidiMessage::from_packed(0xF8).expect("valid event");
        assert_eq!(message, MidiMessage::System(0xF8));
        assert!(!message.is_note_event());
    }

    #[test]
    fn test_packed_encoding() {
        let message = MidiMessage::ControlChange {
            channel: 15,
            controller: 0x07,
            value: 100,
        };
        assert_eq!(message.to_packed(), 0x00_64_07_BF);
        assert_eq!(MidiMessage::from_packed(message.to_packed()), Some(message));
    }

    #[test]
    fn test_controller_lookup() {
        assert_eq!(Controller::from_number(0x40), Some(Controller::Sustain));
        assert_eq!(Controller::from_number(0x7E), Some(Controller::MonoOn));
        assert_eq!(Controller::from_number(0x02), None);
    }
}
