//! Per-channel controller state
//!
//! Every (source, MIDI channel) pair keeps its own controller values. They
//! feed the frequency, volume and panning calculations of the notes played
//! on that channel.

use super::MIDI_CHANNEL_COUNT;

/// Default panning (center)
pub const MIDI_PANNING_DEFAULT: u8 = 0x40;
/// Default expression
pub const MIDI_EXPRESSION_DEFAULT: u8 = 0x7F;
/// Default pitch bend (center)
pub const MIDI_PITCH_BEND_DEFAULT: u16 = 0x2000;
/// Null RPN: data entry has no effect
pub const MIDI_RPN_NULL: u16 = 0x7F7F;
/// RPN 0: pitch bend sensitivity
pub const MIDI_RPN_PITCH_BEND_SENSITIVITY: u16 = 0x0000;
/// RPN 1: master tuning fine
pub const MIDI_RPN_MASTER_TUNING_FINE: u16 = 0x0001;
/// RPN 2: master tuning coarse
pub const MIDI_RPN_MASTER_TUNING_COARSE: u16 = 0x0002;
/// Default pitch bend sensitivity in semitones
pub const GM_PITCH_BEND_SENSITIVITY_DEFAULT: u8 = 2;
/// Default master tuning fine (no detune)
pub const MIDI_MASTER_TUNING_FINE_DEFAULT: u16 = 0x2000;
/// Default master tuning coarse (no transpose)
pub const MIDI_MASTER_TUNING_COARSE_DEFAULT: u8 = 0x40;

/// Controller values of one MIDI channel of one source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlData {
    /// Current program
    pub program: u8,
    /// Channel pressure
    pub channel_pressure: u8,
    /// 14-bit pitch bend, 0x2000 is center
    pub pitch_bend: u16,
    /// Modulation wheel
    pub modulation: u8,
    /// Channel volume
    pub volume: u8,
    /// Panning, 0x40 is center
    pub panning: u8,
    /// Expression
    pub expression: u8,
    /// Sustain pedal down
    pub sustain: bool,
    /// Selected registered parameter number (MSB << 8 | LSB)
    pub rpn: u16,
    /// Pitch bend range, semitones part
    pub pitch_bend_sensitivity: u8,
    /// Pitch bend range, cents part
    pub pitch_bend_sensitivity_cents: u8,
    /// Fine tuning (MSB << 8 | LSB), 0x2000 is no detune
    pub master_tuning_fine: u16,
    /// Coarse tuning in semitones, 0x40 is no transpose
    pub master_tuning_coarse: u8,
}

impl Default for ControlData {
    fn default() -> Self {
        ControlData {
            program: 0,
            channel_pressure: 0,
            pitch_bend: MIDI_PITCH_BEND_DEFAULT,
            modulation: 0,
            volume: 0,
            panning: MIDI_PANNING_DEFAULT,
            expression: MIDI_EXPRESSION_DEFAULT,
            sustain: false,
            rpn: MIDI_RPN_NULL,
            pitch_bend_sensitivity: GM_PITCH_BEND_SENSITIVITY_DEFAULT,
            pitch_bend_sensitivity_cents: 0,
            master_tuning_fine: MIDI_MASTER_TUNING_FINE_DEFAULT,
            master_tuning_coarse: MIDI_MASTER_TUNING_COARSE_DEFAULT,
        }
    }
}

impl ControlData {
    /// Update the high and/or low byte of the selected RPN
    pub fn set_rpn(&mut self, msb: Option<u8>, lsb: Option<u8>) {
        if let Some(msb) = msb {
            self.rpn = (self.rpn & 0x00FF) | (msb as u16) << 8;
        }
        if let Some(lsb) = lsb {
            self.rpn = (self.rpn & 0xFF00) | lsb as u16;
        }
    }

    /// Apply data entry to the selected RPN.
    ///
    /// Returns true if a pitch-affecting parameter was addressed, in which
    /// case the frequencies of the channel's notes must be recalculated.
    pub fn data_entry(&mut self, msb: Option<u8>, lsb: Option<u8>) -> bool {
        match self.rpn {
            MIDI_RPN_PITCH_BEND_SENSITIVITY => {
                if let Some(msb) = msb {
                    self.pitch_bend_sensitivity = msb;
                }
                if let Some(lsb) = lsb {
                    self.pitch_bend_sensitivity_cents = lsb;
                }
                true
            }
            MIDI_RPN_MASTER_TUNING_FINE => {
                if let Some(msb) = msb {
                    self.master_tuning_fine = (self.master_tuning_fine & 0x00FF) | (msb as u16) << 8;
                }
                if let Some(lsb) = lsb {
                    self.master_tuning_fine = (self.master_tuning_fine & 0xFF00) | lsb as u16;
                }
                true
            }
            MIDI_RPN_MASTER_TUNING_COARSE => {
                // LSB is ignored
                if let Some(msb) = msb {
                    self.master_tuning_coarse = msb;
                }
                true
            }
            _ => false,
        }
    }
}

/// Controller values applied to every channel when a source is (re)started.
///
/// `None` leaves the current value untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ControllerDefaults {
    /// Program per MIDI channel
    pub program: [Option<u8>; MIDI_CHANNEL_COUNT],
    /// Channel pressure
    pub channel_pressure: Option<u8>,
    /// Pitch bend
    pub pitch_bend: Option<u16>,
    /// Modulation
    pub modulation: Option<u8>,
    /// Channel volume
    pub volume: Option<u8>,
    /// Panning
    pub panning: Option<u8>,
    /// Expression
    pub expression: Option<u8>,
    /// Selected RPN
    pub rpn: Option<u16>,
    /// Pitch bend sensitivity in semitones (cents are reset to 0)
    pub pitch_bend_sensitivity: Option<u8>,
}

impl ControllerDefaults {
    /// Apply the defaults to the controller state of one MIDI channel
    pub fn apply(&self, channel: usize, control: &mut ControlData) {
        if let Some(program) = self.program.get(channel).copied().flatten() {
            control.program = program;
        }
        if let Some(pressure) = self.channel_pressure {
            control.channel_pressure = pressure;
        }
        if let Some(pitch_bend) = self.pitch_bend {
            control.pitch_bend = pitch_bend;
        }
        if let Some(modulation) = self.modulation {
            control.modulation = modulation;
        }
        if let Some(volume) = self.volume {
            control.volume = volume;
        }
        if let Some(panning) = self.panning {
            control.panning = panning;
        }
        if let Some(expression) = self.expression {
            control.expression = expression;
        }
        if let Some(rpn) = self.rpn {
            control.rpn = rpn;
        }
        if let Some(sensitivity) = self.pitch_bend_sensitivity {
            control.pitch_bend_sensitivity = sensitivity;
            control.pitch_bend_sensitivity_cents = 0;
        }
    }
}
