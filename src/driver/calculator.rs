//! Frequency, volume and panning calculation
//!
//! Two algorithm sets are provided:
//! - **SB16 Win95**: table-driven frequencies and volume lookup, matching the
//!   Windows 95 Sound Blaster 16 driver note for note.
//! - **GM**: frequencies from equal temperament with pitch bend sensitivity
//!   and master tuning, and the General MIDI 40·log10 volume curve.
//!
//! Game-specific drivers change individual calculations by implementing
//! [`DriverStrategy`] and overriding only the methods they need; every method
//! defaults to the functions in this module.

use crate::config::AccuracyMode;
use crate::instrument::OplInstrumentDefinition;
use crate::midi::ControlData;
use crate::multisource::{SourceLevel, UserVolumeSettings};
use crate::opl::{
    OplType, OPL_MASK_LEVEL, OPL_PANNING_CENTER, OPL_PANNING_LEFT, OPL_PANNING_RIGHT,
};

use super::allocator::ChannelAllocator;

/// F-num of each note of octave 5 (block 1), starting at C
pub const OPL_NOTE_FREQUENCIES: [u16; 12] = [
    0x0AB7, 0x0B5A, 0x0C07, 0x0CBE, 0x0D80, 0x0E4D, 0x0F27, 0x100E, 0x1102, 0x1205, 0x1318, 0x143A,
];

/// Attenuation for 5-bit velocity / channel volume values
pub const OPL_VOLUME_LOOKUP: [u8; 32] = [
    0x50, 0x3F, 0x28, 0x24, 0x20, 0x1C, 0x17, 0x15, 0x13, 0x11, 0x0F, 0x0E, 0x0D, 0x0C, 0x0B, 0x0A,
    0x09, 0x08, 0x07, 0x06, 0x05, 0x05, 0x04, 0x04, 0x03, 0x03, 0x02, 0x02, 0x01, 0x01, 0x00, 0x00,
];

/// MIDI panning at or below this value plays on the left speaker only
pub const OPL_MIDI_PANNING_LEFT_LIMIT: u8 = 0x2F;
/// MIDI panning at or above this value plays on the right speaker only
pub const OPL_MIDI_PANNING_RIGHT_LIMIT: u8 = 0x51;

/// Hz to F-num at block 0: 2^20 / 49716 Hz (OPL sample rate)
pub const OPL_FREQUENCY_CONVERSION_FACTOR: f32 = 1_048_576.0 / 49_716.0;

/// 127^3, the product of maximum velocity, volume and expression
const GM_VOLUME_PRODUCT_MAX: f32 = 2_048_383.0;

/// Inputs of a calculation for one note
#[derive(Debug, Clone, Copy)]
pub struct CalculationContext<'a> {
    /// MIDI channel of the note
    pub channel: u8,
    /// Source of the note
    pub source: u8,
    /// Controller state of the channel
    pub control: &'a ControlData,
    /// Volume state of the source
    pub source_level: SourceLevel,
    /// User volume settings
    pub user: UserVolumeSettings,
    /// Whether user volume settings apply
    pub user_volume_scaling: bool,
    /// Algorithm set
    pub accuracy_mode: AccuracyMode,
    /// Chip type
    pub opl_type: OplType,
}

/// Overridable driver behavior.
///
/// All methods have default implementations reproducing the standard
/// driver. Implementors override the calculations a game's own sound driver
/// did differently.
pub trait DriverStrategy: Send + Sync {
    /// Choose the OPL channel for a new melodic note or program change.
    /// `None` drops the note.
    fn allocate_opl_channel(
        &self,
        allocator: &mut ChannelAllocator<'_>,
        channel: u8,
        source: u8,
        instrument_id: u8,
    ) -> Option<u8> {
        allocator.allocate(channel, source, instrument_id)
    }

    /// Block and F-num word (block << 10 | F-num) for a note
    fn calculate_frequency(&self, context: &CalculationContext<'_>, note: u8) -> u16 {
        calculate_frequency(self, context, note)
    }

    /// Pitch bend and tuning offset to add to an unshifted F-num
    fn calculate_pitch_bend(&self, context: &CalculationContext<'_>, opl_frequency: u32) -> i32 {
        calculate_pitch_bend(context, opl_frequency)
    }

    /// Output level (0 loudest, 0x3F silent) of an operator
    fn calculate_volume(
        &self,
        context: &CalculationContext<'_>,
        velocity: u8,
        instrument: &OplInstrumentDefinition,
        operator: u8,
    ) -> u8 {
        calculate_volume(self, context, velocity, instrument, operator)
    }

    /// Output level from velocity, channel volume and instrument level,
    /// before source and user volume
    fn calculate_unscaled_volume(
        &self,
        context: &CalculationContext<'_>,
        velocity: u8,
        instrument: &OplInstrumentDefinition,
        operator: u8,
    ) -> u8 {
        calculate_unscaled_volume(context, velocity, instrument, operator)
    }

    /// Panning bits for register 0xC0
    fn calculate_panning(&self, context: &CalculationContext<'_>) -> u8 {
        calculate_panning(context)
    }
}

/// Strategy using every default calculation
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultStrategy;

impl DriverStrategy for DefaultStrategy {}

/// Default frequency calculation.
///
/// The result is transposed down into the 10-bit F-num range by raising the
/// block; notes above the block 7 range wrap to lower octaves.
pub fn calculate_frequency<S: DriverStrategy + ?Sized>(
    strategy: &S,
    context: &CalculationContext<'_>,
    note: u8,
) -> u16 {
    let octave_note = (note % 12) as usize;
    let octave = note / 12;

    let (opl_frequency, mut block): (u32, u8) = match context.accuracy_mode {
        AccuracyMode::Sb16Win95 => {
            let base = OPL_NOTE_FREQUENCIES[octave_note] as u32;
            let frequency = if octave > 5 {
                base << (octave - 5)
            } else {
                base >> (5 - octave)
            };
            (frequency, 1)
        }
        AccuracyMode::Gm => {
            // A4 (0x45) is 440 Hz; block 0 halves the frequency, doubling the F-num
            let hz = 440.0f32 * 2f32.powf((note as f32 - 69.0) / 12.0);
            ((hz * OPL_FREQUENCY_CONVERSION_FACTOR).round() as u32, 0)
        }
    };

    let bent = opl_frequency as i64 + strategy.calculate_pitch_bend(context, opl_frequency) as i64;
    let mut frequency = bent.clamp(0, u32::MAX as i64) as u32;
    while frequency > 0x3FF {
        frequency >>= 1;
        block = block.saturating_add(1);
    }
    let block = block.min(7);

    frequency as u16 | (block as u16) << 10
}

/// Default pitch bend calculation
pub fn calculate_pitch_bend(context: &CalculationContext<'_>, opl_frequency: u32) -> i32 {
    let control = context.control;
    match context.accuracy_mode {
        AccuracyMode::Sb16Win95 => {
            // Fixed range of 2 semitones; the minimum bend is clipped so it
            // does not wrap to maximum
            let mut pitch_bend = ((control.pitch_bend as i64) << 2) - 0x8001;
            pitch_bend = pitch_bend.max(-0x8000);
            pitch_bend *= if pitch_bend > 0 { 0x1F } else { 0x1B };
            pitch_bend >>= 8;
            // The bend is computed from the low 16 bits of the F-num
            pitch_bend *= opl_frequency as u16 as i64;
            pitch_bend >>= 15;
            pitch_bend.clamp(i32::MIN as i64, i32::MAX as i64) as i32
        }
        AccuracyMode::Gm => {
            let signed_pitch_bend = control.pitch_bend as i32 - 0x2000;
            let sensitivity_cents = control.pitch_bend_sensitivity as i32 * 100
                + control.pitch_bend_sensitivity_cents as i32;
            // Upward bend has one step less resolution than downward
            let divisor = if signed_pitch_bend > 0 { 8191.0 } else { 8192.0 };
            let pitch_bend_cents = (signed_pitch_bend * sensitivity_cents) as f32 / divisor;
            let tuning_cents = ((control.master_tuning_coarse as i32 - 0x40) * 100) as f32
                + ((control.master_tuning_fine as i32 - 0x2000) * 100) as f32 / 8192.0;

            let frequency = opl_frequency as f64;
            let bend = frequency * 2f64.powf(((pitch_bend_cents + tuning_cents) / 1200.0) as f64)
                - frequency;
            bend.round().clamp(i32::MIN as f64, i32::MAX as f64) as i32
        }
    }
}

/// Default operator volume calculation.
///
/// Modulator operators keep the instrument level. Scaled operators apply the
/// unscaled volume, then the source volume relative to its neutral volume,
/// then the user volume when enabled.
pub fn calculate_volume<S: DriverStrategy + ?Sized>(
    strategy: &S,
    context: &CalculationContext<'_>,
    velocity: u8,
    instrument: &OplInstrumentDefinition,
    operator: u8,
) -> u8 {
    let operator_level = instrument.operator(operator).level & OPL_MASK_LEVEL;
    if !instrument.is_volume_scaled(operator) {
        return operator_level;
    }

    let unscaled = strategy.calculate_unscaled_volume(context, velocity, instrument, operator);
    let level = context.source_level;

    let mut inverted = OPL_MASK_LEVEL.saturating_sub(unscaled) as u32;
    inverted = inverted * level.volume as u32 / level.neutral_volume.max(1) as u32;
    if context.user_volume_scaling {
        inverted = if context.user.mute {
            0
        } else {
            (inverted * context.user.volume_for(level.source_type) as u32) >> 8
        };
    }

    OPL_MASK_LEVEL - inverted.min(OPL_MASK_LEVEL as u32) as u8
}

/// Default unscaled volume calculation, clipped to 0x3F
pub fn calculate_unscaled_volume(
    context: &CalculationContext<'_>,
    velocity: u8,
    instrument: &OplInstrumentDefinition,
    operator: u8,
) -> u8 {
    let operator_level = instrument.operator(operator).level & OPL_MASK_LEVEL;
    let control = context.control;

    let unscaled = match context.accuracy_mode {
        AccuracyMode::Sb16Win95 => {
            let lookup = |value: u8| OPL_VOLUME_LOOKUP[(value as usize >> 2).min(31)] as u32;
            lookup(velocity) + lookup(control.volume) + operator_level as u32
        }
        AccuracyMode::Gm => {
            let product =
                velocity as f32 * control.volume as f32 * control.expression as f32;
            let volume_db = 40.0 * (product / GM_VOLUME_PRODUCT_MAX).log10();
            // One OPL level step is 0.75 dB; a zero product saturates to silence
            (volume_db / -0.75 + operator_level as f32) as u32
        }
    };

    unscaled.min(OPL_MASK_LEVEL as u32) as u8
}

/// Default panning: OPL3 only, three positions
pub fn calculate_panning(context: &CalculationContext<'_>) -> u8 {
    if context.opl_type != OplType::Opl3 {
        return 0;
    }

    match context.control.panning {
        panning if panning <= OPL_MIDI_PANNING_LEFT_LIMIT => OPL_PANNING_LEFT,
        panning if panning >= OPL_MIDI_PANNING_RIGHT_LIMIT => OPL_PANNING_RIGHT,
        _ => OPL_PANNING_CENTER,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::OPL_INSTRUMENT_BANK;
    use crate::multisource::SourceType;
    use approx::assert_relative_eq;

    fn context(control: &ControlData, accuracy_mode: AccuracyMode) -> CalculationContext<'_> {
        CalculationContext {
            channel: 0,
            source: 0,
            control,
            source_level: SourceLevel::default(),
            user: UserVolumeSettings::default(),
            user_volume_scaling: false,
            accuracy_mode,
            opl_type: OplType::Opl2,
        }
    }

    fn split(word: u16) -> (u16, u16) {
        (word & 0x3FF, word >> 10)
    }

    // Pitch as F-num scaled by block, comparable across blocks
    fn effective(word: u16) -> u32 {
        let (fnum, block) = split(word);
        (fnum as u32) << block
    }

    #[test]
    fn test_sb16_middle_c() {
        let control = ControlData::default();
        let ctx = context(&control, AccuracyMode::Sb16Win95);
        // 0xAB7 bent down by one step, then halved twice
        assert_eq!(DefaultStrategy.calculate_frequency(&ctx, 60), 0x0EAD);
    }

    #[test]
    fn test_gm_a4_is_440_hz() {
        let control = ControlData::default();
        let ctx = context(&control, AccuracyMode::Gm);
        let word = DefaultStrategy.calculate_frequency(&ctx, 69);
        assert_eq!(word, 4 << 10 | 580);

        let (fnum, block) = split(word);
        let hz = fnum as f32 * 49_716.0 / (1u32 << (20 - block)) as f32;
        assert_relative_eq!(hz, 440.0, epsilon = 0.5);
    }

    #[test]
    fn test_frequency_in_range_for_all_notes() {
        let control = ControlData::default();
        for mode in [AccuracyMode::Sb16Win95, AccuracyMode::Gm] {
            let ctx = context(&control, mode);
            for note in 0..=127u8 {
                let (fnum, block) = split(DefaultStrategy.calculate_frequency(&ctx, note));
                assert!(fnum <= 0x3FF);
                assert!(block <= 7, "note {} block {}", note, block);
            }
        }
    }

    #[test]
    fn test_frequency_monotonic_within_octave() {
        let control = ControlData::default();
        for mode in [AccuracyMode::Sb16Win95, AccuracyMode::Gm] {
            let ctx = context(&control, mode);
            // Octaves 9 and up exceed block 7 and are transposed down
            for octave in 1..=8u8 {
                let words: Vec<u32> = (octave * 12..octave * 12 + 12)
                    .map(|note| effective(DefaultStrategy.calculate_frequency(&ctx, note)))
                    .collect();
                assert!(
                    words.windows(2).all(|pair| pair[0] < pair[1]),
                    "{:?} octave {} not increasing: {:?}",
                    mode,
                    octave,
                    words
                );
            }
        }
    }

    #[test]
    fn test_octave_doubles_frequency() {
        let control = ControlData::default();
        let ctx = context(&control, AccuracyMode::Sb16Win95);
        let low = effective(DefaultStrategy.calculate_frequency(&ctx, 57));
        let high = effective(DefaultStrategy.calculate_frequency(&ctx, 69));
        assert_relative_eq!(high as f32 / low as f32, 2.0, epsilon = 0.01);
    }

    #[test]
    fn test_sb16_pitch_bend_range() {
        let mut control = ControlData::default();
        let base = 0x0AB7u32;

        control.pitch_bend = 0x3FFF;
        let up = calculate_pitch_bend(&context(&control, AccuracyMode::Sb16Win95), base);
        control.pitch_bend = 0;
        let down = calculate_pitch_bend(&context(&control, AccuracyMode::Sb16Win95), base);

        // About +2 and -2 semitones
        assert_relative_eq!((base as i32 + up) as f32 / base as f32, 1.12, epsilon = 0.01);
        assert_relative_eq!((base as i32 + down) as f32 / base as f32, 0.895, epsilon = 0.01);
    }

    #[test]
    fn test_sb16_pitch_bend_uses_low_16_bits() {
        let mut control = ControlData::default();
        control.pitch_bend = 0x3FFF;
        let ctx = context(&control, AccuracyMode::Sb16Win95);

        let low = calculate_pitch_bend(&ctx, 0x0EAD);
        assert!(low > 0);
        assert_eq!(calculate_pitch_bend(&ctx, 0x1_0EAD), low);
        assert_eq!(calculate_pitch_bend(&ctx, 0x1_0000), 0);
    }

    #[test]
    fn test_gm_pitch_bend_sensitivity_and_tuning() {
        let mut control = ControlData {
            pitch_bend: 0x3FFF,
            pitch_bend_sensitivity: 12,
            ..ControlData::default()
        };
        let bend = calculate_pitch_bend(&context(&control, AccuracyMode::Gm), 1000);
        assert_eq!(bend, 1000, "full bend at 12 semitones is one octave");

        control.pitch_bend = 0x2000;
        control.master_tuning_coarse = 0x40 - 12;
        let bend = calculate_pitch_bend(&context(&control, AccuracyMode::Gm), 1000);
        assert_eq!(bend, -500);
    }

    #[test]
    fn test_sb16_volume() {
        let control = ControlData {
            volume: 127,
            ..ControlData::default()
        };
        let ctx = context(&control, AccuracyMode::Sb16Win95);
        let piano = &OPL_INSTRUMENT_BANK[0];

        assert_eq!(DefaultStrategy.calculate_volume(&ctx, 127, piano, 1), 0x06);
        // FM modulator keeps its instrument level
        assert_eq!(DefaultStrategy.calculate_volume(&ctx, 127, piano, 0), 0x0F);
        // Velocity 64 looks up entry 16 (0x09)
        assert_eq!(DefaultStrategy.calculate_volume(&ctx, 64, piano, 1), 0x0F);
    }

    #[test]
    fn test_volume_zero_channel_volume_is_silent() {
        let control = ControlData::default();
        let piano = &OPL_INSTRUMENT_BANK[0];
        for mode in [AccuracyMode::Sb16Win95, AccuracyMode::Gm] {
            let ctx = context(&control, mode);
            assert_eq!(DefaultStrategy.calculate_volume(&ctx, 127, piano, 1), 0x3F);
        }
    }

    #[test]
    fn test_gm_volume_curve() {
        let control = ControlData {
            volume: 127,
            ..ControlData::default()
        };
        let ctx = context(&control, AccuracyMode::Gm);
        let piano = &OPL_INSTRUMENT_BANK[0];
        assert_eq!(DefaultStrategy.calculate_unscaled_volume(&ctx, 127, piano, 1), 0x06);

        // Half velocity: 40 * log10(0.5) = -12 dB, 16 steps
        let half = DefaultStrategy.calculate_unscaled_volume(&ctx, 64, piano, 1);
        assert!((0x06 + 15..=0x06 + 16).contains(&half), "got {}", half);
    }

    #[test]
    fn test_source_and_user_volume_scaling() {
        let control = ControlData {
            volume: 127,
            ..ControlData::default()
        };
        let piano = &OPL_INSTRUMENT_BANK[0];
        let mut ctx = context(&control, AccuracyMode::Sb16Win95);

        // inverted 0x39 halved
        ctx.source_level.volume = 127;
        assert_eq!(DefaultStrategy.calculate_volume(&ctx, 127, piano, 1), 0x3F - 0x1C);

        ctx.source_level.volume = 255;
        ctx.user_volume_scaling = true;
        ctx.user.music_volume = 128;
        assert_eq!(DefaultStrategy.calculate_volume(&ctx, 127, piano, 1), 0x3F - 0x1C);

        ctx.source_level.source_type = SourceType::Sfx;
        ctx.user.sfx_volume = 256;
        assert_eq!(DefaultStrategy.calculate_volume(&ctx, 127, piano, 1), 0x06);

        ctx.user.mute = true;
        assert_eq!(DefaultStrategy.calculate_volume(&ctx, 127, piano, 1), 0x3F);
    }

    #[test]
    fn test_source_volume_above_neutral_clips() {
        let control = ControlData {
            volume: 127,
            ..ControlData::default()
        };
        let piano = &OPL_INSTRUMENT_BANK[0];
        let mut ctx = context(&control, AccuracyMode::Sb16Win95);
        ctx.source_level.neutral_volume = 64;
        assert_eq!(DefaultStrategy.calculate_volume(&ctx, 127, piano, 1), 0);
    }

    #[test]
    fn test_panning() {
        let mut control = ControlData::default();
        assert_eq!(calculate_panning(&context(&control, AccuracyMode::Sb16Win95)), 0);

        let mut ctx_for = |panning: u8| {
            control.panning = panning;
            let mut ctx = context(&control, AccuracyMode::Sb16Win95);
            ctx.opl_type = OplType::Opl3;
            calculate_panning(&ctx)
        };
        assert_eq!(ctx_for(0x00), OPL_PANNING_LEFT);
        assert_eq!(ctx_for(0x2F), OPL_PANNING_LEFT);
        assert_eq!(ctx_for(0x30), OPL_PANNING_CENTER);
        assert_eq!(ctx_for(0x50), OPL_PANNING_CENTER);
        assert_eq!(ctx_for(0x51), OPL_PANNING_RIGHT);
    }

    #[test]
    fn test_overridden_pitch_bend_feeds_frequency() {
        struct OctaveUp;
        impl DriverStrategy for OctaveUp {
            fn calculate_pitch_bend(&self, _: &CalculationContext<'_>, opl_frequency: u32) -> i32 {
                opl_frequency as i32
            }
        }

        let control = ControlData::default();
        let ctx = context(&control, AccuracyMode::Sb16Win95);
        // 0xAB7 doubled, transposed into block 4
        assert_eq!(OctaveUp.calculate_frequency(&ctx, 60), 4 << 10 | 0x2AD);
    }
}
