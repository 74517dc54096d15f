//! Voice state and register writing
//!
//! [`VoiceState`] bundles everything guarded by the driver's voice lock: the
//! active note table, the controller state of every source and MIDI channel,
//! and the register shadow in front of the backend. All methods expect the
//! lock to be held and never take another lock themselves.

use crate::backend::OplBackend;
use crate::config::{DriverConfig, InstrumentWriteMode};
use crate::instrument::InstrumentInfo;
use crate::midi::{ControlData, MIDI_CHANNEL_COUNT, MIDI_RHYTHM_CHANNEL};
use crate::multisource::{SourceLevels, MAXIMUM_SOURCES};
use crate::opl::{
    channel_register_offset, operator_register_offset, OplType, RegisterShadow, RhythmFlags,
    OPL3_REGISTER_CONNECTIONSELECT, OPL3_REGISTER_NEW, OPL_MASK_FNUMHIGH_BLOCK, OPL_MASK_KEYON,
    OPL_MASK_LEVEL, OPL_MASK_PANNING, OPL_PANNING_CENTER, OPL_REGISTER_BASE_CONNECTION_FEEDBACK_PANNING,
    OPL_REGISTER_BASE_DECAY_ATTACK, OPL_REGISTER_BASE_FNUMHIGH_BLOCK_KEYON,
    OPL_REGISTER_BASE_FNUMLOW, OPL_REGISTER_BASE_FREQMULT_MISC, OPL_REGISTER_BASE_LEVEL,
    OPL_REGISTER_BASE_RELEASE_SUSTAIN, OPL_REGISTER_BASE_WAVEFORMSELECT,
    OPL_REGISTER_NOTESELECT_CSM, OPL_REGISTER_RHYTHM, OPL_REGISTER_SET_2_OFFSET,
    OPL_REGISTER_TEST, OPL_REGISTER_TIMER1, OPL_REGISTER_TIMER2, OPL_REGISTER_TIMERCONTROL,
    OPL_RHYTHM_INSTRUMENT_CHANNELS,
};

use super::allocator::{AllocationTable, ChannelAllocator};
use super::calculator::{CalculationContext, DriverStrategy};
use super::notes::{NoteSlot, NoteTable};

/// Controller state of every MIDI channel of every source
pub(crate) type ControlTable = [[ControlData; MIDI_CHANNEL_COUNT]; MAXIMUM_SOURCES];

/// Snapshot of the state calculations depend on that lives outside the
/// voice lock. Taken before the voice lock is acquired.
pub(crate) struct Env<'a, S: ?Sized> {
    pub config: DriverConfig,
    pub levels: SourceLevels,
    pub strategy: &'a S,
}

impl<'a, S: DriverStrategy + ?Sized> Env<'a, S> {
    fn context<'c>(&self, control: &'c ControlTable, source: u8, channel: u8) -> CalculationContext<'c> {
        CalculationContext {
            channel,
            source,
            control: control_data(control, source, channel),
            source_level: self.levels.source(source),
            user: self.levels.user,
            user_volume_scaling: self.levels.user_volume_scaling,
            accuracy_mode: self.config.accuracy_mode,
            opl_type: self.config.opl_type,
        }
    }
}

fn control_data(control: &ControlTable, source: u8, channel: u8) -> &ControlData {
    &control[source as usize % MAXIMUM_SOURCES][channel as usize % MIDI_CHANNEL_COUNT]
}

/// OPL channel whose registers a slot uses
fn slot_channel(slot: NoteSlot) -> u8 {
    match slot {
        NoteSlot::Melodic(opl_channel) => opl_channel,
        NoteSlot::Rhythm(rhythm_type) => OPL_RHYTHM_INSTRUMENT_CHANNELS[rhythm_type.index()],
    }
}

/// State guarded by the voice lock
pub(crate) struct VoiceState<B> {
    pub notes: NoteTable,
    pub control: ControlTable,
    pub shadow: RegisterShadow<B>,
}

impl<B: OplBackend> VoiceState<B> {
    pub fn new(backend: B, opl_type: OplType) -> Self {
        VoiceState {
            notes: NoteTable::new(opl_type),
            control: [[ControlData::default(); MIDI_CHANNEL_COUNT]; MAXIMUM_SOURCES],
            shadow: RegisterShadow::new(backend, opl_type),
        }
    }

    pub fn control(&self, source: u8, channel: u8) -> &ControlData {
        control_data(&self.control, source, channel)
    }

    pub fn control_mut(&mut self, source: u8, channel: u8) -> &mut ControlData {
        &mut self.control[source as usize % MAXIMUM_SOURCES][channel as usize % MIDI_CHANNEL_COUNT]
    }

    pub fn write_register(&mut self, reg: u16, value: u8, force: bool) {
        self.shadow.write(reg, value, force);
    }

    /// Set the chip to its default state: timers masked, waveform select
    /// enabled, all operators silent and the rhythm register rewritten.
    pub fn init_opl(&mut self, config: &DriverConfig) {
        let opl_type = config.opl_type;
        let opl3 = opl_type == OplType::Opl3;

        let test = if opl3 { 0 } else { 0x20 };
        self.write_register(OPL_REGISTER_TEST, test, true);
        if opl_type != OplType::Opl2 {
            self.write_register(OPL_REGISTER_TEST | OPL_REGISTER_SET_2_OFFSET, test, true);
        }

        let mut timer_sets = vec![0];
        if opl_type == OplType::DualOpl2 {
            timer_sets.push(OPL_REGISTER_SET_2_OFFSET);
        }
        for set in timer_sets {
            self.write_register(OPL_REGISTER_TIMER1 | set, 0, true);
            self.write_register(OPL_REGISTER_TIMER2 | set, 0, true);
            // Mask both timers, then reset the IRQ flags
            self.write_register(OPL_REGISTER_TIMERCONTROL | set, 0x60, true);
            self.write_register(OPL_REGISTER_TIMERCONTROL | set, 0x80, true);
        }

        if opl3 {
            self.write_register(OPL3_REGISTER_CONNECTIONSELECT, 0, true);
            self.write_register(OPL3_REGISTER_NEW, 1, true);
        }

        let note_select = config.note_select.to_register();
        self.write_register(OPL_REGISTER_NOTESELECT_CSM, note_select, true);
        if opl_type == OplType::DualOpl2 {
            self.write_register(OPL_REGISTER_NOTESELECT_CSM | OPL_REGISTER_SET_2_OFFSET, note_select, true);
        }

        let default_level = OPL_MASK_LEVEL.saturating_sub(config.default_channel_volume >> 1);
        let operator_defaults = [
            (OPL_REGISTER_BASE_FREQMULT_MISC, 0),
            (OPL_REGISTER_BASE_LEVEL, default_level),
            (OPL_REGISTER_BASE_DECAY_ATTACK, 0),
            (OPL_REGISTER_BASE_RELEASE_SUSTAIN, 0),
            (OPL_REGISTER_BASE_WAVEFORMSELECT, 0),
        ];
        let channel_count = opl_type.channel_count() as u8;
        for (base, value) in operator_defaults {
            for opl_channel in 0..channel_count {
                for operator in 0..2 {
                    let offset = operator_register_offset(opl_channel, operator, None, false);
                    self.write_register(base + offset, value, true);
                }
            }
        }

        let channel_defaults = [
            (OPL_REGISTER_BASE_FNUMLOW, 0),
            (OPL_REGISTER_BASE_FNUMHIGH_BLOCK_KEYON, 0),
            (
                OPL_REGISTER_BASE_CONNECTION_FEEDBACK_PANNING,
                if opl3 { OPL_PANNING_CENTER } else { 0 },
            ),
        ];
        for (base, value) in channel_defaults {
            for opl_channel in 0..channel_count {
                let offset = channel_register_offset(opl_channel, false);
                self.write_register(base + offset, value, true);
            }
        }

        self.write_rhythm(config, true);
    }

    /// Write operator registers, volumes, connection and panning of the
    /// instrument assigned to a slot
    pub fn write_instrument<S: DriverStrategy + ?Sized>(&mut self, env: &Env<'_, S>, slot: NoteSlot) {
        let Some(definition) = self.notes.slot(slot).instrument_def else {
            return;
        };
        let opl_channel = slot_channel(slot);

        for operator in 0..definition.operator_count() {
            let offset = operator_register_offset(opl_channel, operator, slot.rhythm_type(), false);
            let operator_def = *definition.operator(operator);
            self.write_register(OPL_REGISTER_BASE_FREQMULT_MISC + offset, operator_def.freq_mult_misc, false);
            self.write_volume(env, slot, operator);
            self.write_register(OPL_REGISTER_BASE_DECAY_ATTACK + offset, operator_def.decay_attack, false);
            self.write_register(OPL_REGISTER_BASE_RELEASE_SUSTAIN + offset, operator_def.release_sustain, false);
            self.write_register(OPL_REGISTER_BASE_WAVEFORMSELECT + offset, operator_def.waveform_select, false);
        }

        self.write_panning(env, slot);
    }

    /// Recalculate and write the level of one operator, keeping the key
    /// scaling bits of the instrument
    pub fn write_volume<S: DriverStrategy + ?Sized>(
        &mut self,
        env: &Env<'_, S>,
        slot: NoteSlot,
        operator: u8,
    ) {
        let note = *self.notes.slot(slot);
        let Some(definition) = note.instrument_def else {
            return;
        };
        let opl_channel = slot_channel(slot);

        let context = env.context(
            &self.control,
            note.source.unwrap_or_default(),
            note.channel.unwrap_or_default(),
        );
        let level = env
            .strategy
            .calculate_volume(&context, note.velocity, &definition, operator);
        let key_scaling = definition.operator(operator).level & !OPL_MASK_LEVEL;

        let offset = operator_register_offset(opl_channel, operator, slot.rhythm_type(), false);
        self.write_register(OPL_REGISTER_BASE_LEVEL + offset, level | key_scaling, false);
    }

    /// Write connection, feedback and panning of a slot
    pub fn write_panning<S: DriverStrategy + ?Sized>(&mut self, env: &Env<'_, S>, slot: NoteSlot) {
        let note = *self.notes.slot(slot);
        let Some(definition) = note.instrument_def else {
            return;
        };
        let opl_channel = slot_channel(slot);

        let context = env.context(
            &self.control,
            note.source.unwrap_or_default(),
            note.channel.unwrap_or_default(),
        );
        let panning = env.strategy.calculate_panning(&context);

        let reg = OPL_REGISTER_BASE_CONNECTION_FEEDBACK_PANNING + channel_register_offset(opl_channel, false);
        self.write_register(
            reg,
            panning | (definition.connection_feedback[0] & !OPL_MASK_PANNING),
            false,
        );
    }

    /// Recalculate and write the frequency of a slot. Melodic slots get the
    /// key on bit while their note is active; rhythm instruments are keyed
    /// through the rhythm register.
    pub fn write_frequency<S: DriverStrategy + ?Sized>(&mut self, env: &Env<'_, S>, slot: NoteSlot) {
        let note = *self.notes.slot(slot);
        let Some(definition) = note.instrument_def else {
            return;
        };
        let opl_channel = slot_channel(slot);

        let context = env.context(
            &self.control,
            note.source.unwrap_or_default(),
            note.channel.unwrap_or_default(),
        );
        let frequency = env.strategy.calculate_frequency(&context, note.opl_note);
        self.notes.slot_mut(slot).opl_frequency = frequency;

        let offset = channel_register_offset(opl_channel, false);
        let key_on = match slot {
            NoteSlot::Melodic(_) if note.note_active => OPL_MASK_KEYON,
            _ => 0,
        };
        self.write_register(OPL_REGISTER_BASE_FNUMLOW + offset, (frequency & 0xFF) as u8, false);
        self.write_register(
            OPL_REGISTER_BASE_FNUMHIGH_BLOCK_KEYON + offset,
            (frequency >> 8) as u8 | key_on,
            false,
        );
    }

    /// End the note of a slot and record when it ended
    pub fn write_key_off(&mut self, config: &DriverConfig, slot: NoteSlot, force: bool) {
        if let NoteSlot::Melodic(opl_channel) = slot {
            let note = *self.notes.melodic(opl_channel);
            let reg = OPL_REGISTER_BASE_FNUMHIGH_BLOCK_KEYON + channel_register_offset(opl_channel, false);
            self.write_register(reg, (note.opl_frequency >> 8) as u8 & OPL_MASK_FNUMHIGH_BLOCK, force);
        }

        let counter = self.notes.note_counter();
        let note = self.notes.slot_mut(slot);
        note.note_active = false;
        note.note_sustained = false;
        note.note_counter_value = counter;

        if slot.rhythm_type().is_some() {
            self.write_rhythm(config, false);
        }
    }

    /// Rewrite the rhythm register from the depth settings and the active
    /// rhythm notes
    pub fn write_rhythm(&mut self, config: &DriverConfig, force: bool) {
        let value = RhythmFlags::compose(
            config.modulation_depth,
            config.vibrato_depth,
            self.notes.rhythm_mode(),
            self.notes.active_rhythm_types(),
        )
        .to_register();

        self.write_register(OPL_REGISTER_RHYTHM, value, force);
        if config.opl_type == OplType::DualOpl2 {
            self.write_register(OPL_REGISTER_RHYTHM | OPL_REGISTER_SET_2_OFFSET, value, force);
        }
    }

    /// Start a note with a resolved instrument
    #[allow(clippy::too_many_arguments)]
    pub fn note_on<S: DriverStrategy + ?Sized>(
        &mut self,
        env: &Env<'_, S>,
        allocations: &mut AllocationTable,
        source: u8,
        channel: u8,
        note: u8,
        velocity: u8,
        instrument: InstrumentInfo,
    ) {
        let mut definition = instrument.definition;
        if definition.is_empty() {
            log::debug!("Ignoring note {} on channel {}: empty instrument", note, channel);
            return;
        }

        let rhythm_note = self.notes.rhythm_mode() && channel == MIDI_RHYTHM_CHANNEL;
        let slot = if rhythm_note {
            let Some(rhythm_type) = definition.rhythm_type else {
                log::debug!("Ignoring rhythm note {}: instrument has no rhythm type", note);
                return;
            };
            NoteSlot::Rhythm(rhythm_type)
        } else {
            definition = definition.to_melodic();
            let mut allocator =
                ChannelAllocator::new(env.config.allocation_mode, allocations, &mut self.notes);
            let Some(opl_channel) = env.strategy.allocate_opl_channel(
                &mut allocator,
                channel,
                source,
                instrument.instrument_id,
            ) else {
                log::debug!("No OPL channel for note {} on channel {}", note, channel);
                return;
            };
            NoteSlot::Melodic(opl_channel)
        };

        if self.notes.slot(slot).note_active {
            self.write_key_off(&env.config, slot, false);
        }

        let counter = self.notes.next_note_counter();
        let active = self.notes.slot_mut(slot);
        active.note_active = true;
        active.note_sustained = false;
        active.note = note;
        active.velocity = velocity;
        active.channel = Some(channel);
        active.source = Some(source);
        active.opl_note = instrument.opl_note;
        active.note_counter_value = counter;
        active.instrument_id = instrument.instrument_id;
        active.instrument_def = Some(definition);

        if env.config.instrument_write_mode == InstrumentWriteMode::NoteOn {
            self.write_instrument(env, slot);
        }
        self.write_frequency(env, slot);
        if rhythm_note {
            self.write_rhythm(&env.config, false);
        }
    }

    /// End a note, or mark it sustained while the sustain pedal is down
    pub fn note_off(&mut self, config: &DriverConfig, source: u8, channel: u8, note: u8) {
        if self.notes.rhythm_mode() && channel == MIDI_RHYTHM_CHANNEL {
            if !config.rhythm_mode_ignore_note_offs {
                let slot = self.notes.active_rhythm_types().map(NoteSlot::Rhythm).find(|&slot| {
                    let active = self.notes.slot(slot);
                    active.source == Some(source) && active.note == note
                });
                if let Some(slot) = slot {
                    self.write_key_off(config, slot, false);
                }
            }
            return;
        }

        let sustain = self.control(source, channel).sustain;
        for &opl_channel in self.notes.melodic_channels() {
            let active = self.notes.melodic(opl_channel);
            if !active.note_active
                || active.note != note
                || !active.matches(Some(source), Some(channel))
            {
                continue;
            }
            if sustain {
                self.notes.melodic_mut(opl_channel).note_sustained = true;
            } else {
                self.write_key_off(config, NoteSlot::Melodic(opl_channel), false);
            }
        }
    }

    /// Assign an instrument to an OPL channel ahead of its notes
    pub fn program_change<S: DriverStrategy + ?Sized>(
        &mut self,
        env: &Env<'_, S>,
        allocations: &mut AllocationTable,
        source: u8,
        channel: u8,
        instrument: InstrumentInfo,
    ) {
        let mut definition = instrument.definition;
        if definition.is_empty() {
            return;
        }
        definition = definition.to_melodic();

        let mut allocator =
            ChannelAllocator::new(env.config.allocation_mode, allocations, &mut self.notes);
        let Some(opl_channel) = env.strategy.allocate_opl_channel(
            &mut allocator,
            channel,
            source,
            instrument.instrument_id,
        ) else {
            return;
        };

        let slot = NoteSlot::Melodic(opl_channel);
        if self.notes.slot(slot).note_active {
            self.write_key_off(&env.config, slot, false);
        }
        let active = self.notes.slot_mut(slot);
        active.channel = Some(channel);
        active.source = Some(source);
        active.instrument_id = instrument.instrument_id;
        active.instrument_def = Some(definition);

        self.write_instrument(env, slot);
    }

    /// Recalculate the frequencies of the active notes of a channel
    pub fn recalculate_frequencies<S: DriverStrategy + ?Sized>(
        &mut self,
        env: &Env<'_, S>,
        source: u8,
        channel: u8,
    ) {
        if self.notes.rhythm_mode() && channel == MIDI_RHYTHM_CHANNEL {
            self.recalculate_rhythm_frequencies(env, source);
            return;
        }

        for &opl_channel in self.notes.melodic_channels() {
            let active = self.notes.melodic(opl_channel);
            if active.note_active && active.matches(Some(source), Some(channel)) {
                self.write_frequency(env, NoteSlot::Melodic(opl_channel));
            }
        }
    }

    /// Recalculate the operator levels of active notes, optionally limited
    /// to one MIDI channel and/or source
    pub fn recalculate_volumes<S: DriverStrategy + ?Sized>(
        &mut self,
        env: &Env<'_, S>,
        channel: Option<u8>,
        source: Option<u8>,
    ) {
        let mut slots: Vec<NoteSlot> = self
            .notes
            .melodic_channels()
            .iter()
            .copied()
            .filter(|&opl_channel| {
                let active = self.notes.melodic(opl_channel);
                active.note_active && active.matches(source, channel)
            })
            .map(NoteSlot::Melodic)
            .collect();

        if self.notes.rhythm_mode() && channel.map_or(true, |channel| channel == MIDI_RHYTHM_CHANNEL) {
            slots.extend(
                self.notes
                    .active_rhythm_types()
                    .map(NoteSlot::Rhythm)
                    .filter(|&slot| self.notes.slot(slot).matches(source, None)),
            );
        }

        for slot in slots {
            let operators = self
                .notes
                .slot(slot)
                .instrument_def
                .map_or(0, |definition| definition.operator_count());
            for operator in 0..operators {
                self.write_volume(env, slot, operator);
            }
        }
    }

    /// Rewrite the panning of the notes of a channel
    pub fn recalculate_panning<S: DriverStrategy + ?Sized>(
        &mut self,
        env: &Env<'_, S>,
        source: u8,
        channel: u8,
    ) {
        let slots: Vec<NoteSlot> = if self.notes.rhythm_mode() && channel == MIDI_RHYTHM_CHANNEL {
            self.notes
                .active_rhythm_types()
                .map(NoteSlot::Rhythm)
                .filter(|&slot| self.notes.slot(slot).source == Some(source))
                .collect()
        } else {
            self.notes
                .melodic_channels()
                .iter()
                .copied()
                .filter(|&opl_channel| {
                    let active = self.notes.melodic(opl_channel);
                    active.note_active && active.matches(Some(source), Some(channel))
                })
                .map(NoteSlot::Melodic)
                .collect()
        };

        for slot in slots {
            self.write_panning(env, slot);
        }
    }

    /// Key off the sustained notes of a channel after the pedal is released
    pub fn release_sustained(&mut self, config: &DriverConfig, source: u8, channel: u8) {
        for &opl_channel in self.notes.melodic_channels() {
            let active = self.notes.melodic(opl_channel);
            if active.note_active && active.note_sustained && active.matches(Some(source), Some(channel)) {
                self.write_key_off(config, NoteSlot::Melodic(opl_channel), false);
            }
        }
    }

    /// Note off for every playing note of a channel. Sustained notes keep
    /// sounding until the pedal is released.
    pub fn all_notes_off(&mut self, config: &DriverConfig, source: u8, channel: u8) {
        let mut notes: Vec<u8> = Vec::new();
        if self.notes.rhythm_mode() && channel == MIDI_RHYTHM_CHANNEL {
            notes.extend(
                self.notes
                    .active_rhythm_types()
                    .map(|rhythm_type| *self.notes.rhythm(rhythm_type))
                    .filter(|active| active.source == Some(source))
                    .map(|active| active.note),
            );
        } else {
            notes.extend(
                self.notes
                    .melodic_channels()
                    .iter()
                    .map(|&opl_channel| self.notes.melodic(opl_channel))
                    .filter(|active| {
                        active.note_active
                            && !active.note_sustained
                            && active.matches(Some(source), Some(channel))
                    })
                    .map(|active| active.note),
            );
        }

        for note in notes {
            self.note_off(config, source, channel, note);
        }
    }

    /// Immediately end the notes of a source and/or MIDI channel, ignoring
    /// sustain
    pub fn stop_notes(&mut self, config: &DriverConfig, source: Option<u8>, channel: Option<u8>) {
        for &opl_channel in self.notes.melodic_channels() {
            let active = self.notes.melodic(opl_channel);
            if active.note_active && active.matches(source, channel) {
                self.write_key_off(config, NoteSlot::Melodic(opl_channel), false);
            }
        }

        if self.notes.rhythm_mode()
            && !config.rhythm_mode_ignore_note_offs
            && channel.map_or(true, |channel| channel == MIDI_RHYTHM_CHANNEL)
        {
            self.stop_rhythm_notes(config, source);
        }
    }

    /// End every note on the chip
    pub fn stop_all_notes(&mut self, config: &DriverConfig, force: bool) {
        // Channels 6 to 8 carry the rhythm frequencies in OPL2 rhythm mode
        for &opl_channel in self.notes.melodic_channels() {
            self.write_key_off(config, NoteSlot::Melodic(opl_channel), force);
        }

        if self.notes.rhythm_mode() {
            self.notes.deactivate_rhythm_notes();
            self.write_rhythm(config, force);
        }
    }

    /// Reset the controllers of every channel of every source
    pub fn reset_controls(&mut self) {
        for control in self.control.iter_mut().flatten() {
            *control = ControlData::default();
        }
    }

    /// Reset the melodic note table, keeping nothing of previous notes
    pub fn reset_melodic_notes(&mut self, opl_type: OplType) {
        for opl_channel in 0..opl_type.channel_count() as u8 {
            self.notes.melodic_mut(opl_channel).reset();
        }
    }
}
