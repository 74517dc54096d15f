//! OPL channel allocation
//!
//! Dynamic allocation picks a channel for every note, preferring in order:
//! a channel that was never used, the idle channel used longest ago, the
//! oldest note playing the same instrument, and finally the oldest note.
//! Static allocation pins each MIDI channel of each source to one OPL channel
//! on its first note.

use crate::config::AllocationMode;
use crate::midi::MIDI_CHANNEL_COUNT;
use crate::multisource::MAXIMUM_SOURCES;

use super::notes::NoteTable;

/// Static allocations of OPL channels per source and MIDI channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationTable {
    channels: [[Option<u8>; MIDI_CHANNEL_COUNT]; MAXIMUM_SOURCES],
}

impl Default for AllocationTable {
    fn default() -> Self {
        AllocationTable {
            channels: [[None; MIDI_CHANNEL_COUNT]; MAXIMUM_SOURCES],
        }
    }
}

impl AllocationTable {
    /// OPL channel allocated to a MIDI channel of a source
    pub fn get(&self, source: u8, channel: u8) -> Option<u8> {
        self.channels
            .get(source as usize)?
            .get(channel as usize)
            .copied()
            .flatten()
    }

    fn set(&mut self, source: u8, channel: u8, opl_channel: Option<u8>) {
        if let Some(slot) = self
            .channels
            .get_mut(source as usize)
            .and_then(|channels| channels.get_mut(channel as usize))
        {
            *slot = opl_channel;
        }
    }

    /// Drop all allocations of a source
    pub fn clear_source(&mut self, source: u8) {
        if let Some(channels) = self.channels.get_mut(source as usize) {
            *channels = [None; MIDI_CHANNEL_COUNT];
        }
    }

    /// Drop every allocation pointing at an OPL channel
    pub fn release_opl_channel(&mut self, opl_channel: u8) {
        for slot in self.channels.iter_mut().flatten() {
            if *slot == Some(opl_channel) {
                *slot = None;
            }
        }
    }

    /// Drop all allocations
    pub fn clear(&mut self) {
        *self = AllocationTable::default();
    }
}

/// Allocation view handed to [`super::DriverStrategy::allocate_opl_channel`]
pub struct ChannelAllocator<'a> {
    mode: AllocationMode,
    allocations: &'a mut AllocationTable,
    notes: &'a mut NoteTable,
}

impl<'a> ChannelAllocator<'a> {
    /// Allocator over the driver's tables
    pub fn new(
        mode: AllocationMode,
        allocations: &'a mut AllocationTable,
        notes: &'a mut NoteTable,
    ) -> Self {
        ChannelAllocator {
            mode,
            allocations,
            notes,
        }
    }

    /// Configured allocation mode
    pub fn mode(&self) -> AllocationMode {
        self.mode
    }

    /// Read access to the note table
    pub fn notes(&self) -> &NoteTable {
        &*self.notes
    }

    /// Allocate with the configured mode
    pub fn allocate(&mut self, channel: u8, source: u8, instrument_id: u8) -> Option<u8> {
        match self.mode {
            AllocationMode::Dynamic => self.allocate_dynamic(instrument_id),
            AllocationMode::Static => self.allocate_static(channel, source),
        }
    }

    /// Pick a channel for a new note. Succeeds whenever at least one melodic
    /// channel is not statically allocated; a note playing on the returned
    /// channel must be ended by the caller.
    pub fn allocate_dynamic(&self, instrument_id: u8) -> Option<u8> {
        let mut inactive: Option<(u32, u8)> = None;
        let mut same_instrument: Option<(u32, u8)> = None;
        let mut oldest: Option<(u32, u8)> = None;
        let is_lower = |candidate: Option<(u32, u8)>, counter: u32| {
            candidate.map_or(true, |(lowest, _)| counter < lowest)
        };

        for &opl_channel in self.notes.melodic_channels() {
            let note = self.notes.melodic(opl_channel);
            if note.channel_allocated {
                continue;
            }
            if note.note_counter_value == 0 {
                return Some(opl_channel);
            }

            let counter = note.note_counter_value;
            if !note.note_active {
                if is_lower(inactive, counter) {
                    inactive = Some((counter, opl_channel));
                }
                continue;
            }
            if note.instrument_id == instrument_id && is_lower(same_instrument, counter) {
                same_instrument = Some((counter, opl_channel));
            }
            if is_lower(oldest, counter) {
                oldest = Some((counter, opl_channel));
            }
        }

        inactive
            .or(same_instrument)
            .or(oldest)
            .map(|(_, opl_channel)| opl_channel)
    }

    /// Channel pinned to the MIDI channel of the source, claiming the first
    /// free melodic channel on first use. `None` if all channels are taken.
    pub fn allocate_static(&mut self, channel: u8, source: u8) -> Option<u8> {
        if let Some(opl_channel) = self.allocations.get(source, channel) {
            return Some(opl_channel);
        }

        let opl_channel = self
            .notes
            .melodic_channels()
            .iter()
            .copied()
            .find(|&opl_channel| !self.notes.melodic(opl_channel).channel_allocated)?;

        let note = self.notes.melodic_mut(opl_channel);
        note.channel_allocated = true;
        note.source = Some(source);
        note.channel = Some(channel);
        self.allocations.set(source, channel, Some(opl_channel));
        Some(opl_channel)
    }
}
