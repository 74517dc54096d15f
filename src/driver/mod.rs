//! Multisource OPL driver
//!
//! [`AdlibMultisource`] receives MIDI events from up to ten sources, keeps
//! the controller state of every source and channel, allocates OPL channels
//! and writes the resulting registers through an [`OplBackend`].
//!
//! # Locking
//! State is split over several locks, always acquired in this order:
//! allocations, voices, mixer. Banks and controller defaults are read last
//! and released immediately. Volume inputs are copied out of the mixer before
//! the voice lock is taken, so the timer callback never holds two locks at
//! once while fading.

mod allocator;
mod calculator;
mod events;
mod notes;
mod rhythm;
mod voices;

pub use allocator::{AllocationTable, ChannelAllocator};
pub use calculator::{
    calculate_frequency, calculate_panning, calculate_pitch_bend, calculate_unscaled_volume,
    calculate_volume, CalculationContext, DefaultStrategy, DriverStrategy,
    OPL_FREQUENCY_CONVERSION_FACTOR, OPL_NOTE_FREQUENCIES, OPL_VOLUME_LOOKUP,
};
pub use notes::{ActiveNote, NoteSlot, NoteTable, OPL_NUM_RHYTHM_INSTRUMENTS};

use std::borrow::Cow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard, RwLock};

use crate::backend::{OplBackend, TimerCallback};
use crate::config::{DriverConfig, Property, PROPERTY_QUERY};
use crate::instrument::{InstrumentBanks, OplInstrumentDefinition, RhythmType};
use crate::midi::{ControlData, ControllerDefaults, MIDI_CHANNEL_COUNT};
use crate::multisource::{
    FadeAbortType, SourceLevel, SourceMixer, SourceType, UserVolumeSettings, MAXIMUM_SOURCES,
};
use crate::opl::OplType;
use crate::{AdlibError, Result};

use num_traits::FromPrimitive;
use voices::{Env, VoiceState};

/// How often a timer tick waiting for the voice lock checks for `close`
const VOICE_LOCK_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Sources addressed by a volume or fade operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceTarget {
    /// Every source
    All,
    /// One source
    Source(u8),
}

impl From<u8> for SourceTarget {
    fn from(source: u8) -> Self {
        SourceTarget::Source(source)
    }
}

impl SourceTarget {
    fn sources(self) -> std::ops::Range<u8> {
        match self {
            SourceTarget::All => 0..MAXIMUM_SOURCES as u8,
            SourceTarget::Source(source) if (source as usize) < MAXIMUM_SOURCES => source..source + 1,
            SourceTarget::Source(source) => {
                log::warn!("Source {} out of range", source);
                0..0
            }
        }
    }

    fn filter(self) -> Option<u8> {
        match self {
            SourceTarget::All => None,
            SourceTarget::Source(source) => Some(source),
        }
    }
}

/// MIDI driver for OPL2, dual OPL2 and OPL3 chips with multiple sources.
///
/// Share it as `Arc<AdlibMultisource<_>>`; every method takes `&self`.
/// `S` customizes allocation and calculations, see [`DriverStrategy`].
pub struct AdlibMultisource<B, S = DefaultStrategy> {
    config: RwLock<DriverConfig>,
    strategy: S,
    allocations: Mutex<AllocationTable>,
    voices: Mutex<VoiceState<B>>,
    mixer: Mutex<SourceMixer>,
    banks: RwLock<InstrumentBanks>,
    controller_defaults: RwLock<ControllerDefaults>,
    timer_proc: Mutex<Option<TimerCallback>>,
    is_open: AtomicBool,
}

impl<B: OplBackend> AdlibMultisource<B> {
    /// Create a closed driver with the default calculations
    pub fn new(backend: B, config: DriverConfig) -> Self {
        Self::with_strategy(backend, config, DefaultStrategy)
    }
}

impl<B: OplBackend, S: DriverStrategy> AdlibMultisource<B, S> {
    /// Create a closed driver with custom allocation or calculations
    pub fn with_strategy(backend: B, config: DriverConfig, strategy: S) -> Self {
        AdlibMultisource {
            strategy,
            allocations: Mutex::new(AllocationTable::default()),
            voices: Mutex::new(VoiceState::new(backend, config.opl_type)),
            mixer: Mutex::new(SourceMixer::new(config.timer_rate(), config.user_volume_scaling)),
            banks: RwLock::new(InstrumentBanks::default()),
            controller_defaults: RwLock::new(ControllerDefaults::default()),
            timer_proc: Mutex::new(None),
            is_open: AtomicBool::new(false),
            config: RwLock::new(config),
        }
    }

    /// Initialize the chip and start the timer.
    ///
    /// Fails with [`AdlibError::AlreadyOpen`], [`AdlibError::DeviceNotAvailable`]
    /// if the backend lacks the chip type, or [`AdlibError::CannotConnect`] if
    /// the backend does not initialize.
    pub fn open(self: &Arc<Self>) -> Result<()>
    where
        B: 'static,
        S: 'static,
    {
        if self.is_open() {
            return Err(AdlibError::AlreadyOpen);
        }
        let config = self.config();
        config.validate()?;

        let mut voices = self.voices.lock();
        {
            let backend = voices.shadow.backend_mut();
            // Dual OPL2 can be emulated by an OPL3
            let supported = backend.supports(config.opl_type)
                || (config.opl_type == OplType::DualOpl2 && backend.supports(OplType::Opl3));
            if !supported {
                return Err(AdlibError::DeviceNotAvailable(config.opl_type));
            }
            backend.init().map_err(|err| match err {
                AdlibError::CannotConnect(reason) => AdlibError::CannotConnect(reason),
                other => AdlibError::CannotConnect(other.to_string()),
            })?;
        }

        voices.notes.determine_melodic_channels(config.opl_type);
        let defaults = *self.controller_defaults.read();
        for source in 0..MAXIMUM_SOURCES as u8 {
            for channel in 0..MIDI_CHANNEL_COUNT as u8 {
                let control = voices.control_mut(source, channel);
                control.volume = config.default_channel_volume;
                defaults.apply(channel as usize, control);
            }
        }
        voices.init_opl(&config);

        let weak: Weak<Self> = Arc::downgrade(self);
        let callback: TimerCallback = Box::new(move || {
            if let Some(driver) = weak.upgrade() {
                driver.on_timer();
            }
        });
        voices
            .shadow
            .backend_mut()
            .start(callback, config.timer_frequency);
        self.is_open.store(true, Ordering::Release);

        log::info!(
            "OPL driver open: {:?}, {} Hz timer, {:?} accuracy",
            config.opl_type,
            config.timer_frequency,
            config.accuracy_mode
        );
        Ok(())
    }

    /// Silence the chip and stop the timer. Does nothing if not open.
    pub fn close(&self) {
        if !self.is_open.swap(false, Ordering::AcqRel) {
            return;
        }
        let config = self.config();
        let mut voices = self.voices.lock();
        voices.stop_all_notes(&config, true);
        voices.shadow.backend_mut().stop();
        log::info!("OPL driver closed");
    }

    /// Whether the driver is open
    pub fn is_open(&self) -> bool {
        self.is_open.load(Ordering::Acquire)
    }

    /// Current configuration
    pub fn config(&self) -> DriverConfig {
        *self.config.read()
    }

    /// Read or change a runtime setting.
    ///
    /// `param` [`PROPERTY_QUERY`] returns the current value; any other value
    /// sets the property and returns 0.
    pub fn property(&self, property: Property, param: u32) -> u32 {
        if param == PROPERTY_QUERY {
            let config = self.config();
            return match property {
                Property::UserVolumeScaling => self.mixer.lock().user_volume_scaling() as u32,
                Property::AccuracyMode => config.accuracy_mode as u32,
                Property::ChannelAllocationMode => config.allocation_mode as u32,
                Property::RhythmModeIgnoreNoteOff => config.rhythm_mode_ignore_note_offs as u32,
            };
        }

        match property {
            Property::UserVolumeScaling => {
                let enabled = param != 0;
                self.config.write().user_volume_scaling = enabled;
                self.mixer.lock().set_user_volume_scaling(enabled);
            }
            Property::AccuracyMode => {
                self.config.write().accuracy_mode = FromPrimitive::from_u32(param).unwrap_or_default();
            }
            Property::ChannelAllocationMode => {
                self.config.write().allocation_mode =
                    FromPrimitive::from_u32(param).unwrap_or_default();
            }
            Property::RhythmModeIgnoreNoteOff => {
                self.config.write().rhythm_mode_ignore_note_offs = param != 0;
            }
        }
        0
    }

    /// Timer period in microseconds
    pub fn base_tempo(&self) -> u32 {
        self.config().timer_rate()
    }

    /// Change the timer callback frequency, also while open
    pub fn set_timer_frequency(&self, frequency: u32) -> Result<()> {
        let config = DriverConfig {
            timer_frequency: frequency,
            ..self.config()
        };
        config.validate()?;
        *self.config.write() = config;
        self.mixer.lock().set_timer_rate(config.timer_rate());
        if self.is_open() {
            self.voices
                .lock()
                .shadow
                .backend_mut()
                .set_callback_frequency(frequency);
        }
        log::debug!("Timer frequency set to {} Hz", frequency);
        Ok(())
    }

    /// Register a callback invoked after every driver timer tick.
    ///
    /// The callback runs with the callback slot locked and must not replace
    /// itself.
    pub fn set_timer_callback(&self, callback: Option<TimerCallback>) {
        *self.timer_proc.lock() = callback;
    }

    /// Timer tick: advance fades, then run the registered callback.
    /// Does nothing once the driver is closed.
    pub fn on_timer(&self) {
        if !self.is_open() {
            return;
        }
        let updated = self.mixer.lock().update_fading();
        if updated.iter().any(|&changed| changed) {
            let env = self.env();
            let Some(mut voices) = self.lock_voices_while_open() else {
                return;
            };
            for (source, &changed) in updated.iter().enumerate() {
                if changed {
                    voices.recalculate_volumes(&env, None, Some(source as u8));
                }
            }
        }

        if let Some(callback) = self.timer_proc.lock().as_mut() {
            callback();
        }
    }

    /// Wait for the voice lock, giving up if the driver is closed meanwhile.
    ///
    /// `close` holds the voice lock while the backend stops its timer, and a
    /// backend may wait for the running callback to return.
    fn lock_voices_while_open(&self) -> Option<MutexGuard<'_, VoiceState<B>>> {
        loop {
            if let Some(voices) = self.voices.try_lock_for(VOICE_LOCK_POLL_INTERVAL) {
                return Some(voices);
            }
            if !self.is_open() {
                log::debug!("Timer tick dropped: driver closed");
                return None;
            }
        }
    }

    /// Switch OPL rhythm mode on or off
    pub fn set_rhythm_mode(&self, rhythm_mode: bool) {
        let config = self.config();
        let mut allocations = self.allocations.lock();
        let mut voices = self.voices.lock();
        voices.set_rhythm_mode(&config, &mut allocations, rhythm_mode);
    }

    /// Whether rhythm mode is on
    pub fn rhythm_mode(&self) -> bool {
        self.voices.lock().notes.rhythm_mode()
    }

    /// Immediately end every note on the chip
    pub fn stop_all_notes(&self) {
        let config = self.config();
        self.voices.lock().stop_all_notes(&config, true);
    }

    /// Immediately end the notes of a source, optionally only on one MIDI
    /// channel, ignoring sustain
    pub fn stop_source_notes(&self, source: u8, channel: Option<u8>) {
        let config = self.config();
        self.voices.lock().stop_notes(&config, Some(source), channel);
    }

    /// Set the content type of one or all sources
    pub fn set_source_type(&self, target: impl Into<SourceTarget>, source_type: SourceType) {
        let target = target.into();
        {
            let mut mixer = self.mixer.lock();
            for source in target.sources() {
                mixer.set_source_type(source, source_type);
            }
        }
        self.apply_source_volume(target);
    }

    /// Set the volume of one or all sources
    pub fn set_source_volume(&self, target: impl Into<SourceTarget>, volume: u16) {
        let target = target.into();
        {
            let mut mixer = self.mixer.lock();
            for source in target.sources() {
                mixer.set_volume(source, volume);
            }
        }
        self.apply_source_volume(target);
    }

    /// Set the volume at which one or all sources play unattenuated
    pub fn set_source_neutral_volume(&self, target: impl Into<SourceTarget>, volume: u16) {
        let target = target.into();
        {
            let mut mixer = self.mixer.lock();
            for source in target.sources() {
                mixer.set_neutral_volume(source, volume);
            }
        }
        self.apply_source_volume(target);
    }

    /// Volume state of a source
    pub fn source_volume(&self, source: u8) -> Option<SourceLevel> {
        self.mixer.lock().level(source)
    }

    /// Fade a source linearly from its current volume to `target_volume`
    pub fn start_fade(&self, source: u8, duration_ms: u16, target_volume: u16) {
        if source as usize >= MAXIMUM_SOURCES {
            log::warn!("Cannot fade source {}: out of range", source);
            return;
        }
        log::debug!("Fading source {} to {} over {} ms", source, target_volume, duration_ms);
        self.mixer.lock().start_fade(source, duration_ms, target_volume);
    }

    /// Stop the fades of one or all sources
    pub fn abort_fade(&self, target: impl Into<SourceTarget>, abort_type: FadeAbortType) {
        let target = target.into();
        let aborted: Vec<u8> = {
            let mut mixer = self.mixer.lock();
            target
                .sources()
                .filter(|&source| mixer.abort_fade(source, abort_type))
                .collect()
        };
        for source in aborted {
            self.apply_source_volume(SourceTarget::Source(source));
        }
    }

    /// Whether one source, or any source, is fading
    pub fn is_fading(&self, target: impl Into<SourceTarget>) -> bool {
        let mixer = self.mixer.lock();
        match target.into() {
            SourceTarget::All => mixer.is_any_fading(),
            SourceTarget::Source(source) => mixer.is_fading(source),
        }
    }

    /// Apply new user volume settings to all sources
    pub fn sync_sound_settings(&self, settings: UserVolumeSettings) {
        self.mixer.lock().set_user_volume(settings);
        self.apply_source_volume(SourceTarget::All);
    }

    /// Current user volume settings
    pub fn user_volume(&self) -> UserVolumeSettings {
        self.mixer.lock().user_volume()
    }

    /// Release a source after it finished playing: sustain off, fade
    /// settled, notes ended, static channels freed and controller defaults
    /// reapplied.
    pub fn deinit_source(&self, source: u8) {
        if source as usize >= MAXIMUM_SOURCES {
            log::warn!("Cannot deinit source {}: out of range", source);
            return;
        }
        log::debug!("Deinitializing source {}", source);
        let config = self.config();

        {
            let mut voices = self.voices.lock();
            for channel in 0..MIDI_CHANNEL_COUNT as u8 {
                voices.control_mut(source, channel).sustain = false;
                voices.release_sustained(&config, source, channel);
            }
        }

        self.abort_fade(source, FadeAbortType::EndVolume);

        let defaults = *self.controller_defaults.read();
        let mut allocations = self.allocations.lock();
        let mut voices = self.voices.lock();
        voices.stop_notes(&config, Some(source), None);

        allocations.clear_source(source);
        for &opl_channel in voices.notes.melodic_channels() {
            let note = voices.notes.melodic_mut(opl_channel);
            if note.channel_allocated && note.source == Some(source) {
                note.channel_allocated = false;
            }
        }

        for channel in 0..MIDI_CHANNEL_COUNT as u8 {
            defaults.apply(channel as usize, voices.control_mut(source, channel));
        }
    }

    /// Replace the melodic instrument bank
    pub fn set_instrument_bank(&self, bank: impl Into<Cow<'static, [OplInstrumentDefinition]>>) {
        self.banks.write().set_melodic(bank);
    }

    /// Replace the rhythm instrument bank covering notes `first_note..=last_note`
    pub fn set_rhythm_bank(
        &self,
        bank: impl Into<Cow<'static, [OplInstrumentDefinition]>>,
        first_note: u8,
        last_note: u8,
    ) -> Result<()> {
        self.banks.write().set_rhythm(bank, first_note, last_note)
    }

    /// Set or clear the program remapping table
    pub fn set_instrument_remapping(&self, remapping: Option<Cow<'static, [u8]>>) {
        self.banks.write().set_remapping(remapping);
    }

    /// Replace the controller defaults applied on open and source deinit
    pub fn set_controller_defaults(&self, defaults: ControllerDefaults) {
        *self.controller_defaults.write() = defaults;
    }

    /// Current controller defaults
    pub fn controller_defaults(&self) -> ControllerDefaults {
        *self.controller_defaults.read()
    }

    /// Controller state of a MIDI channel of a source
    pub fn controller_state(&self, source: u8, channel: u8) -> Option<ControlData> {
        if source as usize >= MAXIMUM_SOURCES || channel as usize >= MIDI_CHANNEL_COUNT {
            return None;
        }
        Some(*self.voices.lock().control(source, channel))
    }

    /// Note playing on an OPL channel
    pub fn active_note(&self, opl_channel: u8) -> Option<ActiveNote> {
        if opl_channel as usize >= self.config().opl_type.channel_count() {
            return None;
        }
        Some(*self.voices.lock().notes.melodic(opl_channel))
    }

    /// Note of a rhythm instrument
    pub fn active_rhythm_note(&self, rhythm_type: RhythmType) -> ActiveNote {
        *self.voices.lock().notes.rhythm(rhythm_type)
    }

    /// OPL channels currently used for melodic notes
    pub fn melodic_channels(&self) -> &'static [u8] {
        self.voices.lock().notes.melodic_channels()
    }

    /// Last value written to a chip register
    pub fn shadow_register(&self, reg: u16) -> u8 {
        self.voices.lock().shadow.value(reg)
    }

    fn env(&self) -> Env<'_, S> {
        Env {
            config: self.config(),
            levels: self.mixer.lock().levels(),
            strategy: &self.strategy,
        }
    }

    fn apply_source_volume(&self, target: SourceTarget) {
        if !self.is_open() {
            return;
        }
        let env = self.env();
        self.voices.lock().recalculate_volumes(&env, None, target.filter());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{RecorderHandle, RecordingBackend};

    fn open_driver(config: DriverConfig) -> (Arc<AdlibMultisource<RecordingBackend>>, RecorderHandle) {
        let (backend, handle) = RecordingBackend::new();
        let driver = Arc::new(AdlibMultisource::new(backend, config));
        driver.open().expect("recording backend opens");
        (driver, handle)
    }

    #[test]
    fn test_open_starts_timer() {
        let (driver, handle) = open_driver(DriverConfig::default());
        assert!(driver.is_open());
        assert!(handle.is_initialized());
        assert_eq!(handle.timer_frequency(), Some(250));
        assert_eq!(driver.base_tempo(), 4000);
    }

    #[test]
    fn test_open_twice_fails() {
        let (driver, _handle) = open_driver(DriverConfig::default());
        let err = driver.open().expect_err("second open fails");
        assert!(matches!(err, AdlibError::AlreadyOpen));
        assert_eq!(err.driver_code(), Some(5));
    }

    #[test]
    fn test_close_stops_timer() {
        let (driver, handle) = open_driver(DriverConfig::default());
        driver.close();
        assert!(!driver.is_open());
        assert_eq!(handle.timer_frequency(), None);
        driver.close();
    }

    #[test]
    fn test_property_query_and_set() {
        let (backend, _handle) = RecordingBackend::new();
        let driver = AdlibMultisource::new(backend, DriverConfig::default());

        assert_eq!(driver.property(Property::AccuracyMode, PROPERTY_QUERY), 0);
        assert_eq!(driver.property(Property::AccuracyMode, 1), 0);
        assert_eq!(driver.property(Property::AccuracyMode, PROPERTY_QUERY), 1);

        driver.property(Property::ChannelAllocationMode, 1);
        assert_eq!(driver.property(Property::ChannelAllocationMode, PROPERTY_QUERY), 1);
        // Unknown values fall back to the default mode
        driver.property(Property::ChannelAllocationMode, 7);
        assert_eq!(driver.property(Property::ChannelAllocationMode, PROPERTY_QUERY), 0);

        driver.property(Property::UserVolumeScaling, 1);
        assert_eq!(driver.property(Property::UserVolumeScaling, PROPERTY_QUERY), 1);
        driver.property(Property::RhythmModeIgnoreNoteOff, 1);
        assert!(driver.config().rhythm_mode_ignore_note_offs);
    }

    #[test]
    fn test_source_target_range() {
        assert_eq!(SourceTarget::All.sources().count(), MAXIMUM_SOURCES);
        assert_eq!(SourceTarget::from(3).sources().collect::<Vec<_>>(), vec![3]);
        assert_eq!(SourceTarget::Source(10).sources().count(), 0);
    }

    #[test]
    fn test_source_volume_settings() {
        let (driver, _handle) = open_driver(DriverConfig::default());
        driver.set_source_volume(SourceTarget::All, 100);
        driver.set_source_type(2, SourceType::Sfx);
        driver.set_source_neutral_volume(2, 200);

        let level = driver.source_volume(2).expect("source in range");
        assert_eq!(level.volume, 100);
        assert_eq!(level.neutral_volume, 200);
        assert_eq!(level.source_type, SourceType::Sfx);
        assert_eq!(driver.source_volume(0).map(|level| level.volume), Some(100));
    }

    #[test]
    fn test_set_timer_frequency() {
        let (driver, handle) = open_driver(DriverConfig::default());
        driver.set_timer_frequency(500).expect("valid frequency");
        assert_eq!(handle.timer_frequency(), Some(500));
        assert_eq!(driver.base_tempo(), 2000);

        assert!(driver.set_timer_frequency(0).is_err());
        assert_eq!(driver.base_tempo(), 2000, "invalid frequency is rejected");
    }

    #[test]
    fn test_timer_callback_runs_after_tick() {
        use std::sync::atomic::AtomicU32;

        let (driver, handle) = open_driver(DriverConfig::default());
        let ticks = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&ticks);
        driver.set_timer_callback(Some(Box::new(move || {
            counter.fetch_add(1, Ordering::Relaxed);
        })));

        assert!(handle.fire_timer());
        assert!(handle.fire_timer());
        assert_eq!(ticks.load(Ordering::Relaxed), 2);
    }

    /// Backend running its timer on a thread, joined by `stop`
    struct ThreadTimerBackend {
        running: Arc<AtomicBool>,
        completed: Arc<std::sync::atomic::AtomicU32>,
        thread: Option<std::thread::JoinHandle<()>>,
    }

    impl OplBackend for ThreadTimerBackend {
        fn init(&mut self) -> Result<()> {
            Ok(())
        }

        fn reset(&mut self) {}

        fn write_reg(&mut self, _reg: u16, _value: u8) {}

        fn is_stereo(&self) -> bool {
            false
        }

        fn start(&mut self, mut callback: TimerCallback, _frequency: u32) {
            self.running.store(true, Ordering::SeqCst);
            let running = Arc::clone(&self.running);
            let completed = Arc::clone(&self.completed);
            self.thread = Some(std::thread::spawn(move || {
                while running.load(Ordering::SeqCst) {
                    callback();
                    completed.fetch_add(1, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_micros(200));
                }
            }));
        }

        fn stop(&mut self) {
            self.running.store(false, Ordering::SeqCst);
            if let Some(thread) = self.thread.take() {
                thread.join().expect("timer thread exits cleanly");
            }
        }

        fn set_callback_frequency(&mut self, _frequency: u32) {}
    }

    #[test]
    fn test_close_while_fade_tick_waits_for_voices() {
        use std::sync::atomic::AtomicU32;
        use std::time::Instant;

        let running = Arc::new(AtomicBool::new(false));
        let completed = Arc::new(AtomicU32::new(0));
        let backend = ThreadTimerBackend {
            running: Arc::clone(&running),
            completed: Arc::clone(&completed),
            thread: None,
        };
        let driver = Arc::new(AdlibMultisource::new(backend, DriverConfig::default()));
        driver.open().expect("threaded backend opens");
        driver.send(0, 0x00_7F_3C_90);
        driver.start_fade(0, 60_000, 0);

        // Hold the voices so a fade step blocks on them
        let voices = driver.voices.lock();
        std::thread::sleep(Duration::from_millis(50));

        let closer = {
            let driver = Arc::clone(&driver);
            std::thread::spawn(move || driver.close())
        };
        while driver.is_open() {
            std::thread::yield_now();
        }

        // The pending tick must give up without the voice lock
        let before = completed.load(Ordering::SeqCst);
        let deadline = Instant::now() + Duration::from_secs(5);
        while completed.load(Ordering::SeqCst) == before {
            assert!(Instant::now() < deadline, "timer tick still waiting after close");
            std::thread::sleep(Duration::from_millis(1));
        }

        drop(voices);
        closer.join().expect("close finishes");
        assert!(!running.load(Ordering::SeqCst));
        assert!(!driver.is_open());
    }
}
