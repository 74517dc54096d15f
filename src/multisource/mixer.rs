//! Source volume mixer
//!
//! Tracks the volume and fade state of every source. The driver calls
//! [`SourceMixer::update_fading`] from each timer callback; fade volumes are
//! recomputed at most every [`FADING_DELAY`] microseconds so that the OPL
//! level registers are not rewritten on every tick.

use super::{
    FadeAbortType, SourceLevel, SourceLevels, SourceType, UserVolumeSettings, FADING_DELAY,
    MAXIMUM_SOURCES,
};

#[derive(Debug, Clone, Copy, Default)]
struct SourceState {
    level: SourceLevel,
    fade_start_volume: u16,
    fade_end_volume: u16,
    // Microseconds; a zero duration means no fade is active
    fade_passed_time: u32,
    fade_duration: u32,
}

impl SourceState {
    fn is_fading(&self) -> bool {
        self.fade_duration > 0
    }
}

/// Volume and fade state of all sources
#[derive(Debug, Clone)]
pub struct SourceMixer {
    sources: [SourceState; MAXIMUM_SOURCES],
    fade_delay: u32,
    timer_rate: u32,
    user: UserVolumeSettings,
    user_volume_scaling: bool,
}

impl SourceMixer {
    /// Create a mixer ticking every `timer_rate` microseconds
    pub fn new(timer_rate: u32, user_volume_scaling: bool) -> Self {
        SourceMixer {
            sources: [SourceState::default(); MAXIMUM_SOURCES],
            fade_delay: 0,
            timer_rate,
            user: UserVolumeSettings::default(),
            user_volume_scaling,
        }
    }

    /// Timer period in microseconds
    pub fn timer_rate(&self) -> u32 {
        self.timer_rate
    }

    /// Change the timer period; running fades keep their remaining time
    pub fn set_timer_rate(&mut self, timer_rate: u32) {
        self.timer_rate = timer_rate;
    }

    /// Snapshot of every input to the volume calculation
    pub fn levels(&self) -> SourceLevels {
        let mut sources = [SourceLevel::default(); MAXIMUM_SOURCES];
        for (level, state) in sources.iter_mut().zip(self.sources.iter()) {
            *level = state.level;
        }
        SourceLevels {
            sources,
            user: self.user,
            user_volume_scaling: self.user_volume_scaling,
        }
    }

    /// Current level of one source
    pub fn level(&self, source: u8) -> Option<SourceLevel> {
        self.sources.get(source as usize).map(|state| state.level)
    }

    /// Set the content type of a source
    pub fn set_source_type(&mut self, source: u8, source_type: SourceType) {
        if let Some(state) = self.sources.get_mut(source as usize) {
            state.level.source_type = source_type;
        }
    }

    /// Set the current volume of a source
    pub fn set_volume(&mut self, source: u8, volume: u16) {
        if let Some(state) = self.sources.get_mut(source as usize) {
            state.level.volume = volume;
        }
    }

    /// Set the neutral volume of a source
    pub fn set_neutral_volume(&mut self, source: u8, volume: u16) {
        if let Some(state) = self.sources.get_mut(source as usize) {
            state.level.neutral_volume = volume;
        }
    }

    /// Start a linear fade from the current volume to `target_volume`
    pub fn start_fade(&mut self, source: u8, duration_ms: u16, target_volume: u16) {
        if let Some(state) = self.sources.get_mut(source as usize) {
            state.fade_passed_time = 0;
            state.fade_start_volume = state.level.volume;
            state.fade_end_volume = target_volume;
            state.fade_duration = duration_ms as u32 * 1000;
        }
    }

    /// Stop a running fade and settle the volume according to `abort_type`.
    ///
    /// Returns true if a fade was running; the caller must then reapply the
    /// source volume.
    pub fn abort_fade(&mut self, source: u8, abort_type: FadeAbortType) -> bool {
        let Some(state) = self.sources.get_mut(source as usize) else {
            return false;
        };
        if !state.is_fading() {
            return false;
        }

        state.fade_duration = 0;
        match abort_type {
            FadeAbortType::EndVolume => state.level.volume = state.fade_end_volume,
            FadeAbortType::StartVolume => state.level.volume = state.fade_start_volume,
            FadeAbortType::CurrentVolume => {}
        }
        true
    }

    /// Whether a source has an active fade
    pub fn is_fading(&self, source: u8) -> bool {
        self.sources
            .get(source as usize)
            .is_some_and(SourceState::is_fading)
    }

    /// Whether any source has an active fade
    pub fn is_any_fading(&self) -> bool {
        self.sources.iter().any(SourceState::is_fading)
    }

    /// Advance all fades by one timer period.
    ///
    /// Returns, per source, whether its volume changed and must be reapplied.
    pub fn update_fading(&mut self) -> [bool; MAXIMUM_SOURCES] {
        let mut updated = [false; MAXIMUM_SOURCES];

        self.fade_delay -= self.fade_delay.min(self.timer_rate);

        for (state, updated) in self.sources.iter_mut().zip(updated.iter_mut()) {
            if !state.is_fading() {
                continue;
            }

            state.fade_passed_time = state.fade_passed_time.saturating_add(self.timer_rate);
            if state.fade_passed_time >= state.fade_duration {
                state.level.volume = state.fade_end_volume;
                state.fade_duration = 0;
                *updated = true;
            } else if self.fade_delay == 0 {
                let start = state.fade_start_volume as i64;
                let end = state.fade_end_volume as i64;
                let volume = state.fade_passed_time as i64 * (end - start)
                    / state.fade_duration as i64
                    + start;
                state.level.volume = volume.clamp(0, u16::MAX as i64) as u16;
                *updated = true;
            }
        }

        if updated.iter().any(|&changed| changed) {
            self.fade_delay = FADING_DELAY;
        }
        updated
    }

    /// Current user volume settings
    pub fn user_volume(&self) -> UserVolumeSettings {
        self.user
    }

    /// Replace the user volume settings (volumes are clipped to 256)
    pub fn set_user_volume(&mut self, settings: UserVolumeSettings) {
        self.user = settings.clipped();
    }

    /// Whether user volume settings scale source volumes
    pub fn user_volume_scaling(&self) -> bool {
        self.user_volume_scaling
    }

    /// Enable or disable user volume scaling
    pub fn set_user_volume_scaling(&mut self, enabled: bool) {
        self.user_volume_scaling = enabled;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::multisource::DEFAULT_SOURCE_NEUTRAL_VOLUME;

    const TIMER_RATE: u32 = 4000;

    fn run_ticks(mixer: &mut SourceMixer, ticks: u32) {
        for _ in 0..ticks {
            mixer.update_fading();
        }
    }

    #[test]
    fn test_fade_reaches_target() {
        let mut mixer = SourceMixer::new(TIMER_RATE, false);
        mixer.start_fade(0, 100, 0);
        assert!(mixer.is_fading(0));

        // 100 ms at 4 ms per tick
        run_ticks(&mut mixer, 25);
        assert!(!mixer.is_fading(0));
        assert_eq!(mixer.level(0).map(|l| l.volume), Some(0));
    }

    #[test]
    fn test_fade_progresses_linearly() {
        let mut mixer = SourceMixer::new(TIMER_RATE, false);
        mixer.set_volume(0, 200);
        mixer.start_fade(0, 1000, 100);

        let mut previous = 200;
        for _ in 0..200 {
            mixer.update_fading();
            let volume = mixer.level(0).map(|l| l.volume).unwrap_or_default();
            assert!(volume <= previous, "fade down must not increase volume");
            previous = volume;
        }
        // 800 ms in; last update happened at most one fade delay ago
        let volume = mixer.level(0).map(|l| l.volume).unwrap_or_default();
        assert!((118..=123).contains(&volume), "volume {} not near 120", volume);
    }

    #[test]
    fn test_fade_updates_throttled() {
        let mut mixer = SourceMixer::new(TIMER_RATE, false);
        mixer.start_fade(0, 1000, 0);

        let first = mixer.update_fading();
        assert!(first[0], "first tick updates immediately");
        // The next updates wait for the fading delay to elapse
        let updates = (0..6).filter(|_| mixer.update_fading()[0]).count();
        assert_eq!(updates, 0);
        assert!(mixer.update_fading()[0]);
    }

    #[test]
    fn test_abort_fade_modes() {
        let mut mixer = SourceMixer::new(TIMER_RATE, false);

        for (abort_type, expected) in [
            (FadeAbortType::EndVolume, Some(55)),
            (FadeAbortType::StartVolume, Some(DEFAULT_SOURCE_NEUTRAL_VOLUME)),
        ] {
            mixer.set_volume(1, DEFAULT_SOURCE_NEUTRAL_VOLUME);
            mixer.start_fade(1, 500, 55);
            run_ticks(&mut mixer, 10);
            assert!(mixer.abort_fade(1, abort_type));
            assert!(!mixer.is_fading(1));
            assert_eq!(mixer.level(1).map(|l| l.volume), expected);
        }

        mixer.set_volume(1, 255);
        mixer.start_fade(1, 500, 55);
        run_ticks(&mut mixer, 1);
        let current = mixer.level(1).map(|l| l.volume);
        assert!(mixer.abort_fade(1, FadeAbortType::CurrentVolume));
        assert_eq!(mixer.level(1).map(|l| l.volume), current);
    }

    #[test]
    fn test_abort_without_fade_is_noop() {
        let mut mixer = SourceMixer::new(TIMER_RATE, false);
        mixer.set_volume(2, 77);
        assert!(!mixer.abort_fade(2, FadeAbortType::StartVolume));
        assert_eq!(mixer.level(2).map(|l| l.volume), Some(77));
    }

    #[test]
    fn test_independent_fades() {
        let mut mixer = SourceMixer::new(TIMER_RATE, false);
        mixer.start_fade(0, 40, 0);
        mixer.start_fade(3, 400, 100);

        run_ticks(&mut mixer, 10);
        assert_eq!(mixer.level(0).map(|l| l.volume), Some(0));
        assert!(!mixer.is_fading(0));
        assert!(mixer.is_fading(3));
        assert!(mixer.is_any_fading());

        run_ticks(&mut mixer, 90);
        assert_eq!(mixer.level(3).map(|l| l.volume), Some(100));
        assert!(!mixer.is_any_fading());
    }

    #[test]
    fn test_out_of_range_source_ignored() {
        let mut mixer = SourceMixer::new(TIMER_RATE, false);
        mixer.set_volume(MAXIMUM_SOURCES as u8, 0);
        mixer.start_fade(200, 10, 0);
        assert!(!mixer.is_any_fading());
        assert_eq!(mixer.level(MAXIMUM_SOURCES as u8), None);
    }

    #[test]
    fn test_levels_snapshot() {
        let mut mixer = SourceMixer::new(TIMER_RATE, true);
        mixer.set_source_type(4, SourceType::Sfx);
        mixer.set_neutral_volume(4, 128);
        mixer.set_user_volume(UserVolumeSettings {
            music_volume: 300,
            sfx_volume: 64,
            mute: false,
        });

        let levels = mixer.levels();
        assert!(levels.user_volume_scaling);
        assert_eq!(levels.user.music_volume, 256);
        assert_eq!(levels.source(4).source_type, SourceType::Sfx);
        assert_eq!(levels.source(4).neutral_volume, 128);
    }
}
