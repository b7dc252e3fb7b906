//! Sequencer facade - transport, tempo and pattern editing for the UI thread

use std::num::IntErrorKind;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};

use crate::audio::VoicePlayer;
use crate::config::Config;

pub mod pattern;
pub mod playback;

pub use pattern::{PatternError, PatternStore, VoiceId, TOTAL_STEPS};
pub use playback::{step_interval, StepEvent, STEPS_PER_BEAT};

use playback::{PlaybackEngine, Transport};

pub const MIN_BPM: u32 = 30;
pub const MAX_BPM: u32 = 300;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum InputError {
    #[error("{0:?} is not a whole number of beats per minute")]
    NotANumber(String),
    #[error("volume is not a number")]
    NotANumberVolume,
}

#[derive(Debug, thiserror::Error)]
pub enum SequencerError {
    #[error("failed to start playback clock: {0}")]
    SpawnClock(#[from] std::io::Error),
}

/// An accepted control value, noting whether it had to be pulled into range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Validated<T> {
    InRange(T),
    Clamped(T),
}

impl<T: Copy> Validated<T> {
    pub fn value(self) -> T {
        match self {
            Validated::InRange(v) | Validated::Clamped(v) => v,
        }
    }

    pub fn was_clamped(self) -> bool {
        matches!(self, Validated::Clamped(_))
    }
}

pub fn clamp_bpm(bpm: i64) -> Validated<u32> {
    if bpm < MIN_BPM as i64 {
        Validated::Clamped(MIN_BPM)
    } else if bpm > MAX_BPM as i64 {
        Validated::Clamped(MAX_BPM)
    } else {
        Validated::InRange(bpm as u32)
    }
}

/// Parse typed tempo input. Numbers too large to represent still clamp.
pub fn parse_bpm(raw: &str) -> Result<Validated<u32>, InputError> {
    match raw.trim().parse::<i64>() {
        Ok(bpm) => Ok(clamp_bpm(bpm)),
        Err(e) => match e.kind() {
            IntErrorKind::PosOverflow => Ok(Validated::Clamped(MAX_BPM)),
            IntErrorKind::NegOverflow => Ok(Validated::Clamped(MIN_BPM)),
            _ => Err(InputError::NotANumber(raw.to_string())),
        },
    }
}

pub fn validate_volume(volume: f32) -> Result<Validated<f32>, InputError> {
    if volume.is_nan() {
        Err(InputError::NotANumberVolume)
    } else if (0.0..=1.0).contains(&volume) {
        Ok(Validated::InRange(volume))
    } else {
        Ok(Validated::Clamped(volume.clamp(0.0, 1.0)))
    }
}

pub struct Sequencer {
    transport: Arc<Transport>,
    patterns: PatternStore,
    player: Arc<dyn VoicePlayer>,
    wake: Sender<()>,
}

impl Sequencer {
    /// Start the playback clock. It runs until the sequencer is dropped.
    pub fn new(
        player: Arc<dyn VoicePlayer>,
        patterns: PatternStore,
        config: &Config,
    ) -> Result<Self, SequencerError> {
        let bpm = clamp_bpm(config.bpm as i64).value();
        let volume = validate_volume(config.volume).map_or(1.0, Validated::value);
        let transport = Arc::new(Transport::new(bpm, volume));
        let (wake, wake_rx) = crossbeam_channel::bounded(1);

        PlaybackEngine {
            transport: Arc::clone(&transport),
            patterns: patterns.reader(),
            player: Arc::clone(&player),
            wake: wake_rx,
            idle_poll: config.idle_poll,
        }
        .spawn()?;

        player.set_global_volume(volume);

        Ok(Self {
            transport,
            patterns,
            player,
            wake,
        })
    }

    pub fn play(&mut self) {
        self.transport.start();
        let _ = self.wake.try_send(());
        log::info!("sequencer: play");
    }

    /// Stop and emit one [`StepEvent::Stopped`] before returning.
    pub fn stop(&mut self) {
        self.transport.stop();
        log::info!("sequencer: stop");
    }

    pub fn is_playing(&self) -> bool {
        self.transport.is_running()
    }

    pub fn current_step(&self) -> usize {
        self.transport.current_step()
    }

    pub fn bpm(&self) -> u32 {
        self.transport.bpm()
    }

    /// Clamp to [`MIN_BPM`, `MAX_BPM`] and apply; returns the stored tempo.
    pub fn set_bpm(&mut self, bpm: i64) -> u32 {
        self.apply_bpm(clamp_bpm(bpm))
    }

    /// Apply typed tempo input. Garbage leaves the tempo unchanged.
    pub fn set_bpm_text(&mut self, raw: &str) -> Result<u32, InputError> {
        match parse_bpm(raw) {
            Ok(bpm) => Ok(self.apply_bpm(bpm)),
            Err(e) => {
                log::warn!("ignoring tempo input: {e}; BPM stays {}", self.bpm());
                Err(e)
            }
        }
    }

    fn apply_bpm(&mut self, bpm: Validated<u32>) -> u32 {
        let value = bpm.value();
        if bpm.was_clamped() {
            log::debug!("tempo clamped to {value}");
        }
        self.transport.set_bpm(value);
        log::info!("sequencer: BPM set to {value}");
        value
    }

    pub fn step_interval(&self) -> Duration {
        step_interval(self.bpm())
    }

    pub fn volume(&self) -> f32 {
        self.transport.volume()
    }

    /// Clamp to [0, 1], store and forward to the voice player.
    pub fn set_volume(&mut self, volume: f32) -> Result<f32, InputError> {
        let volume = match validate_volume(volume) {
            Ok(v) => v.value(),
            Err(e) => {
                log::warn!("ignoring volume input: {e}");
                return Err(e);
            }
        };
        self.transport.set_volume(volume);
        self.player.set_global_volume(volume);
        Ok(volume)
    }

    /// Call `listener` on every step and once on every stop.
    ///
    /// Listeners run on the clock thread (or inside [`Sequencer::stop`]) and
    /// should return quickly.
    pub fn add_step_change_listener<F>(&mut self, listener: F)
    where
        F: FnMut(StepEvent) + Send + 'static,
    {
        self.transport.listeners().add_callback(Box::new(listener));
    }

    /// Step changes as a channel; dropping the receiver unsubscribes.
    pub fn subscribe(&mut self) -> Receiver<StepEvent> {
        self.transport.listeners().add_channel()
    }

    pub fn patterns(&self) -> &PatternStore {
        &self.patterns
    }

    pub fn patterns_mut(&mut self) -> &mut PatternStore {
        &mut self.patterns
    }

    fn edit<T>(
        &mut self,
        voice: &str,
        edit: impl FnOnce(&mut PatternStore, VoiceId) -> Result<T, PatternError>,
    ) -> Option<T> {
        let result = self
            .patterns
            .voice_id(voice)
            .and_then(|id| edit(&mut self.patterns, id));
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                log::warn!("pattern edit ignored: {e}");
                None
            }
        }
    }

    /// Set one cell by voice name. Unknown voices and steps are ignored.
    pub fn set_step(&mut self, voice: &str, step: usize, on: bool) -> bool {
        self.edit(voice, |store, id| store.set_cell(id, step, on))
            .is_some()
    }

    pub fn toggle_step(&mut self, voice: &str, step: usize) -> Option<bool> {
        self.edit(voice, |store, id| store.toggle(id, step))
    }

    pub fn set_pattern(&mut self, voice: &str, cells: [bool; TOTAL_STEPS]) -> bool {
        self.edit(voice, |store, id| store.set_row(id, cells))
            .is_some()
    }

    pub fn clear_pattern(&mut self, voice: &str) {
        self.edit(voice, |store, id| store.clear(id));
    }

    pub fn pattern(&self, voice: &str) -> Option<[bool; TOTAL_STEPS]> {
        self.patterns
            .voice_id(voice)
            .and_then(|id| self.patterns.get_row(id))
            .ok()
    }
}
