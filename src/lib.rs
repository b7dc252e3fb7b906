//! JamBit - a 16-step drum machine library
//!
//! This library provides the core components of the drum machine:
//! - Procedural synthesis of the Kick, Snare and Hat voices
//! - A sound bank that plays voices by name through cpal
//! - Per-voice step patterns the UI edits while the clock reads them
//! - A playback clock that triggers voices and reports step changes
//! - Optional MIDI echo of every trigger

pub mod audio;
pub mod config;
pub mod midi;
pub mod sequencer;
mod util;

// Re-export commonly used types
pub use audio::synth::{DRUM_KIT, HAT, KICK, SNARE};
pub use audio::{AudioOutput, SampleBuffer, SoundBank, Synthesizer, VoicePlayer, WaveformParams};
pub use config::Config;
pub use midi::{MidiEcho, MidiOutputDevice};
pub use sequencer::pattern::row_from_bits;
pub use sequencer::{PatternStore, Sequencer, StepEvent, TOTAL_STEPS};
