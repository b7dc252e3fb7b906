//! Runtime configuration shared by the sound bank and the sequencer

use std::time::Duration;

pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;
pub const DEFAULT_BUFFER_FRAMES: u32 = 256;
pub const DEFAULT_BPM: u32 = 120;

#[derive(Debug, Clone)]
pub struct Config {
    /// Output and synthesis rate in Hz
    pub sample_rate: u32,
    /// Device buffer size in frames; small keeps trigger latency low
    pub buffer_frames: u32,
    /// Initial tempo, clamped like any other tempo change
    pub bpm: u32,
    /// Initial global volume, clamped to [0, 1]
    pub volume: f32,
    /// How long the clock waits between checks while stopped
    pub idle_poll: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            buffer_frames: DEFAULT_BUFFER_FRAMES,
            bpm: DEFAULT_BPM,
            volume: 1.0,
            idle_poll: Duration::from_millis(100),
        }
    }
}
