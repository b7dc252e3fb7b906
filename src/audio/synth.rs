//! Procedural drum synthesis: parameterised waveforms rendered into mono buffers

use std::f32::consts::TAU;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const KICK: &str = "Kick";
pub const SNARE: &str = "Snare";
pub const HAT: &str = "Hat";

/// Voice names of the built-in kit, in track order.
pub const DRUM_KIT: [&str; 3] = [KICK, SNARE, HAT];

const DEFAULT_AMPLITUDE: f32 = 0.5;
const DEFAULT_DECAY_EXPONENT: f32 = 2.0;

const KICK_FREQUENCY: f32 = 150.0;
const KICK_FLOOR_FREQUENCY: f32 = 40.0;
const KICK_LENGTH_MS: u64 = 150;
const SNARE_LENGTH_MS: u64 = 150;
const SNARE_POP_FREQUENCY: f32 = 250.0;
const HAT_LENGTH_MS: u64 = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Square,
    Sine,
    Noise,
    Silence,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WaveformParams {
    pub frequency: f32,
    /// Linear pitch sweep target, reached on the last sample
    pub sweep_to: Option<f32>,
    pub length: Duration,
    pub shape: Shape,
    pub amplitude: f32,
    pub decay: bool,
    pub decay_exponent: f32,
}

impl WaveformParams {
    pub fn new(shape: Shape, frequency: f32, length: Duration) -> Self {
        Self {
            frequency,
            sweep_to: None,
            length,
            shape,
            amplitude: DEFAULT_AMPLITUDE,
            decay: false,
            decay_exponent: DEFAULT_DECAY_EXPONENT,
        }
    }

    pub fn square(frequency: f32, length: Duration) -> Self {
        Self::new(Shape::Square, frequency, length)
    }

    pub fn sine(frequency: f32, length: Duration) -> Self {
        Self::new(Shape::Sine, frequency, length)
    }

    pub fn noise(length: Duration) -> Self {
        Self::new(Shape::Noise, 0.0, length)
    }

    pub fn silence(length: Duration) -> Self {
        Self::new(Shape::Silence, 0.0, length)
    }

    pub fn with_amplitude(mut self, amplitude: f32) -> Self {
        self.amplitude = amplitude;
        self
    }

    pub fn with_sweep_to(mut self, frequency: f32) -> Self {
        self.sweep_to = Some(frequency);
        self
    }

    /// Enable the decay envelope with the default (square) curve.
    pub fn decaying(mut self) -> Self {
        self.decay = true;
        self
    }

    pub fn with_decay_exponent(mut self, exponent: f32) -> Self {
        self.decay = true;
        self.decay_exponent = exponent;
        self
    }
}

/// Mono samples in [-1.0, 1.0] at a known rate.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBuffer {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl SampleBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }

    pub fn peak(&self) -> f32 {
        self.samples.iter().fold(0.0f32, |peak, s| peak.max(s.abs()))
    }
}

pub fn sample_count(sample_rate: u32, length: Duration) -> usize {
    (sample_rate as f64 * length.as_secs_f64()).round() as usize
}

// np.sign semantics: zero stays zero
fn sign(x: f32) -> f32 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }
}

/// Position of sample `i` on a linear 0→1 ramp that hits both endpoints.
fn ramp(i: usize, n: usize) -> f32 {
    if n <= 1 {
        0.0
    } else {
        i as f32 / (n - 1) as f32
    }
}

pub struct Synthesizer {
    sample_rate: u32,
    rng: oorandom::Rand32,
}

impl Synthesizer {
    pub fn new(sample_rate: u32) -> Self {
        // Wall clock is plenty of entropy for drum noise.
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        Self::with_seed(sample_rate, seed)
    }

    pub fn with_seed(sample_rate: u32, seed: u64) -> Self {
        Self {
            sample_rate,
            rng: oorandom::Rand32::new(seed),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn generate(&mut self, params: &WaveformParams) -> SampleBuffer {
        let n = sample_count(self.sample_rate, params.length);
        let rate = self.sample_rate as f32;
        let amp = params.amplitude;

        let frequency_at = |i: usize| match params.sweep_to {
            Some(end) => params.frequency + (end - params.frequency) * ramp(i, n),
            None => params.frequency,
        };

        let mut samples: Vec<f32> = match params.shape {
            Shape::Square => (0..n)
                .map(|i| {
                    let t = i as f32 / rate;
                    amp * sign((TAU * frequency_at(i) * t).sin())
                })
                .collect(),
            Shape::Sine => (0..n)
                .map(|i| {
                    let t = i as f32 / rate;
                    amp * (TAU * frequency_at(i) * t).sin()
                })
                .collect(),
            Shape::Noise => (0..n)
                .map(|_| amp * (2.0 * self.rng.rand_float() - 1.0))
                .collect(),
            Shape::Silence => vec![0.0; n],
        };

        if params.decay {
            for (i, s) in samples.iter_mut().enumerate() {
                *s *= (1.0 - ramp(i, n)).powf(params.decay_exponent);
            }
        }

        SampleBuffer::new(samples, self.sample_rate)
    }

    /// Kick: sine with a pitch drop to 40 Hz and a steep decay.
    pub fn kick(&mut self, frequency: f32, length: Duration) -> SampleBuffer {
        self.generate(
            &WaveformParams::sine(frequency, length)
                .with_amplitude(0.9)
                .with_sweep_to(KICK_FLOOR_FREQUENCY)
                .with_decay_exponent(2.5),
        )
    }

    /// Snare: decayed noise burst with a 250 Hz square pop over its first half.
    pub fn snare(&mut self, length: Duration) -> SampleBuffer {
        let mut body = self.generate(&WaveformParams::noise(length).decaying());
        let pop_length = Duration::from_millis(length.as_millis() as u64 / 2);
        let pop = self.generate(&WaveformParams::square(SNARE_POP_FREQUENCY, pop_length).decaying());

        for (s, p) in body.samples.iter_mut().zip(pop.samples()) {
            *s += p * 0.5;
        }
        for s in body.samples.iter_mut() {
            *s *= 0.5;
        }
        body
    }

    pub fn hat(&mut self, length: Duration) -> SampleBuffer {
        self.generate(&WaveformParams::noise(length).decaying())
    }

    /// The built-in Kick, Snare and Hat, keyed by voice name.
    pub fn drum_kit(&mut self) -> Vec<(&'static str, SampleBuffer)> {
        vec![
            (KICK, self.kick(KICK_FREQUENCY, Duration::from_millis(KICK_LENGTH_MS))),
            (SNARE, self.snare(Duration::from_millis(SNARE_LENGTH_MS))),
            (HAT, self.hat(Duration::from_millis(HAT_LENGTH_MS))),
        ]
    }
}
