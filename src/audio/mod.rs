//! Audio output using cpal, and the sound bank the sequencer plays through

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use crate::config::Config;
use crate::util::AtomicF32;

pub mod mixer;
pub mod synth;

pub use mixer::{Mixer, MixerHandle};
pub use synth::{SampleBuffer, Shape, Synthesizer, WaveformParams};

const CHANNELS: u16 = 2;

#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("no default audio output device")]
    NoDevice,
    #[error("failed to build output stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),
    #[error("failed to start output stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),
}

/// Anything the sequencer can fire voices into.
pub trait VoicePlayer: Send + Sync {
    /// Start the named sound now. Unknown names are ignored.
    fn play(&self, voice: &str);
    fn set_global_volume(&self, volume: f32);
}

/// A voice rendered to 16-bit stereo, ready for the mixer.
#[derive(Debug)]
pub struct RenderedSound {
    name: String,
    frames: Vec<[i16; 2]>,
    gain: AtomicF32,
}

impl RenderedSound {
    pub fn new(name: impl Into<String>, buffer: &SampleBuffer, gain: f32) -> Self {
        let frames = buffer
            .samples()
            .iter()
            .map(|s| {
                let v = (s * 32767.0) as i16;
                [v, v]
            })
            .collect();
        Self {
            name: name.into(),
            frames,
            gain: AtomicF32::new(gain),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn frames(&self) -> &[[i16; 2]] {
        &self.frames
    }

    pub fn gain(&self) -> f32 {
        self.gain.load()
    }

    pub fn set_gain(&self, gain: f32) {
        self.gain.store(gain);
    }
}

/// Keeps the device stream alive. Dropping it silences the sound bank.
pub struct AudioOutput {
    _stream: Option<cpal::Stream>,
    mixer: MixerHandle,
    sample_rate: u32,
}

impl AudioOutput {
    /// Open the default device, falling back to silence if that fails.
    pub fn open(config: &Config) -> Self {
        match Self::try_open(config) {
            Ok(output) => {
                log::info!(
                    "audio output open at {} Hz, {} frame buffer",
                    config.sample_rate,
                    config.buffer_frames
                );
                output
            }
            Err(e) => {
                log::warn!("audio output unavailable ({e}), continuing silently");
                Self::silent(config.sample_rate)
            }
        }
    }

    pub fn try_open(config: &Config) -> Result<Self, AudioError> {
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or(AudioError::NoDevice)?;

        let stream_config = cpal::StreamConfig {
            channels: CHANNELS,
            sample_rate: cpal::SampleRate(config.sample_rate),
            buffer_size: cpal::BufferSize::Fixed(config.buffer_frames),
        };

        let (mixer, stream) = match build_stream::<i16>(&device, &stream_config) {
            Ok(built) => built,
            Err(e) => {
                log::debug!("16-bit output refused ({e}), trying 32-bit float");
                build_stream::<f32>(&device, &stream_config)?
            }
        };
        stream.play()?;

        Ok(Self {
            _stream: Some(stream),
            mixer,
            sample_rate: config.sample_rate,
        })
    }

    pub fn silent(sample_rate: u32) -> Self {
        Self {
            _stream: None,
            mixer: MixerHandle::silent(),
            sample_rate,
        }
    }

    pub fn is_silent(&self) -> bool {
        self._stream.is_none()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn mixer(&self) -> MixerHandle {
        self.mixer.clone()
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
) -> Result<(MixerHandle, cpal::Stream), AudioError>
where
    T: cpal::SizedSample + cpal::FromSample<i16>,
{
    let (handle, mut mixer) = Mixer::new();
    let channels = config.channels as usize;
    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| mixer.render(data, channels),
        |err| log::error!("audio stream error: {err}"),
        None,
    )?;
    Ok((handle, stream))
}

/// Synthesized voices keyed by name, played through one mixer.
pub struct SoundBank {
    sample_rate: u32,
    mixer: MixerHandle,
    sounds: RwLock<HashMap<String, Arc<RenderedSound>>>,
    volume: AtomicF32,
}

impl SoundBank {
    pub fn new(output: &AudioOutput) -> Self {
        Self {
            sample_rate: output.sample_rate(),
            mixer: output.mixer(),
            sounds: RwLock::new(HashMap::new()),
            volume: AtomicF32::new(1.0),
        }
    }

    /// Open the audio device and register the built-in Kick, Snare and Hat.
    ///
    /// The returned [`AudioOutput`] must be kept alive for as long as sound is wanted.
    pub fn initialize(config: &Config) -> (Self, AudioOutput) {
        let output = AudioOutput::open(config);
        let bank = Self::new(&output);
        bank.load_drum_kit(&mut Synthesizer::new(config.sample_rate));
        (bank, output)
    }

    pub fn load_drum_kit(&self, synth: &mut Synthesizer) {
        for (name, buffer) in synth.drum_kit() {
            self.register(name, &buffer);
        }
        log::info!("synthesized drum kit: {}", synth::DRUM_KIT.join(", "));
    }

    /// Store `buffer` under `name`, replacing any earlier sound of that name.
    pub fn register(&self, name: &str, buffer: &SampleBuffer) {
        if buffer.sample_rate() != self.sample_rate {
            log::warn!(
                "{name} rendered at {} Hz but output runs at {} Hz; it will play off-pitch",
                buffer.sample_rate(),
                self.sample_rate
            );
        }
        let sound = Arc::new(RenderedSound::new(name, buffer, self.volume()));
        self.sounds
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), sound);
    }

    pub fn sound(&self, name: &str) -> Option<Arc<RenderedSound>> {
        self.sounds
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .sounds
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn volume(&self) -> f32 {
        self.volume.load()
    }

    pub fn is_silent(&self) -> bool {
        self.mixer.is_silent()
    }
}

impl VoicePlayer for SoundBank {
    fn play(&self, voice: &str) {
        match self.sound(voice) {
            Some(sound) => {
                log::debug!("trigger {voice}");
                self.mixer.start(sound);
            }
            None => log::warn!("attempted to play a sound that is not loaded: {voice}"),
        }
    }

    fn set_global_volume(&self, volume: f32) {
        let volume = if volume.is_nan() { 0.0 } else { volume.clamp(0.0, 1.0) };
        self.volume.store(volume);
        for sound in self
            .sounds
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
        {
            sound.set_gain(volume);
        }
    }
}
