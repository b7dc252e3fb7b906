//! Real-time side of the sound bank: sums every triggered sound into the device buffer

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, TrySendError};

use super::RenderedSound;

/// Hard cap on simultaneously sounding triggers so the audio callback never allocates.
pub const MAX_VOICES: usize = 32;
const QUEUE_DEPTH: usize = 64;

struct Playing {
    sound: Arc<RenderedSound>,
    pos: usize,
    gain: f32,
}

/// Foreground end of the mixer queue. A handle without a queue is the silent backend.
#[derive(Clone, Default)]
pub struct MixerHandle {
    tx: Option<Sender<Arc<RenderedSound>>>,
    /// Triggers the audio thread had no free voice for
    dropped: Arc<AtomicUsize>,
}

impl MixerHandle {
    pub fn silent() -> Self {
        Self::default()
    }

    pub fn is_silent(&self) -> bool {
        self.tx.is_none()
    }

    /// Voice-limit drops since the last call.
    pub fn take_dropped(&self) -> usize {
        self.dropped.swap(0, Ordering::Relaxed)
    }

    /// Fire-and-forget; the sound starts on the next audio block.
    pub fn start(&self, sound: Arc<RenderedSound>) {
        let Some(tx) = &self.tx else {
            return;
        };
        let dropped = self.take_dropped();
        if dropped > 0 {
            log::warn!("all {MAX_VOICES} mixer voices were busy, {dropped} trigger(s) dropped");
        }
        match tx.try_send(sound) {
            Ok(()) => {}
            Err(TrySendError::Full(sound)) => {
                log::warn!("mixer queue full, dropping trigger of {}", sound.name())
            }
            Err(TrySendError::Disconnected(sound)) => {
                log::debug!("audio stream gone, {} not played", sound.name())
            }
        }
    }
}

pub struct Mixer {
    rx: Receiver<Arc<RenderedSound>>,
    voices: Vec<Playing>,
    dropped: Arc<AtomicUsize>,
}

impl Mixer {
    pub fn new() -> (MixerHandle, Self) {
        let (tx, rx) = crossbeam_channel::bounded(QUEUE_DEPTH);
        let dropped = Arc::new(AtomicUsize::new(0));
        let mixer = Self {
            rx,
            voices: Vec::with_capacity(MAX_VOICES),
            dropped: Arc::clone(&dropped),
        };
        let handle = MixerHandle {
            tx: Some(tx),
            dropped,
        };
        (handle, mixer)
    }

    pub fn active_voices(&self) -> usize {
        self.voices.len()
    }

    /// Drop finished sounds, pick up new triggers and the current gains.
    ///
    /// Runs on the audio thread: no logging, no allocation.
    fn begin_block(&mut self) {
        self.voices.retain(|v| v.pos < v.sound.frames().len());
        while let Ok(sound) = self.rx.try_recv() {
            if self.voices.len() == MAX_VOICES {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            self.voices.push(Playing {
                sound,
                pos: 0,
                gain: 1.0,
            });
        }
        for v in &mut self.voices {
            v.gain = v.sound.gain();
        }
    }

    fn next_frame(&mut self) -> [i16; 2] {
        let mut left = 0.0f32;
        let mut right = 0.0f32;
        for v in &mut self.voices {
            if let Some([l, r]) = v.sound.frames().get(v.pos) {
                left += *l as f32 * v.gain;
                right += *r as f32 * v.gain;
                v.pos += 1;
            }
        }
        [to_i16(left), to_i16(right)]
    }

    /// Fill one interleaved device buffer.
    pub fn render<T>(&mut self, data: &mut [T], channels: usize)
    where
        T: cpal::Sample + cpal::FromSample<i16>,
    {
        self.begin_block();
        for frame in data.chunks_mut(channels.max(1)) {
            let [l, r] = self.next_frame();
            if frame.len() == 1 {
                frame[0] = T::from_sample(((l as i32 + r as i32) / 2) as i16);
                continue;
            }
            for (ch, out) in frame.iter_mut().enumerate() {
                *out = match ch {
                    0 => T::from_sample(l),
                    1 => T::from_sample(r),
                    _ => T::EQUILIBRIUM,
                };
            }
        }
    }
}

fn to_i16(x: f32) -> i16 {
    x.round().clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::synth::SampleBuffer;

    fn sound(name: &str, samples: Vec<f32>, gain: f32) -> Arc<RenderedSound> {
        Arc::new(RenderedSound::new(
            name,
            &SampleBuffer::new(samples, 44_100),
            gain,
        ))
    }

    #[test]
    fn test_overlapping_triggers_both_sound() {
        let (handle, mut mixer) = Mixer::new();
        let hit = sound("Kick", vec![0.25; 4], 1.0);
        handle.start(Arc::clone(&hit));
        handle.start(hit);

        let mut out = [0i16; 4];
        mixer.render(&mut out, 2);
        assert_eq!(mixer.active_voices(), 2);
        let one = (0.25f32 * 32767.0) as i16;
        assert_eq!(out[0], one * 2);
        assert_eq!(out[1], one * 2);
    }

    #[test]
    fn test_finished_voices_are_dropped() {
        let (handle, mut mixer) = Mixer::new();
        handle.start(sound("Hat", vec![0.5; 2], 1.0));

        let mut out = [0i16; 8];
        mixer.render(&mut out, 2);
        assert_ne!(out[2], 0);
        assert_eq!(&out[4..], &[0, 0, 0, 0]);

        mixer.render(&mut out, 2);
        assert_eq!(mixer.active_voices(), 0);
        assert!(out.iter().all(|s| *s == 0));
    }

    #[test]
    fn test_gain_change_reaches_in_flight_sound() {
        let (handle, mut mixer) = Mixer::new();
        let snare = sound("Snare", vec![1.0; 8], 1.0);
        handle.start(Arc::clone(&snare));

        let mut out = [0i16; 4];
        mixer.render(&mut out, 2);
        assert_eq!(out[0], i16::MAX);

        snare.set_gain(0.0);
        mixer.render(&mut out, 2);
        assert!(out.iter().all(|s| *s == 0));
    }

    #[test]
    fn test_mix_saturates_instead_of_wrapping() {
        let (handle, mut mixer) = Mixer::new();
        for _ in 0..3 {
            handle.start(sound("Kick", vec![-0.9; 1], 1.0));
        }
        let mut out = [0.0f32; 2];
        mixer.render(&mut out, 2);
        assert_eq!(out[0], -1.0);
    }

    #[test]
    fn test_mono_device_gets_downmix() {
        let (handle, mut mixer) = Mixer::new();
        handle.start(sound("Hat", vec![0.5; 1], 1.0));
        let mut out = [0i16; 2];
        mixer.render(&mut out, 1);
        assert_eq!(out[0], (0.5f32 * 32767.0) as i16);
        assert_eq!(out[1], 0);
    }

    #[test]
    fn test_voice_limit_counts_drops() {
        let (handle, mut mixer) = Mixer::new();
        let hit = sound("Kick", vec![0.01; 64], 1.0);
        for _ in 0..MAX_VOICES + 2 {
            handle.start(Arc::clone(&hit));
        }

        let mut out = [0i16; 4];
        mixer.render(&mut out, 2);
        assert_eq!(mixer.active_voices(), MAX_VOICES);
        assert_eq!(handle.take_dropped(), 2);
        assert_eq!(handle.take_dropped(), 0);
    }

    #[test]
    fn test_silent_handle_ignores_triggers() {
        let handle = MixerHandle::silent();
        assert!(handle.is_silent());
        handle.start(sound("Kick", vec![0.5; 1], 1.0));
    }
}
