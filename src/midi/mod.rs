//! MIDI output using midir - mirrors drum triggers to an external device

use std::sync::{Arc, Mutex, PoisonError};

use midir::{MidiOutput, MidiOutputConnection};

use crate::audio::synth::{HAT, KICK, SNARE};
use crate::audio::VoicePlayer;

const CLIENT_NAME: &str = "JamBit MIDI Output";
/// General MIDI percussion channel (10), zero-based
const DRUM_CHANNEL: u8 = 9;
const HIT_VELOCITY: u8 = 100;

#[derive(Debug, thiserror::Error)]
pub enum MidiError {
    #[error("failed to create MIDI output: {0}")]
    Init(#[from] midir::InitError),
    #[error("no MIDI output port {0}")]
    InvalidPort(usize),
    #[error("failed to connect: {0}")]
    Connect(String),
    #[error("failed to send: {0}")]
    Send(#[from] midir::SendError),
}

/// General MIDI drum note for a kit voice.
pub fn gm_drum_note(voice: &str) -> Option<u8> {
    match voice {
        KICK => Some(36),
        SNARE => Some(38),
        HAT => Some(42),
        _ => None,
    }
}

pub struct MidiOutputDevice {
    connection: Option<MidiOutputConnection>,
}

impl MidiOutputDevice {
    pub fn new() -> Self {
        Self { connection: None }
    }

    pub fn available_ports() -> Vec<String> {
        match MidiOutput::new(CLIENT_NAME) {
            Ok(midi_out) => midi_out
                .ports()
                .iter()
                .filter_map(|p| midi_out.port_name(p).ok())
                .collect(),
            Err(e) => {
                log::warn!("cannot enumerate MIDI ports: {e}");
                vec![]
            }
        }
    }

    pub fn connect(&mut self, port_index: usize) -> Result<String, MidiError> {
        let midi_out = MidiOutput::new(CLIENT_NAME)?;
        let ports = midi_out.ports();
        let port = ports
            .get(port_index)
            .ok_or(MidiError::InvalidPort(port_index))?;
        let name = midi_out
            .port_name(port)
            .unwrap_or_else(|_| format!("port {port_index}"));

        let connection = midi_out
            .connect(port, "jambit")
            .map_err(|e| MidiError::Connect(e.to_string()))?;

        log::info!("MIDI echo connected to {name}");
        self.connection = Some(connection);
        Ok(name)
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Note-on immediately followed by note-off; drum modules ignore length.
    pub fn send_hit(&mut self, note: u8, velocity: u8) -> Result<(), MidiError> {
        if let Some(ref mut conn) = self.connection {
            conn.send(&[0x90 | DRUM_CHANNEL, note, velocity])?;
            conn.send(&[0x80 | DRUM_CHANNEL, note, 0])?;
        }
        Ok(())
    }

    pub fn disconnect(&mut self) {
        if let Some(conn) = self.connection.take() {
            conn.close();
        }
    }
}

impl Default for MidiOutputDevice {
    fn default() -> Self {
        Self::new()
    }
}

/// Plays through `inner` and echoes each hit as a MIDI drum note.
pub struct MidiEcho {
    inner: Arc<dyn VoicePlayer>,
    device: Mutex<MidiOutputDevice>,
}

impl MidiEcho {
    pub fn new(inner: Arc<dyn VoicePlayer>, device: MidiOutputDevice) -> Self {
        Self {
            inner,
            device: Mutex::new(device),
        }
    }
}

impl VoicePlayer for MidiEcho {
    fn play(&self, voice: &str) {
        self.inner.play(voice);
        let Some(note) = gm_drum_note(voice) else {
            return;
        };
        let mut device = self.device.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = device.send_hit(note, HIT_VELOCITY) {
            log::warn!("MIDI echo of {voice} failed: {e}");
        }
    }

    fn set_global_volume(&self, volume: f32) {
        self.inner.set_global_volume(volume);
    }
}
