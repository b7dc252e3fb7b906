//! Per-voice step patterns shared between the UI and the clock
//!
//! Rows live in a fixed arena addressed by [`VoiceId`]. The owner of a
//! [`PatternStore`] is the only writer (writes take `&mut self`); the clock
//! gets a [`PatternReader`]. Cells are plain atomics with no lock around a
//! row, so an edit may land before or after the clock reads the step it is
//! currently evaluating. It is always visible by the next cycle.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub const TOTAL_STEPS: usize = 16;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PatternError {
    #[error("no track named {0:?}")]
    UnknownVoice(String),
    #[error("voice handle {0} is not in this store")]
    InvalidVoiceId(usize),
    #[error("step {0} is outside the 16-step pattern")]
    StepOutOfRange(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VoiceId(usize);

#[derive(Debug)]
struct VoiceRow {
    name: String,
    cells: [AtomicBool; TOTAL_STEPS],
}

impl VoiceRow {
    fn new(name: String) -> Self {
        Self {
            name,
            cells: std::array::from_fn(|_| AtomicBool::new(false)),
        }
    }

    fn get(&self, step: usize) -> bool {
        self.cells[step].load(Ordering::Relaxed)
    }

    fn set(&self, step: usize, on: bool) {
        self.cells[step].store(on, Ordering::Relaxed);
    }

    fn snapshot(&self) -> [bool; TOTAL_STEPS] {
        std::array::from_fn(|step| self.get(step))
    }
}

#[derive(Debug)]
pub struct PatternStore {
    rows: Arc<[VoiceRow]>,
}

impl PatternStore {
    /// One empty row per distinct voice name, in the order given.
    pub fn new<I, S>(voices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut rows: Vec<VoiceRow> = Vec::new();
        for name in voices {
            let name = name.into();
            if rows.iter().any(|row| row.name == name) {
                log::warn!("track {name:?} registered twice, keeping the first");
                continue;
            }
            rows.push(VoiceRow::new(name));
        }
        Self { rows: rows.into() }
    }

    pub fn reader(&self) -> PatternReader {
        PatternReader {
            rows: Arc::clone(&self.rows),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn voices(&self) -> impl Iterator<Item = (VoiceId, &str)> + '_ {
        self.rows
            .iter()
            .enumerate()
            .map(|(i, row)| (VoiceId(i), row.name.as_str()))
    }

    pub fn voice_id(&self, name: &str) -> Result<VoiceId, PatternError> {
        self.rows
            .iter()
            .position(|row| row.name == name)
            .map(VoiceId)
            .ok_or_else(|| PatternError::UnknownVoice(name.to_string()))
    }

    fn row(&self, voice: VoiceId) -> Result<&VoiceRow, PatternError> {
        self.rows
            .get(voice.0)
            .ok_or(PatternError::InvalidVoiceId(voice.0))
    }

    fn checked(&self, voice: VoiceId, step: usize) -> Result<&VoiceRow, PatternError> {
        let row = self.row(voice)?;
        if step >= TOTAL_STEPS {
            return Err(PatternError::StepOutOfRange(step));
        }
        Ok(row)
    }

    pub fn get_cell(&self, voice: VoiceId, step: usize) -> Result<bool, PatternError> {
        Ok(self.checked(voice, step)?.get(step))
    }

    pub fn set_cell(&mut self, voice: VoiceId, step: usize, on: bool) -> Result<(), PatternError> {
        self.checked(voice, step)?.set(step, on);
        Ok(())
    }

    /// Flip one cell, returning its new value.
    pub fn toggle(&mut self, voice: VoiceId, step: usize) -> Result<bool, PatternError> {
        let row = self.checked(voice, step)?;
        let on = !row.get(step);
        row.set(step, on);
        Ok(on)
    }

    pub fn clear(&mut self, voice: VoiceId) -> Result<(), PatternError> {
        let row = self.row(voice)?;
        for step in 0..TOTAL_STEPS {
            row.set(step, false);
        }
        Ok(())
    }

    pub fn set_row(&mut self, voice: VoiceId, cells: [bool; TOTAL_STEPS]) -> Result<(), PatternError> {
        let row = self.row(voice)?;
        for (step, on) in cells.into_iter().enumerate() {
            row.set(step, on);
        }
        Ok(())
    }

    pub fn get_row(&self, voice: VoiceId) -> Result<[bool; TOTAL_STEPS], PatternError> {
        Ok(self.row(voice)?.snapshot())
    }
}

/// Read-only view of a [`PatternStore`] for the clock thread.
#[derive(Debug, Clone)]
pub struct PatternReader {
    rows: Arc<[VoiceRow]>,
}

impl PatternReader {
    /// Names of the voices whose cell at `step` is on, in track order.
    pub fn active_at(&self, step: usize) -> impl Iterator<Item = &str> + '_ {
        let step = step % TOTAL_STEPS;
        self.rows
            .iter()
            .filter(move |row| row.get(step))
            .map(|row| row.name.as_str())
    }
}

/// Build a row from the `0`/`1` cells the UI works with.
pub fn row_from_bits(bits: [u8; TOTAL_STEPS]) -> [bool; TOTAL_STEPS] {
    bits.map(|b| b != 0)
}
