//! Playback engine - the clock thread that walks the pattern in time

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};

use super::pattern::{PatternReader, TOTAL_STEPS};
use crate::audio::VoicePlayer;
use crate::util::{panic_message, AtomicF32};

/// Sixteenth notes: four steps to the beat.
pub const STEPS_PER_BEAT: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepEvent {
    /// The clock just played this step
    Step(usize),
    /// Playback stopped; clear any highlight
    Stopped,
}

impl StepEvent {
    /// The step index, or -1 for [`StepEvent::Stopped`].
    pub fn as_index(self) -> i32 {
        match self {
            StepEvent::Step(step) => step as i32,
            StepEvent::Stopped => -1,
        }
    }

    pub fn step(self) -> Option<usize> {
        match self {
            StepEvent::Step(step) => Some(step),
            StepEvent::Stopped => None,
        }
    }
}

/// Time between two steps at `bpm`.
pub fn step_interval(bpm: u32) -> Duration {
    Duration::from_secs_f64(60.0 / bpm.max(1) as f64 / STEPS_PER_BEAT as f64)
}

enum Listener {
    Callback(Box<dyn FnMut(StepEvent) + Send>),
    Channel(Sender<StepEvent>),
}

/// Step-change consumers, notified in registration order.
#[derive(Default)]
pub(crate) struct Listeners {
    entries: Vec<Listener>,
}

impl Listeners {
    pub fn add_callback(&mut self, callback: Box<dyn FnMut(StepEvent) + Send>) {
        self.entries.push(Listener::Callback(callback));
    }

    pub fn add_channel(&mut self) -> Receiver<StepEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.entries.push(Listener::Channel(tx));
        rx
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Deliver `event` to everyone; channels whose receiver is gone are dropped.
    ///
    /// A callback that panics is logged and kept, and the rest still hear the event.
    pub fn notify(&mut self, event: StepEvent) {
        self.entries.retain_mut(|listener| match listener {
            Listener::Callback(callback) => {
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| callback(event))) {
                    log::error!(
                        "step listener panicked on {event:?}: {}",
                        panic_message(payload.as_ref())
                    );
                }
                true
            }
            Listener::Channel(tx) => tx.send(event).is_ok(),
        });
    }
}

/// State shared by the foreground sequencer and the clock.
///
/// The listener mutex doubles as the tick boundary: a tick runs entirely
/// under it, and so do `start` and `stop`. Pattern cells and tempo are read
/// without it.
pub(crate) struct Transport {
    bpm: AtomicU32,
    volume: AtomicF32,
    running: AtomicBool,
    current_step: AtomicUsize,
    listeners: Mutex<Listeners>,
}

impl Transport {
    pub fn new(bpm: u32, volume: f32) -> Self {
        Self {
            bpm: AtomicU32::new(bpm),
            volume: AtomicF32::new(volume),
            running: AtomicBool::new(false),
            current_step: AtomicUsize::new(0),
            listeners: Mutex::new(Listeners::default()),
        }
    }

    /// A listener that panicked must not take the transport down with it.
    pub fn listeners(&self) -> MutexGuard<'_, Listeners> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn bpm(&self) -> u32 {
        self.bpm.load(Ordering::Relaxed)
    }

    pub fn set_bpm(&self, bpm: u32) {
        self.bpm.store(bpm, Ordering::Relaxed);
    }

    pub fn volume(&self) -> f32 {
        self.volume.load()
    }

    pub fn set_volume(&self, volume: f32) {
        self.volume.store(volume);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn current_step(&self) -> usize {
        self.current_step.load(Ordering::SeqCst)
    }

    pub fn start(&self) {
        let _tick = self.listeners();
        self.current_step.store(0, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);
    }

    /// Always emits exactly one [`StepEvent::Stopped`], after any tick in flight.
    pub fn stop(&self) {
        let mut listeners = self.listeners();
        self.running.store(false, Ordering::SeqCst);
        listeners.notify(StepEvent::Stopped);
    }
}

pub(crate) struct PlaybackEngine {
    pub transport: Arc<Transport>,
    pub patterns: PatternReader,
    pub player: Arc<dyn VoicePlayer>,
    /// Nudged by `play`; disconnects when the sequencer is dropped
    pub wake: Receiver<()>,
    pub idle_poll: Duration,
}

impl PlaybackEngine {
    pub fn spawn(self) -> std::io::Result<thread::JoinHandle<()>> {
        thread::Builder::new()
            .name("jambit-clock".into())
            .spawn(move || self.run())
    }

    fn run(self) {
        log::debug!("playback clock started");
        let mut deadline = Instant::now();

        loop {
            if !self.transport.is_running() {
                match self.wake.recv_timeout(self.idle_poll) {
                    Ok(()) | Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                }
                deadline = Instant::now();
                continue;
            }

            self.tick();

            // Tempo is sampled here, so a change only stretches the interval about to start.
            deadline += step_interval(self.transport.bpm());
            let now = Instant::now();
            match deadline.checked_duration_since(now) {
                Some(wait) => thread::sleep(wait),
                None => deadline = now,
            }

            if !self.owner_alive() {
                break;
            }
        }

        log::debug!("playback clock exiting, sequencer dropped");
    }

    /// Trigger the current step's voices, announce the step, advance.
    fn tick(&self) {
        let mut listeners = self.transport.listeners();
        if !self.transport.is_running() {
            return;
        }

        let step = self.transport.current_step();
        for voice in self.patterns.active_at(step) {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| self.player.play(voice))) {
                log::error!(
                    "playing {voice} on step {step} panicked: {}",
                    panic_message(payload.as_ref())
                );
            }
        }
        listeners.notify(StepEvent::Step(step));
        self.transport
            .current_step
            .store((step + 1) % TOTAL_STEPS, Ordering::SeqCst);
    }

    fn owner_alive(&self) -> bool {
        loop {
            match self.wake.try_recv() {
                Ok(()) => continue,
                Err(TryRecvError::Empty) => return true,
                Err(TryRecvError::Disconnected) => return false,
            }
        }
    }
}
