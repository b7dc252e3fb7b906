use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use jambit::{row_from_bits, Config, PatternStore, Sequencer, StepEvent, VoicePlayer, TOTAL_STEPS};

#[derive(Debug, Clone, PartialEq)]
enum Entry {
    Hit(String),
    Step(i32),
}

/// Voice player and listener writing into one timeline.
#[derive(Default)]
struct Timeline {
    entries: Mutex<Vec<(Instant, Entry)>>,
}

impl Timeline {
    fn push(&self, entry: Entry) {
        self.entries.lock().unwrap().push((Instant::now(), entry));
    }

    fn snapshot(&self) -> Vec<(Instant, Entry)> {
        self.entries.lock().unwrap().clone()
    }

    fn hits(&self, voice: &str) -> Vec<Instant> {
        self.snapshot()
            .into_iter()
            .filter(|(_, e)| *e == Entry::Hit(voice.to_string()))
            .map(|(t, _)| t)
            .collect()
    }

    fn steps(&self) -> Vec<i32> {
        self.snapshot()
            .into_iter()
            .filter_map(|(_, e)| match e {
                Entry::Step(i) => Some(i),
                Entry::Hit(_) => None,
            })
            .collect()
    }
}

impl VoicePlayer for Timeline {
    fn play(&self, voice: &str) {
        self.push(Entry::Hit(voice.to_string()));
    }

    fn set_global_volume(&self, _volume: f32) {}
}

fn bare_sequencer(bpm: u32, player: Arc<dyn VoicePlayer>) -> Sequencer {
    let config = Config {
        bpm,
        ..Config::default()
    };
    Sequencer::new(player, PatternStore::new(["Kick", "Snare", "Hat"]), &config).unwrap()
}

fn record_steps(seq: &mut Sequencer, timeline: &Arc<Timeline>) {
    let listener = Arc::clone(timeline);
    seq.add_step_change_listener(move |event| listener.push(Entry::Step(event.as_index())));
}

fn sequencer(bpm: u32) -> (Sequencer, Arc<Timeline>) {
    let timeline = Arc::new(Timeline::default());
    let mut seq = bare_sequencer(bpm, timeline.clone());
    record_steps(&mut seq, &timeline);
    (seq, timeline)
}

/// Panics on every hit of one voice.
struct Faulty(&'static str);

impl VoicePlayer for Faulty {
    fn play(&self, voice: &str) {
        if voice == self.0 {
            panic!("{voice} failed to play");
        }
    }

    fn set_global_volume(&self, _volume: f32) {}
}

fn wait_for(timeout: Duration, mut done: impl FnMut() -> bool) {
    let start = Instant::now();
    while !done() {
        assert!(start.elapsed() < timeout, "timed out");
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn test_kick_on_quarter_notes_at_120_bpm() {
    let (mut seq, timeline) = sequencer(120);
    seq.set_pattern(
        "Kick",
        row_from_bits([1, 0, 0, 0, 1, 0, 0, 0, 1, 0, 0, 0, 1, 0, 0, 0]),
    );

    seq.play();
    // One full cycle plus the downbeat of the next
    wait_for(Duration::from_secs(5), || timeline.steps().len() > TOTAL_STEPS);
    seq.stop();

    let entries = timeline.snapshot();
    let mut step_of_hit = Vec::new();
    for (i, (_, entry)) in entries.iter().enumerate() {
        if let Entry::Hit(voice) = entry {
            assert_eq!(voice, "Kick");
            // Triggers precede the step notification of the same tick
            match entries[i + 1].1 {
                Entry::Step(step) => step_of_hit.push(step),
                ref other => panic!("hit followed by {other:?}"),
            }
        }
    }
    // Exactly four kicks per cycle, then the next downbeat
    assert_eq!(step_of_hit, vec![0, 4, 8, 12, 0]);

    let hits = timeline.hits("Kick");
    for pair in hits[..4].windows(2) {
        let spacing = pair[1] - pair[0];
        assert!(
            spacing > Duration::from_millis(440) && spacing < Duration::from_millis(600),
            "kick spacing {spacing:?}"
        );
    }
}

#[test]
fn test_steps_cycle_with_period_sixteen() {
    let (mut seq, timeline) = sequencer(300);
    seq.play();
    wait_for(Duration::from_secs(5), || timeline.steps().len() >= 2 * TOTAL_STEPS + 3);
    seq.stop();

    let steps = timeline.steps();
    assert_eq!(*steps.last().unwrap(), -1);
    for (i, step) in steps[..2 * TOTAL_STEPS + 3].iter().enumerate() {
        assert_eq!(*step, (i % TOTAL_STEPS) as i32);
    }
}

#[test]
fn test_play_then_stop_ends_with_single_stop_event() {
    let (mut seq, timeline) = sequencer(120);
    seq.play();
    wait_for(Duration::from_secs(2), || !timeline.steps().is_empty());
    seq.stop();
    // Anything still in flight would show up here
    std::thread::sleep(Duration::from_millis(300));

    let steps = timeline.steps();
    assert_eq!(steps[0], 0);
    assert_eq!(steps.iter().filter(|s| **s == -1).count(), 1);
    assert_eq!(*steps.last().unwrap(), -1);
    assert!(!seq.is_playing());
}

#[test]
fn test_play_restarts_from_step_zero() {
    let (mut seq, timeline) = sequencer(300);
    seq.play();
    wait_for(Duration::from_secs(2), || timeline.steps().len() >= 5);
    seq.stop();
    let before = timeline.steps().len();

    seq.play();
    wait_for(Duration::from_secs(2), || timeline.steps().len() > before);
    seq.stop();

    assert_eq!(timeline.steps()[before], 0);
}

#[test]
fn test_stop_while_stopped_still_notifies() {
    let (mut seq, timeline) = sequencer(120);
    seq.stop();
    seq.stop();
    assert_eq!(timeline.steps(), vec![-1, -1]);
}

#[test]
fn test_pattern_edit_visible_next_cycle() {
    let (mut seq, timeline) = sequencer(300);
    seq.play();
    wait_for(Duration::from_secs(2), || timeline.steps().len() >= 3);

    seq.set_step("Hat", 0, true);
    let edited_at = timeline.steps().len();
    // The next pass over step 0 starts at most one cycle later
    wait_for(Duration::from_secs(5), || timeline.steps().len() > edited_at + TOTAL_STEPS);
    seq.stop();

    assert!(!timeline.hits("Hat").is_empty());
}

#[test]
fn test_panicking_listener_does_not_stop_clock() {
    let timeline = Arc::new(Timeline::default());
    let mut seq = bare_sequencer(300, timeline.clone());
    seq.add_step_change_listener(|event| {
        if let StepEvent::Step(_) = event {
            panic!("listener failure");
        }
    });
    // Registered after the failing one, still hears every step
    record_steps(&mut seq, &timeline);

    seq.play();
    wait_for(Duration::from_secs(5), || timeline.steps().len() >= 6);
    seq.stop();

    let steps = timeline.steps();
    assert_eq!(&steps[..6], &[0, 1, 2, 3, 4, 5]);
    assert_eq!(*steps.last().unwrap(), -1);
}

#[test]
fn test_panicking_listener_on_stop_does_not_escape() {
    let (mut seq, timeline) = sequencer(300);
    seq.add_step_change_listener(|event| {
        if event == StepEvent::Stopped {
            panic!("stop listener failure");
        }
    });

    seq.play();
    wait_for(Duration::from_secs(2), || !timeline.steps().is_empty());
    seq.stop();
    assert!(!seq.is_playing());
    assert_eq!(*timeline.steps().last().unwrap(), -1);

    // The failing listener stays registered and stop keeps working
    seq.stop();
    assert_eq!(timeline.steps().iter().filter(|s| **s == -1).count(), 2);
}

#[test]
fn test_panicking_player_still_notifies_and_triggers_others() {
    let timeline = Arc::new(Timeline::default());
    let faulty: Arc<dyn VoicePlayer> = Arc::new(Faulty("Kick"));
    let player = Arc::new(Tee(faulty, timeline.clone()));
    let mut seq = bare_sequencer(300, player);
    record_steps(&mut seq, &timeline);
    seq.set_step("Kick", 0, true);
    seq.set_step("Snare", 0, true);

    seq.play();
    wait_for(Duration::from_secs(5), || timeline.steps().len() > TOTAL_STEPS);
    seq.stop();

    let steps = timeline.steps();
    for (i, step) in steps[..=TOTAL_STEPS].iter().enumerate() {
        assert_eq!(*step, (i % TOTAL_STEPS) as i32);
    }
    assert!(timeline.hits("Snare").len() >= 2);
}

/// Plays through the first player, then records into the timeline.
struct Tee(Arc<dyn VoicePlayer>, Arc<Timeline>);

impl VoicePlayer for Tee {
    fn play(&self, voice: &str) {
        self.1.play(voice);
        self.0.play(voice);
    }

    fn set_global_volume(&self, volume: f32) {
        self.0.set_global_volume(volume);
    }
}

#[test]
fn test_subscriber_receives_steps_and_stop() {
    let (mut seq, _timeline) = sequencer(300);
    let events = seq.subscribe();
    seq.play();
    let first = events.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(first, StepEvent::Step(0));
    seq.stop();

    let rest: Vec<StepEvent> = events.try_iter().collect();
    assert_eq!(rest.last(), Some(&StepEvent::Stopped));
    assert_eq!(rest.iter().filter(|e| **e == StepEvent::Stopped).count(), 1);
}
