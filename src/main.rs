use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
#[cfg(feature = "gui")]
use eframe::egui;

#[cfg(feature = "gui")]
use jambit::sequencer::{MAX_BPM, MIN_BPM};
use jambit::{
    row_from_bits, AudioOutput, Config, MidiEcho, MidiOutputDevice, PatternStore, Sequencer,
    SoundBank, StepEvent, VoicePlayer, DRUM_KIT, HAT, KICK, SNARE, TOTAL_STEPS,
};

#[derive(Parser, Debug)]
#[command(name = "jambit", about = "A 16-step drum machine with synthesized voices")]
struct Args {
    /// Output sample rate in Hz
    #[arg(long, default_value_t = jambit::config::DEFAULT_SAMPLE_RATE)]
    sample_rate: u32,

    /// Audio buffer size in frames
    #[arg(long, default_value_t = jambit::config::DEFAULT_BUFFER_FRAMES)]
    buffer_frames: u32,

    /// Starting tempo (clamped to 30..=300)
    #[arg(long, default_value_t = jambit::config::DEFAULT_BPM)]
    bpm: u32,

    /// Starting volume (clamped to 0..=1)
    #[arg(long, default_value_t = 1.0)]
    volume: f32,

    /// Echo every trigger to this MIDI output port
    #[arg(long)]
    midi_port: Option<usize>,

    /// List MIDI output ports and exit
    #[arg(long)]
    list_midi: bool,

    /// Play a demo beat without opening a window
    #[arg(long)]
    headless: bool,

    /// Bars to play in headless mode
    #[arg(long, default_value_t = 4)]
    bars: u32,
}

impl Args {
    fn config(&self) -> Config {
        Config {
            sample_rate: self.sample_rate,
            buffer_frames: self.buffer_frames,
            bpm: self.bpm,
            volume: self.volume,
            ..Config::default()
        }
    }
}

/// Sound bank, optional MIDI echo and sequencer, wired together.
fn build(args: &Args) -> anyhow::Result<(Sequencer, AudioOutput)> {
    let config = args.config();
    let (bank, output) = SoundBank::initialize(&config);
    let mut player: Arc<dyn VoicePlayer> = Arc::new(bank);

    if let Some(port) = args.midi_port {
        let mut device = MidiOutputDevice::new();
        match device.connect(port) {
            Ok(_) => player = Arc::new(MidiEcho::new(player, device)),
            Err(e) => log::warn!("MIDI echo disabled: {e}"),
        }
    }

    let sequencer = Sequencer::new(player, PatternStore::new(DRUM_KIT), &config)?;
    Ok((sequencer, output))
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if args.list_midi {
        println!("Available MIDI outputs:");
        for (i, name) in MidiOutputDevice::available_ports().iter().enumerate() {
            println!("{i}: {name}");
        }
        return Ok(());
    }

    let (sequencer, audio) = build(&args)?;

    #[cfg(feature = "gui")]
    if !args.headless {
        return run_gui(sequencer, audio);
    }

    run_headless(sequencer, args.bars);
    drop(audio);
    Ok(())
}

/// Four on the floor with a backbeat and offbeat hats.
fn run_headless(mut sequencer: Sequencer, bars: u32) {
    sequencer.set_pattern(KICK, row_from_bits([1, 0, 0, 0, 1, 0, 0, 0, 1, 0, 0, 0, 1, 0, 0, 0]));
    sequencer.set_pattern(SNARE, row_from_bits([0, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0, 1, 0, 0, 0]));
    sequencer.set_pattern(HAT, row_from_bits([0, 0, 1, 0, 0, 0, 1, 0, 0, 0, 1, 0, 0, 0, 1, 0]));

    let steps = sequencer.subscribe();
    sequencer.play();

    let mut played = 0;
    let total = bars as usize * TOTAL_STEPS;
    // Generous timeout so a stalled clock cannot hang the process
    let patience = sequencer.step_interval() * 4 + Duration::from_millis(500);
    while played < total {
        match steps.recv_timeout(patience) {
            Ok(StepEvent::Step(step)) => {
                log::info!("step {:2} {}", step, if step % 4 == 0 { "*" } else { "" });
                played += 1;
            }
            Ok(StepEvent::Stopped) => break,
            Err(e) => {
                log::error!("no step from the clock: {e}");
                break;
            }
        }
    }

    // Let the last hit ring out
    std::thread::sleep(sequencer.step_interval().max(Duration::from_millis(200)));
    sequencer.stop();
}

#[cfg(feature = "gui")]
fn run_gui(sequencer: Sequencer, audio: AudioOutput) -> anyhow::Result<()> {
    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([900.0, 400.0])
            .with_title("JamBit"),
        ..Default::default()
    };

    eframe::run_native(
        "JamBit",
        options,
        Box::new(|_cc| Ok(Box::new(JamBitApp::new(sequencer, audio)))),
    )
    .map_err(|e| anyhow::anyhow!("window failed: {e}"))
}

#[cfg(feature = "gui")]
struct JamBitApp {
    sequencer: Sequencer,
    _audio: AudioOutput,
    steps: crossbeam_channel::Receiver<StepEvent>,

    // UI state
    highlighted: Option<usize>,
    bpm_entry: Option<String>,
}

#[cfg(feature = "gui")]
impl JamBitApp {
    fn new(mut sequencer: Sequencer, audio: AudioOutput) -> Self {
        if audio.is_silent() {
            log::warn!("no audio device, the grid will play silently");
        }
        let steps = sequencer.subscribe();
        Self {
            sequencer,
            _audio: audio,
            steps,
            highlighted: None,
            bpm_entry: None,
        }
    }

    fn handle_step_events(&mut self) {
        for event in self.steps.try_iter() {
            self.highlighted = event.step();
        }
    }

    fn transport(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            if ui.button("▶ Play").clicked() {
                self.sequencer.play();
            }
            if ui.button("■ Stop").clicked() {
                self.sequencer.stop();
            }

            ui.add_space(20.0);
            ui.label("BPM:");

            // Click the value to type a tempo
            match self.bpm_entry.as_mut() {
                Some(text) => {
                    let response = ui.add(egui::TextEdit::singleline(text).desired_width(50.0));
                    if response.lost_focus() {
                        let _ = self.sequencer.set_bpm_text(text);
                        self.bpm_entry = None;
                    } else {
                        response.request_focus();
                    }
                }
                None => {
                    let label = ui.add(
                        egui::Label::new(self.sequencer.bpm().to_string())
                            .sense(egui::Sense::click()),
                    );
                    if label.clicked() {
                        self.bpm_entry = Some(self.sequencer.bpm().to_string());
                    }
                }
            }

            let mut bpm = self.sequencer.bpm();
            if ui
                .add(egui::Slider::new(&mut bpm, MIN_BPM..=MAX_BPM).show_value(false))
                .changed()
            {
                self.sequencer.set_bpm(bpm as i64);
            }

            ui.add_space(20.0);
            let mut volume = self.sequencer.volume();
            ui.label(format!("Volume: {}%", (volume * 100.0) as u32));
            if ui
                .add(egui::Slider::new(&mut volume, 0.0..=1.0).show_value(false))
                .changed()
            {
                let _ = self.sequencer.set_volume(volume);
            }
        });
    }

    fn track(&mut self, ui: &mut egui::Ui, voice: &str) {
        let Some(row) = self.sequencer.pattern(voice) else {
            return;
        };
        ui.horizontal(|ui| {
            ui.add_sized([80.0, 30.0], egui::Label::new(voice));
            for (step, on) in row.into_iter().enumerate() {
                let fill = if self.highlighted == Some(step) {
                    egui::Color32::from_rgb(100, 200, 100)
                } else if on {
                    egui::Color32::from_rgb(59, 130, 246)
                } else {
                    egui::Color32::GRAY
                };
                let button = egui::Button::new("").min_size(egui::vec2(30.0, 30.0)).fill(fill);
                if ui.add(button).clicked() {
                    self.sequencer.toggle_step(voice, step);
                }
                if (step + 1) % 4 == 0 {
                    ui.add_space(10.0);
                }
            }
            if ui.button("Clear").clicked() {
                self.sequencer.clear_pattern(voice);
            }
        });
    }
}

#[cfg(feature = "gui")]
impl eframe::App for JamBitApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        ctx.request_repaint();

        self.handle_step_events();

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.heading("JamBit");
            ui.add_space(10.0);
            self.transport(ui);
            ui.add_space(20.0);

            let voices: Vec<String> = self
                .sequencer
                .patterns()
                .voices()
                .map(|(_, name)| name.to_string())
                .collect();
            for voice in &voices {
                self.track(ui, voice);
                ui.add_space(5.0);
            }
        });
    }
}
