//! `tonegen`: stream test tones to the default audio device.
//!
//! With `--headless`, or when built without the `streaming` feature, the tone
//! is streamed into an in-process sink that is drained in real time, which
//! exercises the whole refill path without sound hardware.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context};
use clap::{Parser, ValueEnum};
use log::debug;

#[cfg(feature = "streaming")]
use tonegen::RodioOpener;
use tonegen::{
    AudioBlock, ChangePolicy, SinkOpener, StreamConfig, ToneCommand, ToneConfig, ToneController,
    VirtualSink, VirtualSinkProbe, WaveKind,
};

#[derive(Clone, Copy, ValueEnum)]
enum LatencyPreset {
    /// 4 blocks of 4096 samples
    LowLatency,
    /// 4 blocks of half a second
    Stable,
}

#[derive(Parser)]
#[command(name = "tonegen")]
#[command(about = "Generate sine, square, noise and binaural beat test tones")]
struct Args {
    /// Wave kind: sine, square, white, pink or binaural
    #[arg(short, long)]
    wave: Option<WaveKind>,

    /// Base frequency in Hz
    #[arg(short, long)]
    frequency: Option<f64>,

    /// Binaural beat offset in Hz
    #[arg(short, long)]
    beat: Option<f64>,

    /// Peak amplitude (0-32767)
    #[arg(short, long)]
    amplitude: Option<i16>,

    /// Stop after this many seconds
    #[arg(short, long)]
    duration: Option<f64>,

    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Buffer layout preset
    #[arg(long, value_enum)]
    preset: Option<LatencyPreset>,

    /// Keep the phase when parameters change instead of restarting
    #[arg(long)]
    preserve_phase: bool,

    /// Fixed seed for the noise generators
    #[arg(long)]
    seed: Option<u64>,

    /// Stream into an in-process sink instead of the audio device
    #[arg(long)]
    headless: bool,

    /// Read commands from stdin (`freq 1000`, `wave pink`, `stop`, `quit`, ...)
    #[arg(short, long)]
    interactive: bool,
}

fn build_config(args: &Args) -> anyhow::Result<ToneConfig> {
    let mut config = match &args.config {
        Some(path) => ToneConfig::load(path)
            .with_context(|| format!("Failed to load configuration {}", path.display()))?,
        None => ToneConfig::default(),
    };

    if let Some(preset) = args.preset {
        let rate = config.stream.sample_rate;
        config.stream = match preset {
            LatencyPreset::LowLatency => StreamConfig::low_latency(rate),
            LatencyPreset::Stable => StreamConfig::stable(rate),
        };
    }
    if let Some(wave) = args.wave {
        config.wave = wave;
    }
    if let Some(frequency) = args.frequency {
        config.frequency = frequency;
    }
    if let Some(beat) = args.beat {
        config.beat_frequency = beat;
    }
    if let Some(amplitude) = args.amplitude {
        config.amplitude = amplitude;
    }
    if args.preserve_phase {
        config.change_policy = ChangePolicy::PreservePhase;
    }
    if args.seed.is_some() {
        config.noise_seed = args.seed;
    }

    config.validate()?;
    Ok(config)
}

#[cfg(feature = "streaming")]
fn open_output(headless: bool) -> (Box<dyn SinkOpener>, Option<VirtualSinkProbe>) {
    if headless {
        virtual_output()
    } else {
        (Box::new(RodioOpener), None)
    }
}

#[cfg(not(feature = "streaming"))]
fn open_output(headless: bool) -> (Box<dyn SinkOpener>, Option<VirtualSinkProbe>) {
    if !headless {
        println!("Built without the \"streaming\" feature: running headless\n");
    }
    virtual_output()
}

fn virtual_output() -> (Box<dyn SinkOpener>, Option<VirtualSinkProbe>) {
    let (opener, probe) = VirtualSink::opener();
    (Box::new(opener), Some(probe))
}

#[cfg(feature = "visualization")]
fn level_meter(block: &AudioBlock) -> String {
    use tonegen::visualization::{create_volume_bar, peak_level};
    create_volume_bar(peak_level(block), 20)
}

#[cfg(not(feature = "visualization"))]
fn level_meter(block: &AudioBlock) -> String {
    format!("{} samples", block.len())
}

fn spawn_input_thread() -> anyhow::Result<mpsc::Receiver<String>> {
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name("tonegen-input".into())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else {
                    break;
                };
                if tx.send(line).is_err() {
                    break;
                }
            }
        })?;
    Ok(rx)
}

fn print_help() {
    println!("Commands:");
    println!("  play [wave freq [beat]]   start (or retune) playback");
    println!("  stop                      stop playback");
    println!("  freq <hz>                 set base frequency");
    println!("  beat <hz>                 set binaural beat offset");
    println!("  wave <kind>               sine | square | white | pink | binaural");
    println!("  preset <hz>               440 | 1000 | 5000 | 10000");
    println!("  status                    show playback state");
    println!("  quit                      exit");
}

fn status_line(controller: &ToneController, elapsed: f32) -> String {
    let params = controller.parameters();
    let stats = controller.stats();
    let tone = match params.kind {
        WaveKind::BinauralBeat => format!(
            "{} {:.1}/{:.1} Hz",
            params.kind.label(),
            params.frequency,
            params.frequency2()
        ),
        WaveKind::WhiteNoise | WaveKind::PinkNoise => params.kind.label().to_string(),
        _ => format!("{} {:.1} Hz", params.kind.label(), params.frequency),
    };
    format!(
        "[{:.1}s] {:<26} {} | {} | Refills: {} | Underruns: {}",
        elapsed,
        tone,
        if controller.is_playing() { "▶" } else { "■" },
        level_meter(&controller.latest_block_snapshot()),
        stats.blocks_submitted,
        stats.underruns,
    )
}

/// Handle one stdin line; returns false on quit.
fn handle_line(controller: &ToneController, line: &str, elapsed: f32) -> bool {
    match line.trim() {
        "" => {}
        "quit" | "exit" | "q" => return false,
        "help" | "?" => print_help(),
        "status" => println!("{}", status_line(controller, elapsed)),
        text => match text.parse::<ToneCommand>() {
            Ok(command) => {
                if let Err(e) = controller.apply(command) {
                    println!("Error: {e}");
                }
            }
            Err(e) => println!("{e} (type `help` for commands)"),
        },
    }
    true
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = build_config(&args)?;
    let stream = config.stream;
    let refresh = Duration::from_millis(config.snapshot_interval_ms);

    println!("Tone Generator");
    println!("==============\n");
    println!("Streaming Configuration:");
    println!("  Sample rate: {} Hz", stream.sample_rate);
    println!(
        "  Blocks:      {} x {} samples ({:.1}ms latency)",
        stream.num_buffers,
        stream.buffer_size,
        stream.latency_ms()
    );
    println!("  Tick:        {} ms\n", stream.tick_interval_ms);

    let (opener, probe) = open_output(args.headless);
    let mut controller = ToneController::new(config.clone(), opener)?;
    controller.spawn_ticker()?;
    controller
        .play(config.wave, config.frequency, config.beat_frequency)
        .context("Failed to start playback")?;

    let input = if args.interactive {
        print_help();
        Some(spawn_input_thread()?)
    } else {
        None
    };

    let playback_start = Instant::now();
    let mut last_drain = playback_start;
    let mut outcome = Ok(());

    loop {
        thread::sleep(refresh);
        let elapsed = playback_start.elapsed().as_secs_f32();

        if let Some(probe) = &probe {
            let now = Instant::now();
            let due = (now - last_drain).as_secs_f64() * stream.sample_rate as f64;
            last_drain = now;
            let played = probe.drain_samples(due.round() as usize);
            debug!("Virtual sink played {played} samples");
        }

        if let Some(error) = controller.take_tick_error() {
            if input.is_none() {
                outcome = Err(anyhow!("Playback stopped: {error}"));
                break;
            }
            println!("Playback stopped: {error}");
        }

        let mut quit = false;
        if let Some(rx) = &input {
            loop {
                match rx.try_recv() {
                    Ok(line) => {
                        if !handle_line(&controller, &line, elapsed) {
                            quit = true;
                            break;
                        }
                    }
                    Err(mpsc::TryRecvError::Empty) => break,
                    Err(mpsc::TryRecvError::Disconnected) => {
                        quit = args.duration.is_none();
                        break;
                    }
                }
            }
        } else {
            print!("\x1B[2K\r{}", status_line(&controller, elapsed));
            io::stdout().flush().ok();
        }

        if quit || args.duration.is_some_and(|d| elapsed as f64 >= d) {
            break;
        }
    }

    let stats = controller.stats();
    controller.shutdown();

    println!("\n\n=== Playback Statistics ===");
    println!(
        "Duration:          {:.2} seconds",
        playback_start.elapsed().as_secs_f32()
    );
    println!("Ticks:             {}", stats.ticks);
    println!("Blocks generated:  {}", stats.blocks_generated);
    println!("Blocks submitted:  {}", stats.blocks_submitted);
    println!("Underruns:         {}", stats.underruns);
    println!("Sink retries:      {}", stats.sink_retries);
    println!("Buffer latency:    {:.1} ms", stream.latency_ms());
    println!(
        "Memory used:       {} bytes (block ring)",
        stream.buffer_size * stream.num_buffers * std::mem::size_of::<i16>()
    );

    outcome
}
