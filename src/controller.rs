//! Command interface
//!
//! [`ToneController`] is what a front end talks to. It owns the scheduler behind
//! a lock shared with the optional ticker thread, so commands and ticks never
//! interleave inside one refill. Parameters are validated here, before anything
//! reaches the session; a rejected command leaves the previous parameters
//! playing.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::config::{ChangePolicy, FrequencyPreset, ToneConfig, DEFAULT_BEAT_FREQUENCY};
use crate::streaming::{
    SchedulerState, SinkOpener, StreamConfig, StreamStats, StreamingScheduler, TickReport,
};
use crate::waveform::{
    validate_beat_frequency, validate_frequency, AudioBlock, PhaseCursor, WaveKind,
    WaveformParameters,
};
use crate::{Result, ToneError};

/// One front-end command
///
/// Textual forms, as accepted by [`FromStr`]:
///
/// | Text | Command |
/// |------|---------|
/// | `play` | [`ToneCommand::PlayCurrent`] |
/// | `play sine 440 [10]` | [`ToneCommand::Play`] |
/// | `stop` | [`ToneCommand::Stop`] |
/// | `freq 1000` | [`ToneCommand::SetFrequency`] |
/// | `beat 8` | [`ToneCommand::SetBeatFrequency`] |
/// | `wave pink` | [`ToneCommand::SetWaveKind`] |
/// | `preset 5000` | [`ToneCommand::Preset`] |
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ToneCommand {
    /// Play the given tone
    Play {
        /// Wave kind
        wave: WaveKind,
        /// Base frequency in Hz
        frequency: f64,
        /// Beat offset in Hz
        beat_frequency: f64,
    },
    /// Play with the parameters currently set
    PlayCurrent,
    /// Stop immediately
    Stop,
    /// Change the base frequency
    SetFrequency(f64),
    /// Change the binaural beat offset
    SetBeatFrequency(f64),
    /// Change the wave kind
    SetWaveKind(WaveKind),
    /// Jump to a preset frequency
    Preset(FrequencyPreset),
}

fn parse_hz(word: Option<&str>, what: &str) -> Result<f64> {
    let word =
        word.ok_or_else(|| ToneError::InvalidParameter(format!("missing {what} value")))?;
    word.trim_end_matches(|c: char| c.is_ascii_alphabetic())
        .parse()
        .map_err(|_| ToneError::InvalidParameter(format!("'{word}' is not a valid {what}")))
}

impl FromStr for ToneCommand {
    type Err = ToneError;

    fn from_str(line: &str) -> Result<Self> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Err(ToneError::InvalidParameter("empty command".into()));
        };

        let command = match verb.to_ascii_lowercase().as_str() {
            "play" => match words.next() {
                None => ToneCommand::PlayCurrent,
                Some(wave) => ToneCommand::Play {
                    wave: wave.parse()?,
                    frequency: parse_hz(words.next(), "frequency")?,
                    beat_frequency: match words.next() {
                        Some(beat) => parse_hz(Some(beat), "beat frequency")?,
                        None => DEFAULT_BEAT_FREQUENCY,
                    },
                },
            },
            "stop" => ToneCommand::Stop,
            "freq" | "frequency" | "f" => {
                ToneCommand::SetFrequency(parse_hz(words.next(), "frequency")?)
            }
            "beat" | "b" => ToneCommand::SetBeatFrequency(parse_hz(words.next(), "beat frequency")?),
            "wave" | "w" => {
                let kind = words
                    .next()
                    .ok_or_else(|| ToneError::InvalidParameter("missing wave kind".into()))?;
                ToneCommand::SetWaveKind(kind.parse()?)
            }
            "preset" | "p" => {
                let rest: Vec<&str> = words.by_ref().collect();
                if rest.is_empty() {
                    return Err(ToneError::InvalidParameter("missing preset".into()));
                }
                return Ok(ToneCommand::Preset(rest.join(" ").parse()?));
            }
            other => {
                return Err(ToneError::InvalidParameter(format!(
                    "unknown command '{other}'"
                )))
            }
        };

        if let Some(extra) = words.next() {
            return Err(ToneError::InvalidParameter(format!(
                "unexpected argument '{extra}'"
            )));
        }
        Ok(command)
    }
}

impl fmt::Display for ToneCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToneCommand::Play {
                wave,
                frequency,
                beat_frequency,
            } => write!(f, "play {wave} {frequency} {beat_frequency}"),
            ToneCommand::PlayCurrent => write!(f, "play"),
            ToneCommand::Stop => write!(f, "stop"),
            ToneCommand::SetFrequency(hz) => write!(f, "freq {hz}"),
            ToneCommand::SetBeatFrequency(hz) => write!(f, "beat {hz}"),
            ToneCommand::SetWaveKind(kind) => write!(f, "wave {kind}"),
            ToneCommand::Preset(preset) => write!(f, "preset {}", preset.hz()),
        }
    }
}

struct Ticker {
    running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Front-end handle onto a streaming tone generator
pub struct ToneController {
    scheduler: Arc<Mutex<StreamingScheduler>>,
    snapshot: Arc<Mutex<AudioBlock>>,
    policy: ChangePolicy,
    tick_interval: Duration,
    ticker: Option<Ticker>,
    last_tick_error: Arc<Mutex<Option<String>>>,
}

impl ToneController {
    /// Validate `config` and build an idle controller.
    ///
    /// Nothing is opened until the first play command.
    pub fn new(config: ToneConfig, opener: Box<dyn SinkOpener>) -> Result<Self> {
        config.validate()?;
        let scheduler = StreamingScheduler::new(
            config.stream,
            config.initial_parameters()?,
            config.noise_seed,
            opener,
        )?;
        Ok(ToneController {
            snapshot: scheduler.snapshot_handle(),
            scheduler: Arc::new(Mutex::new(scheduler)),
            policy: config.change_policy,
            tick_interval: config.stream.tick_interval(),
            ticker: None,
            last_tick_error: Arc::new(Mutex::new(None)),
        })
    }

    /// Play `kind` at `frequency` (binaural offset `beat_frequency`).
    ///
    /// Starts from phase 0 when idle; when already playing the new parameters go
    /// through the change policy.
    pub fn play(&self, kind: WaveKind, frequency: f64, beat_frequency: f64) -> Result<()> {
        validate_frequency(frequency)?;
        validate_beat_frequency(beat_frequency)?;
        let mut scheduler = self.scheduler.lock();
        let params = WaveformParameters {
            kind,
            frequency,
            beat_frequency,
            ..*scheduler.parameters()
        };
        if scheduler.is_playing() {
            scheduler.apply_parameters(params, self.policy)
        } else {
            scheduler.start(params)
        }
    }

    /// Play with the current parameters.
    pub fn play_current(&self) -> Result<()> {
        let params = self.parameters();
        self.play(params.kind, params.frequency, params.beat_frequency)
    }

    /// Stop at once. Stopping while idle does nothing.
    pub fn stop(&self) -> Result<()> {
        self.scheduler.lock().stop()
    }

    /// Change the base frequency.
    pub fn set_frequency(&self, frequency: f64) -> Result<()> {
        validate_frequency(frequency)?;
        self.update(|params| params.with_frequency(frequency))
    }

    /// Change the binaural beat offset.
    pub fn set_beat_frequency(&self, beat_frequency: f64) -> Result<()> {
        validate_beat_frequency(beat_frequency)?;
        self.update(|params| params.with_beat_frequency(beat_frequency))
    }

    /// Change the wave kind.
    pub fn set_wave_kind(&self, kind: WaveKind) -> Result<()> {
        self.update(|params| Ok(params.with_kind(kind)))
    }

    /// Jump to a preset frequency.
    pub fn set_preset(&self, preset: FrequencyPreset) -> Result<()> {
        self.set_frequency(preset.hz())
    }

    /// Derive new parameters from the live ones and apply them under one lock.
    fn update(
        &self,
        change: impl FnOnce(WaveformParameters) -> Result<WaveformParameters>,
    ) -> Result<()> {
        let mut scheduler = self.scheduler.lock();
        let params = change(*scheduler.parameters())?;
        scheduler.apply_parameters(params, self.policy)
    }

    /// Execute one command.
    pub fn apply(&self, command: ToneCommand) -> Result<()> {
        debug!("Command: {command}");
        match command {
            ToneCommand::Play {
                wave,
                frequency,
                beat_frequency,
            } => self.play(wave, frequency, beat_frequency),
            ToneCommand::PlayCurrent => self.play_current(),
            ToneCommand::Stop => self.stop(),
            ToneCommand::SetFrequency(hz) => self.set_frequency(hz),
            ToneCommand::SetBeatFrequency(hz) => self.set_beat_frequency(hz),
            ToneCommand::SetWaveKind(kind) => self.set_wave_kind(kind),
            ToneCommand::Preset(preset) => self.set_preset(preset),
        }
    }

    /// Run one refill tick on the calling thread.
    pub fn tick(&self) -> Result<TickReport> {
        self.scheduler.lock().tick()
    }

    /// Start a thread that ticks every `tick_interval_ms`.
    ///
    /// Does nothing if the ticker is already running.
    pub fn spawn_ticker(&mut self) -> Result<()> {
        if self.ticker.is_some() {
            return Ok(());
        }

        let running = Arc::new(AtomicBool::new(true));
        let running_clone = Arc::clone(&running);
        let scheduler = Arc::clone(&self.scheduler);
        let last_error = Arc::clone(&self.last_tick_error);
        let interval = self.tick_interval;

        let handle = thread::Builder::new()
            .name("tonegen-ticker".into())
            .spawn(move || run_tick_loop(scheduler, running_clone, last_error, interval))?;

        debug!("Ticker started ({}ms interval)", interval.as_millis());
        self.ticker = Some(Ticker { running, handle });
        Ok(())
    }

    /// Signal the ticker thread and wait for it to finish.
    pub fn stop_ticker(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.running.store(false, Ordering::Relaxed);
            if ticker.handle.join().is_err() {
                warn!("Ticker thread panicked during shutdown");
            } else {
                debug!("Ticker stopped");
            }
        }
    }

    /// Whether the ticker thread is running.
    pub fn has_ticker(&self) -> bool {
        self.ticker.is_some()
    }

    /// Most recent error raised by the ticker thread, cleared on read.
    ///
    /// The scheduler is already idle when this is set.
    pub fn take_tick_error(&self) -> Option<String> {
        self.last_tick_error.lock().take()
    }

    /// Copy of the most recently generated block, for display.
    pub fn latest_block_snapshot(&self) -> AudioBlock {
        self.snapshot.lock().clone()
    }

    /// Live parameters.
    pub fn parameters(&self) -> WaveformParameters {
        *self.scheduler.lock().parameters()
    }

    /// Scheduler state.
    pub fn state(&self) -> SchedulerState {
        self.scheduler.lock().state()
    }

    /// True while playing.
    pub fn is_playing(&self) -> bool {
        self.scheduler.lock().is_playing()
    }

    /// Stream statistics.
    pub fn stats(&self) -> StreamStats {
        self.scheduler.lock().stats()
    }

    /// Position of the next sample to be generated.
    pub fn cursor(&self) -> PhaseCursor {
        self.scheduler.lock().cursor()
    }

    /// Stream layout.
    pub fn stream_config(&self) -> StreamConfig {
        *self.scheduler.lock().config()
    }

    /// Parameter change policy.
    pub fn policy(&self) -> ChangePolicy {
        self.policy
    }

    /// Replace the parameter change policy.
    pub fn set_policy(&mut self, policy: ChangePolicy) {
        self.policy = policy;
    }

    /// Stop the ticker, then stop playback and close the device.
    pub fn shutdown(&mut self) {
        self.stop_ticker();
        self.scheduler.lock().shutdown();
        info!("Tone generator shut down");
    }
}

/// Ticker thread body: tick, then sleep out the rest of the interval.
fn run_tick_loop(
    scheduler: Arc<Mutex<StreamingScheduler>>,
    running: Arc<AtomicBool>,
    last_error: Arc<Mutex<Option<String>>>,
    interval: Duration,
) {
    while running.load(Ordering::Relaxed) {
        let started = Instant::now();
        let result = scheduler.lock().tick();
        if let Err(e) = result {
            *last_error.lock() = Some(e.to_string());
        }
        if let Some(rest) = interval.checked_sub(started.elapsed()) {
            thread::sleep(rest);
        }
    }
}

impl Drop for ToneController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::{VirtualSink, VirtualSinkProbe};
    use approx::assert_relative_eq;

    fn controller() -> (ToneController, VirtualSinkProbe) {
        let (opener, probe) = VirtualSink::opener();
        let config = ToneConfig {
            noise_seed: Some(5),
            ..ToneConfig::default()
        };
        (ToneController::new(config, Box::new(opener)).unwrap(), probe)
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            "play sine 440 10".parse::<ToneCommand>().unwrap(),
            ToneCommand::Play {
                wave: WaveKind::Sine,
                frequency: 440.0,
                beat_frequency: 10.0
            }
        );
        assert_eq!("play".parse::<ToneCommand>().unwrap(), ToneCommand::PlayCurrent);
        assert_eq!(" STOP ".parse::<ToneCommand>().unwrap(), ToneCommand::Stop);
        assert_eq!(
            "freq 1000hz".parse::<ToneCommand>().unwrap(),
            ToneCommand::SetFrequency(1000.0)
        );
        assert_eq!(
            "beat 8".parse::<ToneCommand>().unwrap(),
            ToneCommand::SetBeatFrequency(8.0)
        );
        assert_eq!(
            "wave pink".parse::<ToneCommand>().unwrap(),
            ToneCommand::SetWaveKind(WaveKind::PinkNoise)
        );
        assert_eq!(
            "preset 5000 Hz".parse::<ToneCommand>().unwrap(),
            ToneCommand::Preset(FrequencyPreset::Hz5000)
        );
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        for line in ["", "jump", "freq", "freq loud", "wave saw", "preset 7", "stop now"] {
            assert!(line.parse::<ToneCommand>().is_err(), "accepted {line:?}");
        }
    }

    #[test]
    fn test_display_parses_back() {
        let command = ToneCommand::Play {
            wave: WaveKind::BinauralBeat,
            frequency: 200.0,
            beat_frequency: 7.5,
        };
        assert_eq!(command.to_string().parse::<ToneCommand>().unwrap(), command);
    }

    #[test]
    fn test_play_then_stop() {
        let (controller, probe) = controller();
        controller.play(WaveKind::Square, 1000.0, 0.0).unwrap();
        assert!(controller.is_playing());
        assert_eq!(controller.parameters().kind, WaveKind::Square);
        assert_eq!(probe.queued_blocks(), 4);

        controller.stop().unwrap();
        assert!(!controller.is_playing());
        assert_eq!(controller.cursor(), PhaseCursor::START);
        controller.stop().unwrap();
    }

    #[test]
    fn test_invalid_frequency_keeps_previous_parameters() {
        let (controller, _probe) = controller();
        controller.play(WaveKind::Sine, 440.0, 0.0).unwrap();
        let cursor = controller.cursor();

        for bad in [0.0, -20.0, f64::NAN] {
            assert!(matches!(
                controller.set_frequency(bad),
                Err(ToneError::InvalidParameter(_))
            ));
        }
        assert!(controller.play(WaveKind::Sine, 0.0, 0.0).is_err());
        assert!(controller.set_beat_frequency(-1.0).is_err());

        assert_relative_eq!(controller.parameters().frequency, 440.0);
        assert_eq!(controller.cursor(), cursor);
        assert!(controller.is_playing());
    }

    #[test]
    fn test_changes_while_idle_are_stored() {
        let (controller, probe) = controller();
        controller.set_wave_kind(WaveKind::BinauralBeat).unwrap();
        controller.set_preset(FrequencyPreset::Hz1000).unwrap();
        controller.set_beat_frequency(4.0).unwrap();
        assert_eq!(probe.open_count(), 0);

        controller.play_current().unwrap();
        let params = controller.parameters();
        assert_eq!(params.kind, WaveKind::BinauralBeat);
        assert_relative_eq!(params.frequency, 1000.0);
        assert_relative_eq!(params.frequency2(), 1004.0);
    }

    #[test]
    fn test_play_while_playing_uses_policy() {
        let (mut controller, probe) = controller();
        controller.play(WaveKind::Sine, 440.0, 0.0).unwrap();
        probe.drain_blocks(2);
        controller.tick().unwrap();
        assert_eq!(controller.cursor().position(), 6 * 4096);

        controller.play(WaveKind::Sine, 880.0, 0.0).unwrap();
        assert_eq!(controller.cursor().position(), 4 * 4096);
        assert_eq!(controller.stats().starts, 2);

        controller.set_policy(ChangePolicy::PreservePhase);
        controller.set_frequency(660.0).unwrap();
        assert_eq!(controller.cursor().position(), 4 * 4096);
        assert_eq!(controller.stats().starts, 2);
        assert_relative_eq!(controller.parameters().frequency, 660.0);
    }

    #[test]
    fn test_apply_dispatches() {
        let (controller, _probe) = controller();
        controller
            .apply("play white 440".parse().unwrap())
            .unwrap();
        assert_eq!(controller.parameters().kind, WaveKind::WhiteNoise);
        controller.apply(ToneCommand::Stop).unwrap();
        assert!(!controller.is_playing());
    }

    #[test]
    fn test_snapshot_follows_generation() {
        let (controller, _probe) = controller();
        assert!(controller
            .latest_block_snapshot()
            .samples()
            .iter()
            .all(|&s| s == 0));
        controller.play(WaveKind::Square, 441.0, 0.0).unwrap();
        let snapshot = controller.latest_block_snapshot();
        assert_eq!(snapshot.len(), 4096);
        assert!(snapshot.samples().iter().any(|&s| s != 0));
    }

    #[test]
    fn test_device_failure_reported_on_play() {
        let (controller, probe) = controller();
        probe.set_fail_open(true);
        assert!(matches!(
            controller.play(WaveKind::Sine, 440.0, 0.0),
            Err(ToneError::AudioDeviceError(_))
        ));
        assert!(!controller.is_playing());
    }

    #[test]
    fn test_shutdown_joins_ticker_and_closes_sink() {
        let (mut controller, probe) = controller();
        controller.spawn_ticker().unwrap();
        controller.spawn_ticker().unwrap();
        assert!(controller.has_ticker());
        controller.play(WaveKind::Sine, 440.0, 0.0).unwrap();

        controller.shutdown();
        assert!(!controller.has_ticker());
        assert!(!probe.is_open());
        assert!(!controller.is_playing());
    }
}
