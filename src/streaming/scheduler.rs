//! Tick-driven refill of the block ring
//!
//! State machine:
//! - `Idle → Playing` on [`StreamingScheduler::start`]: open the sink if needed,
//!   fill every slot from phase 0, submit, play.
//! - `Playing → Playing` on [`StreamingScheduler::tick`]: reclaim processed
//!   blocks, regenerate and resubmit them, re-issue play after an underrun.
//! - `Playing → Idle` on [`StreamingScheduler::stop`]: halt the sink, flush the
//!   ring, reset the phase.
//!
//! Each sink call is retried once; a second failure forces `Idle` and is
//! returned to the caller.

use std::sync::Arc;

use log::{debug, error, info, warn};
use parking_lot::Mutex;

use super::ring::BufferRing;
use super::sink::{AudioSink, RetryOnce, SinkFormat, SinkOpener};
use super::StreamConfig;
use crate::config::ChangePolicy;
use crate::session::{PlaybackSession, SessionState};
use crate::waveform::{AudioBlock, PhaseCursor, WaveformParameters};
use crate::{Result, ToneError};

/// Scheduler state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Nothing queued on the sink
    Idle,
    /// Ring cycling through the sink
    Playing,
}

/// Stream statistics for monitoring refills and buffer health
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    /// Ticks run while playing
    pub ticks: u64,
    /// Blocks produced by the generator
    pub blocks_generated: u64,
    /// Blocks accepted by the sink
    pub blocks_submitted: u64,
    /// Underruns detected and recovered
    pub underruns: u64,
    /// Sink calls that failed once and were retried
    pub sink_retries: u64,
    /// Sessions started
    pub starts: u64,
}

/// Outcome of one tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Blocks reclaimed, regenerated and resubmitted
    pub refilled: usize,
    /// The sink had stopped and play was re-issued
    pub underrun: bool,
}

/// Drives a [`PlaybackSession`] and a [`BufferRing`] against an [`AudioSink`]
pub struct StreamingScheduler {
    config: StreamConfig,
    opener: Box<dyn SinkOpener>,
    sink: Option<Box<dyn AudioSink>>,
    ring: BufferRing,
    session: PlaybackSession,
    stats: StreamStats,
    snapshot: Arc<Mutex<AudioBlock>>,
}

impl StreamingScheduler {
    /// Idle scheduler; the sink is opened on the first start.
    pub fn new(
        config: StreamConfig,
        params: WaveformParameters,
        noise_seed: Option<u64>,
        opener: Box<dyn SinkOpener>,
    ) -> Result<Self> {
        config.validate()?;
        let params = Self::conform(&config, params)?;
        Ok(StreamingScheduler {
            ring: BufferRing::new(config.num_buffers, config.buffer_size)?,
            session: PlaybackSession::new(params, noise_seed),
            snapshot: Arc::new(Mutex::new(AudioBlock::silent(config.buffer_size))),
            stats: StreamStats::default(),
            sink: None,
            opener,
            config,
        })
    }

    /// Parameters must be valid and match the stream's sample rate.
    fn conform(config: &StreamConfig, params: WaveformParameters) -> Result<WaveformParameters> {
        params.validate()?;
        if params.sample_rate != config.sample_rate {
            return Err(ToneError::InvalidParameter(format!(
                "parameters use {} Hz but the stream runs at {} Hz",
                params.sample_rate, config.sample_rate
            )));
        }
        Ok(params)
    }

    /// Current state.
    pub fn state(&self) -> SchedulerState {
        match self.session.state() {
            SessionState::Playing => SchedulerState::Playing,
            SessionState::Stopped => SchedulerState::Idle,
        }
    }

    /// True while playing.
    pub fn is_playing(&self) -> bool {
        self.session.is_playing()
    }

    /// Stream layout.
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Live parameters.
    pub fn parameters(&self) -> &WaveformParameters {
        self.session.parameters()
    }

    /// Position of the next sample to be generated.
    pub fn cursor(&self) -> PhaseCursor {
        self.session.cursor()
    }

    /// Block ring.
    pub fn ring(&self) -> &BufferRing {
        &self.ring
    }

    /// Current statistics.
    pub fn stats(&self) -> StreamStats {
        self.stats
    }

    /// Whether a sink is open.
    pub fn has_sink(&self) -> bool {
        self.sink.is_some()
    }

    /// Shared cell holding the most recently generated block.
    pub fn snapshot_handle(&self) -> Arc<Mutex<AudioBlock>> {
        Arc::clone(&self.snapshot)
    }

    /// Most recently generated block.
    pub fn latest_block(&self) -> AudioBlock {
        self.snapshot.lock().clone()
    }

    /// Start a fresh session with `params`.
    ///
    /// A session already playing is stopped first. Failing to open the device
    /// is fatal for this call and leaves the scheduler idle.
    pub fn start(&mut self, params: WaveformParameters) -> Result<()> {
        let params = Self::conform(&self.config, params)?;
        if self.is_playing() {
            self.stop()?;
        }

        if self.sink.is_none() {
            let format = SinkFormat::mono16(self.config.sample_rate);
            let sink = self.opener.open(format).map_err(|e| match e {
                ToneError::AudioDeviceError(msg) => ToneError::AudioDeviceError(msg),
                other => ToneError::AudioDeviceError(other.to_string()),
            })?;
            info!(
                "Audio sink opened: {} Hz mono 16-bit, {} x {} samples ({:.1}ms latency)",
                format.sample_rate,
                self.config.num_buffers,
                self.config.buffer_size,
                self.config.latency_ms()
            );
            self.sink = Some(sink);
        }

        self.session.begin(params);
        let result = self.initial_fill();
        if let Err(e) = &result {
            error!("Initial fill failed, stream stopped: {e}");
            self.force_idle();
        } else {
            self.stats.starts += 1;
            info!(
                "Playing {} at {} Hz (beat {} Hz)",
                params.kind.label(),
                params.frequency,
                params.beat_frequency
            );
        }
        result
    }

    fn initial_fill(&mut self) -> Result<()> {
        let Some(sink) = self.sink.as_deref_mut() else {
            return Err(ToneError::SinkError("no open sink".into()));
        };
        let block_len = self.ring.block_len();
        let blocks: Vec<AudioBlock> = (0..self.ring.len())
            .map(|_| self.session.next_block(block_len))
            .collect();
        self.stats.blocks_generated += blocks.len() as u64;
        if let Some(last) = blocks.last() {
            *self.snapshot.lock() = last.clone();
        }

        let mut sink = RetryOnce::new(sink);
        let outcome = self
            .ring
            .submit_all(&mut sink, blocks)
            .and_then(|submitted| {
                self.stats.blocks_submitted += submitted as u64;
                sink.play()
            });
        self.stats.sink_retries += sink.retries() as u64;
        outcome
    }

    /// Refill everything the sink has finished with; recover from underrun.
    ///
    /// Idle schedulers ignore ticks. A failing sink forces `Idle` and the error
    /// is returned.
    pub fn tick(&mut self) -> Result<TickReport> {
        if !self.is_playing() {
            return Ok(TickReport::default());
        }
        self.stats.ticks += 1;

        let result = self.refill_processed();
        match &result {
            Ok(report) if report.refilled > 0 => {
                debug!(
                    "Refilled {} block(s), cursor at {}",
                    report.refilled,
                    self.session.cursor().position()
                );
            }
            Ok(_) => {}
            Err(e) => {
                error!("Refill tick failed, stream stopped: {e}");
                self.force_idle();
            }
        }
        result
    }

    fn refill_processed(&mut self) -> Result<TickReport> {
        let Some(sink) = self.sink.as_deref_mut() else {
            return Err(ToneError::SinkError("no open sink".into()));
        };
        let mut sink = RetryOnce::new(sink);
        let outcome = refill_cycle(
            &mut self.ring,
            &mut self.session,
            &mut sink,
            &mut self.stats,
            &self.snapshot,
        );
        self.stats.sink_retries += sink.retries() as u64;
        outcome
    }

    /// Stop playback immediately and reset the phase.
    ///
    /// Stopping an idle scheduler does nothing. The scheduler is idle afterwards
    /// even if the sink reported an error.
    pub fn stop(&mut self) -> Result<()> {
        if !self.is_playing() {
            return Ok(());
        }
        let result = match self.sink.as_deref_mut() {
            Some(sink) => {
                let mut sink = RetryOnce::new(sink);
                let halted = sink.stop();
                let flushed = self.ring.flush(&mut sink);
                self.stats.sink_retries += sink.retries() as u64;
                halted.and(flushed)
            }
            None => {
                self.ring.release_all();
                Ok(())
            }
        };
        self.session.end();
        if let Err(e) = &result {
            warn!("Audio sink did not stop cleanly, closing it: {e}");
            self.close_sink();
        } else {
            info!("Playback stopped");
        }
        result
    }

    /// Apply new parameters according to `policy`.
    ///
    /// While idle the parameters are stored for the next start.
    pub fn apply_parameters(
        &mut self,
        params: WaveformParameters,
        policy: ChangePolicy,
    ) -> Result<()> {
        let params = Self::conform(&self.config, params)?;
        if !self.is_playing() {
            self.session.set_parameters(params);
            return Ok(());
        }
        match policy {
            ChangePolicy::Restart => {
                debug!("Parameter change: restarting stream");
                self.stop()?;
                self.start(params)
            }
            ChangePolicy::PreservePhase => {
                debug!(
                    "Parameter change: keeping phase at {}",
                    self.session.cursor().position()
                );
                self.session.set_parameters(params);
                Ok(())
            }
        }
    }

    /// Stop and release the device.
    pub fn shutdown(&mut self) {
        if let Err(e) = self.stop() {
            warn!("Error while stopping during shutdown: {e}");
        }
        self.close_sink();
    }

    /// Drop to `Idle` after an unrecoverable sink failure.
    fn force_idle(&mut self) {
        if let Some(sink) = self.sink.as_deref_mut() {
            if let Err(e) = sink.stop() {
                warn!("Error while halting failed sink: {e}");
            }
            if let Err(e) = sink.discard_queued() {
                warn!("Error while discarding queued blocks: {e}");
            }
        }
        self.ring.release_all();
        self.session.end();
        self.close_sink();
    }

    fn close_sink(&mut self) {
        if let Some(mut sink) = self.sink.take() {
            sink.close();
            info!("Audio sink closed");
        }
    }
}

/// One reclaim → generate → resubmit pass followed by the underrun check.
///
/// Dryness is sampled before resubmitting too, since some devices resume by
/// themselves as soon as new blocks arrive.
fn refill_cycle(
    ring: &mut BufferRing,
    session: &mut PlaybackSession,
    sink: &mut dyn AudioSink,
    stats: &mut StreamStats,
    snapshot: &Mutex<AudioBlock>,
) -> Result<TickReport> {
    let mut report = TickReport::default();
    let ran_dry = !sink.is_playing()?;

    let reclaimed = ring.reclaim_processed(sink)?;
    for id in reclaimed {
        let block = session.next_block(ring.block_len());
        stats.blocks_generated += 1;
        *snapshot.lock() = block.clone();
        ring.refill(sink, id, block)?;
        stats.blocks_submitted += 1;
        report.refilled += 1;
    }

    if ran_dry || !sink.is_playing()? {
        warn!("Audio sink ran dry, restarting playback");
        sink.play()?;
        stats.underruns += 1;
        report.underrun = true;
    }

    Ok(report)
}

impl Drop for StreamingScheduler {
    fn drop(&mut self) {
        self.shutdown();
        debug!(
            "Stream finished: {} blocks generated, {} underruns",
            self.stats.blocks_generated, self.stats.underruns
        );
    }
}
