//! Audio sink contract
//!
//! The scheduler talks to the playback device only through [`AudioSink`]: a
//! queue of whole blocks, each tagged with the ring slot it came from. Poll
//! style backends (OpenAL-like queues, rodio's `Sink`) map onto it directly.

use log::warn;

use super::ring::SlotId;
use crate::waveform::AudioBlock;
use crate::{Result, ToneError};

/// Device format requested at open time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkFormat {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Interleaved channel count
    pub channels: u16,
    /// Bits per sample
    pub bits_per_sample: u16,
}

impl SinkFormat {
    /// Mono signed 16-bit at `sample_rate`.
    pub fn mono16(sample_rate: u32) -> Self {
        SinkFormat {
            sample_rate,
            channels: 1,
            bits_per_sample: 16,
        }
    }
}

/// Opens playback devices.
///
/// Failure here is fatal for the play request that triggered it.
pub trait SinkOpener: Send {
    /// Open a device for `format`.
    fn open(&mut self, format: SinkFormat) -> Result<Box<dyn AudioSink>>;
}

/// Queue-based playback device.
///
/// Blocks are played in submission order. Once a block has been fully played
/// it counts as processed until the caller reclaims its slot.
pub trait AudioSink: Send {
    /// Enqueue one block for playback.
    fn submit(&mut self, slot: SlotId, block: &AudioBlock) -> Result<()>;

    /// Number of submitted blocks fully played and not yet reclaimed.
    fn processed_count(&mut self) -> Result<usize>;

    /// Pop the oldest processed block, returning its slot.
    fn reclaim(&mut self) -> Result<SlotId>;

    /// Whether the device is currently consuming samples.
    ///
    /// A device that ran out of queued blocks reports `false`.
    fn is_playing(&mut self) -> Result<bool>;

    /// Start or resume consuming the queue.
    fn play(&mut self) -> Result<()>;

    /// Halt playback immediately.
    fn stop(&mut self) -> Result<()>;

    /// Drop every queued and processed block without playing it.
    fn discard_queued(&mut self) -> Result<()>;

    /// Release the device. No other call is valid afterwards.
    fn close(&mut self);
}

/// Sink wrapper that retries each failing call exactly once.
///
/// A second consecutive failure is returned as [`ToneError::SinkError`].
pub struct RetryOnce<'a> {
    inner: &'a mut dyn AudioSink,
    retries: usize,
}

impl<'a> RetryOnce<'a> {
    /// Wrap `inner`.
    pub fn new(inner: &'a mut dyn AudioSink) -> Self {
        RetryOnce { inner, retries: 0 }
    }

    /// Calls that failed once and were retried.
    pub fn retries(&self) -> usize {
        self.retries
    }

    fn attempt<T>(
        &mut self,
        op: &'static str,
        mut call: impl FnMut(&mut dyn AudioSink) -> Result<T>,
    ) -> Result<T> {
        match call(&mut *self.inner) {
            Ok(value) => Ok(value),
            Err(first) => {
                warn!("Audio sink {op} failed ({first}), retrying once");
                self.retries += 1;
                call(&mut *self.inner).map_err(|second| {
                    ToneError::SinkError(format!("{op} failed twice: {second} (first: {first})"))
                })
            }
        }
    }
}

impl AudioSink for RetryOnce<'_> {
    fn submit(&mut self, slot: SlotId, block: &AudioBlock) -> Result<()> {
        self.attempt("submit", |sink| sink.submit(slot, block))
    }

    fn processed_count(&mut self) -> Result<usize> {
        self.attempt("processed_count", |sink| sink.processed_count())
    }

    fn reclaim(&mut self) -> Result<SlotId> {
        self.attempt("reclaim", |sink| sink.reclaim())
    }

    fn is_playing(&mut self) -> Result<bool> {
        self.attempt("is_playing", |sink| sink.is_playing())
    }

    fn play(&mut self) -> Result<()> {
        self.attempt("play", |sink| sink.play())
    }

    fn stop(&mut self) -> Result<()> {
        self.attempt("stop", |sink| sink.stop())
    }

    fn discard_queued(&mut self) -> Result<()> {
        self.attempt("discard_queued", |sink| sink.discard_queued())
    }

    fn close(&mut self) {
        self.inner.close();
    }
}
