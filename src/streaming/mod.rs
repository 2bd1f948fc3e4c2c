//! Gapless block streaming
//!
//! A fixed ring of `num_buffers` blocks is cycled between the generator and an
//! [`AudioSink`]. The [`StreamingScheduler`] refills every block the sink has
//! finished with on each tick and restarts the sink if it ran dry.

#[cfg(feature = "streaming")]
pub mod audio_device;
pub mod ring;
pub mod scheduler;
pub mod sink;
pub mod virtual_sink;

#[cfg(feature = "streaming")]
pub use audio_device::{RodioOpener, RodioSink};
pub use ring::{BufferRing, SlotId, SlotState};
pub use scheduler::{SchedulerState, StreamStats, StreamingScheduler, TickReport};
pub use sink::{AudioSink, RetryOnce, SinkFormat, SinkOpener};
pub use virtual_sink::{VirtualOpener, VirtualSink, VirtualSinkProbe};

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Result, ToneError};

/// Default sample rate (44.1 kHz)
pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

/// Default number of blocks in the ring
pub const DEFAULT_NUM_BUFFERS: usize = 4;

/// Default refill tick in milliseconds
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 10;

/// Configuration for streaming playback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Sample rate in Hz
    pub sample_rate: u32,

    /// Samples per block
    /// Larger blocks = more latency but more slack for a late tick
    pub buffer_size: usize,

    /// Number of blocks cycled through the sink
    pub num_buffers: usize,

    /// Interval between refill ticks in milliseconds
    pub tick_interval_ms: u64,
}

impl StreamConfig {
    /// Create a streaming configuration optimized for low latency
    /// 4 × 4096 samples ≈ 372ms queued @ 44.1kHz
    pub fn low_latency(sample_rate: u32) -> Self {
        StreamConfig {
            sample_rate,
            buffer_size: 4096,
            num_buffers: DEFAULT_NUM_BUFFERS,
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
        }
    }

    /// Create a streaming configuration optimized for stability
    /// Half-second blocks, 2 seconds queued
    pub fn stable(sample_rate: u32) -> Self {
        StreamConfig {
            sample_rate,
            buffer_size: (sample_rate / 2) as usize,
            num_buffers: DEFAULT_NUM_BUFFERS,
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
        }
    }

    /// Duration of one block in milliseconds
    pub fn block_ms(&self) -> f32 {
        ((self.buffer_size as f32) / (self.sample_rate as f32)) * 1000.0
    }

    /// Get latency of a full ring in milliseconds
    pub fn latency_ms(&self) -> f32 {
        self.block_ms() * self.num_buffers as f32
    }

    /// Refill tick period
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Samples the device plays during one tick interval
    pub fn samples_per_tick(&self) -> u64 {
        self.tick_interval_ms.saturating_mul(self.sample_rate as u64) / 1000
    }

    /// Reject layouts the scheduler cannot keep fed.
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(ToneError::ConfigError(
                "sample rate must be greater than 0".into(),
            ));
        }
        if self.buffer_size == 0 {
            return Err(ToneError::ConfigError(
                "buffer size must be greater than 0".into(),
            ));
        }
        if self.num_buffers == 0 {
            return Err(ToneError::ConfigError(
                "number of buffers must be greater than 0".into(),
            ));
        }
        if self.tick_interval_ms == 0 {
            return Err(ToneError::ConfigError(
                "tick interval must be greater than 0".into(),
            ));
        }
        // A tick must come around before the device finishes one block.
        if self.samples_per_tick() >= self.buffer_size as u64 {
            return Err(ToneError::ConfigError(format!(
                "tick interval {}ms plays {} samples, not less than the {}-sample block",
                self.tick_interval_ms,
                self.samples_per_tick(),
                self.buffer_size
            )));
        }
        Ok(())
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self::low_latency(DEFAULT_SAMPLE_RATE)
    }
}
