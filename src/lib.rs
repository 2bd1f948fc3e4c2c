//! Tone Generator
//!
//! Generates periodic and stochastic test signals (sine, square, white noise,
//! a pink-noise approximation and dual-tone binaural beats) and streams them to
//! an audio device through a small ring of fixed-size blocks, refilled on a
//! fixed tick so playback stays gapless while parameters change.
//!
//! # Features
//! - Phase-continuous block generation (successive blocks join without clicks)
//! - Fixed pool of `num_buffers` blocks cycled between generator and device
//! - Tick-driven refill with underrun detection and automatic recovery
//! - Parameter changes while playing (restart or phase-preserving)
//! - Display snapshot of the most recently generated block
//!
//! # Crate feature flags
//! - `visualization` (default): Terminal visualization helpers (`visualization`)
//! - `streaming` (opt-in): Real-time audio output (enables optional `rodio` dep)
//!
//! # Quick start
//! ## Generate a block
//! ```
//! use tonegen::waveform::{generate, PhaseCursor, WaveKind, WaveformParameters};
//! use rand::SeedableRng;
//!
//! let params = WaveformParameters::new(WaveKind::Sine, 440.0, 0.0, 32760, 44_100).unwrap();
//! let mut rng = rand::rngs::SmallRng::seed_from_u64(7);
//! let out = generate(&params, PhaseCursor::START, 1024, 0, &mut rng);
//! assert_eq!(out.block.len(), 1024);
//! assert_eq!(out.cursor.position(), 1024);
//! ```
//!
//! ## Drive a headless stream
//! ```
//! use tonegen::{ToneConfig, ToneController, VirtualSink, WaveKind};
//!
//! let (opener, probe) = VirtualSink::opener();
//! let controller = ToneController::new(ToneConfig::default(), Box::new(opener)).unwrap();
//! controller.play(WaveKind::Sine, 440.0, 0.0).unwrap();
//! probe.drain_blocks(2);
//! let report = controller.tick().unwrap();
//! assert_eq!(report.refilled, 2);
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod controller;
pub mod session;
pub mod streaming; // Ring, Scheduler & Device Output
#[cfg(feature = "visualization")]
pub mod visualization; // Terminal UI Helpers
pub mod waveform; // Sample Generation

/// Error types for tone generation and streaming
#[derive(thiserror::Error, Debug)]
pub enum ToneError {
    /// Rejected waveform parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// Audio device could not be opened (not retryable)
    #[error("Audio device error: {0}")]
    AudioDeviceError(String),

    /// Audio sink call failed after the device was opened
    #[error("Audio sink error: {0}")]
    SinkError(String),

    /// Buffer slot bookkeeping violation
    #[error("Buffer ring error: {0}")]
    RingError(String),

    /// IO error from filesystem or device
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed JSON configuration
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<String> for ToneError {
    /// Converts a String into `ToneError::Other`.
    ///
    /// Prefer the specific variants (`InvalidParameter`, `SinkError`, ...) where
    /// the caller needs to tell failures apart.
    fn from(msg: String) -> Self {
        ToneError::Other(msg)
    }
}

impl From<&str> for ToneError {
    /// Converts a string slice into `ToneError::Other`.
    fn from(msg: &str) -> Self {
        ToneError::Other(msg.to_string())
    }
}

/// Result type for tone generator operations
pub type Result<T> = std::result::Result<T, ToneError>;

// Public API exports
pub use config::{ChangePolicy, FrequencyPreset, ToneConfig};
pub use controller::{ToneCommand, ToneController};
pub use session::{PlaybackSession, SessionState};
#[cfg(feature = "streaming")]
pub use streaming::{RodioOpener, RodioSink};
pub use streaming::{
    AudioSink, BufferRing, SinkFormat, SinkOpener, SlotId, StreamConfig, StreamStats,
    StreamingScheduler, TickReport, VirtualSink, VirtualSinkProbe,
};
#[cfg(feature = "visualization")]
pub use visualization::create_volume_bar;
pub use waveform::{generate, AudioBlock, PhaseCursor, WaveKind, WaveformParameters};
