//! Sample generators
//!
//! Block-oriented generation of signed 16-bit mono samples for every
//! [`WaveKind`]. Generation is a pure function of the parameters, the
//! [`PhaseCursor`], the carried pink-noise sample and the caller's RNG, so
//! successive calls with the returned cursor join into one continuous signal.

use std::f64::consts::TAU;
use std::fmt;
use std::str::FromStr;

use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{Result, ToneError};

/// Largest accepted amplitude (full scale of a signed 16-bit sample)
pub const MAX_AMPLITUDE: i16 = i16::MAX;

/// Waveform family produced by the generator
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, FromPrimitive, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum WaveKind {
    /// Pure sine tone
    #[default]
    Sine = 0,
    /// 50% duty-cycle square wave
    Square = 1,
    /// Uniform white noise
    #[serde(alias = "white")]
    WhiteNoise = 2,
    /// Two-tap smoothed white noise (pink-noise approximation)
    #[serde(alias = "pink")]
    PinkNoise = 3,
    /// Average of two sines `frequency` and `frequency + beat_frequency`
    #[serde(alias = "binaural")]
    BinauralBeat = 4,
}

impl WaveKind {
    /// All kinds, in selector order
    pub const ALL: [WaveKind; 5] = [
        WaveKind::Sine,
        WaveKind::Square,
        WaveKind::WhiteNoise,
        WaveKind::PinkNoise,
        WaveKind::BinauralBeat,
    ];

    /// Kind at a selector (combo box) index.
    pub fn from_index(index: usize) -> Option<Self> {
        WaveKind::from_usize(index)
    }

    /// Selector index of this kind.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Short name used on the command line and in config files.
    pub fn as_str(&self) -> &'static str {
        match self {
            WaveKind::Sine => "sine",
            WaveKind::Square => "square",
            WaveKind::WhiteNoise => "white",
            WaveKind::PinkNoise => "pink",
            WaveKind::BinauralBeat => "binaural",
        }
    }

    /// Human readable label.
    pub fn label(&self) -> &'static str {
        match self {
            WaveKind::Sine => "Sine",
            WaveKind::Square => "Square",
            WaveKind::WhiteNoise => "White Noise",
            WaveKind::PinkNoise => "Pink Noise",
            WaveKind::BinauralBeat => "Binaural Beats",
        }
    }

    /// True for kinds whose output depends only on the cursor (no RNG draws).
    pub fn is_deterministic(&self) -> bool {
        matches!(
            self,
            WaveKind::Sine | WaveKind::Square | WaveKind::BinauralBeat
        )
    }
}

impl fmt::Display for WaveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WaveKind {
    type Err = ToneError;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "sine" | "sin" => Ok(WaveKind::Sine),
            "square" | "sq" => Ok(WaveKind::Square),
            "white" | "white_noise" | "whitenoise" | "noise" => Ok(WaveKind::WhiteNoise),
            "pink" | "pink_noise" | "pinknoise" => Ok(WaveKind::PinkNoise),
            "binaural" | "binaural_beat" | "binaural_beats" | "beat" => Ok(WaveKind::BinauralBeat),
            other => Err(ToneError::InvalidParameter(format!(
                "unknown wave kind '{other}'"
            ))),
        }
    }
}

/// Live synthesis parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WaveformParameters {
    /// Waveform family
    pub kind: WaveKind,
    /// Base frequency in Hz (> 0)
    pub frequency: f64,
    /// Beat offset in Hz for [`WaveKind::BinauralBeat`] (>= 0)
    pub beat_frequency: f64,
    /// Peak amplitude (0..=32767)
    pub amplitude: i16,
    /// Output sample rate in Hz (> 0)
    pub sample_rate: u32,
}

impl WaveformParameters {
    /// Build a validated parameter set.
    pub fn new(
        kind: WaveKind,
        frequency: f64,
        beat_frequency: f64,
        amplitude: i16,
        sample_rate: u32,
    ) -> Result<Self> {
        let params = WaveformParameters {
            kind,
            frequency,
            beat_frequency,
            amplitude,
            sample_rate,
        };
        params.validate()?;
        Ok(params)
    }

    /// Check every field against its accepted range.
    pub fn validate(&self) -> Result<()> {
        validate_frequency(self.frequency)?;
        validate_beat_frequency(self.beat_frequency)?;
        if self.amplitude < 0 {
            return Err(ToneError::InvalidParameter(format!(
                "amplitude must be within 0..={MAX_AMPLITUDE}, got {}",
                self.amplitude
            )));
        }
        if self.sample_rate == 0 {
            return Err(ToneError::InvalidParameter(
                "sample rate must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    /// Second tone of a binaural beat.
    pub fn frequency2(&self) -> f64 {
        self.frequency + self.beat_frequency
    }

    /// Copy with a different wave kind.
    pub fn with_kind(self, kind: WaveKind) -> Self {
        WaveformParameters { kind, ..self }
    }

    /// Copy with a different base frequency, validated.
    pub fn with_frequency(self, frequency: f64) -> Result<Self> {
        validate_frequency(frequency)?;
        Ok(WaveformParameters { frequency, ..self })
    }

    /// Copy with a different beat frequency, validated.
    pub fn with_beat_frequency(self, beat_frequency: f64) -> Result<Self> {
        validate_beat_frequency(beat_frequency)?;
        Ok(WaveformParameters {
            beat_frequency,
            ..self
        })
    }

    /// Samples per period of the base frequency.
    pub fn period_samples(&self) -> f64 {
        self.sample_rate as f64 / self.frequency
    }
}

/// Reject non-finite and non-positive frequencies.
pub fn validate_frequency(frequency: f64) -> Result<()> {
    if !frequency.is_finite() || frequency <= 0.0 {
        return Err(ToneError::InvalidParameter(format!(
            "frequency must be a positive number of Hz, got {frequency}"
        )));
    }
    Ok(())
}

/// Reject non-finite and negative beat frequencies.
pub fn validate_beat_frequency(beat_frequency: f64) -> Result<()> {
    if !beat_frequency.is_finite() || beat_frequency < 0.0 {
        return Err(ToneError::InvalidParameter(format!(
            "beat frequency must be zero or a positive number of Hz, got {beat_frequency}"
        )));
    }
    Ok(())
}

/// Sample count since the session started playing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct PhaseCursor(u64);

impl PhaseCursor {
    /// Cursor of a freshly started session
    pub const START: PhaseCursor = PhaseCursor(0);

    /// Cursor at an absolute sample position.
    pub fn new(position: u64) -> Self {
        PhaseCursor(position)
    }

    /// Absolute sample position.
    pub fn position(&self) -> u64 {
        self.0
    }

    /// Cursor `length` samples later.
    #[inline]
    pub fn advance(self, length: usize) -> Self {
        PhaseCursor(self.0 + length as u64)
    }
}

/// One block of mono signed 16-bit samples
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AudioBlock {
    samples: Vec<i16>,
}

impl AudioBlock {
    /// Block of `len` zero samples.
    pub fn silent(len: usize) -> Self {
        AudioBlock {
            samples: vec![0; len],
        }
    }

    /// Wrap existing samples.
    pub fn from_samples(samples: Vec<i16>) -> Self {
        AudioBlock { samples }
    }

    /// Sample slice.
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    /// Consume the block, returning its samples.
    pub fn into_samples(self) -> Vec<i16> {
        self.samples
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// True when the block holds no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Final sample, carried into the next pink-noise block (0 when empty).
    pub fn last_sample(&self) -> i16 {
        self.samples.last().copied().unwrap_or(0)
    }

    /// Samples normalised to -1.0..=1.0 for display.
    pub fn to_f32(&self) -> Vec<f32> {
        self.samples
            .iter()
            .map(|&s| s as f32 / MAX_AMPLITUDE as f32)
            .collect()
    }
}

/// Result of one [`generate`] call
#[derive(Debug, Clone)]
pub struct Generated {
    /// Freshly generated samples
    pub block: AudioBlock,
    /// Cursor advanced by the block length
    pub cursor: PhaseCursor,
    /// Last sample, to pass as `carry` to the next call
    pub carry: i16,
}

/// Generate `length` samples starting at `cursor`.
///
/// `carry` is the last sample of the previous block (0 at session start); only
/// [`WaveKind::PinkNoise`] reads it. The returned cursor is always
/// `cursor + length`.
pub fn generate<R: Rng + ?Sized>(
    params: &WaveformParameters,
    cursor: PhaseCursor,
    length: usize,
    carry: i16,
    rng: &mut R,
) -> Generated {
    let mut samples = vec![0i16; length];
    let carry = generate_into(params, cursor, &mut samples, carry, rng);
    Generated {
        block: AudioBlock::from_samples(samples),
        cursor: cursor.advance(length),
        carry,
    }
}

/// Fill `out` starting at `cursor`; returns the new carry sample.
pub fn generate_into<R: Rng + ?Sized>(
    params: &WaveformParameters,
    cursor: PhaseCursor,
    out: &mut [i16],
    carry: i16,
    rng: &mut R,
) -> i16 {
    let start = cursor.position();
    let amplitude = params.amplitude;
    let sample_rate = params.sample_rate;

    match params.kind {
        WaveKind::Sine => {
            for (n, slot) in (start..).zip(out.iter_mut()) {
                *slot = sine_sample(amplitude, params.frequency, sample_rate, n);
            }
        }
        WaveKind::Square => {
            let period = params.period_samples();
            for (n, slot) in (start..).zip(out.iter_mut()) {
                *slot = square_sample(amplitude, period, n);
            }
        }
        WaveKind::WhiteNoise => {
            for slot in out.iter_mut() {
                *slot = noise_draw(amplitude, rng);
            }
        }
        WaveKind::PinkNoise => {
            let mut previous = carry;
            for slot in out.iter_mut() {
                let smoothed = (noise_draw(amplitude, rng) as i32 + previous as i32) / 2;
                previous = smoothed as i16;
                *slot = previous;
            }
        }
        WaveKind::BinauralBeat => {
            let frequency2 = params.frequency2();
            for (n, slot) in (start..).zip(out.iter_mut()) {
                *slot = binaural_sample(amplitude, params.frequency, frequency2, sample_rate, n);
            }
        }
    }

    out.last().copied().unwrap_or(carry)
}

/// Sine sample at absolute position `n`, truncated toward zero.
#[inline]
pub fn sine_sample(amplitude: i16, frequency: f64, sample_rate: u32, n: u64) -> i16 {
    // Reduce to a single cycle first; keeps precision over long sessions.
    let cycles = (n as f64 * frequency / sample_rate as f64).fract();
    (amplitude as f64 * (TAU * cycles).sin()) as i16
}

/// Square sample at absolute position `n` for a period of `period` samples.
#[inline]
pub fn square_sample(amplitude: i16, period: f64, n: u64) -> i16 {
    if (n as f64) % period < period / 2.0 {
        amplitude
    } else {
        -amplitude
    }
}

/// Binaural sample: mean of two sines, summed in `i32` before halving.
#[inline]
pub fn binaural_sample(
    amplitude: i16,
    frequency: f64,
    frequency2: f64,
    sample_rate: u32,
    n: u64,
) -> i16 {
    let a = sine_sample(amplitude, frequency, sample_rate, n) as i32;
    let b = sine_sample(amplitude, frequency2, sample_rate, n) as i32;
    ((a + b) / 2) as i16
}

#[inline]
fn noise_draw<R: Rng + ?Sized>(amplitude: i16, rng: &mut R) -> i16 {
    rng.random_range(-amplitude..=amplitude)
}
