//! Playback session state
//!
//! The only mutable synthesis state of a stream: live parameters, the phase
//! cursor, the carried pink-noise sample and the noise RNG.

use rand::rngs::SmallRng;
use rand::SeedableRng;

use crate::waveform::{generate, AudioBlock, PhaseCursor, WaveformParameters};

/// Whether a session is producing audio
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No audio queued, cursor at 0
    #[default]
    Stopped,
    /// Blocks are being generated and streamed
    Playing,
}

/// Live parameters plus phase of one play session
#[derive(Debug)]
pub struct PlaybackSession {
    state: SessionState,
    params: WaveformParameters,
    cursor: PhaseCursor,
    carry: i16,
    noise_seed: Option<u64>,
    rng: SmallRng,
}

impl PlaybackSession {
    /// Stopped session holding `params`.
    ///
    /// With a `noise_seed` every session replays the same noise sequence.
    pub fn new(params: WaveformParameters, noise_seed: Option<u64>) -> Self {
        PlaybackSession {
            state: SessionState::Stopped,
            params,
            cursor: PhaseCursor::START,
            carry: 0,
            noise_seed,
            rng: Self::make_rng(noise_seed),
        }
    }

    fn make_rng(seed: Option<u64>) -> SmallRng {
        match seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_os_rng(),
        }
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// True while playing.
    pub fn is_playing(&self) -> bool {
        self.state == SessionState::Playing
    }

    /// Live parameters.
    pub fn parameters(&self) -> &WaveformParameters {
        &self.params
    }

    /// Position of the next generated sample.
    pub fn cursor(&self) -> PhaseCursor {
        self.cursor
    }

    /// Last generated sample (pink-noise feedback).
    pub fn carry(&self) -> i16 {
        self.carry
    }

    /// Start playing `params` from phase 0.
    pub fn begin(&mut self, params: WaveformParameters) {
        self.params = params;
        self.rewind();
        if self.noise_seed.is_some() {
            self.rng = Self::make_rng(self.noise_seed);
        }
        self.state = SessionState::Playing;
    }

    /// Stop and reset the phase.
    pub fn end(&mut self) {
        self.rewind();
        self.state = SessionState::Stopped;
    }

    /// Replace the parameters without touching the phase.
    pub fn set_parameters(&mut self, params: WaveformParameters) {
        self.params = params;
    }

    fn rewind(&mut self) {
        self.cursor = PhaseCursor::START;
        self.carry = 0;
    }

    /// Generate the next `length` samples and advance the cursor.
    pub fn next_block(&mut self, length: usize) -> AudioBlock {
        let out = generate(&self.params, self.cursor, length, self.carry, &mut self.rng);
        self.cursor = out.cursor;
        self.carry = out.carry;
        out.block
    }
}
