//! Generator configuration
//!
//! [`ToneConfig`] bundles the stream layout with the initial waveform
//! settings. It round-trips through JSON; every field has a default, so a
//! config file only needs the values it changes.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::streaming::StreamConfig;
use crate::waveform::{WaveKind, WaveformParameters, MAX_AMPLITUDE};
use crate::{Result, ToneError};

/// Default peak amplitude (just under full scale)
pub const DEFAULT_AMPLITUDE: i16 = 32_760;

/// Default base frequency in Hz
pub const DEFAULT_FREQUENCY: f64 = 440.0;

/// Default binaural beat offset in Hz
pub const DEFAULT_BEAT_FREQUENCY: f64 = 10.0;

/// Default refresh period of the display snapshot in milliseconds
pub const DEFAULT_SNAPSHOT_INTERVAL_MS: u64 = 100;

/// What a parameter change does to a playing stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangePolicy {
    /// Stop, reset the phase cursor and start again with the new parameters.
    /// Audible as a click.
    #[default]
    Restart,
    /// Keep the queued audio and the phase cursor; refilled blocks pick up the
    /// new parameters.
    PreservePhase,
}

/// Frequency presets offered by the selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrequencyPreset {
    /// 440 Hz (concert A)
    A440,
    /// 1 kHz
    Hz1000,
    /// 5 kHz
    Hz5000,
    /// 10 kHz
    Hz10000,
}

impl FrequencyPreset {
    /// All presets, in selector order
    pub const ALL: [FrequencyPreset; 4] = [
        FrequencyPreset::A440,
        FrequencyPreset::Hz1000,
        FrequencyPreset::Hz5000,
        FrequencyPreset::Hz10000,
    ];

    /// Preset frequency in Hz.
    pub fn hz(self) -> f64 {
        match self {
            FrequencyPreset::A440 => 440.0,
            FrequencyPreset::Hz1000 => 1000.0,
            FrequencyPreset::Hz5000 => 5000.0,
            FrequencyPreset::Hz10000 => 10_000.0,
        }
    }
}

impl fmt::Display for FrequencyPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} Hz", self.hz())
    }
}

impl FromStr for FrequencyPreset {
    type Err = ToneError;

    /// Accepts `"440"`, `"440 Hz"` or `"440hz"`.
    fn from_str(value: &str) -> Result<Self> {
        let digits = value
            .trim()
            .trim_end_matches(|c: char| c.is_ascii_alphabetic() || c.is_whitespace());
        let hz: f64 = digits
            .parse()
            .map_err(|_| ToneError::InvalidParameter(format!("unknown preset '{value}'")))?;
        FrequencyPreset::ALL
            .into_iter()
            .find(|p| p.hz() == hz)
            .ok_or_else(|| ToneError::InvalidParameter(format!("unknown preset '{value}'")))
    }
}

/// Complete generator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToneConfig {
    /// Block layout and tick timing
    pub stream: StreamConfig,
    /// Peak amplitude (0..=32767)
    pub amplitude: i16,
    /// Initial wave kind
    pub wave: WaveKind,
    /// Initial base frequency in Hz
    pub frequency: f64,
    /// Initial binaural beat offset in Hz
    pub beat_frequency: f64,
    /// Behaviour of parameter changes while playing
    pub change_policy: ChangePolicy,
    /// Fixed noise seed; `None` seeds from the OS
    pub noise_seed: Option<u64>,
    /// Display snapshot refresh period in milliseconds
    pub snapshot_interval_ms: u64,
}

impl Default for ToneConfig {
    fn default() -> Self {
        ToneConfig {
            stream: StreamConfig::default(),
            amplitude: DEFAULT_AMPLITUDE,
            wave: WaveKind::Sine,
            frequency: DEFAULT_FREQUENCY,
            beat_frequency: DEFAULT_BEAT_FREQUENCY,
            change_policy: ChangePolicy::Restart,
            noise_seed: None,
            snapshot_interval_ms: DEFAULT_SNAPSHOT_INTERVAL_MS,
        }
    }
}

impl ToneConfig {
    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: ToneConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    /// Serialize as pretty JSON.
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check stream layout and initial parameters.
    pub fn validate(&self) -> Result<()> {
        self.stream.validate()?;
        if self.amplitude < 0 {
            return Err(ToneError::ConfigError(format!(
                "amplitude must be within 0..={MAX_AMPLITUDE}, got {}",
                self.amplitude
            )));
        }
        if self.snapshot_interval_ms == 0 {
            return Err(ToneError::ConfigError(
                "snapshot interval must be greater than 0".into(),
            ));
        }
        self.initial_parameters()
            .map(|_| ())
            .map_err(|e| ToneError::ConfigError(e.to_string()))
    }

    /// Waveform parameters the session starts with.
    pub fn initial_parameters(&self) -> Result<WaveformParameters> {
        WaveformParameters::new(
            self.wave,
            self.frequency,
            self.beat_frequency,
            self.amplitude,
            self.stream.sample_rate,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ToneConfig::default();
        assert!(config.validate().is_ok());
        let params = config.initial_parameters().unwrap();
        assert_eq!(params.kind, WaveKind::Sine);
        assert_eq!(params.frequency, 440.0);
        assert_eq!(params.frequency2(), 450.0);
        assert_eq!(params.amplitude, 32_760);
    }

    #[test]
    fn test_partial_json_takes_defaults() {
        let config = ToneConfig::from_json_str(
            r#"{ "wave": "binaural_beat", "frequency": 200.0, "stream": { "buffer_size": 8192 } }"#,
        )
        .unwrap();
        assert_eq!(config.wave, WaveKind::BinauralBeat);
        assert_eq!(config.frequency, 200.0);
        assert_eq!(config.stream.buffer_size, 8192);
        assert_eq!(config.stream.num_buffers, StreamConfig::default().num_buffers);
        assert_eq!(config.change_policy, ChangePolicy::Restart);
    }

    #[test]
    fn test_json_round_trip_keeps_policy_and_seed() {
        let config = ToneConfig {
            change_policy: ChangePolicy::PreservePhase,
            noise_seed: Some(42),
            ..ToneConfig::default()
        };
        let json = config.to_json_string().unwrap();
        assert!(json.contains("preserve_phase"));
        assert_eq!(ToneConfig::from_json_str(&json).unwrap(), config);
    }

    #[test]
    fn test_invalid_json_config_rejected() {
        assert!(matches!(
            ToneConfig::from_json_str(r#"{ "frequency": -3.0 }"#),
            Err(ToneError::ConfigError(_))
        ));
        assert!(matches!(
            ToneConfig::from_json_str(r#"{ "frequency": "loud" }"#),
            Err(ToneError::Json(_))
        ));
        assert!(ToneConfig::from_json_str(r#"{ "amplitude": -1 }"#).is_err());
    }

    #[test]
    fn test_short_wave_names_accepted() {
        for (name, kind) in [
            ("white", WaveKind::WhiteNoise),
            ("pink", WaveKind::PinkNoise),
            ("binaural", WaveKind::BinauralBeat),
            ("binaural_beat", WaveKind::BinauralBeat),
        ] {
            let config = ToneConfig::from_json_str(&format!(r#"{{ "wave": "{name}" }}"#)).unwrap();
            assert_eq!(config.wave, kind);
        }
    }

    #[test]
    fn test_huge_tick_interval_is_config_error() {
        let result =
            ToneConfig::from_json_str(r#"{"stream":{"tick_interval_ms":18446744073709551615}}"#);
        assert!(matches!(result, Err(ToneError::ConfigError(_))));
    }

    #[test]
    fn test_presets_parse() {
        assert_eq!("440".parse::<FrequencyPreset>().unwrap(), FrequencyPreset::A440);
        assert_eq!(
            "5000 Hz".parse::<FrequencyPreset>().unwrap(),
            FrequencyPreset::Hz5000
        );
        assert_eq!(
            "10000hz".parse::<FrequencyPreset>().unwrap(),
            FrequencyPreset::Hz10000
        );
        assert!("441".parse::<FrequencyPreset>().is_err());
        assert_eq!(FrequencyPreset::Hz1000.to_string(), "1000 Hz");
    }
}
