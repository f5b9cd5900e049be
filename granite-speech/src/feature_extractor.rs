//! Log-mel feature extraction for Granite Speech.
//!
//! Converts a padded waveform batch into normalized, frame-stacked log-mel
//! features, and predicts how many audio tokens each clip occupies after the
//! projector without running the transform.

use crate::error::{AudioError, ConfigError, Result};
use crate::mel::{MelParams, MelSpectrogram, num_frames};
use crate::types::Device;
use ndarray::{Array2, Array3, ArrayView2, Axis, s};
use ndarray_stats::QuantileExt;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::OnceLock;

/// File name of the serialized feature extractor config.
pub const CONFIG_FILE: &str = "preprocessor_config.json";

/// Floor applied before the log10 compression.
const MIN_LOG_INPUT: f32 = 1e-10;

/// Dynamic range (in log10 units) kept below each sample's maximum.
const DYNAMIC_RANGE: f32 = 8.0;

/// Feature extractor configuration.
///
/// Deserializes from flat keys or from the nested `melspec_kwargs` object;
/// nested values take precedence.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawFeatureExtractorConfig")]
pub struct FeatureExtractorConfig {
    pub feature_extractor_type: String,
    pub feature_size: usize,
    pub sampling_rate: usize,
    pub padding_value: f32,
    pub n_fft: usize,
    pub win_length: usize,
    pub hop_length: usize,
    pub n_mels: usize,
    pub projector_window_size: usize,
    pub projector_downsample_rate: usize,
}

impl Default for FeatureExtractorConfig {
    fn default() -> Self {
        let mel = MelParams::default();
        Self {
            feature_extractor_type: "GraniteSpeechFeatureExtractor".to_string(),
            feature_size: 0,
            sampling_rate: mel.sample_rate,
            padding_value: 0.0,
            n_fft: mel.n_fft,
            win_length: mel.win_length,
            hop_length: mel.hop_length,
            n_mels: mel.n_mels,
            projector_window_size: 15,
            projector_downsample_rate: 5,
        }
    }
}

#[derive(Default, Deserialize)]
#[serde(default)]
struct RawFeatureExtractorConfig {
    #[serde(flatten)]
    config: FlatConfig,
    melspec_kwargs: Option<MelParams>,
}

// Mirror of the public config without `try_from`, so it can be flattened.
#[derive(Deserialize)]
#[serde(default)]
struct FlatConfig {
    feature_extractor_type: String,
    feature_size: usize,
    sampling_rate: usize,
    padding_value: f32,
    n_fft: usize,
    win_length: usize,
    hop_length: usize,
    n_mels: usize,
    projector_window_size: usize,
    projector_downsample_rate: usize,
}

impl Default for FlatConfig {
    fn default() -> Self {
        let d = FeatureExtractorConfig::default();
        Self {
            feature_extractor_type: d.feature_extractor_type,
            feature_size: d.feature_size,
            sampling_rate: d.sampling_rate,
            padding_value: d.padding_value,
            n_fft: d.n_fft,
            win_length: d.win_length,
            hop_length: d.hop_length,
            n_mels: d.n_mels,
            projector_window_size: d.projector_window_size,
            projector_downsample_rate: d.projector_downsample_rate,
        }
    }
}

impl TryFrom<RawFeatureExtractorConfig> for FeatureExtractorConfig {
    type Error = ConfigError;

    fn try_from(raw: RawFeatureExtractorConfig) -> std::result::Result<Self, ConfigError> {
        let flat = raw.config;
        let mut config = Self {
            feature_extractor_type: flat.feature_extractor_type,
            feature_size: flat.feature_size,
            sampling_rate: flat.sampling_rate,
            padding_value: flat.padding_value,
            n_fft: flat.n_fft,
            win_length: flat.win_length,
            hop_length: flat.hop_length,
            n_mels: flat.n_mels,
            projector_window_size: flat.projector_window_size,
            projector_downsample_rate: flat.projector_downsample_rate,
        };

        if let Some(kwargs) = raw.melspec_kwargs {
            config.sampling_rate = kwargs.sample_rate;
            config.n_fft = kwargs.n_fft;
            config.win_length = kwargs.win_length;
            config.hop_length = kwargs.hop_length;
            config.n_mels = kwargs.n_mels;
        }

        config.validate()?;
        Ok(config)
    }
}

impl FeatureExtractorConfig {
    /// Parameters for the mel-spectrogram transform.
    pub fn mel_params(&self) -> MelParams {
        MelParams {
            sample_rate: self.sampling_rate,
            n_fft: self.n_fft,
            win_length: self.win_length,
            hop_length: self.hop_length,
            n_mels: self.n_mels,
        }
    }

    /// Check that every parameter used as a divisor or size is usable.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        let positive = [
            ("sampling_rate", self.sampling_rate),
            ("n_fft", self.n_fft),
            ("win_length", self.win_length),
            ("hop_length", self.hop_length),
            ("n_mels", self.n_mels),
            ("projector_window_size", self.projector_window_size),
            ("projector_downsample_rate", self.projector_downsample_rate),
        ];

        if let Some(&(name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::ZeroParameter { name });
        }

        if self.win_length > self.n_fft {
            return Err(ConfigError::WindowExceedsFft {
                win_length: self.win_length,
                n_fft: self.n_fft,
            });
        }

        if self.projector_window_size % self.projector_downsample_rate != 0 {
            tracing::warn!(
                window = self.projector_window_size,
                downsample = self.projector_downsample_rate,
                "projector window is not a multiple of the downsample rate"
            );
        }

        Ok(())
    }

    /// Load a config from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        Ok(serde_json::from_str(&json)?)
    }
}

/// Granite Speech feature extractor.
///
/// The mel transform is not part of the serialized config; it is built on
/// first use and shared by every later call.
#[derive(Clone, Debug, Default)]
pub struct FeatureExtractor {
    config: FeatureExtractorConfig,
    mel: OnceLock<MelSpectrogram>,
}

impl FeatureExtractor {
    /// Create a feature extractor from a validated config.
    pub fn new(config: FeatureExtractorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            mel: OnceLock::new(),
        })
    }

    /// Load a feature extractor from a `preprocessor_config.json` file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::new(FeatureExtractorConfig::from_file(path)?)
    }

    /// Get the feature extractor configuration.
    pub fn config(&self) -> &FeatureExtractorConfig {
        &self.config
    }

    /// Write the config as pretty JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.config)?;
        std::fs::write(path, json).map_err(ConfigError::Io)?;
        Ok(())
    }

    fn mel(&self) -> &MelSpectrogram {
        self.mel
            .get_or_init(|| MelSpectrogram::new(&self.config.mel_params()))
    }

    /// Extract normalized, frame-stacked log-mel features.
    ///
    /// # Arguments
    ///
    /// * `audio` - Padded waveform batch (batch, samples)
    /// * `device` - Requested compute device; output always lives on the host
    ///
    /// # Returns
    ///
    /// 3D array of features (batch, time_steps / 2, 2 * n_mels)
    pub fn extract(&self, audio: ArrayView2<f32>, device: &Device) -> Result<Array3<f32>> {
        if audio.nrows() == 0 {
            return Err(AudioError::EmptyBatch.into());
        }

        if !device.is_host() {
            tracing::debug!(%device, "accelerator requested, computing features on host");
        }

        let mel = self.mel();

        let stacked = audio
            .outer_iter()
            .map(|row| normalize_and_stack(mel.apply(&row.to_vec())?))
            .collect::<Result<Vec<_>>>()?;

        let views: Vec<_> = stacked.iter().map(Array2::view).collect();
        let features = ndarray::stack(Axis(0), &views)?;

        tracing::debug!(shape = ?features.dim(), "extracted log-mel features");

        Ok(features)
    }

    /// Stacked time steps produced for a clip of `raw_len` samples.
    pub fn encoder_length(&self, raw_len: usize) -> usize {
        num_frames(raw_len, &self.config.mel_params()) / 2
    }

    /// Number of audio tokens each clip occupies after the projector.
    ///
    /// Depends only on the raw (unpadded) clip lengths.
    pub fn num_audio_features(&self, lengths: &[usize]) -> Vec<usize> {
        let window = self.config.projector_window_size;
        let downsample = self.config.projector_downsample_rate;

        lengths
            .iter()
            .map(|&len| {
                let nblocks = self.encoder_length(len).div_ceil(window);
                nblocks * window / downsample
            })
            .collect()
    }
}

/// Log-compress, range-normalize and stack adjacent frames of one sample.
///
/// (time_steps, n_mels) -> (time_steps / 2, 2 * n_mels)
fn normalize_and_stack(mel: Array2<f32>) -> Result<Array2<f32>> {
    let logmel = mel.mapv_into(|x| x.max(MIN_LOG_INPUT).log10());

    let floor = *logmel.max()? - DYNAMIC_RANGE;
    let logmel = logmel.mapv_into(|x| x.max(floor) / 4.0 + 1.0);

    // drop the last frame if odd
    let (steps, n_mels) = logmel.dim();
    let even = steps - steps % 2;

    let stacked = logmel
        .slice(s![..even, ..])
        .to_shape((even / 2, 2 * n_mels))?
        .into_owned();

    Ok(stacked)
}
