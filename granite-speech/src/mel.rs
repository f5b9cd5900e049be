//! Mel-spectrogram transform.
//!
//! Framing and filterbank follow the torchaudio `MelSpectrogram` defaults:
//! centered frames with reflect padding, a periodic Hann window zero-padded to
//! `n_fft`, power spectrum, and an unnormalized HTK mel filterbank spanning
//! `0..sample_rate / 2`.

use crate::error::{FeatureError, Result};
use ndarray::Array2;
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;
use std::fmt;
use std::sync::Arc;

/// STFT and mel filterbank parameters.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MelParams {
    pub sample_rate: usize,
    pub n_fft: usize,
    pub win_length: usize,
    pub hop_length: usize,
    pub n_mels: usize,
}

impl Default for MelParams {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            n_fft: 512,
            win_length: 400,
            hop_length: 160,
            n_mels: 80,
        }
    }
}

/// Precomputed mel-spectrogram transform.
///
/// Holds the window, filterbank and FFT plan, so it is built once and reused.
#[derive(Clone)]
pub struct MelSpectrogram {
    params: MelParams,
    window: Vec<f32>,
    filterbank: Array2<f32>,
    fft: Arc<dyn Fft<f32>>,
}

impl fmt::Debug for MelSpectrogram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MelSpectrogram")
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl MelSpectrogram {
    pub fn new(params: &MelParams) -> Self {
        let fft = FftPlanner::<f32>::new().plan_fft_forward(params.n_fft);

        tracing::debug!(?params, "built mel-spectrogram transform");

        Self {
            params: *params,
            window: padded_hann_window(params.win_length, params.n_fft),
            filterbank: create_mel_filterbank(params.n_fft, params.n_mels, params.sample_rate),
            fft,
        }
    }

    pub fn params(&self) -> &MelParams {
        &self.params
    }

    /// Reflect padding applied on each side of the signal.
    pub fn center_pad(&self) -> usize {
        self.params.n_fft / 2
    }

    /// Number of STFT frames for a signal of `len` samples.
    pub fn num_frames(&self, len: usize) -> usize {
        num_frames(len, &self.params)
    }

    /// Compute the mel power spectrogram of `audio`.
    ///
    /// # Returns
    ///
    /// 2D array of mel band energies (time_steps, n_mels)
    ///
    /// # Errors
    ///
    /// Returns [`FeatureError::AudioTooShort`] if the signal cannot be
    /// reflect-padded by `n_fft / 2`.
    pub fn apply(&self, audio: &[f32]) -> Result<Array2<f32>> {
        let padded = reflect_pad(audio, self.center_pad())?;
        let spectrogram = self.power_spectrogram(&padded);

        // (n_mels, freq_bins) x (freq_bins, frames) -> (frames, n_mels)
        Ok(self.filterbank.dot(&spectrogram).reversed_axes())
    }

    /// Power spectrogram (freq_bins, frames) of an already padded signal.
    fn power_spectrogram(&self, audio: &[f32]) -> Array2<f32> {
        let MelParams {
            n_fft, hop_length, ..
        } = self.params;

        let num_frames = (audio.len() - n_fft) / hop_length + 1;
        let freq_bins = n_fft / 2 + 1;
        let mut spectrogram = Array2::<f32>::zeros((freq_bins, num_frames));

        let mut frame = vec![Complex::new(0.0, 0.0); n_fft];
        let mut scratch = vec![Complex::new(0.0, 0.0); self.fft.get_inplace_scratch_len()];

        for frame_idx in 0..num_frames {
            let start = frame_idx * hop_length;

            for (slot, (&x, &w)) in frame
                .iter_mut()
                .zip(audio[start..start + n_fft].iter().zip(&self.window))
            {
                *slot = Complex::new(x * w, 0.0);
            }

            self.fft.process_with_scratch(&mut frame, &mut scratch);

            for k in 0..freq_bins {
                spectrogram[[k, frame_idx]] = frame[k].norm_sqr();
            }
        }

        spectrogram
    }
}

/// Number of centered STFT frames for a signal of `len` samples.
pub fn num_frames(len: usize, params: &MelParams) -> usize {
    let pad = params.n_fft / 2;
    (len + 2 * pad).saturating_sub(params.n_fft) / params.hop_length + 1
}

/// Reflect-pad a signal on both sides, excluding the edge sample.
fn reflect_pad(audio: &[f32], pad: usize) -> Result<Vec<f32>> {
    let len = audio.len();
    if len <= pad {
        return Err(FeatureError::AudioTooShort { len, min: pad }.into());
    }

    let mut padded = Vec::with_capacity(len + 2 * pad);
    padded.extend((1..=pad).rev().map(|i| audio[i]));
    padded.extend_from_slice(audio);
    padded.extend((1..=pad).map(|i| audio[len - 1 - i]));

    Ok(padded)
}

/// Periodic Hann window of `win_length`, zero-padded and centered in `n_fft`.
fn padded_hann_window(win_length: usize, n_fft: usize) -> Vec<f32> {
    let offset = (n_fft - win_length) / 2;
    let mut window = vec![0.0; n_fft];

    for i in 0..win_length {
        window[offset + i] = 0.5 - 0.5 * ((2.0 * PI * i as f32) / win_length as f32).cos();
    }

    window
}

/// Convert frequency in Hz to mel scale (HTK).
fn hz_to_mel(freq: f32) -> f32 {
    2595.0 * (1.0 + freq / 700.0).log10()
}

/// Convert mel scale (HTK) to frequency in Hz.
fn mel_to_hz(mel: f32) -> f32 {
    700.0 * (10.0_f32.powf(mel / 2595.0) - 1.0)
}

/// Create mel filterbank (n_mels, freq_bins) with triangular filters.
fn create_mel_filterbank(n_fft: usize, n_mels: usize, sample_rate: usize) -> Array2<f32> {
    let freq_bins = n_fft / 2 + 1;
    let nyquist = sample_rate as f32 / 2.0;
    let mut filterbank = Array2::<f32>::zeros((n_mels, freq_bins));

    let min_mel = hz_to_mel(0.0);
    let max_mel = hz_to_mel(nyquist);

    let mel_points: Vec<f32> = (0..n_mels + 2)
        .map(|i| mel_to_hz(min_mel + (max_mel - min_mel) * i as f32 / (n_mels + 1) as f32))
        .collect();

    let freq_step = if freq_bins > 1 {
        nyquist / (freq_bins - 1) as f32
    } else {
        0.0
    };

    for mel_idx in 0..n_mels {
        let left = mel_points[mel_idx];
        let center = mel_points[mel_idx + 1];
        let right = mel_points[mel_idx + 2];

        for freq_idx in 0..freq_bins {
            let freq = freq_idx as f32 * freq_step;

            let down = (freq - left) / (center - left);
            let up = (right - freq) / (right - center);

            filterbank[[mel_idx, freq_idx]] = down.min(up).max(0.0);
        }
    }

    filterbank
}
