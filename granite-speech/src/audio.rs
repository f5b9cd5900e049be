//! Audio loading and batching utilities.

use crate::error::{AudioError, ProcessorError, Result};
use hound::{SampleFormat, WavReader, WavSpec};
use ndarray::{Array1, Array2, s};
use serde_json::Value;
use std::path::Path;

/// Expected sample rate for Granite Speech models (16kHz)
pub const SAMPLE_RATE: u32 = 16000;

/// Raw audio as supplied by the caller.
#[derive(Clone, Debug)]
pub enum AudioInput {
    /// Padded batch `(batch, samples)`; every row spans the full width.
    Batch(Array2<f32>),
    /// Variable-length clips, padded on the right when batched.
    Clips(Vec<Array1<f32>>),
}

/// Padded audio batch with the true length of each clip.
#[derive(Clone, Debug)]
pub struct AudioBatch {
    /// Samples `(batch, max_len)`
    pub samples: Array2<f32>,
    /// Unpadded length of each row
    pub lengths: Vec<usize>,
}

impl AudioInput {
    /// Number of clips in the input.
    pub fn len(&self) -> usize {
        match self {
            AudioInput::Batch(batch) => batch.nrows(),
            AudioInput::Clips(clips) => clips.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Normalize into a padded batch, tracking true clip lengths.
    ///
    /// Clips are right-padded with `padding_value` up to the longest clip.
    ///
    /// # Errors
    ///
    /// Returns [`AudioError::EmptyBatch`] if there are no clips.
    pub fn into_batch(self, padding_value: f32) -> Result<AudioBatch> {
        if self.is_empty() {
            return Err(AudioError::EmptyBatch.into());
        }

        match self {
            AudioInput::Batch(samples) => {
                let lengths = vec![samples.ncols(); samples.nrows()];
                Ok(AudioBatch { samples, lengths })
            }
            AudioInput::Clips(clips) => {
                let lengths: Vec<usize> = clips.iter().map(Array1::len).collect();
                let max_len = lengths.iter().copied().max().unwrap_or(0);

                let mut samples = Array2::from_elem((clips.len(), max_len), padding_value);
                for (mut row, clip) in samples.outer_iter_mut().zip(&clips) {
                    row.slice_mut(s![..clip.len()]).assign(clip);
                }

                tracing::debug!(?lengths, max_len, "collated audio clips");

                Ok(AudioBatch { samples, lengths })
            }
        }
    }
}

impl From<Array2<f32>> for AudioInput {
    fn from(batch: Array2<f32>) -> Self {
        AudioInput::Batch(batch)
    }
}

impl From<Vec<Array1<f32>>> for AudioInput {
    fn from(clips: Vec<Array1<f32>>) -> Self {
        AudioInput::Clips(clips)
    }
}

impl From<Vec<Vec<f32>>> for AudioInput {
    fn from(clips: Vec<Vec<f32>>) -> Self {
        AudioInput::Clips(clips.into_iter().map(Array1::from).collect())
    }
}

impl TryFrom<&Value> for AudioInput {
    type Error = crate::error::Error;

    /// Accept a flat sample array (one clip) or an array of sample arrays.
    fn try_from(value: &Value) -> Result<Self> {
        let invalid = || ProcessorError::InvalidAudio(describe(value));

        let items = value.as_array().ok_or_else(invalid)?;

        if items.iter().all(Value::is_number) && !items.is_empty() {
            return Ok(AudioInput::Clips(vec![samples_from_json(items).ok_or_else(invalid)?]));
        }

        let clips = items
            .iter()
            .map(|item| item.as_array().and_then(|clip| samples_from_json(clip)))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(invalid)?;

        if clips.is_empty() {
            return Err(invalid().into());
        }

        Ok(AudioInput::Clips(clips))
    }
}

fn samples_from_json(items: &[Value]) -> Option<Array1<f32>> {
    items
        .iter()
        .map(|v| v.as_f64().map(|x| x as f32))
        .collect::<Option<Vec<_>>>()
        .map(Array1::from)
}

/// Short description of a JSON value for error messages.
pub(crate) fn describe(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(_) => "bool".to_string(),
        Value::Number(n) => format!("number {n}"),
        Value::String(s) => format!("string {s:?}"),
        Value::Array(items) => match items.first() {
            Some(first) => format!("list of {}", describe(first)),
            None => "empty list".to_string(),
        },
        Value::Object(_) => "object".to_string(),
    }
}

/// Load audio from a WAV file as f32 samples in `[-1.0, 1.0)`.
///
/// Integer samples of 8 to 32 bits are scaled by their bit depth.
///
/// # Errors
///
/// Returns error if file cannot be read or has unsupported format.
pub fn load_audio<P: AsRef<Path>>(path: P) -> Result<(Vec<f32>, WavSpec)> {
    let mut reader = WavReader::open(path)?;
    let spec = reader.spec();

    let samples: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Float, 32) => reader.samples::<f32>().collect::<hound::Result<_>>()?,
        (SampleFormat::Int, bits @ 8..=32) => {
            let full_scale = (1_u64 << (bits - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|s| s as f32 / full_scale))
                .collect::<hound::Result<_>>()?
        }
        (_, bits) => return Err(AudioError::UnsupportedBitDepth(bits).into()),
    };

    Ok((samples, spec))
}

/// Load audio from a WAV file as mono f32 samples at 16kHz.
///
/// # Errors
///
/// Returns error if:
/// - File cannot be read
/// - Sample rate is not 16kHz
/// - Channel count is invalid (0 or > 2)
pub fn read_audio_mono(path: impl AsRef<Path>) -> Result<Vec<f32>> {
    let (mut audio, spec) = load_audio(path)?;

    if spec.sample_rate != SAMPLE_RATE {
        return Err(AudioError::InvalidSampleRate {
            expected: SAMPLE_RATE,
            got: spec.sample_rate,
        }
        .into());
    }

    if spec.channels == 0 || spec.channels > 2 {
        return Err(AudioError::InvalidChannels(spec.channels).into());
    }

    if spec.channels == 2 {
        audio = audio
            .chunks(2)
            .map(|chunk| chunk.iter().sum::<f32>() / 2.0)
            .collect();
    }

    Ok(audio)
}
