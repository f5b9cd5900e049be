//! Error types for granite-speech organized by processing stage.

use ndarray::ShapeError;
use ndarray_stats::errors::MinMaxError;
use thiserror::Error;

/// Processing error variants organized by stage.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration stage error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Audio loading and batching error
    #[error(transparent)]
    Audio(#[from] AudioError),

    /// Feature extraction error
    #[error(transparent)]
    Feature(#[from] FeatureError),

    /// Request validation and placeholder alignment error
    #[error(transparent)]
    Processor(#[from] ProcessorError),

    /// Tokenizer error
    #[error(transparent)]
    Tokenizers(tokenizers::Error),
}

/// Configuration errors (feature extractor, processor, hybrid model).
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A parameter that must be positive was zero
    #[error("invalid {name}: must be greater than zero")]
    ZeroParameter { name: &'static str },

    /// STFT window does not fit in the FFT frame
    #[error("invalid win_length: {win_length} exceeds n_fft {n_fft}")]
    WindowExceedsFft { win_length: usize, n_fft: usize },

    /// Mamba heads do not divide the intermediate size
    #[error("mamba_n_heads {n_heads} must divide mamba_expand * hidden_size ({intermediate})")]
    MambaHeads { n_heads: usize, intermediate: usize },

    /// Mamba head dimension inconsistent with intermediate size
    #[error(
        "mamba head dims do not match intermediate size: {d_head} * {n_heads} != {intermediate}"
    )]
    MambaHeadDim {
        d_head: usize,
        n_heads: usize,
        intermediate: usize,
    },

    /// Audio placeholder token is empty
    #[error("audio token must not be empty")]
    EmptyAudioToken,

    /// Head dimension given as an unrecognized string
    #[error("invalid mamba_d_head: {0:?} (expected an integer or \"auto\")")]
    InvalidHeadDim(String),

    /// Layer type list does not cover every hidden layer
    #[error("layer_types has {got} entries, expected num_hidden_layers = {expected}")]
    LayerTypesLength { expected: usize, got: usize },

    /// JSON (de)serialization error
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// IO error while reading or writing a config file
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Audio loading and batching errors.
#[derive(Debug, Error)]
pub enum AudioError {
    /// Sample rate validation failed
    #[error("invalid sample rate: expected {expected}Hz, got {got}Hz")]
    InvalidSampleRate { expected: u32, got: u32 },

    /// Channel count validation failed
    #[error("invalid channel count: expected mono or stereo, got {0} channels")]
    InvalidChannels(u16),

    /// Bit depth outside 8..=32 for integer or other than 32 for float samples
    #[error("unsupported WAV bit depth: {0} bits")]
    UnsupportedBitDepth(u16),

    /// No clips to process
    #[error("audio batch is empty")]
    EmptyBatch,

    /// IO error during audio loading
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// WAV file format error
    #[error(transparent)]
    Hound(#[from] hound::Error),
}

/// Feature extraction errors (ndarray operations).
#[derive(Debug, Error)]
pub enum FeatureError {
    /// Clip too short to be reflect-padded for centered framing
    #[error("audio too short: {len} samples (need more than {min})")]
    AudioTooShort { len: usize, min: usize },

    /// ndarray shape error
    #[error(transparent)]
    Shape(#[from] ShapeError),

    /// ndarray-stats min/max error
    #[error(transparent)]
    MinMax(#[from] MinMaxError),
}

/// Request validation and placeholder alignment errors.
#[derive(Debug, Error)]
pub enum ProcessorError {
    /// No text was provided
    #[error("text is required")]
    MissingText,

    /// Text is not a string or a non-empty list of strings
    #[error("invalid text: {0} (expected a string or a non-empty list of strings)")]
    InvalidText(String),

    /// Audio is not a batch or a list of clips
    #[error("invalid audio: {0} (expected a sample array or a list of sample arrays)")]
    InvalidAudio(String),

    /// Tokenizer option with the wrong type
    #[error("invalid tokenizer option: {0}")]
    InvalidTokenizerOption(String),

    /// Unknown compute device name
    #[error("invalid device: {0:?}")]
    InvalidDevice(String),

    /// Placeholder count does not match clip count
    #[error("text/audio mismatch: {expected} audio tokens but {got} audio clips")]
    AlignmentMismatch { expected: usize, got: usize },

    /// Placeholders present but no audio supplied
    #[error("no audio provided, but text contains {0} audio tokens")]
    UnexpectedAudioTokens(usize),
}

/// Result type alias for granite-speech operations.
pub type Result<T> = std::result::Result<T, Error>;

// Nested From implementations for automatic error conversion chains

// hound::Error → AudioError → Error
impl From<hound::Error> for Error {
    fn from(e: hound::Error) -> Self {
        Error::Audio(AudioError::Hound(e))
    }
}

// std::io::Error → AudioError → Error
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Audio(AudioError::Io(e))
    }
}

// serde_json::Error → ConfigError → Error
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Config(ConfigError::Json(e))
    }
}

// ShapeError → FeatureError → Error
impl From<ShapeError> for Error {
    fn from(e: ShapeError) -> Self {
        Error::Feature(FeatureError::Shape(e))
    }
}

// MinMaxError → FeatureError → Error
impl From<MinMaxError> for Error {
    fn from(e: MinMaxError) -> Self {
        Error::Feature(FeatureError::MinMax(e))
    }
}
