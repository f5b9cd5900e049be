//! granite-speech: audio feature extraction and prompt alignment for Granite
//! Speech models.
//!
//! The crate turns raw 16 kHz waveforms into normalized, frame-stacked log-mel
//! features and expands the audio placeholders in text prompts so each clip
//! occupies exactly as many token positions as the projector emits for it.
//!
//! # Quick Start
//!
//! ```ignore
//! use granite_speech::audio::read_audio_mono;
//! use granite_speech::processor::{Processor, ProcessorRequest};
//! use granite_speech::types::ModelRepo;
//!
//! let processor = Processor::from_repo(&ModelRepo::Path("model_dir".into()))?;
//! let clip = ndarray::Array1::from(read_audio_mono("audio.wav")?);
//!
//! let request = ProcessorRequest::new("<|audio|> can you transcribe the speech?")
//!     .with_audio(vec![clip]);
//! let output = processor.process(request)?;
//!
//! println!("{:?}", output.input_features.map(|f| f.dim()));
//! ```

pub mod audio;
pub mod config;
pub mod error;
pub mod feature_extractor;
pub mod mel;
pub mod processor;
pub mod types;
