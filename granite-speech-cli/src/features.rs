//! Features subcommand - extract log-mel features from WAV files.

use eyre::{Context, Result};
use granite_speech::audio::{AudioInput, read_audio_mono};
use granite_speech::feature_extractor::FeatureExtractor;
use granite_speech::types::Device;
use std::path::PathBuf;
use std::time::Instant;

/// CLI arguments for feature extraction.
#[derive(clap::Args, Debug)]
pub struct Args {
    /// Paths to 16 kHz WAV files
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Feature extractor config (preprocessor_config.json)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Requested compute device (cpu, cuda, cuda:N)
    #[arg(long, default_value = "cpu")]
    pub device: Device,
}

/// Resolved configuration for feature extraction.
#[derive(Debug)]
pub struct Config {
    pub paths: Vec<PathBuf>,
    pub extractor: FeatureExtractor,
    pub device: Device,
}

impl TryFrom<Args> for Config {
    type Error = eyre::Error;

    fn try_from(args: Args) -> Result<Self> {
        let extractor = match &args.config {
            Some(path) => FeatureExtractor::from_file(path)
                .wrap_err_with(|| format!("failed to load config: {:?}", path.display()))?,
            None => FeatureExtractor::default(),
        };

        Ok(Self {
            paths: args.paths,
            extractor,
            device: args.device,
        })
    }
}

/// Per-clip summary printed by the subcommand.
#[derive(Debug, PartialEq, Eq)]
pub struct ClipSummary {
    pub path: PathBuf,
    pub samples: usize,
    pub encoder_length: usize,
    pub audio_tokens: usize,
}

pub fn execute(config: Config) -> Result<()> {
    let (clips, shape) = extract(&config)?;

    for clip in &clips {
        println!(
            "{}: samples={} encoder_length={} audio_tokens={}",
            clip.path.display(),
            clip.samples,
            clip.encoder_length,
            clip.audio_tokens
        );
    }

    let (batch, steps, dim) = shape;
    println!("features: ({batch}, {steps}, {dim})");

    Ok(())
}

/// Load every clip, extract the padded batch and summarize it.
pub fn extract(config: &Config) -> Result<(Vec<ClipSummary>, (usize, usize, usize))> {
    let audio = config
        .paths
        .iter()
        .map(|path| {
            read_audio_mono(path)
                .wrap_err_with(|| format!("failed to read audio: {:?}", path.display()))
        })
        .collect::<Result<Vec<_>>>()?;

    let padding_value = config.extractor.config().padding_value;
    let batch = AudioInput::from(audio).into_batch(padding_value)?;

    let s = Instant::now();
    let features = config
        .extractor
        .extract(batch.samples.view(), &config.device)?;

    tracing::info!(
        clips = batch.lengths.len(),
        elapsed = ?s.elapsed(),
        "features extracted"
    );

    let tokens = config.extractor.num_audio_features(&batch.lengths);

    let clips = config
        .paths
        .iter()
        .zip(batch.lengths.iter().zip(tokens))
        .map(|(path, (&samples, audio_tokens))| ClipSummary {
            path: path.clone(),
            samples,
            encoder_length: config.extractor.encoder_length(samples),
            audio_tokens,
        })
        .collect();

    Ok((clips, features.dim()))
}
