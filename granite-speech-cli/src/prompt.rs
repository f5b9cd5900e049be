//! Prompt subcommand - expand audio placeholders and tokenize a prompt.

use crate::cli::ModelArgs;
use crate::config::ModelConfig;
use eyre::{Context, Result};
use granite_speech::audio::read_audio_mono;
use granite_speech::processor::{BatchFeature, Processor, ProcessorRequest};
use granite_speech::types::{Device, ModelRepo};
use std::path::PathBuf;

/// CLI arguments for prompt processing.
#[derive(clap::Args, Debug)]
pub struct Args {
    #[command(flatten)]
    pub model: ModelArgs,

    /// Prompt text containing audio placeholders
    #[arg(short, long)]
    pub text: String,

    /// WAV files, one per audio placeholder
    pub paths: Vec<PathBuf>,

    /// Fail when placeholders and clips do not line up
    #[arg(long)]
    pub strict: bool,

    /// Requested compute device (cpu, cuda, cuda:N)
    #[arg(long, default_value = "cpu")]
    pub device: Device,

    /// Tokenize without the tokenizer's special tokens
    #[arg(long)]
    pub no_special_tokens: bool,
}

/// Resolved configuration for prompt processing.
#[derive(Debug)]
pub struct Config {
    pub repo: ModelRepo,
    pub text: String,
    pub paths: Vec<PathBuf>,
    pub strict: bool,
    pub device: Device,
    pub add_special_tokens: bool,
}

impl TryFrom<Args> for Config {
    type Error = eyre::Error;

    fn try_from(args: Args) -> Result<Self> {
        let ModelConfig { repo } = ModelConfig::try_from(args.model)?;

        Ok(Self {
            repo,
            text: args.text,
            paths: args.paths,
            strict: args.strict,
            device: args.device,
            add_special_tokens: !args.no_special_tokens,
        })
    }
}

pub fn execute(config: Config) -> Result<()> {
    let (processor, output) = process(config)?;

    let audio_tokens = processor
        .audio_token_id()
        .map(|id| output.count_token(id))
        .unwrap_or_default();

    for (ids, mask) in output.input_ids.iter().zip(&output.attention_mask) {
        let attended = mask.iter().filter(|&&m| m == 1).count();
        println!("tokens: {} (attended {attended})", ids.len());
    }

    println!("audio tokens: {audio_tokens}");

    if let Some(features) = &output.input_features {
        println!("features: {:?} on {}", features.dim(), output.device());
    }

    Ok(())
}

/// Load the processor and run it on the configured prompt and clips.
pub fn process(config: Config) -> Result<(Processor, BatchFeature)> {
    let mut processor = Processor::from_repo(&config.repo)?;
    if config.strict {
        processor = processor.with_strict_alignment(true);
    }

    let mut request = ProcessorRequest::new(config.text)
        .with_device(config.device)
        .with_add_special_tokens(config.add_special_tokens);

    if !config.paths.is_empty() {
        let audio = config
            .paths
            .iter()
            .map(|path| {
                read_audio_mono(path)
                    .wrap_err_with(|| format!("failed to read audio: {:?}", path.display()))
            })
            .collect::<Result<Vec<_>>>()?;

        request = request.with_audio(audio);
    }

    let output = processor.process(request)?;

    tracing::info!(sequences = output.input_ids.len(), "prompt processed");

    Ok((processor, output))
}
