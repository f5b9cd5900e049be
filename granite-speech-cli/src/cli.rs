//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use eyre::Result;

#[derive(Debug, Parser)]
#[command(name = "granite")]
#[command(about = "Granite Speech feature extraction and prompt tools")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Extract log-mel features from WAV files and report their shapes
    Features(crate::features::Args),

    /// Expand audio placeholders in a prompt and tokenize it
    Prompt(crate::prompt::Args),

    /// Validate a hybrid model config and print its layer layout
    Config(crate::inspect::Args),
}

/// Where to look up a model repository.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum ModelSource {
    /// Local directory if it exists, otherwise the HuggingFace API
    #[default]
    Auto,
    /// Local directory
    Path,
    /// HuggingFace cache only
    Cache,
    /// HuggingFace API (downloads missing files)
    Api,
}

/// Model repository arguments shared by subcommands.
#[derive(clap::Args, Debug)]
pub struct ModelArgs {
    /// Model directory or HuggingFace model id
    pub model_id: String,

    /// Model repository source
    #[arg(long = "source", value_enum, default_value_t = ModelSource::Auto)]
    pub model_source: ModelSource,
}

/// Execute CLI command - separated for testing.
pub fn run_cli(cli: Cli) -> Result<()> {
    tracing::debug!(?cli, "parsed arguments");

    match cli.command {
        Commands::Features(args) => crate::features::execute(args.try_into()?),
        Commands::Prompt(args) => crate::prompt::execute(args.try_into()?),
        Commands::Config(args) => crate::inspect::execute(args.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use granite_speech::types::Device;

    #[test]
    fn parses_features_command() {
        let cli = Cli::parse_from(["granite", "features", "a.wav", "b.wav"]);

        match &cli.command {
            Commands::Features(crate::features::Args {
                paths,
                config: None,
                device: Device::Cpu,
            }) => {
                assert_eq!(paths.len(), 2);
                assert_eq!(paths[1].to_str(), Some("b.wav"));
            }
            _ => panic!("unexpected command: {:?}", cli.command),
        }
    }

    #[test]
    fn parses_features_with_config_and_device() {
        let cli = Cli::parse_from([
            "granite",
            "features",
            "a.wav",
            "--config",
            "preprocessor_config.json",
            "--device",
            "cuda:1",
        ]);

        match &cli.command {
            Commands::Features(crate::features::Args {
                config: Some(config),
                device: Device::Cuda(1),
                ..
            }) if config.to_str() == Some("preprocessor_config.json") => {}
            _ => panic!("unexpected command: {:?}", cli.command),
        }
    }

    #[test]
    fn features_requires_a_path() {
        assert!(Cli::try_parse_from(["granite", "features"]).is_err());
    }

    #[test]
    fn rejects_unknown_device() {
        assert!(Cli::try_parse_from(["granite", "features", "a.wav", "--device", "tpu"]).is_err());
    }

    #[test]
    fn parses_prompt_command() {
        let cli = Cli::parse_from([
            "granite",
            "prompt",
            "ibm-granite/granite-speech-3.3-2b",
            "--text",
            "<|audio|> transcribe",
            "clip.wav",
        ]);

        match &cli.command {
            Commands::Prompt(crate::prompt::Args {
                model:
                    ModelArgs {
                        model_id,
                        model_source: ModelSource::Auto,
                    },
                text,
                paths,
                strict: false,
                ..
            }) if model_id == "ibm-granite/granite-speech-3.3-2b" => {
                assert_eq!(text, "<|audio|> transcribe");
                assert_eq!(paths.len(), 1);
            }
            _ => panic!("unexpected command: {:?}", cli.command),
        }
    }

    #[test]
    fn parses_prompt_with_source_and_strict() {
        let cli = Cli::parse_from([
            "granite",
            "prompt",
            "./model",
            "--text",
            "hi",
            "--source",
            "path",
            "--strict",
            "--no-special-tokens",
        ]);

        match &cli.command {
            Commands::Prompt(crate::prompt::Args {
                model:
                    ModelArgs {
                        model_source: ModelSource::Path,
                        ..
                    },
                paths,
                strict: true,
                no_special_tokens: true,
                ..
            }) => assert!(paths.is_empty()),
            _ => panic!("unexpected command: {:?}", cli.command),
        }
    }

    #[test]
    fn prompt_requires_text() {
        assert!(Cli::try_parse_from(["granite", "prompt", "./model"]).is_err());
    }

    #[test]
    fn parses_config_command() {
        let cli = Cli::parse_from(["granite", "config", "config.json"]);

        match &cli.command {
            Commands::Config(crate::inspect::Args { path }) if path.to_str() == Some("config.json") => {}
            _ => panic!("unexpected command: {:?}", cli.command),
        }
    }
}
