//! Configuration types for resolved CLI arguments.
//!
//! Args structs (for CLI parsing) stay with their subcommands; this module
//! holds the shared resolved configs and their TryFrom implementations.

use crate::cli::{ModelArgs, ModelSource};
use eyre::Result;
use granite_speech::types::ModelRepo;
use hf_hub::Cache;
use hf_hub::api::sync::Api;
use std::path::PathBuf;

/// Resolved model configuration.
///
/// Converted from ModelArgs via TryFrom.
#[derive(Debug)]
pub struct ModelConfig {
    pub repo: ModelRepo,
}

impl TryFrom<ModelArgs> for ModelConfig {
    type Error = eyre::Error;

    fn try_from(args: ModelArgs) -> Result<Self> {
        let repo = match args.model_source {
            ModelSource::Auto => {
                let path = PathBuf::from(&args.model_id);
                if path.is_dir() {
                    ModelRepo::Path(path)
                } else {
                    ModelRepo::Api(Api::new()?.model(args.model_id))
                }
            }
            ModelSource::Path => ModelRepo::Path(PathBuf::from(args.model_id)),
            ModelSource::Cache => ModelRepo::Cache(Cache::from_env().model(args.model_id)),
            ModelSource::Api => ModelRepo::Api(Api::new()?.model(args.model_id)),
        };

        tracing::debug!(?repo, "resolved model repository");

        Ok(Self { repo })
    }
}
