//! Config subcommand - validate a hybrid model config.

use eyre::{Context, Result};
use granite_speech::config::{HybridConfig, LayerType};
use std::path::PathBuf;

/// CLI arguments for config inspection.
#[derive(clap::Args, Debug)]
pub struct Args {
    /// Path to config.json
    pub path: PathBuf,
}

#[derive(Debug)]
pub struct Config {
    pub path: PathBuf,
}

impl From<Args> for Config {
    fn from(args: Args) -> Self {
        Self { path: args.path }
    }
}

pub fn execute(config: Config) -> Result<()> {
    let model = HybridConfig::from_file(&config.path)
        .wrap_err_with(|| format!("invalid model config: {:?}", config.path.display()))?;

    println!("model_type: {}", model.model_type);
    println!(
        "mamba: heads={} d_head={} intermediate={}",
        model.mamba_n_heads,
        model.mamba_d_head,
        model.mamba_intermediate_size()
    );
    println!("layers: {}", layer_layout(&model.layers_block_type()));

    Ok(())
}

/// Compact layout string, one letter per layer (`M` mamba, `A` attention).
pub fn layer_layout(layers: &[LayerType]) -> String {
    layers
        .iter()
        .map(|layer| match layer {
            LayerType::Mamba => 'M',
            LayerType::Attention => 'A',
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_layer_layout() {
        let layers = [LayerType::Mamba, LayerType::Attention, LayerType::Mamba];
        assert_eq!(layer_layout(&layers), "MAM");
    }
}
