//! Core types for granite-speech

use crate::error::ProcessorError;
use eyre::{OptionExt, Result, WrapErr};
use hf_hub::CacheRepo;
use hf_hub::api::sync::ApiRepo;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Model repository sources.
#[derive(Debug)]
pub enum ModelRepo {
    /// Local filesystem path
    Path(PathBuf),
    /// HuggingFace cache repository
    Cache(CacheRepo),
    /// HuggingFace API repository
    Api(ApiRepo),
}

impl ModelRepo {
    /// Resolve a file name to its full path in this repository.
    pub fn resolve(&self, file_name: &str) -> Result<PathBuf> {
        match self {
            ModelRepo::Path(path) => path
                .join(file_name)
                .canonicalize()
                .wrap_err(format!("failed to resolve file: {file_name}")),
            ModelRepo::Cache(cache_repo) => cache_repo
                .get(file_name)
                .ok_or_eyre(format!("file not found in cache: {file_name}")),
            ModelRepo::Api(api_repo) => api_repo
                .get(file_name)
                .wrap_err(format!("failed to download from api: {file_name}")),
        }
    }

    /// Resolve a file that a repository may legitimately omit.
    ///
    /// Returns `Ok(None)` only when the file is absent. Read, cache and
    /// network failures are errors.
    pub fn resolve_optional(&self, file_name: &str) -> Result<Option<PathBuf>> {
        match self {
            ModelRepo::Path(path) => {
                let candidate = path.join(file_name);
                if candidate.try_exists()? {
                    self.resolve(file_name).map(Some)
                } else {
                    Ok(None)
                }
            }
            ModelRepo::Cache(cache_repo) => Ok(cache_repo.get(file_name)),
            ModelRepo::Api(api_repo) => {
                let info = api_repo
                    .info()
                    .wrap_err("failed to fetch repository info")?;

                if info.siblings.iter().any(|s| s.rfilename == file_name) {
                    self.resolve(file_name).map(Some)
                } else {
                    Ok(None)
                }
            }
        }
    }
}

/// Compute device requested for feature extraction.
///
/// Features are always computed and returned on the host; an accelerator
/// request is accepted for interface compatibility only.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Device {
    #[default]
    Cpu,
    Cuda(usize),
}

impl Device {
    pub fn is_host(&self) -> bool {
        matches!(self, Device::Cpu)
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda(ordinal) => write!(f, "cuda:{ordinal}"),
        }
    }
}

impl FromStr for Device {
    type Err = ProcessorError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let invalid = || ProcessorError::InvalidDevice(s.to_string());

        match s.split_once(':') {
            None if s == "cpu" => Ok(Device::Cpu),
            None if s == "cuda" => Ok(Device::Cuda(0)),
            Some(("cuda", ordinal)) => ordinal.parse().map(Device::Cuda).map_err(|_| invalid()),
            _ => Err(invalid()),
        }
    }
}
