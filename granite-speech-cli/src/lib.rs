//! granite-speech-cli: command-line front end for granite-speech.

pub mod cli;
pub mod config;
pub mod features;
pub mod inspect;
pub mod prompt;
