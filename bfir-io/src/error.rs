//! Error type shared by the collaborator modules

use bfir_engine::{CoeffError, EngineError, RunError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IoError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("No audio track found in file")]
    NoAudioTrack,
    #[error("Decode error: {0}")]
    Decode(String),
    #[error("Encode error: {0}")]
    Encode(String),
    #[error("Parse error on line {line}: {text}")]
    Parse { line: usize, text: String },
    #[error("Resample error: {0}")]
    Resample(String),
    #[error("Incompatible input: {0}")]
    Incompatible(String),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Coeff(#[from] CoeffError),
    #[error(transparent)]
    Run(#[from] RunError),
}

impl From<hound::Error> for IoError {
    fn from(e: hound::Error) -> Self {
        match e {
            hound::Error::IoError(io) => IoError::Io(io),
            other => IoError::Encode(other.to_string()),
        }
    }
}

impl From<IoError> for CoeffError {
    fn from(e: IoError) -> Self {
        match e {
            IoError::Coeff(inner) => inner,
            IoError::Incompatible(msg) => CoeffError::Incompatible(msg),
            other => CoeffError::Load(other.to_string()),
        }
    }
}
