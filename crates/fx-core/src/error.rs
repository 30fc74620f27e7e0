//! Error types for the effects rack
//!
//! Only control-thread operations return errors. The audio path absorbs
//! every hazard in place and never reports.

use thiserror::Error;

/// Core error type
#[derive(Error, Debug)]
pub enum FxError {
    #[error("Unsupported sample rate: {0}")]
    UnsupportedSampleRate(f64),

    #[error("Invalid block size: {0}")]
    InvalidBlockSize(usize),

    #[error("Unknown engine id: {0}")]
    UnknownEngine(u32),

    #[error("Invalid slot index: {0}")]
    InvalidSlot(usize),

    #[error("Rack is not prepared")]
    NotPrepared,

    #[error("Handoff queue full for slot {0}")]
    QueueFull(usize),

    #[error("Engine has no impulse-response input")]
    NoImpulseInput,

    #[error("Impulse response rejected: {0}")]
    ImpulseResponse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias
pub type FxResult<T> = Result<T, FxError>;
