use thiserror::Error;

/// All errors produced by ecoguard-core.
#[derive(Debug, Error)]
pub enum GuardError {
    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default input device found")]
    NoDefaultInputDevice,

    #[error("bad audio block length: expected {expected} samples, got {got}")]
    BlockLength { expected: usize, got: usize },

    #[error("classifier error: {0}")]
    Classifier(String),

    #[error("classifier not loaded — call warm_up()")]
    ClassifierNotLoaded,

    #[error("ONNX session error: {0}")]
    OnnxSession(String),

    #[error("model file not found: {path}")]
    ModelNotFound { path: std::path::PathBuf },

    #[error("engine is already running")]
    AlreadyRunning,

    #[error("engine is not running")]
    NotRunning,

    #[error("wav decode error: {0}")]
    Wav(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, GuardError>;
