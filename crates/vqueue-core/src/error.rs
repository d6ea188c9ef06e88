use thiserror::Error;

/// Rejections raised while lowering a command line to a molecule.
///
/// None of these mutate the queue; the offending command is simply
/// refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("invalid priority `{0}`")]
    InvalidPriority(String),
    #[error("missing mode keyword")]
    MissingMode,
    #[error("conflicting interrupt modes")]
    ConflictingModes,
    #[error("unknown token `{0}`")]
    UnknownToken(String),
    #[error("molecule has no atoms")]
    EmptyMolecule,
    #[error("`{keyword}` needs a value")]
    MissingArgument { keyword: String },
    #[error("cannot open audio file `{0}`")]
    BadFile(String),
    #[error("invalid DTMF digits `{0}`")]
    InvalidDigits(String),
}

/// Failures surfaced by the host audio layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AudioError {
    #[error("cannot open `{path}`: {reason}")]
    Open { path: String, reason: String },
    #[error("cannot start audio operation: {0}")]
    Start(String),
}

/// Failures of the engine handle itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("engine control thread exited")]
    Closed,
    #[error("engine command timed out")]
    Timeout,
}
