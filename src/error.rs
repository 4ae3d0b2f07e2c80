use crate::matcher::MatchId;
use std::path::PathBuf;
use thiserror::Error;

/// Static configuration problems; fatal at load.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse {path}: {detail}")]
    Parse { path: PathBuf, detail: String },
    #[error("duplicate command id: {0}")]
    DuplicateCommand(String),
    #[error("command {0} has no patterns")]
    EmptyPatterns(String),
    #[error("command {command}: malformed pattern \"{pattern}\": {detail}")]
    MalformedPattern {
        command: String,
        pattern: String,
        detail: String,
    },
    #[error("command {command} references unknown handler {handler}")]
    UnknownHandler { command: String, handler: String },
    #[error("command {command} references unknown vocabulary {vocabulary}")]
    UnknownVocabulary { command: String, vocabulary: String },
    #[error("invalid setting: {0}")]
    InvalidSetting(String),
}

/// Domain failure raised by an action handler, e.g. a missing program.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(detail: impl Into<String>) -> Self {
        Self(detail.into())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// Registry and handler table disagree; a misconfiguration, never retried.
    #[error("no handler registered as {0}")]
    UnknownHandler(String),
    #[error("handler failed: {0}")]
    Handler(#[from] HandlerError),
    /// Redelivery of a match whose recorded outcome has been forgotten
    #[error("match {0} was already dispatched")]
    AlreadyDispatched(MatchId),
}

#[derive(Debug, Error)]
pub enum SpeechError {
    #[error("audio device: {0}")]
    Device(String),
    #[error("recognition: {0}")]
    Recognition(String),
    #[error("speech source closed")]
    Closed,
}
