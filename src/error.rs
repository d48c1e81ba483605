use thiserror::Error;

/// Result alias for fallible library operations.
pub type Result<T> = std::result::Result<T, ReciteError>;

/// Umbrella error for the crate.
#[derive(Debug, Error)]
pub enum ReciteError {
    #[error("speech engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("progress store error: {0}")]
    Store(#[from] StoreError),

    #[error("passage source error: {0}")]
    Source(#[from] SourceError),

    #[error("settings error: {0}")]
    Settings(#[from] SettingsError),

    #[error("session error: {0}")]
    Session(#[from] SessionError),
}

/// A command issued to the external recognition engine failed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("engine is not available")]
    Unavailable,
    #[error("engine rejected '{command}': {message}")]
    Rejected {
        command: &'static str,
        message: String,
    },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error while {context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("JSON error while {context}: {source}")]
    Json {
        context: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("store lock poisoned")]
    Poisoned,
}

impl StoreError {
    pub(crate) fn io(context: &'static str, source: std::io::Error) -> Self {
        Self::Io { context, source }
    }

    pub(crate) fn json(context: &'static str, source: serde_json::Error) -> Self {
        Self::Json { context, source }
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("I/O error while reading passages: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid passage JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("'{0}' is not a numeric chapter or verse label")]
    BadLabel(String),
    #[error("unknown book '{0}'")]
    UnknownBook(String),
    #[error("malformed passage data: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("I/O error while {context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("could not encode settings: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Commands that are not valid for the controller's current state.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("the selected range contains no passages")]
    EmptyRange,
    #[error("'{command}' is not allowed while {state}")]
    InvalidState {
        command: &'static str,
        state: &'static str,
    },
}
