use thiserror::Error;

use crate::types::ParseCategoryError;

/// Message shown to end users for failures they cannot act on.
pub const GENERIC_USER_MESSAGE: &str = "Something went wrong, please try again later.";

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("News provider error: {0}")]
    Provider(String),

    #[error("Extraction error: {0}")]
    Extraction(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Completion error: {0}")]
    Completion(String),

    #[error("Retrieval error: {0}")]
    Retrieval(String),

    #[error("Storage error: {0}")]
    Store(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("External error: {0}")]
    External(#[from] anyhow::Error),
}

impl From<ParseCategoryError> for Error {
    fn from(e: ParseCategoryError) -> Self {
        Error::Parse(e.to_string())
    }
}

impl Error {
    /// Text safe to render in a chat window.
    ///
    /// Argument errors keep their message so the user can fix the
    /// conflicting parameters; everything else collapses to a generic text.
    pub fn user_message(&self) -> String {
        match self {
            Error::InvalidArgument(msg) => msg.clone(),
            Error::Cancelled => "The request was cancelled.".to_string(),
            _ => GENERIC_USER_MESSAGE.to_string(),
        }
    }

    /// Rewraps a store failure raised while serving a query.
    pub fn into_retrieval(self) -> Self {
        match self {
            Error::Retrieval(_) | Error::Cancelled => self,
            other => Error::Retrieval(other.to_string()),
        }
    }

    /// Rewraps any failure raised by a completion backend.
    pub fn into_completion(self) -> Self {
        match self {
            Error::Completion(_) | Error::Cancelled => self,
            other => Error::Completion(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
