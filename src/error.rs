use thiserror::Error;

/// Faults that are worth another attempt at the same page.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransientFault {
    #[error("navigation timed out: {0}")]
    Timeout(String),

    #[error("page unreachable: {0}")]
    Unreachable(String),

    #[error("bot challenge suspected at {0}")]
    ChallengeSuspected(String),

    #[error("page content not ready")]
    DomNotReady,

    #[error("first results page has no listings")]
    EmptyResults,
}

#[derive(Error, Debug)]
pub enum ScrapeError {
    #[error("transient fault: {0}")]
    Transient(#[from] TransientFault),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("unsupported browser operation: {0}")]
    Unsupported(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, ScrapeError>;
