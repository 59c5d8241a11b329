use thiserror::Error;

#[derive(Error, Debug)]
pub enum TriageError {
    #[error("Invalid report URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Fetching {url} failed: {source}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Fetching {url} failed with HTTP status {status}")]
    FetchStatus { url: String, status: u16 },

    #[error("Fetched content is not a recognizable bug report")]
    NotAReport,

    #[error("Report does not contain a crash table")]
    NoCrashTable,

    #[error("Crash table contains no usable crashes")]
    NoValidCrashes,

    #[error("Building reproducer failed: {0}")]
    Build(String),

    #[error("Remote session failed: {0}")]
    Session(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TriageError>;
