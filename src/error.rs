use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("corrupt archive {path} at offset {offset}: {reason}")]
    Corrupt {
        path: PathBuf,
        offset: u64,
        reason: String,
    },

    #[error("archive {path} contains duplicate urls: {}", format_duplicates(.duplicates))]
    DuplicateUrls {
        path: PathBuf,
        duplicates: Vec<(String, usize)>,
    },

    #[error("archive {0} contains no response records")]
    Empty(PathBuf),

    #[error("archive {0} does not start with a warcinfo record")]
    MissingInfoRecord(PathBuf),

    #[error("payload digest mismatch for {url}: stored {stored}, computed {computed}")]
    DigestMismatch {
        url: String,
        stored: String,
        computed: String,
    },
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("too many download errors ({count} > {limit}), aborting the crawl")]
    ErrorBudgetExceeded { count: usize, limit: usize },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid portal config: {0}")]
    Invalid(String),

    #[error("unknown portal extractor: {0}")]
    UnknownExtractor(String),

    #[error("filtering articles by date requires a date-based archive")]
    DateFilterWithoutDates,
}

fn format_duplicates(duplicates: &[(String, usize)]) -> String {
    duplicates
        .iter()
        .map(|(url, count)| format!("{url} ({count} times)"))
        .collect::<Vec<_>>()
        .join(", ")
}
