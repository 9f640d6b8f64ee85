use thiserror::Error;

use crate::bill::BillKey;

/// Rejected bill identity.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("congress number must be positive")]
    Congress,

    #[error("bill number must be positive")]
    Number,

    #[error("bill type is missing")]
    MissingType,

    #[error("bill number is not numeric: {0:?}")]
    BadNumber(String),
}

/// Upstream failures. "Not found" is not an error and never appears here.
#[derive(Error, Debug)]
pub enum FetchError {
    /// Network error, timeout, 429 or 5xx after all retries were spent.
    #[error("transient upstream error ({context}): {message}")]
    Transient { context: String, message: String },

    /// Response arrived but could not be understood.
    #[error("malformed upstream record ({context}): {message}")]
    Malformed { context: String, message: String },

    /// The whole source is down; the cycle should end early.
    #[error("upstream unreachable: {0}")]
    Unreachable(String),
}

impl FetchError {
    pub fn transient(context: impl Into<String>, message: impl ToString) -> Self {
        Self::Transient {
            context: context.into(),
            message: message.to_string(),
        }
    }

    pub fn malformed(context: impl Into<String>, message: impl ToString) -> Self {
        Self::Malformed {
            context: context.into(),
            message: message.to_string(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// Duplicate-guard storage failure. Callers must never read this as "already seen".
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt row for {key}: {message}")]
    Corrupt { key: String, message: String },
}

/// Why a discovery cycle stopped before handling every candidate.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("storage failure while handling {bill}: {source}")]
    Store {
        bill: String,
        #[source]
        source: StoreError,
    },

    #[error(transparent)]
    Unreachable(FetchError),
}

impl ScanError {
    pub fn store(key: &BillKey, source: StoreError) -> Self {
        Self::Store {
            bill: key.to_string(),
            source,
        }
    }
}

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("publisher http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("publisher rejected post (status {status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("media upload failed for {path}: {message}")]
    Media { path: String, message: String },
}
