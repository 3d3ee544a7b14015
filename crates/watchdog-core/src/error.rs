/// Failure kinds surfaced by the gateway, connectors, store, and stage
/// runners. Kept as one flat enum (rather than per-crate enums) so the stage
/// runner driver can classify any failure into retryable/permanent/fatal
/// without threading crate-specific error types through the pipeline.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("url blocked: {0}")]
    BlockedUrl(String),
    #[error("dns resolution failed: {0}")]
    DnsFailure(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("upstream returned 4xx: {0}")]
    Status4xx(u16),
    #[error("upstream returned 5xx: {0}")]
    Status5xx(u16),
    #[error("request timed out")]
    Timeout,
    #[error("response exceeded size limit")]
    Oversize,
    #[error("content-type mismatch: expected {expected}, got {actual}")]
    ContentMismatch { expected: String, actual: String },
    #[error("connector discover failed: {0}")]
    Connector(String),
    #[error("parse failure: {0}")]
    ParseFailure(String),
    #[error("store error: {0}")]
    Store(String),
    #[error("llm call failed: {0}")]
    Llm(String),
    #[error("budget exhausted for this billing month")]
    BudgetExhausted,
    #[error("not configured: {0}")]
    NotConfigured(String),
    #[error("not supported: {0}")]
    NotSupported(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// How a failure should be handled by the stage runner driver.
///
/// Stages themselves never decide retry policy; they return an `Error` and
/// the driver maps it through this classification (spec §7, §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retryability {
    /// Network blip, 5xx, 429, LLM rate limit, DB busy: leave status
    /// unchanged, retry with backoff.
    Transient,
    /// Scoped to one document/file: blocked URL, content mismatch, parse
    /// failure after retries exhausted. Document moves to `error`.
    Permanent,
    /// Not scoped to a single document: DB unavailable, storage path not
    /// writable. Scheduler halts.
    Fatal,
}

impl Error {
    pub fn retryability(&self) -> Retryability {
        match self {
            Error::Transport(_) | Error::Status5xx(_) | Error::Timeout => Retryability::Transient,
            Error::Status4xx(status) if *status == 429 => Retryability::Transient,
            Error::Llm(_) => Retryability::Transient,
            Error::BlockedUrl(_)
            | Error::ContentMismatch { .. }
            | Error::ParseFailure(_)
            | Error::InvalidUrl(_)
            | Error::Status4xx(_)
            | Error::Oversize => Retryability::Permanent,
            Error::DnsFailure(_) => Retryability::Transient,
            Error::Store(_) => Retryability::Fatal,
            Error::NotConfigured(_) | Error::NotSupported(_) => Retryability::Fatal,
            Error::Connector(_) => Retryability::Transient,
            Error::BudgetExhausted => Retryability::Permanent,
        }
    }
}
