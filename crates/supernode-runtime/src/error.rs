//! Internal plumbing error type. Never surfaced to a client directly — the
//! phase boundary converts any `CoreError` into `Status::InternalError` and
//! logs the original cause.
//!
//! Shaped like `sem_os_core::error::SemOsError`: named variants, each with
//! an associated HTTP status so the mapping stays table-driven.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("config error: {0}")]
    Config(String),

    #[error("bind error: {0}")]
    Bind(String),

    #[error("worker pool queue full")]
    WorkerQueueFull,

    #[error("state machine has no row for (state={state:?}, status={status:?})")]
    TableGap { state: String, status: String },

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("upstream request timeout")]
    UpstreamTimeout,

    #[error("postpone task response timeout")]
    PostponeTimeout,

    #[error("handler panicked: {0}")]
    HandlerPanic(String),

    #[error("internal: {0}")]
    Internal(#[from] anyhow::Error),
}

impl CoreError {
    /// HTTP status a terminal error response carries. Table-driven, not
    /// matched ad hoc at each call site.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Config(_) | Self::Bind(_) | Self::TableGap { .. } | Self::HandlerPanic(_) | Self::Internal(_) => 500,
            Self::WorkerQueueFull => 503,
            Self::Upstream(_) | Self::UpstreamTimeout => 500,
            Self::PostponeTimeout => 500,
        }
    }

    /// Table gaps indicate a programming error
    /// and must abort the process rather than degrade gracefully.
    pub fn is_fatal_table_gap(&self) -> bool {
        matches!(self, Self::TableGap { .. })
    }
}
