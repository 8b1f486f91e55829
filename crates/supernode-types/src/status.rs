//! Task status values and the HTTP status each maps to at a CHK_* boundary.
//!
//! Mirrors the shape of a small tagged status enum: a `as_str`/`Display`
//! pair plus a lookup table, rather than scattering the HTTP mapping across
//! call sites.

use std::fmt;

/// Outcome of a single handler phase (`pre_action`, `worker_action`,
/// `post_action`), consumed by the task state machine's CHK_* states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// No opinion — continuation behaves like `Ok`.
    None,
    Ok,
    /// Hand the task to the Upstream Manager.
    Forward,
    /// Write the current output now but keep the task alive for another
    /// round through the same phase (streaming).
    Again,
    Error,
    InternalError,
    /// Malformed client input.
    Drop,
    /// Overload — worker queue full or rate-limited.
    Busy,
    /// Suspend the task awaiting a correlated later task.
    Postpone,
    /// Terminal for periodic tasks: do not reschedule.
    Stop,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Ok => "ok",
            Self::Forward => "forward",
            Self::Again => "again",
            Self::Error => "error",
            Self::InternalError => "internal_error",
            Self::Drop => "drop",
            Self::Busy => "busy",
            Self::Postpone => "postpone",
            Self::Stop => "stop",
        }
    }

    /// `None` is always treated as a continuation signal identical to `Ok`.
    pub fn normalize(self) -> Self {
        if matches!(self, Self::None) {
            Self::Ok
        } else {
            self
        }
    }

    /// The HTTP status code a terminal response carries for this status.
    /// `Forward`/`Again`/`Postpone` have no direct HTTP mapping of their
    /// own — they route to a later status instead.
    pub fn terminal_http_code(&self) -> Option<u16> {
        match self {
            Self::Ok => Some(200),
            Self::Error | Self::InternalError | Self::Stop => Some(500),
            Self::Drop => Some(400),
            Self::Busy => Some(503),
            Self::None | Self::Forward | Self::Again | Self::Postpone => None,
        }
    }

    pub fn is_terminal_failure(&self) -> bool {
        matches!(self, Self::Error | Self::InternalError | Self::Drop | Self::Busy | Self::Stop)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "ok" => Ok(Self::Ok),
            "forward" => Ok(Self::Forward),
            "again" => Ok(Self::Again),
            "error" => Ok(Self::Error),
            "internal_error" => Ok(Self::InternalError),
            "drop" => Ok(Self::Drop),
            "busy" => Ok(Self::Busy),
            "postpone" => Ok(Self::Postpone),
            "stop" => Ok(Self::Stop),
            other => Err(format!("unknown status: {other}")),
        }
    }
}

/// Classification of a `Task`, set at creation and never changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Client,
    Periodic,
    UpstreamBlocking,
}

/// The state-machine's own position, independent of the handler `Status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Execute,
    PreAction,
    ChkPreAction,
    WorkerAction,
    ChkWorkerAction,
    WorkerActionDone,
    PostAction,
    ChkPostAction,
    Exit,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_normalizes_to_ok() {
        assert_eq!(Status::None.normalize(), Status::Ok);
        assert_eq!(Status::Ok.normalize(), Status::Ok);
    }

    #[test]
    fn http_codes_match_spec_table() {
        assert_eq!(Status::Ok.terminal_http_code(), Some(200));
        assert_eq!(Status::Drop.terminal_http_code(), Some(400));
        assert_eq!(Status::Busy.terminal_http_code(), Some(503));
        assert_eq!(Status::Error.terminal_http_code(), Some(500));
        assert_eq!(Status::InternalError.terminal_http_code(), Some(500));
        assert_eq!(Status::Forward.terminal_http_code(), None);
        assert_eq!(Status::Postpone.terminal_http_code(), None);
    }

    #[test]
    fn round_trips_through_str() {
        for s in [
            Status::None,
            Status::Ok,
            Status::Forward,
            Status::Again,
            Status::Error,
            Status::InternalError,
            Status::Drop,
            Status::Busy,
            Status::Postpone,
            Status::Stop,
        ] {
            let parsed: Status = s.as_str().parse().unwrap();
            assert_eq!(parsed, s);
        }
    }
}
