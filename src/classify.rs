//! Mapping raw request outcomes to semantic verdicts.
//!
//! [`classify`] is a pure total function. Retry and pacing decisions
//! belong to the callers.

use std::fmt;

use serde::Deserialize;

use crate::executor::{RawOutcome, TransportError};

/// Why a request produced no validation answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FailureKind {
    /// The endpoint answered with an unexpected HTTP status.
    Status(u16),
    /// The per-call timeout elapsed.
    Timeout,
    /// The connection could not be made or was cut.
    Connection,
    /// Some other transport problem.
    Other,
}

impl From<TransportError> for FailureKind {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Timeout => Self::Timeout,
            TransportError::Connection => Self::Connection,
            TransportError::Other => Self::Other,
        }
    }
}

/// The meaning of one response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[must_use]
pub enum Verdict {
    /// `code = 0`.
    Available,
    /// `code = 1`.
    Taken,
    /// `code = 2`: the registry refuses the identifier on content grounds.
    NotAppropriate,
    /// `code = 10`.
    TooShort,
    /// `code = 11`.
    TooLong,
    /// `code = 12`.
    InvalidCharacters,
    /// HTTP 429.
    RateLimited,
    /// HTTP 403.
    Forbidden,
    /// Transport failure or an unexpected HTTP status.
    TransportFailure(FailureKind),
    /// HTTP 200 without an integer `code`.
    ParseFailure,
    /// A `code` outside the known table, kept verbatim.
    UnknownCode(i64),
}

impl Verdict {
    /// Whether this verdict is a throttling signal. Throttled responses are
    /// discarded rather than counted as samples.
    #[must_use]
    pub const fn is_throttle(self) -> bool {
        matches!(self, Self::RateLimited | Self::Forbidden)
    }

    /// Whether the registry rejected the identifier's shape, which no amount
    /// of resampling can change.
    #[must_use]
    pub const fn is_shape_rejection(self) -> bool {
        matches!(self, Self::TooShort | Self::TooLong | Self::InvalidCharacters)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Available => write!(f, "available"),
            Self::Taken => write!(f, "taken"),
            Self::NotAppropriate => write!(f, "not appropriate"),
            Self::TooShort => write!(f, "too short"),
            Self::TooLong => write!(f, "too long"),
            Self::InvalidCharacters => write!(f, "invalid characters"),
            Self::RateLimited => write!(f, "rate limited"),
            Self::Forbidden => write!(f, "forbidden"),
            Self::TransportFailure(FailureKind::Status(s)) => {
                write!(f, "transport failure (HTTP {s})")
            }
            Self::TransportFailure(FailureKind::Timeout) => write!(f, "transport failure (timeout)"),
            Self::TransportFailure(FailureKind::Connection) => {
                write!(f, "transport failure (connection)")
            }
            Self::TransportFailure(FailureKind::Other) => write!(f, "transport failure"),
            Self::ParseFailure => write!(f, "unparseable response"),
            Self::UnknownCode(code) => write!(f, "unknown code {code}"),
        }
    }
}

#[derive(Deserialize)]
struct ValidationBody {
    code: i64,
}

/// Classify one raw outcome.
///
/// ```
/// use username_avail::classify::{classify, Verdict};
/// use username_avail::executor::RawOutcome;
///
/// assert_eq!(classify(&RawOutcome::code(0)), Verdict::Available);
/// assert_eq!(classify(&RawOutcome::status(429)), Verdict::RateLimited);
/// ```
pub fn classify(outcome: &RawOutcome) -> Verdict {
    match outcome {
        RawOutcome::Failed(e) => Verdict::TransportFailure((*e).into()),
        RawOutcome::Response { status: 200, body } => {
            match serde_json::from_str::<ValidationBody>(body) {
                Ok(parsed) => from_code(parsed.code),
                Err(_) => Verdict::ParseFailure,
            }
        }
        RawOutcome::Response { status: 429, .. } => Verdict::RateLimited,
        RawOutcome::Response { status: 403, .. } => Verdict::Forbidden,
        RawOutcome::Response { status, .. } => {
            Verdict::TransportFailure(FailureKind::Status(*status))
        }
    }
}

fn from_code(code: i64) -> Verdict {
    match code {
        0 => Verdict::Available,
        1 => Verdict::Taken,
        2 => Verdict::NotAppropriate,
        10 => Verdict::TooShort,
        11 => Verdict::TooLong,
        12 => Verdict::InvalidCharacters,
        other => Verdict::UnknownCode(other),
    }
}
