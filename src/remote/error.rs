use thiserror::Error;

/// Classification attached where a remote failure originates. Only the kind
/// decides whether a failed action may be queued for later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrorKind {
    /// Request never produced a response (DNS, connect, reset).
    Network,
    Timeout,
    /// Gateway-level unavailability (502/503/504).
    Unavailable,
    /// The backend processed the request and refused it.
    Rejected { status: u16 },
    /// The response arrived but could not be understood.
    Decode,
    /// The request could not be built from the caller's input.
    InvalidRequest,
}

#[derive(Debug, Clone, Error)]
#[error("{kind_label} failure: {message}")]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub message: String,
    kind_label: &'static str,
}

impl RemoteError {
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        let kind_label = match kind {
            RemoteErrorKind::Network => "network",
            RemoteErrorKind::Timeout => "timeout",
            RemoteErrorKind::Unavailable => "unavailable",
            RemoteErrorKind::Rejected { .. } => "rejected",
            RemoteErrorKind::Decode => "decode",
            RemoteErrorKind::InvalidRequest => "invalid request",
        };
        Self {
            kind,
            message: message.into(),
            kind_label,
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Network, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Timeout, message)
    }

    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Rejected { status }, message)
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Decode, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::InvalidRequest, message)
    }

    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            RemoteErrorKind::Network | RemoteErrorKind::Timeout | RemoteErrorKind::Unavailable
        )
    }

    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        match status {
            502 | 503 | 504 => Self::new(RemoteErrorKind::Unavailable, body),
            _ => Self::rejected(status, body),
        }
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        let message = err.to_string();
        if err.is_timeout() {
            RemoteError::timeout(message)
        } else if err.is_decode() {
            RemoteError::decode(message)
        } else if let Some(status) = err.status() {
            RemoteError::from_status(status.as_u16(), message)
        } else {
            // connect, request and body errors never reached the application
            RemoteError::network(message)
        }
    }
}
