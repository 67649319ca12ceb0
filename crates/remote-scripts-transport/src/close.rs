//! Close-code mapping shared by every session kind.

use remote_scripts_core::SessionError;

pub const NORMAL_CLOSURE: u16 = 1000;
/// Close frame received without a status code.
pub const NO_STATUS: u16 = 1005;
/// Connection dropped without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// How a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseOutcome {
    Unauthorized,
    AccessDenied,
    NotFound,
    NormalClosure,
    /// Retryable drop with the observed code.
    Disconnected { code: u16 },
    ConnectionError(String),
}

impl CloseOutcome {
    /// Map a close code (or HTTP handshake status) to an outcome.
    #[must_use]
    pub const fn from_code(code: u16) -> Self {
        match code {
            401 | 4001 => Self::Unauthorized,
            403 | 4003 => Self::AccessDenied,
            404 | 4004 => Self::NotFound,
            NORMAL_CLOSURE => Self::NormalClosure,
            code => Self::Disconnected { code },
        }
    }

    /// The error a session records for this outcome, if any.
    #[must_use]
    pub fn error(&self) -> Option<SessionError> {
        match self {
            Self::Unauthorized => Some(SessionError::AuthenticationRequired),
            Self::AccessDenied => Some(SessionError::AccessDenied),
            Self::NotFound => Some(SessionError::NotFound),
            Self::ConnectionError(msg) => Some(SessionError::ConnectionError(msg.clone())),
            Self::NormalClosure | Self::Disconnected { .. } => None,
        }
    }

    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Disconnected { .. })
    }

    #[must_use]
    pub const fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized)
    }
}
