use thiserror::Error;

pub type CoreResult<T> = Result<T, CoreError>;

/// Failures raised by a single coordination or conversation operation.
///
/// None of these are fatal to the process. Validation failures are reported
/// to the initiating connection only; `TransientStoreFailure` means the
/// enclosing transaction rolled back and the caller may retry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    #[error("stream is not live")]
    NotLive,

    #[error("forbidden")]
    Forbidden,

    #[error("cannot request to join your own stream")]
    SelfRequest,

    #[error("cannot send a gift to your own stream")]
    SelfGift,

    #[error("host is not available")]
    HostUnavailable,

    #[error("gift does not exist")]
    InvalidGift,

    #[error("insufficient balance: have {balance}, need {required}")]
    InsufficientBalance { balance: i64, required: i64 },

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("already a member of this room")]
    AlreadyMember,

    #[error("conversation already exists")]
    DuplicateConversation,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("store failure: {0}")]
    TransientStoreFailure(String),
}

impl CoreError {
    pub fn store(err: impl std::fmt::Display) -> Self {
        Self::TransientStoreFailure(err.to_string())
    }

    /// Stable code carried by the gateway `error` event.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotLive => "not_live",
            Self::Forbidden => "forbidden",
            Self::SelfRequest => "self_request",
            Self::SelfGift => "self_gift",
            Self::HostUnavailable => "host_unavailable",
            Self::InvalidGift => "invalid_gift",
            Self::InsufficientBalance { .. } => "insufficient_balance",
            Self::NotFound(_) => "not_found",
            Self::AlreadyMember => "already_member",
            Self::DuplicateConversation => "duplicate_conversation",
            Self::BadRequest(_) => "bad_request",
            Self::TransientStoreFailure(_) => "transient_store_failure",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientStoreFailure(_))
    }

    /// Idempotence short-circuits are reported as errors but change nothing.
    pub fn is_short_circuit(&self) -> bool {
        matches!(self, Self::AlreadyMember | Self::DuplicateConversation)
    }
}

impl From<anyhow::Error> for CoreError {
    fn from(err: anyhow::Error) -> Self {
        Self::TransientStoreFailure(format!("{err:#}"))
    }
}
