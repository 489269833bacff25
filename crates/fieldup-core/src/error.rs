use thiserror::Error;

/// Errors surfaced by engine entry points.
///
/// Leaf helpers work in `anyhow::Result` and attach path context; anything that reaches an
/// entry point without a more specific classification becomes a [`UpdateError::Fault`].
#[derive(Debug, Error)]
pub enum UpdateError {
    /// A referenced app, system or content hash does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A malformed name, hash or path component was supplied.
    #[error("bad parameter: {0}")]
    BadParameter(String),

    /// Another operation currently holds the update lock.
    #[error("busy: {0}")]
    Busy(String),

    /// An I/O or invariant failure. Never retried internally.
    #[error(transparent)]
    Fault(#[from] anyhow::Error),

    /// The on-disk state is unknown. The caller should stop and leave the rest to boot-time
    /// recovery and the probation rollback.
    #[error("unrecoverable: {0:#}")]
    Fatal(anyhow::Error),
}

pub type UpdateResult<T> = Result<T, UpdateError>;

impl UpdateError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn bad_parameter(message: impl Into<String>) -> Self {
        Self::BadParameter(message.into())
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }

    pub fn code(&self) -> ResultCode {
        match self {
            Self::NotFound(_) => ResultCode::NotFound,
            Self::BadParameter(_) => ResultCode::BadParameter,
            Self::Busy(_) => ResultCode::Busy,
            Self::Fault(_) | Self::Fatal(_) => ResultCode::Fault,
        }
    }
}

/// Successful results of a workflow call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Installed,
    Upgraded,
    Removed,
    /// The requested hash is already bound to the app; nothing was touched.
    AlreadyInstalled,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Installed => "installed",
            Self::Upgraded => "upgraded",
            Self::Removed => "removed",
            Self::AlreadyInstalled => "already-installed",
        }
    }

    pub fn code(self) -> ResultCode {
        match self {
            Self::AlreadyInstalled => ResultCode::Duplicate,
            Self::Installed | Self::Upgraded | Self::Removed => ResultCode::Ok,
        }
    }
}

/// The complete result taxonomy shared with sibling subsystems.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCode {
    Ok,
    NotFound,
    Duplicate,
    BadParameter,
    Fault,
    Busy,
}

impl ResultCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::NotFound => "not-found",
            Self::Duplicate => "duplicate",
            Self::BadParameter => "bad-parameter",
            Self::Fault => "fault",
            Self::Busy => "busy",
        }
    }
}

impl From<&UpdateError> for ResultCode {
    fn from(value: &UpdateError) -> Self {
        value.code()
    }
}

impl From<Outcome> for ResultCode {
    fn from(value: Outcome) -> Self {
        value.code()
    }
}
