use std::io;

pub type Result<T> = std::result::Result<T, Error>;

/// Status codes reported back to callers. The numbering mirrors the embedded
/// engine's status codes so that engine failures can be passed through verbatim.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Status {
    #[default]
    Ok = 0,
    NotFound = 1,
    Corruption = 2,
    NotSupported = 3,
    InvalidArgument = 4,
    IoError = 5,
    MergeInProgress = 6,
    Incomplete = 7,
    ShutdownInProgress = 8,
    TimedOut = 9,
    Aborted = 10,
    Busy = 11,
    Expired = 12,
    TryAgain = 13,
}

impl Status {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn is_ok(self) -> bool {
        self == Status::Ok
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Status::Ok => "OK",
            Status::NotFound => "NotFound",
            Status::Corruption => "Corruption",
            Status::NotSupported => "NotSupported",
            Status::InvalidArgument => "InvalidArgument",
            Status::IoError => "IOError",
            Status::MergeInProgress => "MergeInProgress",
            Status::Incomplete => "Incomplete",
            Status::ShutdownInProgress => "ShutdownInProgress",
            Status::TimedOut => "TimedOut",
            Status::Aborted => "Aborted",
            Status::Busy => "Busy",
            Status::Expired => "Expired",
            Status::TryAgain => "TryAgain",
        };
        write!(f, "{}({})", name, self.code())
    }
}

#[derive(Debug)]
pub enum Error {
    IoError(io::Error),
    /// A failure reported by the embedded engine. Never retried here.
    Engine {
        status: Status,
        context: String,
    },
    InvalidArgument(String),
    Corruption(String),
    MutexPoisoned,
    InvalidState(String),
    InvalidOperation(String),
}

impl Error {
    pub fn engine(status: Status, context: impl Into<String>) -> Self {
        Error::Engine {
            status,
            context: context.into(),
        }
    }

    /// The status code this error is reported to callers with.
    pub fn status(&self) -> Status {
        match self {
            Error::IoError(_) => Status::IoError,
            Error::Engine { status, .. } => *status,
            Error::InvalidArgument(_) => Status::InvalidArgument,
            Error::Corruption(_) => Status::Corruption,
            Error::MutexPoisoned => Status::Aborted,
            Error::InvalidState(_) => Status::Aborted,
            Error::InvalidOperation(_) => Status::NotSupported,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::IoError(err)
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        Error::MutexPoisoned
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::IoError(err) => write!(f, "I/O error: {}", err),
            Error::Engine { status, context } => write!(f, "Engine error {}: {}", status, context),
            Error::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            Error::Corruption(msg) => write!(f, "Corruption: {}", msg),
            Error::MutexPoisoned => write!(f, "Mutex was poisoned"),
            Error::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            Error::InvalidOperation(msg) => write!(f, "Invalid operation: {}", msg),
        }
    }
}

impl std::error::Error for Error {}
