use std::fmt::Display;
use std::{fmt, io, result};
use std::sync::PoisonError;

use tokio::task::JoinError;

#[derive(Debug)]
pub struct Error {
    err: Box<ErrorKind>, // use a Box to keep the Result type smaller
}

#[derive(Debug)]
pub enum ErrorKind {
    /// Every backend in the cluster is inactive
    NoActiveBackends,
    /// A backend rejected an operation (or failed) and was still alive when probed
    BackendError { backend: String, cause: Error },
    /// Activation failed while synchronizing the target backend
    Synchronization { backend: String, cause: Error },
    /// A named lock could not be acquired within the configured timeout
    LockTimeout(String),
    UnknownBackend(String),
    UnknownStrategy(String),
    UnknownCluster(String),
    PoisonError,
    ClosedError,
    StringError(String),
    IOError(io::Error),
    YAMLError(serde_yaml::Error),
    JoinError(JoinError),
}

pub type Result<T> = result::Result<T, Error>;

impl Error {
    pub fn new<S: ToString>(s: S) -> Self {
        Error::from_kind(ErrorKind::StringError(s.to_string()))
    }

    fn from_kind(kind: ErrorKind) -> Self {
        Error {
            err: Box::new(kind),
        }
    }

    pub fn no_active_backends() -> Self {
        Error::from_kind(ErrorKind::NoActiveBackends)
    }

    pub fn backend<S: ToString>(backend: S, cause: Error) -> Self {
        // Don't wrap twice, the innermost backend is the one that failed
        if let ErrorKind::BackendError { .. } = cause.kind() {
            return cause;
        }
        Error::from_kind(ErrorKind::BackendError { backend: backend.to_string(), cause })
    }

    pub fn synchronization<S: ToString>(backend: S, cause: Error) -> Self {
        Error::from_kind(ErrorKind::Synchronization { backend: backend.to_string(), cause })
    }

    pub fn lock_timeout<S: ToString>(name: S) -> Self {
        Error::from_kind(ErrorKind::LockTimeout(name.to_string()))
    }

    pub fn unknown_backend<S: ToString>(id: S) -> Self {
        Error::from_kind(ErrorKind::UnknownBackend(id.to_string()))
    }

    pub fn unknown_strategy<S: ToString>(id: S) -> Self {
        Error::from_kind(ErrorKind::UnknownStrategy(id.to_string()))
    }

    pub fn unknown_cluster<S: ToString>(id: S) -> Self {
        Error::from_kind(ErrorKind::UnknownCluster(id.to_string()))
    }

    pub fn closed() -> Self {
        Error::from_kind(ErrorKind::ClosedError)
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.err
    }

    /// Returns the id of the backend this error originated from, if known.
    pub fn backend_id(&self) -> Option<&str> {
        match self.kind() {
            ErrorKind::BackendError { backend, .. } => Some(backend.as_str()),
            ErrorKind::Synchronization { backend, .. } => Some(backend.as_str()),
            _ => None,
        }
    }

    /// Returns the wrapped cause for backend and synchronization errors.
    pub fn cause(&self) -> Option<&Error> {
        match self.kind() {
            ErrorKind::BackendError { cause, .. } => Some(cause),
            ErrorKind::Synchronization { cause, .. } => Some(cause),
            _ => None,
        }
    }

    pub fn is_no_active_backends(&self) -> bool {
        matches!(self.kind(), ErrorKind::NoActiveBackends)
    }
}

impl From<&str> for Error {
    fn from(err: &str) -> Self {
        Error::from_kind(ErrorKind::StringError(String::from(err)))
    }
}

impl From<String> for Error {
    fn from(err: String) -> Self {
        Error::from_kind(ErrorKind::StringError(err))
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::from_kind(ErrorKind::IOError(err))
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::from_kind(ErrorKind::YAMLError(err))
    }
}

impl From<JoinError> for Error {
    fn from(err: JoinError) -> Self {
        Error::from_kind(ErrorKind::JoinError(err))
    }
}

impl<Guard> From<PoisonError<Guard>> for Error {
    fn from(_: PoisonError<Guard>) -> Self {
        Error::from_kind(ErrorKind::PoisonError)
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        std::fmt::Display::fmt(&self.err, f)
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ErrorKind::NoActiveBackends => f.write_str("no active backends in cluster"),
            ErrorKind::BackendError { backend, cause } => write!(f, "backend {}: {}", backend, cause),
            ErrorKind::Synchronization { backend, cause } => write!(f, "failed to synchronize backend {}: {}", backend, cause),
            ErrorKind::LockTimeout(name) => {
                if name.is_empty() {
                    f.write_str("timed out acquiring the global lock")
                } else {
                    write!(f, "timed out acquiring lock {}", name)
                }
            },
            ErrorKind::UnknownBackend(id) => write!(f, "no backend with id {}", id),
            ErrorKind::UnknownStrategy(id) => write!(f, "no synchronization strategy with id {}", id),
            ErrorKind::UnknownCluster(id) => write!(f, "no cluster with id {}", id),
            ErrorKind::PoisonError => f.write_str("another thread panicked while holding the mutex"),
            ErrorKind::ClosedError => f.write_str("handle is closed"),
            ErrorKind::StringError(s) => f.write_str(&s),
            ErrorKind::IOError(e) => std::fmt::Display::fmt(&e, f),
            ErrorKind::YAMLError(e) => std::fmt::Display::fmt(&e, f),
            ErrorKind::JoinError(e) => std::fmt::Display::fmt(&e, f),
        }
    }
}

impl std::error::Error for Error {}

impl PartialEq for ErrorKind {
    fn eq(&self, other: &Self) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

impl Eq for ErrorKind {}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        self.err == other.err
    }
}

impl Eq for Error {}
