//! Error types and result definitions for dump runs.
//!
//! [`DumpError`] carries an [`ErrorKind`] classification, a static description, optional dynamic
//! detail (usually the server's error text), an optional source, and the call-site location and
//! backtrace where it was raised. Worker failures are aggregated into a single error holding many.

use std::backtrace::Backtrace;
use std::borrow::Cow;
use std::error;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

use crate::client::ServerError;

/// Convenient result type for dump operations using [`DumpError`] as the error type.
pub type DumpResult<T> = Result<T, DumpError>;

/// Detailed payload stored for single [`DumpError`] instances.
#[derive(Debug, Clone)]
struct ErrorPayload {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
    backtrace: Arc<Backtrace>,
}

/// Main error type for dump runs.
#[derive(Debug, Clone)]
pub struct DumpError {
    repr: ErrorRepr,
}

#[derive(Debug, Clone)]
enum ErrorRepr {
    Single(ErrorPayload),
    /// Multiple aggregated errors, mainly used to report several worker failures at once.
    Many {
        errors: Vec<DumpError>,
        location: &'static Location<'static>,
    },
}

/// Categories of errors raised by the dump engine.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // Server errors
    ServerConnectionFailed,
    ServerTypeUndetectable,
    ServerVersionUnreadable,
    QueryFailed,

    // Lock errors
    LongQueryBlocked,
    ProcessListUnreadable,
    LockFailed,
    LockAllTablesFailed,

    // Snapshot errors
    SnapshotFailed,
    SnapshotTokenFailed,

    // Journal and output errors
    JournalOpenFailed,
    JournalWriteFailed,
    OutputFileFailed,
    IoError,

    // Configuration errors
    ConfigError,

    // Workflow errors
    InvalidState,
    QueueClosed,
    DiscoveryFailed,
    JobFailed,
    WorkerPanic,
    WorkerCancelled,
    WorkerStartupFailed,
    OperationCanceled,

    Unknown,
}

impl DumpError {
    /// Returns the [`ErrorKind`] of this error.
    ///
    /// For aggregated errors, returns the kind of the first one.
    pub fn kind(&self) -> ErrorKind {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.kind,
            ErrorRepr::Many { ref errors, .. } => errors
                .first()
                .map(|err| err.kind())
                .unwrap_or(ErrorKind::Unknown),
        }
    }

    /// Returns every [`ErrorKind`] present in this error.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        match self.repr {
            ErrorRepr::Single(ref payload) => vec![payload.kind],
            ErrorRepr::Many { ref errors, .. } => {
                errors.iter().flat_map(|err| err.kinds()).collect()
            }
        }
    }

    /// Returns the detail of this error, or of the first aggregated error that has one.
    pub fn detail(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.detail.as_deref(),
            ErrorRepr::Many { ref errors, .. } => errors.iter().find_map(|e| e.detail()),
        }
    }

    /// Returns the static description of this error.
    pub fn description(&self) -> &str {
        match self.repr {
            ErrorRepr::Single(ref payload) => &payload.description,
            ErrorRepr::Many { .. } => "multiple errors",
        }
    }

    /// Returns the captured backtrace for single errors.
    pub fn backtrace(&self) -> Option<&Backtrace> {
        match self.repr {
            ErrorRepr::Single(ref payload) => Some(payload.backtrace.as_ref()),
            ErrorRepr::Many { .. } => None,
        }
    }

    /// Returns the call-site location where this error was created.
    pub fn location(&self) -> &'static Location<'static> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.location,
            ErrorRepr::Many { location, .. } => location,
        }
    }

    /// Attaches an originating error, exposed through [`error::Error::source`].
    ///
    /// Has no effect on aggregated errors, which forward their first error as the source.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        if let ErrorRepr::Single(ref mut payload) = self.repr {
            payload.source = Some(Arc::new(source));
        }

        self
    }

    #[track_caller]
    fn from_components(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
    ) -> Self {
        DumpError {
            repr: ErrorRepr::Single(ErrorPayload {
                kind,
                description,
                detail,
                source: None,
                location: Location::caller(),
                backtrace: Arc::new(Backtrace::capture()),
            }),
        }
    }
}

impl PartialEq for DumpError {
    fn eq(&self, other: &DumpError) -> bool {
        match (&self.repr, &other.repr) {
            (ErrorRepr::Single(a), ErrorRepr::Single(b)) => a.kind == b.kind,
            (ErrorRepr::Many { errors: a, .. }, ErrorRepr::Many { errors: b, .. }) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for DumpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.repr {
            ErrorRepr::Single(payload) => {
                let location = payload.location;
                write!(
                    f,
                    "[{:?}] {} @ {}:{}:{}",
                    payload.kind,
                    payload.description,
                    location.file(),
                    location.line(),
                    location.column()
                )?;

                if let Some(detail) = payload.detail.as_deref() {
                    write!(f, "\n  Detail:")?;
                    for line in detail.lines() {
                        write!(f, "\n    {line}")?;
                    }
                }

                let backtrace = payload.backtrace.to_string();
                if !backtrace.trim().is_empty() {
                    write!(f, "\n  Backtrace:")?;
                    for line in backtrace.lines() {
                        write!(f, "\n    {line}")?;
                    }
                }

                Ok(())
            }
            ErrorRepr::Many { errors, location } => {
                let count = errors.len();
                write!(
                    f,
                    "[Many] {} error{} aggregated @ {}:{}:{}",
                    count,
                    if count == 1 { "" } else { "s" },
                    location.file(),
                    location.line(),
                    location.column()
                )?;

                for (index, error) in errors.iter().enumerate() {
                    let rendered = error.to_string();
                    let mut lines = rendered.lines();
                    match lines.next() {
                        Some(first_line) => write!(f, "\n  {}. {}", index + 1, first_line)?,
                        None => write!(f, "\n  {}.", index + 1)?,
                    }

                    for line in lines {
                        write!(f, "\n     {line}")?;
                    }
                }

                Ok(())
            }
        }
    }
}

impl error::Error for DumpError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.repr {
            ErrorRepr::Single(payload) => payload
                .source
                .as_ref()
                .map(|source| source.as_ref() as &(dyn error::Error + 'static)),
            ErrorRepr::Many { errors, .. } => errors
                .first()
                .map(|error| error as &(dyn error::Error + 'static)),
        }
    }
}

impl From<(ErrorKind, &'static str)> for DumpError {
    #[track_caller]
    fn from((kind, desc): (ErrorKind, &'static str)) -> DumpError {
        DumpError::from_components(kind, Cow::Borrowed(desc), None)
    }
}

impl<D> From<(ErrorKind, &'static str, D)> for DumpError
where
    D: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, desc, detail): (ErrorKind, &'static str, D)) -> DumpError {
        DumpError::from_components(kind, Cow::Borrowed(desc), Some(detail.into()))
    }
}

/// Aggregates errors; a single error is returned unwrapped.
impl<E> From<Vec<E>> for DumpError
where
    E: Into<DumpError>,
{
    #[track_caller]
    fn from(errors: Vec<E>) -> DumpError {
        let location = Location::caller();

        let mut errors: Vec<DumpError> = errors.into_iter().map(Into::into).collect();
        if errors.len() == 1
            && let Some(error) = errors.pop()
        {
            return error;
        }

        DumpError {
            repr: ErrorRepr::Many { errors, location },
        }
    }
}

impl From<std::io::Error> for DumpError {
    #[track_caller]
    fn from(err: std::io::Error) -> DumpError {
        let detail = err.to_string();
        DumpError::from_components(
            ErrorKind::IoError,
            Cow::Borrowed("I/O operation failed"),
            Some(Cow::Owned(detail)),
        )
        .with_source(err)
    }
}

/// Converts a server error into a [`ErrorKind::QueryFailed`] error carrying the server text.
impl From<ServerError> for DumpError {
    #[track_caller]
    fn from(err: ServerError) -> DumpError {
        let detail = err.to_string();
        DumpError::from_components(
            ErrorKind::QueryFailed,
            Cow::Borrowed("Server query failed"),
            Some(Cow::Owned(detail)),
        )
        .with_source(err)
    }
}

impl From<config::shared::ValidationError> for DumpError {
    #[track_caller]
    fn from(err: config::shared::ValidationError) -> DumpError {
        let detail = err.to_string();
        DumpError::from_components(
            ErrorKind::ConfigError,
            Cow::Borrowed("Invalid dump configuration"),
            Some(Cow::Owned(detail)),
        )
        .with_source(err)
    }
}
