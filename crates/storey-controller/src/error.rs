use std::borrow::Cow;

use storey::response::ErrorKind as DeviceErrorKind;

/// All possible error kinds.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The notification listener could not be bound.
    Listener,
    /// The resource directory could not be queried.
    DirectoryUnavailable,
    /// A device could not be reached within the request timeout.
    Request,
    /// A device replied with an unexpected body.
    Response,
    /// A device refused a request.
    Device(DeviceErrorKind),
    /// No known device exposes the requested path.
    UnknownPath,
    /// A record is missing from the inventory.
    NotFound,
    /// A record already exists in the inventory.
    Conflict,
    /// The operation is not allowed in the current client state.
    State,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Listener => "Notification Listener".fmt(f),
            Self::DirectoryUnavailable => "Directory Unavailable".fmt(f),
            Self::Request => "Device Request".fmt(f),
            Self::Response => "Device Response".fmt(f),
            Self::Device(kind) => write!(f, "Device Error ({kind})"),
            Self::UnknownPath => "Unknown Path".fmt(f),
            Self::NotFound => "Not Found".fmt(f),
            Self::Conflict => "Conflict".fmt(f),
            Self::State => "Client State".fmt(f),
        }
    }
}

/// A controller error.
#[derive(Clone, PartialEq)]
pub struct Error {
    kind: ErrorKind,
    description: Cow<'static, str>,
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.description)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.description)
    }
}

impl std::error::Error for Error {}

impl Error {
    /// Creates an [`Error`] from an [`ErrorKind`] and a description.
    #[must_use]
    pub fn new(kind: ErrorKind, description: impl Into<Cow<'static, str>>) -> Self {
        Self {
            kind,
            description: description.into(),
        }
    }

    /// Returns the [`ErrorKind`].
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::new(ErrorKind::Listener, e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        let kind = if e.is_decode() {
            ErrorKind::Response
        } else {
            ErrorKind::Request
        };
        Self::new(kind, e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::new(ErrorKind::Response, e.to_string())
    }
}

impl From<storey_directory::error::Error> for Error {
    fn from(e: storey_directory::error::Error) -> Self {
        Self::new(ErrorKind::DirectoryUnavailable, e.to_string())
    }
}

/// A specialized [`Result`] type for [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use storey::response::ErrorKind as DeviceErrorKind;

    use super::{Error, ErrorKind};

    #[test]
    fn test_error_display() {
        let error = Error::new(
            ErrorKind::Device(DeviceErrorKind::RejectedValue),
            "people count out of range",
        );
        assert_eq!(
            error.kind(),
            ErrorKind::Device(DeviceErrorKind::RejectedValue)
        );
        assert!(error.to_string().starts_with("Device Error ("));
        assert!(error.to_string().ends_with("): people count out of range"));
    }
}
