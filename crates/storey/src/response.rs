use alloc::borrow::Cow;
use alloc::string::String;

use serde::Serialize;

/// A response notifying that an operation completed successfully.
#[derive(Debug, PartialEq, Serialize)]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub struct Ack {
    action_terminated_correctly: bool,
}

impl Ack {
    /// Generates an [`Ack`].
    #[must_use]
    pub const fn ok() -> Self {
        Self {
            action_terminated_correctly: true,
        }
    }
}

/// A response carrying the path of a newly created resource.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub struct Created {
    /// Path of the created resource.
    pub path: String,
}

impl Created {
    /// Generates a [`Created`] response.
    #[must_use]
    #[inline]
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

/// All possible errors that may cause a resource operation to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub enum ErrorKind {
    /// A value has been refused by the resource validator.
    RejectedValue,
    /// No encoding is supported by both the requester and the resource.
    UnsupportedMediaType,
    /// The resource cannot be observed.
    NotObservable,
    /// The request payload is invalid or malformed.
    BadRequest,
    /// The resource does not exist.
    NotFound,
    /// The resource does not support the requested operation.
    MethodNotAllowed,
    /// A resource with the same name already exists.
    Conflict,
    /// An internal error has occurred.
    Internal,
}

impl ErrorKind {
    /// Returns the `HTTP` status code associated with the error kind.
    #[must_use]
    pub const fn status_code(self) -> u16 {
        match self {
            Self::RejectedValue | Self::BadRequest => 400,
            Self::NotFound => 404,
            Self::MethodNotAllowed | Self::NotObservable => 405,
            Self::Conflict => 409,
            Self::UnsupportedMediaType => 415,
            Self::Internal => 500,
        }
    }
}

impl core::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::RejectedValue => "Rejected value",
            Self::UnsupportedMediaType => "Unsupported media type",
            Self::NotObservable => "Not observable",
            Self::BadRequest => "Bad request",
            Self::NotFound => "Not found",
            Self::MethodNotAllowed => "Method not allowed",
            Self::Conflict => "Conflict",
            Self::Internal => "Internal",
        }
        .fmt(f)
    }
}

/// A response providing details about an error encountered during a
/// resource operation.
///
/// Contains the [`ErrorKind`], a general error description,
/// and optional information about the encountered error.
#[derive(Debug, PartialEq, Serialize)]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub struct ErrorResponse<'a> {
    /// Error kind.
    pub error: ErrorKind,
    /// Error description.
    pub description: Cow<'a, str>,
    /// Information describing the encountered error.
    pub info: Option<Cow<'a, str>>,
}

impl<'a> ErrorResponse<'a> {
    /// Generates an [`ErrorResponse`].
    ///
    /// Requires specifying the [`ErrorKind`] and a general error description.
    #[must_use]
    #[inline]
    pub fn with_description(error: ErrorKind, description: impl Into<Cow<'a, str>>) -> Self {
        Self {
            error,
            description: description.into(),
            info: None,
        }
    }

    /// Generates an [`ErrorResponse`].
    ///
    /// Requires specifying the [`ErrorKind`], a general error
    /// description, and information about the encountered error.
    #[must_use]
    #[inline]
    pub fn with_description_error(
        error: ErrorKind,
        description: impl Into<Cow<'a, str>>,
        info: impl Into<Cow<'a, str>>,
    ) -> Self {
        Self {
            error,
            description: description.into(),
            info: Some(info.into()),
        }
    }

    /// Generates an [`ErrorResponse`] for a malformed request.
    #[must_use]
    #[inline]
    pub fn bad_request(description: impl Into<Cow<'a, str>>) -> Self {
        Self::with_description(ErrorKind::BadRequest, description)
    }

    /// Generates an [`ErrorResponse`] for a missing resource.
    #[must_use]
    #[inline]
    pub fn not_found(description: impl Into<Cow<'a, str>>) -> Self {
        Self::with_description(ErrorKind::NotFound, description)
    }

    /// Generates an [`ErrorResponse`] for an internal error.
    #[must_use]
    #[inline]
    pub fn internal(description: impl Into<Cow<'a, str>>) -> Self {
        Self::with_description(ErrorKind::Internal, description)
    }
}
