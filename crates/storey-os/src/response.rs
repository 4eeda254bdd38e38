use storey::response::{ErrorKind, ErrorResponse as StoreyErrorResponse};

use axum::{
    extract::Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::error::Error;

/// A response providing details about an error encountered during a
/// resource operation.
///
/// The status code is derived from the [`ErrorKind`].
pub struct ErrorResponse(Response);

impl ErrorResponse {
    /// Generates an [`ErrorResponse`].
    ///
    /// Requires specifying an [`ErrorKind`] and a general description.
    #[must_use]
    #[inline]
    pub fn with_description(error: ErrorKind, description: &str) -> Self {
        let value = StoreyErrorResponse::with_description(error, description);
        Self((status(error), Json(value)).into_response())
    }

    /// Generates an [`ErrorResponse`].
    ///
    /// Requires specifying an [`ErrorKind`], a general error
    /// description, and information about the encountered error.
    #[must_use]
    #[inline]
    pub fn with_description_error(error: ErrorKind, description: &str, info: &str) -> Self {
        let value = StoreyErrorResponse::with_description_error(error, description, info);
        Self((status(error), Json(value)).into_response())
    }

    /// Generates an [`ErrorResponse`] for a malformed request.
    #[must_use]
    #[inline]
    pub fn bad_request(description: &str) -> Self {
        Self::with_description(ErrorKind::BadRequest, description)
    }

    /// Generates an [`ErrorResponse`] for a missing resource.
    #[must_use]
    #[inline]
    pub fn not_found(description: &str) -> Self {
        Self::with_description(ErrorKind::NotFound, description)
    }
}

impl From<Error> for ErrorResponse {
    fn from(e: Error) -> Self {
        Self::with_description(e.kind(), e.description())
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        self.0
    }
}

fn status(error: ErrorKind) -> StatusCode {
    StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}
