//! HTTP error wrapper and the fixed task error catalog.
//!
//! Task failures are reported to partners as `(code, description)` pairs
//! from a closed catalog; the codes are part of the external contract and
//! must not change between releases.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::json;
use std::fmt;

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    /// Shortcut for 401 Unauthorized
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}

/// A `(code, description)` pair from the partner-facing error catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ErrorCode {
    pub code: &'static str,
    pub description: &'static str,
}

impl ErrorCode {
    const fn new(code: &'static str, description: &'static str) -> Self {
        Self { code, description }
    }

    pub const PID_NOT_FOUND: Self = Self::new("41", "PID not found");
    pub const INGESTION_FILE_NOT_FOUND: Self = Self::new("50", "File requested not found");

    pub const MISSING_ZIPFILENAME_PARAM: Self =
        Self::new("4000", "Parameter zip_filename is missing");
    pub const MISSING_FILENAME_PARAM: Self = Self::new("4001", "Parameter file_name is missing");
    pub const MISSING_FILESIZE_PARAM: Self = Self::new("4002", "Parameter file_size is missing");
    pub const INVALID_FILESIZE_PARAM: Self =
        Self::new("4003", "Invalid parameter file_size, integer expected");
    pub const MISSING_FILECOUNT_PARAM: Self = Self::new("4004", "Parameter file_count is missing");
    pub const INVALID_FILECOUNT_PARAM: Self =
        Self::new("4005", "Invalid parameter file_count, integer expected");
    pub const CHECKSUM_DOESNT_MATCH: Self = Self::new("4007", "Checksum does not match");
    pub const FILESIZE_DOESNT_MATCH: Self = Self::new("4008", "File size does not match");
    pub const UNZIP_ERROR_FILE_NOT_FOUND: Self =
        Self::new("4009", "Unzip error: zip file not found");
    pub const UNZIP_ERROR_INVALID_FILE: Self =
        Self::new("4010", "Unzip error: zip file is invalid");
    pub const UNZIP_ERROR_WRONG_FILECOUNT: Self =
        Self::new("4011", "Unzip error: file count does not match");
    pub const BACKEND_UPLOAD_ERROR: Self = Self::new(
        "4012",
        "Unable to upload restricted zip on the storage backend",
    );
    pub const ORDER_NOT_FOUND: Self =
        Self::new("4016", "Order does not exist or you lack permissions");
    pub const BATCH_NOT_FOUND: Self =
        Self::new("4017", "Batch does not exist or you lack permissions");
    pub const MISSING_PIDS_LIST: Self = Self::new("4018", "Parameter 'pids' is missing");
    pub const UNABLE_TO_MOVE_IN_PRODUCTION: Self =
        Self::new("4019", "Cannot move file in production");
    pub const UNABLE_TO_ASSIGN_PID: Self = Self::new("4020", "Unable to assign a PID to the file");
    pub const UNABLE_TO_DOWNLOAD_FILE: Self = Self::new("4022", "Unable to download the file");
    pub const ZIP_SPLIT_ERROR: Self = Self::new("4023", "Zip split unexpected error");
    pub const ZIP_SPLIT_ENTRY_TOO_LARGE: Self =
        Self::new("4024", "One or more files are larger than max zip size");
    pub const MISSING_BATCHES_PARAMETER: Self = Self::new("4025", "Parameter batches is missing");
    pub const MISSING_ORDERS_PARAMETER: Self = Self::new("4026", "Parameter orders is missing");
    pub const EMPTY_BATCHES_PARAMETER: Self = Self::new("4027", "Parameter batches is empty");
    pub const EMPTY_ORDERS_PARAMETER: Self = Self::new("4028", "Parameter orders is empty");
    pub const MISSING_CHECKSUM_PARAM: Self =
        Self::new("4029", "Parameter file_checksum is missing");
    pub const MISSING_BATCH_NUMBER_PARAM: Self =
        Self::new("4037", "Parameter batch_number is missing");
    pub const UNREACHABLE_DOWNLOAD_PATH: Self = Self::new("4039", "Download path is unreachable");
    pub const MISSING_ORDER_NUMBER_PARAM: Self =
        Self::new("4040", "Parameter order_number is missing");
    pub const MISSING_DOWNLOAD_PATH_PARAM: Self =
        Self::new("4041", "Parameter download_path is missing");
    pub const UNABLE_TO_CREATE_ZIP_FILE: Self =
        Self::new("4042", "Unable to create merged zip file");
    pub const INVALID_ZIP_SPLIT_OUTPUT: Self =
        Self::new("4043", "Unable to retrieve results from zip split");
    pub const EMPTY_DOWNLOAD_PATH_PARAM: Self =
        Self::new("4044", "Parameter download_path is empty");
    pub const UNEXPECTED_ERROR: Self = Self::new("4045", "An unexpected error occurred");
    pub const MISSING_REQUEST_ID: Self = Self::new("4046", "Request ID is missing");
    pub const UNABLE_TO_SET_METADATA: Self =
        Self::new("4047", "Unable to set metadata to the file");
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error {}: {}", self.code, self.description)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_codes_are_stable() {
        assert_eq!(ErrorCode::CHECKSUM_DOESNT_MATCH.code, "4007");
        assert_eq!(ErrorCode::UNEXPECTED_ERROR.code, "4045");
        assert_eq!(ErrorCode::PID_NOT_FOUND.code, "41");
    }

    #[test]
    fn display_includes_code_and_description() {
        let msg = ErrorCode::BATCH_NOT_FOUND.to_string();
        assert!(msg.contains("4017"));
        assert!(msg.contains("Batch does not exist"));
    }
}
