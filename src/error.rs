use actix_web::http::{header, StatusCode};
use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;

use crate::catalog::ImageError;
use crate::repo::RepoError;
use crate::storage::BlobError;
use crate::upload::UploadError;

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: String,
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("{0}")] BadRequest(String),
    #[error("unauthorized")] Unauthorized,
    #[error("forbidden")] Forbidden,
    #[error("not found")] NotFound,
    #[error("{0}")] Conflict(String),
    #[error("{0}")] PayloadTooLarge(String),
    #[error("{0}")] UnsupportedMediaType(String),
    #[error("internal error")] Internal,
}

impl From<RepoError> for ApiError {
    fn from(e: RepoError) -> Self {
        match e {
            RepoError::NotFound => ApiError::NotFound,
            RepoError::Conflict => ApiError::Conflict("conflict".into()),
            RepoError::Invalid(msg) => ApiError::BadRequest(msg),
            RepoError::Internal(msg) => {
                log::error!("store failure: {msg}");
                ApiError::Internal
            }
        }
    }
}

impl From<UploadError> for ApiError {
    fn from(e: UploadError) -> Self {
        match e {
            UploadError::TooLarge { .. } => ApiError::PayloadTooLarge(e.to_string()),
            UploadError::UnsupportedFormat { .. } => ApiError::UnsupportedMediaType(e.to_string()),
            UploadError::Duplicate | UploadError::Reclaimed => ApiError::Conflict(e.to_string()),
            UploadError::Catalog(inner) => inner.into(),
            UploadError::Storage(msg) => {
                log::error!("upload storage failure: {msg}");
                ApiError::Internal
            }
        }
    }
}

impl From<BlobError> for ApiError {
    fn from(e: BlobError) -> Self {
        match e {
            BlobError::NotFound => ApiError::NotFound,
            other => {
                log::error!("blob store failure: {other}");
                ApiError::Internal
            }
        }
    }
}

impl From<ImageError> for ApiError {
    fn from(e: ImageError) -> Self {
        match e {
            ImageError::Catalog(e) => e.into(),
            ImageError::Blob(e) => e.into(),
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let mut res = HttpResponse::build(self.status_code());
        if matches!(self, ApiError::Unauthorized) {
            res.insert_header((header::WWW_AUTHENTICATE, "Bearer"));
        }
        res.json(ApiErrorBody { error: self.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_errors_map_to_statuses() {
        let e: ApiError = UploadError::TooLarge { limit: 10 }.into();
        assert_eq!(e.status_code(), StatusCode::PAYLOAD_TOO_LARGE);
        let e: ApiError = UploadError::UnsupportedFormat { detected: None }.into();
        assert_eq!(e.status_code(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
        let e: ApiError = UploadError::Duplicate.into();
        assert_eq!(e.status_code(), StatusCode::CONFLICT);
        let e: ApiError = UploadError::Storage("disk full".into()).into();
        assert_eq!(e.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(e.to_string(), "internal error");
    }

    #[test]
    fn unauthorized_challenges_bearer() {
        let res = ApiError::Unauthorized.error_response();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(res.headers().get(header::WWW_AUTHENTICATE).unwrap(), "Bearer");
    }
}
