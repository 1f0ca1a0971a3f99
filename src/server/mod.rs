//! The user-facing JSON web server. Accepts fundus photographs and answers
//! with the annotated image.

use crate::fetch::FetchError;
use crate::overlay::Overlay;
use crate::pipeline::AnnotateError;
use crate::segment::Segmenter;
use actix_cors::Cors;
use actix_web::http::header::ContentType;
use actix_web::http::StatusCode;
use actix_web::{error::BlockingError, web, HttpResponse};
use actix_multipart::MultipartError;
use thiserror::Error;
use tracing::*;

pub mod protocol;
pub mod routes;

/// Shared, read-only state handed to every worker
pub struct AppState {
    pub segmenter: Box<dyn Segmenter>,
    pub overlay: Overlay,
    pub jpeg_quality: u8,
    pub max_upload_bytes: usize,

    /// Client for images submitted by URL
    pub http: reqwest::Client,
}

#[derive(Debug, Error)]
pub enum WebError {
    #[error("No se envió ninguna imagen")]
    MissingImage,

    #[error("image exceeds the {limit} byte upload limit")]
    PayloadTooLarge { limit: usize },

    #[error("No se envió ninguna URL")]
    MissingUrl,

    #[error("malformed upload: {0}")]
    BadUpload(String),

    #[error("{0}")]
    BadGateway(String),

    #[error("{0:#}")]
    InvalidImage(anyhow::Error),

    #[error("{0:#}")]
    Internal(anyhow::Error),
}

impl actix_web::error::ResponseError for WebError {
    fn error_response(&self) -> HttpResponse {
        let body = protocol::ErrorResponse {
            error: self.to_string(),
        };

        HttpResponse::build(self.status_code())
            .insert_header(ContentType::json())
            .json(body)
    }

    fn status_code(&self) -> StatusCode {
        match self {
            WebError::MissingImage
            | WebError::MissingUrl
            | WebError::BadUpload(_)
            | WebError::InvalidImage(_) => StatusCode::BAD_REQUEST,
            WebError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            WebError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            WebError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<anyhow::Error> for WebError {
    fn from(err: anyhow::Error) -> WebError {
        WebError::Internal(err)
    }
}

impl From<AnnotateError> for WebError {
    fn from(err: AnnotateError) -> Self {
        match err {
            AnnotateError::InvalidImage(e) => {
                warn!("rejecting upload: {e:#}");
                WebError::InvalidImage(e)
            }
            AnnotateError::Inference(e) => {
                error!("segmentation failed: {e:#}");
                WebError::Internal(e)
            }
        }
    }
}

impl From<MultipartError> for WebError {
    fn from(err: MultipartError) -> Self {
        WebError::BadUpload(err.to_string())
    }
}

impl From<FetchError> for WebError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::InvalidUrl(_) => WebError::BadUpload(err.to_string()),
            FetchError::TooLarge { limit } => WebError::PayloadTooLarge { limit },
            FetchError::Unreachable(_) | FetchError::Status(_) => {
                warn!("{err}");
                WebError::BadGateway(err.to_string())
            }
        }
    }
}

impl From<BlockingError> for WebError {
    fn from(err: BlockingError) -> Self {
        WebError::Internal(anyhow::anyhow!(err.to_string()))
    }
}

/// CORS policy: any origin when none are listed, like flask-cors' default
pub fn cors(origins: &[String]) -> Cors {
    let cors = Cors::default().allow_any_method().allow_any_header();
    if origins.is_empty() {
        return cors.allow_any_origin();
    }
    origins
        .iter()
        .fold(cors, |cors, origin| cors.allowed_origin(origin))
}

/// Register every route on an app. Malformed JSON bodies get the same
/// `{"error"}` shape as every other failure.
pub fn configure(cfg: &mut web::ServiceConfig) {
    let json = web::JsonConfig::default()
        .limit(64 * 1024)
        .error_handler(|err, _req| WebError::BadUpload(err.to_string()).into());

    cfg.app_data(json)
        .service(routes::segmentar)
        .service(routes::segmentar_url)
        .service(routes::health);
}
