//! HTTP handlers. Inference is blocking, so it runs on actix's blocking
//! pool rather than on the worker's event loop.

use super::protocol::{self, IMAGE_FIELD};
use super::{AppState, WebError};
use crate::{fetch, imaging, pipeline};
use actix_multipart::Multipart;
use actix_web::http::header;
use actix_web::{get, post, web, HttpRequest, HttpResponse, Responder};
use futures_util::StreamExt;
use tracing::*;

type Result<T> = std::result::Result<T, WebError>;

/// Segment the optic disc and cup of an uploaded fundus photograph
#[post("/api/segmentar")]
pub async fn segmentar(
    req: HttpRequest,
    payload: web::Payload,
    state: web::Data<AppState>,
) -> Result<impl Responder> {
    if !is_multipart(&req) {
        warn!("request is not multipart/form-data");
        return Err(WebError::MissingImage);
    }

    // Parse the input request
    let form = Multipart::new(req.headers(), payload);
    let upload = read_field(form, IMAGE_FIELD, state.max_upload_bytes)
        .await?
        .ok_or(WebError::MissingImage)?;
    debug!("received {} byte image", upload.len());

    let output = {
        let state = state.clone();
        web::block(move || {
            pipeline::annotate(
                state.segmenter.as_ref(),
                &state.overlay,
                &upload,
                state.jpeg_quality,
            )
        })
        .await??
    };

    info!(
        "finished serving segmentation request ({}x{})",
        output.width, output.height
    );

    Ok(web::Json(protocol::SegmentationResponse {
        segmentada: output.image,
    }))
}

/// Download the photograph at `url`, segment it and answer with the
/// annotated JPEG itself
#[post("/api/segmentar-url")]
pub async fn segmentar_url(
    body: web::Json<protocol::UrlRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let url = body
        .into_inner()
        .url
        .filter(|url| !url.trim().is_empty())
        .ok_or(WebError::MissingUrl)?;

    let upload = fetch::fetch_image(&state.http, &url, state.max_upload_bytes).await?;
    debug!("fetched {} byte image from {url}", upload.len());

    let jpeg = {
        let state = state.clone();
        web::block(move || -> std::result::Result<Vec<u8>, pipeline::AnnotateError> {
            let output = pipeline::annotate_image(state.segmenter.as_ref(), &state.overlay, &upload)?;
            Ok(imaging::encode_jpeg(&output, state.jpeg_quality)?)
        })
        .await??
    };

    info!("finished serving segmentation request for {url}");
    Ok(HttpResponse::Ok().content_type("image/jpeg").body(jpeg))
}

/// Report that the model is loaded and where it runs
#[get("/health")]
pub async fn health(state: web::Data<AppState>) -> impl Responder {
    web::Json(protocol::HealthResponse {
        status: "ready".into(),
        device: state.segmenter.device(),
    })
}

fn is_multipart(req: &HttpRequest) -> bool {
    req.headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_ascii_lowercase().starts_with("multipart/form-data"))
        .unwrap_or(false)
}

/// Collect the bytes of the first field called `name`, or `None` if the
/// form has no such field
async fn read_field(mut form: Multipart, name: &str, limit: usize) -> Result<Option<Vec<u8>>> {
    while let Some(field) = form.next().await {
        let mut field = field?;
        if field.content_disposition().get_name() != Some(name) {
            continue;
        }

        let mut data = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk = chunk?;
            if data.len() + chunk.len() > limit {
                warn!("upload exceeds {limit} bytes");
                return Err(WebError::PayloadTooLarge { limit });
            }
            data.extend_from_slice(&chunk);
        }
        return Ok(Some(data));
    }
    Ok(None)
}
