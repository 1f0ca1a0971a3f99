use serde::{Deserialize, Serialize};

/// Multipart field the photograph is uploaded under
pub const IMAGE_FIELD: &str = "imagen";

/// Successful segmentation: the annotated photo as a base 64 JPEG
#[derive(Debug, Serialize, Deserialize)]
pub struct SegmentationResponse {
    pub segmentada: String,
}

/// Body of a segmentation request by image URL
#[derive(Debug, Serialize, Deserialize)]
pub struct UrlRequest {
    pub url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub device: String,
}
