use super::{Detector, DetectorError};
use crate::model::{BBox, Detection};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use std::time::Duration;

/// Client for an HTTP detection service.
///
/// Frames are posted as raw bytes; the service answers
/// `{"detections": [{"label", "confidence", "bbox": [x1,y1,x2,y2], "track_id"?}]}`.
#[derive(Clone)]
pub struct RemoteDetector {
    http: reqwest::Client,
    url: reqwest::Url,
}

impl RemoteDetector {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, DetectorError> {
        let url = reqwest::Url::parse(url).map_err(|e| DetectorError::Http(e.to_string()))?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DetectorError::Http(e.to_string()))?;
        Ok(Self { http, url })
    }
}

#[derive(Debug, Deserialize)]
struct DetectionResponse {
    #[serde(default)]
    detections: Vec<WireDetection>,
}

/// Services commonly report boxes as floats; the overlay wants whole pixels.
#[derive(Debug, Deserialize)]
struct WireDetection {
    label: String,
    confidence: f32,
    bbox: [f64; 4],
    #[serde(default)]
    track_id: Option<i64>,
}

impl From<WireDetection> for Detection {
    fn from(wire: WireDetection) -> Self {
        let bbox: BBox = wire.bbox.map(|v| v as i32);
        Detection {
            label: wire.label,
            confidence: wire.confidence,
            bbox,
            track_id: wire.track_id,
        }
    }
}

fn parse_detections(body: &[u8]) -> Result<Vec<Detection>, DetectorError> {
    let parsed: DetectionResponse =
        serde_json::from_slice(body).map_err(|e| DetectorError::Serialization(e.to_string()))?;
    Ok(parsed.detections.into_iter().map(Detection::from).collect())
}

#[async_trait]
impl Detector for RemoteDetector {
    async fn detect(&self, frame: Bytes) -> Result<Vec<Detection>, DetectorError> {
        let resp = self
            .http
            .post(self.url.clone())
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(frame)
            .send()
            .await
            .map_err(|e| DetectorError::Http(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(DetectorError::Response(format!("HTTP {}", resp.status())));
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| DetectorError::Http(e.to_string()))?;
        parse_detections(&body)
    }
}
