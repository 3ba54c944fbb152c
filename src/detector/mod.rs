//! Frame -> detections. Inference itself lives outside this process.

mod remote;

pub use remote::RemoteDetector;

use crate::model::Detection;
use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

#[async_trait]
pub trait Detector: Send + Sync {
    async fn detect(&self, frame: Bytes) -> Result<Vec<Detection>, DetectorError>;
}

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("http error: {0}")]
    Http(String),
    #[error("response error: {0}")]
    Response(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}
