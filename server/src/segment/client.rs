//! Client side of the external segmentation service

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::codec;
use crate::error::{CoreError, CoreResult};
use crate::store::RawMask;

/// Produces mask bitmaps for raw image bytes
///
/// Every failure (transport, bad status, malformed payload) is reported as
/// `CoreError::ServiceUnavailable`.
#[async_trait]
pub trait SegmentationClient: Send + Sync {
    async fn segment(&self, image_bytes: Bytes) -> CoreResult<Vec<RawMask>>;
}

pub struct HttpSegmentationClient {
    http: reqwest::Client,
    url: String,
    token: Option<String>,
}

impl HttpSegmentationClient {
    pub fn new(url: impl Into<String>, token: Option<String>, timeout: Duration) -> CoreResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CoreError::ServiceUnavailable(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            url: url.into(),
            token,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl SegmentationClient for HttpSegmentationClient {
    async fn segment(&self, image_bytes: Bytes) -> CoreResult<Vec<RawMask>> {
        let payload = serde_json::json!({ "image": codec::encode_base64(&image_bytes) });

        let mut request = self.http.post(&self.url).json(&payload);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            warn!("Segmentation request to {} failed: {}", self.url, e);
            CoreError::ServiceUnavailable(format!("segmentation request failed: {}", e))
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CoreError::ServiceUnavailable(format!(
                "segmentation service responded with {}",
                status
            )));
        }

        let body = response.bytes().await.map_err(|e| {
            CoreError::ServiceUnavailable(format!("failed to read segmentation response: {}", e))
        })?;
        debug!("Segmentation response: {} bytes", body.len());

        tokio::task::spawn_blocking(move || parse_response(&body))
            .await
            .map_err(|e| CoreError::ServiceUnavailable(format!("decode task failed: {}", e)))?
    }
}

#[derive(Debug, Deserialize)]
struct SegmentationResponse {
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
    #[serde(alias = "processed_masks")]
    masks: Vec<WireMask>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireMask {
    Encoded(String),
    Scored {
        mask_b64: String,
        #[serde(default)]
        score: Option<f32>,
    },
}

/// Decode a service response body into raw masks
pub fn parse_response(body: &[u8]) -> CoreResult<Vec<RawMask>> {
    let response: SegmentationResponse = serde_json::from_slice(body).map_err(|e| {
        CoreError::ServiceUnavailable(format!("malformed segmentation response: {}", e))
    })?;

    if response.masks.is_empty() {
        return Err(CoreError::ServiceUnavailable(
            "segmentation service returned no masks".into(),
        ));
    }

    let declared = response.width.zip(response.height);
    let mut masks = Vec::with_capacity(response.masks.len());
    for (i, wire) in response.masks.into_iter().enumerate() {
        let (encoded, score) = match wire {
            WireMask::Encoded(s) => (s, None),
            WireMask::Scored { mask_b64, score } => (mask_b64, score),
        };
        let bitmap = codec::decode_mask_b64(&encoded).map_err(|e| {
            CoreError::ServiceUnavailable(format!("mask {} is not a valid PNG: {}", i, e))
        })?;

        if let Some((w, h)) = declared
            && bitmap.dimensions() != (w, h)
        {
            return Err(CoreError::ServiceUnavailable(format!(
                "mask {} is {}x{} but the response declares {}x{}",
                i,
                bitmap.width(),
                bitmap.height(),
                w,
                h
            )));
        }

        masks.push(RawMask { bitmap, score });
    }
    Ok(masks)
}
