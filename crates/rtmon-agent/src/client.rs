use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use rtmon_common::signing::{self, HASH_HEADER};
use rtmon_common::Metric;
use std::io::Write;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("report request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("connection failed: {0}")]
    Io(#[from] std::io::Error),

    /// The aggregator answered with a non-success status.
    #[error("aggregator answered {status}")]
    Status { status: u16 },

    #[error("report timed out after {0:?}")]
    Timeout(Duration),

    #[error("encoding batch: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("compressing batch: {0}")]
    Compress(#[source] std::io::Error),

    #[error("signing batch: {0}")]
    Sign(#[from] signing::InvalidKey),
}

/// Delivers a full batch of metrics to the aggregator.
///
/// Implementations must keep "connection refused" visible in the error's
/// source chain so the retrier can tell it apart from permanent failures.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, batch: &[Metric]) -> Result<(), ReportError>;
}

/// JSON-over-HTTP transport posting gzip-compressed batches to
/// `{base}/updates/`, signed with `HashSHA256` when a key is set.
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    key: Option<Vec<u8>>,
}

impl HttpTransport {
    pub fn new(address: &str) -> Result<Self, ReportError> {
        let client = reqwest::Client::builder().gzip(true).build()?;
        Ok(Self {
            client,
            url: updates_url(address),
            key: None,
        })
    }

    /// Signs every request body with `key`. An empty key disables signing.
    pub fn with_key(mut self, key: Option<&str>) -> Self {
        self.key = key.filter(|k| !k.is_empty()).map(|k| k.as_bytes().to_vec());
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_signing(&self) -> bool {
        self.key.is_some()
    }
}

/// Serializes `batch` to JSON and gzips it.
pub fn encode_batch(batch: &[Metric]) -> Result<Vec<u8>, ReportError> {
    let json = serde_json::to_vec(batch)?;
    let mut gz = GzEncoder::new(Vec::with_capacity(json.len() / 2), Compression::default());
    gz.write_all(&json).map_err(ReportError::Compress)?;
    gz.finish().map_err(ReportError::Compress)
}

/// Builds the batch endpoint from `host:port` or a base URL.
pub fn updates_url(address: &str) -> String {
    let base = address.trim().trim_end_matches('/');
    if base.contains("://") {
        format!("{base}/updates/")
    } else {
        format!("http://{base}/updates/")
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, batch: &[Metric]) -> Result<(), ReportError> {
        let body = encode_batch(batch)?;
        let mut req = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .header(CONTENT_ENCODING, "gzip");
        if let Some(key) = &self.key {
            req = req.header(HASH_HEADER, signing::sign(key, &body)?);
        }
        let resp = req.body(body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ReportError::Status {
                status: status.as_u16(),
            });
        }
        tracing::debug!(count = batch.len(), "Batch delivered");
        Ok(())
    }
}
