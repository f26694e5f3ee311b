use pulsemon_common::codec::{self, CodecError};
use pulsemon_common::retry::{with_retry, RetryPolicy, Retryability};
use pulsemon_common::signing::{Signer, HASH_HEADER};
use pulsemon_common::types::Metric;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::{StatusCode, Url};
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("invalid server address {address}: {reason}")]
    Address { address: String, reason: String },

    #[error("encode: {0}")]
    Codec(#[from] CodecError),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server responded {status}: {body}")]
    Status { status: StatusCode, body: String },
}

fn classify(err: &TransportError) -> Retryability {
    match err {
        TransportError::Http(_) | TransportError::Status { .. } => Retryability::Retryable,
        TransportError::Address { .. } | TransportError::Codec(_) => Retryability::NonRetryable,
    }
}

/// HTTP client for the collection endpoints.
///
/// JSON bodies are gzip-compressed and, when a key is configured, signed over
/// the uncompressed bytes. Every request is retried per the configured
/// [`RetryPolicy`]; any 2xx counts as delivered.
#[derive(Debug, Clone)]
pub struct Transport {
    client: reqwest::Client,
    base: Url,
    signer: Option<Signer>,
    retry: RetryPolicy,
}

impl Transport {
    pub fn new(
        base_url: &str,
        signer: Option<Signer>,
        retry: RetryPolicy,
    ) -> Result<Self, TransportError> {
        let base = Url::parse(base_url).map_err(|e| TransportError::Address {
            address: base_url.to_string(),
            reason: e.to_string(),
        })?;
        if base.cannot_be_a_base() {
            return Err(TransportError::Address {
                address: base_url.to_string(),
                reason: "not a base URL".to_string(),
            });
        }
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base,
            signer,
            retry,
        })
    }

    /// Posts one metric as a JSON object to `/update/`.
    pub async fn send_metric(&self, metric: &Metric) -> Result<(), TransportError> {
        let json = codec::encode_metric(metric)?;
        self.post_json(&["update", ""], json).await
    }

    /// Posts a batch as a JSON array to `/updates/`.
    pub async fn send_batch(&self, metrics: &[Metric]) -> Result<(), TransportError> {
        let json = codec::encode_batch(metrics)?;
        self.post_json(&["updates", ""], json).await
    }

    /// Posts one metric through the legacy `/update/{type}/{name}/{value}` path.
    pub async fn send_unary(&self, metric: &Metric) -> Result<(), TransportError> {
        let kind = metric.kind().to_string();
        let value = metric.value.to_string();
        let url = self.url(&["update", &kind, &metric.id, &value]);
        let url = &url;

        with_retry(
            &self.retry,
            move || async move {
                let resp = self
                    .client
                    .post(url.clone())
                    .header(CONTENT_TYPE, "text/plain")
                    .send()
                    .await?;
                check_status(resp).await.map(|_| ())
            },
            classify,
        )
        .await
    }

    async fn post_json(&self, segments: &[&str], json: Vec<u8>) -> Result<(), TransportError> {
        let url = self.url(segments);
        let signature = self.signer.as_ref().map(|s| s.sign(&json));
        let body = codec::gzip(&json)?;
        let (url, body, signature) = (&url, &body, signature.as_deref());

        let echoed = with_retry(
            &self.retry,
            move || async move {
                let mut request = self
                    .client
                    .post(url.clone())
                    .header(CONTENT_TYPE, "application/json")
                    .header(CONTENT_ENCODING, "gzip")
                    .body(body.clone());
                if let Some(signature) = signature {
                    request = request.header(HASH_HEADER, signature);
                }
                check_status(request.send().await?).await
            },
            classify,
        )
        .await?;

        tracing::debug!(url = %url, response = %echoed, "Metrics delivered");
        Ok(())
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        // `new` rejects cannot-be-a-base URLs, so segments are always editable.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }
}

async fn check_status(resp: reqwest::Response) -> Result<String, TransportError> {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    if status.is_success() {
        Ok(body)
    } else {
        Err(TransportError::Status { status, body })
    }
}
