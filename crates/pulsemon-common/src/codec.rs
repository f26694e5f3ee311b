//! JSON and gzip helpers for metric payloads.

use crate::types::Metric;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("gzip: {0}")]
    Io(#[from] std::io::Error),
}

pub fn gzip(bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(bytes.len() / 2), Compression::default());
    encoder.write_all(bytes)?;
    Ok(encoder.finish()?)
}

pub fn gunzip(bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::with_capacity(bytes.len() * 2);
    GzDecoder::new(bytes).read_to_end(&mut out)?;
    Ok(out)
}

/// Encodes one metric as a bare JSON object.
pub fn encode_metric(metric: &Metric) -> Result<Vec<u8>, CodecError> {
    Ok(serde_json::to_vec(metric)?)
}

/// Encodes a batch as a JSON array. A single-element batch is still an array.
pub fn encode_batch(metrics: &[Metric]) -> Result<Vec<u8>, CodecError> {
    Ok(serde_json::to_vec(metrics)?)
}

pub fn decode_metric(bytes: &[u8]) -> Result<Metric, CodecError> {
    Ok(serde_json::from_slice(bytes)?)
}

pub fn decode_batch(bytes: &[u8]) -> Result<Vec<Metric>, CodecError> {
    Ok(serde_json::from_slice(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_survives_json_and_gzip() {
        let original = Metric::gauge("HeapObjects", 12345.678);
        let packed = gzip(&encode_metric(&original).unwrap()).unwrap();
        let restored = decode_metric(&gunzip(&packed).unwrap()).unwrap();
        assert_eq!(restored, original);
    }

    #[test]
    fn one_element_batch_is_an_array() {
        let body = encode_batch(&[Metric::counter("PollCount", 1)]).unwrap();
        assert_eq!(
            String::from_utf8(body).unwrap(),
            r#"[{"id":"PollCount","type":"counter","delta":1}]"#
        );
    }

    #[test]
    fn batch_decoding_validates_every_element() {
        let body = br#"[{"id":"a","type":"gauge","value":1.0},{"id":"","type":"gauge","value":2.0}]"#;
        assert!(decode_batch(body).is_err());
    }

    #[test]
    fn garbage_is_not_gzip() {
        assert!(matches!(gunzip(b"not gzip"), Err(CodecError::Io(_))));
    }
}
