//! Content-Encoding handling and body validation

use bytes::Bytes;
use flate2::read::{DeflateDecoder, MultiGzDecoder, ZlibDecoder};
use std::io::Read;

use super::error::TransportError;
use crate::request::Request;

/// Encodings this crate can undo
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentEncoding {
    Identity,
    Gzip,
    Deflate,
    /// Declared but not decodable here; passed through untouched
    Other,
}

impl ContentEncoding {
    pub fn from_header(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "identity" => Self::Identity,
            "gzip" | "x-gzip" => Self::Gzip,
            "deflate" => Self::Deflate,
            _ => Self::Other,
        }
    }
}

pub fn decode_body(encoding: ContentEncoding, raw: Bytes) -> Result<Bytes, TransportError> {
    match encoding {
        ContentEncoding::Identity | ContentEncoding::Other => Ok(raw),
        ContentEncoding::Gzip => read_all(MultiGzDecoder::new(raw.as_ref())),
        // Servers disagree on whether deflate means zlib-wrapped or raw
        ContentEncoding::Deflate => read_all(ZlibDecoder::new(raw.as_ref()))
            .or_else(|_| read_all(DeflateDecoder::new(raw.as_ref()))),
    }
}

fn read_all(mut decoder: impl Read) -> Result<Bytes, TransportError> {
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| TransportError::Decode(e.to_string()))?;
    Ok(Bytes::from(out))
}

/// Apply the request's validators and invalidators to a decoded body
pub fn check_body(request: &Request, body: &[u8]) -> Result<(), TransportError> {
    if !request.validators.is_empty() && !request.validators.iter().any(|re| re.is_match(body)) {
        return Err(TransportError::ValidationFailure(
            "no validator matched".to_string(),
        ));
    }
    if let Some(re) = request.invalidators.iter().find(|re| re.is_match(body)) {
        return Err(TransportError::ValidationFailure(format!(
            "invalidator matched: {}",
            re.as_str()
        )));
    }
    Ok(())
}
