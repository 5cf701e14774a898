//! Payload compression for data-channel labels
//!
//! Labels the remote marks with `compress: true` in its offer are zlib
//! compressed on send and decompressed on receipt.

use bytes::Bytes;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::collections::HashSet;
use std::io::{Read, Write};

use crate::types::DataChannelOffer;
use crate::{Error, Result, MAX_PAYLOAD_SIZE};

/// Compress a payload with zlib
pub fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| Error::CompressionError(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| Error::CompressionError(e.to_string()))
}

/// Decompress a zlib payload of at most [`MAX_PAYLOAD_SIZE`] bytes
pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    decompress_limited(data, MAX_PAYLOAD_SIZE)
}

/// Decompress a zlib payload, failing once the output would exceed `limit`
pub fn decompress_limited(data: &[u8], limit: usize) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    ZlibDecoder::new(data)
        .take(limit as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|e| Error::CompressionError(e.to_string()))?;
    if out.len() > limit {
        return Err(Error::CompressionError(format!(
            "decompressed payload exceeds {} bytes",
            limit
        )));
    }
    Ok(out)
}

/// Set of labels whose payloads are compressed
///
/// Populated once per session from the offer and immutable afterwards.
#[derive(Debug, Clone, Default)]
pub struct CompressedLabels {
    labels: HashSet<String>,
    populated: bool,
}

impl CompressedLabels {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the compressed labels declared by an offer
    ///
    /// Returns false (and changes nothing) if the set was already populated.
    pub fn populate(&mut self, channels: &[DataChannelOffer]) -> bool {
        if self.populated {
            return false;
        }
        self.labels = channels
            .iter()
            .filter(|c| c.compress)
            .map(|c| c.label.clone())
            .collect();
        self.populated = true;
        true
    }

    pub fn contains(&self, label: &str) -> bool {
        self.labels.contains(label)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Prepare a payload for sending on `label`
    pub fn encode(&self, label: &str, payload: &[u8]) -> Result<Bytes> {
        if self.contains(label) {
            Ok(Bytes::from(compress(payload)?))
        } else {
            Ok(Bytes::copy_from_slice(payload))
        }
    }

    /// Restore a payload received on `label`
    pub fn decode(&self, label: &str, payload: &[u8]) -> Result<Bytes> {
        if self.contains(label) {
            Ok(Bytes::from(decompress(payload)?))
        } else {
            Ok(Bytes::copy_from_slice(payload))
        }
    }
}
