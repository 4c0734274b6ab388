//! Blob encoding for cache entries.
//!
//! Every blob starts with a one-byte marker: [`MARKER_RAW`] for a plain payload,
//! [`MARKER_GZIP`] for a gzip-compressed one. The payload itself is JSON by
//! default, or Python pickle for stores shared with Django services.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{de::DeserializeOwned, Serialize};
use std::io::{Read, Write};
use std::str::FromStr;
use thiserror::Error;

pub const MARKER_RAW: u8 = 0x00;
pub const MARKER_GZIP: u8 = 0x01;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Cannot decode an empty blob")]
    EmptyBlob,
    #[error("Unknown blob marker {0:#04x}")]
    UnknownMarker(u8),
    #[error("Failed to compress payload: {0}")]
    Compress(String),
    #[error("Failed to decompress payload: {0}")]
    Decompress(String),
    #[error("Failed to serialize payload: {0}")]
    Serialize(String),
    #[error("Failed to deserialize payload: {0}")]
    Deserialize(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PayloadFormat {
    #[default]
    Json,
    Pickle,
}

impl FromStr for PayloadFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "json" => Ok(PayloadFormat::Json),
            "pickle" => Ok(PayloadFormat::Pickle),
            _ => Err(format!("Unknown payload format: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SerializationResult {
    /// Marker byte followed by the (possibly compressed) payload.
    pub bytes: Vec<u8>,
    /// Payload length before compression.
    pub original_size: usize,
    /// Length of `bytes` as written to the store.
    pub final_size: usize,
    pub is_compressed: bool,
}

impl SerializationResult {
    pub fn compression_ratio(&self) -> f64 {
        if !self.is_compressed || self.final_size == 0 {
            return 1.0;
        }
        self.original_size as f64 / self.final_size as f64
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Codec {
    format: PayloadFormat,
}

impl Codec {
    pub fn new(format: PayloadFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> PayloadFormat {
        self.format
    }

    /// Encodes `value`, gzipping the payload when `use_compression` is set and
    /// the payload is at least `threshold_bytes` long.
    pub fn serialize<T: Serialize>(
        &self,
        value: &T,
        use_compression: bool,
        threshold_bytes: usize,
    ) -> Result<SerializationResult, CodecError> {
        let payload = self.encode_payload(value)?;
        let original_size = payload.len();

        let (marker, body) = if use_compression && original_size >= threshold_bytes {
            (MARKER_GZIP, gzip(&payload)?)
        } else {
            (MARKER_RAW, payload)
        };

        let mut bytes = Vec::with_capacity(body.len() + 1);
        bytes.push(marker);
        bytes.extend_from_slice(&body);

        Ok(SerializationResult {
            final_size: bytes.len(),
            original_size,
            is_compressed: marker == MARKER_GZIP,
            bytes,
        })
    }

    pub fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        let Some((&marker, body)) = bytes.split_first() else {
            return Err(CodecError::EmptyBlob);
        };

        match marker {
            MARKER_RAW => self.decode_payload(body),
            MARKER_GZIP => self.decode_payload(&gunzip(body)?),
            other => Err(CodecError::UnknownMarker(other)),
        }
    }

    fn encode_payload<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        match self.format {
            PayloadFormat::Json => {
                serde_json::to_vec(value).map_err(|e| CodecError::Serialize(e.to_string()))
            }
            PayloadFormat::Pickle => serde_pickle::to_vec(value, Default::default())
                .map_err(|e| CodecError::Serialize(e.to_string())),
        }
    }

    fn decode_payload<T: DeserializeOwned>(&self, payload: &[u8]) -> Result<T, CodecError> {
        match self.format {
            PayloadFormat::Json => {
                serde_json::from_slice(payload).map_err(|e| CodecError::Deserialize(e.to_string()))
            }
            PayloadFormat::Pickle => serde_pickle::from_slice(payload, Default::default())
                .map_err(|e| CodecError::Deserialize(e.to_string())),
        }
    }
}

fn gzip(payload: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(payload)
        .map_err(|e| CodecError::Compress(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| CodecError::Compress(e.to_string()))
}

fn gunzip(compressed: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut decoder = GzDecoder::new(compressed);
    let mut decompressed = Vec::new();
    decoder
        .read_to_end(&mut decompressed)
        .map_err(|e| CodecError::Decompress(e.to_string()))?;
    Ok(decompressed)
}
