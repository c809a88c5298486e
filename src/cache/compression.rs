//! Payload Compression for the Shared Tier
//!
//! Serialized payloads above a size threshold are compressed and prefixed
//! with an ASCII marker so readers can tell compressed from raw bytes:
//!
//! ```text
//!   GZIP:<gzip stream>     gzip (default)
//!   LZ4:<lz4 block>        lz4 (size-prefixed block)
//!   <anything else>        raw serialized payload
//! ```
//!
//! # Example
//!
//! ```
//! use tierwatch::cache::compression::{CompressionAlgorithm, CompressionManager};
//!
//! let manager = CompressionManager::new();
//!
//! let data = "Hello, this is test data that should compress well! ".repeat(64);
//! let encoded = manager.encode(data.as_bytes());
//! assert!(encoded.starts_with(CompressionAlgorithm::Gzip.marker()));
//!
//! let decoded = manager.decode(&encoded).unwrap();
//! assert_eq!(decoded.as_ref(), data.as_bytes());
//! ```

use std::io::{Read, Write};

use bytes::{BufMut, Bytes, BytesMut};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};

// =============================================================================
// Compression Algorithm
// =============================================================================

/// Supported compression algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    /// Store raw
    None,
    /// gzip via flate2
    #[default]
    Gzip,
    /// LZ4 block
    Lz4,
}

impl CompressionAlgorithm {
    pub fn name(&self) -> &'static str {
        match self {
            CompressionAlgorithm::None => "none",
            CompressionAlgorithm::Gzip => "gzip",
            CompressionAlgorithm::Lz4 => "lz4",
        }
    }

    /// Payload prefix identifying this algorithm (empty for raw)
    pub fn marker(&self) -> &'static [u8] {
        match self {
            CompressionAlgorithm::None => b"",
            CompressionAlgorithm::Gzip => b"GZIP:",
            CompressionAlgorithm::Lz4 => b"LZ4:",
        }
    }

    /// Identify a payload by its prefix
    pub fn detect(payload: &[u8]) -> Self {
        [CompressionAlgorithm::Gzip, CompressionAlgorithm::Lz4]
            .into_iter()
            .find(|alg| payload.starts_with(alg.marker()))
            .unwrap_or(CompressionAlgorithm::None)
    }
}

impl std::fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

// =============================================================================
// Compression Configuration
// =============================================================================

/// Configuration for shared-tier compression
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    pub algorithm: CompressionAlgorithm,
    /// Payloads strictly larger than this are compressed
    pub threshold_bytes: usize,
    /// gzip level 0-9
    pub level: u32,
    /// Largest payload a decode may produce
    pub max_decompressed_bytes: usize,
}

/// Default decode ceiling (64MB)
pub const DEFAULT_MAX_DECOMPRESSED_BYTES: usize = 64 * 1024 * 1024;

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            algorithm: CompressionAlgorithm::Gzip,
            threshold_bytes: 1024,
            level: 6,
            max_decompressed_bytes: DEFAULT_MAX_DECOMPRESSED_BYTES,
        }
    }
}

// =============================================================================
// Compressor Trait
// =============================================================================

/// Trait for compression implementations
pub trait Compressor: Send + Sync {
    fn algorithm(&self) -> CompressionAlgorithm;

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Fails with `DecompressionFailed` rather than produce more than
    /// `max_len` bytes
    fn decompress(&self, data: &[u8], max_len: usize) -> Result<Vec<u8>>;
}

fn too_large(algorithm: &str, max_len: usize) -> Error {
    Error::DecompressionFailed {
        algorithm: algorithm.into(),
        reason: format!("payload expands beyond {} bytes", max_len),
    }
}

/// gzip compressor
pub struct GzipCompressor {
    level: flate2::Compression,
}

impl GzipCompressor {
    pub fn new(level: u32) -> Self {
        Self {
            level: flate2::Compression::new(level.min(9)),
        }
    }
}

impl Default for GzipCompressor {
    fn default() -> Self {
        Self::new(6)
    }
}

impl Compressor for GzipCompressor {
    fn algorithm(&self) -> CompressionAlgorithm {
        CompressionAlgorithm::Gzip
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), self.level);
        encoder
            .write_all(data)
            .and_then(|_| encoder.finish())
            .map_err(|e| Error::CompressionFailed {
                algorithm: "gzip".into(),
                reason: e.to_string(),
            })
    }

    fn decompress(&self, data: &[u8], max_len: usize) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(data.len().saturating_mul(2).min(max_len));
        GzDecoder::new(data)
            .take(max_len as u64 + 1)
            .read_to_end(&mut out)
            .map_err(|e| Error::DecompressionFailed {
                algorithm: "gzip".into(),
                reason: e.to_string(),
            })?;
        if out.len() > max_len {
            return Err(too_large("gzip", max_len));
        }
        Ok(out)
    }
}

/// LZ4 block compressor
#[derive(Default)]
pub struct Lz4Compressor;

impl Compressor for Lz4Compressor {
    fn algorithm(&self) -> CompressionAlgorithm {
        CompressionAlgorithm::Lz4
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        lz4::block::compress(data, Some(lz4::block::CompressionMode::DEFAULT), true).map_err(|e| {
            Error::CompressionFailed {
                algorithm: "lz4".into(),
                reason: e.to_string(),
            }
        })
    }

    fn decompress(&self, data: &[u8], max_len: usize) -> Result<Vec<u8>> {
        // Little-endian size prefix written by `compress(.., true)`
        let declared = match data.get(..4) {
            Some(prefix) => u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize,
            None => {
                return Err(Error::DecompressionFailed {
                    algorithm: "lz4".into(),
                    reason: "missing size prefix".into(),
                })
            }
        };
        if declared > max_len || declared > i32::MAX as usize {
            return Err(too_large("lz4", max_len));
        }
        lz4::block::decompress(data, None).map_err(|e| Error::DecompressionFailed {
            algorithm: "lz4".into(),
            reason: e.to_string(),
        })
    }
}

// =============================================================================
// Compression Manager
// =============================================================================

/// Encodes payloads with an optional compression marker and decodes them back
pub struct CompressionManager {
    config: CompressionConfig,
    gzip: GzipCompressor,
    lz4: Lz4Compressor,
}

impl CompressionManager {
    pub fn new() -> Self {
        Self::with_config(CompressionConfig::default())
    }

    pub fn with_config(config: CompressionConfig) -> Self {
        Self {
            gzip: GzipCompressor::new(config.level),
            lz4: Lz4Compressor,
            config,
        }
    }

    fn compressor(&self, algorithm: CompressionAlgorithm) -> Option<&dyn Compressor> {
        match algorithm {
            CompressionAlgorithm::None => None,
            CompressionAlgorithm::Gzip => Some(&self.gzip),
            CompressionAlgorithm::Lz4 => Some(&self.lz4),
        }
    }

    /// Encode a serialized payload for the wire.
    ///
    /// Payloads at or below the threshold, or ones that do not shrink, are
    /// stored raw. A compressor failure also falls back to raw.
    pub fn encode(&self, data: &[u8]) -> Bytes {
        if data.len() <= self.config.threshold_bytes {
            return Bytes::copy_from_slice(data);
        }
        let Some(compressor) = self.compressor(self.config.algorithm) else {
            return Bytes::copy_from_slice(data);
        };

        match compressor.compress(data) {
            Ok(compressed) => {
                let marker = compressor.algorithm().marker();
                if marker.len() + compressed.len() < data.len() {
                    let mut out = BytesMut::with_capacity(marker.len() + compressed.len());
                    out.put_slice(marker);
                    out.put_slice(&compressed);
                    out.freeze()
                } else {
                    Bytes::copy_from_slice(data)
                }
            }
            Err(e) => {
                warn!(error = %e, "Compression failed, storing uncompressed");
                Bytes::copy_from_slice(data)
            }
        }
    }

    /// Decode a wire payload, decompressing when it carries a marker
    pub fn decode(&self, payload: &[u8]) -> Result<Bytes> {
        let algorithm = CompressionAlgorithm::detect(payload);
        match self.compressor(algorithm) {
            None => Ok(Bytes::copy_from_slice(payload)),
            Some(compressor) => {
                let body = &payload[algorithm.marker().len()..];
                let max_len = self.config.max_decompressed_bytes;
                Ok(Bytes::from(compressor.decompress(body, max_len)?))
            }
        }
    }

    pub fn config(&self) -> &CompressionConfig {
        &self.config
    }
}

impl Default for CompressionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compressible() -> Vec<u8> {
        br#"{"symbol":"ACME","price":101.25,"volume":1200}"#.repeat(100)
    }

    #[test]
    fn test_gzip_roundtrip() {
        let compressor = GzipCompressor::default();
        let data = compressible();

        let compressed = compressor.compress(&data).unwrap();
        assert!(compressed.len() < data.len());
        assert_eq!(compressor.decompress(&compressed, data.len()).unwrap(), data);
    }

    #[test]
    fn test_lz4_roundtrip() {
        let compressor = Lz4Compressor;
        let data = compressible();

        let compressed = compressor.compress(&data).unwrap();
        assert_eq!(compressor.decompress(&compressed, data.len()).unwrap(), data);
    }

    #[test]
    fn test_decode_ceiling() {
        let data = compressible();
        let limit = data.len() - 1;

        let gzip = GzipCompressor::default().compress(&data).unwrap();
        assert!(matches!(
            GzipCompressor::default().decompress(&gzip, limit),
            Err(Error::DecompressionFailed { .. })
        ));

        let lz4 = Lz4Compressor.compress(&data).unwrap();
        assert!(matches!(
            Lz4Compressor.decompress(&lz4, limit),
            Err(Error::DecompressionFailed { .. })
        ));
    }

    #[test]
    fn test_forged_lz4_size_prefix_is_rejected() {
        let manager = CompressionManager::new();
        // Declares a 2GB block
        let mut payload = b"LZ4:".to_vec();
        payload.extend_from_slice(&0x7fff_ffffu32.to_le_bytes());
        payload.extend_from_slice(b"\x00");

        let err = manager.decode(&payload).unwrap_err();
        assert!(matches!(err, Error::DecompressionFailed { .. }));
    }

    #[test]
    fn test_manager_honours_configured_ceiling() {
        let data = compressible();
        let writer = CompressionManager::new();
        let reader = CompressionManager::with_config(CompressionConfig {
            max_decompressed_bytes: 1024,
            ..Default::default()
        });

        let encoded = writer.encode(&data);
        assert!(reader.decode(&encoded).is_err());
        assert_eq!(writer.decode(&encoded).unwrap().as_ref(), data.as_slice());
    }

    #[test]
    fn test_small_payload_stays_raw() {
        let manager = CompressionManager::new();
        let encoded = manager.encode(b"{\"id\":1}");
        assert_eq!(encoded.as_ref(), b"{\"id\":1}");
        assert_eq!(CompressionAlgorithm::detect(&encoded), CompressionAlgorithm::None);
    }

    #[test]
    fn test_large_payload_is_marked() {
        let manager = CompressionManager::new();
        let data = compressible();

        let encoded = manager.encode(&data);
        assert!(encoded.starts_with(b"GZIP:"));
        assert!(encoded.len() < data.len());
        assert_eq!(manager.decode(&encoded).unwrap().as_ref(), data.as_slice());
    }

    #[test]
    fn test_lz4_marker() {
        let manager = CompressionManager::with_config(CompressionConfig {
            algorithm: CompressionAlgorithm::Lz4,
            ..Default::default()
        });
        let data = compressible();

        let encoded = manager.encode(&data);
        assert!(encoded.starts_with(b"LZ4:"));
        assert_eq!(manager.decode(&encoded).unwrap().as_ref(), data.as_slice());
    }

    #[test]
    fn test_incompressible_data_stays_raw() {
        let manager = CompressionManager::with_config(CompressionConfig {
            threshold_bytes: 16,
            ..Default::default()
        });
        // Pseudo-random bytes from an LCG do not shrink under gzip
        let mut state: u32 = 0x1234_5678;
        let noisy: Vec<u8> = (0..512)
            .map(|_| {
                state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                (state >> 24) as u8
            })
            .collect();

        let encoded = manager.encode(&noisy);
        assert_eq!(encoded.as_ref(), noisy.as_slice());
    }

    #[test]
    fn test_corrupt_marked_payload_is_an_error() {
        let manager = CompressionManager::new();
        let err = manager.decode(b"GZIP:not a gzip stream").unwrap_err();
        assert!(matches!(err, Error::DecompressionFailed { .. }));
    }

    #[test]
    fn test_algorithm_names() {
        assert_eq!(CompressionAlgorithm::Gzip.to_string(), "gzip");
        assert_eq!(CompressionAlgorithm::Lz4.name(), "lz4");
        assert_eq!(CompressionAlgorithm::default(), CompressionAlgorithm::Gzip);
    }
}
