use crate::core::error::{CacheError, Result};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::str::FromStr;
use tracing::debug;

/// Compression codec selection
///
/// The codec used for a row is stored alongside it, so changing the
/// configured codec never breaks rows written earlier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CompressionCodec {
    /// Gzip (deflate) - general purpose (default)
    #[default]
    Gzip,
    /// Zstandard - better compression ratio
    Zstd,
    /// LZ4 - fastest compression/decompression
    Lz4,
}

impl CompressionCodec {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gzip => "gzip",
            Self::Zstd => "zstd",
            Self::Lz4 => "lz4",
        }
    }

    fn level_range(&self) -> (u32, u32) {
        match self {
            Self::Gzip => (0, 9),
            Self::Zstd => (1, 22),
            Self::Lz4 => (0, 16),
        }
    }
}

impl FromStr for CompressionCodec {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "gzip" => Ok(Self::Gzip),
            "zstd" => Ok(Self::Zstd),
            "lz4" => Ok(Self::Lz4),
            other => Err(CacheError::Compression(format!("unknown codec: {}", other))),
        }
    }
}

/// Compression configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    pub enabled: bool,
    /// Minimum payload size to attempt compression (bytes)
    pub threshold_bytes: usize,
    pub codec: CompressionCodec,
    /// Codec-specific level (gzip 0-9, zstd 1-22, lz4 0-16)
    pub level: u32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold_bytes: 1024, // Don't compress < 1KB
            codec: CompressionCodec::Gzip,
            level: 6, // Balanced compression
        }
    }
}

impl CompressionConfig {
    pub fn validate(&self) -> Result<()> {
        let (min, max) = self.codec.level_range();
        if self.level < min || self.level > max {
            return Err(CacheError::InvalidConfig(format!(
                "{} compression level must be in {}..={}, got {}",
                self.codec.as_str(),
                min,
                max,
                self.level
            )));
        }
        Ok(())
    }
}

/// Payload compressor
#[derive(Debug, Clone)]
pub struct Compressor {
    config: CompressionConfig,
}

impl Compressor {
    pub fn new(config: CompressionConfig) -> Self {
        Self { config }
    }

    pub fn codec(&self) -> CompressionCodec {
        self.config.codec
    }

    /// Whether a payload of this size is a compression candidate
    pub fn should_compress(&self, data: &[u8]) -> bool {
        self.config.enabled && data.len() >= self.config.threshold_bytes
    }

    /// Compress `data` with the configured codec if it is a candidate.
    ///
    /// Returns `None` when the payload should be stored raw: compression is
    /// disabled, the payload is below the threshold, or the compressed form
    /// is not strictly smaller than the input.
    pub fn maybe_compress(&self, data: &[u8]) -> Result<Option<Vec<u8>>> {
        if !self.should_compress(data) {
            debug!("Skipping compression: size={} bytes", data.len());
            return Ok(None);
        }

        let compressed = self.compress(data, self.config.codec)?;
        if compressed.len() >= data.len() {
            debug!(
                "Compression not beneficial: {} → {} bytes, storing raw",
                data.len(),
                compressed.len()
            );
            return Ok(None);
        }

        debug!(
            "{} compressed: {} → {} bytes (ratio: {:.2}x)",
            self.config.codec.as_str(),
            data.len(),
            compressed.len(),
            data.len() as f64 / compressed.len() as f64
        );
        Ok(Some(compressed))
    }

    /// Compress with an explicit codec
    pub fn compress(&self, data: &[u8], codec: CompressionCodec) -> Result<Vec<u8>> {
        let result = match codec {
            CompressionCodec::Gzip => self.compress_gzip(data),
            CompressionCodec::Zstd => zstd::encode_all(data, self.config.level as i32),
            CompressionCodec::Lz4 => self.compress_lz4(data),
        };
        result.map_err(|e| CacheError::Compression(format!("{} encode: {}", codec.as_str(), e)))
    }

    /// Decompress data written with `codec`
    pub fn decompress(&self, data: &[u8], codec: CompressionCodec) -> Result<Vec<u8>> {
        let result = match codec {
            CompressionCodec::Gzip => {
                let mut decoder = GzDecoder::new(data);
                let mut out = Vec::new();
                decoder.read_to_end(&mut out).map(|_| out)
            }
            CompressionCodec::Zstd => zstd::decode_all(data),
            CompressionCodec::Lz4 => Self::decompress_lz4(data),
        };
        result.map_err(|e| CacheError::Compression(format!("{} decode: {}", codec.as_str(), e)))
    }

    fn compress_gzip(&self, data: &[u8]) -> std::io::Result<Vec<u8>> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::new(self.config.level));
        encoder.write_all(data)?;
        encoder.finish()
    }

    fn compress_lz4(&self, data: &[u8]) -> std::io::Result<Vec<u8>> {
        let mut encoder = lz4::EncoderBuilder::new()
            .level(self.config.level)
            .build(Vec::new())?;
        encoder.write_all(data)?;
        let (compressed, result) = encoder.finish();
        result?;
        Ok(compressed)
    }

    fn decompress_lz4(data: &[u8]) -> std::io::Result<Vec<u8>> {
        let mut decoder = lz4::Decoder::new(data)?;
        let mut decompressed = Vec::new();
        decoder.read_to_end(&mut decompressed)?;
        Ok(decompressed)
    }
}

impl Default for Compressor {
    fn default() -> Self {
        Self::new(CompressionConfig::default())
    }
}
