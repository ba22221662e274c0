//! Compression Codec.
//!
//! Two thresholds drive behaviour: a skip rule (store uncompressed below
//! `minCompressSize`) and a tier target ratio, from which the codec derives
//! a deflate effort level. Grounded on `flate2`, a real deflate-family crate
//! widely used across this corpus, rather than a hand-rolled scheme.

use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};

use flate2::write::DeflateEncoder;
use flate2::Compression;
use tme_core::{CompressionConfig, CompressionMethod};
use tracing::warn;

/// How a memory's content is stored once the codec has processed it.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentPayload {
    Raw(String),
    Compressed {
        bytes: Vec<u8>,
        original_size: usize,
        compressed_size: usize,
        ratio: f64,
    },
}

impl ContentPayload {
    pub fn original_size(&self) -> usize {
        match self {
            ContentPayload::Raw(s) => s.len(),
            ContentPayload::Compressed { original_size, .. } => *original_size,
        }
    }

    pub fn is_compressed(&self) -> bool {
        matches!(self, ContentPayload::Compressed { .. })
    }
}

/// `effort = floor((1 - targetRatio) * 9)` against a deflate-family
/// algorithm, clamped to flate2's valid `0..=9` range.
fn effort_for_ratio(target_ratio: f64) -> u32 {
    (((1.0 - target_ratio) * 9.0).floor() as i64).clamp(0, 9) as u32
}

/// Aggregate statistics the codec exposes for the Lifecycle Manager's stats
/// refresh: cumulative original/compressed sizes, number of memories
/// compressed, exponential moving ratio.
#[derive(Debug, Default)]
pub struct CodecStats {
    cumulative_original: AtomicU64,
    cumulative_compressed: AtomicU64,
    compressed_count: AtomicU64,
    ema_ratio_bits: AtomicU64, // f64 bit pattern, since there is no AtomicF64
}

impl CodecStats {
    const EMA_ALPHA: f64 = 0.2;

    fn record(&self, original: usize, compressed: usize) {
        self.cumulative_original.fetch_add(original as u64, Ordering::Relaxed);
        self.cumulative_compressed.fetch_add(compressed as u64, Ordering::Relaxed);
        self.compressed_count.fetch_add(1, Ordering::Relaxed);

        let ratio = if original == 0 { 1.0 } else { compressed as f64 / original as f64 };
        let prev = f64::from_bits(self.ema_ratio_bits.load(Ordering::Relaxed));
        let updated = if prev == 0.0 {
            ratio
        } else {
            Self::EMA_ALPHA * ratio + (1.0 - Self::EMA_ALPHA) * prev
        };
        self.ema_ratio_bits.store(updated.to_bits(), Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CodecStatsSnapshot {
        CodecStatsSnapshot {
            cumulative_original: self.cumulative_original.load(Ordering::Relaxed),
            cumulative_compressed: self.cumulative_compressed.load(Ordering::Relaxed),
            compressed_count: self.compressed_count.load(Ordering::Relaxed),
            ema_ratio: f64::from_bits(self.ema_ratio_bits.load(Ordering::Relaxed)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CodecStatsSnapshot {
    pub cumulative_original: u64,
    pub cumulative_compressed: u64,
    pub compressed_count: u64,
    pub ema_ratio: f64,
}

pub struct CompressionCodec {
    stats: CodecStats,
}

impl CompressionCodec {
    pub fn new() -> Self {
        Self { stats: CodecStats::default() }
    }

    pub fn stats(&self) -> CodecStatsSnapshot {
        self.stats.snapshot()
    }

    /// Compress `content` according to `config` and the tier's target
    /// ratio. Never fails the caller: on internal compression error it logs
    /// and degrades to the uncompressed representation.
    pub fn compress(&self, content: &str, tier_target_ratio: f64, config: &CompressionConfig) -> ContentPayload {
        if !config.enabled || content.len() < config.min_size_bytes {
            return ContentPayload::Raw(content.to_string());
        }
        if config.method != CompressionMethod::Lossless {
            // Lossy compression is accepted by configuration validation but
            // not implemented by any codec path -- degrade to raw rather
            // than guess at an undefined lossy transform.
            return ContentPayload::Raw(content.to_string());
        }

        let effort = effort_for_ratio(tier_target_ratio);
        match self.deflate(content.as_bytes(), effort) {
            Ok(bytes) => {
                let original_size = content.len();
                let compressed_size = bytes.len();
                self.stats.record(original_size, compressed_size);
                ContentPayload::Compressed {
                    bytes,
                    original_size,
                    compressed_size,
                    ratio: if original_size == 0 { 1.0 } else { compressed_size as f64 / original_size as f64 },
                }
            }
            Err(e) => {
                warn!(error = %e, "compression failed, storing content uncompressed");
                ContentPayload::Raw(content.to_string())
            }
        }
    }

    fn deflate(&self, data: &[u8], effort: u32) -> std::io::Result<Vec<u8>> {
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::new(effort));
        encoder.write_all(data)?;
        encoder.finish()
    }

    /// Decompress `payload` back to the original text. Idempotent on
    /// uncompressed inputs.
    pub fn decompress(&self, payload: &ContentPayload) -> tme_core::Result<String> {
        match payload {
            ContentPayload::Raw(s) => Ok(s.clone()),
            ContentPayload::Compressed { bytes, .. } => {
                use std::io::Read;
                let mut decoder = flate2::read::DeflateDecoder::new(&bytes[..]);
                let mut out = String::new();
                decoder
                    .read_to_string(&mut out)
                    .map_err(|e| tme_core::Error::Internal(format!("decompression failed: {e}")))?;
                Ok(out)
            }
        }
    }
}

impl Default for CompressionCodec {
    fn default() -> Self {
        Self::new()
    }
}
