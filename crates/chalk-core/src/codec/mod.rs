//! Stroke serializer for network transport and storage.
//!
//! Points are packed into a compact little-endian binary layout (coordinates
//! as raw `f64`, timestamps as zig-zag varint deltas, pressure as raw `f32`),
//! compressed with LZ4 and base64-encoded for JSON transport. Decoding the
//! payload reproduces the input points bit for bit.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{Bounds, StrokePoint};

/// Encoding tag carried alongside every payload.
pub const ENCODING_LZ4_BIN_V1: &str = "lz4-bin-v1";

const FORMAT_VERSION: u8 = 1;
const POINT_FIXED_BYTES: usize = 8 + 8 + 4;

/// Stroke codec failures
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("unsupported stroke encoding '{0}'")]
    UnsupportedEncoding(String),
    #[error("point {index} has a non-finite coordinate or pressure")]
    NonFinite { index: usize },
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("invalid compressed payload: {0}")]
    Decompress(#[from] lz4_flex::block::DecompressError),
    #[error("unsupported stroke format version {0}")]
    Version(u8),
    #[error("stroke payload is truncated")]
    Truncated,
    #[error("stroke payload has {0} unexpected trailing bytes")]
    TrailingBytes(usize),
}

/// Encoded stroke plus metadata for storage rows and telemetry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodedStroke {
    pub encoding: String,
    pub payload: String,
    pub point_count: usize,
    #[serde(default)]
    pub bounds: Option<Bounds>,
    /// Size of the points as plain JSON
    pub original_bytes: usize,
    /// Size of the transported payload
    pub compressed_bytes: usize,
}

impl EncodedStroke {
    /// `original_bytes / compressed_bytes`; 1.0 for an empty payload.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn compression_ratio(&self) -> f64 {
        if self.compressed_bytes == 0 {
            1.0
        } else {
            self.original_bytes as f64 / self.compressed_bytes as f64
        }
    }
}

/// Check that [`encode`] will accept `points` without encoding them.
pub fn validate(points: &[StrokePoint]) -> Result<(), CodecError> {
    match points.iter().position(|point| {
        !(point.x.is_finite() && point.y.is_finite() && point.pressure.is_finite())
    }) {
        Some(index) => Err(CodecError::NonFinite { index }),
        None => Ok(()),
    }
}

/// Encode `points` with the current encoding.
pub fn encode(points: &[StrokePoint]) -> Result<EncodedStroke, CodecError> {
    validate(points)?;

    let mut buffer = Vec::with_capacity(points.len() * (POINT_FIXED_BYTES + 2) + 8);
    buffer.push(FORMAT_VERSION);
    write_varint(&mut buffer, points.len() as u64);

    let mut previous_t = 0i64;
    for point in points {
        buffer.extend_from_slice(&point.x.to_le_bytes());
        buffer.extend_from_slice(&point.y.to_le_bytes());
        write_varint(&mut buffer, zigzag(point.t.wrapping_sub(previous_t)));
        buffer.extend_from_slice(&point.pressure.to_le_bytes());
        previous_t = point.t;
    }

    let compressed = lz4_flex::compress_prepend_size(&buffer);
    let payload = STANDARD.encode(compressed);
    let original_bytes = serde_json::to_vec(points).map_or(0, |json| json.len());

    Ok(EncodedStroke {
        encoding: ENCODING_LZ4_BIN_V1.to_string(),
        compressed_bytes: payload.len(),
        payload,
        point_count: points.len(),
        bounds: Bounds::of(points),
        original_bytes,
    })
}

/// Decode a payload produced by [`encode`].
pub fn decode(encoding: &str, payload: &str) -> Result<Vec<StrokePoint>, CodecError> {
    if encoding != ENCODING_LZ4_BIN_V1 {
        return Err(CodecError::UnsupportedEncoding(encoding.to_string()));
    }

    let compressed = STANDARD.decode(payload.trim())?;
    let bytes = lz4_flex::decompress_size_prepended(&compressed)?;
    let mut reader = Reader::new(&bytes);

    let version = reader.byte()?;
    if version != FORMAT_VERSION {
        return Err(CodecError::Version(version));
    }

    let count = usize::try_from(reader.varint()?).map_err(|_| CodecError::Truncated)?;
    if count > reader.remaining() / POINT_FIXED_BYTES + 1 {
        return Err(CodecError::Truncated);
    }

    let mut points = Vec::with_capacity(count);
    let mut previous_t = 0i64;
    for _ in 0..count {
        let x = f64::from_le_bytes(reader.array()?);
        let y = f64::from_le_bytes(reader.array()?);
        let t = previous_t.wrapping_add(unzigzag(reader.varint()?));
        let pressure = f32::from_le_bytes(reader.array()?);
        points.push(StrokePoint { x, y, t, pressure });
        previous_t = t;
    }

    match reader.remaining() {
        0 => Ok(points),
        trailing => Err(CodecError::TrailingBytes(trailing)),
    }
}

#[allow(clippy::cast_sign_loss)]
const fn zigzag(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

#[allow(clippy::cast_possible_wrap)]
const fn unzigzag(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

fn write_varint(buffer: &mut Vec<u8>, mut value: u64) {
    loop {
        #[allow(clippy::cast_possible_truncation)]
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            buffer.push(byte);
            return;
        }
        buffer.push(byte | 0x80);
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> Reader<'a> {
    const fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, position: 0 }
    }

    const fn remaining(&self) -> usize {
        self.bytes.len().saturating_sub(self.position)
    }

    fn byte(&mut self) -> Result<u8, CodecError> {
        let byte = *self.bytes.get(self.position).ok_or(CodecError::Truncated)?;
        self.position += 1;
        Ok(byte)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let end = self.position.checked_add(N).ok_or(CodecError::Truncated)?;
        let slice = self
            .bytes
            .get(self.position..end)
            .ok_or(CodecError::Truncated)?;
        self.position = end;
        slice.try_into().map_err(|_| CodecError::Truncated)
    }

    fn varint(&mut self) -> Result<u64, CodecError> {
        let mut value = 0u64;
        for shift in (0..64).step_by(7) {
            let byte = self.byte()?;
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(CodecError::Truncated)
    }
}
