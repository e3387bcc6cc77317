//! Embedding blob layout: consecutive little-endian `f32` values.

use crate::StoreError;

const F32_BYTES: usize = std::mem::size_of::<f32>();

pub fn encode(values: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(values.len() * F32_BYTES);
    for v in values {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a blob that must hold exactly `dimension` finite values.
pub fn decode(blob: &[u8], dimension: usize) -> Result<Vec<f32>, StoreError> {
    let expected = dimension * F32_BYTES;
    if blob.len() != expected {
        return Err(StoreError::CorruptBlob(format!(
            "expected {expected} bytes for {dimension} values, got {}",
            blob.len()
        )));
    }

    blob.chunks_exact(F32_BYTES)
        .map(|c| {
            let v = f32::from_le_bytes([c[0], c[1], c[2], c[3]]);
            if v.is_finite() {
                Ok(v)
            } else {
                Err(StoreError::CorruptBlob("non-finite value".into()))
            }
        })
        .collect()
}
